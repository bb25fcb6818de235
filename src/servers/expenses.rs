//! Expense ledger backed by SQLite.
//!
//! Every operation opens its own connection and drops it before returning.
//! Blocking SQLite work runs on the blocking pool.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::tool_server::{
    Arguments, ParamSpec, ParamType, ResourceBody, ResourceEntry, ServerRegistry, ToolEntry,
    ToolError, ToolOutput,
};

pub const CATEGORIES_URI: &str = "expense://categories";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    amount REAL NOT NULL,
    category TEXT NOT NULL,
    subcategory TEXT DEFAULT '',
    description TEXT DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date);
";

/// Served when no categories file is configured or the file is absent.
const DEFAULT_CATEGORIES: &str = r#"{
  "categories": [
    {"name": "food", "subcategories": ["groceries", "dining_out", "coffee"]},
    {"name": "transport", "subcategories": ["fuel", "public_transport", "taxi", "parking"]},
    {"name": "housing", "subcategories": ["rent", "maintenance", "furniture"]},
    {"name": "utilities", "subcategories": ["electricity", "water", "internet", "phone"]},
    {"name": "health", "subcategories": ["pharmacy", "doctor", "insurance"]},
    {"name": "entertainment", "subcategories": ["movies", "events", "subscriptions"]},
    {"name": "shopping", "subcategories": ["clothing", "electronics", "gifts"]},
    {"name": "education", "subcategories": ["books", "courses"]},
    {"name": "travel", "subcategories": ["flights", "hotels"]},
    {"name": "other", "subcategories": []}
  ]
}
"#;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("'{field}' must be a YYYY-MM-DD date, got '{value}'")]
    InvalidDate { field: String, value: String },

    #[error("ledger task failed: {0}")]
    Task(String),
}

impl LedgerError {
    fn into_tool_error(self, tool: &str) -> ToolError {
        match self {
            LedgerError::InvalidDate { .. } => ToolError::InvalidArguments {
                tool: tool.to_string(),
                reason: self.to_string(),
            },
            other => ToolError::execution(tool, other.to_string()),
        }
    }
}

/// One stored expense.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: i64,
    pub date: String,
    pub amount: f64,
    pub category: String,
    pub subcategory: String,
    pub description: String,
}

/// Input for [`Ledger::add`].
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub date: String,
    pub amount: f64,
    pub category: String,
    pub subcategory: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

fn check_date(field: &str, value: &str) -> Result<(), LedgerError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| LedgerError::InvalidDate {
            field: field.to_string(),
            value: value.to_string(),
        })
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Handle to the ledger file. Holds a path, never a connection.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Create the schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Task(e.to_string()))?;
        }
        ledger.connect()?.execute_batch(SCHEMA)?;
        tracing::debug!(path = %ledger.path.display(), "expense ledger ready");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn add(&self, expense: &NewExpense) -> Result<i64, LedgerError> {
        check_date("date", &expense.date)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO expenses (date, amount, category, subcategory, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                expense.date,
                expense.amount,
                expense.category,
                expense.subcategory,
                expense.description
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Expenses dated within `[start, end]`, oldest first.
    pub fn list(&self, start: &str, end: &str) -> Result<Vec<Expense>, LedgerError> {
        check_date("start_date", start)?;
        check_date("end_date", end)?;
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, amount, category, subcategory, description
             FROM expenses WHERE date BETWEEN ?1 AND ?2
             ORDER BY date ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(Expense {
                id: row.get(0)?,
                date: row.get(1)?,
                amount: row.get(2)?,
                category: row.get(3)?,
                subcategory: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        let expenses = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(expenses)
    }

    /// Totals per category within `[start, end]`, largest first.
    pub fn summarize(
        &self,
        start: &str,
        end: &str,
        category: Option<&str>,
    ) -> Result<Vec<CategoryTotal>, LedgerError> {
        check_date("start_date", start)?;
        check_date("end_date", end)?;
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT category, SUM(amount) AS total
             FROM expenses
             WHERE date BETWEEN ?1 AND ?2 AND (?3 IS NULL OR category = ?3)
             GROUP BY category ORDER BY total DESC",
        )?;
        let rows = stmt.query_map(params![start, end, category], |row| {
            Ok(CategoryTotal {
                category: row.get(0)?,
                total: row.get(1)?,
            })
        })?;
        let totals = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(totals)
    }
}

// ─── Server ──────────────────────────────────────────────────────────────────

/// Where the ledger and the categories file live.
#[derive(Debug, Clone)]
pub struct ExpensesConfig {
    pub db_path: PathBuf,
    pub categories_path: Option<PathBuf>,
}

impl ExpensesConfig {
    /// `EXPENSES_DB_PATH` and `EXPENSES_CATEGORIES_PATH`, falling back to
    /// the application data directory.
    pub fn from_env() -> Self {
        let db_path = std::env::var_os("EXPENSES_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join("expenses.db"));
        let categories_path = std::env::var_os("EXPENSES_CATEGORIES_PATH")
            .map(PathBuf::from)
            .or_else(|| {
                let candidate = crate::data_dir().join("categories.json");
                candidate.exists().then_some(candidate)
            });
        Self {
            db_path,
            categories_path,
        }
    }
}

fn load_categories(path: Option<&Path>) -> Result<ResourceBody, ToolError> {
    let Some(path) = path else {
        return Ok(ResourceBody::Text(DEFAULT_CATEGORIES.to_string()));
    };
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(ResourceBody::Text(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "categories file missing, serving defaults");
            Ok(ResourceBody::Text(DEFAULT_CATEGORIES.to_string()))
        }
        Err(e) => Err(ToolError::Resource {
            uri: CATEGORIES_URI.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Run a ledger operation on the blocking pool.
async fn blocking<T, F>(tool: &'static str, op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| LedgerError::Task(e.to_string()))
        .and_then(|r| r)
        .map_err(|e| {
            tracing::warn!(tool = tool, error = %e, "ledger operation failed");
            e.into_tool_error(tool)
        })
}

fn json_output<T: Serialize>(tool: &str, value: &T) -> Result<ToolOutput, ToolError> {
    serde_json::to_value(value)
        .map(ToolOutput::json)
        .map_err(|e| ToolError::execution(tool, e.to_string()))
}

fn date_range(args: &Arguments) -> Result<(String, String), ToolError> {
    Ok((
        args.string("start_date")?.to_string(),
        args.string("end_date")?.to_string(),
    ))
}

/// The expense server: three tools and the categories resource.
pub fn registry(config: ExpensesConfig) -> Result<ServerRegistry, LedgerError> {
    let ledger = Ledger::open(&config.db_path)?;
    tracing::info!(db = %ledger.path().display(), "expense ledger opened");

    let add_ledger = ledger.clone();
    let add = ToolEntry::asynchronous(
        "add_expense",
        "Add a new expense to the database.",
        vec![
            ParamSpec::required("date", ParamType::String, "Date as YYYY-MM-DD"),
            ParamSpec::required("amount", ParamType::Number, "Amount spent"),
            ParamSpec::required("category", ParamType::String, "Expense category"),
            ParamSpec::optional("subcategory", ParamType::String, "", Some(Value::from(""))),
            ParamSpec::optional("description", ParamType::String, "", Some(Value::from(""))),
        ],
        move |args: Arguments| {
            let ledger = add_ledger.clone();
            async move {
                let expense = NewExpense {
                    date: args.string("date")?.to_string(),
                    amount: args.number("amount")?,
                    category: args.string("category")?.to_string(),
                    subcategory: args.opt_string("subcategory").unwrap_or_default().to_string(),
                    description: args.opt_string("description").unwrap_or_default().to_string(),
                };
                let id = blocking("add_expense", move || ledger.add(&expense)).await?;
                json_output("add_expense", &serde_json::json!({"status": "success", "id": id}))
            }
        },
    );

    let list_ledger = ledger.clone();
    let list = ToolEntry::asynchronous(
        "get_expenses",
        "Retrieve expenses within a date range.",
        vec![
            ParamSpec::required("start_date", ParamType::String, "First day, YYYY-MM-DD"),
            ParamSpec::required("end_date", ParamType::String, "Last day, YYYY-MM-DD"),
        ],
        move |args: Arguments| {
            let ledger = list_ledger.clone();
            async move {
                let (start, end) = date_range(&args)?;
                let expenses = blocking("get_expenses", move || ledger.list(&start, &end)).await?;
                json_output("get_expenses", &expenses)
            }
        },
    );

    let summarize = ToolEntry::asynchronous(
        "summarize_expenses",
        "Summarize expenses by category within a date range and optional category filter.",
        vec![
            ParamSpec::required("start_date", ParamType::String, "First day, YYYY-MM-DD"),
            ParamSpec::required("end_date", ParamType::String, "Last day, YYYY-MM-DD"),
            ParamSpec::optional("category", ParamType::String, "Only this category", None),
        ],
        move |args: Arguments| {
            let ledger = ledger.clone();
            async move {
                let (start, end) = date_range(&args)?;
                let category = args
                    .opt_string("category")
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
                let totals = blocking("summarize_expenses", move || {
                    ledger.summarize(&start, &end, category.as_deref())
                })
                .await?;
                json_output("summarize_expenses", &totals)
            }
        },
    );

    let categories_path = config.categories_path;
    let categories = ResourceEntry::new(
        CATEGORIES_URI,
        "categories",
        "application/json",
        "Expense categories and subcategories",
        move || load_categories(categories_path.as_deref()),
    );

    Ok(ServerRegistry::new("expenses")
        .with_tool(add)
        .with_tool(list)
        .with_tool(summarize)
        .with_resource(categories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_server::Dispatcher;
    use serde_json::json;
    use tempfile::TempDir;

    fn expense(date: &str, amount: f64, category: &str) -> NewExpense {
        NewExpense {
            date: date.into(),
            amount,
            category: category.into(),
            subcategory: String::new(),
            description: String::new(),
        }
    }

    fn seeded(dir: &TempDir) -> Ledger {
        let ledger = Ledger::open(dir.path().join("expenses.db")).unwrap();
        ledger.add(&expense("2025-01-03", 12.5, "food")).unwrap();
        ledger.add(&expense("2025-01-01", 40.0, "transport")).unwrap();
        ledger.add(&expense("2025-01-02", 7.5, "food")).unwrap();
        ledger.add(&expense("2025-02-01", 100.0, "housing")).unwrap();
        ledger
    }

    #[test]
    fn test_list_orders_by_date_within_range() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded(&dir);
        let dates: Vec<String> = ledger
            .list("2025-01-01", "2025-01-31")
            .unwrap()
            .into_iter()
            .map(|e| e.date)
            .collect();
        assert_eq!(dates, vec!["2025-01-01", "2025-01-02", "2025-01-03"]);
    }

    #[test]
    fn test_summarize_groups_and_sorts_by_total() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded(&dir);
        let totals = ledger.summarize("2025-01-01", "2025-01-31", None).unwrap();
        assert_eq!(
            totals,
            vec![
                CategoryTotal { category: "transport".into(), total: 40.0 },
                CategoryTotal { category: "food".into(), total: 20.0 },
            ]
        );

        let food = ledger.summarize("2025-01-01", "2025-12-31", Some("food")).unwrap();
        assert_eq!(food.len(), 1);
        assert_eq!(food[0].total, 20.0);
    }

    #[test]
    fn test_rejects_malformed_dates() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("expenses.db")).unwrap();
        assert!(matches!(
            ledger.add(&expense("01/02/2025", 1.0, "food")),
            Err(LedgerError::InvalidDate { .. })
        ));
        assert!(matches!(
            ledger.list("2025-01-01", "soon"),
            Err(LedgerError::InvalidDate { field, .. }) if field == "end_date"
        ));
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("expenses.db");
        Ledger::open(&path).unwrap().add(&expense("2025-03-01", 1.0, "other")).unwrap();
        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.list("2025-03-01", "2025-03-01").unwrap().len(), 1);
    }

    fn dispatcher(dir: &TempDir, categories_path: Option<PathBuf>) -> Dispatcher {
        let config = ExpensesConfig {
            db_path: dir.path().join("expenses.db"),
            categories_path,
        };
        Dispatcher::new(registry(config).unwrap())
    }

    #[tokio::test]
    async fn test_tools_through_dispatcher() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, None);

        let added = dispatcher
            .call_tool(Some(json!({
                "name": "add_expense",
                "arguments": {"date": "2025-04-01", "amount": 9.99, "category": "food"}
            })))
            .await
            .unwrap();
        assert_eq!(added["structuredContent"], json!({"status": "success", "id": 1}));

        let listed = dispatcher
            .call_tool(Some(json!({
                "name": "get_expenses",
                "arguments": {"start_date": "2025-04-01", "end_date": "2025-04-30"}
            })))
            .await
            .unwrap();
        let rows = &listed["structuredContent"];
        assert_eq!(rows[0]["category"], "food");
        assert_eq!(rows[0]["subcategory"], "");
    }

    #[tokio::test]
    async fn test_bad_date_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, None);
        let (code, message) = dispatcher
            .call_tool(Some(json!({
                "name": "get_expenses",
                "arguments": {"start_date": "yesterday", "end_date": "2025-04-30"}
            })))
            .await
            .unwrap_err();
        assert_eq!(code, -32602);
        assert!(message.contains("start_date"));
    }

    #[test]
    fn test_categories_file_and_default() {
        assert!(matches!(
            load_categories(None).unwrap(),
            ResourceBody::Text(t) if t.contains("groceries")
        ));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.json");
        assert!(matches!(
            load_categories(Some(&path)).unwrap(),
            ResourceBody::Text(t) if t.contains("groceries")
        ));

        std::fs::write(&path, r#"{"categories": ["custom"]}"#).unwrap();
        assert_eq!(
            load_categories(Some(&path)).unwrap(),
            ResourceBody::Text(r#"{"categories": ["custom"]}"#.into())
        );
    }

    #[test]
    fn test_default_categories_are_valid_json() {
        let parsed: Value = serde_json::from_str(DEFAULT_CATEGORIES).unwrap();
        assert!(parsed["categories"].as_array().is_some_and(|c| !c.is_empty()));
    }
}
