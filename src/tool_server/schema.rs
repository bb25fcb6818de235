//! Argument validation against declared parameters.

use serde_json::{Map, Value};

use super::errors::ToolError;
use super::registry::{Arguments, ParamSpec, ParamType};

/// Check `raw` against `params` and apply defaults.
///
/// Missing or `null` arguments are treated as an empty object. Fields not
/// declared by the tool are passed through untouched.
pub fn validate(tool: &str, params: &[ParamSpec], raw: Option<&Value>) -> Result<Arguments, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    let mut values: Map<String, Value> = match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(invalid(format!(
                "arguments must be an object, got {}",
                json_type(other)
            )))
        }
    };

    for param in params {
        match values.get(&param.name) {
            Some(value) if !value.is_null() => {
                if !type_matches(param.ty, value) {
                    return Err(invalid(format!(
                        "field '{}' must be {}, got {}",
                        param.name,
                        param.ty.as_str(),
                        json_type(value)
                    )));
                }
            }
            _ if param.required => {
                return Err(invalid(format!("missing required field '{}'", param.name)));
            }
            _ => {
                if let Some(default) = &param.default {
                    values.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Arguments::new(tool, values))
}

fn type_matches(ty: ParamType, value: &Value) -> bool {
    match ty {
        ParamType::Number => value.is_number(),
        ParamType::Integer => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        ParamType::String => value.is_string(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("a", ParamType::Number, ""),
            ParamSpec::required("b", ParamType::Number, ""),
            ParamSpec::optional("note", ParamType::String, "", Some(json!(""))),
            ParamSpec::optional("category", ParamType::String, "", None),
        ]
    }

    #[test]
    fn test_integers_accepted_for_numbers() {
        let args = validate("add", &params(), Some(&json!({"a": 2, "b": 3.5}))).unwrap();
        assert_eq!(args.number("a").unwrap(), 2.0);
        assert_eq!(args.number("b").unwrap(), 3.5);
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate("add", &params(), Some(&json!({"a": 2}))).unwrap_err();
        assert!(err.to_string().contains("missing required field 'b'"));
    }

    #[test]
    fn test_null_required_field_is_missing() {
        let err = validate("add", &params(), Some(&json!({"a": 2, "b": null}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = validate("add", &params(), Some(&json!({"a": "two", "b": 3}))).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'a' must be number"), "{text}");
        assert!(text.contains("got string"), "{text}");
    }

    #[test]
    fn test_defaults_applied_only_when_declared() {
        let args = validate("add", &params(), Some(&json!({"a": 1, "b": 2}))).unwrap();
        assert_eq!(args.opt_string("note"), Some(""));
        assert!(args.get("category").is_none());
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = validate("add", &params(), Some(&json!([1, 2]))).unwrap_err();
        assert!(err.to_string().contains("got array"));
    }

    #[test]
    fn test_absent_arguments_for_parameterless_tool() {
        assert!(validate("ping", &[], None).is_ok());
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let specs = vec![ParamSpec::required("n", ParamType::Integer, "")];
        assert!(validate("t", &specs, Some(&json!({"n": 4.0}))).is_ok());
        assert!(validate("t", &specs, Some(&json!({"n": 4.5}))).is_err());
    }
}
