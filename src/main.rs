//! toolbridge: chat with a model over a merged catalog of MCP tool servers,
//! list that catalog, or serve one of the built-in tool servers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;

use toolbridge::agent_core::{run_chat, Agent, ReplExit};
use toolbridge::config::{find_config_path, load_config, AppConfig};
use toolbridge::inference::InferenceClient;
use toolbridge::mcp_client::MultiServerClient;
use toolbridge::servers::BuiltinServer;
use toolbridge::tool_server::{http::serve_http, stdio::serve_stdio, Dispatcher};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Multi-server MCP tool client and agent loop", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $TOOLBRIDGE_CONFIG, then toolbridge.yaml upward from cwd)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat using every configured backend
    Chat,
    /// Print the merged tool catalog
    Tools,
    /// Run a built-in tool server
    Serve {
        /// math, weather or expenses
        server: BuiltinServer,
        #[arg(long, value_enum, default_value_t = ServeTransport::Stdio)]
        transport: ServeTransport,
        /// Listen address for the http transport
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServeTransport {
    Stdio,
    Http,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat => {
            let log_path = toolbridge::init_chat_tracing();
            let config = load(cli.config)?;
            chat(config, log_path).await
        }
        Commands::Tools => {
            toolbridge::init_serve_tracing();
            let config = load(cli.config)?;
            list_tools(config).await
        }
        Commands::Serve {
            server,
            transport,
            bind,
        } => {
            toolbridge::init_serve_tracing();
            serve(server, transport, bind).await
        }
    }
}

fn load(explicit: Option<PathBuf>) -> Result<AppConfig> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let path = find_config_path(explicit.as_deref(), &cwd)?;
    let config = load_config(&path)?;
    config.require_backends()?;
    Ok(config)
}

async fn chat(config: AppConfig, log_path: Option<PathBuf>) -> Result<()> {
    let AppConfig {
        model,
        mut agent,
        client,
        backends,
    } = config;

    if let Some(prompt) = model.system_prompt.clone() {
        agent.system_prompt = prompt;
    }
    let policy = InferenceClient::from_config(model).context("cannot build model client")?;
    println!("Model: {} ({})", policy.model_name(), policy.base_url());

    let client = Arc::new(
        MultiServerClient::initialize(backends, client)
            .await
            .context("cannot start tool backends")?,
    );
    for failure in client.startup_failures() {
        eprintln!("warning: backend '{}' unavailable: {}", failure.backend, failure.error);
    }
    println!(
        "Connected to {} backend(s) with {} tool(s)",
        client.connected_backends().len(),
        client.get_tools().len()
    );
    if let Some(path) = log_path {
        println!("Logging to {}", path.display());
    }

    let agent = Agent::new(Arc::new(policy), client.clone(), agent);
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let exit = run_chat(
        agent,
        &client,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        interrupt,
    )
    .await?;

    tracing::info!(?exit, "exiting");
    if exit == ReplExit::Interrupted {
        std::process::exit(130);
    }
    Ok(())
}

async fn list_tools(config: AppConfig) -> Result<()> {
    let client = MultiServerClient::initialize(config.backends, config.client)
        .await
        .context("cannot start tool backends")?;
    let catalog = client.get_tools();

    for backend in client.configured_backends() {
        let mut tools: Vec<_> = catalog.handles().filter(|h| h.backend == backend).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        println!("{backend} ({} tools)", tools.len());
        for handle in tools {
            println!("  {:<24} {}", handle.name(), handle.descriptor.description);
        }
    }

    let mut resources: Vec<_> = catalog.resources().collect();
    if !resources.is_empty() {
        resources.sort_by(|a, b| a.descriptor.uri.cmp(&b.descriptor.uri));
        println!("resources");
        for resource in resources {
            println!(
                "  {:<24} [{}] {}",
                resource.descriptor.uri,
                resource.backend,
                resource.descriptor.mime_type.as_deref().unwrap_or("")
            );
        }
    }

    for failure in client.startup_failures() {
        println!("unavailable: {} ({})", failure.backend, failure.error);
    }

    for failure in client.shutdown().await {
        tracing::warn!(backend = %failure.backend, error = %failure.error, "backend did not close cleanly");
    }
    Ok(())
}

async fn serve(server: BuiltinServer, transport: ServeTransport, bind: SocketAddr) -> Result<()> {
    let registry = server
        .registry()
        .map_err(|e| anyhow::anyhow!("cannot start {server} server: {e}"))?;
    let dispatcher = Dispatcher::new(registry);

    match transport {
        ServeTransport::Stdio => serve_stdio(dispatcher).await?,
        ServeTransport::Http => {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            };
            serve_http(dispatcher, bind, shutdown).await?
        }
    }
    Ok(())
}
