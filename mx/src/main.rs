//! Modelmux CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use modelmux::handlers::HandlerRegistry;
use modelmux::server;
use overseer::config::RoutingConfig;
use overseer::state::OssPaths;

/// Model-routing proxy for a canonical message format
#[derive(Debug, Parser)]
#[command(name = "mx", version, about)]
struct Cli {
    /// Listen port
    #[arg(long, default_value_t = server::DEFAULT_PORT)]
    port: u16,

    /// Project root whose `.oss/config.json` participates in routing
    #[arg(long)]
    project: Option<PathBuf>,

    /// Log level override (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.as_deref().unwrap_or("INFO");
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let project = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let config = RoutingConfig::load(&OssPaths::new(&project));
    info!(default = ?config.default, "Routing config loaded");

    let registry = Arc::new(HandlerRegistry::from_config(&config));
    server::serve(cli.port, registry).await
}
