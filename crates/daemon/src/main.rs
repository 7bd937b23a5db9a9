//! Warden Daemon - flow engine server
//!
//! Reads agent messages as JSON lines on stdin, writes client requests as
//! JSON lines on stdout, and logs to stderr.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_daemon::{DaemonConfig, DaemonResult, Server};

/// Warden Daemon CLI
#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden Daemon - flow engine and enrolment server", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Flow journal path (overrides the configuration file)
    #[arg(long, env = "WARDEN_JOURNAL")]
    journal: Option<std::path::PathBuf>,

    /// CA key seed path (overrides the configuration file)
    #[arg(long, env = "WARDEN_CA_KEY")]
    ca_key: Option<std::path::PathBuf>,

    /// Log level
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(journal) = cli.journal {
        config.persistence.journal_path = Some(journal);
    }
    if let Some(ca_key) = cli.ca_key {
        config.enrollment.ca_key_path = Some(ca_key);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing; stdout carries the transport
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let server = Server::new(config)?;
    server.run().await
}
