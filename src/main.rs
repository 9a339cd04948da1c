use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portal_limiter::config::ServiceConfig;
use portal_limiter::http::{AdmissionService, HttpServer};
use portal_limiter::ratelimit::{Identifier, LimiterSet, Scope};

/// Sliding-window request admission for the customer portal and API.
#[derive(Debug, Parser)]
#[command(name = "portal-limiter", version)]
struct Cli {
    /// YAML configuration file; PORTAL_LIMITER_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP admission gateway
    Serve {
        /// Listen address, overriding the configured one
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Count one request for a subject and print the decision
    Limit(Target),
    /// Print a subject's current decision without counting a request
    Check(Target),
    /// Clear a subject's window
    Reset(Target),
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args)]
struct Target {
    /// Limiter to use (portal or api)
    #[arg(long, default_value = "portal")]
    scope: Scope,

    /// Customer id or other subject
    subject: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = ServiceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { addr } => serve(config, addr).await?,
        Command::Limit(target) => {
            let limiters = LimiterSet::from_config(&config);
            let identifier = Identifier::new(target.scope, &target.subject);
            let decision = limiters.get(target.scope).limit(identifier.as_str()).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Check(target) => {
            let limiters = LimiterSet::from_config(&config);
            let identifier = Identifier::new(target.scope, &target.subject);
            let decision = limiters.get(target.scope).check(identifier.as_str()).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Reset(target) => {
            let limiters = LimiterSet::from_config(&config);
            let identifier = Identifier::new(target.scope, &target.subject);
            limiters.get(target.scope).reset(identifier.as_str()).await;
            info!(identifier = %identifier, "Window reset requested");
        }
        Command::Config => print!("{}", config.to_yaml_redacted()?),
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

async fn serve(config: ServiceConfig, addr: Option<SocketAddr>) -> anyhow::Result<()> {
    info!("Starting Portal Limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let addr = addr.unwrap_or(config.server.http_addr);

    let limiters = Arc::new(LimiterSet::from_config(&config));
    info!(
        portal_requests = limiters.portal().config().requests(),
        api_requests = limiters.api().config().requests(),
        degraded = limiters.portal().is_degraded(),
        "Rate limiters initialized"
    );

    let service = AdmissionService::new(limiters, &config.server.customer_header)?;
    let server = HttpServer::bind(addr, service).await?;

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Portal Limiter stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
