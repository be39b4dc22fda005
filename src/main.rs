use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::{Backends, ClientKey};

/// Per-client admission gate backed by a distributed lock and a windowed counter.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file; TURNSTILE__* environment variables override it
    #[arg(short, long, global = true)]
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
    /// Run admissions for a client and print one JSON report per admission
    Admit {
        /// Client identifier
        #[arg(long)]
        id: String,

        /// Number of concurrent admissions to run
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print the current counter state for a client as JSON
    Status {
        /// Client identifier
        #[arg(long)]
        id: String,
    },
    /// Print the effective configuration as YAML
    Config,
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    client_key: &'a str,
    count: u64,
    threshold: u64,
    exceeded: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = TurnstileConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.backend.kind,
        threshold = config.rate_limit.threshold,
        window_ms = config.rate_limit.window_ms,
        "Configuration loaded"
    );

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Status { id } => {
            let key = ClientKey::new(id)?;
            let backends = Backends::from_config(&config).await?;
            let count = backends.counters.current_count(key.as_str()).await?;
            let policy = backends.counters.policy();
            let report = StatusReport {
                client_key: key.as_str(),
                count,
                threshold: policy.threshold,
                exceeded: policy.is_exceeded(count),
            };
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Admit { id, count } => {
            let key = ClientKey::new(id)?;
            let backends = Backends::from_config(&config).await?;
            let gate = Arc::new(backends.gate(&config));

            let tasks: Vec<_> = (0..count)
                .map(|_| {
                    let gate = gate.clone();
                    let key = key.clone();
                    tokio::spawn(async move { gate.admit_with_report(&key).await })
                })
                .collect();
            let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();

            tokio::select! {
                results = futures::future::join_all(tasks) => {
                    for result in results {
                        let admission = result.context("admission task panicked")??;
                        println!("{}", serde_json::to_string(&admission)?);
                    }
                }
                _ = shutdown_signal() => {
                    // Aborted admissions release their locks from the guard's drop
                    for abort in aborts {
                        abort.abort();
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    anyhow::bail!("interrupted with admissions in flight");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, aborting admissions");
        }
        _ = terminate => {
            info!("Received SIGTERM, aborting admissions");
        }
    }
}
