mod common;
mod events;
mod publish;
mod scenario_common;
mod scenarios;

use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};
use transat::{ConfirmOrder, PublisherConfig};

#[derive(Parser)]
#[command(name = "transat-stress", about = "Stress and scenario runner for the Transat publisher")]
struct Cli {
    /// Delay between write attempts in ms (overrides TRANSAT_RETRY_INTERVAL_MS).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Write budget per backend per message (overrides TRANSAT_MAX_ATTEMPTS).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Retry forever (no budget, no deadline).
    #[arg(long, conflicts_with_all = ["max_attempts", "deadline_ms"])]
    unbounded: bool,

    /// Time budget per backend per message in ms (overrides TRANSAT_DEADLINE_MS).
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Confirm both backends at the same time instead of one after the other.
    #[arg(long)]
    concurrent_backends: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish a numbered stream to two lossy backends and verify both.
    Publish {
        /// Number of messages (sent as 1..=N).
        #[arg(long, default_value = "100")]
        messages: u32,
        /// Probability that a single write is dropped.
        #[arg(long, default_value = "0.3")]
        drop_rate: f64,
        /// RNG seed for the drop pattern.
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Concurrent tasks sharing the publisher.
        #[arg(long, default_value = "1")]
        workers: u32,
    },

    /// Run the canned delivery scenarios and report pass/fail.
    Scenarios,
}

impl Cli {
    /// Environment overrides first, then command-line flags on top.
    fn publisher_config(&self) -> anyhow::Result<PublisherConfig> {
        let mut config = PublisherConfig::from_env()?;

        if let Some(ms) = self.interval_ms {
            config = config.retry_interval(Duration::from_millis(ms));
        }
        if let Some(n) = self.max_attempts {
            config = config.max_attempts(n);
        }
        if let Some(ms) = self.deadline_ms {
            config = config.deadline(Duration::from_millis(ms));
        }
        if self.unbounded {
            config = config.unbounded();
        }
        if self.concurrent_backends {
            config = config.confirm_order(ConfirmOrder::Concurrent);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();
    let config = cli.publisher_config()?;

    eprintln!("transat-stress v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();

    match cli.command {
        Command::Publish {
            messages,
            drop_rate,
            seed,
            workers,
        } => {
            publish::run(
                publish::PublishConfig {
                    messages,
                    drop_rate,
                    seed,
                    workers,
                },
                config,
                start,
            )
            .await?;
        }

        Command::Scenarios => {
            if !scenarios::run(config).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
