//! natspool CLI - publish to NATS through a shared connector pool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use natspool_cli::config::{Config, ConnectorOverrides};
use natspool_cli::describe_config;
use natspool_cli::publish::{run_publish, PublishOptions};
use natspool_core::parse_duration;
use natspool_runtime::{BrokerTransport, ConnectorPool, MemoryTransport, NatsTransport};

#[derive(Parser)]
#[command(name = "natspool")]
#[command(author = "natspool Contributors")]
#[command(version)]
#[command(about = "Publish to NATS through a pooled, idle-evicting connection", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "NATSPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the config file; RUST_LOG wins over both)
    #[arg(long, global = true, env = "NATSPOOL_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ConnectorArgs {
    /// Broker URL
    #[arg(short, long)]
    url: Option<String>,

    /// Subject to publish on (repeatable; replaces the configured list)
    #[arg(short, long = "subject")]
    subjects: Vec<String>,

    /// Idle eviction window (e.g. 250ms, 2s, 1m)
    #[arg(long)]
    idle_timeout: Option<String>,

    /// Durable group; publishes through JetStream and waits for acks
    #[arg(long)]
    durable_group: Option<String>,

    /// Connection name prefix
    #[arg(long)]
    connection_name: Option<String>,
}

impl From<ConnectorArgs> for ConnectorOverrides {
    fn from(args: ConnectorArgs) -> Self {
        Self {
            url: args.url,
            subjects: args.subjects,
            idle_timeout: args.idle_timeout,
            durable_group: args.durable_group,
            connection_name: args.connection_name,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Publish messages from concurrent producers sharing one pool
    Publish {
        #[command(flatten)]
        connector: ConnectorArgs,

        /// Message to publish (repeatable); reads lines from stdin when omitted
        #[arg(short, long = "message")]
        messages: Vec<String>,

        /// Number of concurrent producers
        #[arg(short = 'n', long, default_value = "1")]
        producers: usize,

        /// Times each producer repeats the message list
        #[arg(long, default_value = "1")]
        repeat: usize,

        /// Pause between messages of one producer (e.g. 500ms)
        #[arg(long)]
        interval: Option<String>,

        /// Suffix appended to every subject
        #[arg(long)]
        suffix: Option<String>,

        /// Keep the pool open this long after publishing (watch idle eviction)
        #[arg(long)]
        linger: Option<String>,

        /// Print messages instead of sending them to a broker
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the resolved connector configuration and its fingerprint
    Inspect {
        #[command(flatten)]
        connector: ConnectorArgs,
    },

    /// Generate an example configuration file
    ExampleConfig {
        /// Output format (yaml or toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_optional_duration(raw: Option<&str>, what: &str) -> Result<Option<std::time::Duration>> {
    raw.map(|r| parse_duration(r).map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", what, r, e)))
        .transpose()
}

fn read_stdin_lines() -> Result<Vec<String>> {
    let stdin = std::io::stdin();
    let mut lines = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level);

    match cli.command {
        Commands::Publish {
            connector,
            messages,
            producers,
            repeat,
            interval,
            suffix,
            linger,
            dry_run,
        } => {
            config.merge(connector.into());
            let connector_config = config.connector_config()?;

            let messages = if messages.is_empty() {
                read_stdin_lines()?
            } else {
                messages
            };
            if messages.is_empty() {
                anyhow::bail!("Nothing to publish: pass --message or pipe lines on stdin");
            }

            let options = PublishOptions {
                producers: producers.max(1),
                messages,
                repeat: repeat.max(1),
                interval: parse_optional_duration(interval.as_deref(), "--interval")?,
                subject_suffix: suffix,
            };
            let linger = parse_optional_duration(linger.as_deref(), "--linger")?;

            let transport: Arc<dyn BrokerTransport> = if dry_run {
                Arc::new(MemoryTransport::new().echo())
            } else {
                Arc::new(NatsTransport::new())
            };
            let pool = ConnectorPool::new("natspool", transport);

            let result = tokio::select! {
                result = run_publish(&pool, &connector_config, &options) => {
                    result.map_err(anyhow::Error::from)
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, shutting down");
                    Err(anyhow::anyhow!("interrupted"))
                }
            };

            if let (Ok(_), Some(linger)) = (&result, linger) {
                info!("Lingering for {:?} with {} live connectors", linger, pool.size());
                tokio::time::sleep(linger).await;
            }

            for report in pool.health_reports() {
                info!(
                    "Connector {} ({}): {} published, {} failed, state {}",
                    report.id,
                    report.connection_name,
                    report.messages_published,
                    report.publish_failures,
                    report.state
                );
            }
            pool.shutdown().await;

            let summary = result?;
            println!(
                "Published {} messages ({} failed, {} reconnects)",
                summary.published, summary.failed, summary.reacquired
            );
            if summary.failed > 0 {
                anyhow::bail!("{} messages could not be published", summary.failed);
            }
        }

        Commands::Inspect { connector } => {
            config.merge(connector.into());
            let connector_config = config.connector_config()?;
            println!("{}", describe_config(&connector_config));
        }

        Commands::ExampleConfig { format, output } => {
            let content = match format.to_lowercase().as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }
    }

    Ok(())
}
