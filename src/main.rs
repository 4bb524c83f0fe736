use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use egressguard::config::AppConfig;
use egressguard::queue::TaskQueue;
use egressguard::storage::{self, EventStore};

#[derive(Parser)]
#[command(
    name = "egressguard",
    about = "Egress anomaly detection and remediation for the research workbench",
    version,
    long_about = None
)]
struct Cli {
    /// Config file path (overrides EGRESSGUARD_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingest API + remediation worker)
    Serve {
        /// Bind address override
        #[arg(long)]
        bind: Option<String>,

        /// Database path override
        #[arg(long)]
        db: Option<String>,
    },

    /// Load the config, validate the escalation policy, and print the
    /// effective snapshot
    CheckConfig,

    /// Re-enqueue remediation for a pending event whose task was abandoned
    Reprocess {
        /// Event id
        event_id: Uuid,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            if let Some(db) = db {
                cfg.database.path = db;
            }
            tracing::info!(bind = %cfg.server.bind, "starting egressguard daemon");
            egressguard::serve(cfg).await?;
        }
        Commands::CheckConfig => {
            let policy = cfg.escalation_policy();
            if cfg.policy.escalations.is_empty() {
                println!("WARNING: no escalation tiers configured; remediation is disabled");
            } else if policy.is_empty() {
                println!("ERROR: escalation policy rejected (non-monotonic thresholds)");
            } else {
                println!("escalation policy OK ({} tiers)", cfg.policy.escalations.len());
            }
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        Commands::Reprocess { event_id } => {
            let pool = storage::open_pool(&cfg.database.path)?;
            let store = EventStore::new(pool.clone());
            let queue = TaskQueue::new(pool);

            let Some(event) = store.find_by_id(event_id)? else {
                bail!("event {event_id} not found");
            };
            if event.status.is_terminal() {
                bail!("event {event_id} is {}, nothing to reprocess", event.status);
            }
            queue.enqueue(event_id)?;
            println!("event {event_id} re-enqueued for remediation");
        }
    }

    Ok(())
}
