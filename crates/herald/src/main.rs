//! Herald: scheduled publishing to social platforms
//!
//! Main binary with subcommands:
//! - `daemon`: Sweep for due schedules and publish until Ctrl-C
//! - `process-due`, `requeue`: Manual triggers for operators
//! - `schedule`, `cancel`, `disconnect`: Inbound pipeline operations
//! - `check-tokens`, `account`, `upcoming`, `audit`, `prune-audit`: Inspection and upkeep

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use herald_platforms::AdapterRegistry;
use herald_scheduler::Pipeline;
use herald_store::{Platform, Severity, Store};
use miette::{IntoDiagnostic, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod ops;
mod settings;

use settings::{GlobalArgs, parse_due, parse_platform};

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Scheduled publishing to social platforms", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweeper and publish workers until Ctrl-C
    Daemon,

    /// Run one sweep now and wait for its publish attempts
    ProcessDue,

    /// Give a failed schedule's item a fresh schedule
    Requeue {
        /// Failed schedule id
        schedule_id: i64,
    },

    /// Schedule a content item for publishing
    Schedule {
        /// Content item id
        item_id: i64,

        /// Due time, RFC 3339 (e.g. 2026-05-01T09:30:00Z)
        #[arg(value_parser = parse_due)]
        due: DateTime<Utc>,
    },

    /// Cancel a pending schedule
    Cancel {
        /// Schedule id
        schedule_id: i64,
    },

    /// Remove a platform account and cancel its pending schedules
    Disconnect {
        /// Platform account id
        account_id: i64,
    },

    /// Refresh every token that is close to expiry
    CheckTokens,

    /// Show a connected account's profile from its platform
    Account {
        /// Platform account id
        account_id: i64,
    },

    /// List an owner's upcoming schedules
    Upcoming {
        /// Owner id
        owner_id: i64,

        /// Only this platform
        #[arg(long, value_parser = parse_platform)]
        platform: Option<Platform>,

        /// Maximum schedules to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List audit events, newest first
    Audit {
        /// Only events for this owner
        #[arg(long)]
        owner: Option<i64>,

        /// Only events for this content item
        #[arg(long)]
        item: Option<i64>,

        /// Only events of this severity (info, success, warning, error)
        #[arg(long)]
        severity: Option<Severity>,

        /// Maximum events to list
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Delete audit events older than a number of days
    PruneAudit {
        /// Age in days
        #[arg(long)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "herald=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let db_path = cli.global.db_path()?;
    let config = cli.global.pipeline_config()?;
    let store = Arc::new(Store::open(&db_path).into_diagnostic()?);
    let registry = AdapterRegistry::from_config(&cli.global.adapter_config()).into_diagnostic()?;
    info!(db = %db_path.display(), "opened herald database");

    let pipeline = Pipeline::new(store, registry, config).into_diagnostic()?;

    let result = match cli.command {
        Commands::Daemon => return daemon::run(pipeline).await,
        Commands::ProcessDue => ops::process_due(&pipeline).await,
        Commands::Requeue { schedule_id } => ops::requeue(&pipeline, schedule_id),
        Commands::Schedule { item_id, due } => ops::schedule(&pipeline, item_id, due),
        Commands::Cancel { schedule_id } => ops::cancel(&pipeline, schedule_id),
        Commands::Disconnect { account_id } => ops::disconnect(&pipeline, account_id),
        Commands::CheckTokens => ops::check_tokens(&pipeline).await,
        Commands::Account { account_id } => ops::account(&pipeline, account_id).await,
        Commands::Upcoming {
            owner_id,
            platform,
            limit,
        } => ops::upcoming(&pipeline, owner_id, platform, limit),
        Commands::Audit {
            owner,
            item,
            severity,
            limit,
        } => ops::audit(&pipeline, owner, item, severity, limit),
        Commands::PruneAudit { days } => ops::prune_audit(&pipeline, days),
    };

    pipeline.shutdown().await;
    result
}
