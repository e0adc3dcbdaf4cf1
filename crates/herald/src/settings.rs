//! Runtime settings assembled from CLI arguments and `HERALD_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;
use herald_platforms::{AdapterConfig, ClientCredentials, PlatformEndpoints};
use herald_scheduler::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_SIZE, DEFAULT_WORKER_COUNT, PipelineConfig,
};
use herald_store::{Platform, RetryPolicy};
use miette::{Result, miette};

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database path (defaults to the platform data directory)
    #[arg(long, env = "HERALD_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Seconds between sweeps
    #[arg(long, env = "HERALD_SWEEP_INTERVAL", default_value = "60", global = true)]
    pub sweep_interval: u64,

    /// Schedules claimed per sweep
    #[arg(long, env = "HERALD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE, global = true)]
    pub batch_size: usize,

    /// Concurrent publish workers
    #[arg(long, env = "HERALD_WORKERS", default_value_t = DEFAULT_WORKER_COUNT, global = true)]
    pub workers: usize,

    /// Maximum retries after the first attempt
    #[arg(long, env = "HERALD_MAX_RETRIES", default_value = "3", global = true)]
    pub max_retries: u32,

    /// Retry delays in seconds, comma-separated
    #[arg(
        long,
        env = "HERALD_BACKOFF",
        value_delimiter = ',',
        default_value = "30,60,120",
        global = true
    )]
    pub backoff: Vec<u64>,

    /// Refresh tokens expiring within this many minutes
    #[arg(long, env = "HERALD_TOKEN_LOOKAHEAD_MINS", default_value = "60", global = true)]
    pub token_lookahead_mins: u64,

    /// Treat a claim as stuck after this many minutes in processing
    #[arg(long, env = "HERALD_STUCK_AFTER_MINS", default_value = "60", global = true)]
    pub stuck_after_mins: u64,

    /// Seconds between checks for stuck claims
    #[arg(long, env = "HERALD_RECOVERY_INTERVAL", default_value = "300", global = true)]
    pub recovery_interval: u64,

    /// Seconds between background token checks in daemon mode
    #[arg(long, env = "HERALD_TOKEN_CHECK_INTERVAL", default_value = "3600", global = true)]
    pub token_check_interval: u64,

    /// Point every platform API at one base URL (for staging and mocks)
    #[arg(long, env = "HERALD_API_BASE", global = true)]
    pub api_base: Option<String>,
}

impl GlobalArgs {
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db {
            return Ok(path.clone());
        }
        let dir = dirs::data_dir()
            .ok_or_else(|| miette!("no data directory found; pass --db or set HERALD_DB"))?
            .join("herald");
        std::fs::create_dir_all(&dir)
            .map_err(|e| miette!("failed to create {}: {}", dir.display(), e))?;
        Ok(dir.join("herald.db"))
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if self.backoff.is_empty() {
            return Err(miette!("backoff needs at least one delay"));
        }
        let config = PipelineConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval),
            batch_size: self.batch_size,
            worker_count: self.workers,
            queue_size: DEFAULT_QUEUE_SIZE.max(self.batch_size),
            token_lookahead: Duration::from_secs(self.token_lookahead_mins * 60),
            retry: RetryPolicy::from_secs(self.max_retries, &self.backoff),
            stuck_after: Duration::from_secs(self.stuck_after_mins * 60),
            recovery_interval: Duration::from_secs(self.recovery_interval),
            token_check_interval: Duration::from_secs(self.token_check_interval),
        };
        config.validate().map_err(|e| miette!("{}", e))?;
        Ok(config)
    }

    /// Adapter settings. Client credentials come from
    /// `HERALD_<PLATFORM>_CLIENT_ID` and `HERALD_<PLATFORM>_CLIENT_SECRET`.
    pub fn adapter_config(&self) -> AdapterConfig {
        let mut config = AdapterConfig::default();
        if let Some(base) = &self.api_base {
            config.endpoints = PlatformEndpoints::uniform(base.trim_end_matches('/'));
        }
        for platform in Platform::ALL {
            *config.credentials.get_mut(platform) = credentials_from_env(platform, |key| {
                std::env::var(key).ok()
            });
        }
        config
    }
}

fn credentials_from_env(
    platform: Platform,
    lookup: impl Fn(&str) -> Option<String>,
) -> ClientCredentials {
    let prefix = format!("HERALD_{}", platform.as_str().to_uppercase());
    ClientCredentials::new(
        lookup(&format!("{prefix}_CLIENT_ID")).unwrap_or_default(),
        lookup(&format!("{prefix}_CLIENT_SECRET")).unwrap_or_default(),
    )
}

pub fn parse_platform(s: &str) -> Result<Platform, String> {
    s.parse().map_err(|e| format!("{}", e))
}

pub fn parse_due(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", s, e))
}
