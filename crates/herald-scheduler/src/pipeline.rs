//! The publish pipeline: wires store, adapters, sweeper and executor together
//! and exposes the inbound and operational entry points.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_platforms::{AdapterRegistry, ProfileInfo, TokenManager};
use herald_store::{AuditEntry, Platform, Schedule, Store};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    AuditSink, Executor, ExecutorContext, PipelineConfig, SchedulerError, StatusEvent,
    StoreAuditSink, SweepReport, Sweeper, events::STATUS_CHANNEL_CAPACITY,
};

/// Result of checking every connected account's token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenReport {
    pub refreshed: usize,
    pub unchanged: usize,
    /// Account id and reason for each account whose token could not be made valid.
    pub failed: Vec<(i64, String)>,
}

/// Owns the sweeper and the worker pool. Construct once at startup and pass
/// by reference.
pub struct Pipeline {
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    tokens: Arc<TokenManager>,
    audit: Arc<dyn AuditSink>,
    events: broadcast::Sender<StatusEvent>,
    sweeper: Sweeper,
    executor: Executor,
    token_check_interval: Duration,
}

impl Pipeline {
    /// Build the pipeline with audit events written to `store`.
    ///
    /// Spawns the publish workers, so this must run inside a tokio runtime.
    pub fn new(
        store: Arc<Store>,
        registry: AdapterRegistry,
        config: PipelineConfig,
    ) -> Result<Self, SchedulerError> {
        let audit = Arc::new(StoreAuditSink::new(Arc::clone(&store)));
        Self::with_audit(store, registry, config, audit)
    }

    pub fn with_audit(
        store: Arc<Store>,
        registry: AdapterRegistry,
        config: PipelineConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let registry = Arc::new(registry);
        let tokens = Arc::new(TokenManager::with_lookahead(
            Arc::clone(&store),
            config.token_lookahead,
        ));
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let ctx = Arc::new(ExecutorContext::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&tokens),
            Arc::clone(&audit),
            config.retry.clone(),
            events.clone(),
        ));
        let executor = Executor::spawn(ctx, config.worker_count, config.queue_size);
        let sweeper = Sweeper::new(
            Arc::clone(&store),
            executor.handle(),
            Arc::clone(&audit),
            &config,
        );

        info!(
            workers = config.worker_count,
            batch_size = config.batch_size,
            max_retries = config.retry.max_retries,
            platforms = registry.platforms().len(),
            "publish pipeline ready"
        );

        Ok(Self {
            store,
            registry,
            tokens,
            audit,
            events,
            sweeper,
            executor,
            token_check_interval: config.token_check_interval,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Status events for published and terminally failed items.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Create a pending schedule for a content item.
    ///
    /// Fails if the item already has an active schedule, is already published,
    /// or targets a platform with no registered adapter.
    #[tracing::instrument(skip(self))]
    pub fn schedule_content_item(
        &self,
        item_id: i64,
        due_at: DateTime<Utc>,
    ) -> Result<Schedule, SchedulerError> {
        let result = self.try_schedule(item_id, due_at);
        match &result {
            Ok(schedule) => self.audit.record(self.for_item(
                AuditEntry::info(format!("Scheduled for {}", due_at.to_rfc3339()))
                    .with_context(json!({ "schedule_id": schedule.id, "due_at": due_at })),
                item_id,
            )),
            Err(e) => self.record_rejection(
                "schedule content item",
                e,
                json!({ "due_at": due_at }),
                Some(item_id),
            ),
        }
        result
    }

    fn try_schedule(&self, item_id: i64, due_at: DateTime<Utc>) -> Result<Schedule, SchedulerError> {
        let item = self.store.get_content_item(item_id)?;
        self.registry.get(item.platform)?;
        Ok(self.store.create_schedule(item_id, due_at, Utc::now())?)
    }

    /// Cancel a pending schedule. Schedules already `processing` are left to
    /// finish their attempt.
    #[tracing::instrument(skip(self))]
    pub fn cancel_schedule(&self, schedule_id: i64) -> Result<Schedule, SchedulerError> {
        match self.store.cancel_schedule(schedule_id, Utc::now()) {
            Ok(schedule) => {
                self.audit.record(self.for_item(
                    AuditEntry::info("Schedule cancelled")
                        .with_context(json!({ "schedule_id": schedule_id })),
                    schedule.content_item_id,
                ));
                Ok(schedule)
            }
            Err(e) => {
                self.record_rejection(
                    "cancel schedule",
                    &e,
                    json!({ "schedule_id": schedule_id }),
                    None,
                );
                Err(e.into())
            }
        }
    }

    /// Put a failed schedule's item back in the queue as a fresh schedule.
    #[tracing::instrument(skip(self))]
    pub fn requeue_failed(&self, schedule_id: i64) -> Result<Schedule, SchedulerError> {
        match self.store.requeue_failed(schedule_id, Utc::now()) {
            Ok(schedule) => {
                self.audit.record(self.for_item(
                    AuditEntry::info("Failed schedule requeued")
                        .with_context(json!({
                            "failed_schedule_id": schedule_id,
                            "schedule_id": schedule.id,
                        })),
                    schedule.content_item_id,
                ));
                Ok(schedule)
            }
            Err(e) => {
                self.record_rejection(
                    "requeue schedule",
                    &e,
                    json!({ "schedule_id": schedule_id }),
                    None,
                );
                Err(e.into())
            }
        }
    }

    /// Remove a platform account and cancel the owner's pending schedules on
    /// that platform.
    #[tracing::instrument(skip(self))]
    pub fn disconnect_account(&self, account_id: i64) -> Result<Vec<Schedule>, SchedulerError> {
        let disconnected = self.store.get_account(account_id).and_then(|account| {
            let cancelled = self.store.disconnect_account(account_id, Utc::now())?;
            Ok((account, cancelled))
        });
        let (account, cancelled) = match disconnected {
            Ok(done) => done,
            Err(e) => {
                self.record_rejection(
                    "disconnect account",
                    &e,
                    json!({ "account_id": account_id }),
                    None,
                );
                return Err(e.into());
            }
        };

        let ids: Vec<i64> = cancelled.iter().map(|s| s.id).collect();
        self.audit.record(
            AuditEntry::warning(format!("{} account disconnected", account.platform))
                .with_context(json!({
                    "account_id": account_id,
                    "platform": account.platform,
                    "username": account.username,
                    "cancelled_schedules": ids,
                }))
                .with_owner(account.owner_id),
        );
        Ok(cancelled)
    }

    /// Return schedules stuck in `processing` past the configured age to
    /// `pending`. Younger claims may belong to a live attempt and are kept.
    pub fn recover_interrupted(&self) -> Result<usize, SchedulerError> {
        self.sweeper.recover_stuck()
    }

    /// Run one sweep now and wait for its attempts. Skipped if a sweep is
    /// already in progress.
    pub async fn process_due_now(&self) -> Result<SweepReport, SchedulerError> {
        self.sweeper.sweep_tracked().await
    }

    /// Make sure every connected account's token is outside the refresh window.
    pub async fn check_tokens(&self) -> Result<TokenReport, SchedulerError> {
        let mut report = TokenReport::default();

        for account in self.store.list_accounts()? {
            let result = match self.registry.get(account.platform) {
                Ok(adapter) => self.tokens.ensure_valid(adapter.as_ref(), &account).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(check) if check.was_refreshed() => {
                    report.refreshed += 1;
                    self.audit.record(
                        AuditEntry::success(format!("{} token refreshed", account.platform))
                            .with_context(json!({
                                "account_id": account.id,
                                "expires_at": check.account().token_expires_at,
                            }))
                            .with_owner(account.owner_id),
                    );
                }
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    self.audit.record(
                        AuditEntry::error(format!("{} token refresh failed", account.platform))
                            .with_context(json!({
                                "account_id": account.id,
                                "error": e.to_string(),
                                "class": e.failure_class().as_str(),
                            }))
                            .with_owner(account.owner_id),
                    );
                    report.failed.push((account.id, e.user_message()));
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "token check finished"
        );
        Ok(report)
    }

    /// Profile summary for an account, straight from its platform.
    pub async fn account_details(&self, account_id: i64) -> Result<ProfileInfo, SchedulerError> {
        let account = self.store.get_account(account_id)?;
        let adapter = self.registry.get(account.platform)?;
        Ok(adapter.account_details(&account).await?)
    }

    /// Pending schedules for an owner that are still in the future.
    pub fn upcoming(
        &self,
        owner_id: i64,
        platform: Option<Platform>,
        limit: usize,
    ) -> Result<Vec<Schedule>, SchedulerError> {
        Ok(self
            .store
            .list_upcoming(owner_id, platform, Utc::now(), limit)?)
    }

    /// Sweep on the configured interval and check tokens in the background
    /// until shutdown is signalled.
    pub async fn run(&self, shutdown_rx: watch::Receiver<bool>) {
        tokio::join!(
            self.sweeper.run(shutdown_rx.clone()),
            self.check_tokens_periodically(shutdown_rx),
        );
    }

    async fn check_tokens_periodically(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.token_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_tokens().await {
                        error!(error = %e, "background token check failed");
                    }
                }
            }
        }
    }

    /// Stop accepting work and wait for queued attempts to finish.
    pub async fn shutdown(self) {
        let Pipeline {
            sweeper, executor, ..
        } = self;
        // The sweeper holds a queue handle; workers stop once it is gone
        drop(sweeper);
        executor.shutdown().await;
    }

    fn record_rejection(
        &self,
        action: &str,
        err: &impl Display,
        mut context: Value,
        item_id: Option<i64>,
    ) {
        warn!(action, error = %err, "pipeline operation rejected");
        context["error"] = json!(err.to_string());
        let mut entry = AuditEntry::warning(format!("Could not {}", action)).with_context(context);
        if let Some(item_id) = item_id {
            entry = self.for_item(entry, item_id);
        }
        self.audit.record(entry);
    }

    /// Tag an entry with an item and, if the item can still be read, its owner.
    fn for_item(&self, entry: AuditEntry, item_id: i64) -> AuditEntry {
        let entry = entry.with_item(item_id);
        match self.store.get_content_item(item_id) {
            Ok(item) => entry.with_owner(item.owner_id),
            Err(_) => entry,
        }
    }
}
