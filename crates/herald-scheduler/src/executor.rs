//! Publish executor: a bounded worker pool that runs one attempt per claimed
//! schedule and records the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_platforms::{AdapterRegistry, FailureClass, PlatformError, TokenManager};
use herald_store::{
    AuditEntry, ContentItem, ContentStatus, PublishReceipt, RetryDecision, RetryPolicy, Schedule,
    Store, StoreError,
};
use serde_json::json;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{AuditSink, SchedulerError, StatusEvent};

/// How a single publish attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Published; the schedule is `completed`.
    Published {
        schedule_id: i64,
        receipt: PublishReceipt,
    },
    /// Retryable failure; the schedule is `pending` again.
    Retrying {
        schedule_id: i64,
        retry_count: u32,
        delay: Duration,
        reason: String,
    },
    /// Terminal failure; the schedule is `failed`.
    Failed {
        schedule_id: i64,
        class: FailureClass,
        reason: String,
    },
    /// The outcome could not be recorded. The schedule is left as it was.
    Aborted { schedule_id: i64, error: String },
}

impl AttemptOutcome {
    pub fn schedule_id(&self) -> i64 {
        match self {
            AttemptOutcome::Published { schedule_id, .. }
            | AttemptOutcome::Retrying { schedule_id, .. }
            | AttemptOutcome::Failed { schedule_id, .. }
            | AttemptOutcome::Aborted { schedule_id, .. } => *schedule_id,
        }
    }
}

/// Everything a worker needs to run an attempt. Shared by all workers.
pub struct ExecutorContext {
    pub(crate) store: Arc<Store>,
    pub(crate) registry: Arc<AdapterRegistry>,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) policy: RetryPolicy,
    pub(crate) events: broadcast::Sender<StatusEvent>,
}

impl ExecutorContext {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AdapterRegistry>,
        tokens: Arc<TokenManager>,
        audit: Arc<dyn AuditSink>,
        policy: RetryPolicy,
        events: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            store,
            registry,
            tokens,
            audit,
            policy,
            events,
        }
    }

    /// Run one publish attempt for a schedule the caller has already claimed.
    ///
    /// Records exactly one audit event, whatever happens.
    #[tracing::instrument(skip_all, fields(schedule_id = schedule.id, item_id = schedule.content_item_id))]
    pub async fn execute(&self, schedule: &Schedule) -> AttemptOutcome {
        let item = match self.store.get_content_item(schedule.content_item_id) {
            Ok(item) => item,
            Err(e) => return self.abort(schedule, None, e),
        };

        let attempt = self.publish(&item).await;
        let now = Utc::now();
        match attempt {
            Ok((receipt, token_refreshed)) => {
                self.complete(schedule, &item, receipt, token_refreshed, now)
            }
            Err(e) => self.fail(schedule, &item, e, now),
        }
    }

    async fn publish(&self, item: &ContentItem) -> Result<(PublishReceipt, bool), PlatformError> {
        let adapter = self.registry.get(item.platform)?;

        // Content problems are caught before any token refresh or publish call
        adapter.validate(item)?;

        let account = self
            .store
            .find_account(item.owner_id, item.platform)?
            .ok_or(PlatformError::AccountNotConnected {
                platform: item.platform,
                owner_id: item.owner_id,
            })?;

        let token = self.tokens.ensure_valid(adapter.as_ref(), &account).await?;
        let receipt = adapter.publish(item, token.account()).await?;
        Ok((receipt, token.was_refreshed()))
    }

    fn complete(
        &self,
        schedule: &Schedule,
        item: &ContentItem,
        receipt: PublishReceipt,
        token_refreshed: bool,
        now: DateTime<Utc>,
    ) -> AttemptOutcome {
        if let Err(e) = self.store.mark_completed(schedule.id, &receipt, now) {
            return self.abort(schedule, Some(item), e);
        }

        let data = json!({
            "remote_id": receipt.remote_id,
            "remote_url": receipt.remote_url,
        });
        self.audit.record(
            AuditEntry::success(format!("Published to {}", item.platform))
                .with_context(json!({
                    "schedule_id": schedule.id,
                    "platform": item.platform,
                    "remote_id": receipt.remote_id,
                    "remote_url": receipt.remote_url,
                    "retry_count": schedule.retry_count,
                    "token_refreshed": token_refreshed,
                }))
                .for_item(item),
        );
        self.notify(
            schedule,
            item,
            ContentStatus::Published,
            format!("Your post was published to {}", item.platform),
            data,
        );

        AttemptOutcome::Published {
            schedule_id: schedule.id,
            receipt,
        }
    }

    fn fail(
        &self,
        schedule: &Schedule,
        item: &ContentItem,
        err: PlatformError,
        now: DateTime<Utc>,
    ) -> AttemptOutcome {
        let class = err.failure_class();
        let reason = err.user_message();
        let context = json!({
            "schedule_id": schedule.id,
            "platform": item.platform,
            "error": err.to_string(),
            "kind": err.kind(),
            "class": class.as_str(),
            "detail": format!("{:?}", err),
        });

        if !class.is_retryable() {
            return match self.store.mark_failed(schedule.id, &reason, now) {
                Ok(failed) => self.terminal(&failed, item, class, reason, context),
                Err(e) => self.abort(schedule, Some(item), e),
            };
        }

        match self.store.mark_retry(schedule.id, &reason, &self.policy, now) {
            Ok(RetryDecision::Requeued { schedule: requeued, delay }) => {
                let mut context = context;
                context["retry_count"] = json!(requeued.retry_count);
                context["next_attempt_at"] = json!(requeued.not_before);
                self.audit.record(
                    AuditEntry::warning(format!(
                        "Publish to {} failed, retry {} of {} in {}s",
                        item.platform,
                        requeued.retry_count,
                        self.policy.max_retries,
                        delay.as_secs()
                    ))
                    .with_context(context)
                    .for_item(item),
                );
                AttemptOutcome::Retrying {
                    schedule_id: schedule.id,
                    retry_count: requeued.retry_count,
                    delay,
                    reason,
                }
            }
            Ok(RetryDecision::Exhausted { schedule: failed }) => {
                self.terminal(&failed, item, class, reason, context)
            }
            Err(e) => self.abort(schedule, Some(item), e),
        }
    }

    fn terminal(
        &self,
        failed: &Schedule,
        item: &ContentItem,
        class: FailureClass,
        reason: String,
        mut context: serde_json::Value,
    ) -> AttemptOutcome {
        context["retry_count"] = json!(failed.retry_count);
        let message = if class.is_retryable() {
            format!(
                "Publish to {} failed after {} retries",
                item.platform, failed.retry_count
            )
        } else {
            format!("Publish to {} failed", item.platform)
        };

        self.audit
            .record(AuditEntry::error(message).with_context(context).for_item(item));
        self.notify(
            failed,
            item,
            ContentStatus::Failed,
            reason.clone(),
            json!({ "retry_count": failed.retry_count }),
        );

        AttemptOutcome::Failed {
            schedule_id: failed.id,
            class,
            reason,
        }
    }

    fn abort(
        &self,
        schedule: &Schedule,
        item: Option<&ContentItem>,
        err: StoreError,
    ) -> AttemptOutcome {
        let mut entry = AuditEntry::error("Could not record publish outcome")
            .with_context(json!({
                "schedule_id": schedule.id,
                "error": err.to_string(),
            }))
            .with_item(schedule.content_item_id);
        if let Some(item) = item {
            entry = entry.with_owner(item.owner_id);
        }
        self.audit.record(entry);

        AttemptOutcome::Aborted {
            schedule_id: schedule.id,
            error: err.to_string(),
        }
    }

    fn notify(
        &self,
        schedule: &Schedule,
        item: &ContentItem,
        status: ContentStatus,
        message: String,
        data: serde_json::Value,
    ) {
        let event = StatusEvent {
            item_id: item.id,
            owner_id: item.owner_id,
            schedule_id: schedule.id,
            status,
            message,
            data,
        };
        // No subscribers is fine
        if self.events.send(event).is_err() {
            debug!("no status subscribers");
        }
    }
}

/// A claimed schedule waiting for a worker.
pub(crate) struct PublishJob {
    schedule: Schedule,
    reply: Option<oneshot::Sender<AttemptOutcome>>,
}

/// Submits claimed schedules to the worker pool.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<PublishJob>,
}

impl ExecutorHandle {
    /// Queue a schedule. Waits while the queue is full.
    pub async fn submit(&self, schedule: Schedule) -> Result<(), SchedulerError> {
        self.tx
            .send(PublishJob {
                schedule,
                reply: None,
            })
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Queue a schedule and get its outcome back once a worker finishes it.
    pub async fn submit_tracked(
        &self,
        schedule: Schedule,
    ) -> Result<oneshot::Receiver<AttemptOutcome>, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublishJob {
                schedule,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SchedulerError::QueueClosed)?;
        Ok(rx)
    }
}

#[cfg(test)]
impl ExecutorHandle {
    /// A handle whose queue nobody drains.
    pub(crate) fn stalled(capacity: usize) -> (Self, mpsc::Receiver<PublishJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

/// The worker pool. Attempts run concurrently and independently; one failing
/// attempt never affects another.
pub struct Executor {
    handle: ExecutorHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Executor {
    /// Spawn `worker_count` workers pulling from a queue of `queue_size`.
    pub fn spawn(ctx: Arc<ExecutorContext>, worker_count: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<PublishJob>(queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);

            workers.push(tokio::spawn(async move {
                info!(worker_id, "publish worker started");

                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };

                    let Some(PublishJob { schedule, reply }) = job else {
                        // Queue closed and drained
                        break;
                    };

                    debug!(worker_id, schedule_id = schedule.id, "worker processing schedule");
                    let outcome = ctx.execute(&schedule).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }

                info!(worker_id, "publish worker stopped");
            }));
        }

        Self {
            handle: ExecutorHandle { tx },
            workers,
        }
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// Close the queue and wait for workers to finish everything already queued.
    ///
    /// Workers only stop once every other `ExecutorHandle` clone is dropped too.
    pub async fn shutdown(self) {
        let Executor { handle, workers } = self;
        drop(handle);
        for worker in workers {
            let _ = worker.await;
        }
        info!("publish executor drained");
    }
}
