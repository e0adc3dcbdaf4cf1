//! End-to-end pipeline tests against an in-memory store and scripted adapters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use herald_platforms::{AdapterRegistry, FailureClass, PlatformAdapter, PlatformError, ProfileInfo};
use herald_scheduler::{AttemptOutcome, Pipeline, PipelineConfig, SchedulerError};
use herald_store::{
    AuditFilter, ContentItem, ContentStatus, NewContentItem, NewPlatformAccount, Platform,
    PlatformAccount, PublishReceipt, RetryPolicy, ScheduleStatus, Severity, Store, StoreError,
    TokenGrant,
};
use pretty_assertions::assert_eq;

/// What the scripted adapter does on its next publish call.
#[derive(Debug, Clone, Copy)]
enum Step {
    Publish,
    Transient,
    Revoked,
    Garbled,
}

struct ScriptedAdapter {
    platform: Platform,
    script: Mutex<VecDeque<Step>>,
    publishes: AtomicUsize,
    refreshes: AtomicUsize,
    fail_refresh: bool,
    tokens_seen: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(platform: Platform, steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(steps.iter().copied().collect()),
            publishes: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fail_refresh: false,
            tokens_seen: Mutex::new(Vec::new()),
        })
    }

    fn failing_refresh(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            fail_refresh: true,
            ..Arc::into_inner(Self::new(platform, &[])).unwrap()
        })
    }

    fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        item: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PublishReceipt, PlatformError> {
        let n = self.publishes.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .unwrap()
            .push(account.access_token.clone());

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Publish);
        match step {
            Step::Publish => Ok(PublishReceipt {
                remote_id: format!("post-{}-{}", item.id, n),
                remote_url: format!("https://social.example.com/p/{}", item.id),
            }),
            Step::Transient => Err(PlatformError::Server {
                platform: self.platform,
                status: 503,
                message: "upstream unavailable".to_string(),
            }),
            Step::Revoked => Err(PlatformError::Auth {
                platform: self.platform,
                status: 401,
                message: "token revoked".to_string(),
            }),
            Step::Garbled => Err(PlatformError::UnexpectedResponse {
                platform: self.platform,
                message: "missing id".to_string(),
            }),
        }
    }

    async fn refresh_token(&self, _account: &PlatformAccount) -> Result<TokenGrant, PlatformError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(PlatformError::TokenRefresh {
                platform: self.platform,
                reason: "invalid_grant".to_string(),
            });
        }
        Ok(TokenGrant {
            access_token: "refreshed-token".to_string(),
            refresh_token: Some("rotated".to_string()),
            expires_at: Utc::now() + ChronoDuration::days(30),
        })
    }

    async fn account_details(
        &self,
        account: &PlatformAccount,
    ) -> Result<ProfileInfo, PlatformError> {
        Ok(ProfileInfo {
            remote_id: account.remote_account_id.clone(),
            username: Some(account.username.clone()),
            display_name: None,
            followers: Some(12),
            profile_url: None,
        })
    }
}

struct Fixture {
    store: Arc<Store>,
    pipeline: Pipeline,
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::from_secs(3, &[0, 0, 0]),
        worker_count: 2,
        ..PipelineConfig::default()
    }
}

fn fixture(adapter: Arc<ScriptedAdapter>, config: PipelineConfig) -> Fixture {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let registry = AdapterRegistry::empty().with(adapter);
    let pipeline = Pipeline::new(Arc::clone(&store), registry, config).unwrap();
    Fixture { store, pipeline }
}

fn connect(store: &Store, platform: Platform, expires_in: Option<ChronoDuration>) -> PlatformAccount {
    store
        .upsert_account(
            &NewPlatformAccount {
                owner_id: 7,
                platform,
                remote_account_id: "acct-1".to_string(),
                username: "herald".to_string(),
                access_token: "stored-token".to_string(),
                refresh_token: Some("refresh".to_string()),
                token_expires_at: expires_in.map(|d| Utc::now() + d),
                settings: serde_json::Value::Null,
            },
            Utc::now(),
        )
        .unwrap()
}

fn draft(store: &Store, platform: Platform, body: &str) -> ContentItem {
    store
        .insert_content_item(
            &NewContentItem {
                owner_id: 7,
                platform,
                body: body.to_string(),
                hashtags: None,
                media_url: None,
            },
            Utc::now(),
        )
        .unwrap()
}

fn due_now() -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::seconds(1)
}

fn events_for(store: &Store, item_id: i64) -> Vec<herald_store::AuditEvent> {
    store
        .list_audit_events(&AuditFilter {
            content_item_id: Some(item_id),
            ..AuditFilter::default()
        })
        .unwrap()
}

#[tokio::test]
async fn test_successful_publish_completes_schedule_and_item() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Publish]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, Some(ChronoDuration::days(10)));
    let item = draft(&f.store, Platform::Twitter, "hello world");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let report = f.pipeline.process_due_now().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert!(matches!(report.outcomes[0], AttemptOutcome::Published { .. }));

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.retry_count, 0);

    let item = f.store.get_content_item(item.id).unwrap();
    assert_eq!(item.status, ContentStatus::Published);
    assert!(item.published_at.is_some());
    assert_eq!(item.remote_url.as_deref(), Some("https://social.example.com/p/1"));

    let successes: Vec<_> = events_for(&f.store, item.id)
        .into_iter()
        .filter(|e| e.severity == Severity::Success)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].owner_id, Some(7));
    assert!(successes[0].context["remote_id"].as_str().is_some());
}

#[tokio::test]
async fn test_transient_failure_defers_retry_by_first_backoff_step() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Transient]);
    let f = fixture(
        adapter,
        PipelineConfig {
            retry: RetryPolicy::default(),
            ..PipelineConfig::default()
        },
    );
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "flaky");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let before = Utc::now();
    let report = f.pipeline.process_due_now().await.unwrap();
    let after = Utc::now();

    match &report.outcomes[0] {
        AttemptOutcome::Retrying {
            retry_count, delay, ..
        } => {
            assert_eq!(*retry_count, 1);
            assert_eq!(*delay, Duration::from_secs(30));
        }
        other => panic!("expected a retry, got {:?}", other),
    }

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Pending);
    assert_eq!(schedule.retry_count, 1);
    assert!(schedule.not_before >= before + ChronoDuration::seconds(29));
    assert!(schedule.not_before <= after + ChronoDuration::seconds(30));

    // Not claimable until the delay passes
    let report = f.pipeline.process_due_now().await.unwrap();
    assert_eq!(report.claimed, 0);

    let warnings: Vec<_> = events_for(&f.store, item.id)
        .into_iter()
        .filter(|e| e.severity == Severity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].context["retry_count"], 1);
}

#[tokio::test]
async fn test_retries_are_bounded_and_failure_is_final() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Transient; 10]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "never lands");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();
    let mut statuses = f.pipeline.subscribe();

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.extend(f.pipeline.process_due_now().await.unwrap().outcomes);
    }

    // The first attempt plus three retries
    assert_eq!(adapter.publishes(), 4);
    assert_eq!(outcomes.len(), 4);
    assert!(matches!(
        outcomes.last(),
        Some(AttemptOutcome::Failed {
            class: FailureClass::Transient,
            ..
        })
    ));

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 3);
    assert_eq!(
        schedule.failure_reason.as_deref(),
        Some("twitter is temporarily unavailable")
    );
    assert_eq!(
        f.store.get_content_item(item.id).unwrap().status,
        ContentStatus::Failed
    );

    let event = statuses.recv().await.unwrap();
    assert_eq!(event.item_id, item.id);
    assert_eq!(event.status, ContentStatus::Failed);
    assert_eq!(event.data["retry_count"], 3);

    // One audit event per attempt, plus the scheduling entry
    assert_eq!(events_for(&f.store, item.id).len(), 5);
}

#[tokio::test]
async fn test_unknown_errors_consume_retry_slots() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Garbled, Step::Publish]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "eventually");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    f.pipeline.process_due_now().await.unwrap();
    f.pipeline.process_due_now().await.unwrap();

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.retry_count, 1);
}

#[tokio::test]
async fn test_revoked_access_fails_without_retry() {
    let adapter = ScriptedAdapter::new(Platform::Linkedin, &[Step::Revoked]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Linkedin, None);
    let item = draft(&f.store, Platform::Linkedin, "hello");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let report = f.pipeline.process_due_now().await.unwrap();
    assert!(matches!(
        report.outcomes[0],
        AttemptOutcome::Failed {
            class: FailureClass::Auth,
            ..
        }
    ));

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 0);
    assert_eq!(
        schedule.failure_reason.as_deref(),
        Some("The linkedin account needs to be reconnected")
    );

    // Raw platform text stays in the audit context, out of the user-facing reason
    let errors: Vec<_> = events_for(&f.store, item.id)
        .into_iter()
        .filter(|e| e.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].context["error"].as_str().unwrap().contains("token revoked"));
    assert_eq!(errors[0].context["class"], "auth");
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_before_publish() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Publish]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    let account = connect(&f.store, Platform::Twitter, Some(ChronoDuration::minutes(30)));
    let item = draft(&f.store, Platform::Twitter, "fresh token please");
    f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    f.pipeline.process_due_now().await.unwrap();

    assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(*adapter.tokens_seen.lock().unwrap(), vec!["refreshed-token"]);

    let stored = f.store.get_account(account.id).unwrap();
    assert_eq!(stored.access_token, "refreshed-token");
    assert_eq!(stored.refresh_token.as_deref(), Some("rotated"));
    assert!(stored.token_expires_at.unwrap() > Utc::now() + ChronoDuration::days(29));
    assert_eq!(
        f.store.get_content_item(item.id).unwrap().status,
        ContentStatus::Published
    );
}

#[tokio::test]
async fn test_failed_refresh_is_terminal_and_keeps_credentials() {
    let adapter = ScriptedAdapter::failing_refresh(Platform::Facebook);
    let f = fixture(Arc::clone(&adapter), fast_config());
    let account = connect(&f.store, Platform::Facebook, Some(ChronoDuration::minutes(10)));
    let item = draft(&f.store, Platform::Facebook, "hello");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    f.pipeline.process_due_now().await.unwrap();

    assert_eq!(adapter.publishes(), 0);
    assert_eq!(f.store.get_account(account.id).unwrap(), account);
    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 0);
}

#[tokio::test]
async fn test_cancelled_schedule_is_never_claimed() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "changed my mind");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let cancelled = f.pipeline.cancel_schedule(schedule.id).unwrap();
    assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
    assert_eq!(
        f.store.get_content_item(item.id).unwrap().status,
        ContentStatus::Draft
    );

    let report = f.pipeline.process_due_now().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(adapter.publishes(), 0);

    // Cancelling twice is rejected and audited
    let err = f.pipeline.cancel_schedule(schedule.id).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(StoreError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_over_limit_content_fails_without_network_or_retries() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    // Expiring token: validation must still win over refresh
    connect(&f.store, Platform::Twitter, Some(ChronoDuration::minutes(5)));
    let item = draft(&f.store, Platform::Twitter, &"x".repeat(281));
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let report = f.pipeline.process_due_now().await.unwrap();
    assert!(matches!(
        report.outcomes[0],
        AttemptOutcome::Failed {
            class: FailureClass::Validation,
            ..
        }
    ));
    assert_eq!(adapter.publishes(), 0);
    assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 0);

    let schedule = f.store.get_schedule(schedule.id).unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 0);
    assert!(schedule.failure_reason.unwrap().contains("280 character limit"));
}

#[tokio::test]
async fn test_missing_account_is_terminal() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    let item = draft(&f.store, Platform::Twitter, "nobody home");
    f.pipeline.schedule_content_item(item.id, due_now()).unwrap();

    let report = f.pipeline.process_due_now().await.unwrap();
    assert!(matches!(
        report.outcomes[0],
        AttemptOutcome::Failed {
            class: FailureClass::Auth,
            ..
        }
    ));
    assert_eq!(adapter.publishes(), 0);
}

#[tokio::test]
async fn test_scheduling_unregistered_platform_is_rejected() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(adapter, fast_config());
    let item = draft(&f.store, Platform::Tiktok, "no adapter");

    let err = f
        .pipeline
        .schedule_content_item(item.id, due_now())
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Platform(PlatformError::UnsupportedPlatform(_))
    ));
    assert!(f.store.schedules_for_item(item.id).unwrap().is_empty());

    let events = events_for(&f.store, item.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_duplicate_schedule_is_rejected() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(adapter, fast_config());
    let item = draft(&f.store, Platform::Twitter, "once only");
    f.pipeline
        .schedule_content_item(item.id, Utc::now() + ChronoDuration::hours(1))
        .unwrap();

    let err = f
        .pipeline
        .schedule_content_item(item.id, Utc::now() + ChronoDuration::hours(2))
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(StoreError::DuplicateSchedule(_))
    ));
}

#[tokio::test]
async fn test_requeue_failed_schedule_publishes_on_next_sweep() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Revoked, Step::Publish]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "second chance");
    let failed = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();
    f.pipeline.process_due_now().await.unwrap();

    let requeued = f.pipeline.requeue_failed(failed.id).unwrap();
    assert_ne!(requeued.id, failed.id);
    assert_eq!(requeued.status, ScheduleStatus::Pending);
    assert_eq!(requeued.retry_count, 0);

    f.pipeline.process_due_now().await.unwrap();
    assert_eq!(
        f.store.get_schedule(requeued.id).unwrap().status,
        ScheduleStatus::Completed
    );
    assert_eq!(
        f.store.get_schedule(failed.id).unwrap().status,
        ScheduleStatus::Failed
    );
}

#[tokio::test]
async fn test_disconnect_cancels_pending_schedules() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    let account = connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "later");
    let schedule = f
        .pipeline
        .schedule_content_item(item.id, Utc::now() + ChronoDuration::hours(1))
        .unwrap();

    let cancelled = f.pipeline.disconnect_account(account.id).unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, schedule.id);
    assert_eq!(cancelled[0].status, ScheduleStatus::Cancelled);
    assert!(f.store.find_account(7, Platform::Twitter).unwrap().is_none());

    let owner_events = f
        .store
        .list_audit_events(&AuditFilter {
            owner_id: Some(7),
            severity: Some(Severity::Warning),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(owner_events.len(), 1);
    assert_eq!(owner_events[0].context["cancelled_schedules"][0], schedule.id);
}

#[tokio::test]
async fn test_published_status_event_is_broadcast() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[Step::Publish]);
    let f = fixture(adapter, fast_config());
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "announce me");
    let schedule = f.pipeline.schedule_content_item(item.id, due_now()).unwrap();
    let mut statuses = f.pipeline.subscribe();

    f.pipeline.process_due_now().await.unwrap();

    let event = statuses.recv().await.unwrap();
    assert_eq!(event.schedule_id, schedule.id);
    assert_eq!(event.owner_id, 7);
    assert_eq!(event.status, ContentStatus::Published);
    assert!(event.data["remote_url"].as_str().is_some());
}

#[tokio::test]
async fn test_one_failing_item_does_not_affect_others() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(Arc::clone(&adapter), fast_config());
    connect(&f.store, Platform::Twitter, None);

    let too_long = draft(&f.store, Platform::Twitter, &"y".repeat(300));
    f.pipeline.schedule_content_item(too_long.id, due_now()).unwrap();
    let mut fine = Vec::new();
    for i in 0..5 {
        let item = draft(&f.store, Platform::Twitter, &format!("post {}", i));
        f.pipeline.schedule_content_item(item.id, due_now()).unwrap();
        fine.push(item.id);
    }

    let report = f.pipeline.process_due_now().await.unwrap();
    assert_eq!(report.claimed, 6);
    assert_eq!(
        report
            .outcomes
            .iter()
            .filter(|o| matches!(o, AttemptOutcome::Published { .. }))
            .count(),
        5
    );
    for id in fine {
        assert_eq!(
            f.store.get_content_item(id).unwrap().status,
            ContentStatus::Published
        );
    }
}

#[tokio::test]
async fn test_check_tokens_reports_each_account() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let other = ScriptedAdapter::failing_refresh(Platform::Youtube);
    let store = Arc::new(Store::open_in_memory().unwrap());
    let registry = AdapterRegistry::empty().with(adapter).with(other);
    let pipeline = Pipeline::new(Arc::clone(&store), registry, fast_config()).unwrap();

    connect(&store, Platform::Twitter, Some(ChronoDuration::minutes(20)));
    connect(&store, Platform::Youtube, Some(ChronoDuration::minutes(20)));
    connect(&store, Platform::Facebook, Some(ChronoDuration::days(20)));

    let report = pipeline.check_tokens().await.unwrap();
    assert_eq!(report.refreshed, 1);
    // Facebook has no adapter registered, so it counts as failed alongside YouTube
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.failed.len(), 2);
}

#[tokio::test]
async fn test_account_details_go_through_the_adapter() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(adapter, fast_config());
    let account = connect(&f.store, Platform::Twitter, None);

    let profile = f.pipeline.account_details(account.id).await.unwrap();
    assert_eq!(profile.remote_id, "acct-1");
    assert_eq!(profile.followers, Some(12));
}

#[tokio::test]
async fn test_upcoming_lists_future_schedules() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(adapter, fast_config());
    let later = draft(&f.store, Platform::Twitter, "later");
    let sooner = draft(&f.store, Platform::Twitter, "sooner");
    f.pipeline
        .schedule_content_item(later.id, Utc::now() + ChronoDuration::hours(5))
        .unwrap();
    f.pipeline
        .schedule_content_item(sooner.id, Utc::now() + ChronoDuration::hours(1))
        .unwrap();

    let upcoming = f.pipeline.upcoming(7, Some(Platform::Twitter), 10).unwrap();
    let ids: Vec<i64> = upcoming.iter().map(|s| s.content_item_id).collect();
    assert_eq!(ids, vec![sooner.id, later.id]);
    assert!(f.pipeline.upcoming(7, Some(Platform::Facebook), 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_interrupted_only_takes_stuck_claims() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(adapter, fast_config());
    let stuck = draft(&f.store, Platform::Twitter, "crashed mid-flight");
    let stuck = f
        .pipeline
        .schedule_content_item(stuck.id, Utc::now() - ChronoDuration::hours(3))
        .unwrap();
    // Claimed two hours ago by a process that then died
    f.store
        .claim_due(Utc::now() - ChronoDuration::hours(2), 10)
        .unwrap();

    let live = draft(&f.store, Platform::Twitter, "being published elsewhere");
    let live = f.pipeline.schedule_content_item(live.id, due_now()).unwrap();
    f.store.claim_due(Utc::now(), 10).unwrap();

    assert_eq!(f.pipeline.recover_interrupted().unwrap(), 1);
    let stuck = f.store.get_schedule(stuck.id).unwrap();
    assert_eq!(stuck.status, ScheduleStatus::Pending);
    assert_eq!(stuck.retry_count, 0);
    assert_eq!(
        f.store.get_schedule(live.id).unwrap().status,
        ScheduleStatus::Processing
    );
}

#[tokio::test]
async fn test_daemon_loop_publishes_and_shuts_down() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(
        Arc::clone(&adapter),
        PipelineConfig {
            sweep_interval: Duration::from_millis(20),
            ..fast_config()
        },
    );
    connect(&f.store, Platform::Twitter, None);
    let item = draft(&f.store, Platform::Twitter, "background");
    f.pipeline.schedule_content_item(item.id, due_now()).unwrap();
    let mut statuses = f.pipeline.subscribe();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let Fixture { store, pipeline } = f;
    let pipeline = Arc::new(pipeline);
    let runner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(shutdown_rx).await })
    };

    let event = tokio::time::timeout(Duration::from_secs(5), statuses.recv())
        .await
        .expect("published within timeout")
        .unwrap();
    assert_eq!(event.item_id, item.id);

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
    let pipeline = Arc::into_inner(pipeline).unwrap();
    pipeline.shutdown().await;

    assert_eq!(
        store.get_content_item(item.id).unwrap().status,
        ContentStatus::Published
    );
}

#[tokio::test]
async fn test_run_refreshes_expiring_tokens_in_background() {
    let adapter = ScriptedAdapter::new(Platform::Twitter, &[]);
    let f = fixture(
        Arc::clone(&adapter),
        PipelineConfig {
            token_check_interval: Duration::from_millis(20),
            ..fast_config()
        },
    );
    let account = connect(&f.store, Platform::Twitter, Some(ChronoDuration::minutes(10)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let Fixture { store, pipeline } = f;
    let pipeline = Arc::new(pipeline);
    let runner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(shutdown_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.get_account(account.id).unwrap().access_token != "refreshed-token" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("token refreshed within timeout");
    assert!(adapter.refreshes.load(Ordering::SeqCst) >= 1);

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
    Arc::into_inner(pipeline).unwrap().shutdown().await;
}
