//! One-shot operational commands.

use chrono::{DateTime, Duration, Utc};
use herald_scheduler::{AttemptOutcome, Pipeline};
use herald_store::{AuditFilter, Platform, Severity};
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{}", out);
    Ok(())
}

#[derive(Serialize)]
struct SweepSummary {
    skipped: bool,
    claimed: usize,
    published: usize,
    retrying: usize,
    failed: usize,
    aborted: usize,
}

/// Claim whatever is due and wait for every attempt to finish.
pub async fn process_due(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.process_due_now().await.into_diagnostic()?;

    let mut summary = SweepSummary {
        skipped: report.skipped,
        claimed: report.claimed,
        published: 0,
        retrying: 0,
        failed: 0,
        aborted: 0,
    };
    for outcome in &report.outcomes {
        match outcome {
            AttemptOutcome::Published { .. } => summary.published += 1,
            AttemptOutcome::Retrying { .. } => summary.retrying += 1,
            AttemptOutcome::Failed { .. } => summary.failed += 1,
            AttemptOutcome::Aborted { .. } => summary.aborted += 1,
        }
    }
    print_json(&summary)
}

pub fn schedule(pipeline: &Pipeline, item_id: i64, due_at: DateTime<Utc>) -> Result<()> {
    let schedule = pipeline
        .schedule_content_item(item_id, due_at)
        .into_diagnostic()?;
    print_json(&schedule)
}

pub fn cancel(pipeline: &Pipeline, schedule_id: i64) -> Result<()> {
    let schedule = pipeline.cancel_schedule(schedule_id).into_diagnostic()?;
    print_json(&schedule)
}

pub fn requeue(pipeline: &Pipeline, schedule_id: i64) -> Result<()> {
    let schedule = pipeline.requeue_failed(schedule_id).into_diagnostic()?;
    print_json(&schedule)
}

pub fn disconnect(pipeline: &Pipeline, account_id: i64) -> Result<()> {
    let cancelled = pipeline.disconnect_account(account_id).into_diagnostic()?;
    print_json(&cancelled)
}

pub async fn check_tokens(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.check_tokens().await.into_diagnostic()?;
    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|(account_id, reason)| serde_json::json!({ "account_id": account_id, "reason": reason }))
        .collect();
    print_json(&serde_json::json!({
        "refreshed": report.refreshed,
        "unchanged": report.unchanged,
        "failed": failed,
    }))
}

pub async fn account(pipeline: &Pipeline, account_id: i64) -> Result<()> {
    let profile = pipeline.account_details(account_id).await.into_diagnostic()?;
    print_json(&profile)
}

pub fn upcoming(
    pipeline: &Pipeline,
    owner_id: i64,
    platform: Option<Platform>,
    limit: usize,
) -> Result<()> {
    let schedules = pipeline
        .upcoming(owner_id, platform, limit)
        .into_diagnostic()?;
    print_json(&schedules)
}

pub fn audit(
    pipeline: &Pipeline,
    owner_id: Option<i64>,
    item_id: Option<i64>,
    severity: Option<Severity>,
    limit: usize,
) -> Result<()> {
    let events = pipeline
        .store()
        .list_audit_events(&AuditFilter {
            owner_id,
            content_item_id: item_id,
            severity,
            limit: Some(limit),
        })
        .into_diagnostic()?;
    print_json(&events)
}

pub fn prune_audit(pipeline: &Pipeline, days: u32) -> Result<()> {
    if days == 0 {
        return Err(miette!("--days must be at least 1"));
    }
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let deleted = pipeline
        .store()
        .prune_audit_events(cutoff)
        .into_diagnostic()?;
    print_json(&serde_json::json!({ "deleted": deleted, "cutoff": cutoff }))
}
