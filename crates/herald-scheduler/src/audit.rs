//! Audit sink: append-only record of pipeline transitions.

use std::sync::Arc;

use chrono::Utc;
use herald_store::{AuditEntry, Severity, Store};
use tracing::{error, info, warn};

/// Destination for audit events. Recording never fails from the caller's side.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes audit events to the store and mirrors them into `tracing`.
///
/// Write failures are logged at `error` and dropped so the pipeline keeps going.
pub struct StoreAuditSink {
    store: Arc<Store>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn record(&self, entry: AuditEntry) {
        mirror(&entry);
        if let Err(e) = self.store.insert_audit_event(&entry, Utc::now()) {
            error!(
                error = %e,
                message = %entry.message,
                "failed to write audit event"
            );
        }
    }
}

fn mirror(entry: &AuditEntry) {
    let owner_id = entry.owner_id;
    let item_id = entry.content_item_id;
    match entry.severity {
        Severity::Info | Severity::Success => info!(
            ?owner_id,
            ?item_id,
            severity = %entry.severity,
            context = %entry.context,
            "{}",
            entry.message
        ),
        Severity::Warning => warn!(?owner_id, ?item_id, context = %entry.context, "{}", entry.message),
        Severity::Error => error!(?owner_id, ?item_id, context = %entry.context, "{}", entry.message),
    }
}
