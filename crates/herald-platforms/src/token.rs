//! Token lifecycle: read, check expiry, refresh, persist.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use herald_store::{PlatformAccount, Store};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_TOKEN_LOOKAHEAD;
use crate::{PlatformAdapter, PlatformError};

/// Result of making sure an account's token is usable.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenCheck {
    /// The stored token is outside the lookahead window.
    Fresh(PlatformAccount),
    /// The token was refreshed and the new credentials persisted.
    Refreshed(PlatformAccount),
}

impl TokenCheck {
    pub fn account(&self) -> &PlatformAccount {
        match self {
            TokenCheck::Fresh(account) | TokenCheck::Refreshed(account) => account,
        }
    }

    pub fn into_account(self) -> PlatformAccount {
        match self {
            TokenCheck::Fresh(account) | TokenCheck::Refreshed(account) => account,
        }
    }

    pub fn was_refreshed(&self) -> bool {
        matches!(self, TokenCheck::Refreshed(_))
    }
}

/// Performs the read-check-refresh-write sequence identically for every adapter.
///
/// Refreshes are serialized per account id, so two attempts publishing through
/// the same account never race to overwrite each other's new token. A failed
/// refresh leaves the stored credentials untouched.
pub struct TokenManager {
    store: Arc<Store>,
    lookahead: TimeDelta,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_lookahead(store, DEFAULT_TOKEN_LOOKAHEAD)
    }

    pub fn with_lookahead(store: Arc<Store>, lookahead: Duration) -> Self {
        Self {
            store,
            lookahead: TimeDelta::from_std(lookahead).unwrap_or(TimeDelta::hours(1)),
            locks: DashMap::new(),
        }
    }

    pub fn lookahead(&self) -> TimeDelta {
        self.lookahead
    }

    /// Whether the account's token is inside the refresh window at `now`.
    pub fn needs_refresh(&self, account: &PlatformAccount, now: DateTime<Utc>) -> bool {
        account.token_expires_within(self.lookahead, now)
    }

    /// Return the account with a token that is good for at least the lookahead
    /// window, refreshing through `adapter` if needed.
    #[tracing::instrument(skip_all, fields(account_id = account.id, platform = %account.platform))]
    pub async fn ensure_valid(
        &self,
        adapter: &dyn PlatformAdapter,
        account: &PlatformAccount,
    ) -> Result<TokenCheck, PlatformError> {
        if !self.needs_refresh(account, Utc::now()) {
            return Ok(TokenCheck::Fresh(account.clone()));
        }

        let lock = self
            .locks
            .entry(account.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another attempt may have refreshed while we waited for the lock
        let current = self.store.get_account(account.id)?;
        if !self.needs_refresh(&current, Utc::now()) {
            debug!("token refreshed by a concurrent attempt");
            return Ok(TokenCheck::Fresh(current));
        }

        let grant = match adapter.refresh_token(&current).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "token refresh failed, keeping stored credentials");
                return Err(e);
            }
        };

        let updated = self
            .store
            .update_account_token(current.id, &grant, Utc::now())?;
        info!(expires_at = %grant.expires_at, "refreshed platform token");
        Ok(TokenCheck::Refreshed(updated))
    }
}
