//! Time-windowed user validator.
//!
//! Every registered key has tokens for a window of seconds around the
//! current time. A background task extends each window forward every
//! update interval and prunes tokens that fell behind the retention horizon.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ValidatorConfig;
use crate::error::DaemonResult;
use crate::protocol::{Timestamp, Token, User};

use super::clock::{Clock, SystemClock};
use super::hash::{HashKind, IdHash};
use super::index::{CredentialIndex, IndexStats, RefreshOutcome};

/// Validates VMess auth tokens against the registered users.
///
/// `add` and the refresh cycle take the exclusive lock; `get` takes the
/// shared lock, so a batch of generated tokens becomes visible all at once.
pub struct TimedUserValidator<H: IdHash = HashKind> {
    index: RwLock<CredentialIndex<H>>,
    clock: Arc<dyn Clock>,
    cache_duration: u64,
    update_interval: Duration,
}

impl<H: IdHash> TimedUserValidator<H> {
    /// Create a validator on the system clock and start its refresher.
    ///
    /// The refresher runs until `cancel` fires. Must be called from within a
    /// Tokio runtime.
    pub fn new(
        cancel: CancellationToken,
        hasher: H,
        config: &ValidatorConfig,
    ) -> DaemonResult<Arc<Self>> {
        let validator = Arc::new(Self::with_clock(hasher, Arc::new(SystemClock), config)?);
        validator.start_refresh_task(cancel);
        Ok(validator)
    }

    /// Create a validator without a refresher.
    ///
    /// `base_time` is fixed at `now - 3 * cache_duration` on `clock`. Fails
    /// with a configuration error for a zero interval or a cache duration
    /// whose second offsets would not fit the index.
    pub fn with_clock(
        hasher: H,
        clock: Arc<dyn Clock>,
        config: &ValidatorConfig,
    ) -> DaemonResult<Self> {
        config.validate()?;

        let cache_duration = config.cache_duration_seconds;
        let base_time = clock
            .now()
            .saturating_sub_secs(cache_duration.saturating_mul(3));
        Ok(Self {
            index: RwLock::new(CredentialIndex::new(hasher, base_time)),
            clock,
            cache_duration,
            update_interval: Duration::from_secs(config.update_interval_seconds),
        })
    }

    /// Register a user and seed its tokens for
    /// `[now - cache_duration, now + cache_duration]`.
    ///
    /// Fails with an account type error, leaving the index untouched, when
    /// the user has no usable VMess credential.
    pub fn add(&self, user: impl Into<Arc<User>>) -> DaemonResult<()> {
        let user = user.into();
        let credential = user.credential()?;
        let email = user.email.clone();

        let (user_index, generated) = {
            let mut index = self.write();
            let now = self.clock.now();
            index.register(user, &credential, now, self.cache_duration)
        };

        info!(
            email = %email,
            user_index,
            keys = credential.alternates.len() + 1,
            tokens = generated,
            "Registered user"
        );
        Ok(())
    }

    /// Look up a token.
    ///
    /// Returns the owning user and the second the token was generated for.
    pub fn get(&self, token: &Token) -> Option<(Arc<User>, Timestamp)> {
        let index = self.read();
        index
            .lookup(token)
            .map(|(user, timestamp)| (Arc::clone(user), timestamp))
    }

    /// Run one refresh cycle now.
    pub fn refresh(&self) -> RefreshOutcome {
        let (outcome, tokens) = {
            let mut index = self.write();
            let now = self.clock.now();
            let outcome = index.refresh(now, self.cache_duration);
            (outcome, index.stats().tokens)
        };

        debug!(
            generated = outcome.generated,
            pruned = outcome.pruned,
            tokens,
            "Refreshed token index"
        );
        outcome
    }

    /// Start the background refresher.
    ///
    /// Runs [`refresh`](Self::refresh) every update interval until `cancel`
    /// fires. Cancellation is observed between cycles only.
    pub fn start_refresh_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let validator = Arc::clone(self);
        let period = self.update_interval;
        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Token refresher started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        validator.refresh();
                    }
                }
            }
            info!("Token refresher stopped");
        })
    }

    pub fn stats(&self) -> IndexStats {
        self.read().stats()
    }

    pub fn base_time(&self) -> Timestamp {
        self.read().base_time()
    }

    pub fn cache_duration(&self) -> u64 {
        self.cache_duration
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    fn read(&self) -> RwLockReadGuard<'_, CredentialIndex<H>> {
        // Recover from lock poisoning; every insert leaves the map consistent.
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CredentialIndex<H>> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}
