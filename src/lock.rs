use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub const POLL_LOCK_NAME: &str = "pollNotificationsLock";
pub const TIDY_LOCK_NAME: &str = "tidyNotificationsLock";

/// A held lock. Only the owner that acquired it can shorten it on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub owner: String,
}

// Fleet-wide named leases. Expiry is always bounded by `lock_at_most`, so a
// crashed holder never wedges the lock.
#[trait_variant::make(LeaseProvider: Send)]
pub trait LocalLeaseProvider {
    /// Returns `None` when another holder's lease is still live.
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        lock_at_most: Duration,
    ) -> Result<Option<Lease>, StoreError>;

    /// Pushes expiry to `now + lock_at_most`. Returns false when the lease
    /// already lapsed or passed to another owner.
    async fn renew(&self, lease: &Lease, lock_at_most: Duration) -> Result<bool, StoreError>;

    /// Keeps the lease until at least `locked_at + lock_at_least`, then frees it.
    async fn release(&self, lease: &Lease, lock_at_least: Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct LockConfiguration {
    pub name: &'static str,
    pub lock_at_least: Duration,
    pub lock_at_most: Duration,
}

impl LockConfiguration {
    // Held for one minute less than the interval so an early finish cannot
    // let another instance start before the next scheduled tick
    pub fn for_poll(interval: Duration, lock_at_most: Duration) -> Self {
        Self {
            name: POLL_LOCK_NAME,
            lock_at_least: interval.saturating_sub(Duration::from_secs(60)),
            lock_at_most,
        }
    }

    pub fn for_tidy() -> Self {
        Self {
            name: TIDY_LOCK_NAME,
            lock_at_least: Duration::from_secs(10 * 60),
            lock_at_most: Duration::from_secs(60 * 60),
        }
    }
}

pub struct MutualExclusionScheduler<L> {
    provider: Arc<L>,
    owner: String,
}

impl<L> MutualExclusionScheduler<L>
where
    L: LeaseProvider + Sync,
{
    pub fn new(provider: Arc<L>, owner: impl Into<String>) -> Self {
        Self {
            provider,
            owner: owner.into(),
        }
    }

    /// Runs `task` only if this instance wins the named lease. `Ok(None)` means
    /// another instance holds it and this tick was skipped.
    pub async fn run_locked<F, Fut, T>(
        &self,
        lock: &LockConfiguration,
        task: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = match self
            .provider
            .try_acquire(lock.name, &self.owner, lock.lock_at_most)
            .await?
        {
            Some(lease) => lease,
            None => {
                debug!(lock = lock.name, "Lock held elsewhere, skipping run");
                return Ok(None);
            }
        };

        info!(lock = lock.name, owner = %self.owner, "Lock acquired");
        let output = self.run_renewing(&lease, lock, task()).await;

        // Failing to release is harmless: the lease lapses at lock_at_most
        if let Err(e) = self.provider.release(&lease, lock.lock_at_least).await {
            warn!(lock = lock.name, error = %e, "Failed to release lock");
        }

        Ok(Some(output))
    }

    // Renews at half of lock_at_most while the task runs, so a slow run keeps
    // the lease and a crashed one still loses it
    async fn run_renewing<Fut, T>(&self, lease: &Lease, lock: &LockConfiguration, task: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let period = (lock.lock_at_most / 2).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(task);

        loop {
            tokio::select! {
                output = &mut task => return output,
                _ = heartbeat.tick() => {
                    match self.provider.renew(lease, lock.lock_at_most).await {
                        Ok(true) => debug!(lock = lock.name, "Lock renewed"),
                        Ok(false) => warn!(lock = lock.name, "Lock lapsed before the run finished"),
                        Err(e) => warn!(lock = lock.name, error = %e, "Failed to renew lock"),
                    }
                }
            }
        }
    }
}
