//! Scoped advisory locking.
//!
//! Every mutation of a range runs inside [`LockCoordinator::with_range_lock`],
//! so operations on one range are serialised while different ranges proceed
//! in parallel.

use crate::error::PoolError;
use crate::models::{PodId, RangeId};
use crate::store::{LockKey, LockManager};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Acquires a lock, runs a closure, and always releases the lock afterwards.
#[derive(Debug)]
pub struct LockCoordinator<L> {
    locks: Arc<L>,
    timeout: Duration,
}

impl<L> Clone for LockCoordinator<L> {
    fn clone(&self) -> Self {
        LockCoordinator {
            locks: Arc::clone(&self.locks),
            timeout: self.timeout,
        }
    }
}

impl<L: LockManager> LockCoordinator<L> {
    pub fn new(locks: Arc<L>, timeout: Duration) -> Self {
        LockCoordinator { locks, timeout }
    }

    /// Run `f` while holding the lock on a single range.
    ///
    /// Fails with `LockUnavailable` without running `f` if the lock cannot be
    /// had within the timeout. No retry.
    pub async fn with_range_lock<T, F, Fut>(&self, range_id: RangeId, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        self.with_lock(LockKey::Range(range_id), f).await
    }

    /// Run `f` while holding the lock on a pod's set of ranges.
    pub async fn with_pod_lock<T, F, Fut>(&self, pod_id: PodId, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        self.with_lock(LockKey::Pod(pod_id), f).await
    }

    pub async fn with_lock<T, F, Fut>(&self, key: LockKey, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        let guard = self.locks.acquire(key, self.timeout).await?;
        log::trace!("Acquired lock on {key}");

        let result = f().await;

        let released = self.locks.release(guard).await;
        log::trace!("Released lock on {key}");
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                log::warn!("Releasing lock on {key} failed: {e}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                log::warn!("Releasing lock on {key} failed after error '{e}': {release_err}");
                Err(e)
            }
        }
    }
}
