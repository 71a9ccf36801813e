//! Address allocation: claim the lowest free IP of a pod, release it later.

use super::LockCoordinator;
use crate::error::PoolError;
use crate::models::{PodId, RangeFilter, StorageIp};
use crate::store::{LockManager, RangeStore};
use std::sync::Arc;

pub struct AddressAllocator<S> {
    store: Arc<S>,
    locks: LockCoordinator<S>,
}

impl<S> AddressAllocator<S>
where
    S: RangeStore + LockManager,
{
    pub fn new(store: Arc<S>, locks: LockCoordinator<S>) -> Self {
        AddressAllocator { store, locks }
    }

    /// Claim a free address in the pod for `owner`.
    ///
    /// Ranges are tried in id order, and within a range the lowest free IP
    /// wins. Each attempt holds that range's lock.
    ///
    /// # Returns
    /// * `Ok(Some(StorageIp))` - The claimed address
    /// * `Ok(None)` - Every range of the pod is exhausted, or the pod has none
    /// * `Err(LockUnavailable)` - A range lock could not be had; no further ranges are tried
    pub async fn take(&self, pod_id: PodId, owner: &str) -> Result<Option<StorageIp>, PoolError> {
        let ranges = self.store.list_ranges(RangeFilter::Pod(pod_id)).await?;

        for range in ranges {
            let claimed = self
                .locks
                .with_range_lock(range.id, || self.store.take_lowest_free(range.id, owner))
                .await?;
            match claimed {
                Some(address) => {
                    log::info!("Pod {pod_id}: {owner} took {address}");
                    return Ok(Some(address));
                }
                None => log::debug!("Pod {pod_id}: {range} is exhausted"),
            }
        }

        log::info!("Pod {pod_id}: no free storage IP left");
        Ok(None)
    }

    /// Return an address to the free pool. Releasing a free or unknown
    /// address is a no-op.
    pub async fn release(&self, address: &StorageIp) -> Result<(), PoolError> {
        self.store
            .release_address(address.range_id, address.ip)
            .await?;
        log::info!("Released {} from range {}", address.ip, address.range_id);
        Ok(())
    }
}
