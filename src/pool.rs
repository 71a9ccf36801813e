//! [`StoragePool`]: the public face of the crate.
//!
//! Wires the range manager, the allocator and the read-only queries to one
//! store, one topology directory and one lock timeout.

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::models::{
    CreateRangeRequest, IpRange, PodId, RangeId, RangeQuery, StorageIp, UpdateRangeRequest,
    ZoneId,
};
use crate::processing::{self, AddressAllocator, LockCoordinator, RangeManager, RangeUsage};
use crate::store::{LockManager, MacCounter, NetworkDirectory, PodDirectory, RangeStore};
use std::sync::Arc;

pub struct StoragePool<S, D> {
    store: Arc<S>,
    ranges: RangeManager<S, D>,
    allocator: AddressAllocator<S>,
}

impl<S, D> StoragePool<S, D>
where
    S: RangeStore + LockManager,
    D: PodDirectory + NetworkDirectory + MacCounter,
{
    pub fn new(store: Arc<S>, directory: Arc<D>, config: &PoolConfig) -> Self {
        let locks = LockCoordinator::new(Arc::clone(&store), config.lock_timeout);
        StoragePool {
            ranges: RangeManager::new(Arc::clone(&store), directory, locks.clone()),
            allocator: AddressAllocator::new(Arc::clone(&store), locks),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_range(&self, request: &CreateRangeRequest) -> Result<IpRange, PoolError> {
        self.ranges.create(request).await
    }

    pub async fn update_range(&self, request: &UpdateRangeRequest) -> Result<IpRange, PoolError> {
        self.ranges.update(request).await
    }

    pub async fn delete_range(&self, range_id: RangeId) -> Result<(), PoolError> {
        self.ranges.delete(range_id).await
    }

    pub async fn list_ranges(&self, query: &RangeQuery) -> Result<Vec<IpRange>, PoolError> {
        processing::list_ranges(&*self.store, query).await
    }

    pub async fn list_addresses(&self, range_id: RangeId) -> Result<Vec<StorageIp>, PoolError> {
        if self.store.get_range(range_id).await?.is_none() {
            return Err(PoolError::range_not_found(range_id));
        }
        self.store.list_addresses(range_id).await
    }

    /// Claim a free address in the pod. `Ok(None)` when the pod is exhausted.
    pub async fn take_address(
        &self,
        pod_id: PodId,
        owner: &str,
    ) -> Result<Option<StorageIp>, PoolError> {
        self.allocator.take(pod_id, owner).await
    }

    pub async fn release_address(&self, address: &StorageIp) -> Result<(), PoolError> {
        self.allocator.release(address).await
    }

    pub async fn is_pool_configured(&self, zone_id: ZoneId) -> Result<bool, PoolError> {
        processing::is_pool_configured(&*self.store, zone_id).await
    }

    pub async fn has_claimed_addresses(&self, zone_id: ZoneId) -> Result<bool, PoolError> {
        processing::has_claimed_addresses(&*self.store, zone_id).await
    }

    pub async fn range_usage(&self, query: &RangeQuery) -> Result<Vec<RangeUsage>, PoolError> {
        processing::range_usage(&*self.store, query).await
    }

    /// Create each seed range in order. Failures are logged and skipped so one
    /// bad entry does not hide the rest.
    ///
    /// # Returns
    /// The ranges that were created.
    pub async fn seed(&self, seeds: &[CreateRangeRequest]) -> Vec<IpRange> {
        let mut created = Vec::new();
        for seed in seeds {
            match self.create_range(seed).await {
                Ok(range) => created.push(range),
                Err(e) => log::error!(
                    "Skipping seed range {}-{} in pod {}: {e}",
                    seed.start_ip,
                    seed.end_ip.as_deref().unwrap_or(&seed.start_ip),
                    seed.pod_id
                ),
            }
        }
        created
    }
}
