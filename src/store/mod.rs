//! External collaborators of the storage pool.
//!
//! The pool never reaches for global state; everything it needs is one of
//! these traits, handed in at construction:
//! - [`PodDirectory`], [`NetworkDirectory`], [`MacCounter`] - topology lookups
//! - [`RangeStore`] and [`RangeTransaction`] - persisted ranges and addresses
//! - [`LockManager`] - advisory locks keyed by range or pod
//!
//! Two implementations ship with the crate:
//! - [`memory`] - in-process store and lock table
//! - [`topology`] - static topology read from a JSON file

mod memory;
mod topology;

pub use memory::{MemoryLockGuard, MemoryStore, MemoryTransaction};
pub use topology::{
    read_topology, NetworkSpec, PodSpec, RangeSeed, StaticTopology, Topology, TrafficType,
    ZoneSpec,
};

use crate::error::PoolError;
use crate::models::{
    IpRange, MacAddress, NetworkId, NewRange, PodId, RangeFilter, RangeId, RangePatch, StorageIp,
    ZoneId,
};
use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Pod metadata as the directory returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub id: PodId,
    pub zone_id: ZoneId,
    /// Free-form private range descriptor, normally `"start-end"`.
    pub private_range: String,
}

#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// Fails with `NotFound` if the pod is unknown.
    async fn get_pod(&self, pod_id: PodId) -> Result<Pod, PoolError>;
}

#[async_trait]
pub trait NetworkDirectory: Send + Sync {
    /// Storage-typed logical networks of a zone.
    async fn list_storage_networks(&self, zone_id: ZoneId) -> Result<Vec<NetworkId>, PoolError>;
}

#[async_trait]
pub trait MacCounter: Send + Sync {
    /// Next value of the zone's monotonic MAC counter.
    async fn next_mac(&self, zone_id: ZoneId) -> Result<MacAddress, PoolError>;
}

/// Writes that must land atomically. Nothing is visible until [`commit`].
///
/// [`commit`]: RangeTransaction::commit
#[async_trait]
pub trait RangeTransaction: Send {
    /// Insert a range and return it with its assigned id.
    async fn insert_range(&mut self, range: NewRange) -> Result<IpRange, PoolError>;

    async fn insert_address(&mut self, address: StorageIp) -> Result<(), PoolError>;

    /// Overwrite the supplied fields of a range.
    async fn update_range(&mut self, range_id: RangeId, patch: RangePatch)
        -> Result<(), PoolError>;

    /// Drop the range's addresses that fall outside `[start, end]`.
    async fn retain_addresses(
        &mut self,
        range_id: RangeId,
        start: Ipv4Addr,
        end: Ipv4Addr,
    ) -> Result<(), PoolError>;

    async fn commit(self) -> Result<(), PoolError>;

    async fn rollback(self) -> Result<(), PoolError>;
}

/// Durable ranges and their addresses.
#[async_trait]
pub trait RangeStore: Send + Sync {
    type Tx: RangeTransaction;

    async fn begin(&self) -> Result<Self::Tx, PoolError>;

    async fn get_range(&self, range_id: RangeId) -> Result<Option<IpRange>, PoolError>;

    /// Ranges matching `filter`, ordered by id.
    async fn list_ranges(&self, filter: RangeFilter) -> Result<Vec<IpRange>, PoolError>;

    /// Addresses of a range, ordered by numeric IP.
    async fn list_addresses(&self, range_id: RangeId) -> Result<Vec<StorageIp>, PoolError>;

    /// Claimed IPs of a range, ordered by numeric IP.
    async fn claimed_addresses(&self, range_id: RangeId) -> Result<Vec<Ipv4Addr>, PoolError>;

    /// Remove a range; its addresses go with it.
    async fn delete_range(&self, range_id: RangeId) -> Result<(), PoolError>;

    /// Claim the lowest-numbered free address of a range for `owner`.
    async fn take_lowest_free(
        &self,
        range_id: RangeId,
        owner: &str,
    ) -> Result<Option<StorageIp>, PoolError>;

    /// Mark an address free. Unknown or already free addresses are left alone.
    async fn release_address(&self, range_id: RangeId, ip: Ipv4Addr) -> Result<(), PoolError>;
}

/// What an advisory lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// A single storage range. Serialises lifecycle and allocation on it.
    Range(RangeId),
    /// The set of ranges in a pod. Serialises overlap validation with inserts.
    Pod(PodId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Range(id) => write!(f, "storage ip range {id}"),
            LockKey::Pod(id) => write!(f, "pod {id}"),
        }
    }
}

/// Exclusive advisory locks.
#[async_trait]
pub trait LockManager: Send + Sync {
    type Guard: Send;

    /// Fails with `LockUnavailable` after `timeout`, or when a range lock is
    /// requested for a range that does not exist.
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<Self::Guard, PoolError>;

    async fn release(&self, guard: Self::Guard) -> Result<(), PoolError>;
}
