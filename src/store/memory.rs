//! In-process range store and lock table.
//!
//! Writes go through [`MemoryTransaction`], which buffers them and applies the
//! whole batch under one write lock on commit. Advisory locks are one async
//! mutex per [`LockKey`].

use super::{LockKey, LockManager, RangeStore, RangeTransaction};
use crate::error::PoolError;
use crate::models::{IpRange, NewRange, RangeFilter, RangeId, RangePatch, StorageIp};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

const NO_FAULT: usize = usize::MAX;

#[derive(Debug, Default)]
struct MemoryState {
    ranges: BTreeMap<RangeId, IpRange>,
    /// Addresses per range, keyed (and so ordered) by IP.
    addresses: BTreeMap<RangeId, BTreeMap<Ipv4Addr, StorageIp>>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<MemoryState>,
    next_id: AtomicU64,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    fail_address_writes_after: AtomicUsize,
}

/// Shared, cloneable handle to an in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Inner {
                state: RwLock::new(MemoryState::default()),
                next_id: AtomicU64::new(1),
                locks: Mutex::new(HashMap::new()),
                fail_address_writes_after: AtomicUsize::new(NO_FAULT),
            }),
        }
    }

    /// Make every transaction fail its address write number `writes + 1`.
    pub fn fail_address_writes_after(&self, writes: usize) {
        self.inner
            .fail_address_writes_after
            .store(writes, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        self.inner
            .fail_address_writes_after
            .store(NO_FAULT, Ordering::SeqCst);
    }

    /// Total number of address rows across all ranges.
    pub async fn address_count(&self) -> usize {
        let state = self.inner.state.read().await;
        state.addresses.values().map(BTreeMap::len).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum TxOp {
    InsertRange(IpRange),
    InsertAddress(StorageIp),
    UpdateRange(RangeId, RangePatch),
    RetainAddresses {
        range_id: RangeId,
        start: Ipv4Addr,
        end: Ipv4Addr,
    },
}

/// Buffered writes against a [`MemoryStore`]. Dropping it discards them.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    ops: Vec<TxOp>,
    new_ranges: HashSet<RangeId>,
    new_addresses: HashSet<(RangeId, Ipv4Addr)>,
    address_writes: usize,
    fail_after: usize,
}

impl MemoryTransaction {
    async fn range_known(&self, range_id: RangeId) -> bool {
        self.new_ranges.contains(&range_id)
            || self.inner.state.read().await.ranges.contains_key(&range_id)
    }
}

#[async_trait]
impl RangeTransaction for MemoryTransaction {
    async fn insert_range(&mut self, range: NewRange) -> Result<IpRange, PoolError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let range = IpRange::from_new(id, range);
        self.new_ranges.insert(id);
        self.ops.push(TxOp::InsertRange(range.clone()));
        Ok(range)
    }

    async fn insert_address(&mut self, address: StorageIp) -> Result<(), PoolError> {
        if self.address_writes >= self.fail_after {
            return Err(PoolError::StorageFault(format!(
                "write of address {} rejected",
                address.ip
            )));
        }
        if !self.range_known(address.range_id).await {
            return Err(PoolError::StorageFault(format!(
                "address {} references missing range {}",
                address.ip, address.range_id
            )));
        }
        let key = (address.range_id, address.ip);
        let exists = self
            .inner
            .state
            .read()
            .await
            .addresses
            .get(&address.range_id)
            .map_or(false, |addrs| addrs.contains_key(&address.ip));
        if exists || !self.new_addresses.insert(key) {
            return Err(PoolError::StorageFault(format!(
                "duplicate address {} in range {}",
                address.ip, address.range_id
            )));
        }
        self.address_writes += 1;
        self.ops.push(TxOp::InsertAddress(address));
        Ok(())
    }

    async fn update_range(
        &mut self,
        range_id: RangeId,
        patch: RangePatch,
    ) -> Result<(), PoolError> {
        if !self.range_known(range_id).await {
            return Err(PoolError::range_not_found(range_id));
        }
        self.ops.push(TxOp::UpdateRange(range_id, patch));
        Ok(())
    }

    async fn retain_addresses(
        &mut self,
        range_id: RangeId,
        start: Ipv4Addr,
        end: Ipv4Addr,
    ) -> Result<(), PoolError> {
        if !self.range_known(range_id).await {
            return Err(PoolError::range_not_found(range_id));
        }
        self.ops.push(TxOp::RetainAddresses {
            range_id,
            start,
            end,
        });
        Ok(())
    }

    async fn commit(self) -> Result<(), PoolError> {
        let mut state = self.inner.state.write().await;

        // Validate everything before touching state so a commit lands whole or not at all.
        for op in &self.ops {
            let range_id = match op {
                TxOp::InsertRange(_) => continue,
                TxOp::InsertAddress(address) => address.range_id,
                TxOp::UpdateRange(range_id, _) => *range_id,
                TxOp::RetainAddresses { range_id, .. } => *range_id,
            };
            if !self.new_ranges.contains(&range_id) && !state.ranges.contains_key(&range_id) {
                return Err(PoolError::StorageFault(format!(
                    "range {range_id} was removed before commit"
                )));
            }
            if let TxOp::InsertAddress(address) = op {
                let taken = state
                    .addresses
                    .get(&range_id)
                    .map_or(false, |addrs| addrs.contains_key(&address.ip));
                if taken {
                    return Err(PoolError::StorageFault(format!(
                        "duplicate address {} in range {range_id}",
                        address.ip
                    )));
                }
            }
        }

        let op_count = self.ops.len();
        for op in self.ops {
            match op {
                TxOp::InsertRange(range) => {
                    state.addresses.entry(range.id).or_default();
                    state.ranges.insert(range.id, range);
                }
                TxOp::InsertAddress(address) => {
                    state
                        .addresses
                        .entry(address.range_id)
                        .or_default()
                        .insert(address.ip, address);
                }
                TxOp::UpdateRange(range_id, patch) => {
                    if let Some(range) = state.ranges.get_mut(&range_id) {
                        range.apply(&patch);
                    }
                }
                TxOp::RetainAddresses {
                    range_id,
                    start,
                    end,
                } => {
                    if let Some(addrs) = state.addresses.get_mut(&range_id) {
                        addrs.retain(|ip, _| start <= *ip && *ip <= end);
                    }
                }
            }
        }
        log::trace!("Committed transaction with {op_count} writes");
        Ok(())
    }

    async fn rollback(self) -> Result<(), PoolError> {
        log::trace!("Rolled back transaction with {} writes", self.ops.len());
        Ok(())
    }
}

#[async_trait]
impl RangeStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, PoolError> {
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            ops: Vec::new(),
            new_ranges: HashSet::new(),
            new_addresses: HashSet::new(),
            address_writes: 0,
            fail_after: self.inner.fail_address_writes_after.load(Ordering::SeqCst),
        })
    }

    async fn get_range(&self, range_id: RangeId) -> Result<Option<IpRange>, PoolError> {
        Ok(self.inner.state.read().await.ranges.get(&range_id).cloned())
    }

    async fn list_ranges(&self, filter: RangeFilter) -> Result<Vec<IpRange>, PoolError> {
        let state = self.inner.state.read().await;
        Ok(state
            .ranges
            .values()
            .filter(|range| filter.matches(range))
            .cloned()
            .collect())
    }

    async fn list_addresses(&self, range_id: RangeId) -> Result<Vec<StorageIp>, PoolError> {
        let state = self.inner.state.read().await;
        Ok(state
            .addresses
            .get(&range_id)
            .map(|addrs| addrs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn claimed_addresses(&self, range_id: RangeId) -> Result<Vec<Ipv4Addr>, PoolError> {
        let state = self.inner.state.read().await;
        Ok(state
            .addresses
            .get(&range_id)
            .map(|addrs| {
                addrs
                    .values()
                    .filter(|address| address.taken)
                    .map(|address| address.ip)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_range(&self, range_id: RangeId) -> Result<(), PoolError> {
        let mut state = self.inner.state.write().await;
        if state.ranges.remove(&range_id).is_none() {
            return Err(PoolError::range_not_found(range_id));
        }
        let removed = state
            .addresses
            .remove(&range_id)
            .map_or(0, |addrs| addrs.len());
        log::debug!("Removed range {range_id} and {removed} addresses");
        Ok(())
    }

    async fn take_lowest_free(
        &self,
        range_id: RangeId,
        owner: &str,
    ) -> Result<Option<StorageIp>, PoolError> {
        let mut state = self.inner.state.write().await;
        if !state.ranges.contains_key(&range_id) {
            return Err(PoolError::range_not_found(range_id));
        }
        let free = state
            .addresses
            .get_mut(&range_id)
            .and_then(|addrs| addrs.values_mut().find(|address| !address.taken));
        Ok(free.map(|address| {
            address.claim(owner, Utc::now());
            address.clone()
        }))
    }

    async fn release_address(&self, range_id: RangeId, ip: Ipv4Addr) -> Result<(), PoolError> {
        let mut state = self.inner.state.write().await;
        if let Some(address) = state
            .addresses
            .get_mut(&range_id)
            .and_then(|addrs| addrs.get_mut(&ip))
        {
            address.release();
        }
        Ok(())
    }
}

/// Held advisory lock. Dropping it also releases the lock.
#[derive(Debug)]
pub struct MemoryLockGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryLockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

#[async_trait]
impl LockManager for MemoryStore {
    type Guard = MemoryLockGuard;

    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<MemoryLockGuard, PoolError> {
        let lock = {
            let mut locks = self.inner.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };

        let guard = match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                log::warn!("Timed out after {timeout:?} waiting for lock on {key}");
                return Err(PoolError::LockUnavailable { key });
            }
        };

        // The row may have gone while we waited.
        if let LockKey::Range(range_id) = key {
            if !self.inner.state.read().await.ranges.contains_key(&range_id) {
                log::warn!("Cannot lock {key}: range no longer exists");
                drop(guard);
                self.inner.locks.lock().await.remove(&key);
                return Err(PoolError::LockUnavailable { key });
            }
        }

        Ok(MemoryLockGuard { key, _guard: guard })
    }

    async fn release(&self, guard: MemoryLockGuard) -> Result<(), PoolError> {
        let key = guard.key;
        drop(guard);

        if let LockKey::Range(range_id) = key {
            if !self.inner.state.read().await.ranges.contains_key(&range_id) {
                self.inner.locks.lock().await.remove(&key);
            }
        }
        Ok(())
    }
}
