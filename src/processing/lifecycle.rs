//! Storage range lifecycle: create, update, delete.
//!
//! A range is either absent or active; delete is terminal. Mutations of an
//! existing range run under its range lock, and anything that validates
//! overlap before writing runs under the pod lock (always taken first).

use super::{expander, overlap, LockCoordinator};
use crate::error::PoolError;
use crate::models::{
    check_interval, parse_ipv4, parse_netmask, CreateRangeRequest, IpRange, NetworkId, NewRange,
    RangeId, RangePatch, UpdateRangeRequest, ZoneId,
};
use crate::store::{
    LockManager, MacCounter, NetworkDirectory, PodDirectory, RangeStore, RangeTransaction,
};
use itertools::Itertools;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub struct RangeManager<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    locks: LockCoordinator<S>,
}

impl<S, D> RangeManager<S, D>
where
    S: RangeStore + LockManager,
    D: PodDirectory + NetworkDirectory + MacCounter,
{
    pub fn new(store: Arc<S>, directory: Arc<D>, locks: LockCoordinator<S>) -> Self {
        RangeManager {
            store,
            directory,
            locks,
        }
    }

    /// Create a range and all of its addresses atomically.
    ///
    /// # Returns
    /// * `Ok(IpRange)` - The persisted range
    /// * `Err(InvalidInput)` - Malformed address, netmask or interval
    /// * `Err(NotFound)` - Unknown pod
    /// * `Err(Conflict)` - Zone has no, or more than one, storage network
    /// * `Err(Overlap)` - Interval collides with the pod's private range or another storage range
    /// * `Err(StorageFault)` - Persisting failed; nothing was written
    pub async fn create(&self, request: &CreateRangeRequest) -> Result<IpRange, PoolError> {
        let start_ip = parse_ipv4(&request.start_ip, "start")?;
        let end_ip = match &request.end_ip {
            Some(end_ip) => parse_ipv4(end_ip, "end")?,
            None => start_ip,
        };
        let netmask = parse_netmask(&request.netmask)?;
        check_interval(start_ip, end_ip)?;
        let gateway = request
            .gateway
            .as_deref()
            .map(|gateway| parse_ipv4(gateway, "gateway"))
            .transpose()?;

        let pod = self.directory.get_pod(request.pod_id).await?;
        let network_id = self.storage_network(pod.zone_id).await?;

        let new_range = NewRange {
            zone_id: pod.zone_id,
            pod_id: pod.id,
            network_id,
            start_ip,
            end_ip,
            vlan: request.vlan,
            netmask,
            gateway,
        };
        self.locks
            .with_pod_lock(pod.id, || self.insert_validated(new_range))
            .await
    }

    async fn insert_validated(&self, new_range: NewRange) -> Result<IpRange, PoolError> {
        overlap::validate(
            &*self.directory,
            &*self.store,
            new_range.pod_id,
            new_range.start_ip,
            new_range.end_ip,
            None,
        )
        .await?;

        let mut tx = self.store.begin().await?;
        match self.insert_and_expand(&mut tx, new_range.clone()).await {
            Ok(range) => {
                tx.commit().await?;
                log::info!("Created storage {range} with {} addresses", range.size());
                Ok(range)
            }
            Err(e) => {
                log::debug!(
                    "Create storage network range failed. startIp={} endIp={} netmask={} zoneId={}: {e}",
                    new_range.start_ip,
                    new_range.end_ip,
                    new_range.netmask,
                    new_range.zone_id
                );
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("Rollback after failed create also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    async fn insert_and_expand(
        &self,
        tx: &mut S::Tx,
        new_range: NewRange,
    ) -> Result<IpRange, PoolError> {
        let range = tx.insert_range(new_range).await?;
        expander::expand(
            tx,
            &*self.directory,
            range.id,
            range.start_ip,
            range.end_ip,
            range.zone_id,
        )
        .await?;
        Ok(range)
    }

    /// The single storage network of a zone. Ambiguity is not auto-resolved.
    async fn storage_network(&self, zone_id: ZoneId) -> Result<NetworkId, PoolError> {
        let networks = self.directory.list_storage_networks(zone_id).await?;
        match networks.as_slice() {
            [network_id] => Ok(*network_id),
            [] => Err(PoolError::Conflict(format!(
                "cannot find storage network in zone {zone_id}"
            ))),
            _ => Err(PoolError::Conflict(format!(
                "found more than one storage network in zone {zone_id}, {} found",
                networks.len()
            ))),
        }
    }

    /// Apply a partial update to a range with no claimed addresses.
    ///
    /// When the interval changes, the address set follows it: rows outside the
    /// new bounds are dropped and rows for new IPs are created.
    pub async fn update(&self, request: &UpdateRangeRequest) -> Result<IpRange, PoolError> {
        let range_id = request.range_id;
        let patch = RangePatch {
            vlan: request.vlan,
            start_ip: request
                .start_ip
                .as_deref()
                .map(|ip| parse_ipv4(ip, "start"))
                .transpose()?,
            end_ip: request
                .end_ip
                .as_deref()
                .map(|ip| parse_ipv4(ip, "end"))
                .transpose()?,
            netmask: request.netmask.as_deref().map(parse_netmask).transpose()?,
        };

        self.ensure_unclaimed(range_id).await?;

        let range = self.current_range(range_id).await?;

        if patch.is_empty() {
            log::debug!("Nothing to update on range {range_id}");
            return Ok(range);
        }

        if patch.changes_interval() {
            // Another update may have moved the range while we queued for the
            // pod lock, so merge against what is stored now.
            self.locks
                .with_pod_lock(range.pod_id, || async {
                    let current = self.current_range(range_id).await?;
                    let merged = merge_interval(&current, &patch)?;
                    overlap::validate(
                        &*self.directory,
                        &*self.store,
                        current.pod_id,
                        merged.start_ip,
                        merged.end_ip,
                        Some(range_id),
                    )
                    .await?;
                    self.apply_locked(range_id, &patch).await
                })
                .await?;
        } else {
            self.apply_locked(range_id, &patch).await?;
        }

        let updated = self.current_range(range_id).await?;
        log::info!("Updated storage {updated}");
        Ok(updated)
    }

    async fn apply_locked(&self, range_id: RangeId, patch: &RangePatch) -> Result<(), PoolError> {
        self.locks
            .with_range_lock(range_id, || async {
                self.ensure_unclaimed(range_id).await?;
                let current = self.current_range(range_id).await?;
                merge_interval(&current, patch)?;

                let mut tx = self.store.begin().await?;
                match self.write_update(&mut tx, &current, patch).await {
                    Ok(()) => tx.commit().await,
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            log::warn!("Rollback after failed update also failed: {rollback_err}");
                        }
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn current_range(&self, range_id: RangeId) -> Result<IpRange, PoolError> {
        self.store
            .get_range(range_id)
            .await?
            .ok_or_else(|| PoolError::range_not_found(range_id))
    }

    async fn write_update(
        &self,
        tx: &mut S::Tx,
        current: &IpRange,
        patch: &RangePatch,
    ) -> Result<(), PoolError> {
        tx.update_range(current.id, patch.clone()).await?;
        if !patch.changes_interval() {
            return Ok(());
        }

        let mut updated = current.clone();
        updated.apply(patch);
        tx.retain_addresses(updated.id, updated.start_ip, updated.end_ip)
            .await?;

        let existing: HashSet<Ipv4Addr> = self
            .store
            .list_addresses(updated.id)
            .await?
            .into_iter()
            .map(|address| address.ip)
            .filter(|ip| updated.contains(*ip))
            .collect();
        let created = expander::expand_missing(
            tx,
            &*self.directory,
            updated.id,
            updated.start_ip,
            updated.end_ip,
            updated.zone_id,
            &existing,
        )
        .await?;
        log::debug!(
            "Range {} moved from {}-{} to {}-{}: kept {}, added {}",
            updated.id,
            current.start_ip,
            current.end_ip,
            updated.start_ip,
            updated.end_ip,
            existing.len(),
            created.len()
        );
        Ok(())
    }

    /// Delete a range with no claimed addresses. Its addresses go with it.
    pub async fn delete(&self, range_id: RangeId) -> Result<(), PoolError> {
        if self.store.get_range(range_id).await?.is_none() {
            return Err(PoolError::range_not_found(range_id));
        }
        self.ensure_unclaimed(range_id).await?;

        self.locks
            .with_range_lock(range_id, || async {
                self.ensure_unclaimed(range_id).await?;
                self.store.delete_range(range_id).await
            })
            .await?;
        log::info!("Deleted storage ip range {range_id}");
        Ok(())
    }

    async fn ensure_unclaimed(&self, range_id: RangeId) -> Result<(), PoolError> {
        let claimed = self.store.claimed_addresses(range_id).await?;
        if claimed.is_empty() {
            return Ok(());
        }
        let message = format!(
            "below IPs of range {range_id} are still in use: {}",
            claimed.iter().join(",")
        );
        log::warn!("Refusing to modify range {range_id}: {message}");
        Err(PoolError::Conflict(message))
    }
}

/// The range as it would be stored after `patch`, rejected if start > end.
fn merge_interval(current: &IpRange, patch: &RangePatch) -> Result<IpRange, PoolError> {
    let mut merged = current.clone();
    merged.apply(patch);
    check_interval(merged.start_ip, merged.end_ip)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverlapKind;
    use crate::models::RangeFilter;
    use crate::store::{read_topology, LockKey, MemoryStore, StaticTopology};
    use std::time::Duration;

    type Manager = RangeManager<MemoryStore, StaticTopology>;

    fn manager() -> (Manager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let topology = read_topology("src/tests/test_data/topology_01.json").unwrap();
        let directory = Arc::new(StaticTopology::new(topology));
        let locks = LockCoordinator::new(Arc::clone(&store), Duration::from_millis(200));
        (
            RangeManager::new(Arc::clone(&store), directory, locks),
            store,
        )
    }

    fn request(pod_id: u64, start: &str, end: Option<&str>) -> CreateRangeRequest {
        CreateRangeRequest {
            pod_id,
            start_ip: start.to_string(),
            end_ip: end.map(str::to_string),
            vlan: None,
            netmask: "255.255.255.0".to_string(),
            gateway: None,
        }
    }

    #[tokio::test]
    async fn test_create_expands_addresses() {
        let (manager, store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        assert_eq!(range.zone_id, 1);
        assert_eq!(range.network_id, 100);
        let addrs = store.list_addresses(range.id).await.unwrap();
        assert_eq!(addrs.len(), 10);
        assert!(addrs.iter().all(|a| range.contains(a.ip) && !a.taken));
    }

    #[tokio::test]
    async fn test_create_defaults_end_to_start() {
        let (manager, store) = manager();
        let range = manager.create(&request(10, "10.0.1.7", None)).await.unwrap();
        assert_eq!(range.start_ip, range.end_ip);
        assert_eq!(store.list_addresses(range.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (manager, _store) = manager();
        let mut bad_mask = request(10, "10.0.1.1", None);
        bad_mask.netmask = "255.0.255.0".to_string();
        assert!(matches!(
            manager.create(&bad_mask).await,
            Err(PoolError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.create(&request(10, "10.0.1.9", Some("10.0.1.1"))).await,
            Err(PoolError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.create(&request(10, "10.0.1", None)).await,
            Err(PoolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_create_topology_errors() {
        let (manager, _store) = manager();
        assert_eq!(
            manager.create(&request(99, "10.0.1.1", None)).await,
            Err(PoolError::pod_not_found(99))
        );
        // Zone 2 has two storage networks, zone 3 has none.
        assert!(matches!(
            manager.create(&request(20, "10.0.1.1", None)).await,
            Err(PoolError::Conflict(_))
        ));
        assert!(matches!(
            manager.create(&request(30, "10.0.1.1", None)).await,
            Err(PoolError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_create_overlap_leaves_store_unchanged() {
        let (manager, store) = manager();
        let err = manager
            .create(&request(10, "10.0.0.40", Some("10.0.0.60")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Overlap {
                kind: OverlapKind::Private,
                ..
            }
        ));

        manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let err = manager
            .create(&request(10, "10.0.1.10", Some("10.0.1.20")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Overlap {
                kind: OverlapKind::Storage,
                ..
            }
        ));
        assert_eq!(store.list_ranges(RangeFilter::All).await.unwrap().len(), 1);
        assert_eq!(store.address_count().await, 10);
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_storage_fault() {
        let (manager, store) = manager();
        store.fail_address_writes_after(4);
        let err = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::StorageFault(_)));
        assert!(store.list_ranges(RangeFilter::All).await.unwrap().is_empty());
        assert_eq!(store.address_count().await, 0);

        store.clear_faults();
        manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .expect("pod lock must have been released after the failed create");
    }

    #[tokio::test]
    async fn test_update_partial_fields() {
        let (manager, _store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let updated = manager
            .update(&UpdateRangeRequest {
                range_id: range.id,
                vlan: Some(42),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.vlan, Some(42));
        assert_eq!(updated.start_ip, range.start_ip);
        assert_eq!(updated.end_ip, range.end_ip);
        assert_eq!(updated.netmask, range.netmask);
    }

    #[tokio::test]
    async fn test_update_interval_reconciles_addresses() {
        let (manager, store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let before = store.list_addresses(range.id).await.unwrap();

        // Shift the window: drop .1-.4, keep .5-.10, add .11-.14.
        let updated = manager
            .update(&UpdateRangeRequest {
                range_id: range.id,
                start_ip: Some("10.0.1.5".to_string()),
                end_ip: Some("10.0.1.14".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let after = store.list_addresses(range.id).await.unwrap();
        assert_eq!(after.len() as u64, updated.size());
        assert!(after.iter().all(|a| updated.contains(a.ip)));
        // Surviving rows keep their MAC.
        assert_eq!(after[0].mac, before[4].mac);
    }

    #[tokio::test]
    async fn test_update_does_not_overlap_itself() {
        let (manager, _store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let updated = manager
            .update(&UpdateRangeRequest {
                range_id: range.id,
                end_ip: Some("10.0.1.20".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.end_ip, Ipv4Addr::new(10, 0, 1, 20));
    }

    #[tokio::test]
    async fn test_update_errors() {
        let (manager, _store) = manager();
        let first = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        manager
            .create(&request(10, "10.0.2.1", Some("10.0.2.10")))
            .await
            .unwrap();

        assert_eq!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: 999,
                    vlan: Some(1),
                    ..Default::default()
                })
                .await,
            Err(PoolError::range_not_found(999))
        );
        assert!(matches!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: first.id,
                    end_ip: Some("10.0.2.1".to_string()),
                    ..Default::default()
                })
                .await,
            Err(PoolError::Overlap { .. })
        ));
        assert!(matches!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: first.id,
                    netmask: Some("255.255.0.255".to_string()),
                    ..Default::default()
                })
                .await,
            Err(PoolError::InvalidInput(_))
        ));
        assert!(matches!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: first.id,
                    start_ip: Some("10.0.1.11".to_string()),
                    ..Default::default()
                })
                .await,
            Err(PoolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_claimed_range_is_immutable() {
        let (manager, store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let taken = store.take_lowest_free(range.id, "ssvm-1").await.unwrap().unwrap();

        let update = manager
            .update(&UpdateRangeRequest {
                range_id: range.id,
                vlan: Some(5),
                ..Default::default()
            })
            .await;
        match update {
            Err(PoolError::Conflict(message)) => assert!(message.contains("10.0.1.1")),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(matches!(
            manager.delete(range.id).await,
            Err(PoolError::Conflict(_))
        ));
        assert_eq!(store.get_range(range.id).await.unwrap(), Some(range.clone()));

        store.release_address(range.id, taken.ip).await.unwrap();
        manager.delete(range.id).await.unwrap();
        assert_eq!(store.get_range(range.id).await.unwrap(), None);
        assert_eq!(store.address_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_range() {
        let (manager, _store) = manager();
        assert_eq!(
            manager.delete(3).await,
            Err(PoolError::range_not_found(3))
        );
    }

    #[tokio::test]
    async fn test_queued_interval_updates_revalidate() {
        let (manager, store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();

        // Both updates queue on the pod lock. Each is valid on its own, but
        // together they would leave start above end.
        let guard = store
            .acquire(LockKey::Pod(10), Duration::from_millis(50))
            .await
            .unwrap();
        let raise_start = UpdateRangeRequest {
            range_id: range.id,
            start_ip: Some("10.0.1.8".to_string()),
            ..Default::default()
        };
        let lower_end = UpdateRangeRequest {
            range_id: range.id,
            end_ip: Some("10.0.1.5".to_string()),
            ..Default::default()
        };
        let (first, second, ()) = tokio::join!(
            manager.update(&raise_start),
            manager.update(&lower_end),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                store.release(guard).await.unwrap();
            }
        );

        let failures: Vec<_> = [&first, &second]
            .into_iter()
            .filter_map(|r| r.as_ref().err())
            .collect();
        assert_eq!(failures.len(), 1, "results: {first:?} / {second:?}");
        assert!(matches!(failures[0], PoolError::InvalidInput(_)));

        let stored = store.get_range(range.id).await.unwrap().unwrap();
        assert!(
            stored.start_ip <= stored.end_ip,
            "stored {}-{}",
            stored.start_ip,
            stored.end_ip
        );
        let addrs = store.list_addresses(range.id).await.unwrap();
        assert_eq!(addrs.len() as u64, stored.size());
    }

    #[tokio::test]
    async fn test_update_and_delete_fail_when_range_locked() {
        let (manager, store) = manager();
        let range = manager
            .create(&request(10, "10.0.1.1", Some("10.0.1.10")))
            .await
            .unwrap();
        let before = store.list_addresses(range.id).await.unwrap();

        let guard = store
            .acquire(LockKey::Range(range.id), Duration::from_millis(50))
            .await
            .unwrap();
        let key = LockKey::Range(range.id);
        assert_eq!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: range.id,
                    vlan: Some(7),
                    ..Default::default()
                })
                .await,
            Err(PoolError::LockUnavailable { key })
        );
        assert_eq!(
            manager
                .update(&UpdateRangeRequest {
                    range_id: range.id,
                    end_ip: Some("10.0.1.20".to_string()),
                    ..Default::default()
                })
                .await,
            Err(PoolError::LockUnavailable { key })
        );
        assert_eq!(
            manager.delete(range.id).await,
            Err(PoolError::LockUnavailable { key })
        );
        store.release(guard).await.unwrap();

        assert_eq!(store.get_range(range.id).await.unwrap(), Some(range.clone()));
        assert_eq!(store.list_addresses(range.id).await.unwrap(), before);

        // The pod lock taken by the interval update was released again.
        manager
            .create(&request(10, "10.0.2.1", Some("10.0.2.4")))
            .await
            .unwrap();
    }
}
