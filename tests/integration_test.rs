//! Integration tests for storage-ip-pool
//!
//! These tests drive the public `StoragePool` API over the in-memory store and
//! the test topology.

use futures::future::join_all;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use storage_ip_pool::models::{CreateRangeRequest, RangeQuery, UpdateRangeRequest};
use storage_ip_pool::output::usage_csv;
use storage_ip_pool::store::{read_topology, MemoryStore, StaticTopology};
use storage_ip_pool::{OverlapKind, PoolConfig, PoolError, StoragePool};

const TEST_TOPOLOGY: &str = "src/tests/test_data/topology_01.json";

type Pool = StoragePool<MemoryStore, StaticTopology>;

fn new_pool() -> Pool {
    let topology = read_topology(TEST_TOPOLOGY).expect("Failed to read test topology");
    let config = PoolConfig {
        lock_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    StoragePool::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticTopology::new(topology)),
        &config,
    )
}

fn range_request(pod_id: u64, start: &str, end: &str) -> CreateRangeRequest {
    CreateRangeRequest {
        pod_id,
        start_ip: start.to_string(),
        end_ip: Some(end.to_string()),
        vlan: Some(300),
        netmask: "255.255.255.0".to_string(),
        gateway: None,
    }
}

#[tokio::test]
async fn test_pod_scenario() {
    let pool = new_pool();

    // Collides with the pod's private range 10.0.0.1-10.0.0.50.
    let err = pool
        .create_range(&range_request(10, "10.0.0.40", "10.0.0.60"))
        .await
        .expect_err("Overlap with private range must be rejected");
    assert!(
        matches!(
            err,
            PoolError::Overlap {
                kind: OverlapKind::Private,
                ..
            }
        ),
        "Unexpected error {err:?}"
    );

    let range = pool
        .create_range(&range_request(10, "10.0.1.1", "10.0.1.10"))
        .await
        .expect("Failed to create range");
    let addresses = pool.list_addresses(range.id).await.unwrap();
    assert_eq!(addresses.len(), 10, "Expected one address per IP");
    assert!(addresses.iter().all(|a| !a.taken), "All addresses start free");

    let first = pool.take_address(10, "ssvm-1").await.unwrap().unwrap();
    assert_eq!(first.ip, Ipv4Addr::new(10, 0, 1, 1));
    let second = pool.take_address(10, "ssvm-2").await.unwrap().unwrap();
    assert_eq!(second.ip, Ipv4Addr::new(10, 0, 1, 2));

    pool.release_address(&first).await.unwrap();
    let again = pool.take_address(10, "ssvm-3").await.unwrap().unwrap();
    assert_eq!(again.ip, Ipv4Addr::new(10, 0, 1, 1), "Lowest free IP wins");
    assert_eq!(again.owner.as_deref(), Some("ssvm-3"));
}

#[tokio::test]
async fn test_create_then_list_by_pod() {
    let pool = new_pool();
    let a = pool
        .create_range(&range_request(10, "10.0.1.1", "10.0.1.10"))
        .await
        .unwrap();
    let b = pool
        .create_range(&range_request(11, "10.0.1.1", "10.0.1.4"))
        .await
        .expect("Same interval in another pod is allowed");

    assert_eq!(pool.list_ranges(&RangeQuery::by_pod(10)).await.unwrap(), vec![a.clone()]);
    assert_eq!(pool.list_ranges(&RangeQuery::by_pod(11)).await.unwrap(), vec![b.clone()]);
    assert_eq!(
        pool.list_ranges(&RangeQuery::by_zone(1)).await.unwrap(),
        vec![a.clone(), b.clone()]
    );
    assert_eq!(
        pool.list_ranges(&RangeQuery::default()).await.unwrap().len(),
        2
    );
    assert_eq!(pool.list_addresses(b.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_overlapping_create_leaves_store_unchanged() {
    let pool = new_pool();
    pool.create_range(&range_request(10, "10.0.1.1", "10.0.1.10"))
        .await
        .unwrap();
    let before = pool.range_usage(&RangeQuery::default()).await.unwrap();

    for (start, end) in [
        ("10.0.1.10", "10.0.1.20"),
        ("10.0.0.255", "10.0.1.1"),
        ("10.0.1.3", "10.0.1.4"),
        ("10.0.0.200", "10.0.2.0"),
    ] {
        let result = pool.create_range(&range_request(10, start, end)).await;
        assert!(
            matches!(
                result,
                Err(PoolError::Overlap {
                    kind: OverlapKind::Storage,
                    ..
                })
            ),
            "{start}-{end} should overlap, got {result:?}"
        );
    }
    assert_eq!(pool.range_usage(&RangeQuery::default()).await.unwrap(), before);
}

#[tokio::test]
async fn test_take_exhausts_then_returns_none() {
    let pool = new_pool();
    pool.create_range(&range_request(10, "10.0.1.1", "10.0.1.3"))
        .await
        .unwrap();
    pool.create_range(&range_request(10, "10.0.2.1", "10.0.2.2"))
        .await
        .unwrap();

    let mut seen = HashSet::new();
    while let Some(address) = pool.take_address(10, "ssvm").await.unwrap() {
        assert!(seen.insert(address.ip), "{} handed out twice", address.ip);
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(pool.take_address(10, "ssvm").await.unwrap(), None);
    assert!(pool.has_claimed_addresses(1).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_takes_are_unique() {
    let pool = new_pool();
    pool.create_range(&range_request(10, "10.0.1.1", "10.0.1.20"))
        .await
        .unwrap();

    let owners: Vec<String> = (0..30).map(|n| format!("ssvm-{n}")).collect();
    let results = join_all(owners.iter().map(|owner| pool.take_address(10, owner))).await;

    let taken: Vec<Ipv4Addr> = results
        .into_iter()
        .filter_map(|r| r.expect("Take should not fail"))
        .map(|a| a.ip)
        .collect();
    let unique: HashSet<&Ipv4Addr> = taken.iter().collect();
    assert_eq!(taken.len(), 20, "Only 20 addresses exist");
    assert_eq!(unique.len(), 20, "No address handed out twice");
}

#[tokio::test]
async fn test_concurrent_creates_in_one_pod() {
    let pool = new_pool();
    let requests = [
        range_request(10, "10.0.1.1", "10.0.1.10"),
        range_request(10, "10.0.1.5", "10.0.1.15"),
        range_request(10, "10.0.1.8", "10.0.1.9"),
    ];
    let results = join_all(requests.iter().map(|r| pool.create_range(r))).await;
    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1, "Mutually overlapping creates: exactly one wins");
    assert_eq!(
        pool.list_ranges(&RangeQuery::by_pod(10)).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_claimed_range_cannot_change() {
    let pool = new_pool();
    let range = pool
        .create_range(&range_request(10, "10.0.1.1", "10.0.1.10"))
        .await
        .unwrap();
    let taken = pool.take_address(10, "ssvm").await.unwrap().unwrap();

    let update = UpdateRangeRequest {
        range_id: range.id,
        vlan: Some(999),
        ..Default::default()
    };
    assert!(matches!(
        pool.update_range(&update).await,
        Err(PoolError::Conflict(_))
    ));
    assert!(matches!(
        pool.delete_range(range.id).await,
        Err(PoolError::Conflict(_))
    ));
    assert_eq!(
        pool.list_ranges(&RangeQuery::by_range(range.id)).await.unwrap(),
        vec![range.clone()],
        "Store must be unchanged"
    );

    pool.release_address(&taken).await.unwrap();
    pool.release_address(&taken).await.expect("Release is idempotent");
    let updated = pool.update_range(&update).await.unwrap();
    assert_eq!(updated.vlan, Some(999));

    pool.delete_range(range.id).await.unwrap();
    assert!(pool
        .list_ranges(&RangeQuery::by_pod(10))
        .await
        .unwrap()
        .is_empty());
    assert!(!pool.is_pool_configured(1).await.unwrap());
    assert_eq!(
        pool.delete_range(range.id).await,
        Err(PoolError::range_not_found(range.id))
    );
}

#[tokio::test]
async fn test_update_interval_follows_addresses() {
    let pool = new_pool();
    let range = pool
        .create_range(&range_request(10, "10.0.1.1", "10.0.1.10"))
        .await
        .unwrap();

    let shrunk = pool
        .update_range(&UpdateRangeRequest {
            range_id: range.id,
            end_ip: Some("10.0.1.5".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let addresses = pool.list_addresses(range.id).await.unwrap();
    assert_eq!(addresses.len(), 5);
    assert!(addresses.iter().all(|a| shrunk.contains(a.ip)));

    let grown = pool
        .update_range(&UpdateRangeRequest {
            range_id: range.id,
            end_ip: Some("10.0.1.30".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pool.list_addresses(range.id).await.unwrap().len() as u64, grown.size());
}

#[tokio::test]
async fn test_seed_and_csv_usage() {
    let topology = read_topology(TEST_TOPOLOGY).unwrap();
    let seeds = topology.ranges.clone();
    let pool = StoragePool::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticTopology::new(topology)),
        &PoolConfig::default(),
    );
    assert_eq!(pool.seed(&seeds).await.len(), 1);
    pool.take_address(10, "ssvm").await.unwrap();

    let usage = pool.range_usage(&RangeQuery::by_zone(1)).await.unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!((usage[0].total, usage[0].claimed.len()), (10, 1));

    let csv = usage_csv(&usage);
    assert_eq!(csv.lines().count(), 2, "Header plus one row");
    assert!(csv.contains("\"10.0.1.1\""));
}
