//! Static zone/pod/network directory loaded from a JSON file.
//!
//! Stands in for the datacenter's topology service: it answers pod lookups,
//! lists a zone's storage networks and hands out the zone MAC counter.

use super::{MacCounter, NetworkDirectory, Pod, PodDirectory};
use crate::error::PoolError;
use crate::models::{CreateRangeRequest, MacAddress, NetworkId, PodId, ZoneId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ZoneSpec {
    pub id: ZoneId,
    pub name: String,
    /// First value the zone's MAC counter hands out.
    #[serde(default)]
    pub mac_base: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    /// Private IP range descriptor, e.g. `"10.0.0.1-10.0.0.50"`. May be empty.
    #[serde(default)]
    pub private_range: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrafficType {
    Storage,
    Management,
    Public,
    Guest,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub id: NetworkId,
    pub zone_id: ZoneId,
    pub traffic_type: TrafficType,
}

/// A range to create when the topology is loaded.
pub type RangeSeed = CreateRangeRequest;

/// Topology document as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Topology {
    pub zones: Vec<ZoneSpec>,
    pub pods: Vec<PodSpec>,
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub ranges: Vec<RangeSeed>,
}

/// Read a topology document from a JSON file.
///
/// # Arguments
/// * `file` - Path of the topology file
///
/// # Returns
/// * `Ok(Topology)` - The parsed topology
/// * `Err` - If the file is missing or does not parse; the error names the failing JSON path
pub fn read_topology(file: &str) -> Result<Topology, Box<dyn Error>> {
    if !Path::new(file).exists() {
        return Err(format!("Topology file does not exist: {file}").into());
    }
    log::info!("Reading topology file: {file}");

    let json =
        std::fs::read_to_string(file).map_err(|e| format!("Error reading {file}: {e}"))?;
    let mut deserializer = serde_json::Deserializer::from_str(&json);
    let topology: Topology = serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| format!("Error parsing topology {file} at '{}': {}", e.path(), e.inner()))?;

    log::info!(
        "Loaded {} zones, {} pods, {} networks, {} seed ranges",
        topology.zones.len(),
        topology.pods.len(),
        topology.networks.len(),
        topology.ranges.len()
    );
    Ok(topology)
}

/// In-process directory over a [`Topology`].
#[derive(Debug)]
pub struct StaticTopology {
    topology: Topology,
    mac_counters: Mutex<HashMap<ZoneId, u64>>,
}

impl StaticTopology {
    pub fn new(topology: Topology) -> StaticTopology {
        let mac_counters = topology
            .zones
            .iter()
            .map(|zone| (zone.id, zone.mac_base))
            .collect();
        StaticTopology {
            topology,
            mac_counters: Mutex::new(mac_counters),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

#[async_trait]
impl PodDirectory for StaticTopology {
    async fn get_pod(&self, pod_id: PodId) -> Result<Pod, PoolError> {
        self.topology
            .pods
            .iter()
            .find(|pod| pod.id == pod_id)
            .map(|pod| Pod {
                id: pod.id,
                zone_id: pod.zone_id,
                private_range: pod.private_range.clone(),
            })
            .ok_or_else(|| PoolError::pod_not_found(pod_id))
    }
}

#[async_trait]
impl NetworkDirectory for StaticTopology {
    async fn list_storage_networks(&self, zone_id: ZoneId) -> Result<Vec<NetworkId>, PoolError> {
        Ok(self
            .topology
            .networks
            .iter()
            .filter(|nw| nw.zone_id == zone_id && nw.traffic_type == TrafficType::Storage)
            .map(|nw| nw.id)
            .collect())
    }
}

#[async_trait]
impl MacCounter for StaticTopology {
    async fn next_mac(&self, zone_id: ZoneId) -> Result<MacAddress, PoolError> {
        let mut counters = self.mac_counters.lock().await;
        let counter = counters
            .get_mut(&zone_id)
            .ok_or_else(|| PoolError::zone_not_found(zone_id))?;
        let mac = MacAddress(*counter);
        *counter = counter.checked_add(1).ok_or_else(|| {
            PoolError::StorageFault(format!("MAC counter of zone {zone_id} is exhausted"))
        })?;
        Ok(mac)
    }
}
