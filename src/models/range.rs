//! Storage IP range data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub type RangeId = u64;
pub type PodId = u64;
pub type ZoneId = u64;
pub type NetworkId = u64;

/// A contiguous block of storage-network addresses inside one pod.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    /// Store-assigned identifier, stable for the life of the range.
    pub id: RangeId,
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    /// The zone's storage-typed logical network.
    pub network_id: NetworkId,
    /// First address of the range (inclusive).
    pub start_ip: Ipv4Addr,
    /// Last address of the range (inclusive).
    pub end_ip: Ipv4Addr,
    pub vlan: Option<u32>,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

impl IpRange {
    /// Build the persisted shape of a [`NewRange`] once the store has assigned an id.
    pub fn from_new(id: RangeId, new: NewRange) -> IpRange {
        IpRange {
            id,
            zone_id: new.zone_id,
            pod_id: new.pod_id,
            network_id: new.network_id,
            start_ip: new.start_ip,
            end_ip: new.end_ip,
            vlan: new.vlan,
            netmask: new.netmask,
            gateway: new.gateway,
        }
    }

    /// Number of addresses in the range.
    pub fn size(&self) -> u64 {
        super::range_size(self.start_ip, self.end_ip)
    }

    /// True if `ip` lies within `[start_ip, end_ip]`.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start_ip <= ip && ip <= self.end_ip
    }

    /// Overwrite the fields `patch` supplies, leaving the others untouched.
    pub fn apply(&mut self, patch: &RangePatch) {
        if let Some(vlan) = patch.vlan {
            self.vlan = Some(vlan);
        }
        if let Some(start_ip) = patch.start_ip {
            self.start_ip = start_ip;
        }
        if let Some(end_ip) = patch.end_ip {
            self.end_ip = end_ip;
        }
        if let Some(netmask) = patch.netmask {
            self.netmask = netmask;
        }
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "range {} [{}-{}] pod {} zone {}",
            self.id, self.start_ip, self.end_ip, self.pod_id, self.zone_id
        )
    }
}

/// A validated range that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRange {
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub network_id: NetworkId,
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
    pub vlan: Option<u32>,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

/// Partial update of a range. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePatch {
    pub vlan: Option<u32>,
    pub start_ip: Option<Ipv4Addr>,
    pub end_ip: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

impl RangePatch {
    pub fn is_empty(&self) -> bool {
        self == &RangePatch::default()
    }

    pub fn changes_interval(&self) -> bool {
        self.start_ip.is_some() || self.end_ip.is_some()
    }
}

/// Caller-facing create request. Addresses are still text at this point.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateRangeRequest {
    pub pod_id: PodId,
    pub start_ip: String,
    /// Defaults to `start_ip` (single-address range).
    #[serde(default)]
    pub end_ip: Option<String>,
    #[serde(default)]
    pub vlan: Option<u32>,
    pub netmask: String,
    #[serde(default)]
    pub gateway: Option<String>,
}

/// Caller-facing update request.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRangeRequest {
    pub range_id: RangeId,
    #[serde(default)]
    pub vlan: Option<u32>,
    #[serde(default)]
    pub start_ip: Option<String>,
    #[serde(default)]
    pub end_ip: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

/// Which ranges a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFilter {
    All,
    Zone(ZoneId),
    Pod(PodId),
    Range(RangeId),
}

impl RangeFilter {
    pub fn matches(&self, range: &IpRange) -> bool {
        match *self {
            RangeFilter::All => true,
            RangeFilter::Zone(zone_id) => range.zone_id == zone_id,
            RangeFilter::Pod(pod_id) => range.pod_id == pod_id,
            RangeFilter::Range(range_id) => range.id == range_id,
        }
    }
}

/// Listing query as callers supply it; any combination of ids may be set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub range_id: Option<RangeId>,
    pub pod_id: Option<PodId>,
    pub zone_id: Option<ZoneId>,
}

impl RangeQuery {
    pub fn by_range(range_id: RangeId) -> Self {
        RangeQuery {
            range_id: Some(range_id),
            ..Default::default()
        }
    }

    pub fn by_pod(pod_id: PodId) -> Self {
        RangeQuery {
            pod_id: Some(pod_id),
            ..Default::default()
        }
    }

    pub fn by_zone(zone_id: ZoneId) -> Self {
        RangeQuery {
            zone_id: Some(zone_id),
            ..Default::default()
        }
    }

    /// Most specific id wins: range > pod > zone > all.
    pub fn filter(&self) -> RangeFilter {
        match (self.range_id, self.pod_id, self.zone_id) {
            (Some(range_id), _, _) => RangeFilter::Range(range_id),
            (None, Some(pod_id), _) => RangeFilter::Pod(pod_id),
            (None, None, Some(zone_id)) => RangeFilter::Zone(zone_id),
            (None, None, None) => RangeFilter::All,
        }
    }
}
