//! Storage IP address data model.

use super::RangeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// MAC value drawn from a zone's monotonic counter.
///
/// Only the low 48 bits are meaningful when rendered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub u64);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
        )
    }
}

/// One allocatable address owned by a storage range.
///
/// Free addresses have `taken == false` and no owner; claimed ones carry the
/// owner and the claim time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageIp {
    pub range_id: RangeId,
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    pub taken: bool,
    pub owner: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl StorageIp {
    /// A new unclaimed address record.
    pub fn free(range_id: RangeId, ip: Ipv4Addr, mac: MacAddress) -> StorageIp {
        StorageIp {
            range_id,
            ip,
            mac,
            taken: false,
            owner: None,
            claimed_at: None,
        }
    }

    pub fn claim(&mut self, owner: &str, at: DateTime<Utc>) {
        self.taken = true;
        self.owner = Some(owner.to_string());
        self.claimed_at = Some(at);
    }

    pub fn release(&mut self) {
        self.taken = false;
        self.owner = None;
        self.claimed_at = None;
    }
}

impl fmt::Display for StorageIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{} ({}) taken by {}", self.ip, self.mac, owner),
            None => write!(f, "{} ({}) free", self.ip, self.mac),
        }
    }
}
