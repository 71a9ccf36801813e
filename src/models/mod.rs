//! Domain models for the storage IP pool.
//!
//! This module contains the core data structures used throughout the crate:
//! - `ipv4` helpers - interval arithmetic and netmask validation
//! - [`IpRange`] - a storage range within a pod
//! - [`StorageIp`] - one allocatable address of a range

mod address;
mod ipv4;
mod range;

// Re-export public types
pub use address::{MacAddress, StorageIp};
pub use ipv4::{
    check_interval, get_cidr_mask, ip_iter, is_valid_netmask, netmask_len, parse_ip_range,
    parse_ipv4, parse_netmask, range_size, ranges_overlap, MAX_LENGTH,
};
pub use range::{
    CreateRangeRequest, IpRange, NetworkId, NewRange, PodId, RangeFilter, RangeId, RangePatch,
    RangeQuery, UpdateRangeRequest, ZoneId,
};
