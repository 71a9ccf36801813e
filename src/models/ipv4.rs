//! IPv4 address and interval utilities.
//!
//! Storage ranges are closed intervals `[start, end]` of IPv4 addresses. These
//! helpers do the integer arithmetic on them.

use crate::error::PoolError;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length for an IPv4 subnet mask (32 bits).
pub const MAX_LENGTH: u8 = 32;

/// Convert a CIDR prefix length to a subnet mask as u32.
///
/// # Examples
/// ```
/// use storage_ip_pool::models::get_cidr_mask;
/// assert_eq!(get_cidr_mask(24).unwrap(), 0xFFFFFF00);
/// ```
pub fn get_cidr_mask(len: u8) -> Result<u32, PoolError> {
    if len > MAX_LENGTH {
        Err(PoolError::InvalidInput(format!(
            "network length /{len} is too long"
        )))
    } else {
        let right_len = MAX_LENGTH - len;
        let all_bits = u32::MAX as u64;

        let mask = (all_bits >> right_len) << right_len;

        Ok(mask as u32)
    }
}

/// Prefix length of a netmask, or None if the ones are not contiguous.
///
/// `0.0.0.0` is not a usable netmask and also yields None.
pub fn netmask_len(netmask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(netmask);
    (1..=MAX_LENGTH).find(|len| get_cidr_mask(*len).map_or(false, |mask| mask == bits))
}

/// True if `netmask` is a contiguous run of leading ones (`255.255.255.0`, ..).
pub fn is_valid_netmask(netmask: Ipv4Addr) -> bool {
    netmask_len(netmask).is_some()
}

/// Closed-interval overlap test: `[a, b]` and `[c, d]` overlap iff `a <= d && c <= b`.
pub fn ranges_overlap(a: Ipv4Addr, b: Ipv4Addr, c: Ipv4Addr, d: Ipv4Addr) -> bool {
    u32::from(a) <= u32::from(d) && u32::from(c) <= u32::from(b)
}

/// Number of addresses in the closed interval `[start, end]`.
pub fn range_size(start: Ipv4Addr, end: Ipv4Addr) -> u64 {
    let (start, end) = (u32::from(start) as u64, u32::from(end) as u64);
    if end < start {
        0
    } else {
        end - start + 1
    }
}

/// Iterate `[start, end]` in ascending numeric order.
pub fn ip_iter(start: Ipv4Addr, end: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    (u32::from(start)..=u32::from(end)).map(Ipv4Addr::from)
}

/// Parse a pod private-range descriptor such as `"10.0.0.1-10.0.0.50"`.
///
/// Returns None when the descriptor is not two valid IPv4 endpoints, which
/// callers treat as "no private range configured".
pub fn parse_ip_range(descriptor: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (start, end) = descriptor.split_once('-')?;
    let start = Ipv4Addr::from_str(start.trim()).ok()?;
    let end = Ipv4Addr::from_str(end.trim()).ok()?;
    Some((start, end))
}

/// Parse a dotted-quad address supplied by a caller.
pub fn parse_ipv4(value: &str, field: &str) -> Result<Ipv4Addr, PoolError> {
    Ipv4Addr::from_str(value.trim())
        .map_err(|_| PoolError::InvalidInput(format!("invalid {field} address: {value:?}")))
}

/// Parse a netmask supplied by a caller, rejecting non-contiguous masks.
pub fn parse_netmask(value: &str) -> Result<Ipv4Addr, PoolError> {
    let netmask = Ipv4Addr::from_str(value.trim())
        .map_err(|_| PoolError::InvalidInput(format!("invalid netmask: {value:?}")))?;
    if !is_valid_netmask(netmask) {
        return Err(PoolError::InvalidInput(format!("invalid netmask: {value}")));
    }
    Ok(netmask)
}

/// Reject intervals whose start lies above their end.
pub fn check_interval(start: Ipv4Addr, end: Ipv4Addr) -> Result<(), PoolError> {
    if u32::from(start) > u32::from(end) {
        return Err(PoolError::InvalidInput(format!(
            "start address {start} is greater than end address {end}"
        )));
    }
    Ok(())
}
