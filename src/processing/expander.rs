//! Address expansion: one free address row per IP of a new range.

use crate::error::PoolError;
use crate::models::{ip_iter, range_size, RangeId, StorageIp, ZoneId};
use crate::store::{MacCounter, RangeTransaction};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Write a free address for every IP in `[start, end]`, ascending, inside `tx`.
///
/// Each address draws its MAC from the zone counter. The first failure aborts
/// the whole sequence; the caller rolls back `tx`.
pub async fn expand<T, M>(
    tx: &mut T,
    macs: &M,
    range_id: RangeId,
    start: Ipv4Addr,
    end: Ipv4Addr,
    zone_id: ZoneId,
) -> Result<Vec<StorageIp>, PoolError>
where
    T: RangeTransaction + ?Sized,
    M: MacCounter + ?Sized,
{
    expand_missing(tx, macs, range_id, start, end, zone_id, &HashSet::new()).await
}

/// Like [`expand`], but skips IPs that already have a row in the range.
pub async fn expand_missing<T, M>(
    tx: &mut T,
    macs: &M,
    range_id: RangeId,
    start: Ipv4Addr,
    end: Ipv4Addr,
    zone_id: ZoneId,
    existing: &HashSet<Ipv4Addr>,
) -> Result<Vec<StorageIp>, PoolError>
where
    T: RangeTransaction + ?Sized,
    M: MacCounter + ?Sized,
{
    log::debug!(
        "Expanding range {range_id} {start}-{end} ({} addresses, {} already present)",
        range_size(start, end),
        existing.len()
    );

    let mut created = Vec::new();
    for ip in ip_iter(start, end).filter(|ip| !existing.contains(ip)) {
        let mac = macs.next_mac(zone_id).await?;
        let address = StorageIp::free(range_id, ip, mac);
        tx.insert_address(address.clone()).await?;
        created.push(address);
    }
    Ok(created)
}
