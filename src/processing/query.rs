//! Read-only views over the pool.

use crate::error::PoolError;
use crate::models::{IpRange, RangeFilter, RangeQuery, ZoneId};
use crate::store::RangeStore;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Address counts of one range.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RangeUsage {
    pub range: IpRange,
    pub total: u64,
    pub claimed: Vec<Ipv4Addr>,
}

impl RangeUsage {
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.claimed.len() as u64)
    }
}

/// Ranges matching the most specific filter of `query`; all ranges when it is empty.
pub async fn list_ranges<S>(store: &S, query: &RangeQuery) -> Result<Vec<IpRange>, PoolError>
where
    S: RangeStore + ?Sized,
{
    store.list_ranges(query.filter()).await
}

/// True iff the zone has at least one storage range.
pub async fn is_pool_configured<S>(store: &S, zone_id: ZoneId) -> Result<bool, PoolError>
where
    S: RangeStore + ?Sized,
{
    let ranges = store.list_ranges(RangeFilter::Zone(zone_id)).await?;
    Ok(!ranges.is_empty())
}

/// True iff any range in the zone has a claimed address.
pub async fn has_claimed_addresses<S>(store: &S, zone_id: ZoneId) -> Result<bool, PoolError>
where
    S: RangeStore + ?Sized,
{
    for range in store.list_ranges(RangeFilter::Zone(zone_id)).await? {
        if !store.claimed_addresses(range.id).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn range_usage<S>(store: &S, query: &RangeQuery) -> Result<Vec<RangeUsage>, PoolError>
where
    S: RangeStore + ?Sized,
{
    let mut usage = Vec::new();
    for range in list_ranges(store, query).await? {
        let total = store.list_addresses(range.id).await?.len() as u64;
        let claimed = store.claimed_addresses(range.id).await?;
        usage.push(RangeUsage {
            range,
            total,
            claimed,
        });
    }
    Ok(usage)
}
