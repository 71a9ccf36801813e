//! Overlap detection for candidate storage ranges.
//!
//! A candidate `[start, end]` must not touch the pod's private IP range (when
//! that range is well formed) nor any other storage range of the same pod.

use crate::error::{OverlapKind, PoolError};
use crate::models::{parse_ip_range, ranges_overlap, IpRange, PodId, RangeFilter, RangeId};
use crate::store::{PodDirectory, RangeStore};
use std::net::Ipv4Addr;

/// Check a candidate interval against already-fetched pod state.
///
/// # Arguments
/// * `private_range` - The pod's private range descriptor; ignored if it does not parse
/// * `existing` - Storage ranges currently in the pod
/// * `skip` - Range to leave out of the comparison (the one being updated)
/// * `start`, `end` - The candidate interval
///
/// # Returns
/// * `Ok(())` - No conflict
/// * `Err(PoolError::Overlap)` - Carrying the first conflicting interval
pub fn check_overlap(
    private_range: &str,
    existing: &[IpRange],
    skip: Option<RangeId>,
    start: Ipv4Addr,
    end: Ipv4Addr,
) -> Result<(), PoolError> {
    match parse_ip_range(private_range) {
        Some((private_start, private_end)) => {
            if ranges_overlap(start, end, private_start, private_end) {
                return Err(PoolError::Overlap {
                    kind: OverlapKind::Private,
                    start: private_start,
                    end: private_end,
                });
            }
        }
        None => log::debug!(
            "Private range {private_range:?} is not configured, skipping private overlap check"
        ),
    }

    let conflict = existing
        .iter()
        .filter(|range| Some(range.id) != skip)
        .find(|range| ranges_overlap(start, end, range.start_ip, range.end_ip));

    match conflict {
        Some(range) => Err(PoolError::Overlap {
            kind: OverlapKind::Storage,
            start: range.start_ip,
            end: range.end_ip,
        }),
        None => Ok(()),
    }
}

/// Fetch the pod's private range and storage ranges, then run [`check_overlap`].
///
/// Takes no locks; callers that need the answer to stay true hold the pod lock.
pub async fn validate<D, S>(
    pods: &D,
    store: &S,
    pod_id: PodId,
    start: Ipv4Addr,
    end: Ipv4Addr,
    skip: Option<RangeId>,
) -> Result<(), PoolError>
where
    D: PodDirectory + ?Sized,
    S: RangeStore + ?Sized,
{
    let pod = pods.get_pod(pod_id).await?;
    let existing = store.list_ranges(RangeFilter::Pod(pod_id)).await?;

    check_overlap(&pod.private_range, &existing, skip, start, end).map_err(|e| {
        log::warn!("Rejected {start}-{end} in pod {pod_id}: {e}");
        e
    })
}
