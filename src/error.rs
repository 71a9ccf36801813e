//! Error taxonomy for storage pool operations.

use crate::store::LockKey;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Which existing interval a candidate range collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapKind {
    /// The pod's declared private IP range.
    Private,
    /// Another storage range of the same pod.
    Storage,
}

impl fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapKind::Private => write!(f, "private"),
            OverlapKind::Storage => write!(f, "storage"),
        }
    }
}

/// Errors surfaced by the storage pool. None of them are recovered silently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Referenced pod, zone or range does not exist.
    #[error("cannot find {kind} {id}")]
    NotFound { kind: &'static str, id: u64 },
    /// Malformed netmask, address or interval.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Candidate interval collides with an existing one.
    #[error("storage range overlaps {kind} IP range {start}-{end}")]
    Overlap {
        kind: OverlapKind,
        start: Ipv4Addr,
        end: Ipv4Addr,
    },
    /// Mutation of a range with claimed addresses, or ambiguous zone topology.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Advisory lock could not be acquired in time.
    #[error("unable to acquire lock on {key}")]
    LockUnavailable { key: LockKey },
    /// Underlying persistence error.
    #[error("storage fault: {0}")]
    StorageFault(String),
}

impl PoolError {
    pub fn range_not_found(id: u64) -> Self {
        PoolError::NotFound {
            kind: "storage ip range",
            id,
        }
    }

    pub fn pod_not_found(id: u64) -> Self {
        PoolError::NotFound { kind: "pod", id }
    }

    pub fn zone_not_found(id: u64) -> Self {
        PoolError::NotFound { kind: "zone", id }
    }
}
