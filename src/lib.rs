//! Storage-network IP pool.
//!
//! Manages ranges of IPv4 addresses on a zone's storage network, per pod,
//! and hands out individual addresses to storage agents:
//! - [`models`] - Ranges, addresses and IPv4 helpers
//! - [`store`] - Collaborator traits plus in-memory and static-topology implementations
//! - [`processing`] - Overlap checks, expansion, locking, lifecycle, allocation, queries
//! - [`pool`] - [`StoragePool`], the operations callers use
//! - [`output`] - Terminal and CSV rendering of pool usage

pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod pool;
pub mod processing;
pub mod store;

pub use config::PoolConfig;
pub use error::{OverlapKind, PoolError};
pub use pool::StoragePool;
pub use processing::RangeUsage;
