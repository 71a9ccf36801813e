//! Storage pool business logic.
//!
//! - [`overlap`] - Rejecting candidate intervals that collide with existing ones
//! - [`expander`] - Materialising one address row per IP of a range
//! - [`lock`] - Scoped range and pod locks
//! - [`lifecycle`] - Range create/update/delete
//! - [`allocator`] - Claiming and releasing addresses
//! - [`query`] - Read-only views

mod allocator;
mod expander;
mod lifecycle;
mod lock;
mod overlap;
mod query;

pub use allocator::AddressAllocator;
pub use expander::{expand, expand_missing};
pub use lifecycle::RangeManager;
pub use lock::LockCoordinator;
pub use overlap::{check_overlap, validate};
pub use query::{has_claimed_addresses, is_pool_configured, list_ranges, range_usage, RangeUsage};
