//! # ordset
//!
//! A persistent (immutable) ordered set backed by a balanced binary search
//! tree with structural sharing.
//!
//! ## Overview
//!
//! This library provides [`PersistentSortedSet`], an ordered set whose every
//! operation returns a new set and leaves the original untouched. Unchanged
//! subtrees are shared between versions, so deriving a new set from an old
//! one costs O(log N) allocations rather than a full copy. On top of the
//! point operations the set offers:
//!
//! - **Order statistics**: rank-based indexed access (`get`, `fetch`,
//!   `position`) with negative-index support
//! - **Range slicing**: `slice` extracts a contiguous rank range, reusing
//!   whole subtrees where possible
//! - **Tree-aware bulk operations**: `union`, `intersection`, `difference`,
//!   and `symmetric_difference` partition the incoming elements over whole
//!   subtrees instead of looping element by element
//! - **Custom ordering**: a comparator or sort-key extractor fixed at
//!   construction time defines both order and membership
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for structural sharing, making sets
//!   `Send`/`Sync`
//! - `serde`: serialize/deserialize sets as ordered sequences
//!
//! ## Example
//!
//! ```rust
//! use ordset::PersistentSortedSet;
//!
//! let set = PersistentSortedSet::from_items(["A", "B", "C"]);
//! let smaller = set.remove(&"B");
//!
//! // The original is unaffected
//! assert_eq!(set.len(), 3);
//! assert_eq!(smaller.to_vec(), vec!["A", "C"]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use ordset::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;

pub use persistent::IndexOutOfRangeError;
pub use persistent::PersistentSortedSet;
