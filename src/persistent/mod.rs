//! Persistent (immutable) data structures.
//!
//! This module provides [`PersistentSortedSet`], an immutable ordered set
//! that uses structural sharing to minimize copying.
//!
//! # Structural Sharing
//!
//! Every operation returns a new set; the portions of the tree untouched by
//! the operation are shared by reference between the old and new versions.
//! An operation that changes nothing (inserting a present element, removing
//! an absent one) hands back the original root unchanged, so "no-op" edits
//! are free and observable via pointer identity.
//!
//! # Examples
//!
//! ```rust
//! use ordset::persistent::PersistentSortedSet;
//!
//! let set = PersistentSortedSet::from_items([3, 1, 2]);
//! assert_eq!(set.to_vec(), vec![1, 2, 3]);
//!
//! // Structural sharing: the original set is preserved
//! let extended = set.insert(4);
//! assert_eq!(set.len(), 3);      // Original unchanged
//! assert_eq!(extended.len(), 4); // New version
//!
//! // Set operations
//! let other = PersistentSortedSet::from_items([2, 3, 4]);
//! assert_eq!(set.union(&other).to_vec(), vec![1, 2, 3, 4]);
//! assert_eq!(set.intersection(&other).to_vec(), vec![2, 3]);
//! assert_eq!(set.difference(&other).to_vec(), vec![1]);
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod sorted_set;

pub use sorted_set::IndexOutOfRangeError;
pub use sorted_set::PersistentSortedSet;
pub use sorted_set::PersistentSortedSetIntoIterator;
pub use sorted_set::PersistentSortedSetIterator;

// =============================================================================
// Tests
// =============================================================================
