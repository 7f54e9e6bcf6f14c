//! Persistent (immutable) ordered set based on an AVL tree.
//!
//! This module provides [`PersistentSortedSet`], an immutable ordered set
//! that uses structural sharing for efficient operations.
//!
//! # Overview
//!
//! `PersistentSortedSet` is based on a persistent AVL tree, a self-balancing
//! binary search tree that provides efficient ordered set operations.
//!
//! - O(log N) insert / remove / contains
//! - O(log N) rank-based indexed access (`get`, `fetch`, `position`)
//! - O(log N) first / last
//! - O(K + K·log(N/K)) bulk set operations (union, intersection, difference)
//! - O(log N + K) range slicing with whole-subtree reuse
//! - O(1) `len` and `is_empty`
//!
//! All operations return new sets without modifying the original, and
//! structural sharing ensures memory efficiency. An operation that changes
//! nothing returns a set sharing the original root, observable through
//! pointer identity.
//!
//! # Ordering and Membership
//!
//! Every set carries one comparator fixed at construction time. The
//! comparator defines both iteration order and membership: two elements
//! that compare equal are the *same* set member, regardless of any other
//! difference between them. The comparator must implement a total order;
//! a non-total or inconsistent comparator is a contract violation and the
//! resulting behavior is unspecified (this precondition is not checked at
//! runtime).
//!
//! # Examples
//!
//! ```rust
//! use ordset::persistent::PersistentSortedSet;
//!
//! let set = PersistentSortedSet::new()
//!     .insert(3)
//!     .insert(1)
//!     .insert(2);
//!
//! // Elements are always in sorted order
//! assert_eq!(set.to_vec(), vec![1, 2, 3]);
//!
//! // Rank-based access, negative indices count from the end
//! assert_eq!(set.get(0), Some(&1));
//! assert_eq!(set.get(-1), Some(&3));
//!
//! // Structural sharing: the original set is preserved
//! let smaller = set.remove(&2);
//! assert_eq!(set.len(), 3);
//! assert_eq!(smaller.to_vec(), vec![1, 3]);
//! ```
//!
//! # Internal Structure
//!
//! The AVL tree maintains the following invariants for every node:
//! 1. The cached height equals `1 + max(left height, right height)`
//! 2. The cached size equals `1 + left size + right size`
//! 3. The heights of the two subtrees differ by at most 1
//! 4. Every element in the left subtree compares less than the node's
//!    element, every element in the right subtree compares greater
//! 5. No two elements in the tree compare equal
//!
//! These invariants ensure the tree height is O(log N). The empty tree is
//! represented as `None`, a canonical zero-allocation sentinel shared by
//! every empty set and subtree.

use super::ReferenceCounter;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

// =============================================================================
// Comparator
// =============================================================================

/// The comparator function type stored in every set.
///
/// `Send + Sync` is required unconditionally so that sets remain
/// `Send`/`Sync` when the `arc` feature swaps `Rc` for `Arc`.
pub(crate) type ComparatorFn<T> = dyn Fn(&T, &T) -> Ordering + Send + Sync;

/// A shared, normalized two-argument ordering function.
///
/// Fixed at construction time; every handle derived from a set shares the
/// same comparator by reference, it is never re-derived per comparison.
pub(crate) type Comparator<T> = ReferenceCounter<ComparatorFn<T>>;

// =============================================================================
// Node Definition
// =============================================================================

/// A subtree: either empty (`None`) or an internal node.
///
/// `None` is the canonical empty representation. It is never allocated, so
/// every empty set and every empty subtree is the same sentinel value.
type Link<T> = Option<ReferenceCounter<Node<T>>>;

/// Internal node structure for the AVL tree.
///
/// `height` and `size` are cached at construction and never recomputed.
struct Node<T> {
    item: T,
    left: Link<T>,
    right: Link<T>,
    height: u32,
    size: usize,
}

#[inline]
fn link_height<T>(link: &Link<T>) -> u32 {
    link.as_deref().map_or(0, |node| node.height)
}

#[inline]
fn link_size<T>(link: &Link<T>) -> usize {
    link.as_deref().map_or(0, |node| node.size)
}

/// Height difference `left - right`; positive means left-leaning.
#[inline]
fn balance_factor<T>(node: &Node<T>) -> i64 {
    i64::from(link_height(&node.left)) - i64::from(link_height(&node.right))
}

/// Internal unvalidated constructor.
///
/// Computes the cached height and size from the children instead of
/// re-deriving them from scratch. Callers must supply children that already
/// satisfy the order invariant; this is never exposed outside the engine.
fn make_node<T>(item: T, left: Link<T>, right: Link<T>) -> Link<T> {
    let height = 1 + link_height(&left).max(link_height(&right));
    let size = 1 + link_size(&left) + link_size(&right);
    Some(ReferenceCounter::new(Node {
        item,
        left,
        right,
        height,
        size,
    }))
}

/// Checks whether two links point at the same node (or are both empty).
fn same_link<T>(first: &Link<T>, second: &Link<T>) -> bool {
    match (first, second) {
        (None, None) => true,
        (Some(first_node), Some(second_node)) => {
            ReferenceCounter::ptr_eq(first_node, second_node)
        }
        _ => false,
    }
}

// =============================================================================
// Tree Engine: Rotations and Rebalancing
// =============================================================================

/// Single right rotation: promotes the left child's element to the top.
fn rotate_right<T: Clone>(item: T, left_node: &Node<T>, right: Link<T>) -> Link<T> {
    let new_right = make_node(item, left_node.right.clone(), right);
    make_node(left_node.item.clone(), left_node.left.clone(), new_right)
}

/// Single left rotation: promotes the right child's element to the top.
fn rotate_left<T: Clone>(item: T, left: Link<T>, right_node: &Node<T>) -> Link<T> {
    let new_left = make_node(item, left, right_node.left.clone());
    make_node(right_node.item.clone(), new_left, right_node.right.clone())
}

/// Double (left-then-right) rotation using the left child's right element
/// as the new top.
fn rotate_left_right<T: Clone>(item: T, left_node: &Node<T>, right: Link<T>) -> Link<T> {
    // left.right is non-empty whenever the double-rotation path is taken
    match left_node.right.as_deref() {
        Some(pivot) => {
            let new_left = make_node(
                left_node.item.clone(),
                left_node.left.clone(),
                pivot.left.clone(),
            );
            let new_right = make_node(item, pivot.right.clone(), right);
            make_node(pivot.item.clone(), new_left, new_right)
        }
        None => rotate_right(item, left_node, right),
    }
}

/// Double (right-then-left) rotation, the mirror of [`rotate_left_right`].
fn rotate_right_left<T: Clone>(item: T, left: Link<T>, right_node: &Node<T>) -> Link<T> {
    match right_node.left.as_deref() {
        Some(pivot) => {
            let new_left = make_node(item, left, pivot.left.clone());
            let new_right = make_node(
                right_node.item.clone(),
                pivot.right.clone(),
                right_node.right.clone(),
            );
            make_node(pivot.item.clone(), new_left, new_right)
        }
        None => rotate_left(item, left, right_node),
    }
}

/// Rebuilds a node from a possibly height-unbalanced pair of children and
/// restores the AVL invariant.
///
/// Accepts children whose heights differ by up to 2 (the result of one
/// insert or remove below either side). The common case after small edits
/// is a plain rebuild with recomputed height and size.
fn rebalance<T: Clone>(item: T, left: Link<T>, right: Link<T>) -> Link<T> {
    let lean = i64::from(link_height(&left)) - i64::from(link_height(&right));
    if lean >= 2 {
        if let Some(left_node) = left.as_deref() {
            if balance_factor(left_node) >= 0 {
                return rotate_right(item, left_node, right);
            }
            return rotate_left_right(item, left_node, right);
        }
    }
    if lean <= -2 {
        if let Some(right_node) = right.as_deref() {
            if balance_factor(right_node) <= 0 {
                return rotate_left(item, left, right_node);
            }
            return rotate_right_left(item, left, right_node);
        }
    }
    make_node(item, left, right)
}

/// Joins two AVL trees of arbitrary relative height around a pivot element.
///
/// Every element of `left` must compare less than `item`, every element of
/// `right` greater. Descends the taller side until the heights are within
/// one, then rebalances on the way back up. This restores the AVL invariant
/// after bulk recombination, where subtree heights can diverge by far more
/// than the ±2 that [`rebalance`] alone handles.
fn join<T: Clone>(left: Link<T>, item: T, right: Link<T>) -> Link<T> {
    let left_height = link_height(&left);
    let right_height = link_height(&right);
    if left_height > right_height + 1 {
        if let Some(left_node) = left.as_deref() {
            let new_right = join(left_node.right.clone(), item, right);
            return rebalance(left_node.item.clone(), left_node.left.clone(), new_right);
        }
    }
    if right_height > left_height + 1 {
        if let Some(right_node) = right.as_deref() {
            let new_left = join(left, item, right_node.left.clone());
            return rebalance(right_node.item.clone(), new_left, right_node.right.clone());
        }
    }
    make_node(item, left, right)
}

/// Joins two AVL trees without a pivot, splicing the maximum of `left` into
/// the gap.
fn join_disjoint<T: Clone>(left: Link<T>, right: Link<T>) -> Link<T> {
    match left.as_deref() {
        None => right,
        Some(left_node) => {
            let (rest, pivot) = split_max(left_node);
            join(rest, pivot, right)
        }
    }
}

// =============================================================================
// Tree Engine: Point Operations
// =============================================================================

/// Removes and returns the maximum element of a non-empty subtree.
fn split_max<T: Clone>(node: &Node<T>) -> (Link<T>, T) {
    match node.right.as_deref() {
        None => (node.left.clone(), node.item.clone()),
        Some(right_node) => {
            let (rest, max_item) = split_max(right_node);
            (rebalance(node.item.clone(), node.left.clone(), rest), max_item)
        }
    }
}

/// Removes and returns the minimum element of a non-empty subtree.
fn split_min<T: Clone>(node: &Node<T>) -> (Link<T>, T) {
    match node.left.as_deref() {
        None => (node.right.clone(), node.item.clone()),
        Some(left_node) => {
            let (rest, min_item) = split_min(left_node);
            (rebalance(node.item.clone(), rest, node.right.clone()), min_item)
        }
    }
}

/// Inserts an element, returning the link unchanged (pointer-identical)
/// when an equal element is already present.
fn insert_link<T: Clone>(link: &Link<T>, item: T, compare: &ComparatorFn<T>) -> Link<T> {
    match link.as_deref() {
        None => make_node(item, None, None),
        Some(node) => match compare(&item, &node.item) {
            Ordering::Equal => link.clone(),
            Ordering::Less => {
                let new_left = insert_link(&node.left, item, compare);
                if same_link(&new_left, &node.left) {
                    return link.clone();
                }
                rebalance(node.item.clone(), new_left, node.right.clone())
            }
            Ordering::Greater => {
                let new_right = insert_link(&node.right, item, compare);
                if same_link(&new_right, &node.right) {
                    return link.clone();
                }
                rebalance(node.item.clone(), node.left.clone(), new_right)
            }
        },
    }
}

/// Removes an element, returning the link unchanged (pointer-identical)
/// when no equal element is present.
fn remove_link<T: Clone>(link: &Link<T>, item: &T, compare: &ComparatorFn<T>) -> Link<T> {
    match link.as_deref() {
        None => None,
        Some(node) => match compare(item, &node.item) {
            Ordering::Less => {
                let new_left = remove_link(&node.left, item, compare);
                if same_link(&new_left, &node.left) {
                    return link.clone();
                }
                rebalance(node.item.clone(), new_left, node.right.clone())
            }
            Ordering::Greater => {
                let new_right = remove_link(&node.right, item, compare);
                if same_link(&new_right, &node.right) {
                    return link.clone();
                }
                rebalance(node.item.clone(), node.left.clone(), new_right)
            }
            Ordering::Equal => remove_root(node),
        },
    }
}

/// Structural removal of a subtree's root element.
///
/// With one empty child the other child replaces the node directly. With
/// two children the replacement is spliced from the taller side: the
/// maximum of the left subtree when the left is taller or equal, otherwise
/// the minimum of the right subtree.
fn remove_root<T: Clone>(node: &Node<T>) -> Link<T> {
    match (node.left.as_deref(), node.right.as_deref()) {
        (None, _) => node.right.clone(),
        (_, None) => node.left.clone(),
        (Some(left_node), Some(right_node)) => {
            if left_node.height >= right_node.height {
                let (rest, replacement) = split_max(left_node);
                rebalance(replacement, rest, node.right.clone())
            } else {
                let (rest, replacement) = split_min(right_node);
                rebalance(replacement, node.left.clone(), rest)
            }
        }
    }
}

/// Standard BST membership descent.
fn contains_link<T>(link: &Link<T>, item: &T, compare: &ComparatorFn<T>) -> bool {
    let mut current = link;
    while let Some(node) = current.as_deref() {
        match compare(item, &node.item) {
            Ordering::Less => current = &node.left,
            Ordering::Greater => current = &node.right,
            Ordering::Equal => return true,
        }
    }
    false
}

fn min_item<T>(link: &Link<T>) -> Option<&T> {
    let node = link.as_deref()?;
    min_item(&node.left).or(Some(&node.item))
}

fn max_item<T>(link: &Link<T>) -> Option<&T> {
    let node = link.as_deref()?;
    max_item(&node.right).or(Some(&node.item))
}

// =============================================================================
// Tree Engine: Order Statistics
// =============================================================================

/// Returns the element at the given 0-based rank, descending by subtree
/// sizes.
fn item_at<T>(link: &Link<T>, rank: usize) -> Option<&T> {
    let node = link.as_deref()?;
    let left_size = link_size(&node.left);
    match rank.cmp(&left_size) {
        Ordering::Less => item_at(&node.left, rank),
        Ordering::Equal => Some(&node.item),
        Ordering::Greater => item_at(&node.right, rank - left_size - 1),
    }
}

/// Returns the 0-based rank of an element, accumulating left-subtree sizes
/// on right turns.
fn rank_of<T>(link: &Link<T>, item: &T, compare: &ComparatorFn<T>) -> Option<usize> {
    let node = link.as_deref()?;
    match compare(item, &node.item) {
        Ordering::Less => rank_of(&node.left, item, compare),
        Ordering::Equal => Some(link_size(&node.left)),
        Ordering::Greater => rank_of(&node.right, item, compare)
            .map(|rank| rank + link_size(&node.left) + 1),
    }
}

// =============================================================================
// Tree Engine: Slicing
// =============================================================================

/// Extracts the contiguous rank range `[start, start + length)` as a new
/// balanced tree.
///
/// A request covering a whole subtree returns that subtree
/// pointer-identical, so slices share structure with the source wherever
/// the boundaries allow.
fn slice_link<T: Clone>(link: &Link<T>, start: usize, length: usize) -> Link<T> {
    let Some(node) = link.as_deref() else {
        return None;
    };
    if length == 0 || start >= node.size {
        return None;
    }
    if start == 0 && length >= node.size {
        return link.clone();
    }
    let left_size = link_size(&node.left);
    let end = start.saturating_add(length);
    if end <= left_size {
        return slice_link(&node.left, start, length);
    }
    if start > left_size {
        return slice_link(&node.right, start - left_size - 1, length);
    }
    // The range spans the current element: slice both children to their
    // overlapping portions and join around it.
    let left_part = slice_link(&node.left, start, left_size - start);
    let right_part = slice_link(&node.right, 0, end - left_size - 1);
    join(left_part, node.item.clone(), right_part)
}

// =============================================================================
// Tree Engine: Bulk Operations
// =============================================================================

/// Splits `items` into the elements comparing less and greater than the
/// pivot in one comparator pass, reporting whether the pivot itself was
/// present. Elements comparing equal to the pivot land in neither bucket.
fn partition_by_pivot<T>(
    items: Vec<T>,
    pivot: &T,
    compare: &ComparatorFn<T>,
) -> (Vec<T>, Vec<T>, bool) {
    let mut lesser = Vec::new();
    let mut greater = Vec::new();
    let mut pivot_present = false;
    for item in items {
        match compare(&item, pivot) {
            Ordering::Less => lesser.push(item),
            Ordering::Greater => greater.push(item),
            Ordering::Equal => pivot_present = true,
        }
    }
    (lesser, greater, pivot_present)
}

/// Inserts a whole collection of elements at once.
///
/// Partitions the incoming collection around the current element and
/// recurses the two buckets into the two subtrees, so K incoming elements
/// cost one partition pass per level instead of K independent descents.
/// Subtrees that receive no work are returned pointer-identical.
fn bulk_insert_link<T: Clone>(
    link: &Link<T>,
    mut items: Vec<T>,
    compare: &ComparatorFn<T>,
) -> Link<T> {
    if items.is_empty() {
        return link.clone();
    }
    let Some(node) = link.as_deref() else {
        return build_from_unsorted(items, compare);
    };
    if items.len() == 1 {
        // A single element gains nothing from partitioning.
        if let Some(item) = items.pop() {
            return insert_link(link, item, compare);
        }
    }
    let (lesser, greater, _) = partition_by_pivot(items, &node.item, compare);
    let new_left = bulk_insert_link(&node.left, lesser, compare);
    let new_right = bulk_insert_link(&node.right, greater, compare);
    if same_link(&new_left, &node.left) && same_link(&new_right, &node.right) {
        return link.clone();
    }
    join(new_left, node.item.clone(), new_right)
}

/// Removes a whole collection of elements at once.
///
/// The mirror of [`bulk_insert_link`]; when the incoming collection
/// contains the current element, the recombination splices it out exactly
/// like single-element removal.
fn bulk_remove_link<T: Clone>(
    link: &Link<T>,
    mut items: Vec<T>,
    compare: &ComparatorFn<T>,
) -> Link<T> {
    if items.is_empty() {
        return link.clone();
    }
    let Some(node) = link.as_deref() else {
        return None;
    };
    if items.len() == 1 {
        if let Some(item) = items.pop() {
            return remove_link(link, &item, compare);
        }
    }
    let (lesser, greater, pivot_present) = partition_by_pivot(items, &node.item, compare);
    let new_left = bulk_remove_link(&node.left, lesser, compare);
    let new_right = bulk_remove_link(&node.right, greater, compare);
    if pivot_present {
        return join_disjoint(new_left, new_right);
    }
    if same_link(&new_left, &node.left) && same_link(&new_right, &node.right) {
        return link.clone();
    }
    join(new_left, node.item.clone(), new_right)
}

/// Keeps only the elements present in the incoming collection
/// (intersection).
///
/// The current element survives only when the incoming collection contains
/// it; otherwise it is dropped via the same splice as removal, even though
/// neither child individually triggered one.
fn retain_link<T: Clone>(link: &Link<T>, items: Vec<T>, compare: &ComparatorFn<T>) -> Link<T> {
    let Some(node) = link.as_deref() else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let (lesser, greater, pivot_present) = partition_by_pivot(items, &node.item, compare);
    let new_left = retain_link(&node.left, lesser, compare);
    let new_right = retain_link(&node.right, greater, compare);
    if pivot_present {
        if same_link(&new_left, &node.left) && same_link(&new_right, &node.right) {
            return link.clone();
        }
        return join(new_left, node.item.clone(), new_right);
    }
    join_disjoint(new_left, new_right)
}

// =============================================================================
// Tree Engine: Bulk Construction
// =============================================================================

/// Builds a balanced tree from a strictly sorted slice by repeatedly
/// splitting at the midpoint, in O(n).
fn build_from_sorted<T: Clone>(items: &[T]) -> Link<T> {
    if items.is_empty() {
        return None;
    }
    let middle = items.len() / 2;
    let left = build_from_sorted(&items[..middle]);
    let right = build_from_sorted(&items[middle + 1..]);
    make_node(items[middle].clone(), left, right)
}

/// Sorts and deduplicates an arbitrary input collection under the
/// comparator, then builds a balanced tree bottom-up.
///
/// Among elements that compare equal, the last occurrence in input order
/// wins (the sort is stable, so equal runs keep their input order).
fn build_from_unsorted<T: Clone>(mut items: Vec<T>, compare: &ComparatorFn<T>) -> Link<T> {
    items.sort_by(compare);
    let mut deduplicated: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match deduplicated.last_mut() {
            Some(last) if compare(last, &item) == Ordering::Equal => *last = item,
            _ => deduplicated.push(item),
        }
    }
    build_from_sorted(&deduplicated)
}

// =============================================================================
// Error Definition
// =============================================================================

/// Represents an out-of-range index passed to the bounds-checked accessor
/// [`PersistentSortedSet::fetch`].
///
/// # Examples
///
/// ```rust
/// use ordset::persistent::IndexOutOfRangeError;
///
/// let error = IndexOutOfRangeError { index: 5, len: 3 };
/// assert_eq!(
///     format!("{}", error),
///     "index 5 out of range for set of length 3"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutOfRangeError {
    /// The offending index, as supplied by the caller (possibly negative).
    pub index: isize,
    /// The length of the set at the time of the access.
    pub len: usize,
}

impl fmt::Display for IndexOutOfRangeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "index {} out of range for set of length {}",
            self.index, self.len
        )
    }
}

impl std::error::Error for IndexOutOfRangeError {}

// =============================================================================
// PersistentSortedSet Definition
// =============================================================================

/// A persistent (immutable) ordered set based on an AVL tree.
///
/// `PersistentSortedSet` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns. Every
/// operation returns a new set; the original is never modified, so any
/// number of owners (and, with the `arc` feature, threads) can hold and
/// read the same set concurrently without locking.
///
/// A set is a `(root, comparator)` pair. The comparator is fixed at
/// construction and defines both iteration order and membership.
///
/// # Type Parameters
///
/// * `T` - The element type. Mutating operations require `Clone` because
///   nodes along an edited path are rebuilt by copy.
///
/// # Examples
///
/// ```rust
/// use ordset::persistent::PersistentSortedSet;
///
/// let set = PersistentSortedSet::from_items([5, 1, 3]);
/// assert_eq!(set.to_vec(), vec![1, 3, 5]);
///
/// // A comparator can invert or redefine the order entirely
/// let descending =
///     PersistentSortedSet::from_items_with_comparator([5, 1, 3], |a: &i32, b: &i32| b.cmp(a));
/// assert_eq!(descending.to_vec(), vec![5, 3, 1]);
/// ```
pub struct PersistentSortedSet<T> {
    root: Link<T>,
    compare: Comparator<T>,
}

impl<T> Clone for PersistentSortedSet<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            compare: self.compare.clone(),
        }
    }
}

// =============================================================================
// Construction
// =============================================================================

impl<T: Ord + 'static> PersistentSortedSet<T> {
    /// Creates a new empty set ordered by `T`'s natural order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set: PersistentSortedSet<i32> = PersistentSortedSet::new();
    /// assert!(set.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparator(T::cmp)
    }

    /// Creates a set containing a single element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::singleton(42);
    /// assert_eq!(set.len(), 1);
    /// assert!(set.contains(&42));
    /// ```
    #[must_use]
    pub fn singleton(item: T) -> Self {
        let mut set = Self::new();
        set.root = make_node(item, None, None);
        set
    }
}

impl<T: Clone + Ord + 'static> PersistentSortedSet<T> {
    /// Creates a set from an arbitrary (unsorted, possibly duplicated)
    /// input collection, ordered by `T`'s natural order.
    ///
    /// The input is sorted once and the tree is built bottom-up by midpoint
    /// splitting, so construction is O(n log n) for the sort and O(n) for
    /// the build, rather than n repeated inserts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([3, 1, 4, 1, 5]);
    /// assert_eq!(set.to_vec(), vec![1, 3, 4, 5]);
    /// ```
    #[must_use]
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::from_items_with_comparator(items, T::cmp)
    }
}

impl<T> PersistentSortedSet<T> {
    /// Creates a new empty set ordered by the supplied comparator.
    ///
    /// The comparator must implement a total order over `T`; elements that
    /// compare [`Ordering::Equal`] are treated as the same set member.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let descending = PersistentSortedSet::with_comparator(|a: &i32, b: &i32| b.cmp(a))
    ///     .insert(1)
    ///     .insert(3)
    ///     .insert(2);
    /// assert_eq!(descending.to_vec(), vec![3, 2, 1]);
    /// ```
    #[must_use]
    pub fn with_comparator<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self {
            root: None,
            compare: ReferenceCounter::new(compare),
        }
    }

    /// Creates a new empty set ordered by a one-argument sort key.
    ///
    /// The extractor is composed once into a two-argument comparator at
    /// construction time and stored alongside the tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let by_length = PersistentSortedSet::by_sort_key(|word: &&str| word.len())
    ///     .insert("sparrow")
    ///     .insert("owl")
    ///     .insert("magpie");
    /// assert_eq!(by_length.to_vec(), vec!["owl", "magpie", "sparrow"]);
    /// ```
    #[must_use]
    pub fn by_sort_key<K, F>(extract: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_comparator(move |first: &T, second: &T| extract(first).cmp(&extract(second)))
    }

    /// Creates a set from an arbitrary input collection and a comparator.
    ///
    /// Among input elements that compare equal, the last one wins.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let descending =
    ///     PersistentSortedSet::from_items_with_comparator([2, 3, 1], |a: &i32, b: &i32| {
    ///         b.cmp(a)
    ///     });
    /// assert_eq!(descending.to_vec(), vec![3, 2, 1]);
    /// ```
    #[must_use]
    pub fn from_items_with_comparator<I, F>(items: I, compare: F) -> Self
    where
        T: Clone,
        I: IntoIterator<Item = T>,
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let compare: Comparator<T> = ReferenceCounter::new(compare);
        let root = build_from_unsorted(items.into_iter().collect(), &*compare);
        Self { root, compare }
    }

    /// Creates a set from an arbitrary input collection and a one-argument
    /// sort key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let words = PersistentSortedSet::from_items_by_sort_key(
    ///     ["sparrow", "owl", "magpie"],
    ///     |word: &&str| word.len(),
    /// );
    /// assert_eq!(words.to_vec(), vec!["owl", "magpie", "sparrow"]);
    /// ```
    #[must_use]
    pub fn from_items_by_sort_key<I, K, F>(items: I, extract: F) -> Self
    where
        T: Clone,
        I: IntoIterator<Item = T>,
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::from_items_with_comparator(items, move |first: &T, second: &T| {
            extract(first).cmp(&extract(second))
        })
    }

    /// Returns an empty set sharing this set's comparator.
    fn cleared(&self) -> Self {
        Self {
            root: None,
            compare: self.compare.clone(),
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

impl<T> PersistentSortedSet<T> {
    /// Returns the number of elements in the set.
    ///
    /// # Complexity
    ///
    /// O(1); the size is cached at the root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([1, 2]);
    /// assert_eq!(set.len(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    /// Returns `true` if the set contains no elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let empty: PersistentSortedSet<i32> = PersistentSortedSet::new();
    /// assert!(empty.is_empty());
    /// assert!(!empty.insert(42).is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns `true` if the set contains an element comparing equal to
    /// `item` under the set's comparator.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([1, 2]);
    /// assert!(set.contains(&1));
    /// assert!(!set.contains(&3));
    /// ```
    #[inline]
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        contains_link(&self.root, item, &*self.compare)
    }

    /// Returns a reference to the smallest element, or `None` if empty.
    ///
    /// # Complexity
    ///
    /// O(log N), following the leftmost spine.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([3, 1, 2]);
    /// assert_eq!(set.first(), Some(&1));
    /// ```
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        min_item(&self.root)
    }

    /// Returns a reference to the largest element, or `None` if empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([3, 1, 2]);
    /// assert_eq!(set.last(), Some(&3));
    /// ```
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        max_item(&self.root)
    }

    /// Returns the element at the given rank, or `None` when out of range.
    ///
    /// Rank 0 is the smallest element under the set's comparator. Negative
    /// indices count from the end: `-1` is the largest element.
    ///
    /// # Complexity
    ///
    /// O(log N), descending by cached subtree sizes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([10, 20, 30]);
    /// assert_eq!(set.get(0), Some(&10));
    /// assert_eq!(set.get(-1), Some(&30));
    /// assert_eq!(set.get(3), None);
    /// assert_eq!(set.get(-4), None);
    /// ```
    #[must_use]
    pub fn get(&self, index: isize) -> Option<&T> {
        let rank = self.resolve_index(index)?;
        item_at(&self.root, rank)
    }

    /// Returns the element at the given rank, or an error naming the
    /// offending index when out of range.
    ///
    /// Negative indices count from the end, as with [`get`](Self::get).
    /// A fallback default or fallback computation is configured the usual
    /// `Result` way (`unwrap_or`, `unwrap_or_else`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`IndexOutOfRangeError`] when the index, after negative
    /// adjustment, does not fall in `[0, len)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::{IndexOutOfRangeError, PersistentSortedSet};
    ///
    /// let set = PersistentSortedSet::from_items([10, 20, 30]);
    /// assert_eq!(set.fetch(1), Ok(&20));
    /// assert_eq!(
    ///     set.fetch(7),
    ///     Err(IndexOutOfRangeError { index: 7, len: 3 })
    /// );
    ///
    /// // Configure a fallback instead of an error
    /// assert_eq!(set.fetch(7).copied().unwrap_or(0), 0);
    /// ```
    pub fn fetch(&self, index: isize) -> Result<&T, IndexOutOfRangeError> {
        self.resolve_index(index)
            .and_then(|rank| item_at(&self.root, rank))
            .ok_or(IndexOutOfRangeError {
                index,
                len: self.len(),
            })
    }

    /// Returns the 0-based rank of `item` in sorted order, or `None` when
    /// the set contains no equal element.
    ///
    /// This is the inverse of [`get`](Self::get) for in-range ranks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([10, 20, 30]);
    /// assert_eq!(set.position(&20), Some(1));
    /// assert_eq!(set.position(&25), None);
    /// ```
    #[must_use]
    pub fn position(&self, item: &T) -> Option<usize> {
        rank_of(&self.root, item, &*self.compare)
    }

    /// Resolves a possibly-negative index to a rank in `[0, len)`.
    fn resolve_index(&self, index: isize) -> Option<usize> {
        let len = self.len();
        if index >= 0 {
            let rank = usize::try_from(index).ok()?;
            (rank < len).then_some(rank)
        } else {
            let from_end = usize::try_from(index.checked_neg()?).ok()?;
            (from_end <= len).then(|| len - from_end)
        }
    }
}

// =============================================================================
// Comparisons
// =============================================================================

impl<T> PersistentSortedSet<T> {
    /// Returns `true` if every element of `self` is a member of `other`.
    ///
    /// Performs a size pre-check before the per-element membership scan.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let small = PersistentSortedSet::from_items([1, 2]);
    /// let large = PersistentSortedSet::from_items([1, 2, 3]);
    /// assert!(small.is_subset(&large));
    /// assert!(!large.is_subset(&small));
    /// ```
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|item| other.contains(item))
    }

    /// Returns `true` if `self` is a subset of `other` and strictly
    /// smaller.
    #[must_use]
    pub fn is_proper_subset(&self, other: &Self) -> bool {
        self.len() < other.len() && self.is_subset(other)
    }

    /// Returns `true` if every element of `other` is a member of `self`.
    #[inline]
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Returns `true` if `self` is a superset of `other` and strictly
    /// larger.
    #[inline]
    #[must_use]
    pub fn is_proper_superset(&self, other: &Self) -> bool {
        other.is_proper_subset(self)
    }

    /// Returns `true` if the two sets share no element.
    ///
    /// Scans the smaller set against the larger one, short-circuiting on
    /// the first overlap.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let odd = PersistentSortedSet::from_items([1, 3]);
    /// let even = PersistentSortedSet::from_items([2, 4]);
    /// assert!(odd.is_disjoint(&even));
    /// assert!(!odd.is_disjoint(&odd));
    /// ```
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (smaller, larger) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        !smaller.iter().any(|item| larger.contains(item))
    }

    /// Returns `true` if the two sets share at least one element.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_disjoint(other)
    }
}

// =============================================================================
// Point Mutations
// =============================================================================

impl<T: Clone> PersistentSortedSet<T> {
    /// Inserts an element, returning a new set.
    ///
    /// Inserting an element that is already present (under the comparator)
    /// is an identity-preserving no-op: the returned set shares the
    /// original root unchanged.
    ///
    /// # Complexity
    ///
    /// O(log N); the edited path is rebuilt, everything else is shared.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::new().insert(42);
    /// assert!(set.contains(&42));
    ///
    /// // Idempotent
    /// let same = set.insert(42);
    /// assert_eq!(same.len(), 1);
    /// ```
    #[must_use]
    pub fn insert(&self, item: T) -> Self {
        if self.contains(&item) {
            return self.clone();
        }
        Self {
            root: insert_link(&self.root, item, &*self.compare),
            compare: self.compare.clone(),
        }
    }

    /// Removes an element, returning a new set.
    ///
    /// Removing an element that is absent is an identity-preserving no-op.
    /// A set whose last element is removed returns to the canonical empty
    /// representation.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([1, 2, 3]);
    /// let smaller = set.remove(&2);
    ///
    /// assert_eq!(set.len(), 3);     // Original unchanged
    /// assert_eq!(smaller.len(), 2); // New version
    /// assert!(!smaller.contains(&2));
    /// ```
    #[must_use]
    pub fn remove(&self, item: &T) -> Self {
        if !self.contains(item) {
            return self.clone();
        }
        Self {
            root: remove_link(&self.root, item, &*self.compare),
            compare: self.compare.clone(),
        }
    }
}

// =============================================================================
// Bulk Set Operations
// =============================================================================

impl<T: Clone> PersistentSortedSet<T> {
    /// Returns the union of the two sets.
    ///
    /// All elements of `other` are bulk-inserted into `self`'s tree: the
    /// incoming elements are partitioned around whole subtrees instead of
    /// being inserted one by one. The result keeps `self`'s comparator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let first = PersistentSortedSet::from_items([1, 3, 5]);
    /// let second = PersistentSortedSet::from_items([2, 3, 4]);
    /// assert_eq!(first.union(&second).to_vec(), vec![1, 2, 3, 4, 5]);
    /// ```
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let incoming: Vec<T> = other.iter().cloned().collect();
        Self {
            root: bulk_insert_link(&self.root, incoming, &*self.compare),
            compare: self.compare.clone(),
        }
    }

    /// Returns the intersection of the two sets.
    ///
    /// Keeps only the elements of `self` that compare equal to an element
    /// of `other`. The result keeps `self`'s comparator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let first = PersistentSortedSet::from_items([1, 3, 5]);
    /// let second = PersistentSortedSet::from_items([2, 3, 4]);
    /// assert_eq!(first.intersection(&second).to_vec(), vec![3]);
    /// ```
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        if other.is_empty() {
            return self.cleared();
        }
        let incoming: Vec<T> = other.iter().cloned().collect();
        Self {
            root: retain_link(&self.root, incoming, &*self.compare),
            compare: self.compare.clone(),
        }
    }

    /// Returns the difference `self - other`.
    ///
    /// All elements of `other` are bulk-removed from `self`'s tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let first = PersistentSortedSet::from_items([1, 3, 5]);
    /// let second = PersistentSortedSet::from_items([2, 3, 4]);
    /// assert_eq!(first.difference(&second).to_vec(), vec![1, 5]);
    /// ```
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        let incoming: Vec<T> = other.iter().cloned().collect();
        Self {
            root: bulk_remove_link(&self.root, incoming, &*self.compare),
            compare: self.compare.clone(),
        }
    }

    /// Returns the symmetric difference: elements in exactly one of the
    /// two sets, computed as `(self ∪ other) - (self ∩ other)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let first = PersistentSortedSet::from_items([1, 3, 5]);
    /// let second = PersistentSortedSet::from_items([2, 3, 4]);
    /// assert_eq!(
    ///     first.symmetric_difference(&second).to_vec(),
    ///     vec![1, 2, 4, 5]
    /// );
    /// ```
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.union(other).difference(&self.intersection(other))
    }
}

// =============================================================================
// Slicing
// =============================================================================

impl<T: Clone> PersistentSortedSet<T> {
    /// Extracts the contiguous rank range `[start, start + length)` as a
    /// new set sharing this set's comparator.
    ///
    /// A negative `start` counts from the end. An out-of-range `start` or
    /// zero `length` yields the empty set; a range reaching past the end is
    /// clamped. Whole subtrees falling inside the range are reused rather
    /// than rebuilt.
    ///
    /// # Complexity
    ///
    /// O(log N) plus the cost of the boundary rebuilds.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items(["A", "B", "C", "D", "E"]);
    /// assert_eq!(set.slice(1, 2).to_vec(), vec!["B", "C"]);
    /// assert_eq!(set.slice(-2, 2).to_vec(), vec!["D", "E"]);
    /// assert!(set.slice(1, 0).is_empty());
    ///
    /// // The source is left intact
    /// assert_eq!(set.len(), 5);
    /// ```
    #[must_use]
    pub fn slice(&self, start: isize, length: usize) -> Self {
        let resolved = if start < 0 {
            self.resolve_index(start)
        } else {
            usize::try_from(start).ok()
        };
        let root = resolved.and_then(|rank| slice_link(&self.root, rank, length));
        Self {
            root,
            compare: self.compare.clone(),
        }
    }
}

// =============================================================================
// Traversal
// =============================================================================

impl<T> PersistentSortedSet<T> {
    /// Returns a lazy iterator over references to the elements in sorted
    /// order.
    ///
    /// The iterator is double-ended: `rev()` yields the elements in
    /// descending order. Each call yields a fresh traversal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([2, 1, 3]);
    /// let ascending: Vec<&i32> = set.iter().collect();
    /// assert_eq!(ascending, vec![&1, &2, &3]);
    ///
    /// let descending: Vec<&i32> = set.iter().rev().collect();
    /// assert_eq!(descending, vec![&3, &2, &1]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentSortedSetIterator<'_, T> {
        PersistentSortedSetIterator::new(&self.root)
    }

    /// Returns a sorted `Vec` containing clones of all elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordset::persistent::PersistentSortedSet;
    ///
    /// let set = PersistentSortedSet::from_items([3, 1, 2]);
    /// assert_eq!(set.to_vec(), vec![1, 2, 3]);
    /// ```
    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }
}

/// Inline capacity of the iterator's traversal stacks.
///
/// Covers trees of roughly 2^16 elements without heap allocation.
const ITERATOR_STACK_CAPACITY: usize = 16;

/// Lazy in-order iterator over references to the elements of a
/// [`PersistentSortedSet`].
///
/// Double-ended: the forward direction yields ascending order, the
/// backward direction descending order. The two directions meet in the
/// middle without overlap.
pub struct PersistentSortedSetIterator<'a, T> {
    forward_spine: SmallVec<[&'a Node<T>; ITERATOR_STACK_CAPACITY]>,
    backward_spine: SmallVec<[&'a Node<T>; ITERATOR_STACK_CAPACITY]>,
    remaining: usize,
}

impl<'a, T> PersistentSortedSetIterator<'a, T> {
    fn new(root: &'a Link<T>) -> Self {
        let mut iterator = Self {
            forward_spine: SmallVec::new(),
            backward_spine: SmallVec::new(),
            remaining: link_size(root),
        };
        iterator.descend_left(root.as_deref());
        iterator.descend_right(root.as_deref());
        iterator
    }

    fn descend_left(&mut self, mut current: Option<&'a Node<T>>) {
        while let Some(node) = current {
            self.forward_spine.push(node);
            current = node.left.as_deref();
        }
    }

    fn descend_right(&mut self, mut current: Option<&'a Node<T>>) {
        while let Some(node) = current {
            self.backward_spine.push(node);
            current = node.right.as_deref();
        }
    }
}

impl<'a, T> Iterator for PersistentSortedSetIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.forward_spine.pop()?;
        self.remaining -= 1;
        self.descend_left(node.right.as_deref());
        Some(&node.item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for PersistentSortedSetIterator<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.backward_spine.pop()?;
        self.remaining -= 1;
        self.descend_right(node.left.as_deref());
        Some(&node.item)
    }
}

impl<T> ExactSizeIterator for PersistentSortedSetIterator<'_, T> {
    #[inline]
    fn len(&self) -> usize {
        self.remaining
    }
}

/// Owning iterator over the elements of a [`PersistentSortedSet`].
pub struct PersistentSortedSetIntoIterator<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> Iterator for PersistentSortedSetIntoIterator<T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T> DoubleEndedIterator for PersistentSortedSetIntoIterator<T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.items.next_back()
    }
}

impl<T> ExactSizeIterator for PersistentSortedSetIntoIterator<T> {
    #[inline]
    fn len(&self) -> usize {
        self.items.len()
    }
}

impl<'a, T> IntoIterator for &'a PersistentSortedSet<T> {
    type Item = &'a T;
    type IntoIter = PersistentSortedSetIterator<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone> IntoIterator for PersistentSortedSet<T> {
    type Item = T;
    type IntoIter = PersistentSortedSetIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentSortedSetIntoIterator {
            items: self.to_vec().into_iter(),
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T: Ord + 'static> Default for PersistentSortedSet<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Ord + 'static> FromIterator<T> for PersistentSortedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_items(iter)
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentSortedSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for PersistentSortedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(first, second)| first == second)
    }
}

impl<T: Eq> Eq for PersistentSortedSet<T> {}

impl<T: Hash> Hash for PersistentSortedSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for item in self {
            item.hash(state);
        }
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T> serde::Serialize for PersistentSortedSet<T>
where
    T: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(feature = "serde")]
struct PersistentSortedSetVisitor<T> {
    item_marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<T> PersistentSortedSetVisitor<T> {
    const fn new() -> Self {
        Self {
            item_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for PersistentSortedSetVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + 'static,
{
    type Value = PersistentSortedSet<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(item) = access.next_element()? {
            items.push(item);
        }
        Ok(PersistentSortedSet::from_items(items))
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for PersistentSortedSet<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentSortedSetVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Walks the whole tree and asserts the AVL, size, height, order, and
    /// uniqueness invariants.
    fn assert_invariants<T>(set: &PersistentSortedSet<T>) {
        fn walk<T>(link: &Link<T>) -> (u32, usize) {
            match link.as_deref() {
                None => (0, 0),
                Some(node) => {
                    let (left_height, left_size) = walk(&node.left);
                    let (right_height, right_size) = walk(&node.right);
                    assert!(
                        left_height.abs_diff(right_height) <= 1,
                        "AVL balance violated: left height {left_height}, right height {right_height}"
                    );
                    assert_eq!(node.height, 1 + left_height.max(right_height));
                    assert_eq!(node.size, 1 + left_size + right_size);
                    (node.height, node.size)
                }
            }
        }
        let (_, total) = walk(&set.root);
        assert_eq!(total, set.len());

        let items: Vec<&T> = set.iter().collect();
        for window in items.windows(2) {
            assert_eq!(
                (*set.compare)(window[0], window[1]),
                Ordering::Less,
                "strict sorted order violated"
            );
        }
    }

    fn roots_are_identical<T>(first: &PersistentSortedSet<T>, second: &PersistentSortedSet<T>) -> bool {
        same_link(&first.root, &second.root)
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[rstest]
    fn test_new_creates_empty() {
        let set: PersistentSortedSet<i32> = PersistentSortedSet::new();
        assert!(set.is_empty());
        assert!(set.root.is_none());
    }

    #[rstest]
    fn test_from_items_sorts_and_deduplicates() {
        let set = PersistentSortedSet::from_items([3, 1, 2, 3, 1]);
        assert_eq!(set.to_vec(), vec![1, 2, 3]);
        assert_invariants(&set);
    }

    #[rstest]
    fn test_from_items_equal_inputs_last_wins() {
        // Case-insensitive comparator: "B" and "b" are the same member,
        // the later input survives.
        let set = PersistentSortedSet::from_items_with_comparator(
            ["B", "a", "b"],
            |first: &&str, second: &&str| {
                first.to_lowercase().cmp(&second.to_lowercase())
            },
        );
        assert_eq!(set.to_vec(), vec!["a", "b"]);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one(1)]
    #[case::eight(8)]
    #[case::many(300)]
    fn test_from_items_builds_balanced_tree(#[case] count: i32) {
        let set = PersistentSortedSet::from_items(0..count);
        assert_eq!(set.len(), usize::try_from(count).unwrap_or(0));
        assert_invariants(&set);
    }

    #[rstest]
    fn test_singleton() {
        let set = PersistentSortedSet::singleton(7);
        assert_eq!(set.to_vec(), vec![7]);
        assert_invariants(&set);
    }

    // =========================================================================
    // Insert / Remove Identity
    // =========================================================================

    #[rstest]
    fn test_insert_present_element_returns_identical_root() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        let same = set.insert(2);
        assert!(roots_are_identical(&set, &same));
    }

    #[rstest]
    fn test_remove_absent_element_returns_identical_root() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        let same = set.remove(&9);
        assert!(roots_are_identical(&set, &same));
    }

    #[rstest]
    fn test_engine_insert_is_safe_to_call_unconditionally() {
        // The engine itself also preserves identity on an equal element.
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        let root = insert_link(&set.root, 2, &*set.compare);
        assert!(same_link(&root, &set.root));
    }

    #[rstest]
    fn test_remove_all_elements_yields_canonical_empty() {
        let set = PersistentSortedSet::from_items(["A", "B", "C"]);
        let empty = set.remove(&"B").remove(&"C").remove(&"A");
        assert!(empty.root.is_none());
        assert!(empty.is_empty());
    }

    #[rstest]
    fn test_insert_keeps_invariants_under_ascending_inserts() {
        let mut set = PersistentSortedSet::new();
        for value in 0..200 {
            set = set.insert(value);
            assert_invariants(&set);
        }
        assert_eq!(set.len(), 200);
    }

    #[rstest]
    fn test_remove_keeps_invariants_in_any_order() {
        let mut set = PersistentSortedSet::from_items(0..100);
        // Remove in a scattered order
        for value in (0..100).step_by(3).chain((0..100).rev()) {
            set = set.remove(&value);
            assert_invariants(&set);
        }
        assert!(set.is_empty());
    }

    // =========================================================================
    // Structural Sharing
    // =========================================================================

    #[rstest]
    fn test_insert_shares_untouched_subtree() {
        let set = PersistentSortedSet::from_items(0..50);
        let extended = set.insert(100);
        let (Some(original_root), Some(extended_root)) =
            (set.root.as_deref(), extended.root.as_deref())
        else {
            panic!("both sets should be non-empty");
        };
        // 100 goes to the right; the left subtree must be shared by pointer.
        assert!(same_link(&original_root.left, &extended_root.left));
    }

    #[rstest]
    fn test_two_writers_from_same_base_do_not_interfere() {
        let base = PersistentSortedSet::from_items([1, 2, 3]);
        let first = base.insert(10);
        let second = base.remove(&1);
        assert_eq!(base.to_vec(), vec![1, 2, 3]);
        assert_eq!(first.to_vec(), vec![1, 2, 3, 10]);
        assert_eq!(second.to_vec(), vec![2, 3]);
    }

    #[rstest]
    fn test_slice_of_whole_set_shares_root() {
        let set = PersistentSortedSet::from_items(0..20);
        let whole = set.slice(0, 20);
        assert!(roots_are_identical(&set, &whole));
    }

    #[rstest]
    fn test_union_with_subset_returns_identical_root() {
        let set = PersistentSortedSet::from_items(0..20);
        let subset = PersistentSortedSet::from_items(5..10);
        let union = set.union(&subset);
        assert!(roots_are_identical(&set, &union));
    }

    #[rstest]
    fn test_difference_with_disjoint_returns_identical_root() {
        let set = PersistentSortedSet::from_items(0..20);
        let disjoint = PersistentSortedSet::from_items(100..120);
        let difference = set.difference(&disjoint);
        assert!(roots_are_identical(&set, &difference));
    }

    // =========================================================================
    // Bulk Operations
    // =========================================================================

    #[rstest]
    fn test_union_keeps_invariants() {
        let first = PersistentSortedSet::from_items((0..100).step_by(2));
        let second = PersistentSortedSet::from_items((0..100).step_by(3));
        let union = first.union(&second);
        assert_invariants(&union);
        let expected: Vec<i32> = (0..100)
            .filter(|value| value % 2 == 0 || value % 3 == 0)
            .collect();
        assert_eq!(union.to_vec(), expected);
    }

    #[rstest]
    fn test_intersection_drops_pivot_missing_from_incoming() {
        // The root's element is absent from `other`, so the recombination
        // must splice it out even though both children keep elements.
        let set = PersistentSortedSet::from_items(0..31);
        let other = PersistentSortedSet::from_items((0..31).filter(|value| value != &15));
        let intersection = set.intersection(&other);
        assert!(!intersection.contains(&15));
        assert_eq!(intersection.len(), 30);
        assert_invariants(&intersection);
    }

    #[rstest]
    fn test_bulk_remove_keeps_invariants() {
        let set = PersistentSortedSet::from_items(0..100);
        let to_remove = PersistentSortedSet::from_items((0..100).step_by(2));
        let difference = set.difference(&to_remove);
        assert_invariants(&difference);
        let expected: Vec<i32> = (0..100).filter(|value| value % 2 == 1).collect();
        assert_eq!(difference.to_vec(), expected);
    }

    #[rstest]
    fn test_bulk_operations_use_left_comparator() {
        let descending = PersistentSortedSet::with_comparator(|a: &i32, b: &i32| b.cmp(a))
            .insert(1)
            .insert(3)
            .insert(5);
        let ascending = PersistentSortedSet::from_items([2, 3, 4]);
        let union = descending.union(&ascending);
        assert_eq!(union.to_vec(), vec![5, 4, 3, 2, 1]);
        assert_invariants(&union);
    }

    // =========================================================================
    // Slicing
    // =========================================================================

    #[rstest]
    #[case::inner(1, 2, vec!["B", "C"])]
    #[case::prefix(0, 2, vec!["A", "B"])]
    #[case::suffix(3, 2, vec!["D", "E"])]
    #[case::clamped(3, 10, vec!["D", "E"])]
    #[case::negative_start(-2, 2, vec!["D", "E"])]
    #[case::empty_length(2, 0, vec![])]
    fn test_slice_ranges(
        #[case] start: isize,
        #[case] length: usize,
        #[case] expected: Vec<&str>,
    ) {
        let set = PersistentSortedSet::from_items(["A", "B", "C", "D", "E"]);
        let sliced = set.slice(start, length);
        assert_eq!(sliced.to_vec(), expected);
        assert_invariants(&sliced);
        assert_eq!(set.len(), 5);
    }

    #[rstest]
    fn test_slice_out_of_range_start_is_empty() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        assert!(set.slice(7, 2).is_empty());
        assert!(set.slice(-9, 2).is_empty());
    }

    #[rstest]
    fn test_slice_matches_vector_slicing() {
        let set = PersistentSortedSet::from_items(0..64);
        let reference: Vec<i32> = (0..64).collect();
        for start in [0_usize, 1, 13, 31, 32, 63] {
            for length in [0_usize, 1, 2, 17, 64] {
                let sliced = set.slice(isize::try_from(start).unwrap_or(0), length);
                let expected = &reference[start..reference.len().min(start + length)];
                assert_eq!(sliced.to_vec(), expected, "start {start} length {length}");
                assert_invariants(&sliced);
            }
        }
    }

    // =========================================================================
    // Indexed Access
    // =========================================================================

    #[rstest]
    fn test_get_in_range_and_out_of_range() {
        let set = PersistentSortedSet::from_items([10, 20, 30]);
        assert_eq!(set.get(0), Some(&10));
        assert_eq!(set.get(2), Some(&30));
        assert_eq!(set.get(-1), Some(&30));
        assert_eq!(set.get(-3), Some(&10));
        assert_eq!(set.get(3), None);
        assert_eq!(set.get(-4), None);
    }

    #[rstest]
    fn test_fetch_names_offending_index() {
        let set = PersistentSortedSet::from_items([10, 20, 30]);
        assert_eq!(set.fetch(1), Ok(&20));
        assert_eq!(set.fetch(-5), Err(IndexOutOfRangeError { index: -5, len: 3 }));
        assert_eq!(set.fetch(5).copied().unwrap_or(99), 99);
    }

    #[rstest]
    fn test_position_is_inverse_of_get() {
        let set = PersistentSortedSet::from_items([5, 10, 15, 20]);
        for rank in 0..set.len() {
            let Some(item) = set.get(isize::try_from(rank).unwrap_or(0)) else {
                panic!("rank {rank} should be in range");
            };
            assert_eq!(set.position(item), Some(rank));
        }
        assert_eq!(set.position(&12), None);
    }

    #[rstest]
    fn test_extreme_negative_index_does_not_overflow() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        assert_eq!(set.get(isize::MIN), None);
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    #[rstest]
    fn test_iterator_is_restartable() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        let first_pass: Vec<&i32> = set.iter().collect();
        let second_pass: Vec<&i32> = set.iter().collect();
        assert_eq!(first_pass, second_pass);
    }

    #[rstest]
    fn test_iterator_meets_in_the_middle() {
        let set = PersistentSortedSet::from_items(0..10);
        let mut iterator = set.iter();
        let mut front = Vec::new();
        let mut back = Vec::new();
        loop {
            match iterator.next() {
                Some(item) => front.push(*item),
                None => break,
            }
            if let Some(item) = iterator.next_back() {
                back.push(*item);
            }
        }
        back.reverse();
        front.extend(back);
        assert_eq!(front, (0..10).collect::<Vec<i32>>());
    }

    #[rstest]
    fn test_exact_size_iterator() {
        let set = PersistentSortedSet::from_items(0..5);
        let mut iterator = set.iter();
        assert_eq!(iterator.len(), 5);
        iterator.next();
        iterator.next_back();
        assert_eq!(iterator.len(), 3);
    }

    // =========================================================================
    // Comparator Wiring
    // =========================================================================

    #[rstest]
    fn test_comparator_is_shared_not_rederived() {
        let set = PersistentSortedSet::from_items([1, 2, 3]);
        let derived = set.insert(4).remove(&1).union(&set);
        assert!(ReferenceCounter::ptr_eq(&set.compare, &derived.compare));
    }

    #[rstest]
    fn test_by_sort_key_orders_and_deduplicates_by_key() {
        let set = PersistentSortedSet::by_sort_key(|word: &&str| word.len())
            .insert("owl")
            .insert("hen")
            .insert("magpie");
        // "hen" compares equal to "owl" by length; insert is a no-op.
        assert_eq!(set.to_vec(), vec!["owl", "magpie"]);
    }

    // =========================================================================
    // Equality and Hashing
    // =========================================================================

    #[rstest]
    fn test_equality_ignores_construction_order() {
        let first = PersistentSortedSet::from_items([3, 1, 2]);
        let second = PersistentSortedSet::new().insert(2).insert(3).insert(1);
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_hash_agrees_with_equality() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of<T: Hash>(value: &T) -> u64 {
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            hasher.finish()
        }

        let first = PersistentSortedSet::from_items([3, 1, 2]);
        let second = PersistentSortedSet::from_items([1, 2, 3]);
        assert_eq!(hash_of(&first), hash_of(&second));
    }

    // =========================================================================
    // Serde
    // =========================================================================

    #[cfg(feature = "serde")]
    #[rstest]
    fn test_serde_round_trip_preserves_order() {
        let set = PersistentSortedSet::from_items([3, 1, 2]);
        let serialized = serde_json::to_string(&set).unwrap();
        assert_eq!(serialized, "[1,2,3]");
        let deserialized: PersistentSortedSet<i32> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, set);
    }
}
