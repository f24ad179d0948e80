//! Where a freshly loaded page meets the cached list.
//!
//! Cached lists are assumed to be sorted in the order the pager produces
//! pages. A refreshed first page is spliced in front of the cached list
//! (prepend), a next page behind it (append); the strategy finds the index
//! at which the cached list is cut.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// The cut point in the cached list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
  /// The cached list cannot be safely joined with the page. It is dropped and
  /// the page becomes the whole list.
  Clear,
  /// For a prepend, cached items before this index are replaced by the page.
  /// For an append, cached items from this index on are replaced by it.
  At(usize),
}

impl Boundary {
  /// The boundary as a plain index, `-1` standing for `Clear`.
  pub fn as_index(self) -> isize {
    match self {
      Boundary::Clear => -1,
      Boundary::At(index) => index as isize,
    }
  }
}

/// A user-provided boundary search.
///
/// `keyed` tells whether the page was loaded with a key: the refresh key for
/// a prepend, the next key for an append. `unique` tells whether items (or
/// their keys) are known to be unique in the whole upstream list.
pub trait MergeBoundary<T>: Send + Sync + 'static {
  fn prepend(&self, cached: &[T], page: &[T], keyed: bool, unique: bool) -> Boundary;
  fn append(&self, cached: &[T], page: &[T], keyed: bool, unique: bool) -> Boundary;
}

/// How new pages are merged into the cached list.
pub enum MergeStrategy<T> {
  /// No known ordering. Only the page key places a page: a keyed refresh
  /// goes in front of the cached list and a keyed next page behind it. A
  /// page loaded without a key replaces the whole list.
  None,
  /// Items are ordered by the comparator.
  ByItems(Comparator<T>),
  /// Items are ordered by a key, compared by the comparator. A refreshed page
  /// ending before the first cached key leaves a gap that cannot be bridged,
  /// so the cached list is dropped.
  ByKeys(Comparator<T>),
  /// A custom boundary search.
  Custom(Arc<dyn MergeBoundary<T>>),
}

impl<T: 'static> MergeStrategy<T> {
  pub fn by_items<F>(compare: F) -> Self
  where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
  {
    MergeStrategy::ByItems(Arc::new(compare))
  }

  /// Items ordered by their natural order.
  pub fn natural() -> Self
  where
    T: Ord,
  {
    MergeStrategy::ByItems(Arc::new(|a: &T, b: &T| a.cmp(b)))
  }

  pub fn by_keys<K, G, C>(key: G, compare: C) -> Self
  where
    K: 'static,
    G: Fn(&T) -> K + Send + Sync + 'static,
    C: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
  {
    MergeStrategy::ByKeys(Arc::new(move |a: &T, b: &T| compare(&key(a), &key(b))))
  }

  /// Items ordered by the natural order of a key.
  pub fn by_key<K, G>(key: G) -> Self
  where
    K: Ord + 'static,
    G: Fn(&T) -> K + Send + Sync + 'static,
  {
    MergeStrategy::ByKeys(Arc::new(move |a: &T, b: &T| key(a).cmp(&key(b))))
  }

  pub fn custom(boundary: impl MergeBoundary<T>) -> Self {
    MergeStrategy::Custom(Arc::new(boundary))
  }

  /// Finds where a refreshed first page, loaded with a key if `keyed`, is
  /// spliced into `cached`.
  pub fn prepend_boundary(&self, cached: &[T], page: &[T], keyed: bool, unique: bool) -> Boundary {
    if let MergeStrategy::Custom(boundary) = self {
      return boundary.prepend(cached, page, keyed, unique);
    }
    let (Some(point), Some(first)) = (page.last(), cached.first()) else {
      return Boundary::Clear;
    };
    match self {
      MergeStrategy::ByItems(compare) => Boundary::At(prepend_index(cached, point, compare, unique)),
      MergeStrategy::ByKeys(compare) => {
        if compare(point, first) == Ordering::Less {
          Boundary::Clear
        } else {
          Boundary::At(prepend_index(cached, point, compare, unique))
        }
      }
      MergeStrategy::None if keyed => Boundary::At(0),
      _ => Boundary::Clear,
    }
  }

  /// Finds where a next page, loaded with a key if `keyed`, is spliced into
  /// `cached`.
  pub fn append_boundary(&self, cached: &[T], page: &[T], keyed: bool, unique: bool) -> Boundary {
    if let MergeStrategy::Custom(boundary) = self {
      return boundary.append(cached, page, keyed, unique);
    }
    if cached.is_empty() {
      return Boundary::Clear;
    }
    match (self, page.first()) {
      (MergeStrategy::ByItems(compare) | MergeStrategy::ByKeys(compare), Some(point)) => {
        Boundary::At(append_index(cached, point, compare, unique))
      }
      (MergeStrategy::None, _) if !keyed => Boundary::Clear,
      _ => Boundary::At(cached.len()),
    }
  }
}

/// The first index whose item sorts after `point`. Unless items are unique,
/// items equal to `point` are cut as well, the page carries its own copies.
fn prepend_index<T>(cached: &[T], point: &T, compare: &Comparator<T>, unique: bool) -> usize {
  if unique {
    cached.partition_point(|item| compare(item, point) != Ordering::Greater)
  } else {
    cached.partition_point(|item| compare(item, point) == Ordering::Less)
  }
}

/// One past the last index whose item sorts before `point`. Unless items are
/// unique, items equal to `point` are kept, to be deduplicated by identity.
fn append_index<T>(cached: &[T], point: &T, compare: &Comparator<T>, unique: bool) -> usize {
  if unique {
    cached.partition_point(|item| compare(item, point) == Ordering::Less)
  } else {
    cached.partition_point(|item| compare(item, point) != Ordering::Greater)
  }
}

impl<T> Clone for MergeStrategy<T> {
  fn clone(&self) -> Self {
    match self {
      MergeStrategy::None => MergeStrategy::None,
      MergeStrategy::ByItems(compare) => MergeStrategy::ByItems(compare.clone()),
      MergeStrategy::ByKeys(compare) => MergeStrategy::ByKeys(compare.clone()),
      MergeStrategy::Custom(boundary) => MergeStrategy::Custom(boundary.clone()),
    }
  }
}

impl<T> Default for MergeStrategy<T> {
  fn default() -> Self {
    MergeStrategy::None
  }
}

impl<T> fmt::Debug for MergeStrategy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      MergeStrategy::None => "None",
      MergeStrategy::ByItems(_) => "ByItems",
      MergeStrategy::ByKeys(_) => "ByKeys",
      MergeStrategy::Custom(_) => "Custom",
    };
    f.write_str(name)
  }
}
