//! Item identity, used to drop stale copies of items after a page splice.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

type EqualityFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Identity checks over an extracted key, erased so the key type stays out of
/// the provider's signature.
trait KeyIdentity<T>: Send + Sync {
  fn same(&self, a: &T, b: &T) -> bool;
  fn remove_matching(&self, items: &[T], page: &[T]) -> Vec<T>;
}

struct ByKey<F, Q> {
  key: F,
  _key: PhantomData<fn() -> Q>,
}

impl<T, F, Q> KeyIdentity<T> for ByKey<F, Q>
where
  T: Clone,
  F: Fn(&T) -> Q + Send + Sync,
  Q: Hash + Eq,
{
  fn same(&self, a: &T, b: &T) -> bool {
    (self.key)(a) == (self.key)(b)
  }

  fn remove_matching(&self, items: &[T], page: &[T]) -> Vec<T> {
    let fresh: HashSet<Q> = page.iter().map(&self.key).collect();
    items
      .iter()
      .filter(|item| !fresh.contains(&(self.key)(*item)))
      .cloned()
      .collect()
  }
}

enum IdentityKind<T> {
  None,
  Equality(EqualityFn<T>),
  Key(Arc<dyn KeyIdentity<T>>),
}

/// Decides whether two items are the same entity, possibly in different
/// versions.
///
/// After a page is spliced into the cached list, cached items that are the
/// same as an item of the new page are removed, so the page's version wins
/// and no entity shows up twice around the splice point.
pub struct IdentityProvider<T> {
  kind: IdentityKind<T>,
}

impl<T> IdentityProvider<T> {
  /// No identity: cached items are never removed as duplicates.
  pub fn none() -> Self {
    Self {
      kind: IdentityKind::None,
    }
  }

  /// Identity decided by an explicit comparator.
  ///
  /// Removal is quadratic in the page size; prefer `by_key` for large pages.
  pub fn by_equality<F>(same: F) -> Self
  where
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
  {
    Self {
      kind: IdentityKind::Equality(Arc::new(same)),
    }
  }

  /// Identity decided by an extracted key, e.g. a database id.
  pub fn by_key<F, Q>(key: F) -> Self
  where
    T: Clone + 'static,
    F: Fn(&T) -> Q + Send + Sync + 'static,
    Q: Hash + Eq + 'static,
  {
    Self {
      kind: IdentityKind::Key(Arc::new(ByKey {
        key,
        _key: PhantomData,
      })),
    }
  }

  /// Whether `a` and `b` are the same entity.
  pub fn same(&self, a: &T, b: &T) -> bool {
    match &self.kind {
      IdentityKind::None => false,
      IdentityKind::Equality(same) => same(a, b),
      IdentityKind::Key(identity) => identity.same(a, b),
    }
  }

  /// Copies `items`, leaving out everything that also appears in `page`.
  pub(crate) fn remove_matching(&self, items: &[T], page: &[T]) -> Vec<T>
  where
    T: Clone,
  {
    match &self.kind {
      IdentityKind::None => items.to_vec(),
      IdentityKind::Equality(same) => items
        .iter()
        .filter(|item| !page.iter().any(|fresh| same(*item, fresh)))
        .cloned()
        .collect(),
      IdentityKind::Key(identity) => identity.remove_matching(items, page),
    }
  }
}

impl<T> Clone for IdentityProvider<T> {
  fn clone(&self) -> Self {
    let kind = match &self.kind {
      IdentityKind::None => IdentityKind::None,
      IdentityKind::Equality(same) => IdentityKind::Equality(same.clone()),
      IdentityKind::Key(identity) => IdentityKind::Key(identity.clone()),
    };
    Self { kind }
  }
}

impl<T> Default for IdentityProvider<T> {
  fn default() -> Self {
    Self::none()
  }
}

impl<T> fmt::Debug for IdentityProvider<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match &self.kind {
      IdentityKind::None => "None",
      IdentityKind::Equality(_) => "Equality",
      IdentityKind::Key(_) => "Key",
    };
    f.debug_tuple("IdentityProvider").field(&kind).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[derive(Debug, Clone, PartialEq)]
  struct Row {
    id: u32,
    title: &'static str,
  }

  fn row(id: u32, title: &'static str) -> Row {
    Row { id, title }
  }

  #[test]
  fn key_identity_keeps_page_versions_only() {
    let identity = IdentityProvider::by_key(|row: &Row| row.id);
    let cached = [row(1, "old"), row(2, "kept"), row(3, "old")];
    let page = [row(3, "new"), row(1, "new")];

    assert_eq!(identity.remove_matching(&cached, &page), vec![row(2, "kept")]);
    assert!(identity.same(&row(1, "a"), &row(1, "b")));
  }

  #[test]
  fn equality_identity_uses_comparator() {
    let identity = IdentityProvider::by_equality(|a: &Row, b: &Row| a.title == b.title);
    let cached = [row(1, "x"), row(2, "y")];
    let page = [row(9, "y")];

    assert_eq!(identity.remove_matching(&cached, &page), vec![row(1, "x")]);
  }

  #[test]
  fn no_identity_passes_everything_through() {
    let identity = IdentityProvider::<Row>::none();
    let cached = [row(1, "x")];

    assert_eq!(identity.remove_matching(&cached, &cached), cached.to_vec());
    assert!(!identity.same(&cached[0], &cached[0]));
  }
}
