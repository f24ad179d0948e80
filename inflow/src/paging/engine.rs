use crate::cache::{CacheReader, CacheWriter};
use crate::error::{AttemptError, LoadError};
use crate::expiration::ExpirationPolicy;
use crate::loader::{ensure_fresh, Refresh};
use crate::paging::identity::IdentityProvider;
use crate::paging::merge::{Boundary, MergeStrategy};
use crate::paging::{Page, Paged, PagingSnapshot, PagingState};
use crate::runtime::{run_on, TaskSpawner};

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) type PagerFn<T, K> =
  Arc<dyn Fn(usize, Option<K>) -> BoxFuture<'static, Result<Page<T, K>, LoadError>> + Send + Sync>;

/// How loaded pages are spliced into the cached list.
pub(crate) struct Splicer<T> {
  pub(crate) merge: MergeStrategy<T>,
  pub(crate) identity: IdentityProvider<T>,
  pub(crate) unique: bool,
}

impl<T> Splicer<T>
where
  T: Clone + 'static,
{
  /// Splices a refreshed first page, loaded with `key`, in front of `current`.
  pub(crate) fn prepend<K: Clone>(
    &self,
    current: Option<PagingSnapshot<T, K>>,
    page: Page<T, K>,
    key: Option<K>,
  ) -> PagingSnapshot<T, K> {
    let Some(current) = current else {
      return fresh(page, key);
    };
    // A last page holds everything there is.
    if page.next_key.is_none() {
      return fresh(page, key);
    }
    let cached = &current.paged.items[..];
    match self.merge.prepend_boundary(cached, &page.items, key.is_some(), self.unique) {
      Boundary::At(index) if index < cached.len() => {
        let mut items = page.items;
        let tail = self.identity.remove_matching(&cached[index..], &items);
        items.extend(tail);
        PagingSnapshot {
          paged: Paged::new(items, current.state.has_next),
          state: current.state,
        }
      }
      // The page reaches past everything cached.
      Boundary::At(_) | Boundary::Clear => fresh(page, key),
    }
  }

  /// Splices a next page, loaded with `key`, behind `current`.
  pub(crate) fn append<K: Clone>(
    &self,
    current: PagingSnapshot<T, K>,
    page: Page<T, K>,
    key: Option<K>,
  ) -> PagingSnapshot<T, K> {
    let cached = &current.paged.items[..];
    match self.merge.append_boundary(cached, &page.items, key.is_some(), self.unique) {
      Boundary::At(index) => {
        let index = index.min(cached.len());
        let mut items = self.identity.remove_matching(&cached[..index], &page.items);
        let has_next = page.next_key.is_some();
        items.extend(page.items);
        PagingSnapshot {
          paged: Paged::new(items, has_next),
          state: PagingState {
            has_next,
            next_key: page.next_key,
            refresh_key: current.state.refresh_key,
          },
        }
      }
      // Only the new page is known to be consistent, refreshing starts over
      // from it.
      Boundary::Clear => fresh(page, key),
    }
  }
}

/// A snapshot holding nothing but `page`.
fn fresh<T, K>(page: Page<T, K>, refresh_key: Option<K>) -> PagingSnapshot<T, K> {
  let has_next = page.next_key.is_some();
  PagingSnapshot {
    paged: Paged::new(page.items, has_next),
    state: PagingState {
      has_next,
      next_key: page.next_key,
      refresh_key,
    },
  }
}

/// Loads pages and keeps the paging cache consistent.
pub(crate) struct PagingEngine<T, K> {
  pub(crate) pager: PagerFn<T, K>,
  pub(crate) page_size: usize,
  pub(crate) splicer: Splicer<T>,
  pub(crate) reader: Arc<dyn CacheReader<PagingSnapshot<T, K>>>,
  pub(crate) writer: Arc<dyn CacheWriter<PagingSnapshot<T, K>>>,
  pub(crate) expiration: ExpirationPolicy<Paged<T>>,
  pub(crate) cache_spawner: Arc<dyn TaskSpawner>,
  pub(crate) token: CancellationToken,
  pub(crate) log_id: Arc<str>,
  /// Held from fetching a page until its merge is written.
  pub(crate) merging: Mutex<()>,
}

impl<T, K> PagingEngine<T, K>
where
  T: Clone + Send + Sync + 'static,
  K: Clone + Send + Sync + 'static,
{
  async fn current(&self) -> Option<PagingSnapshot<T, K>> {
    let reader = self.reader.clone();
    let read = async move { reader.read().next().await.flatten() };
    run_on(&self.cache_spawner, self.token.clone(), read).await.flatten()
  }

  async fn store(&self, snapshot: PagingSnapshot<T, K>) {
    let write = self.writer.write(snapshot);
    run_on(&self.cache_spawner, self.token.clone(), write).await;
  }

  async fn fetch(&self, key: Option<K>) -> Result<Page<T, K>, AttemptError> {
    (self.pager)(self.page_size, key).await.map_err(AttemptError::Failed)
  }

  /// Reloads the first page and splices it in front of the cached list.
  pub(crate) async fn refresh_first(&self) -> Result<(), AttemptError> {
    let _merging = self.merging.lock().await;
    let current = self.current().await;
    let key = current.as_ref().and_then(|snapshot| snapshot.state.refresh_key.clone());
    let page = self.fetch(key.clone()).await?;
    let merged = self.splicer.prepend(current, page, key);
    ensure_fresh(&self.expiration, &merged.paged, &self.log_id)?;
    tracing::debug!(inflow = %self.log_id, items = merged.paged.items.len(), "first page merged");
    self.store(merged).await;
    Ok(())
  }

  /// Loads the page following the cached list, if there is one.
  pub(crate) async fn load_next(&self) -> Result<(), AttemptError> {
    let _merging = self.merging.lock().await;
    let Some(current) = self.current().await else {
      tracing::debug!(inflow = %self.log_id, "nothing cached yet, skipping next page");
      return Ok(());
    };
    if !current.state.has_next {
      return Ok(());
    }
    let key = current.state.next_key.clone();
    let page = self.fetch(key.clone()).await?;
    let merged = self.splicer.append(current, page, key);
    tracing::debug!(inflow = %self.log_id, items = merged.paged.items.len(), "next page merged");
    self.store(merged).await;
    Ok(())
  }
}

impl<T, K> Refresh for PagingEngine<T, K>
where
  T: Clone + Send + Sync + 'static,
  K: Clone + Send + Sync + 'static,
{
  fn refresh(&self) -> BoxFuture<'_, Result<(), AttemptError>> {
    Box::pin(self.refresh_first())
  }
}

/// Exposes the paged list of a snapshot cache, hiding the paging state.
pub(crate) struct PagedView<T, K> {
  pub(crate) source: Arc<dyn CacheReader<PagingSnapshot<T, K>>>,
}

impl<T, K> CacheReader<Paged<T>> for PagedView<T, K>
where
  T: Send + Sync + 'static,
  K: Send + Sync + 'static,
{
  fn read(&self) -> BoxStream<'static, Option<Paged<T>>> {
    self
      .source
      .read()
      .map(|snapshot| snapshot.map(|snapshot| snapshot.paged))
      .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn snapshot(items: Vec<u32>, next_key: Option<u32>) -> PagingSnapshot<u32, u32> {
    fresh(Page::new(items, next_key), None)
  }

  fn items(snapshot: &PagingSnapshot<u32, u32>) -> Vec<u32> {
    snapshot.paged.items.to_vec()
  }

  fn splicer(unique: bool) -> Splicer<u32> {
    Splicer {
      merge: MergeStrategy::natural(),
      identity: IdentityProvider::none(),
      unique,
    }
  }

  #[test]
  fn refresh_keeps_older_pages_and_their_state() {
    let current = snapshot(vec![3, 4, 6, 8], Some(9));
    let merged = splicer(true).prepend(Some(current), Page::new(vec![1, 2, 3], Some(4)), None);

    assert_eq!(items(&merged), vec![1, 2, 3, 4, 6, 8]);
    assert_eq!(merged.state.next_key, Some(9));
    assert!(merged.paged.has_next);
  }

  #[test]
  fn last_page_replaces_everything() {
    let current = snapshot(vec![3, 4, 6, 8], Some(9));
    let merged = splicer(true).prepend(Some(current), Page::new(vec![1, 2], None), None);

    assert_eq!(items(&merged), vec![1, 2]);
    assert_eq!(merged.state, PagingState::default());
  }

  #[test]
  fn same_page_twice_only_duplicates_when_not_unique() {
    let page = || Page::new(vec![3, 4, 6], Some(7));

    let unique = splicer(true);
    let once = unique.prepend(None, page(), None);
    let twice = unique.prepend(Some(once), page(), None);
    assert_eq!(items(&twice), vec![3, 4, 6]);

    let repeating = splicer(false);
    let once = repeating.prepend(None, page(), None);
    let twice = repeating.prepend(Some(once), page(), None);
    assert_eq!(items(&twice), vec![3, 4, 6, 6]);
  }

  #[test]
  fn identity_collapses_boundary_duplicates() {
    let splicer = Splicer {
      merge: MergeStrategy::natural(),
      identity: IdentityProvider::by_key(|item: &u32| *item),
      unique: false,
    };
    let current = snapshot(vec![1, 2, 3], Some(3));
    let merged = splicer.append(current, Page::new(vec![3, 4, 5], Some(6)), Some(3));

    assert_eq!(items(&merged), vec![1, 2, 3, 4, 5]);
    assert_eq!(merged.state.next_key, Some(6));
  }

  #[test]
  fn append_replaces_overlapping_tail() {
    let current = snapshot(vec![1, 2, 3, 4], Some(3));
    let merged = splicer(true).append(current, Page::new(vec![3, 5], None), Some(3));

    assert_eq!(items(&merged), vec![1, 2, 3, 5]);
    assert!(!merged.paged.has_next);
    assert!(!merged.state.has_next);
  }

  #[test]
  fn cleared_append_restarts_refreshes_from_its_key() {
    let splicer = Splicer {
      merge: MergeStrategy::<u32>::None,
      identity: IdentityProvider::none(),
      unique: true,
    };
    let current = snapshot(vec![], Some(5));
    let merged = splicer.append(current, Page::new(vec![5, 6], Some(7)), Some(5));

    assert_eq!(items(&merged), vec![5, 6]);
    assert_eq!(merged.state.refresh_key, Some(5));
  }

  #[test]
  fn unordered_keyed_refresh_keeps_cached_tail() {
    let splicer = Splicer {
      merge: MergeStrategy::<u32>::None,
      identity: IdentityProvider::by_key(|item: &u32| *item),
      unique: true,
    };
    let mut current = snapshot(vec![5, 6, 7], Some(8));
    current.state.refresh_key = Some(5);

    let merged = splicer.prepend(Some(current), Page::new(vec![9, 5], Some(6)), Some(5));
    assert_eq!(items(&merged), vec![9, 5, 6, 7]);
    assert_eq!(merged.state.next_key, Some(8));
    assert_eq!(merged.state.refresh_key, Some(5));
  }

  #[test]
  fn unordered_unkeyed_pages_replace_the_list() {
    let splicer = Splicer {
      merge: MergeStrategy::<u32>::None,
      identity: IdentityProvider::none(),
      unique: true,
    };
    let current = snapshot(vec![5, 6, 7], Some(8));
    let merged = splicer.prepend(Some(current), Page::new(vec![1, 2], Some(3)), None);
    assert_eq!(items(&merged), vec![1, 2]);
    assert_eq!(merged.state.next_key, Some(3));

    let merged = splicer.append(merged, Page::new(vec![3, 4], Some(5)), None);
    assert_eq!(items(&merged), vec![3, 4]);
  }
}
