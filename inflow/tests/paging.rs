mod common;

use common::failure;
use futures_util::StreamExt;
use inflow::{
  InflowError, LoadOutcome, LoadState, MemoryCache, MergeStrategy, Page, Paged, PagedBuilder, PagedInflow,
  PagingSnapshot, PagingState,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// A sorted upstream list, paged by "items after the key" cursors.
#[derive(Clone, Default)]
struct Server {
  items: Arc<Mutex<Vec<u32>>>,
  calls: Arc<Mutex<Vec<Option<u32>>>>,
  offline: Arc<AtomicBool>,
  latency: Option<Duration>,
}

impl Server {
  fn new(items: impl IntoIterator<Item = u32>) -> Self {
    let server = Self::default();
    server.replace(items);
    server
  }

  fn replace(&self, items: impl IntoIterator<Item = u32>) {
    *self.items.lock() = items.into_iter().collect();
  }

  fn calls(&self) -> Vec<Option<u32>> {
    self.calls.lock().clone()
  }

  async fn page(&self, count: usize, key: Option<u32>) -> io::Result<Page<u32, u32>> {
    self.calls.lock().push(key);
    if let Some(latency) = self.latency {
      sleep(latency).await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(failure("offline"));
    }
    let items = self.items.lock();
    let mut after = items.iter().copied().filter(|item| key.map_or(true, |key| *item > key));
    let page: Vec<u32> = after.by_ref().take(count).collect();
    let next_key = match after.next() {
      Some(_) => page.last().copied(),
      None => None,
    };
    Ok(Page::new(page, next_key))
  }

  fn builder(&self) -> PagedBuilder<u32, u32> {
    let server = self.clone();
    PagedBuilder::new().page_size(3).pager(move |count, key| {
      let server = server.clone();
      async move { server.page(count, key).await }
    })
  }
}

fn restored(items: Vec<u32>, next_key: Option<u32>) -> MemoryCache<PagingSnapshot<u32, u32>> {
  let has_next = next_key.is_some();
  MemoryCache::with_value(PagingSnapshot {
    paged: Paged::new(items, has_next),
    state: PagingState {
      has_next,
      next_key,
      refresh_key: None,
    },
  })
}

async fn items(paged: &PagedInflow<u32, u32>) -> Vec<u32> {
  paged.cached().await.unwrap().unwrap_or_default().items.to_vec()
}

#[tokio::test]
async fn test_pages_are_appended_until_exhausted() {
  common::init_tracing();
  let server = Server::new(1..=8);
  let paged = server.builder().build().unwrap();

  let mut data = paged.data(true).unwrap();
  let first = data.next().await.unwrap();
  assert_eq!(first.items.to_vec(), vec![1, 2, 3]);
  assert!(first.has_next);

  assert_eq!(paged.load_next_blocking().await.unwrap(), LoadOutcome::Ran);
  assert_eq!(items(&paged).await, vec![1, 2, 3, 4, 5, 6]);

  paged.load_next_blocking().await.unwrap();
  let last = paged.cached().await.unwrap().unwrap();
  assert_eq!(last.items.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
  assert!(!last.has_next);

  // Nothing left to load.
  paged.load_next_blocking().await.unwrap();
  assert_eq!(server.calls(), vec![None, Some(3), Some(6)]);
}

#[tokio::test]
async fn test_refresh_merges_first_page_into_loaded_pages() {
  common::init_tracing();
  let server = Server::new([10, 20, 30, 40, 50, 60, 70, 80]);
  let paged = server.builder().merge(MergeStrategy::natural()).unique(true).build().unwrap();

  paged.refresh_blocking(false).await.unwrap();
  paged.load_next_blocking().await.unwrap();
  assert_eq!(items(&paged).await, vec![10, 20, 30, 40, 50, 60]);

  server.replace([5, 10, 30, 40, 50, 60, 70, 80]);
  paged.refresh_blocking(false).await.unwrap();
  assert_eq!(items(&paged).await, vec![5, 10, 30, 40, 50, 60]);

  // Paging continues where the older pages left off.
  paged.load_next_blocking().await.unwrap();
  let paged_list = paged.cached().await.unwrap().unwrap();
  assert_eq!(paged_list.items.to_vec(), vec![5, 10, 30, 40, 50, 60, 70, 80]);
  assert!(!paged_list.has_next);
  assert_eq!(server.calls(), vec![None, Some(30), None, Some(60)]);
}

#[tokio::test(start_paused = true)]
async fn test_load_next_state_reports_failures() {
  common::init_tracing();
  let server = Server {
    latency: Some(Duration::from_millis(100)),
    ..Server::new(1..=8)
  };
  let paged = server.builder().build().unwrap();
  paged.refresh_blocking(false).await.unwrap();

  let mut states = paged.load_next_state().unwrap();
  assert_eq!(states.next().await, Some(LoadState::Idle));

  server.offline.store(true, Ordering::SeqCst);
  paged.load_next_blocking().await.unwrap();
  match states.next().await {
    Some(LoadState::Failed(error)) => assert_eq!(error.to_string(), "offline"),
    other => panic!("expected a failure, got {other:?}"),
  }
  assert_eq!(items(&paged).await, vec![1, 2, 3], "failed pages leave the list alone");

  server.offline.store(false, Ordering::SeqCst);
  paged.load_next().unwrap();
  assert_eq!(states.next().await, Some(LoadState::Loading));
  assert_eq!(states.next().await, Some(LoadState::Idle));
  assert_eq!(items(&paged).await, vec![1, 2, 3, 4, 5, 6]);

  // The first page's error state is separate.
  assert_eq!(paged.as_inflow().last_error(), None);
}

#[tokio::test]
async fn test_restored_last_page_loads_nothing() {
  let server = Server::new(1..=8);
  let paged = server.builder().cache(restored(vec![1, 2, 3], None)).build().unwrap();

  assert_eq!(paged.load_next_blocking().await.unwrap(), LoadOutcome::Ran);
  assert_eq!(items(&paged).await, vec![1, 2, 3]);
  assert_eq!(server.calls(), Vec::<Option<u32>>::new());
}

#[tokio::test]
async fn test_restored_snapshot_continues_paging() {
  let server = Server::new(1..=8);
  let paged = server.builder().cache(restored(vec![1, 2, 3], Some(3))).build().unwrap();

  paged.load_next_blocking().await.unwrap();

  assert_eq!(items(&paged).await, vec![1, 2, 3, 4, 5, 6]);
  assert_eq!(server.calls(), vec![Some(3)]);
}

#[tokio::test]
async fn test_key_gap_drops_cached_pages() {
  common::init_tracing();
  let server = Server::new([1, 2, 3, 4, 10, 20, 30]);
  let paged = server
    .builder()
    .merge(MergeStrategy::by_key(|item: &u32| *item))
    .unique(true)
    .cache(restored(vec![10, 20, 30], Some(30)))
    .build()
    .unwrap();

  paged.refresh_blocking(false).await.unwrap();

  let list = paged.cached().await.unwrap().unwrap();
  assert_eq!(list.items.to_vec(), vec![1, 2, 3]);
  assert!(list.has_next);

  paged.load_next_blocking().await.unwrap();
  assert_eq!(items(&paged).await, vec![1, 2, 3, 4, 10, 20]);
  assert_eq!(server.calls(), vec![None, Some(3)]);
}

#[tokio::test]
async fn test_closed_paged_inflow_rejects_operations() {
  let server = Server::new(1..=8);
  let paged = server.builder().build().unwrap();
  let other = paged.clone();

  other.close();

  assert!(paged.is_closed());
  assert_eq!(paged.load_next(), Err(InflowError::Closed));
  assert_eq!(paged.load_next_blocking().await, Err(InflowError::Closed));
  assert!(paged.load_next_state().is_err());
  assert_eq!(paged.refresh(false), Err(InflowError::Closed));
}
