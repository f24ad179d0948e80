use crate::builder::InflowBuilder;
use crate::cache::{CacheReader, CacheWriter, MemoryCache};
use crate::config::InflowConfig;
use crate::connectivity::Connectivity;
use crate::error::{BoxError, BuildError, LoadError};
use crate::expiration::ExpirationPolicy;
use crate::handles::{Inflow, InflowParts};
use crate::paging::engine::{PagedView, PagerFn, PagingEngine, Splicer};
use crate::paging::identity::IdentityProvider;
use crate::paging::merge::MergeStrategy;
use crate::paging::{Page, Paged, PagedInflow, PagingSnapshot};
use crate::runtime::TaskSpawner;

use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// A builder for creating `PagedInflow` instances.
///
/// Options shared with plain inflows (expiration, retries, connectivity,
/// spawners) apply to the refresh of the first page.
pub struct PagedBuilder<T, K> {
  inner: InflowBuilder<Paged<T>>,
  page_size: usize,
  pager: Option<PagerFn<T, K>>,
  merge: MergeStrategy<T>,
  identity: IdentityProvider<T>,
  unique: bool,
  reader: Option<Arc<dyn CacheReader<PagingSnapshot<T, K>>>>,
  writer: Option<Arc<dyn CacheWriter<PagingSnapshot<T, K>>>>,
}

impl<T, K> fmt::Debug for PagedBuilder<T, K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PagedBuilder")
      .field("inner", &self.inner)
      .field("page_size", &self.page_size)
      .field("merge", &self.merge)
      .field("identity", &self.identity)
      .field("unique", &self.unique)
      .field("has_pager", &self.pager.is_some())
      .finish_non_exhaustive()
  }
}

// --- Paging Configuration Methods ---
impl<T, K> PagedBuilder<T, K> {
  pub fn new() -> Self {
    Self {
      inner: InflowBuilder::new(),
      page_size: DEFAULT_PAGE_SIZE,
      pager: None,
      merge: MergeStrategy::None,
      identity: IdentityProvider::none(),
      unique: false,
      reader: None,
      writer: None,
    }
  }

  /// The number of items requested per page. Defaults to 20.
  pub fn page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size;
    self
  }

  /// Sets how pages are spliced into the cached list.
  pub fn merge(mut self, merge: MergeStrategy<T>) -> Self {
    self.merge = merge;
    self
  }

  /// Sets how stale duplicates are recognized after a splice.
  pub fn identity(mut self, identity: IdentityProvider<T>) -> Self {
    self.identity = identity;
    self
  }

  /// Declares that items (or their merge keys) are unique across the whole list.
  ///
  /// Defaults to `false`, which keeps items ranking equal to a page boundary
  /// around until identity removes them.
  pub fn unique(mut self, unique: bool) -> Self {
    self.unique = unique;
    self
  }

  fn with_inner(mut self, configure: impl FnOnce(InflowBuilder<Paged<T>>) -> InflowBuilder<Paged<T>>) -> Self {
    self.inner = configure(self.inner);
    self
  }

  // --- Shared Configuration Methods ---

  pub fn config(self, config: InflowConfig) -> Self {
    self.with_inner(|inner| inner.config(config))
  }

  pub fn expiration(self, policy: ExpirationPolicy<Paged<T>>) -> Self {
    self.with_inner(|inner| inner.expiration(policy))
  }

  pub fn keep_cache_subscribed(self, duration: Duration) -> Self {
    self.with_inner(|inner| inner.keep_cache_subscribed(duration))
  }

  pub fn retry_time(self, duration: Duration) -> Self {
    self.with_inner(|inner| inner.retry_time(duration))
  }

  pub fn never_retry(self) -> Self {
    self.with_inner(InflowBuilder::never_retry)
  }

  pub fn log_id(self, log_id: impl Into<String>) -> Self {
    self.with_inner(|inner| inner.log_id(log_id))
  }

  pub fn connectivity(self, provider: Arc<dyn Connectivity>) -> Self {
    self.with_inner(|inner| inner.connectivity(provider))
  }

  pub fn default_connectivity(self) -> Self {
    self.with_inner(InflowBuilder::default_connectivity)
  }

  pub fn spawner(self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.with_inner(|inner| inner.spawner(spawner))
  }

  pub fn cache_spawner(self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.with_inner(|inner| inner.cache_spawner(spawner))
  }

  pub fn load_spawner(self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.with_inner(|inner| inner.load_spawner(spawner))
  }
}

impl<T, K> Default for PagedBuilder<T, K> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<T, K> PagedBuilder<T, K>
where
  T: Clone + Send + Sync + 'static,
  K: Clone + Send + Sync + 'static,
{
  /// Sets the pager, called with the page size and the key of the wanted
  /// page (`None` for the first page).
  pub fn pager<F, Fut, E>(mut self, f: F) -> Self
  where
    F: Fn(usize, Option<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page<T, K>, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let pager: PagerFn<T, K> =
      Arc::new(move |count, key| f(count, key).map(|result| result.map_err(LoadError::new)).boxed());
    self.pager = Some(pager);
    self
  }

  /// Stores the list and its paging state in `cache`. Defaults to memory.
  pub fn cache<C>(mut self, cache: C) -> Self
  where
    C: CacheReader<PagingSnapshot<T, K>> + CacheWriter<PagingSnapshot<T, K>>,
  {
    let cache = Arc::new(cache);
    self.reader = Some(cache.clone());
    self.writer = Some(cache);
    self
  }

  /// Builds and starts a `PagedInflow`.
  pub fn build(mut self) -> Result<PagedInflow<T, K>, BuildError> {
    if self.page_size == 0 {
      return Err(BuildError::ZeroPageSize);
    }
    let resolved = self.inner.resolve()?;
    let pager = self.pager.take().ok_or(BuildError::MissingLoader)?;
    let (reader, writer) = match (self.reader.take(), self.writer.take()) {
      (Some(reader), Some(writer)) => (reader, writer),
      _ => {
        let memory = MemoryCache::new();
        let reader: Arc<dyn CacheReader<PagingSnapshot<T, K>>> = Arc::new(memory.clone());
        let writer: Arc<dyn CacheWriter<PagingSnapshot<T, K>>> = Arc::new(memory);
        (reader, writer)
      }
    };

    let log_id: Arc<str> = Arc::from(resolved.settings.log_id.as_str());
    let token = CancellationToken::new();
    let engine = Arc::new(PagingEngine {
      pager,
      page_size: self.page_size,
      splicer: Splicer {
        merge: self.merge,
        identity: self.identity,
        unique: self.unique,
      },
      reader: reader.clone(),
      writer,
      expiration: resolved.expiration.clone(),
      cache_spawner: resolved.cache_spawner.clone(),
      token: token.clone(),
      log_id: log_id.clone(),
      merging: Mutex::new(()),
    });

    let inflow = Inflow::start(InflowParts {
      reader: Arc::new(PagedView { source: reader }),
      action: engine.clone(),
      expiration: resolved.expiration,
      keep_cache_subscribed: resolved.settings.keep_cache_subscribed,
      retry_time: resolved.settings.retry_time,
      connectivity: resolved.connectivity,
      cache_spawner: resolved.cache_spawner,
      load_spawner: resolved.load_spawner.clone(),
      token: token.clone(),
      log_id,
    });
    Ok(PagedInflow::new(inflow, engine, resolved.load_spawner, token))
  }
}
