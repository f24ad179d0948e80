use crate::cache::{CacheReader, CacheWriter, FnCache, MemoryCache};
use crate::config::{duration_to_ms, InflowConfig, Settings};
use crate::connectivity::{self, Connectivity};
use crate::error::{BoxError, BuildError, LoadError};
use crate::expiration::ExpirationPolicy;
use crate::handles::{Inflow, InflowParts};
use crate::loader::{LoadAndStore, LoadFn};
use crate::runtime::{TaskSpawner, TokioSpawner};

use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

/// Where the connectivity signal comes from.
#[derive(Clone)]
pub(crate) enum ConnectivitySource {
  None,
  Provided(Arc<dyn Connectivity>),
  ProcessDefault,
}

/// The builder settings after validation, shared with the paged builder.
pub(crate) struct Resolved<T> {
  pub(crate) settings: Settings,
  pub(crate) expiration: ExpirationPolicy<T>,
  pub(crate) connectivity: Option<Arc<dyn Connectivity>>,
  pub(crate) cache_spawner: Arc<dyn TaskSpawner>,
  pub(crate) load_spawner: Arc<dyn TaskSpawner>,
}

/// A builder for creating `Inflow` instances.
pub struct InflowBuilder<T> {
  pub(crate) config: InflowConfig,
  pub(crate) expiration: ExpirationPolicy<T>,
  pub(crate) connectivity: ConnectivitySource,
  loader: Option<LoadFn<T>>,
  reader: Option<Arc<dyn CacheReader<T>>>,
  writer: Option<Arc<dyn CacheWriter<T>>>,
  cache_spawner: Option<Arc<dyn TaskSpawner>>,
  load_spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for InflowBuilder.
impl<T> fmt::Debug for InflowBuilder<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InflowBuilder")
      .field("config", &self.config)
      .field("expiration", &self.expiration)
      .field("has_loader", &self.loader.is_some())
      .field("has_cache", &self.reader.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<T> InflowBuilder<T> {
  /// Creates a new `InflowBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      config: InflowConfig::default(),
      expiration: ExpirationPolicy::Never,
      connectivity: ConnectivitySource::None,
      loader: None,
      reader: None,
      writer: None,
      cache_spawner: None,
      load_spawner: None,
    }
  }

  /// Replaces all scalar settings with the given config.
  pub fn config(mut self, config: InflowConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the expiration policy deciding when cached data is refreshed.
  ///
  /// Defaults to `ExpirationPolicy::Never`: data is loaded once, when the
  /// cache is empty, and only refreshed on demand afterwards.
  pub fn expiration(mut self, policy: ExpirationPolicy<T>) -> Self {
    self.expiration = policy;
    self
  }

  /// Sets how long the cache stays subscribed after its last subscriber left.
  ///
  /// Defaults to `1 second`.
  pub fn keep_cache_subscribed(mut self, duration: Duration) -> Self {
    self.config.keep_cache_subscribed_ms = duration_to_ms(duration);
    self
  }

  /// Sets the delay between failed refresh attempts. Must be positive.
  ///
  /// Defaults to `60 seconds`.
  pub fn retry_time(mut self, duration: Duration) -> Self {
    self.config.retry_ms = Some(duration_to_ms(duration));
    self
  }

  /// Disables retries of failed refreshes.
  pub fn never_retry(mut self) -> Self {
    self.config.retry_ms = None;
    self
  }

  /// Sets the identifier attached to this instance's log lines.
  pub fn log_id(mut self, log_id: impl Into<String>) -> Self {
    self.config.log_id = Some(log_id.into());
    self
  }

  /// Gates automatic refresh on the given connectivity signal.
  pub fn connectivity(mut self, provider: Arc<dyn Connectivity>) -> Self {
    self.connectivity = ConnectivitySource::Provided(provider);
    self
  }

  /// Gates automatic refresh on the process-wide connectivity provider.
  ///
  /// See `connectivity::register_default`.
  pub fn default_connectivity(mut self) -> Self {
    self.connectivity = ConnectivitySource::ProcessDefault;
    self
  }

  /// Runs both the cache and the load context on `spawner`.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.cache_spawner = Some(spawner.clone());
    self.load_spawner = Some(spawner);
    self
  }

  /// Sets the spawner for cache subscriptions and writes.
  pub fn cache_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.cache_spawner = Some(spawner);
    self
  }

  /// Sets the spawner for loads and refresh scheduling.
  pub fn load_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.load_spawner = Some(spawner);
    self
  }

  /// Validates the shared settings and resolves defaults.
  pub(crate) fn resolve(&mut self) -> Result<Resolved<T>, BuildError> {
    let settings = self.config.validate()?;

    let connectivity = match &self.connectivity {
      ConnectivitySource::None => None,
      ConnectivitySource::Provided(provider) => Some(provider.clone()),
      ConnectivitySource::ProcessDefault => {
        Some(connectivity::default_provider().ok_or(BuildError::NoDefaultConnectivity)?)
      }
    };

    let (cache_spawner, load_spawner) = match (self.cache_spawner.take(), self.load_spawner.take()) {
      (Some(cache), Some(load)) => (cache, load),
      (cache, load) => {
        let fallback: Arc<dyn TaskSpawner> =
          Arc::new(TokioSpawner::try_current().ok_or(BuildError::SpawnerRequired)?);
        (
          cache.unwrap_or_else(|| fallback.clone()),
          load.unwrap_or(fallback),
        )
      }
    };

    Ok(Resolved {
      settings,
      expiration: self.expiration.clone(),
      connectivity,
      cache_spawner,
      load_spawner,
    })
  }
}

impl<T> Default for InflowBuilder<T> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
// This impl block contains the full set of trait bounds required to actually
// start the background tasks.
impl<T> InflowBuilder<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Sets the loader producing fresh data.
  pub fn loader<F, Fut, E>(mut self, f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let load: LoadFn<T> = Arc::new(move || f().map(|result| result.map_err(LoadError::new)).boxed());
    self.loader = Some(load);
    self
  }

  /// Uses `cache` for both reading and writing.
  pub fn cache<C>(mut self, cache: C) -> Self
  where
    C: CacheReader<T> + CacheWriter<T>,
  {
    let cache = Arc::new(cache);
    self.reader = Some(cache.clone());
    self.writer = Some(cache);
    self
  }

  /// Sets the cache reader. A writer must be configured as well.
  pub fn cache_reader(mut self, reader: impl CacheReader<T>) -> Self {
    self.reader = Some(Arc::new(reader));
    self
  }

  /// Sets the cache writer. A reader must be configured as well.
  pub fn cache_writer(mut self, writer: impl CacheWriter<T>) -> Self {
    self.writer = Some(Arc::new(writer));
    self
  }

  /// Uses a pair of closures as the cache.
  ///
  /// `read` must return a stream that emits `None` first when nothing is
  /// cached yet.
  pub fn cache_fn<R, S, W, Fut>(self, read: R, write: W) -> Self
  where
    R: Fn() -> S + Send + Sync + 'static,
    S: Stream<Item = Option<T>> + Send + 'static,
    W: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.cache(FnCache::new(read, write))
  }

  /// Builds and starts an `Inflow`.
  pub fn build(mut self) -> Result<Inflow<T>, BuildError> {
    let resolved = self.resolve()?;
    let load = self.loader.take().ok_or(BuildError::MissingLoader)?;
    let (reader, writer) = match (self.reader.take(), self.writer.take()) {
      (Some(reader), Some(writer)) => (reader, writer),
      (None, None) => {
        let memory = MemoryCache::new();
        let reader: Arc<dyn CacheReader<T>> = Arc::new(memory.clone());
        let writer: Arc<dyn CacheWriter<T>> = Arc::new(memory);
        (reader, writer)
      }
      _ => return Err(BuildError::IncompleteCache),
    };

    let log_id: Arc<str> = Arc::from(resolved.settings.log_id.as_str());
    let token = CancellationToken::new();
    let action = LoadAndStore {
      load,
      writer,
      expiration: resolved.expiration.clone(),
      cache_spawner: resolved.cache_spawner.clone(),
      token: token.clone(),
      log_id: log_id.clone(),
    };

    Ok(Inflow::start(InflowParts {
      reader,
      action: Arc::new(action),
      expiration: resolved.expiration,
      keep_cache_subscribed: resolved.settings.keep_cache_subscribed,
      retry_time: resolved.settings.retry_time,
      connectivity: resolved.connectivity,
      cache_spawner: resolved.cache_spawner,
      load_spawner: resolved.load_spawner,
      token,
      log_id,
    }))
  }
}
