use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building an `Inflow` or a paged inflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No loader was configured. Every inflow needs one.
  #[error("a loader is required")]
  MissingLoader,
  /// Only one half of a custom cache was configured.
  #[error("a custom cache needs both a reader and a writer")]
  IncompleteCache,
  /// The cache keep-alive delay was negative.
  #[error("cache keep-alive delay cannot be negative (got {0}ms)")]
  NegativeKeepAlive(i64),
  /// The retry delay was zero or negative. Use `never_retry()` to disable retries.
  #[error("retry time must be positive (got {0}ms)")]
  InvalidRetryTime(i64),
  /// No `TaskSpawner` was configured and the builder was not called from
  /// within a Tokio runtime.
  #[error("a task spawner is required when building outside of a tokio runtime")]
  SpawnerRequired,
  /// `default_connectivity()` was requested but no provider was registered.
  #[error("no default connectivity provider was registered")]
  NoDefaultConnectivity,
  /// A paged inflow was configured with a page size of zero.
  #[error("page size cannot be zero")]
  ZeroPageSize,
}

/// Errors returned by operations on a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InflowError {
  /// The instance was closed. Closed instances cannot be restarted.
  #[error("inflow is closed")]
  Closed,
  /// The loader returned data that is already expired according to the
  /// configured expiration policy. This is a programming error: refreshing
  /// would loop forever, so it is never retried.
  #[error("[{log_id}] loader returned data that is already expired")]
  ExpiredOnArrival { log_id: String },
}

impl InflowError {
  /// Whether this error signals a broken invariant rather than a closed instance.
  pub fn is_fatal(&self) -> bool {
    matches!(self, InflowError::ExpiredOnArrival { .. })
  }
}

/// A boxed error as produced by user loaders.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A cheaply cloneable loader failure, as observed through `error()` streams.
#[derive(Clone)]
pub struct LoadError(Arc<dyn StdError + Send + Sync + 'static>);

impl LoadError {
  pub fn new<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    Self(Arc::from(error.into()))
  }

  /// Returns the underlying error.
  pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.0
  }

  /// Attempts to downcast the underlying error to a concrete type.
  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
    self.0.downcast_ref::<E>()
  }

  /// Whether both values refer to the very same failure.
  pub fn ptr_eq(&self, other: &LoadError) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for LoadError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("LoadError").field(&self.0).finish()
  }
}

impl fmt::Display for LoadError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl StdError for LoadError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

impl PartialEq for LoadError {
  fn eq(&self, other: &Self) -> bool {
    self.ptr_eq(other)
  }
}

/// The result of a single load attempt, as seen by the single-flight layer.
#[derive(Debug)]
pub(crate) enum AttemptError {
  /// Recoverable failure, recorded into the error state.
  Failed(LoadError),
  /// Broken invariant, escapes to the caller.
  Fatal(InflowError),
}
