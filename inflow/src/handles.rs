use crate::cache::CacheReader;
use crate::connectivity::Connectivity;
use crate::error::{InflowError, LoadError};
use crate::expiration::ExpirationPolicy;
use crate::hub::CacheHub;
use crate::loader::{LoadOutcome, Loader, Refresh};
use crate::runtime::{run_on, spawn_cancellable, TaskSpawner};
use crate::stream::{distinct_until_changed, until_closed};
use crate::task::activation::activation;
use crate::task::scheduler::{self, SchedulerContext};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Everything needed to start an inflow, once the builder has validated it.
pub(crate) struct InflowParts<T> {
  pub(crate) reader: Arc<dyn CacheReader<T>>,
  pub(crate) action: Arc<dyn Refresh>,
  pub(crate) expiration: ExpirationPolicy<T>,
  pub(crate) keep_cache_subscribed: Duration,
  pub(crate) retry_time: Option<Duration>,
  pub(crate) connectivity: Option<Arc<dyn Connectivity>>,
  pub(crate) cache_spawner: Arc<dyn TaskSpawner>,
  pub(crate) load_spawner: Arc<dyn TaskSpawner>,
  pub(crate) token: CancellationToken,
  pub(crate) log_id: Arc<str>,
}

/// The internal core of an inflow, shared by all of its handles.
pub(crate) struct InflowShared<T> {
  pub(crate) log_id: Arc<str>,
  pub(crate) hub: CacheHub<T>,
  pub(crate) loader: Arc<Loader>,
  pub(crate) load_spawner: Arc<dyn TaskSpawner>,
  pub(crate) token: CancellationToken,
}

impl<T> Drop for InflowShared<T> {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

// --- Inflow Implementation ---

/// An observable cache that keeps itself fresh.
///
/// The cached value is exposed through `data()`; subscribing with
/// `auto_refresh` enabled keeps the value refreshed according to the
/// expiration policy, retrying failed loads until fresh data arrives.
///
/// `Inflow` is a cheap handle. The instance stops when `close()` is called or
/// when the last handle is dropped.
pub struct Inflow<T> {
  pub(crate) shared: Arc<InflowShared<T>>,
}

impl<T> Clone for Inflow<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for Inflow<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Inflow")
      .field("log_id", &self.shared.log_id)
      .field("loading", &self.shared.loader.flight().is_loading())
      .field("closed", &self.shared.token.is_cancelled())
      .finish_non_exhaustive()
  }
}

impl<T> Inflow<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub(crate) fn start(parts: InflowParts<T>) -> Self {
    let InflowParts {
      reader,
      action,
      expiration,
      keep_cache_subscribed,
      retry_time,
      connectivity,
      cache_spawner,
      load_spawner,
      token,
      log_id,
    } = parts;

    let hub = CacheHub::new(
      reader,
      keep_cache_subscribed,
      cache_spawner,
      token.child_token(),
      log_id.clone(),
    );
    let loader = Arc::new(Loader::new(action, log_id.clone()));

    let activation = activation(hub.active(), connectivity.map(|c| c.connected()));
    scheduler::spawn(
      SchedulerContext {
        hub: hub.clone(),
        expiration,
        retry_time,
        log_id: log_id.clone(),
      },
      activation,
      loader.clone(),
      &load_spawner,
      &token,
    );
    tracing::debug!(inflow = %log_id, "started");

    Self {
      shared: Arc::new(InflowShared {
        log_id,
        hub,
        loader,
        load_spawner,
        token,
      }),
    }
  }

  /// The cached data.
  ///
  /// Emits the current value (if any) followed by every update. With
  /// `auto_refresh`, the subscription counts as interest in fresh data and
  /// keeps the automatic refresh running while it is alive.
  pub fn data(&self, auto_refresh: bool) -> Result<BoxStream<'static, T>, InflowError> {
    self.ensure_open()?;
    let values = self
      .shared
      .hub
      .subscribe(auto_refresh)
      .filter_map(future::ready);
    Ok(until_closed(values, &self.shared.token))
  }

  /// Whether a load is in flight, emitting the current state first.
  pub fn loading(&self) -> Result<BoxStream<'static, bool>, InflowError> {
    self.ensure_open()?;
    let states = WatchStream::new(self.shared.loader.flight().subscribe()).map(|state| state.loading);
    Ok(until_closed(distinct_until_changed(states), &self.shared.token))
  }

  /// The error of the last load, emitting the current state first.
  ///
  /// Every load start resets it to `None`.
  pub fn error(&self) -> Result<BoxStream<'static, Option<LoadError>>, InflowError> {
    self.ensure_open()?;
    let states = WatchStream::new(self.shared.loader.flight().subscribe()).map(|state| state.error);
    Ok(until_closed(distinct_until_changed(states), &self.shared.token))
  }

  /// Whether a load is currently in flight.
  pub fn is_loading(&self) -> bool {
    self.shared.loader.flight().is_loading()
  }

  /// The error of the last load, if it failed.
  pub fn last_error(&self) -> Option<LoadError> {
    self.shared.loader.flight().last_error()
  }

  /// Returns what is cached right now, `None` if nothing is.
  ///
  /// Does not count as an auto-refresh subscriber.
  pub async fn cached(&self) -> Result<Option<T>, InflowError> {
    self.ensure_open()?;
    let mut values = self.shared.hub.subscribe(false);
    tokio::select! {
      _ = self.shared.token.cancelled() => Err(InflowError::Closed),
      value = values.next() => value.ok_or(InflowError::Closed),
    }
  }

  /// Starts a refresh in the background.
  ///
  /// If a refresh is already running, `repeat_if_running` schedules exactly
  /// one more attempt after it; otherwise the request is dropped.
  pub fn refresh(&self, repeat_if_running: bool) -> Result<(), InflowError> {
    self.ensure_open()?;
    let loader = self.shared.loader.clone();
    spawn_cancellable(&self.shared.load_spawner, self.shared.token.child_token(), async move {
      if let Err(fatal) = loader.load(repeat_if_running).await {
        panic!("{fatal}");
      }
    });
    Ok(())
  }

  /// Refreshes and waits for the refresh to finish.
  ///
  /// If a refresh is already running, waits for that one instead (plus the
  /// extra attempt when `repeat_if_running` is set). Load failures are
  /// reported through `error()`; only fatal errors and closing are returned.
  pub async fn refresh_blocking(&self, repeat_if_running: bool) -> Result<LoadOutcome, InflowError> {
    self.ensure_open()?;
    let loader = self.shared.loader.clone();
    let load = async move { loader.load_or_wait(repeat_if_running).await };
    match run_on(&self.shared.load_spawner, self.shared.token.child_token(), load).await {
      Some(result) => result,
      None => Err(InflowError::Closed),
    }
  }

  /// Stops all background work. Closed instances cannot be restarted and
  /// every later operation fails with `InflowError::Closed`.
  pub fn close(&self) {
    if !self.shared.token.is_cancelled() {
      tracing::debug!(inflow = %self.shared.log_id, "closing");
      self.shared.token.cancel();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.shared.token.is_cancelled()
  }

  pub(crate) fn ensure_open(&self) -> Result<(), InflowError> {
    if self.shared.token.is_cancelled() {
      return Err(InflowError::Closed);
    }
    Ok(())
  }
}
