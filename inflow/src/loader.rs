//! Single-flight loading.
//!
//! At most one load runs per loader at a time. Concurrent requests are either
//! dropped or, when forced, collapse into a single follow-up attempt that runs
//! right after the current one, however many forced requests arrive.

use crate::cache::CacheWriter;
use crate::error::{AttemptError, InflowError, LoadError};
use crate::expiration::ExpirationPolicy;
use crate::runtime::{run_on, TaskSpawner};

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const IDLE: u8 = 0;
const LOADING: u8 = 1;
/// Loading, with one forced follow-up attempt pending.
const LOADING_REPEAT: u8 = 2;

/// What happened to a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
  /// The request ran the loader to completion (including any forced repeats).
  Ran,
  /// A load was already running; an extra attempt will follow it.
  Joined,
  /// A load was already running; the request was dropped.
  Skipped,
}

/// Observable state of a loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FlightState {
  pub(crate) loading: bool,
  pub(crate) error: Option<LoadError>,
}

/// Resets the flight to idle if a run is cancelled midway, without
/// publishing any completion state.
struct CancelGuard<'a> {
  status: &'a AtomicU8,
  armed: bool,
}

impl Drop for CancelGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.status.store(IDLE, Ordering::Release);
    }
  }
}

/// The Idle/Loading state machine shared by plain and paged loading.
pub(crate) struct SingleFlight {
  status: AtomicU8,
  state: watch::Sender<FlightState>,
  log_id: Arc<str>,
}

impl SingleFlight {
  pub(crate) fn new(log_id: Arc<str>) -> Self {
    Self {
      status: AtomicU8::new(IDLE),
      state: watch::Sender::new(FlightState::default()),
      log_id,
    }
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<FlightState> {
    self.state.subscribe()
  }

  pub(crate) fn is_loading(&self) -> bool {
    self.state.borrow().loading
  }

  pub(crate) fn last_error(&self) -> Option<LoadError> {
    self.state.borrow().error.clone()
  }

  /// Runs `attempt` unless another run is in flight.
  ///
  /// Transient failures are recorded into the observable state and do not
  /// surface here. Fatal failures do.
  pub(crate) async fn run<F, Fut>(&self, force: bool, mut attempt: F) -> Result<LoadOutcome, InflowError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AttemptError>>,
  {
    let claimed = self
      .status
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| match status {
        IDLE => Some(LOADING),
        LOADING if force => Some(LOADING_REPEAT),
        _ => None,
      });
    match claimed {
      Ok(IDLE) => {}
      Ok(_) => return Ok(LoadOutcome::Joined),
      Err(LOADING_REPEAT) if force => return Ok(LoadOutcome::Joined),
      Err(_) => return Ok(LoadOutcome::Skipped),
    }

    let mut guard = CancelGuard {
      status: &self.status,
      armed: true,
    };

    self.publish_start();
    loop {
      let error = match attempt().await {
        Ok(()) => {
          tracing::debug!(inflow = %self.log_id, "load finished");
          None
        }
        Err(AttemptError::Failed(error)) => {
          tracing::warn!(inflow = %self.log_id, %error, "load failed");
          Some(error)
        }
        Err(AttemptError::Fatal(fatal)) => {
          tracing::error!(inflow = %self.log_id, error = %fatal, "fatal load error");
          self.state.send_modify(|state| {
            state.loading = false;
            self.status.store(IDLE, Ordering::Release);
          });
          guard.armed = false;
          return Err(fatal);
        }
      };

      if self.settle(error) {
        break;
      }
      // Forced requests that arrived meanwhile are served in place, so only
      // the last attempt's outcome becomes visible.
      self.status.store(LOADING, Ordering::Release);
      tracing::debug!(inflow = %self.log_id, "repeating load as requested");
    }

    guard.armed = false;
    Ok(LoadOutcome::Ran)
  }

  /// Like `run`, but when another run is in flight waits for it to finish.
  pub(crate) async fn run_or_wait<F, Fut>(&self, force: bool, attempt: F) -> Result<LoadOutcome, InflowError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AttemptError>>,
  {
    let outcome = self.run(force, attempt).await?;
    if outcome != LoadOutcome::Ran {
      self.wait_idle().await;
    }
    Ok(outcome)
  }

  /// Ends the run with `error` as its outcome, unless a forced repeat is
  /// pending. Nothing is published in that case.
  fn settle(&self, error: Option<LoadError>) -> bool {
    let mut settled = false;
    self.state.send_if_modified(|state| {
      settled = self
        .status
        .compare_exchange(LOADING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        .is_ok();
      if settled {
        state.loading = false;
        state.error = error;
      }
      settled
    });
    settled
  }

  fn publish_start(&self) {
    tracing::debug!(inflow = %self.log_id, "load started");
    self.state.send_if_modified(|state| {
      let changed = !state.loading || state.error.is_some();
      state.loading = true;
      state.error = None;
      changed
    });
  }

  /// Waits until no load is in flight.
  ///
  /// The load being waited for is whichever one is running, which is not
  /// necessarily the one the caller asked for.
  pub(crate) async fn wait_idle(&self) {
    let mut state = self.state.subscribe();
    let _ = state.wait_for(|state| !state.loading).await;
  }
}

/// One complete refresh: fetch, validate, persist.
pub(crate) trait Refresh: Send + Sync + 'static {
  fn refresh(&self) -> BoxFuture<'_, Result<(), AttemptError>>;
}

pub(crate) type LoadFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, LoadError>> + Send + Sync>;

/// Fails with the fatal error if `value` is expired the moment it arrives.
pub(crate) fn ensure_fresh<T>(expiration: &ExpirationPolicy<T>, value: &T, log_id: &str) -> Result<(), AttemptError> {
  if expiration.expires_in(Some(value)).is_expired() {
    return Err(AttemptError::Fatal(InflowError::ExpiredOnArrival {
      log_id: log_id.to_string(),
    }));
  }
  Ok(())
}

/// The standard refresh: run the user loader and write its result to the cache.
pub(crate) struct LoadAndStore<T> {
  pub(crate) load: LoadFn<T>,
  pub(crate) writer: Arc<dyn CacheWriter<T>>,
  pub(crate) expiration: ExpirationPolicy<T>,
  pub(crate) cache_spawner: Arc<dyn TaskSpawner>,
  pub(crate) token: CancellationToken,
  pub(crate) log_id: Arc<str>,
}

impl<T> Refresh for LoadAndStore<T>
where
  T: Send + Sync + 'static,
{
  fn refresh(&self) -> BoxFuture<'_, Result<(), AttemptError>> {
    Box::pin(async move {
      let value = (self.load)().await.map_err(AttemptError::Failed)?;
      ensure_fresh(&self.expiration, &value, &self.log_id)?;
      // Writes happen on the cache context.
      let write = self.writer.write(value);
      run_on(&self.cache_spawner, self.token.clone(), write).await;
      Ok(())
    })
  }
}

/// A single-flight loader bound to its refresh action.
pub(crate) struct Loader {
  flight: SingleFlight,
  action: Arc<dyn Refresh>,
}

impl Loader {
  pub(crate) fn new(action: Arc<dyn Refresh>, log_id: Arc<str>) -> Self {
    Self {
      flight: SingleFlight::new(log_id),
      action,
    }
  }

  pub(crate) fn flight(&self) -> &SingleFlight {
    &self.flight
  }

  pub(crate) async fn load(&self, force: bool) -> Result<LoadOutcome, InflowError> {
    self.flight.run(force, || self.action.refresh()).await
  }

  /// Loads, or waits for the load already in flight to finish.
  pub(crate) async fn load_or_wait(&self, force: bool) -> Result<LoadOutcome, InflowError> {
    self.flight.run_or_wait(force, || self.action.refresh()).await
  }
}
