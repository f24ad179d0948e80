//! Expiration-driven automatic refresh.
//!
//! While activated, the scheduler watches the cache, waits until the current
//! value expires and then asks the load worker for a refresh, retrying at a
//! fixed interval until fresh data shows up. New cache content restarts the
//! whole schedule from the new expiry.

use crate::expiration::{ExpirationPolicy, Expiry};
use crate::hub::CacheHub;
use crate::loader::Loader;
use crate::runtime::{spawn_cancellable, TaskSpawner};
use crate::task::activation::Activation;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// The load worker is gone, which only happens after a fatal error.
struct WorkerGone;

/// Hands refresh requests to the load worker one at a time.
///
/// A request completes only once the worker has finished the resulting load,
/// so retry delays are measured from the end of the previous attempt and
/// attempts never overlap.
struct LoadTrigger {
  requests: mpsc::Sender<oneshot::Sender<()>>,
}

impl LoadTrigger {
  fn channel() -> (Self, mpsc::Receiver<oneshot::Sender<()>>) {
    // Requests are acknowledged before the next one is sent, so the buffer
    // never holds more than the single in-flight handoff.
    let (requests, receiver) = mpsc::channel(1);
    (Self { requests }, receiver)
  }

  async fn request(&self) -> Result<(), WorkerGone> {
    let (done, finished) = oneshot::channel();
    self.requests.send(done).await.map_err(|_| WorkerGone)?;
    finished.await.map_err(|_| WorkerGone)
  }
}

pub(crate) struct SchedulerContext<T> {
  pub(crate) hub: CacheHub<T>,
  pub(crate) expiration: ExpirationPolicy<T>,
  pub(crate) retry_time: Option<Duration>,
  pub(crate) log_id: Arc<str>,
}

/// Spawns the scheduler and its load worker on the load context.
pub(crate) fn spawn<T>(
  context: SchedulerContext<T>,
  activation: BoxStream<'static, Activation>,
  loader: Arc<Loader>,
  spawner: &Arc<dyn TaskSpawner>,
  token: &CancellationToken,
) where
  T: Clone + Send + Sync + 'static,
{
  let (trigger, requests) = LoadTrigger::channel();
  spawn_cancellable(spawner, token.child_token(), load_worker(loader, requests));
  spawn_cancellable(spawner, token.child_token(), schedule(context, activation, trigger));
}

async fn load_worker(loader: Arc<Loader>, mut requests: mpsc::Receiver<oneshot::Sender<()>>) {
  while let Some(done) = requests.recv().await {
    // A load already in flight serves the request.
    if let Err(fatal) = loader.load_or_wait(false).await {
      // Retrying would only reproduce the same broken data.
      panic!("{fatal}");
    }
    let _ = done.send(());
  }
}

async fn schedule<T>(context: SchedulerContext<T>, mut activation: BoxStream<'static, Activation>, trigger: LoadTrigger)
where
  T: Clone + Send + Sync + 'static,
{
  // Whether a load was just attempted for an expired cache.
  let mut just_attempted = false;
  let mut next = activation.next().await;
  loop {
    let Some(state) = next else {
      return;
    };
    next = match state {
      Activation::Inactive => {
        // Nothing is scheduled, and repeated inactivity changes nothing.
        just_attempted = false;
        activation.next().await
      }
      // Not cancelled by activation changes: a started load finishes.
      Activation::Forced => match attempt_forced(&context, &trigger).await {
        Ok(attempted) => {
          just_attempted = attempted;
          activation.next().await
        }
        Err(WorkerGone) => break,
      },
      Activation::Active => {
        tracing::debug!(inflow = %context.log_id, "auto refresh activated");
        let retrying = std::mem::take(&mut just_attempted);
        tokio::select! {
          changed = activation.next() => changed,
          result = while_active(&context, &trigger, retrying) => match result {
            Ok(()) => activation.next().await,
            Err(WorkerGone) => break,
          },
        }
      }
    };
  }
  tracing::error!(inflow = %context.log_id, "load worker terminated, stopping auto refresh");
}

/// Requests one load if the cache is expired, returning whether it did.
async fn attempt_forced<T>(context: &SchedulerContext<T>, trigger: &LoadTrigger) -> Result<bool, WorkerGone>
where
  T: Clone + Send + Sync + 'static,
{
  let mut values = context.hub.subscribe(false);
  let Some(current) = values.next().await else {
    return Ok(false);
  };
  if !context.expiration.expires_in(current.as_ref()).is_expired() {
    return Ok(false);
  }
  tracing::debug!(inflow = %context.log_id, "cache expired, attempting a load");
  trigger.request().await?;
  Ok(true)
}

/// Refreshes on expiry until cancelled. With `retrying`, an expired cache
/// was just loaded for, so the first request waits for the retry delay.
async fn while_active<T>(context: &SchedulerContext<T>, trigger: &LoadTrigger, mut retrying: bool) -> Result<(), WorkerGone>
where
  T: Clone + Send + Sync + 'static,
{
  let mut values = context.hub.subscribe(false);
  let Some(first) = values.next().await else {
    return Ok(());
  };
  let mut expiry = context.expiration.expires_in(first.as_ref());

  loop {
    tokio::select! {
      value = values.next() => match value {
        Some(value) => {
          retrying = false;
          expiry = context.expiration.expires_in(value.as_ref());
        }
        None => return refresh_on_expiry(context, expiry, retrying, trigger).await,
      },
      result = refresh_on_expiry(context, expiry, retrying, trigger) => return result,
    }
  }
}

/// Waits for `expiry`, then refreshes until cancelled by new cache content.
async fn refresh_on_expiry<T>(
  context: &SchedulerContext<T>,
  expiry: Expiry,
  retrying: bool,
  trigger: &LoadTrigger,
) -> Result<(), WorkerGone> {
  match expiry {
    Expiry::Never => future::pending::<()>().await,
    Expiry::Expired if retrying => retry_delay(context).await,
    Expiry::Expired => {}
    Expiry::In(duration) => {
      tracing::debug!(inflow = %context.log_id, "next refresh in {duration:?}");
      tokio::time::sleep(duration).await;
    }
  }

  loop {
    tracing::debug!(inflow = %context.log_id, "cache expired, refreshing");
    trigger.request().await?;
    retry_delay(context).await;
  }
}

/// Sleeps for the retry time, forever when retries are off.
async fn retry_delay<T>(context: &SchedulerContext<T>) {
  match context.retry_time {
    Some(retry) => {
      tracing::debug!(inflow = %context.log_id, "cache still expired, retrying in {retry:?}");
      tokio::time::sleep(retry).await;
    }
    None => future::pending::<()>().await,
  }
}
