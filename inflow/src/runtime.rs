use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Each inflow owns two execution contexts, one for cache access and one for
/// loading. Both are expressed as spawners and may point at the same runtime.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Spawns onto a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Like `new`, but returns `None` outside of a Tokio runtime.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  /// Creates a spawner bound to the given runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Spawns `future` so that it stops at its next suspension point once `token`
/// is cancelled.
pub(crate) fn spawn_cancellable<F>(spawner: &Arc<dyn TaskSpawner>, token: CancellationToken, future: F)
where
  F: Future<Output = ()> + Send + 'static,
{
  spawner.spawn(Box::pin(async move {
    tokio::select! {
      biased;
      _ = token.cancelled() => {}
      _ = future => {}
    }
  }));
}

/// Runs `future` on the given context and waits for its output.
///
/// Returns `None` if the task was cancelled before it produced a value.
pub(crate) async fn run_on<F>(spawner: &Arc<dyn TaskSpawner>, token: CancellationToken, future: F) -> Option<F::Output>
where
  F: Future + Send + 'static,
  F::Output: Send + 'static,
{
  let (tx, rx) = oneshot::channel();
  spawn_cancellable(spawner, token, async move {
    let _ = tx.send(future.await);
  });
  rx.await.ok()
}
