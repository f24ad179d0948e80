//! Shares one cache source among any number of subscribers.
//!
//! The source is opened lazily on the first subscriber and closed a grace
//! period after the last one leaves. Subscribers arriving within the grace
//! period join the running session and get its latest value replayed; later
//! ones start a fresh session with no replay.

use crate::cache::CacheReader;
use crate::runtime::{spawn_cancellable, TaskSpawner};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// What a session has seen so far from the source.
#[derive(Clone)]
enum Replay<T> {
  Nothing,
  Latest(Option<T>),
}

struct Session<T> {
  latest: watch::Sender<Replay<T>>,
  token: CancellationToken,
}

struct HubState<T> {
  subscribers: usize,
  /// Subscribers that count towards the activation signal.
  tracked: usize,
  /// Bumped on every subscription so stale keep-alive timers can tell they lost.
  generation: u64,
  session: Option<Session<T>>,
  sessions_started: u64,
}

struct HubInner<T> {
  source: Arc<dyn CacheReader<T>>,
  keep_alive: Duration,
  spawner: Arc<dyn TaskSpawner>,
  token: CancellationToken,
  log_id: Arc<str>,
  state: Mutex<HubState<T>>,
  active: watch::Sender<bool>,
}

pub(crate) struct CacheHub<T> {
  inner: Arc<HubInner<T>>,
}

impl<T> Clone for CacheHub<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T> CacheHub<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    source: Arc<dyn CacheReader<T>>,
    keep_alive: Duration,
    spawner: Arc<dyn TaskSpawner>,
    token: CancellationToken,
    log_id: Arc<str>,
  ) -> Self {
    Self {
      inner: Arc::new(HubInner {
        source,
        keep_alive,
        spawner,
        token,
        log_id,
        state: Mutex::new(HubState {
          subscribers: 0,
          tracked: 0,
          generation: 0,
          session: None,
          sessions_started: 0,
        }),
        active: watch::Sender::new(false),
      }),
    }
  }

  /// Subscribes to the shared source.
  ///
  /// `tracked` subscribers flip the activation signal; untracked ones only
  /// keep the source open.
  pub(crate) fn subscribe(&self, tracked: bool) -> HubStream<T> {
    let inner = &self.inner;
    let mut state = inner.state.lock();
    state.subscribers += 1;
    state.generation += 1;
    if tracked {
      state.tracked += 1;
      if state.tracked == 1 {
        inner.active.send_replace(true);
      }
    }

    let receiver = match &state.session {
      Some(session) => session.latest.subscribe(),
      None => {
        let session = inner.start_session();
        state.sessions_started += 1;
        let receiver = session.latest.subscribe();
        state.session = Some(session);
        receiver
      }
    };

    HubStream {
      values: WatchStream::new(receiver),
      _subscription: Subscription {
        hub: inner.clone(),
        tracked,
      },
    }
  }

  /// `true` while at least one tracked subscriber exists.
  pub(crate) fn active(&self) -> watch::Receiver<bool> {
    self.inner.active.subscribe()
  }

  #[cfg(test)]
  pub(crate) fn is_source_open(&self) -> bool {
    self.inner.state.lock().session.is_some()
  }

  #[cfg(test)]
  pub(crate) fn sessions_started(&self) -> u64 {
    self.inner.state.lock().sessions_started
  }
}

impl<T> HubInner<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn start_session(&self) -> Session<T> {
    tracing::debug!(inflow = %self.log_id, "subscribing to cache");
    let (latest, _) = watch::channel(Replay::Nothing);
    let token = self.token.child_token();
    let sender = latest.clone();
    let source = self.source.clone();
    spawn_cancellable(&self.spawner, token.clone(), async move {
      let mut values = source.read();
      while let Some(value) = values.next().await {
        sender.send_replace(Replay::Latest(value));
      }
    });
    Session { latest, token }
  }
}

impl<T> HubInner<T> {
  fn stop_session(&self, state: &mut HubState<T>) {
    if let Some(session) = state.session.take() {
      tracing::debug!(inflow = %self.log_id, "unsubscribing from cache");
      session.token.cancel();
    }
  }
}

/// Decrements the subscriber counts when a `HubStream` is dropped.
struct Subscription<T: Send + Sync + 'static> {
  hub: Arc<HubInner<T>>,
  tracked: bool,
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
  fn drop(&mut self) {
    let hub = &self.hub;
    let mut state = hub.state.lock();
    state.subscribers -= 1;
    if self.tracked {
      state.tracked -= 1;
      if state.tracked == 0 {
        hub.active.send_replace(false);
      }
    }
    if state.subscribers > 0 {
      return;
    }

    if hub.keep_alive.is_zero() || hub.token.is_cancelled() {
      hub.stop_session(&mut state);
      return;
    }

    let generation = state.generation;
    let keep_alive = hub.keep_alive;
    let timer_hub = hub.clone();
    spawn_cancellable(&hub.spawner, hub.token.clone(), async move {
      tokio::time::sleep(keep_alive).await;
      let mut state = timer_hub.state.lock();
      if state.subscribers == 0 && state.generation == generation {
        timer_hub.stop_session(&mut state);
      }
    });
  }
}

/// A subscription to the shared cache source.
///
/// Yields `None` for an empty cache and `Some` for every value. Dropping the
/// stream unsubscribes.
pub(crate) struct HubStream<T: Send + Sync + 'static> {
  values: WatchStream<Replay<T>>,
  _subscription: Subscription<T>,
}

impl<T> Stream for HubStream<T>
where
  T: Clone + Send + Sync + 'static,
{
  type Item = Option<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    loop {
      match self.values.poll_next_unpin(cx) {
        Poll::Ready(Some(Replay::Latest(value))) => return Poll::Ready(Some(value)),
        Poll::Ready(Some(Replay::Nothing)) => continue,
        Poll::Ready(None) => return Poll::Ready(None),
        Poll::Pending => return Poll::Pending,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheWriter, MemoryCache};
  use crate::runtime::TokioSpawner;

  use futures_util::stream::BoxStream;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Counts how many times the source gets opened.
  struct CountingSource {
    cache: MemoryCache<u32>,
    opened: Arc<AtomicUsize>,
  }

  impl CacheReader<u32> for CountingSource {
    fn read(&self) -> BoxStream<'static, Option<u32>> {
      self.opened.fetch_add(1, Ordering::SeqCst);
      self.cache.read()
    }
  }

  fn build_hub(keep_alive: Duration) -> (CacheHub<u32>, MemoryCache<u32>, Arc<AtomicUsize>) {
    let cache = MemoryCache::new();
    let opened = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
      cache: cache.clone(),
      opened: opened.clone(),
    };
    let hub = CacheHub::new(
      Arc::new(source),
      keep_alive,
      Arc::new(TokioSpawner::new()),
      CancellationToken::new(),
      Arc::from("hub-test"),
    );
    (hub, cache, opened)
  }

  #[tokio::test(start_paused = true)]
  async fn shares_a_single_source_subscription() {
    let (hub, cache, opened) = build_hub(Duration::from_secs(1));

    let mut first = hub.subscribe(true);
    let mut second = hub.subscribe(false);
    assert_eq!(first.next().await, Some(None));
    assert_eq!(second.next().await, Some(None));

    cache.write(5).await;
    assert_eq!(first.next().await, Some(Some(5)));
    assert_eq!(second.next().await, Some(Some(5)));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(hub.sessions_started(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn late_subscriber_within_grace_gets_latest_value() {
    let (hub, cache, opened) = build_hub(Duration::from_secs(1));

    let mut first = hub.subscribe(true);
    assert_eq!(first.next().await, Some(None));
    cache.write(1).await;
    cache.write(2).await;
    assert_eq!(first.next().await, Some(Some(2)));
    drop(first);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(hub.is_source_open());

    let mut late = hub.subscribe(true);
    assert_eq!(late.next().await, Some(Some(2)));
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    // The earlier keep-alive timer must not close the session under us.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(hub.is_source_open());
  }

  #[tokio::test(start_paused = true)]
  async fn source_is_closed_after_grace_period() {
    let (hub, _cache, opened) = build_hub(Duration::from_secs(1));

    let mut first = hub.subscribe(true);
    assert_eq!(first.next().await, Some(None));
    drop(first);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!hub.is_source_open());

    let mut again = hub.subscribe(true);
    assert_eq!(again.next().await, Some(None));
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(hub.sessions_started(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn zero_keep_alive_closes_immediately() {
    let (hub, _cache, _opened) = build_hub(Duration::ZERO);
    let stream = hub.subscribe(false);
    assert!(hub.is_source_open());
    drop(stream);
    assert!(!hub.is_source_open());
  }

  #[tokio::test(start_paused = true)]
  async fn active_tracks_only_tracked_subscribers() {
    let (hub, _cache, _opened) = build_hub(Duration::from_secs(1));
    let active = hub.active();
    assert!(!*active.borrow());

    let untracked = hub.subscribe(false);
    assert!(!*active.borrow());

    let tracked_a = hub.subscribe(true);
    let tracked_b = hub.subscribe(true);
    assert!(*active.borrow());

    drop(tracked_a);
    assert!(*active.borrow());
    drop(tracked_b);
    assert!(!*active.borrow());
    drop(untracked);
  }
}
