//! The storage seam: how an inflow reads and writes its cached value.
//!
//! A reader is a stream of `Option<T>` where `None` is the "nothing cached
//! yet" sentinel. A never-populated cache must emit `None` before anything
//! else, since that emission is what triggers the first load.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// The read half of a cache.
pub trait CacheReader<T>: Send + Sync + 'static {
  /// Opens a new stream over the cached value.
  fn read(&self) -> BoxStream<'static, Option<T>>;
}

/// The write half of a cache.
pub trait CacheWriter<T>: Send + Sync + 'static {
  /// Stores a freshly loaded value.
  fn write(&self, value: T) -> BoxFuture<'static, ()>;
}

/// A single-slot in-memory cache, the default storage of every inflow.
pub struct MemoryCache<T> {
  slot: watch::Sender<Option<T>>,
}

impl<T> MemoryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Creates an empty cache.
  pub fn new() -> Self {
    Self {
      slot: watch::Sender::new(None),
    }
  }

  /// Creates a cache that already holds `value`.
  pub fn with_value(value: T) -> Self {
    Self {
      slot: watch::Sender::new(Some(value)),
    }
  }

  /// Returns a copy of the current value.
  pub fn get(&self) -> Option<T> {
    self.slot.borrow().clone()
  }

  /// Replaces the current value, notifying all open readers.
  pub fn set(&self, value: T) {
    self.slot.send_replace(Some(value));
  }
}

impl<T> Default for MemoryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for MemoryCache<T> {
  fn clone(&self) -> Self {
    Self {
      slot: self.slot.clone(),
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for MemoryCache<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryCache")
      .field("value", &*self.slot.borrow())
      .finish()
  }
}

impl<T> CacheReader<T> for MemoryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn read(&self) -> BoxStream<'static, Option<T>> {
    WatchStream::new(self.slot.subscribe()).boxed()
  }
}

impl<T> CacheWriter<T> for MemoryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn write(&self, value: T) -> BoxFuture<'static, ()> {
    self.slot.send_replace(Some(value));
    Box::pin(futures_util::future::ready(()))
  }
}

/// Adapts a pair of closures into a cache.
pub(crate) struct FnCache<R, W, T> {
  read: R,
  write: W,
  _value: PhantomData<fn(T)>,
}

impl<R, W, T> FnCache<R, W, T> {
  pub(crate) fn new(read: R, write: W) -> Self {
    Self {
      read,
      write,
      _value: PhantomData,
    }
  }
}

impl<R, W, S, Fut, T> CacheReader<T> for FnCache<R, W, T>
where
  R: Fn() -> S + Send + Sync + 'static,
  S: Stream<Item = Option<T>> + Send + 'static,
  W: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
  T: Send + 'static,
{
  fn read(&self) -> BoxStream<'static, Option<T>> {
    (self.read)().boxed()
  }
}

impl<R, W, S, Fut, T> CacheWriter<T> for FnCache<R, W, T>
where
  R: Fn() -> S + Send + Sync + 'static,
  S: Stream<Item = Option<T>> + Send + 'static,
  W: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
  T: Send + 'static,
{
  fn write(&self, value: T) -> BoxFuture<'static, ()> {
    Box::pin((self.write)(value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_cache_emits_empty_sentinel_first() {
    let cache = MemoryCache::<u32>::new();
    let mut stream = cache.read();
    assert_eq!(stream.next().await, Some(None));

    cache.write(7).await;
    assert_eq!(stream.next().await, Some(Some(7)));
    assert_eq!(cache.get(), Some(7));
  }

  #[tokio::test]
  async fn prepopulated_cache_skips_sentinel() {
    let cache = MemoryCache::with_value("cached");
    let mut stream = cache.read();
    assert_eq!(stream.next().await, Some(Some("cached")));
  }
}
