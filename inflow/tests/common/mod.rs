#![allow(dead_code)]

use std::io;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use inflow::{ExpirationPolicy, Expiry};
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub fn failure(message: &str) -> io::Error {
  io::Error::new(io::ErrorKind::Other, message.to_string())
}

/// A value that knows when it goes stale, measured on the tokio clock so that
/// paused-time tests can drive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped {
  pub value: usize,
  pub expires_at: Instant,
}

impl Stamped {
  pub fn new(value: usize, ttl: Duration) -> Self {
    Self {
      value,
      expires_at: Instant::now() + ttl,
    }
  }
}

pub fn stamped_expiration() -> ExpirationPolicy<Stamped> {
  ExpirationPolicy::custom(|stamped: &Stamped| {
    Expiry::from_duration(stamped.expires_at.saturating_duration_since(Instant::now()))
  })
}

/// Records when each load started.
#[derive(Clone, Default)]
pub struct LoadLog {
  starts: Arc<Mutex<Vec<Instant>>>,
  count: Arc<AtomicUsize>,
}

impl LoadLog {
  /// Records a load start and returns its 1-based number.
  pub fn record(&self) -> usize {
    self.starts.lock().push(Instant::now());
    self.count.fetch_add(1, Ordering::SeqCst) + 1
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  /// Load start times relative to `origin`.
  pub fn offsets(&self, origin: Instant) -> Vec<Duration> {
    self.starts.lock().iter().map(|start| *start - origin).collect()
  }
}
