//! Network reachability as consumed by inflows: a boolean signal, nothing more.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::watch;

/// A source of connectivity updates, `true` meaning the network is reachable.
pub trait Connectivity: Send + Sync + 'static {
  /// Returns a receiver observing the current connectivity state.
  fn connected(&self) -> watch::Receiver<bool>;
}

/// A connectivity signal driven by the host application.
#[derive(Clone)]
pub struct ConnectivitySignal {
  state: watch::Sender<bool>,
}

impl ConnectivitySignal {
  pub fn new(connected: bool) -> Self {
    Self {
      state: watch::Sender::new(connected),
    }
  }

  /// Publishes a new connectivity state. Repeating the current state is a no-op.
  pub fn set(&self, connected: bool) {
    self.state.send_if_modified(|current| {
      if *current == connected {
        false
      } else {
        *current = connected;
        true
      }
    });
  }

  pub fn is_connected(&self) -> bool {
    *self.state.borrow()
  }
}

impl fmt::Debug for ConnectivitySignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConnectivitySignal")
      .field("connected", &self.is_connected())
      .finish()
  }
}

impl Connectivity for ConnectivitySignal {
  fn connected(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }
}

static DEFAULT_PROVIDER: OnceCell<Arc<dyn Connectivity>> = OnceCell::new();

/// Registers the process-wide connectivity provider.
///
/// Only the first registration wins; later calls hand their provider back.
pub fn register_default(provider: Arc<dyn Connectivity>) -> Result<(), Arc<dyn Connectivity>> {
  DEFAULT_PROVIDER.set(provider)
}

/// Returns the process-wide connectivity provider, if one was registered.
pub fn default_provider() -> Option<Arc<dyn Connectivity>> {
  DEFAULT_PROVIDER.get().cloned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signal_deduplicates_updates() {
    let signal = ConnectivitySignal::new(false);
    let mut rx = signal.connected();
    assert!(!*rx.borrow_and_update());

    signal.set(false);
    assert!(!rx.has_changed().unwrap());

    signal.set(true);
    assert!(rx.has_changed().unwrap());
    assert!(*rx.borrow_and_update());
  }
}
