//! Combines subscriber presence with network connectivity into the signal
//! that switches automatic refresh on and off.

use crate::stream::distinct_until_changed;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// What the scheduler should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
  /// Nothing is scheduled.
  Inactive,
  /// Refresh on expiry and retry failures.
  Active,
  /// Load once if the cache is expired, whoever is subscribed, and let that
  /// load finish. The steady state follows right after.
  Forced,
}

impl Activation {
  fn steady(active: bool) -> Self {
    if active {
      Activation::Active
    } else {
      Activation::Inactive
    }
  }
}

/// Builds the activation stream.
///
/// Without connectivity the stream starts with `Forced`, so one load attempt
/// happens even before anybody subscribes, and then follows the subscriber
/// signal, leaving out repeats. With connectivity it emits `Forced` when the
/// network is first seen up and on every reconnection, and otherwise
/// `subscribed && connected` on every change of either side.
pub(crate) fn activation(
  subscribed: watch::Receiver<bool>,
  connectivity: Option<watch::Receiver<bool>>,
) -> BoxStream<'static, Activation> {
  match connectivity {
    None => {
      let forced = stream::once(async { Activation::Forced });
      let steady = WatchStream::new(subscribed).map(Activation::steady);
      distinct_until_changed(forced.chain(steady)).boxed()
    }
    Some(connected) => {
      let gate = Gate {
        subscribed,
        connected,
        subscribed_open: true,
        connected_open: true,
        started: false,
        was_connected: false,
        steady_owed: false,
      };
      stream::unfold(gate, |mut gate| async move {
        let activation = gate.next().await?;
        Some((activation, gate))
      })
      .boxed()
    }
  }
}

struct Gate {
  subscribed: watch::Receiver<bool>,
  connected: watch::Receiver<bool>,
  subscribed_open: bool,
  connected_open: bool,
  started: bool,
  was_connected: bool,
  /// A `Forced` went out and the steady state has not followed yet.
  steady_owed: bool,
}

impl Gate {
  async fn next(&mut self) -> Option<Activation> {
    if self.started && !self.steady_owed {
      self.changed().await?;
    }
    self.started = true;
    let subscribed = *self.subscribed.borrow_and_update();
    let connected = *self.connected.borrow_and_update();
    let reconnected = connected && !self.was_connected;
    self.was_connected = connected;
    self.steady_owed = reconnected;
    if reconnected {
      return Some(Activation::Forced);
    }
    Some(Activation::steady(subscribed && connected))
  }

  /// Waits for either side to change, `None` once both are gone.
  async fn changed(&mut self) -> Option<()> {
    loop {
      if !self.subscribed_open && !self.connected_open {
        return None;
      }
      tokio::select! {
        changed = self.subscribed.changed(), if self.subscribed_open => {
          if changed.is_err() {
            self.subscribed_open = false;
            continue;
          }
        }
        changed = self.connected.changed(), if self.connected_open => {
          if changed.is_err() {
            self.connected_open = false;
            continue;
          }
        }
      }
      return Some(());
    }
  }
}
