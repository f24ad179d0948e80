//! Paged lists on top of an inflow.
//!
//! The paging cache holds one materialized list plus the state needed to
//! continue paging. Refreshing reloads the first page and splices it in front
//! of the cached list, `load_next` appends the following page; a
//! `MergeStrategy` finds the splice points and an `IdentityProvider` drops
//! stale duplicates around them.

pub mod builder;
pub(crate) mod engine;
pub mod identity;
pub mod merge;

pub use builder::PagedBuilder;
pub use identity::IdentityProvider;
pub use merge::{Boundary, MergeBoundary, MergeStrategy};

use crate::error::{InflowError, LoadError};
use crate::handles::Inflow;
use crate::loader::{FlightState, LoadOutcome, SingleFlight};
use crate::runtime::{run_on, spawn_cancellable, TaskSpawner};
use crate::stream::{distinct_until_changed, until_closed};
use engine::PagingEngine;

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// An immutable snapshot of a paged list.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Paged<T> {
  pub items: Arc<[T]>,
  /// Whether more pages can be loaded with `load_next`.
  pub has_next: bool,
}

impl<T> Paged<T> {
  pub fn new(items: Vec<T>, has_next: bool) -> Self {
    Self {
      items: Arc::from(items),
      has_next,
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, T> {
    self.items.iter()
  }
}

impl<T> Default for Paged<T> {
  fn default() -> Self {
    Self::new(Vec::new(), false)
  }
}

/// Where paging continues from, persisted next to the list.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PagingState<K> {
  pub has_next: bool,
  /// The key of the page following the cached list.
  pub next_key: Option<K>,
  /// The key refreshes load the first page with.
  pub refresh_key: Option<K>,
}

impl<K> Default for PagingState<K> {
  fn default() -> Self {
    Self {
      has_next: false,
      next_key: None,
      refresh_key: None,
    }
  }
}

/// One page, as returned by the pager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T, K> {
  pub items: Vec<T>,
  /// The key of the following page, `None` if this is the last one.
  pub next_key: Option<K>,
}

impl<T, K> Page<T, K> {
  pub fn new(items: Vec<T>, next_key: Option<K>) -> Self {
    Self { items, next_key }
  }

  /// A page with nothing after it.
  pub fn last(items: Vec<T>) -> Self {
    Self { items, next_key: None }
  }
}

/// What the paging cache stores.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PagingSnapshot<T, K> {
  pub paged: Paged<T>,
  pub state: PagingState<K>,
}

/// The state of next-page loading.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
  Idle,
  Loading,
  /// The last attempt failed. Cleared when the next attempt starts.
  Failed(LoadError),
}

impl From<FlightState> for LoadState {
  fn from(state: FlightState) -> Self {
    match state {
      FlightState { loading: true, .. } => LoadState::Loading,
      FlightState { error: Some(error), .. } => LoadState::Failed(error),
      FlightState { .. } => LoadState::Idle,
    }
  }
}

struct NextPages<T, K> {
  engine: Arc<PagingEngine<T, K>>,
  flight: SingleFlight,
  load_spawner: Arc<dyn TaskSpawner>,
  token: CancellationToken,
}

impl<T, K> NextPages<T, K>
where
  T: Clone + Send + Sync + 'static,
  K: Clone + Send + Sync + 'static,
{
  async fn load(&self) -> Result<LoadOutcome, InflowError> {
    self.flight.run(false, || self.engine.load_next()).await
  }
}

// --- PagedInflow Implementation ---

/// An inflow over a paged list.
///
/// Refreshing (automatically or on demand) reloads the first page; more pages
/// are loaded on demand with `load_next`. Like `Inflow`, this is a cheap
/// handle and the instance stops once the last handle is dropped.
pub struct PagedInflow<T, K> {
  inflow: Inflow<Paged<T>>,
  next: Arc<NextPages<T, K>>,
}

impl<T, K> Clone for PagedInflow<T, K> {
  fn clone(&self) -> Self {
    Self {
      inflow: self.inflow.clone(),
      next: self.next.clone(),
    }
  }
}

impl<T, K> fmt::Debug for PagedInflow<T, K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PagedInflow")
      .field("inflow", &self.inflow)
      .field("loading_next", &self.next.flight.is_loading())
      .finish_non_exhaustive()
  }
}

impl<T, K> PagedInflow<T, K>
where
  T: Clone + Send + Sync + 'static,
  K: Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    inflow: Inflow<Paged<T>>,
    engine: Arc<PagingEngine<T, K>>,
    load_spawner: Arc<dyn TaskSpawner>,
    token: CancellationToken,
  ) -> Self {
    let flight = SingleFlight::new(engine.log_id.clone());
    Self {
      inflow,
      next: Arc::new(NextPages {
        engine,
        flight,
        load_spawner,
        token,
      }),
    }
  }

  /// The underlying inflow of the materialized list.
  pub fn as_inflow(&self) -> &Inflow<Paged<T>> {
    &self.inflow
  }

  /// See `Inflow::data`.
  pub fn data(&self, auto_refresh: bool) -> Result<BoxStream<'static, Paged<T>>, InflowError> {
    self.inflow.data(auto_refresh)
  }

  /// Whether the first page is being (re)loaded. See `Inflow::loading`.
  pub fn loading(&self) -> Result<BoxStream<'static, bool>, InflowError> {
    self.inflow.loading()
  }

  /// The error of the last first-page load. See `Inflow::error`.
  pub fn error(&self) -> Result<BoxStream<'static, Option<LoadError>>, InflowError> {
    self.inflow.error()
  }

  pub async fn cached(&self) -> Result<Option<Paged<T>>, InflowError> {
    self.inflow.cached().await
  }

  /// Reloads the first page in the background. See `Inflow::refresh`.
  pub fn refresh(&self, repeat_if_running: bool) -> Result<(), InflowError> {
    self.inflow.refresh(repeat_if_running)
  }

  pub async fn refresh_blocking(&self, repeat_if_running: bool) -> Result<LoadOutcome, InflowError> {
    self.inflow.refresh_blocking(repeat_if_running).await
  }

  /// Loads the next page in the background.
  ///
  /// Does nothing if a next page is already loading, if nothing is cached
  /// yet or if the cached list has no further pages.
  pub fn load_next(&self) -> Result<(), InflowError> {
    self.inflow.ensure_open()?;
    let next = self.next.clone();
    spawn_cancellable(&self.next.load_spawner, self.next.token.child_token(), async move {
      if let Err(fatal) = next.load().await {
        panic!("{fatal}");
      }
    });
    Ok(())
  }

  /// Loads the next page, or waits for the one already loading.
  ///
  /// Failures are reported through `load_next_state()`.
  pub async fn load_next_blocking(&self) -> Result<LoadOutcome, InflowError> {
    self.inflow.ensure_open()?;
    let next = self.next.clone();
    let load = async move {
      let engine = &next.engine;
      next.flight.run_or_wait(false, || engine.load_next()).await
    };
    match run_on(&self.next.load_spawner, self.next.token.child_token(), load).await {
      Some(result) => result,
      None => Err(InflowError::Closed),
    }
  }

  /// The state of next-page loading, emitting the current state first.
  pub fn load_next_state(&self) -> Result<BoxStream<'static, LoadState>, InflowError> {
    self.inflow.ensure_open()?;
    let states = WatchStream::new(self.next.flight.subscribe()).map(LoadState::from);
    Ok(until_closed(distinct_until_changed(states), &self.next.token))
  }

  pub fn close(&self) {
    self.inflow.close();
  }

  pub fn is_closed(&self) -> bool {
    self.inflow.is_closed()
  }
}
