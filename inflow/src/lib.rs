//! Observable caches that keep themselves fresh.
//!
//! An `Inflow` ties a loader to a cache. Subscribers observe the cached value
//! through `data()`, and while at least one of them asks for automatic
//! refresh, the value is reloaded whenever its expiration policy says so.
//!
//! # Features
//! - **Single-flight loading**: at most one load per instance; concurrent
//!   requests are dropped or coalesced into a single follow-up.
//! - **Expiration-driven refresh**: refreshes are scheduled from the cached
//!   data itself, with a fixed retry delay after failures.
//! - **Connectivity-aware**: an optional connectivity signal pauses automatic
//!   refresh while offline and retries right after reconnecting.
//! - **Shared cache subscriptions**: one source subscription serves all
//!   observers, kept alive for a grace period after the last one leaves.
//! - **Paging**: `PagedInflow` merges refreshed and next pages into one list.
//! - **Persistence**: optional `serde` support for configs and paging snapshots.

// Public modules that form the API
pub mod builder;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod expiration;
pub mod handles;
pub mod paging;
pub mod runtime;

// Internal, crate-only modules
mod hub;
mod loader;
mod stream;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::InflowBuilder;
pub use cache::{CacheReader, CacheWriter, MemoryCache};
pub use config::InflowConfig;
pub use connectivity::{Connectivity, ConnectivitySignal};
pub use error::{BoxError, BuildError, InflowError, LoadError};
pub use expiration::{ExpirationPolicy, Expiry};
pub use handles::Inflow;
pub use loader::LoadOutcome;
pub use paging::{
  Boundary, IdentityProvider, LoadState, MergeBoundary, MergeStrategy, Page, Paged, PagedBuilder, PagedInflow,
  PagingSnapshot, PagingState,
};
pub use runtime::{TaskSpawner, TokioSpawner};
