mod common;

use inflow::{
  BuildError, InflowBuilder, InflowConfig, MemoryCache, PagedBuilder, Page, TaskSpawner, TokioSpawner,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;

fn constant_loader() -> InflowBuilder<u32> {
  InflowBuilder::new().loader(|| async { Ok::<_, io::Error>(1) })
}

#[tokio::test]
async fn test_loader_is_required() {
  let result = InflowBuilder::<u32>::new().build();
  assert_eq!(result.unwrap_err(), BuildError::MissingLoader);
}

#[tokio::test]
async fn test_invalid_delays_are_rejected() {
  let config = InflowConfig {
    keep_cache_subscribed_ms: -1,
    ..Default::default()
  };
  let result = constant_loader().config(config).build();
  assert_eq!(result.unwrap_err(), BuildError::NegativeKeepAlive(-1));

  let result = constant_loader().retry_time(Duration::ZERO).build();
  assert_eq!(result.unwrap_err(), BuildError::InvalidRetryTime(0));
}

#[tokio::test]
async fn test_custom_cache_needs_both_halves() {
  let result = constant_loader().cache_reader(MemoryCache::new()).build();
  assert_eq!(result.unwrap_err(), BuildError::IncompleteCache);

  let result = constant_loader().cache_writer(MemoryCache::new()).build();
  assert_eq!(result.unwrap_err(), BuildError::IncompleteCache);
}

#[tokio::test]
async fn test_separate_reader_and_writer() {
  let cache = MemoryCache::new();
  let inflow = constant_loader()
    .cache_reader(cache.clone())
    .cache_writer(cache.clone())
    .build()
    .unwrap();

  inflow.refresh_blocking(false).await.unwrap();
  assert_eq!(cache.get(), Some(1));
}

#[tokio::test]
async fn test_page_size_must_be_positive() {
  let result = PagedBuilder::<u32, u32>::new()
    .page_size(0)
    .pager(|_, _| async { Ok::<_, io::Error>(Page::last(Vec::new())) })
    .build();
  assert_eq!(result.unwrap_err(), BuildError::ZeroPageSize);

  let result = PagedBuilder::<u32, u32>::new().build();
  assert_eq!(result.unwrap_err(), BuildError::MissingLoader);
}

#[test]
fn test_spawner_required_outside_runtime() {
  let result = constant_loader().build();
  assert_eq!(result.unwrap_err(), BuildError::SpawnerRequired);

  // A single explicit context is not enough; both must be covered.
  let runtime = tokio::runtime::Runtime::new().unwrap();
  let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::with_handle(runtime.handle().clone()));
  let result = constant_loader().load_spawner(spawner).build();
  assert_eq!(result.unwrap_err(), BuildError::SpawnerRequired);
}

#[test]
fn test_explicit_spawner_works_outside_runtime() {
  common::init_tracing();
  let runtime = tokio::runtime::Runtime::new().unwrap();
  let inflow = constant_loader()
    .spawner(Arc::new(TokioSpawner::with_handle(runtime.handle().clone())))
    .build()
    .unwrap();

  runtime.block_on(async {
    inflow.refresh_blocking(false).await.unwrap();
    assert_eq!(inflow.cached().await.unwrap(), Some(1));
  });
  inflow.close();
}
