use inflow::{MergeStrategy, Page, PagedBuilder};
use parking_lot::Mutex;
use std::sync::Arc;

// A feed of post ids, newest first.
#[derive(Clone)]
struct Feed(Arc<Mutex<Vec<u32>>>);

impl Feed {
  async fn page(&self, count: usize, before: Option<u32>) -> std::io::Result<Page<u32, u32>> {
    let posts = self.0.lock();
    let mut older = posts.iter().copied().filter(|id| before.map_or(true, |before| *id < before));
    let items: Vec<u32> = older.by_ref().take(count).collect();
    let next_key = older.next().and(items.last().copied());
    println!("--- Feed: {} posts before {:?}", items.len(), before);
    Ok(Page::new(items, next_key))
  }
}

#[tokio::main]
async fn main() {
  let feed = Feed(Arc::new(Mutex::new((1..=10).rev().collect())));

  let posts = PagedBuilder::new()
    .log_id("feed")
    .page_size(4)
    .merge(MergeStrategy::by_items(|a: &u32, b: &u32| b.cmp(a)))
    .unique(true)
    .pager({
      let feed = feed.clone();
      move |count, before| {
        let feed = feed.clone();
        async move { feed.page(count, before).await }
      }
    })
    .build()
    .expect("Failed to build paged inflow");

  posts.refresh_blocking(false).await.unwrap();
  posts.load_next_blocking().await.unwrap();
  let list = posts.cached().await.unwrap().unwrap_or_default();
  println!("Loaded: {:?} (more: {})", list.items, list.has_next);

  println!("\n--- Two new posts arrive ---");
  {
    let mut posts = feed.0.lock();
    posts.insert(0, 11);
    posts.insert(0, 12);
  }
  posts.refresh_blocking(false).await.unwrap();
  let list = posts.cached().await.unwrap().unwrap_or_default();
  println!("Refreshed: {:?} (more: {})", list.items, list.has_next);
  assert_eq!(&list.items[..], &[12, 11, 10, 9, 8, 7, 6, 5, 4, 3]);

  posts.load_next_blocking().await.unwrap();
  let list = posts.cached().await.unwrap().unwrap_or_default();
  println!("All: {:?} (more: {})", list.items, list.has_next);
}
