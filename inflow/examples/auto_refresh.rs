use futures_util::StreamExt;
use inflow::{ConnectivitySignal, ExpirationPolicy, InflowBuilder};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::SystemTime;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
struct Weather {
  celsius: i32,
  fetched_at: SystemTime,
}

// A simulated remote service.
async fn fetch_weather(calls: Arc<AtomicUsize>) -> std::io::Result<Weather> {
  let call = calls.fetch_add(1, Ordering::SeqCst);
  println!("--- Service: request #{}", call + 1);
  sleep(Duration::from_millis(200)).await;
  Ok(Weather {
    celsius: 18 + call as i32,
    fetched_at: SystemTime::now(),
  })
}

#[tokio::main]
async fn main() {
  let calls = Arc::new(AtomicUsize::new(0));
  let network = ConnectivitySignal::new(true);

  let weather = InflowBuilder::new()
    .log_id("weather")
    .expiration(ExpirationPolicy::after(Duration::from_secs(2), |w: &Weather| w.fetched_at))
    .retry_time(Duration::from_secs(1))
    .connectivity(Arc::new(network.clone()))
    .loader({
      let calls = calls.clone();
      move || fetch_weather(calls.clone())
    })
    .build()
    .expect("Failed to build inflow");

  println!("--- Observing for 5 seconds, data expires every 2 seconds ---");
  let mut updates = weather.data(true).expect("inflow is open");
  let observer = tokio::spawn(async move {
    while let Some(w) = updates.next().await {
      println!("[Observer] {}°C", w.celsius);
    }
  });

  sleep(Duration::from_secs(5)).await;

  println!("\n--- Going offline for 3 seconds, nothing is loaded ---");
  network.set(false);
  let before = calls.load(Ordering::SeqCst);
  sleep(Duration::from_secs(3)).await;
  assert_eq!(calls.load(Ordering::SeqCst), before);

  println!("\n--- Back online, the expired data is refreshed right away ---");
  network.set(true);
  sleep(Duration::from_millis(500)).await;

  weather.close();
  observer.await.unwrap();
  println!("\nService was called {} time(s).", calls.load(Ordering::SeqCst));
}
