use futures_util::future;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Drops items equal to the previously emitted one.
pub(crate) fn distinct_until_changed<S>(stream: S) -> impl Stream<Item = S::Item>
where
  S: Stream,
  S::Item: PartialEq + Clone,
{
  let mut last: Option<S::Item> = None;
  stream.filter_map(move |item| {
    let changed = last.as_ref() != Some(&item);
    if changed {
      last = Some(item.clone());
    }
    future::ready(changed.then_some(item))
  })
}

/// Ends the stream once `token` is cancelled.
pub(crate) fn until_closed<S>(stream: S, token: &CancellationToken) -> BoxStream<'static, S::Item>
where
  S: Stream + Send + 'static,
{
  stream.take_until(token.clone().cancelled_owned()).boxed()
}
