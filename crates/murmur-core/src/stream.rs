//! Stream helpers for observers.
//!
//! Observers never block a producer: they watch a replay-latest value and
//! shape it with [`debounce`] and [`distinct_until_changed`].

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::watch;

/// Stream every value published on a watch channel.
///
/// The current value is yielded immediately, then one item per change.
/// Several changes between polls collapse into the latest one. The stream
/// ends when the sender is dropped.
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

/// Emit an item only once `window` passes without a newer one.
///
/// A burst of items collapses into its last element. When the source ends
/// the pending item is flushed.
pub fn debounce<S>(source: S, window: Duration) -> BoxStream<'static, S::Item>
where
    S: Stream + Send + Unpin + 'static,
    S::Item: Send + 'static,
{
    stream::unfold(Some(source), move |source| async move {
        let mut source = source?;
        let mut latest = source.next().await?;
        loop {
            match tokio::time::timeout(window, source.next()).await {
                Ok(Some(item)) => latest = item,
                Ok(None) => return Some((latest, None)),
                Err(_) => return Some((latest, Some(source))),
            }
        }
    })
    .boxed()
}

/// Drop items equal to the one emitted just before.
pub fn distinct_until_changed<S>(source: S) -> BoxStream<'static, S::Item>
where
    S: Stream + Send + Unpin + 'static,
    S::Item: PartialEq + Clone + Send + 'static,
{
    stream::unfold((source, None), |(mut source, last)| async move {
        loop {
            let item = source.next().await?;
            if last.as_ref() != Some(&item) {
                return Some((item.clone(), (source, Some(item))));
            }
        }
    })
    .boxed()
}
