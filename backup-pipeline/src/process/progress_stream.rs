//! Byte-counting stream wrapper used while a dump is written to disk.

use bytes::Bytes;
use futures_util::{ready, Stream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Receives the cumulative byte count.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

pub struct ProgressStream<S> {
    inner: S,
    bytes_seen: u64,
    last_report: Instant,
    interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: ProgressCallback) -> Self {
        Self::with_interval(inner, callback, Duration::from_millis(500))
    }

    pub fn with_interval(inner: S, callback: ProgressCallback, interval: Duration) -> Self {
        Self {
            inner,
            bytes_seen: 0,
            last_report: Instant::now(),
            interval,
            callback,
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));
        match &item {
            Some(Ok(chunk)) => {
                self.bytes_seen += chunk.len() as u64;
                if self.last_report.elapsed() >= self.interval {
                    (self.callback)(self.bytes_seen);
                    self.last_report = Instant::now();
                }
            }
            None => (self.callback)(self.bytes_seen),
            Some(Err(_)) => {}
        }
        Poll::Ready(item)
    }
}
