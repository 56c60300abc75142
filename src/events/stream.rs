//! Bounded event channel with close-once semantics.
//!
//! The producer side (`EventSender`) guards its sender with a lock; closing
//! takes the sender out under that lock, so an emission either lands before
//! the close or is silently dropped after it. The consumer side
//! (`EventStream`) is a cheap clone handle: clones share one queue and each
//! event is delivered to exactly one reader.

use std::sync::Arc;

use futures::Stream;
use log::debug;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Default channel capacity (events)
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Create a bounded producer/consumer pair.
pub fn channel<T>(capacity: usize) -> (EventSender<T>, EventStream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx: Mutex::new(Some(tx)),
        },
        EventStream {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half. Owned by exactly one task.
pub struct EventSender<T> {
    /// `None` once closed
    tx: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T: Send> EventSender<T> {
    /// Emit an event, waiting for channel capacity.
    ///
    /// Returns `false` when the event was dropped: the stream is closed, every
    /// reader is gone, or `cancel` fired while the channel was full.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> bool {
        let guard = self.tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            debug!("EventSender::send: dropped, stream closed");
            return false;
        };

        tokio::select! {
            biased;
            sent = tx.send(item) => sent.is_ok(),
            _ = cancel.cancelled() => {
                debug!("EventSender::send: dropped, cancelled while channel full");
                false
            }
        }
    }

    /// Close the stream. Only the first call has an effect.
    pub async fn close(&self) -> bool {
        let mut guard = self.tx.lock().await;
        let closed = guard.take().is_some();
        if closed {
            debug!("EventSender::close: stream closed");
        }
        closed
    }
}

/// Consumer handle. Drain with `recv` until it yields `None`.
pub struct EventStream<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Receive the next event; `None` once the producer closed and the queue is drained.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Drain every remaining event until the stream closes.
    pub async fn collect(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Adapt into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |stream| async move {
            let item = stream.recv().await?;
            Some((item, stream))
        })
    }
}
