//! Worker base: long-running tasks fed by a bounded queue, with at most one
//! item in flight so a broker can cancel exactly that item.
//!
//! Workers that need cancellation-in-flight all share one generic runner
//! below (`InterruptibleWorker`/`run_interruptible_worker`): each needs the
//! same "wrap in an interruptible event, track the in-flight task, drop it
//! cleanly on cancellation" behavior, and `InterruptibleEvent::completion_tracker`
//! already carries per-item completion signalling, so there is no need for a
//! second, narrower worker flavour just for agent responses.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::events::{Interruptible, InterruptibleEvent};

/// A bounded single-consumer queue that can also be drained out-of-band by
/// the interruption broker. The receiver lives behind an async mutex so
/// "a worker is mid-`recv()`" and "the broker is draining" can never
/// interleave: whichever task wins the lock makes progress, the other waits.
///
/// A single-threaded cooperative scheduler would get this ordering
/// guarantee for free; this is the multi-threaded equivalent.
pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: tokio::sync::Mutex::new(rx) }
    }

    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Receive the next item. `None` once every sender has dropped.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Drop every currently-queued item. Returns how many were dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        // best-effort: no queued permits means no buffered items and no
        // senders currently blocked trying to push more than capacity allows
        self.tx.capacity() == self.tx.max_capacity()
    }

    /// Whether any currently-queued item matches `predicate`, without
    /// consuming the queue. Items are pulled off and pushed straight back in
    /// order, so a concurrent `recv()` can't interleave and reorder them.
    pub async fn has_queued(&self, predicate: impl Fn(&T) -> bool) -> bool {
        let mut rx = self.rx.lock().await;
        let mut buffered = Vec::new();
        let mut found = false;
        while let Ok(item) = rx.try_recv() {
            if predicate(&item) {
                found = true;
            }
            buffered.push(item);
        }
        for item in buffered {
            if self.tx.try_send(item).is_err() {
                warn!("dropped item re-queued after has_queued peek: channel unexpectedly full or closed");
            }
        }
        found
    }
}

/// Tracks the task currently processing the in-flight item so the broker
/// can abort exactly that task without disturbing anything else.
#[derive(Clone, Default)]
pub struct CurrentTask {
    handle: Arc<Mutex<Option<AbortHandle>>>,
}

impl CurrentTask {
    pub fn track(&self, handle: AbortHandle) {
        *self.handle.lock() = Some(handle);
    }

    pub fn clear(&self) {
        *self.handle.lock() = None;
    }

    /// Abort the in-flight task, if any. Safe to call from any worker.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

/// The bare-metal worker flavour: consumes its input queue and calls
/// `process` on every item. Used by `TranscriptionsWorker`, which has
/// nothing to cancel mid-item.
#[async_trait]
pub trait AsyncQueueWorker: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn process(&self, item: Self::Item);
}

pub async fn run_async_queue_worker<W>(worker: Arc<W>, queue: Arc<BoundedQueue<W::Item>>)
where
    W: AsyncQueueWorker,
{
    while let Some(item) = queue.recv().await {
        worker.process(item).await;
    }
    debug!("async queue worker exiting: input closed");
}

/// The interruptible flavour: each item arrives already wrapped in an
/// `InterruptibleEvent`; items already interrupted before being picked up
/// are skipped, and the processing task is tracked so `CurrentTask::cancel`
/// can abort it.
#[async_trait]
pub trait InterruptibleWorker: Send + Sync + 'static {
    type Input: Send + Sync + 'static;

    async fn process(&self, event: Arc<InterruptibleEvent<Self::Input>>);
}

pub async fn run_interruptible_worker<W>(worker: Arc<W>, queue: Arc<BoundedQueue<Arc<InterruptibleEvent<W::Input>>>>, current: CurrentTask)
where
    W: InterruptibleWorker,
{
    while let Some(event) = queue.recv().await {
        if event.is_interrupted() {
            debug!("dropping already-interrupted event before processing");
            continue;
        }
        let worker = worker.clone();
        let task = tokio::spawn(async move { worker.process(event).await });
        current.track(task.abort_handle());
        if let Err(err) = task.await {
            if err.is_cancelled() {
                debug!("in-flight item cancelled by broker");
            } else {
                warn!("worker task panicked: {err}");
            }
        }
        current.clear();
    }
    debug!("interruptible worker exiting: input closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_queue_drain_empties_without_consuming() {
        let q = Arc::new(BoundedQueue::<i32>::new(4));
        q.sender().send(1).await.unwrap();
        q.sender().send(2).await.unwrap();
        let dropped = q.drain().await;
        assert_eq!(dropped, 2);
        assert!(q.is_empty());
    }

    struct Echo;
    #[async_trait]
    impl AsyncQueueWorker for Echo {
        type Item = i32;
        async fn process(&self, _item: Self::Item) {}
    }

    #[tokio::test]
    async fn async_queue_worker_drains_all_items_then_exits() {
        let q = Arc::new(BoundedQueue::<i32>::new(4));
        let tx = q.sender();
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);
        let worker = Arc::new(Echo);
        run_async_queue_worker(worker, q).await;
    }
}
