//! Interruptible events: the cross-worker message envelope.
//!
//! Every message handed between workers is wrapped in an [`InterruptibleEvent`]
//! so that a single broker call can cancel whatever is in flight anywhere in
//! the pipeline without the workers themselves needing to coordinate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::Notify;

/// A one-shot signal that can be set exactly once and awaited any number of
/// times, including by waiters that show up after it was already set.
///
/// Used both for the interrupt signal and the completion tracker on
/// [`InterruptibleEvent`] — the invariant in both cases is "set at most once,
/// observed reliably by every waiter, never deadlocks".
#[derive(Clone)]
pub struct OnceSignal {
    inner: Arc<OnceSignalInner>,
}

struct OnceSignalInner {
    fired: AtomicBool,
    notify: Notify,
}

impl Default for OnceSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl OnceSignal {
    pub fn new() -> Self {
        Self { inner: Arc::new(OnceSignalInner { fired: AtomicBool::new(false), notify: Notify::new() }) }
    }

    /// Set the signal. Idempotent: the second and later calls are no-ops.
    pub fn set(&self) {
        if !self.inner.fired.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        // Register for the notification before re-checking the flag so a
        // `set()` racing with this call can never be missed.
        let notified = self.inner.notify.notified();
        if self.inner.fired.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Object-safe facet of [`InterruptibleEvent`] used by the central
/// interruption registry, which holds events of many different payload
/// types in one queue.
pub trait Interruptible: Send + Sync {
    fn is_interrupted(&self) -> bool;
    /// Attempt to interrupt. Returns `true` the first time this succeeds on
    /// an interruptible, not-yet-interrupted event.
    fn interrupt(&self) -> bool;
}

/// Wraps a cross-worker payload with interruption and completion tracking.
///
/// The payload sits behind a lock holding an `Option` so a worker that needs
/// to consume a non-`Clone` payload (a chunk stream, say) can `take()` it
/// out exactly once; payloads that are cheap to clone can use `peek`/
/// `clone_payload` instead and leave it in place.
///
/// Invariant: once `interrupted` is true, consumers must abandon work; the
/// completion tracker is set exactly once, either on successful completion
/// or on cancellation.
pub struct InterruptibleEvent<T> {
    payload: parking_lot::Mutex<Option<T>>,
    is_interruptible: bool,
    interrupted: AtomicBool,
    interrupt_signal: OnceSignal,
    pub completion_tracker: OnceSignal,
}

impl<T> InterruptibleEvent<T> {
    pub fn new(payload: T, is_interruptible: bool) -> Self {
        Self {
            payload: parking_lot::Mutex::new(Some(payload)),
            is_interruptible,
            interrupted: AtomicBool::new(false),
            interrupt_signal: OnceSignal::new(),
            completion_tracker: OnceSignal::new(),
        }
    }

    pub fn is_interruptible(&self) -> bool {
        self.is_interruptible
    }

    pub async fn wait_for_interrupt(&self) {
        self.interrupt_signal.wait().await;
    }

    /// Run `f` against the payload without removing it. Panics if the
    /// payload was already taken — every event is processed exactly once.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.payload.lock();
        f(guard.as_ref().expect("event payload already taken"))
    }

    /// Remove the payload, leaving the event empty. Only the worker that
    /// owns this item's processing should call this.
    pub fn take_payload(&self) -> T {
        self.payload.lock().take().expect("event payload already taken")
    }
}

impl<T: Clone> InterruptibleEvent<T> {
    pub fn clone_payload(&self) -> T {
        self.peek(|payload| payload.clone())
    }
}

impl<T: Send + Sync> Interruptible for InterruptibleEvent<T> {
    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn interrupt(&self) -> bool {
        if !self.is_interruptible {
            return false;
        }
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.interrupt_signal.set();
        true
    }
}

/// Unbounded MPSC registry that every created event is enqueued onto, so the
/// interruption broker can sweep all live events in one pass.
pub struct InterruptionRegistry {
    tx: mpsc::UnboundedSender<Arc<dyn Interruptible>>,
    rx: std::sync::Mutex<mpsc::UnboundedReceiver<Arc<dyn Interruptible>>>,
}

impl Default for InterruptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptionRegistry {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: std::sync::Mutex::new(rx) }
    }

    fn register(&self, event: Arc<dyn Interruptible>) {
        // The registry outlives every event; a send error would only mean
        // the broker itself was dropped, which ends the conversation anyway.
        let _ = self.tx.send(event);
    }

    /// Drain every registered event, interrupting each that isn't already
    /// interrupted. Returns the number of events newly interrupted.
    pub fn broadcast_interrupt(&self) -> usize {
        let mut rx = self.rx.lock().expect("interruption registry poisoned");
        let mut interrupted = 0;
        while let Ok(event) = rx.try_recv() {
            if !event.is_interrupted() && event.interrupt() {
                interrupted += 1;
            }
        }
        interrupted
    }
}

/// Creates [`InterruptibleEvent`]s and registers each one with the central
/// registry so the interruption broker can reach it later.
#[derive(Clone)]
pub struct InterruptibleEventFactory {
    registry: Arc<InterruptionRegistry>,
}

impl InterruptibleEventFactory {
    pub fn new(registry: Arc<InterruptionRegistry>) -> Self {
        Self { registry }
    }

    pub fn create_event<T>(&self, payload: T, is_interruptible: bool) -> Arc<InterruptibleEvent<T>>
    where
        T: Send + Sync + 'static,
    {
        let event = Arc::new(InterruptibleEvent::new(payload, is_interruptible));
        self.registry.register(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_tracker_wait_after_set_returns_immediately() {
        let signal = OnceSignal::new();
        signal.set();
        tokio::time::timeout(std::time::Duration::from_millis(50), signal.wait()).await.expect("should not block");
    }

    #[tokio::test]
    async fn interrupt_is_idempotent() {
        let registry = Arc::new(InterruptionRegistry::new());
        let factory = InterruptibleEventFactory::new(registry);
        let event = factory.create_event(42, true);
        assert!(event.interrupt());
        assert!(!event.interrupt());
        assert!(event.is_interrupted());
    }

    #[test]
    fn non_interruptible_event_cannot_be_interrupted() {
        let registry = Arc::new(InterruptionRegistry::new());
        let factory = InterruptibleEventFactory::new(registry);
        let event = factory.create_event("hi", false);
        assert!(!event.interrupt());
        assert!(!event.is_interrupted());
    }

    #[test]
    fn broadcast_interrupt_counts_only_new_interrupts() {
        let registry = Arc::new(InterruptionRegistry::new());
        let factory = InterruptibleEventFactory::new(registry.clone());
        let a = factory.create_event(1, true);
        let _b = factory.create_event(2, false);
        a.interrupt();
        let c = factory.create_event(3, true);
        let _ = c;
        assert_eq!(registry.broadcast_interrupt(), 1);
    }
}
