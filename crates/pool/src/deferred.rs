//! Single-assignment asynchronous result with an optional timeout.
//!
//! A [`Deferred`] is the producer side: it can be resolved or rejected
//! exactly once, from any clone. The paired [`Promise`] is the consumer
//! side and completes with whichever outcome landed first. Settling after
//! the first outcome is a no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{Error, Result, TimeoutError};

struct Slot<T> {
    sender: Option<oneshot::Sender<Result<T>>>,
    timer: Option<AbortHandle>,
}

impl<T> Slot<T> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Producer half of a cancellable, timeout-bearing result.
pub struct Deferred<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Deferred<T> {
    /// Whether an outcome has already been delivered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.lock().sender.is_none()
    }

    /// Whether the consumer stopped waiting (its [`Promise`] was dropped).
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.slot
            .lock()
            .sender
            .as_ref()
            .is_some_and(oneshot::Sender::is_closed)
    }

    /// Identity comparison between two handles.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Create an unsettled deferred and the promise observing it.
    #[must_use]
    pub fn new() -> (Self, Promise<T>) {
        let (sender, receiver) = oneshot::channel();
        let deferred = Self {
            slot: Arc::new(Mutex::new(Slot {
                sender: Some(sender),
                timer: None,
            })),
        };
        (deferred, Promise { receiver })
    }

    /// Arm a one-shot timer. When it fires, `on_timeout` runs first and the
    /// deferred is then rejected with [`Error::Timeout`].
    ///
    /// Ignored if a timer is already armed or the deferred has settled.
    /// Must be called from within a tokio runtime.
    pub fn register_timeout<F>(&self, timeout: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.timer.is_some() || slot.sender.is_none() {
            return;
        }
        let deferred = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout();
            deferred.reject(TimeoutError::new(timeout).into());
        });
        slot.timer = Some(task.abort_handle());
    }

    /// Settle with a value.
    ///
    /// Hands the value back when the deferred was already settled or its
    /// promise has been dropped, so the caller keeps ownership.
    pub fn resolve(&self, value: T) -> std::result::Result<(), T> {
        let sender = {
            let mut slot = self.slot.lock();
            slot.cancel_timer();
            slot.sender.take()
        };
        match sender {
            Some(sender) => match sender.send(Ok(value)) {
                Err(Ok(value)) => Err(value),
                _ => Ok(()),
            },
            None => Err(value),
        }
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: Error) -> bool {
        let sender = {
            let mut slot = self.slot.lock();
            slot.cancel_timer();
            slot.sender.take()
        };
        sender.is_some_and(|sender| sender.send(Err(error)).is_ok())
    }
}

/// Consumer half of a [`Deferred`].
///
/// Resolves to [`Error::Closed`] if every producer handle is dropped
/// without settling.
#[derive(Debug)]
pub struct Promise<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn resolve_delivers_value_once() {
        let (deferred, promise) = Deferred::new();
        assert!(deferred.resolve(7u32).is_ok());
        assert_eq!(deferred.resolve(8), Err(8));
        assert!(!deferred.reject(Error::Draining));
        assert_eq!(promise.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn reject_delivers_error() {
        let (deferred, promise) = Deferred::<u32>::new();
        assert!(deferred.reject(Error::Draining));
        assert!(deferred.is_settled());
        assert!(matches!(promise.await, Err(Error::Draining)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_runs_cleanup_then_rejects() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let (deferred, promise) = Deferred::<u32>::new();
        deferred.register_timeout(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });

        let err = promise.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(deferred.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_cancels_timer() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let (deferred, promise) = Deferred::new();
        deferred.register_timeout(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });
        deferred.resolve("ready").unwrap();
        assert_eq!(promise.await.unwrap(), "ready");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn second_timeout_registration_is_ignored() {
        let (deferred, promise) = Deferred::<u32>::new();
        deferred.register_timeout(Duration::from_millis(100), || {});
        deferred.register_timeout(Duration::from_secs(60), || {});

        let started = tokio::time::Instant::now();
        let err = promise.await.unwrap_err();
        assert!(matches!(err, Error::Timeout(t) if t.timeout() == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropped_promise_returns_value_to_producer() {
        let (deferred, promise) = Deferred::new();
        drop(promise);
        assert!(deferred.is_abandoned());
        assert_eq!(deferred.resolve(String::from("conn")), Err(String::from("conn")));
    }

    #[tokio::test]
    async fn dropped_producer_closes_promise() {
        let (deferred, promise) = Deferred::<u32>::new();
        drop(deferred);
        assert!(matches!(promise.await, Err(Error::Closed)));
    }

    #[test]
    fn debug_does_not_require_send() {
        let (sender, _receiver) = oneshot::channel::<Result<std::rc::Rc<u8>>>();
        let deferred = Deferred {
            slot: Arc::new(Mutex::new(Slot {
                sender: Some(sender),
                timer: None,
            })),
        };
        assert_eq!(format!("{deferred:?}"), "Deferred { settled: false }");
        assert!(!deferred.is_abandoned());
    }

    #[test]
    fn clones_share_identity() {
        let (a, _pa) = Deferred::<u32>::new();
        let (b, _pb) = Deferred::<u32>::new();
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
