//! Consumer-facing emission channel.
//!
//! The [`Emitter`] half is handed to the producing side and may be used from
//! any thread, including hardware driver callback threads. The
//! [`EmissionReceiver`] half stays with the consumer; dropping it before the
//! terminal event counts as a cancellation and runs the registered cancel hook.

use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use log::trace;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{LinkError, LinkResult, LockResultExt};

const LOG_TARGET: &str = "blequeue::emitter";

type CancelHook = Box<dyn FnOnce() + Send>;

enum Emission<T> {
    Next(T),
    Error(LinkError),
}

/// Cancellation state shared by both halves of the channel.
///
/// The `cancelled` flag and the hook slot live under one mutex so that a hook
/// registered concurrently with a cancellation either gets stored and later run
/// by `cancel`, or observes the flag and runs itself. Never both, never neither.
struct CancelShared {
    state: Mutex<CancelState>,
    token: CancellationToken,
}

struct CancelState {
    cancelled: bool,
    hook: Option<CancelHook>,
}

impl CancelShared {
    fn cancel(&self) {
        let hook = {
            let mut state = self.state.lock().recover_poison("CancelShared::cancel");
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.hook.take()
        };
        self.token.cancel();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Create a connected emitter/receiver pair.
pub fn emission_channel<T>() -> (Emitter<T>, EmissionReceiver<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let shared = Arc::new(CancelShared {
        state: Mutex::new(CancelState {
            cancelled: false,
            hook: None,
        }),
        token: CancellationToken::new(),
    });

    let emitter = Emitter {
        sender: Mutex::new(Some(sender)),
        shared: Arc::clone(&shared),
    };
    let receiver = EmissionReceiver {
        receiver,
        shared,
        terminated: false,
    };
    (emitter, receiver)
}

/// Producing half of an emission channel.
///
/// At most one terminal event (completion or error) is ever delivered; every
/// call after the first terminal event is a no-op. Dropping an emitter that
/// never terminated delivers [`LinkError::Abandoned`] so the consumer is not
/// left waiting forever.
pub struct Emitter<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<Emission<T>>>>,
    shared: Arc<CancelShared>,
}

impl<T> Emitter<T> {
    /// Deliver a value. Silently dropped once terminated or cancelled.
    pub fn on_next(&self, value: T) {
        let sender = self.sender.lock().recover_poison("Emitter::on_next");
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(Emission::Next(value)).is_err() {
                    trace!(target: LOG_TARGET, "Consumer detached, dropping value");
                }
            }
            None => trace!(target: LOG_TARGET, "Value after terminal event dropped"),
        }
    }

    /// Signal completion. Dropping the sender closes the channel.
    pub fn on_complete(&self) {
        if self.take_sender("Emitter::on_complete").is_none() {
            trace!(target: LOG_TARGET, "Completion after terminal event dropped");
        }
    }

    /// Deliver an error on a best-effort basis.
    ///
    /// Returns `false` when a terminal event was already delivered or the
    /// consumer has detached, in which case the error is dropped.
    pub fn try_on_error(&self, error: LinkError) -> bool {
        match self.take_sender("Emitter::try_on_error") {
            Some(sender) => sender.send(Emission::Error(error)).is_ok(),
            None => false,
        }
    }

    /// Whether the consumer cancelled before the terminal event.
    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Resolves once the consumer cancels.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.token.cancelled()
    }

    /// Register the action to run when the consumer cancels.
    ///
    /// Replaces any previously registered hook without running it. If the
    /// consumer already cancelled, the hook runs immediately on this thread.
    pub fn set_cancellable(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self
            .shared
            .state
            .lock()
            .recover_poison("Emitter::set_cancellable");
        if state.cancelled {
            drop(state);
            hook();
        } else {
            state.hook = Some(Box::new(hook));
        }
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    fn take_sender(&self, context: &str) -> Option<mpsc::UnboundedSender<Emission<T>>> {
        self.sender.lock().recover_poison(context).take()
    }
}

impl<T> Drop for Emitter<T> {
    fn drop(&mut self) {
        let sender = self
            .sender
            .get_mut()
            .recover_poison("Emitter::drop")
            .take();
        if let Some(sender) = sender {
            trace!(target: LOG_TARGET, "Emitter dropped without terminal event");
            let _ = sender.send(Emission::Error(LinkError::Abandoned));
        }
    }
}

/// Consuming half of an emission channel.
pub struct EmissionReceiver<T> {
    receiver: mpsc::UnboundedReceiver<Emission<T>>,
    shared: Arc<CancelShared>,
    terminated: bool,
}

impl<T> EmissionReceiver<T> {
    /// Poll for the next item.
    ///
    /// Yields `Ok` values, then either `None` (completion) or exactly one `Err`
    /// followed by `None`.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<LinkResult<T>>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Emission::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Emission::Error(error))) => {
                self.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
        }
    }

    /// Receive the next item.
    pub async fn recv(&mut self) -> Option<LinkResult<T>> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Whether the terminal event was observed (or the receiver was cancelled).
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Cancel the emission. No-op after the terminal event was observed.
    pub fn cancel(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.receiver.close();
        self.shared.cancel();
    }
}

impl<T> Drop for EmissionReceiver<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn values_then_completion_are_delivered_in_order() {
        let (emitter, mut receiver) = emission_channel();

        emitter.on_next(1);
        emitter.on_next(2);
        emitter.on_complete();
        emitter.on_next(3);

        assert_eq!(receiver.recv().await.unwrap().unwrap(), 1);
        assert_eq!(receiver.recv().await.unwrap().unwrap(), 2);
        assert!(receiver.recv().await.is_none());
        assert!(receiver.is_terminated());
    }

    #[tokio::test]
    async fn only_first_terminal_event_is_delivered() {
        let (emitter, mut receiver) = emission_channel::<u8>();

        assert!(emitter.try_on_error(LinkError::execution("read", "gatt 133")));
        assert!(!emitter.try_on_error(LinkError::Abandoned));
        emitter.on_complete();

        match receiver.recv().await {
            Some(Err(LinkError::Execution { message, .. })) => assert_eq!(message, "gatt 133"),
            _ => panic!("Expected execution error"),
        }
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_emitter_reports_abandoned() {
        let (emitter, mut receiver) = emission_channel::<u8>();
        drop(emitter);

        assert!(matches!(receiver.recv().await, Some(Err(LinkError::Abandoned))));
        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn dropping_receiver_runs_cancel_hook_once() {
        let (emitter, receiver) = emission_channel::<u8>();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        emitter.set_cancellable(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(receiver);

        assert!(emitter.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!emitter.try_on_error(LinkError::Abandoned));
    }

    #[test]
    fn hook_registered_after_cancel_runs_immediately() {
        let (emitter, receiver) = emission_channel::<u8>();
        drop(receiver);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        emitter.set_cancellable(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replaced_hook_is_not_run() {
        let (emitter, receiver) = emission_channel::<u8>();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        emitter.set_cancellable(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        emitter.set_cancellable(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(receiver);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receiver_dropped_after_completion_is_not_a_cancel() {
        let (emitter, mut receiver) = emission_channel::<u8>();
        emitter.on_complete();
        assert!(receiver.recv().await.is_none());

        drop(receiver);
        assert!(!emitter.is_cancelled());
    }
}
