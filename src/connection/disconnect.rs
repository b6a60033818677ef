//! Disconnect notification and cleanup for one connection attempt.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use log::debug;
use tokio::sync::oneshot;

use crate::error::{LinkError, LockResultExt};

const LOG_TARGET: &str = "blequeue::connection";

/// Create the disconnect signal pair for one connection attempt.
///
/// The notifier goes to the hardware callback layer; the monitor goes to the
/// connection lifecycle.
pub fn disconnect_channel() -> (DisconnectNotifier, DisconnectMonitor) {
    let (sender, receiver) = oneshot::channel();
    (
        DisconnectNotifier {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        DisconnectMonitor {
            receiver: Some(receiver),
        },
    )
}

/// Sending side of a disconnect signal. Cloneable and callable from any thread.
///
/// Only the first notification is delivered. Later notifications, and any
/// notification arriving after the lifecycle has ended, are stale and dropped.
#[derive(Clone)]
pub struct DisconnectNotifier {
    sender: Arc<Mutex<Option<oneshot::Sender<LinkError>>>>,
}

impl DisconnectNotifier {
    /// Report a disconnect. Returns `true` if a live lifecycle received it.
    pub fn notify(&self, error: LinkError) -> bool {
        let sender = self
            .sender
            .lock()
            .recover_poison("DisconnectNotifier::notify")
            .take();
        match sender {
            Some(sender) => {
                let delivered = sender.send(error).is_ok();
                if !delivered {
                    debug!(target: LOG_TARGET, "Dropping stale disconnect, lifecycle already ended");
                }
                delivered
            }
            None => {
                debug!(target: LOG_TARGET, "Dropping repeated disconnect signal");
                false
            }
        }
    }
}

/// Receiving side of a disconnect signal.
///
/// Resolves with the disconnect error at most once. If every notifier is
/// dropped without signalling, the monitor stays pending forever.
pub struct DisconnectMonitor {
    receiver: Option<oneshot::Receiver<LinkError>>,
}

impl DisconnectMonitor {
    pub(crate) fn poll_disconnect(&mut self, cx: &mut Context<'_>) -> Poll<LinkError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(error)) => {
                self.receiver = None;
                Poll::Ready(error)
            }
            Poll::Ready(Err(_)) => {
                debug!(target: LOG_TARGET, "Disconnect notifier gone, monitor stays silent");
                self.receiver = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Future for DisconnectMonitor {
    type Output = LinkError;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_disconnect(cx)
    }
}

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Idempotent cleanup for the resources of one connection attempt.
///
/// Cloneable; all clones share the same once-only state.
#[derive(Clone)]
pub struct DisconnectAction {
    inner: Arc<DisconnectActionInner>,
}

struct DisconnectActionInner {
    fired: AtomicBool,
    action: Mutex<Option<CleanupFn>>,
}

impl DisconnectAction {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(DisconnectActionInner {
                fired: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// Run the cleanup. Returns `false` if it had already run.
    pub fn invoke(&self) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let action = self
            .inner
            .action
            .lock()
            .recover_poison("DisconnectAction::invoke")
            .take();
        if let Some(action) = action {
            action();
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }
}
