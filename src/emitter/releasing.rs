//! Release-guarded emitter for queued operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::trace;
use tokio_util::sync::WaitForCancellationFuture;

use super::Emitter;
use crate::error::LinkError;

const LOG_TARGET: &str = "blequeue::emitter";

/// Permission to advance the queue, handed to the operation holding the slot.
pub trait QueueRelease: Send + Sync {
    /// Free the slot so the next pending operation may start.
    fn release(&self);
}

/// Single-shot release state shared between the operation side and the
/// consumer's cancel hook.
struct ReleaseGuard {
    released: AtomicBool,
    cancelled: AtomicBool,
    release: Arc<dyn QueueRelease>,
}

impl ReleaseGuard {
    /// Fire the release action if no other trigger has fired it yet.
    fn release_once(&self, trigger: &str) -> bool {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(target: LOG_TARGET, "Release already fired, ignoring {}", trigger);
            return false;
        }
        trace!(target: LOG_TARGET, "Releasing queue slot on {}", trigger);
        self.release.release();
        true
    }
}

/// Emitter wrapper that frees the queue slot exactly once.
///
/// The release fires on the first of: [`on_complete`](Self::on_complete),
/// [`on_error`](Self::on_error), cancellation by the consumer, or drop of
/// this wrapper. Triggers may race across threads; the compare-and-set on the
/// guard makes every trigger after the first a no-op.
pub struct QueueReleasingEmitter<T> {
    emitter: Emitter<T>,
    guard: Arc<ReleaseGuard>,
}

impl<T> QueueReleasingEmitter<T> {
    /// Wrap `emitter`, registering the release as its cancel hook.
    pub fn new(emitter: Emitter<T>, release: Arc<dyn QueueRelease>) -> Self {
        let guard = Arc::new(ReleaseGuard {
            released: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            release,
        });

        let hook_guard = Arc::clone(&guard);
        emitter.set_cancellable(move || {
            hook_guard.cancelled.store(true, Ordering::Release);
            hook_guard.release_once("cancellation");
        });

        Self { emitter, guard }
    }

    /// Forward a value. Has no release implication.
    pub fn on_next(&self, value: T) {
        self.emitter.on_next(value);
    }

    /// Release, then signal completion downstream.
    pub fn on_complete(&self) {
        self.guard.release_once("completion");
        self.emitter.on_complete();
    }

    /// Release, then deliver the error on a best-effort basis.
    pub fn on_error(&self, error: LinkError) {
        self.guard.release_once("error");
        if !self.emitter.try_on_error(error) {
            trace!(target: LOG_TARGET, "Error dropped, consumer already detached");
        }
    }

    /// Whether the consumer cancelled the wrapped emitter.
    pub fn is_wrapped_emitter_unsubscribed(&self) -> bool {
        self.guard.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the consumer cancels.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.emitter.cancelled()
    }
}

impl<T> Drop for QueueReleasingEmitter<T> {
    fn drop(&mut self) {
        self.guard.release_once("drop");
    }
}
