//! Composed connection lifecycle stream.
//!
//! Merges the connect operation's result stream with the disconnect signal:
//!
//! ```text
//! connect (queued) ──success──► emit ready value ──► wait ──disconnect──► error, end
//!        │                                            │
//!        └──error / timeout / disconnect──► error, end └──drop──► end
//!
//! every path into Terminated runs the DisconnectAction exactly once
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use log::debug;
use tokio::sync::oneshot;
use tokio::time::Sleep;

use super::lifecycle_state::transition;
use super::{DisconnectAction, DisconnectMonitor, LifecycleEvent, LifecycleState};
use crate::error::{LinkError, LinkResult};

const LOG_TARGET: &str = "blequeue::connection";

type Begin<C> = Box<dyn FnOnce() -> LinkResult<Attempt<C>> + Send>;

/// Lifecycle of one connection attempt, as a stream.
///
/// Silent until the connect operation succeeds, then yields the connection
/// handle once, then stays open until the hardware reports a disconnect (one
/// `Err` item, then end). A failed connect yields its error without a ready
/// value. Dropping the stream cancels the attempt; a queued or running
/// connect operation gives up its queue slot.
///
/// Nothing happens until the first poll.
pub struct ConnectionLifecycle<C> {
    phase: Phase<C>,
}

enum Phase<C> {
    Deferred(Begin<C>),
    Live(Attempt<C>),
    Finished,
}

// The connection handle is only ever moved out, never pinned.
impl<C> Unpin for ConnectionLifecycle<C> {}

impl<C> ConnectionLifecycle<C> {
    pub(crate) fn deferred(
        begin: impl FnOnce() -> LinkResult<Attempt<C>> + Send + 'static,
    ) -> Self {
        Self {
            phase: Phase::Deferred(Box::new(begin)),
        }
    }

    /// Current lifecycle state, `None` before the first poll.
    pub fn state(&self) -> Option<LifecycleState> {
        match &self.phase {
            Phase::Deferred(_) => None,
            Phase::Live(attempt) => Some(attempt.state),
            Phase::Finished => Some(LifecycleState::Terminated),
        }
    }
}

impl<C> Stream for ConnectionLifecycle<C> {
    type Item = LinkResult<C>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if matches!(this.phase, Phase::Deferred(_)) {
            if let Phase::Deferred(begin) = std::mem::replace(&mut this.phase, Phase::Finished) {
                match begin() {
                    Ok(attempt) => this.phase = Phase::Live(attempt),
                    Err(error) => return Poll::Ready(Some(Err(error))),
                }
            }
        }

        match &mut this.phase {
            Phase::Live(attempt) => attempt.poll_next(cx),
            _ => Poll::Ready(None),
        }
    }
}

/// Live state of one attempt: the component graph pieces plus the state machine.
pub(crate) struct Attempt<C> {
    state: LifecycleState,
    ready: Option<C>,
    connect: Option<BoxStream<'static, LinkResult<()>>>,
    disconnects: DisconnectMonitor,
    disconnect_action: DisconnectAction,
    timeout: Option<Duration>,
    started: Option<oneshot::Receiver<()>>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<C> Attempt<C> {
    /// `started` fires when the connect operation takes the queue slot. The
    /// timeout counts from then, so time spent waiting in the queue is free.
    pub(crate) fn new(
        connection: C,
        connect: BoxStream<'static, LinkResult<()>>,
        started: oneshot::Receiver<()>,
        disconnects: DisconnectMonitor,
        disconnect_action: DisconnectAction,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: LifecycleState::Connecting,
            ready: Some(connection),
            connect: Some(connect),
            disconnects,
            disconnect_action,
            timeout,
            started: timeout.map(|_| started),
            deadline: None,
        }
    }

    /// Arm the deadline once the connect operation has started.
    fn poll_started(&mut self, cx: &mut Context<'_>) {
        let (Some(started), Some(timeout)) = (self.started.as_mut(), self.timeout) else {
            return;
        };
        match Pin::new(started).poll(cx) {
            Poll::Ready(Ok(())) => {
                debug!(target: LOG_TARGET, "Connect operation started, {:?} deadline armed", timeout);
                self.started = None;
                self.deadline = Some(Box::pin(tokio::time::sleep(timeout)));
            }
            // Withdrawn before it ever ran; nothing to time.
            Poll::Ready(Err(_)) => self.started = None,
            Poll::Pending => {}
        }
    }

    fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<LinkResult<C>>> {
        loop {
            match self.state {
                LifecycleState::Terminated => return Poll::Ready(None),
                LifecycleState::Connecting => {
                    if let Poll::Ready(error) = self.disconnects.poll_disconnect(cx) {
                        self.apply(LifecycleEvent::Disconnected);
                        return Poll::Ready(Some(Err(error)));
                    }
                    self.poll_started(cx);
                    if let (Some(sleep), Some(timeout)) = (self.deadline.as_mut(), self.timeout) {
                        if sleep.as_mut().poll(cx).is_ready() {
                            self.apply(LifecycleEvent::TimedOut);
                            return Poll::Ready(Some(Err(LinkError::timeout(timeout))));
                        }
                    }
                    match self.poll_connect(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(error)) => {
                            self.apply(LifecycleEvent::ConnectFailed);
                            return Poll::Ready(Some(Err(error)));
                        }
                        Poll::Ready(Ok(())) => {
                            self.apply(LifecycleEvent::ConnectSucceeded);
                            if let Some(connection) = self.ready.take() {
                                return Poll::Ready(Some(Ok(connection)));
                            }
                        }
                    }
                }
                LifecycleState::Connected => {
                    return match self.disconnects.poll_disconnect(cx) {
                        Poll::Ready(error) => {
                            self.apply(LifecycleEvent::Disconnected);
                            Poll::Ready(Some(Err(error)))
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }

    /// The first value or completion of the connect stream counts as success.
    fn poll_connect(&mut self, cx: &mut Context<'_>) -> Poll<LinkResult<()>> {
        let Some(connect) = self.connect.as_mut() else {
            return Poll::Pending;
        };
        match connect.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(()))) | Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Ready(Some(Err(error))) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn apply(&mut self, event: LifecycleEvent) {
        let Some(next) = transition(self.state, event) else {
            debug!(target: LOG_TARGET, "Ignoring {:?} in {:?}", event, self.state);
            return;
        };
        debug!(target: LOG_TARGET, "{:?} -> {:?} on {:?}", self.state, next, event);
        self.state = next;

        match next {
            LifecycleState::Connecting => {}
            LifecycleState::Connected => {
                // Dropping the connect stream frees its slot if still held.
                self.connect = None;
                self.started = None;
                self.deadline = None;
            }
            LifecycleState::Terminated => {
                self.connect = None;
                self.started = None;
                self.deadline = None;
                self.ready = None;
                if self.disconnect_action.invoke() {
                    debug!(target: LOG_TARGET, "Cleanup ran after {:?}", event);
                }
            }
        }
    }
}

impl<C> Drop for Attempt<C> {
    fn drop(&mut self) {
        if self.state != LifecycleState::Terminated {
            self.apply(LifecycleEvent::Cancelled);
        }
    }
}
