//! Lazy result stream returned by [`OperationQueue::submit`](super::OperationQueue::submit).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;

use crate::emitter::EmissionReceiver;
use crate::error::LinkResult;

type Activate<T> = Box<dyn FnOnce() -> EmissionReceiver<T> + Send>;

/// Results of one queued operation.
///
/// Nothing is queued until the first poll. After that the stream yields the
/// operation's values, then ends on completion or yields exactly one error
/// and ends. Dropping the stream before its end cancels the operation: a
/// waiting operation is withdrawn, a running one releases its slot.
pub struct OperationStream<T> {
    state: StreamState<T>,
}

enum StreamState<T> {
    Deferred(Activate<T>),
    Active(EmissionReceiver<T>),
    Done,
}

// Neither state is ever pinned in place.
impl<T> Unpin for OperationStream<T> {}

impl<T> OperationStream<T> {
    pub(crate) fn deferred(activate: impl FnOnce() -> EmissionReceiver<T> + Send + 'static) -> Self {
        Self {
            state: StreamState::Deferred(Box::new(activate)),
        }
    }

    /// Whether the operation has been handed to the queue.
    pub fn is_activated(&self) -> bool {
        !matches!(self.state, StreamState::Deferred(_))
    }
}

impl<T> Stream for OperationStream<T> {
    type Item = LinkResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if matches!(this.state, StreamState::Deferred(_)) {
            if let StreamState::Deferred(activate) =
                std::mem::replace(&mut this.state, StreamState::Done)
            {
                this.state = StreamState::Active(activate());
            }
        }

        let StreamState::Active(receiver) = &mut this.state else {
            return Poll::Ready(None);
        };
        match receiver.poll_recv(cx) {
            Poll::Ready(None) => {
                this.state = StreamState::Done;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
