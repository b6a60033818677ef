//! Units of work executed against the shared connection.

use std::future::Future;
use std::marker::PhantomData;

use crate::emitter::QueueReleasingEmitter;

/// A deferred unit of work that runs while holding the queue slot.
///
/// The operation reports through the provided emitter: zero or more values
/// followed by completion or an error. The slot is freed when the emitter
/// terminates, when the consumer cancels, or when the emitter is dropped, so
/// an operation cannot stall the queue by returning early or panicking.
///
/// The returned future is spawned on the queue's runtime. It may finish
/// before the operation does, e.g. when the emitter is handed to a hardware
/// driver callback that completes on another thread.
pub trait QueueOperation: Send + 'static {
    /// Value type delivered to the consumer.
    type Output: Send + 'static;

    /// Name used in log output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Execute the operation against the shared resource.
    fn run(
        self,
        emitter: QueueReleasingEmitter<Self::Output>,
    ) -> impl Future<Output = ()> + Send + 'static;
}

/// Operation built from an async closure. See [`operation_fn`].
pub struct FnOperation<T, F> {
    name: &'static str,
    body: F,
    _output: PhantomData<fn() -> T>,
}

/// Adapt an async closure into a [`QueueOperation`].
///
/// ```ignore
/// let read = operation_fn("read-battery", |emitter| async move {
///     emitter.on_next(vec![0x64]);
///     emitter.on_complete();
/// });
/// let stream = queue.submit(read);
/// ```
pub fn operation_fn<T, F, Fut>(name: &'static str, body: F) -> FnOperation<T, F>
where
    T: Send + 'static,
    F: FnOnce(QueueReleasingEmitter<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnOperation {
        name,
        body,
        _output: PhantomData,
    }
}

impl<T, F, Fut> QueueOperation for FnOperation<T, F>
where
    T: Send + 'static,
    F: FnOnce(QueueReleasingEmitter<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn run(self, emitter: QueueReleasingEmitter<T>) -> impl Future<Output = ()> + Send + 'static {
        (self.body)(emitter)
    }
}
