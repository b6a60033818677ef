//! FIFO operation queue owning the single in-flight slot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{OperationStream, QueueOperation};
use crate::emitter::{EmissionReceiver, QueueRelease, QueueReleasingEmitter, emission_channel};
use crate::error::{LinkError, LinkResult, LockResultExt};

const LOG_TARGET: &str = "blequeue::queue";

type Launch = Box<dyn FnOnce(Arc<dyn QueueRelease>, &Handle) + Send>;

/// Serializes operations against one shared connection.
///
/// Cheap to clone; every clone drives the same queue. One queue serializes
/// access to exactly one connection, so create one per connection scope and
/// pass it to whoever needs it.
///
/// # Scheduling
///
/// - [`submit`](Self::submit) returns a lazy stream; nothing is queued until the
///   stream is first polled.
/// - Queued operations start strictly in arrival order, one at a time.
/// - The next operation starts only when the current one releases the slot
///   (see [`QueueReleasingEmitter`]).
/// - A waiting operation whose consumer goes away is withdrawn and never runs.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    runtime: Handle,
    next_id: AtomicU64,
}

/// Pending sequence plus the in-flight slot, guarded by one mutex so that
/// check-empty, occupy, and dequeue happen as a single step.
struct QueueState {
    pending: VecDeque<QueuedEntry>,
    in_flight: Option<u64>,
}

struct QueuedEntry {
    id: u64,
    name: &'static str,
    cancel_token: CancellationToken,
    launch: Launch,
}

impl QueueState {
    /// Move the head of the pending sequence into the slot (or empty the slot).
    fn occupy_next(&mut self) -> Option<QueuedEntry> {
        let next = self.pending.pop_front();
        self.in_flight = next.as_ref().map(|entry| entry.id);
        next
    }
}

impl OperationQueue {
    /// Create a queue bound to the current tokio runtime.
    pub fn new() -> LinkResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| LinkError::runtime_unavailable(e.to_string()))?;
        Ok(Self::with_runtime(runtime))
    }

    /// Create a queue that launches operations on `runtime`.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: None,
                }),
                runtime,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Submit an operation, returning the lazy stream of its results.
    ///
    /// The operation is queued on the first poll of the returned stream.
    /// Dropping the stream before that has no effect on the queue.
    pub fn submit<O: QueueOperation>(&self, operation: O) -> OperationStream<O::Output> {
        let queue = self.clone();
        OperationStream::deferred(move || queue.enqueue(operation))
    }

    /// Number of operations waiting for the slot.
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .recover_poison("OperationQueue::pending_count")
            .pending
            .len()
    }

    /// Whether an operation currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.inner
            .state
            .lock()
            .recover_poison("OperationQueue::is_busy")
            .in_flight
            .is_some()
    }

    fn enqueue<O: QueueOperation>(&self, operation: O) -> EmissionReceiver<O::Output> {
        let (emitter, receiver) = emission_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = operation.name();

        // While waiting, a cancellation withdraws the entry. Launching swaps
        // this hook for the release hook.
        let queue = Arc::downgrade(&self.inner);
        emitter.set_cancellable(move || {
            if let Some(queue) = queue.upgrade() {
                queue.withdraw(id);
            }
        });

        let entry = QueuedEntry {
            id,
            name,
            cancel_token: emitter.cancellation_token(),
            launch: Box::new(move |release, runtime| {
                let emitter = QueueReleasingEmitter::new(emitter, release);
                runtime.spawn(operation.run(emitter));
            }),
        };

        debug!(target: LOG_TARGET, "Queued {} (#{})", name, id);
        self.inner.push(entry);
        receiver
    }
}

impl QueueInner {
    fn push(self: &Arc<Self>, entry: QueuedEntry) {
        let next = {
            let mut state = self.state.lock().recover_poison("QueueInner::push");
            state.pending.push_back(entry);
            if state.in_flight.is_none() {
                state.occupy_next()
            } else {
                None
            }
        };

        if let Some(entry) = next {
            if entry.cancel_token.is_cancelled() {
                debug!(target: LOG_TARGET, "Skipping cancelled {} (#{})", entry.name, entry.id);
                self.release_slot(entry.id);
            } else {
                self.start(entry);
            }
        }
    }

    /// Free the slot held by `id` and start the next live entry.
    ///
    /// A release from anything other than the current slot holder is stale
    /// and ignored.
    fn release_slot(self: &Arc<Self>, id: u64) {
        let mut holder = id;
        loop {
            let next = {
                let mut state = self.state.lock().recover_poison("QueueInner::release_slot");
                if state.in_flight != Some(holder) {
                    debug!(target: LOG_TARGET, "Ignoring stale release from #{}", holder);
                    return;
                }
                state.occupy_next()
            };

            match next {
                None => {
                    debug!(target: LOG_TARGET, "Released #{}, queue idle", holder);
                    return;
                }
                Some(entry) if entry.cancel_token.is_cancelled() => {
                    debug!(target: LOG_TARGET, "Skipping cancelled {} (#{})", entry.name, entry.id);
                    holder = entry.id;
                }
                Some(entry) => {
                    debug!(target: LOG_TARGET, "Released #{}", holder);
                    self.start(entry);
                    return;
                }
            }
        }
    }

    fn start(self: &Arc<Self>, entry: QueuedEntry) {
        debug!(target: LOG_TARGET, "Starting {} (#{})", entry.name, entry.id);
        let release: Arc<dyn QueueRelease> = Arc::new(SlotRelease {
            queue: Arc::clone(self),
            id: entry.id,
        });
        (entry.launch)(release, &self.runtime);
    }

    fn withdraw(&self, id: u64) {
        // Dropped outside the lock: dropping an entry drops its operation.
        let withdrawn = {
            let mut state = self.state.lock().recover_poison("QueueInner::withdraw");
            let position = state.pending.iter().position(|entry| entry.id == id);
            position.and_then(|position| state.pending.remove(position))
        };
        if let Some(entry) = withdrawn {
            debug!(target: LOG_TARGET, "Withdrew cancelled {} (#{})", entry.name, entry.id);
        }
    }
}

/// Release handle for the operation holding the slot.
struct SlotRelease {
    queue: Arc<QueueInner>,
    id: u64,
}

impl QueueRelease for SlotRelease {
    fn release(&self) {
        self.queue.release_slot(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::operation_fn;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Operation that records its start and completes with `value` after `delay`.
    fn recording_op(
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
        value: u32,
        delay: Duration,
    ) -> impl QueueOperation<Output = u32> {
        operation_fn(label, move |emitter| async move {
            log.lock().unwrap().push(format!("start {}", label));
            tokio::time::sleep(delay).await;
            log.lock().unwrap().push(format!("end {}", label));
            emitter.on_next(value);
            emitter.on_complete();
        })
    }

    fn driver_failure() {
        panic!("driver exploded");
    }

    #[test]
    fn new_outside_runtime_fails() {
        let result = std::thread::spawn(OperationQueue::new).join().unwrap();
        assert!(matches!(result, Err(LinkError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn submit_is_lazy_until_polled() {
        let queue = OperationQueue::new().unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);

        let mut stream = queue.submit(operation_fn("lazy", move |emitter| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.on_next(5u8);
            emitter.on_complete();
        }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert!(!queue.is_busy());

        assert_eq!(stream.next().await.unwrap().unwrap(), 5);
        assert!(stream.next().await.is_none());
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_unpolled_stream_never_runs() {
        let queue = OperationQueue::new().unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);

        drop(queue.submit(operation_fn("never", move |emitter: QueueReleasingEmitter<()>| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.on_complete();
        })));

        let after: Vec<_> = queue
            .submit(operation_fn("after", |emitter| async move {
                emitter.on_next(1u8);
                emitter.on_complete();
            }))
            .collect()
            .await;
        assert_eq!(after.len(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_run_in_submission_order_without_overlap() {
        let queue = OperationQueue::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = queue.submit(recording_op(log.clone(), "o1", 1, Duration::from_millis(30)));
        let second = queue.submit(recording_op(log.clone(), "o2", 2, Duration::from_millis(5)));
        let third = queue.submit(recording_op(log.clone(), "o3", 3, Duration::from_millis(1)));

        let (a, b, c) = tokio::join!(
            first.collect::<Vec<_>>(),
            second.collect::<Vec<_>>(),
            third.collect::<Vec<_>>()
        );

        assert_eq!(a.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![1]);
        assert_eq!(b.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![2]);
        assert_eq!(c.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![3]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start o1", "end o1", "start o2", "end o2", "start o3", "end o3"]
        );
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn execution_error_reaches_only_its_consumer() {
        let queue = OperationQueue::new().unwrap();

        let mut failing = queue.submit(operation_fn("failing", |emitter: QueueReleasingEmitter<()>| async move {
            emitter.on_error(LinkError::execution("failing", "status 133"));
        }));
        let mut healthy = queue.submit(operation_fn("healthy", |emitter| async move {
            emitter.on_next("ok");
            emitter.on_complete();
        }));

        assert!(matches!(
            failing.next().await,
            Some(Err(LinkError::Execution { .. }))
        ));
        assert!(failing.next().await.is_none());
        assert_eq!(healthy.next().await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn panicking_operation_releases_slot() {
        let queue = OperationQueue::new().unwrap();

        let mut broken = queue.submit(operation_fn("broken", |emitter: QueueReleasingEmitter<u8>| async move {
            let _held = emitter;
            driver_failure();
        }));
        assert!(matches!(broken.next().await, Some(Err(LinkError::Abandoned))));

        let mut next = queue.submit(operation_fn("next", |emitter| async move {
            emitter.on_next(9u8);
            emitter.on_complete();
        }));
        assert_eq!(next.next().await.unwrap().unwrap(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_waiting_operation_withdraws_it() {
        let queue = OperationQueue::new().unwrap();
        let (unblock_tx, unblock_rx) = oneshot::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        let mut blocker = queue.submit(operation_fn("blocker", move |emitter: QueueReleasingEmitter<()>| async move {
            let _ = unblock_rx.await;
            emitter.on_complete();
        }));
        let counter = Arc::clone(&ran);
        let mut waiting = queue.submit(operation_fn("waiting", move |emitter: QueueReleasingEmitter<()>| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.on_complete();
        }));

        // Activate both streams so both are queued.
        assert!(tokio::time::timeout(Duration::from_millis(5), blocker.next()).await.is_err());
        assert!(tokio::time::timeout(Duration::from_millis(5), waiting.next()).await.is_err());
        assert_eq!(queue.pending_count(), 1);

        drop(waiting);
        assert_eq!(queue.pending_count(), 0);

        unblock_tx.send(()).unwrap();
        assert!(blocker.next().await.is_none());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn stale_release_is_ignored() {
        let queue = OperationQueue::new().unwrap();
        let (unblock_tx, unblock_rx) = oneshot::channel::<()>();

        let mut holder = queue.submit(operation_fn("holder", move |emitter: QueueReleasingEmitter<()>| async move {
            let _ = unblock_rx.await;
            emitter.on_complete();
        }));
        assert!(tokio::time::timeout(Duration::from_millis(5), holder.next()).await.is_err());
        assert!(queue.is_busy());

        SlotRelease {
            queue: Arc::clone(&queue.inner),
            id: 999,
        }
        .release();
        assert!(queue.is_busy());

        unblock_tx.send(()).unwrap();
        assert!(holder.next().await.is_none());
    }
}
