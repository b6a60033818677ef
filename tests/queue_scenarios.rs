//! Scheduling scenarios for the operation queue, run on paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use blequeue::{OperationQueue, QueueReleasingEmitter, operation_fn};
use futures_util::StreamExt;
use tokio::time::Instant;

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn values_are_delivered_in_submission_order() {
    let queue = OperationQueue::new().unwrap();
    let log: Log = Arc::default();

    let submit = |label: u32, delay_ms: u64| {
        let log = Arc::clone(&log);
        queue.submit(operation_fn("scenario", move |emitter| async move {
            log.lock().unwrap().push(format!("start {}", label));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            log.lock().unwrap().push(format!("emit {}", label));
            emitter.on_next(label);
            emitter.on_complete();
        }))
    };
    let first = submit(1, 20);
    let second = submit(2, 1);

    let (first, second) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
    let observed: Vec<u32> = first.into_iter().chain(second).map(Result::unwrap).collect();

    assert_eq!(observed, vec![1, 2]);
    assert_eq!(entries(&log), vec!["start 1", "emit 1", "start 2", "emit 2"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_head_lets_next_operation_run() {
    let queue = OperationQueue::new().unwrap();
    let origin = Instant::now();
    let second_started = Arc::new(Mutex::new(None));

    let mut first = queue.submit(operation_fn(
        "never-completes",
        |emitter: QueueReleasingEmitter<&'static str>| async move {
            emitter.cancelled().await;
        },
    ));
    let recorder = Arc::clone(&second_started);
    let second = queue.submit(operation_fn("completes", move |emitter| async move {
        *recorder.lock().unwrap() = Some(Instant::now());
        emitter.on_next("x");
        emitter.on_complete();
    }));

    assert!(
        tokio::time::timeout(Duration::from_millis(1), first.next())
            .await
            .is_err()
    );
    let second = tokio::spawn(second.collect::<Vec<_>>());

    tokio::time::sleep_until(origin + Duration::from_millis(10)).await;
    assert!(second_started.lock().unwrap().is_none());
    assert_eq!(queue.pending_count(), 1);

    drop(first);
    let values: Vec<_> = second.await.unwrap().into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec!["x"]);

    let started = second_started.lock().unwrap().expect("second operation should have run");
    assert!(started.duration_since(origin) >= Duration::from_millis(10));
    assert!(!queue.is_busy());
}

#[tokio::test(start_paused = true)]
async fn error_in_one_operation_does_not_halt_the_queue() {
    let queue = OperationQueue::new().unwrap();

    let results: Vec<Vec<_>> = futures_util::future::join_all((0..4u8).map(|index| {
        queue
            .submit(operation_fn("mixed", move |emitter| async move {
                if index % 2 == 0 {
                    emitter.on_error(blequeue::LinkError::execution("mixed", "status 8"));
                } else {
                    emitter.on_next(index);
                    emitter.on_complete();
                }
            }))
            .collect::<Vec<_>>()
    }))
    .await;

    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].is_ok(), index % 2 == 1);
    }
    assert!(!queue.is_busy());
}
