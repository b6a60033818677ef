//! In-memory peripheral for exercising the queue and connection lifecycle
//! without radio hardware.
//!
//! The simulated driver reports every result from its own OS thread, the way a
//! platform BLE stack delivers callbacks, so queue releases happen off the
//! tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! let queue = OperationQueue::new()?;
//! let peripheral = SimulatedPeripheral::new("AA:BB:CC:DD:EE:FF", Duration::from_millis(20));
//! let connector = Connector::new(
//!     queue.clone(),
//!     SimulatedFactory::new(peripheral.clone(), queue),
//!     AlwaysCapable,
//! );
//!
//! let mut lifecycle = connector.prepare_connection(ConnectionSetup::default());
//! let connection = lifecycle.next().await.unwrap()?;
//! let value = connection.read("battery").next().await;
//! peripheral.inject_disconnect(8);
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace};

use crate::connection::{
    ConnectionComponentFactory, ConnectionGraph, ConnectionSetup, DisconnectAction,
    DisconnectNotifier, disconnect_channel,
};
use crate::emitter::QueueReleasingEmitter;
use crate::error::{LinkError, LockResultExt};
use crate::queue::{OperationQueue, OperationStream, QueueOperation};

const LOG_TARGET: &str = "blequeue::simulation";

/// Status code reported for a simulated connect failure (GATT_ERROR).
pub const CONNECT_FAILURE_STATUS: i32 = 133;

/// Handle to a simulated peripheral. Cheap to clone.
#[derive(Clone)]
pub struct SimulatedPeripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    address: String,
    latency: Duration,
    fail_connect: AtomicBool,
    cleanups: AtomicUsize,
    executing: AtomicUsize,
    max_overlap: AtomicUsize,
    reads: AtomicU64,
    unreadable: Mutex<HashSet<&'static str>>,
    notifiers: Mutex<Vec<DisconnectNotifier>>,
}

impl SimulatedPeripheral {
    /// Create a peripheral whose driver takes `latency` per operation.
    pub fn new(address: impl Into<String>, latency: Duration) -> Self {
        Self {
            inner: Arc::new(PeripheralInner {
                address: address.into(),
                latency,
                fail_connect: AtomicBool::new(false),
                cleanups: AtomicUsize::new(0),
                executing: AtomicUsize::new(0),
                max_overlap: AtomicUsize::new(0),
                reads: AtomicU64::new(0),
                unreadable: Mutex::new(HashSet::new()),
                notifiers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Make subsequent connect operations fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Strip the read property from `characteristic`.
    ///
    /// Checked reads of it fail; reads from a connection set up with
    /// `suppress_operation_checks` still go through.
    pub fn mark_unreadable(&self, characteristic: &'static str) {
        self.inner
            .unreadable
            .lock()
            .recover_poison("SimulatedPeripheral::mark_unreadable")
            .insert(characteristic);
    }

    /// Report a disconnect to every connection attempt made since the last
    /// disconnect. The link drops for all of them at once.
    ///
    /// Returns `false` if no live attempt received the signal.
    pub fn inject_disconnect(&self, status: i32) -> bool {
        let notifiers = std::mem::take(
            &mut *self
                .inner
                .notifiers
                .lock()
                .recover_poison("SimulatedPeripheral::inject_disconnect"),
        );
        debug!(
            target: LOG_TARGET,
            "Injecting disconnect (status {}) into {} attempt(s)",
            status,
            notifiers.len()
        );
        notifiers.iter().fold(false, |delivered, notifier| {
            notifier.notify(LinkError::disconnected(self.address(), status)) || delivered
        })
    }

    /// Inject a disconnect from a driver thread after `delay`.
    pub fn inject_disconnect_after(&self, delay: Duration, status: i32) {
        let peripheral = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            peripheral.inject_disconnect(status);
        });
    }

    /// Number of times a connection attempt's cleanup ran.
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.load(Ordering::SeqCst)
    }

    /// Highest number of operations that were executing at the same time.
    pub fn max_overlap(&self) -> usize {
        self.inner.max_overlap.load(Ordering::SeqCst)
    }

    pub fn connect_operation(&self) -> SimulatedConnect {
        SimulatedConnect {
            peripheral: self.clone(),
        }
    }

    /// Read of `characteristic` that checks its properties first.
    pub fn read_operation(&self, characteristic: &'static str) -> SimulatedRead {
        SimulatedRead {
            peripheral: self.clone(),
            characteristic,
            check_properties: true,
        }
    }

    fn attach(&self, notifier: DisconnectNotifier) {
        self.inner
            .notifiers
            .lock()
            .recover_poison("SimulatedPeripheral::attach")
            .push(notifier);
    }

    fn is_readable(&self, characteristic: &str) -> bool {
        !self
            .inner
            .unreadable
            .lock()
            .recover_poison("SimulatedPeripheral::is_readable")
            .contains(characteristic)
    }

    fn begin(&self) {
        let executing = self.inner.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_overlap.fetch_max(executing, Ordering::SeqCst);
    }

    fn end(&self) {
        self.inner.executing.fetch_sub(1, Ordering::SeqCst);
    }

    /// Run `work` on a driver thread after the configured latency.
    ///
    /// The executing gauge drops before `work` runs, since `work` terminates
    /// the emitter and that may start the next operation.
    fn drive(&self, work: impl FnOnce(&SimulatedPeripheral) + Send + 'static) {
        let peripheral = self.clone();
        self.begin();
        std::thread::spawn(move || {
            std::thread::sleep(peripheral.inner.latency);
            peripheral.end();
            work(&peripheral);
        });
    }
}

/// Connect operation against a [`SimulatedPeripheral`].
pub struct SimulatedConnect {
    peripheral: SimulatedPeripheral,
}

impl QueueOperation for SimulatedConnect {
    type Output = ();

    fn name(&self) -> &'static str {
        "simulated-connect"
    }

    fn run(self, emitter: QueueReleasingEmitter<()>) -> impl Future<Output = ()> + Send + 'static {
        async move {
            self.peripheral.drive(move |peripheral| {
                if peripheral.inner.fail_connect.load(Ordering::SeqCst) {
                    emitter.on_error(LinkError::execution(
                        "connect",
                        format!("status {}", CONNECT_FAILURE_STATUS),
                    ));
                } else {
                    trace!(target: LOG_TARGET, "Connected to {}", peripheral.address());
                    emitter.on_next(());
                    emitter.on_complete();
                }
            });
        }
    }
}

/// Characteristic read against a [`SimulatedPeripheral`].
///
/// Yields `"<characteristic>#<n>"` as bytes, where `n` counts reads on the
/// peripheral.
pub struct SimulatedRead {
    peripheral: SimulatedPeripheral,
    characteristic: &'static str,
    check_properties: bool,
}

impl QueueOperation for SimulatedRead {
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "simulated-read"
    }

    fn run(self, emitter: QueueReleasingEmitter<Vec<u8>>) -> impl Future<Output = ()> + Send + 'static {
        async move {
            let characteristic = self.characteristic;
            if self.check_properties && !self.peripheral.is_readable(characteristic) {
                emitter.on_error(LinkError::execution(
                    "read",
                    format!("characteristic {} does not support read", characteristic),
                ));
                return;
            }
            self.peripheral.drive(move |peripheral| {
                if emitter.is_wrapped_emitter_unsubscribed() {
                    trace!(target: LOG_TARGET, "Read of {} cancelled", characteristic);
                    return;
                }
                let sequence = peripheral.inner.reads.fetch_add(1, Ordering::SeqCst);
                emitter.on_next(format!("{}#{}", characteristic, sequence).into_bytes());
                emitter.on_complete();
            });
        }
    }
}

/// Connection handle delivered by a simulated lifecycle.
#[derive(Clone)]
pub struct SimulatedConnection {
    peripheral: SimulatedPeripheral,
    queue: OperationQueue,
    setup: ConnectionSetup,
}

impl SimulatedConnection {
    /// Queue a read of `characteristic`, checking its properties unless this
    /// connection was set up with `suppress_operation_checks`.
    pub fn read(&self, characteristic: &'static str) -> OperationStream<Vec<u8>> {
        self.queue.submit(SimulatedRead {
            peripheral: self.peripheral.clone(),
            characteristic,
            check_properties: !self.setup().suppress_operation_checks,
        })
    }

    pub fn address(&self) -> &str {
        self.peripheral.address()
    }

    pub fn setup(&self) -> &ConnectionSetup {
        &self.setup
    }
}

/// Builds simulated component graphs for one peripheral.
pub struct SimulatedFactory {
    peripheral: SimulatedPeripheral,
    queue: OperationQueue,
}

impl SimulatedFactory {
    /// `queue` is the queue connections submit their reads to.
    pub fn new(peripheral: SimulatedPeripheral, queue: OperationQueue) -> Self {
        Self { peripheral, queue }
    }
}

impl ConnectionComponentFactory for SimulatedFactory {
    type Connection = SimulatedConnection;
    type Connect = SimulatedConnect;

    fn build(&self, setup: &ConnectionSetup) -> ConnectionGraph<SimulatedConnection, SimulatedConnect> {
        let (notifier, disconnects) = disconnect_channel();
        self.peripheral.attach(notifier);

        let peripheral = self.peripheral.clone();
        let disconnect_action = DisconnectAction::new(move || {
            debug!(target: LOG_TARGET, "Closing link to {}", peripheral.address());
            peripheral.inner.cleanups.fetch_add(1, Ordering::SeqCst);
        });

        ConnectionGraph {
            connection: SimulatedConnection {
                peripheral: self.peripheral.clone(),
                queue: self.queue.clone(),
                setup: setup.clone(),
            },
            connect_operation: self.peripheral.connect_operation(),
            disconnects,
            disconnect_action,
        }
    }
}
