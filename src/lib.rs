//! Serialized operation queue and connection lifecycle for BLE-style links.
//!
//! - [`queue`]: one-at-a-time FIFO execution against a shared connection
//! - [`emitter`]: result channels, including the release-guarded emitter
//!   operations use to free the queue slot
//! - [`connection`]: connect/disconnect lifecycle composed around the queue
//! - [`permission`]: scan capability checks run before connecting
//! - [`simulation`]: an in-memory peripheral for tests and the CLI

pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod permission;
pub mod queue;
pub mod simulation;

pub use connection::{
    ConnectionComponentFactory, ConnectionGraph, ConnectionLifecycle, ConnectionSetup, Connector,
    DisconnectAction, DisconnectNotifier, LifecycleState,
};
pub use emitter::{Emitter, QueueRelease, QueueReleasingEmitter, emission_channel};
pub use error::{LinkError, LinkResult};
pub use permission::{AlwaysCapable, CapabilityCheck, PermissionChecker, PermissionSource};
pub use queue::{OperationQueue, OperationStream, QueueOperation, operation_fn};
