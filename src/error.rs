//! Error handling types for blequeue
//!
//! This module provides the error taxonomy shared by the operation queue,
//! the emitters, and the connection lifecycle.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for link operations
#[derive(Debug, Error)]
pub enum LinkError {
    /// An operation failed while interacting with the hardware.
    ///
    /// Delivered only to the consumer of that operation; the queue keeps running.
    #[error("Operation '{operation}' failed: {message}")]
    Execution { operation: String, message: String },

    /// The hardware reported a loss of connection after a successful connect
    #[error("Disconnected from {address} (status {status})")]
    Disconnected { address: String, status: i32 },

    /// The host refused scan/connect capability before any queueing happened
    #[error("Scan capability denied (requires one of: {})", .required.join(", "))]
    CapabilityDenied { required: Vec<String> },

    /// The operation dropped its emitter without reporting a terminal event
    #[error("Operation abandoned before reporting a result")]
    Abandoned,

    /// Connection attempt did not succeed within the configured timeout
    #[error("Connection attempt timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The queue was created outside of a tokio runtime
    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Helper trait to recover guards from poisoned locks.
pub trait LockResultExt<T> {
    /// Recover the guard from a `PoisonError`, logging the recovery.
    ///
    /// The context parameter identifies which operation triggered lock recovery,
    /// helping developers debug thread safety issues.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "blequeue::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Helper functions for common error patterns
impl LinkError {
    /// Create an execution error for the named operation
    pub fn execution(operation: impl Into<String>, message: impl Into<String>) -> Self {
        LinkError::Execution {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a disconnect error
    pub fn disconnected(address: impl Into<String>, status: i32) -> Self {
        LinkError::Disconnected {
            address: address.into(),
            status,
        }
    }

    /// Create a capability denied error
    pub fn capability_denied(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        LinkError::CapabilityDenied {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout: Duration) -> Self {
        LinkError::Timeout { timeout }
    }

    /// Create a runtime unavailable error
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        LinkError::RuntimeUnavailable(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        LinkError::Config {
            message: message.into(),
        }
    }

    /// Whether this error reports a hardware-level disconnect
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Disconnected { .. })
    }
}
