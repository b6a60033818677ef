//! Per-attempt component graph contract.

use super::{ConnectionSetup, DisconnectAction, DisconnectMonitor};
use crate::queue::QueueOperation;

/// Components built for a single connection attempt.
///
/// Nothing in a graph is shared with another attempt, even one targeting the
/// same peripheral.
pub struct ConnectionGraph<C, O> {
    /// Handle given to the caller once the connect operation succeeds
    pub connection: C,
    /// Operation submitted to the queue to establish the link
    pub connect_operation: O,
    /// Terminal disconnect signal from the hardware callback layer
    pub disconnects: DisconnectMonitor,
    /// Idempotent cleanup run when the lifecycle ends
    pub disconnect_action: DisconnectAction,
}

/// Builds a fresh [`ConnectionGraph`] for every connection attempt.
pub trait ConnectionComponentFactory: Send + Sync + 'static {
    /// Handle type delivered as the ready value
    type Connection: Send + 'static;
    /// Connect operation type
    type Connect: QueueOperation;

    fn build(&self, setup: &ConnectionSetup) -> ConnectionGraph<Self::Connection, Self::Connect>;
}
