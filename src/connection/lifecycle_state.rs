//! Connection lifecycle state machine.

/// State of one connection attempt.
///
/// Transitions:
/// - Connecting -> Connected (connect operation succeeded)
/// - Connecting -> Terminated (connect failed, disconnect, timeout, or cancel)
/// - Connected -> Terminated (disconnect or cancel)
/// - Terminated is final; every event in it is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Connect operation queued or running
    Connecting,
    /// Ready value delivered, waiting for disconnect or cancellation
    Connected,
    /// Cleanup has run (terminal state)
    Terminated,
}

/// Event observed by a connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Connect operation emitted a value or completed
    ConnectSucceeded,
    /// Connect operation reported an error
    ConnectFailed,
    /// Hardware reported a disconnect
    Disconnected,
    /// Consumer dropped the lifecycle stream
    Cancelled,
    /// Connect timeout elapsed
    TimedOut,
}

/// Decide the next state for `event`, or `None` if the transition is invalid.
///
/// Pure so the rules can be tested without any connection machinery.
pub fn transition(state: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent::*;
    use LifecycleState::*;

    match (state, event) {
        (Connecting, ConnectSucceeded) => Some(Connected),
        (Connecting, ConnectFailed | Disconnected | Cancelled | TimedOut) => Some(Terminated),
        (Connected, Disconnected | Cancelled) => Some(Terminated),
        (Connected, ConnectSucceeded | ConnectFailed | TimedOut) => None,
        (Terminated, _) => None,
    }
}
