//! Options for a single connection attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options passed to the component factory for each connection attempt.
///
/// Deserializable from the `[connection]` table of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectionSetup {
    /// Let the platform connect whenever the peripheral becomes available
    /// instead of failing fast when it is out of range.
    pub auto_connect: bool,
    /// Skip characteristic property checks before read/write operations.
    pub suppress_operation_checks: bool,
    /// Upper bound for a direct (non auto-connect) attempt, in milliseconds,
    /// counted from when the connect operation starts running. Time spent
    /// queued behind other operations does not count. `None` waits
    /// indefinitely.
    pub connect_timeout_ms: Option<u64>,
}

impl ConnectionSetup {
    /// Default connect timeout: 30 seconds
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_suppress_operation_checks(mut self, suppress: bool) -> Self {
        self.suppress_operation_checks = suppress;
        self
    }

    /// Timeouts beyond `u64::MAX` milliseconds saturate.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Timeout that applies to this attempt.
    ///
    /// Auto-connect attempts wait for the peripheral indefinitely, so no
    /// timeout applies to them regardless of `connect_timeout_ms`.
    pub fn effective_connect_timeout(&self) -> Option<Duration> {
        if self.auto_connect {
            return None;
        }
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ConnectionSetup {
    fn default() -> Self {
        Self {
            auto_connect: false,
            suppress_operation_checks: false,
            connect_timeout_ms: Some(Self::DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}
