//! Scan capability checks performed before a connection attempt.

use std::collections::HashSet;

use log::debug;

use crate::error::LinkError;

const LOG_TARGET: &str = "blequeue::connection";

/// Answers whether the host currently allows scanning and connecting.
pub trait CapabilityCheck: Send + Sync {
    fn has_scan_capability(&self) -> bool;

    /// Error reported to the caller when the capability is missing.
    fn denied_error(&self) -> LinkError {
        LinkError::capability_denied(Vec::<String>::new())
    }
}

/// Host platform permission lookup.
pub trait PermissionSource: Send + Sync {
    fn is_granted(&self, permission: &str) -> bool;
}

/// Capability check backed by a list of acceptable permissions.
///
/// Holding any one of the configured permissions is enough. An empty list
/// means the platform needs no runtime permission for scanning.
pub struct PermissionChecker<S> {
    source: S,
    scan_permissions: Vec<String>,
}

impl<S: PermissionSource> PermissionChecker<S> {
    pub fn new(source: S, scan_permissions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            source,
            scan_permissions: scan_permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the list is empty or at least one entry is granted.
    pub fn is_any_granted(&self, permissions: &[String]) -> bool {
        permissions.is_empty()
            || permissions
                .iter()
                .any(|permission| self.source.is_granted(permission))
    }
}

impl<S: PermissionSource> CapabilityCheck for PermissionChecker<S> {
    fn has_scan_capability(&self) -> bool {
        let granted = self.is_any_granted(&self.scan_permissions);
        if !granted {
            debug!(
                target: LOG_TARGET,
                "None of the scan permissions granted: {:?}", self.scan_permissions
            );
        }
        granted
    }

    fn denied_error(&self) -> LinkError {
        LinkError::capability_denied(self.scan_permissions.iter().cloned())
    }
}

/// Capability check for hosts without a permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCapable;

impl CapabilityCheck for AlwaysCapable {
    fn has_scan_capability(&self) -> bool {
        true
    }
}

/// Fixed set of granted permissions, e.g. taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct GrantedPermissions {
    granted: HashSet<String>,
}

impl GrantedPermissions {
    pub fn new(granted: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            granted: granted.into_iter().map(Into::into).collect(),
        }
    }
}

impl PermissionSource for GrantedPermissions {
    fn is_granted(&self, permission: &str) -> bool {
        self.granted.contains(permission)
    }
}
