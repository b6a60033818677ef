//! Settings types deserialized from `blequeue.toml`.

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSetup;
use crate::error::{LinkError, LinkResult};

/// Effective settings after layering.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
///
/// ```toml
/// [connection]
/// auto-connect = false
/// connect-timeout-ms = 10000
///
/// [permissions]
/// scan = ["BLUETOOTH_SCAN", "ACCESS_FINE_LOCATION"]
/// granted = ["BLUETOOTH_SCAN"]
///
/// [simulation]
/// address = "AA:BB:CC:DD:EE:FF"
/// latency-ms = 20
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LinkSettings {
    pub connection: ConnectionSetup,
    pub permissions: PermissionSettings,
    pub simulation: SimulationSettings,
}

impl LinkSettings {
    /// Render as a TOML document that loads back to the same settings.
    pub fn to_toml(&self) -> LinkResult<String> {
        toml::to_string_pretty(self).map_err(|e| LinkError::config(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PermissionSettings {
    /// Permissions any one of which allows scanning. Empty means none needed.
    pub scan: Vec<String>,
    /// Permissions the simulated host reports as granted.
    pub granted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulationSettings {
    pub address: String,
    pub latency_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            address: "00:11:22:33:44:55".to_string(),
            latency_ms: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings: LinkSettings = toml::from_str("").unwrap();
        assert_eq!(settings, LinkSettings::default());
    }

    #[test]
    fn kebab_case_keys_are_read() {
        let settings: LinkSettings = toml::from_str(
            r#"
            [connection]
            auto-connect = true
            connect-timeout-ms = 1500

            [permissions]
            scan = ["BLUETOOTH_SCAN"]

            [simulation]
            latency-ms = 3
            "#,
        )
        .unwrap();

        assert!(settings.connection.auto_connect);
        assert_eq!(settings.connection.connect_timeout_ms, Some(1500));
        assert_eq!(settings.permissions.scan, vec!["BLUETOOTH_SCAN"]);
        assert!(settings.permissions.granted.is_empty());
        assert_eq!(settings.simulation.latency_ms, 3);
        assert_eq!(settings.simulation.address, "00:11:22:33:44:55");
    }

    #[test]
    fn rendered_settings_load_back() {
        let mut settings = LinkSettings::default();
        settings.connection.auto_connect = true;
        settings.permissions.scan = vec!["BLUETOOTH_SCAN".to_string()];

        let rendered = settings.to_toml().unwrap();
        let reloaded: LinkSettings = toml::from_str(&rendered).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = toml::from_str::<LinkSettings>("[connection]\nauto-connect = \"yes\"");
        assert!(result.is_err());
    }
}
