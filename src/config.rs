pub mod settings;
pub mod user;

use std::path::Path;

use log::{info, warn};

pub use settings::{LinkSettings, PermissionSettings, SimulationSettings};
pub use user::{
    UserConfigError, UserConfigResult, load_user_config, read_config_table, user_config_path,
};

const LOG_TARGET: &str = "blequeue::config";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

/// Something worth telling the user about while loading settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }

    /// Forward this event to the `log` facade.
    pub fn log(&self) {
        match self.kind {
            SettingsEventKind::Info => info!(target: LOG_TARGET, "{}", self.message),
            SettingsEventKind::Warning => warn!(target: LOG_TARGET, "{}", self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct SettingsLoadOutcome {
    pub settings: LinkSettings,
    pub events: Vec<SettingsEvent>,
}

/// Load layered settings.
///
/// Layers, later overriding earlier key by key:
/// 1. Programmed defaults
/// 2. User config (see [`user_config_path`])
/// 3. The explicitly given file, if any
///
/// A layer that cannot be read or parsed is reported as a warning event and
/// skipped; loading itself never fails.
pub fn load_settings(explicit: Option<&Path>) -> SettingsLoadOutcome {
    let mut events = Vec::new();
    let mut merged = toml::Table::new();

    match load_user_config() {
        Ok(Some(table)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            merge_tables(&mut merged, table);
        }
        Ok(None) => {}
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load user config: {}",
                err
            )));
        }
    }

    if let Some(path) = explicit {
        match read_config_table(path) {
            Ok(table) => {
                events.push(SettingsEvent::info(format!(
                    "Loaded config file: {}",
                    path.display()
                )));
                merge_tables(&mut merged, table);
            }
            Err(err) => events.push(SettingsEvent::warning(err.to_string())),
        }
    }

    let settings = match toml::Value::Table(merged).try_into::<LinkSettings>() {
        Ok(settings) => settings,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Merged settings are invalid, using defaults: {}",
                err
            )));
            LinkSettings::default()
        }
    };

    SettingsLoadOutcome { settings, events }
}

/// Deep-merge `overlay` into `base`. Nested tables merge; other values replace.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(child) = value {
            if let Some(toml::Value::Table(base_child)) = base.get_mut(&key) {
                merge_tables(base_child, child);
                continue;
            }
            base.insert(key, toml::Value::Table(child));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn write_user_config(dir: &TempDir, contents: &str) {
        let config_dir = dir.path().join("blequeue");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("blequeue.toml"), contents).unwrap();
    }

    fn with_xdg_config_home<R>(dir: &TempDir, f: impl FnOnce() -> R) -> R {
        let original = env::var("XDG_CONFIG_HOME").ok();
        // SAFETY: callers are #[serial(xdg_env)], no concurrent environment access
        unsafe {
            env::set_var("XDG_CONFIG_HOME", dir.path());
        }
        let result = f();
        // SAFETY: Same as above - restoring original env state
        unsafe {
            match original {
                Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }
        result
    }

    #[test]
    fn merge_keeps_sibling_keys() {
        let mut base: toml::Table =
            toml::from_str("[connection]\nauto-connect = true\nconnect-timeout-ms = 5").unwrap();
        let overlay: toml::Table = toml::from_str("[connection]\nconnect-timeout-ms = 9").unwrap();

        merge_tables(&mut base, overlay);

        assert_eq!(base["connection"]["auto-connect"].as_bool(), Some(true));
        assert_eq!(base["connection"]["connect-timeout-ms"].as_integer(), Some(9));
    }

    #[test]
    #[serial(xdg_env)]
    fn explicit_file_overrides_user_config_key_by_key() {
        let user_dir = TempDir::new().unwrap();
        write_user_config(
            &user_dir,
            "[connection]\nauto-connect = true\nconnect-timeout-ms = 100\n",
        );
        let project_dir = TempDir::new().unwrap();
        let explicit = project_dir.path().join("link.toml");
        fs::write(&explicit, "[connection]\nconnect-timeout-ms = 250\n").unwrap();

        let outcome = with_xdg_config_home(&user_dir, || load_settings(Some(&explicit)));

        assert!(outcome.settings.connection.auto_connect);
        assert_eq!(outcome.settings.connection.connect_timeout_ms, Some(250));
        assert_eq!(outcome.events.len(), 2);
        assert!(
            outcome
                .events
                .iter()
                .all(|event| event.kind == SettingsEventKind::Info)
        );
    }

    #[test]
    #[serial(xdg_env)]
    fn broken_layer_is_reported_and_skipped() {
        let user_dir = TempDir::new().unwrap();
        write_user_config(&user_dir, "[connection]\nauto-connect = not-a-bool\n");
        let project_dir = TempDir::new().unwrap();
        let explicit = project_dir.path().join("link.toml");
        fs::write(&explicit, "[simulation]\nlatency-ms = 7\n").unwrap();

        let outcome = with_xdg_config_home(&user_dir, || load_settings(Some(&explicit)));

        assert!(!outcome.settings.connection.auto_connect);
        assert_eq!(outcome.settings.simulation.latency_ms, 7);
        assert_eq!(
            outcome
                .events
                .iter()
                .filter(|event| event.kind == SettingsEventKind::Warning)
                .count(),
            1
        );
    }

    #[test]
    #[serial(xdg_env)]
    fn no_files_yields_defaults_silently() {
        let user_dir = TempDir::new().unwrap();
        let outcome = with_xdg_config_home(&user_dir, || load_settings(None));

        assert_eq!(outcome.settings, LinkSettings::default());
        assert!(outcome.events.is_empty());
    }

    #[test]
    #[serial(xdg_env)]
    fn missing_explicit_file_is_a_warning() {
        let user_dir = TempDir::new().unwrap();
        let missing = user_dir.path().join("nope.toml");
        let outcome = with_xdg_config_home(&user_dir, || load_settings(Some(&missing)));

        assert_eq!(outcome.settings, LinkSettings::default());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, SettingsEventKind::Warning);
    }
}
