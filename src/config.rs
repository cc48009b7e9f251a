//! Configuration for the listener daemon.
//!
//! Layered the usual way:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `ADAAPD_` and use double
//! underscores to separate nested levels:
//! - `ADAAPD_WATCH__ROOT=/srv/music` sets `watch.root`
//! - `ADAAPD_WATCH__BUFFER_EVENTS=4096` sets `watch.buffer_events`
//! - `ADAAPD_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::listener::DEFAULT_BUFFER_EVENTS;

/// Directory holding the workspace settings file.
pub const CONFIG_DIR: &str = ".adaapd";

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Listener settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Directory to watch recursively
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Entries starting with this prefix are ignored (empty disables)
    #[serde(default = "default_hidden_prefix")]
    pub hidden_prefix: String,

    /// Read buffer capacity, in queued events
    #[serde(default = "default_buffer_events")]
    pub buffer_events: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every module
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `adaapd::listener = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_hidden_prefix() -> String {
    ".".to_string()
}
fn default_buffer_events() -> usize {
    DEFAULT_BUFFER_EVENTS
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: None,
            hidden_prefix: default_hidden_prefix(),
            buffer_events: default_buffer_events(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels, single underscores
            // stay inside field names.
            .merge(Env::prefixed("ADAAPD_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.adaapd/settings.toml` searching from the current directory up
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join("settings.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write default settings to `.adaapd/settings.toml` in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn load(path: &str) -> figment::Result<Settings> {
        Settings::load_from(path).map_err(|e| *e)
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.watch.root, None);
        assert_eq!(settings.watch.hidden_prefix, ".");
        assert_eq!(settings.watch.buffer_events, 1024);
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.logging.modules.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.toml",
                r#"
[watch]
root = "/srv/music"
hidden_prefix = "_"
buffer_events = 64

[logging]
default = "info"

[logging.modules]
"adaapd::listener" = "trace"
"#,
            )?;

            let settings = load("settings.toml")?;
            assert_eq!(settings.watch.root, Some(PathBuf::from("/srv/music")));
            assert_eq!(settings.watch.hidden_prefix, "_");
            assert_eq!(settings.watch.buffer_events, 64);
            assert_eq!(settings.logging.default, "info");
            assert_eq!(settings.logging.modules["adaapd::listener"], "trace");
            Ok(())
        });
    }

    #[test]
    fn test_partial_config() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.toml", "[watch]\nroot = \"music\"\n")?;

            let settings = load("settings.toml")?;
            assert_eq!(settings.watch.root, Some(PathBuf::from("music")));
            // Defaults fill the rest
            assert_eq!(settings.watch.hidden_prefix, ".");
            assert_eq!(settings.watch.buffer_events, 1024);
            assert_eq!(settings.logging.default, "warn");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let settings = load("absent.toml")?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_save_settings() {
        Jail::expect_with(|jail| {
            let config_path = jail.directory().join(CONFIG_DIR).join("settings.toml");

            let mut settings = Settings::default();
            settings.watch.root = Some(PathBuf::from("/media/library"));
            settings.watch.buffer_events = 2048;
            settings
                .logging
                .modules
                .insert("adaapd".to_string(), "debug".to_string());

            settings.save(&config_path).unwrap();

            let loaded = Settings::load_from(&config_path).map_err(|e| *e)?;
            assert_eq!(loaded, settings);
            Ok(())
        });
    }

    #[test]
    fn test_init_config_file() {
        Jail::expect_with(|jail| {
            let path = Settings::init_config_file(false).unwrap();
            assert!(jail.directory().join(&path).is_file());

            // Refuses to clobber unless forced
            assert!(Settings::init_config_file(false).is_err());
            jail.create_file(".adaapd/settings.toml", "[watch]\nbuffer_events = 8\n")?;
            Settings::init_config_file(true).unwrap();

            assert_eq!(load(".adaapd/settings.toml")?, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_layered_config() {
        Jail::expect_with(|jail| {
            std::fs::create_dir_all(jail.directory().join(CONFIG_DIR)).unwrap();
            jail.create_file(
                ".adaapd/settings.toml",
                "[watch]\nroot = \"/from/file\"\nbuffer_events = 32\n",
            )?;

            // Discovery walks up from a nested directory
            let nested = jail.directory().join("a/b");
            std::fs::create_dir_all(&nested).unwrap();
            std::env::set_current_dir(&nested).unwrap();

            jail.set_env("ADAAPD_WATCH__BUFFER_EVENTS", "4096");
            jail.set_env("ADAAPD_LOGGING__DEFAULT", "debug");

            let settings = Settings::load().map_err(|e| *e)?;
            // Config file value is used when no env var
            assert_eq!(settings.watch.root, Some(PathBuf::from("/from/file")));
            // Environment overrides the file
            assert_eq!(settings.watch.buffer_events, 4096);
            assert_eq!(settings.logging.default, "debug");
            Ok(())
        });
    }
}
