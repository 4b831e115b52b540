//! Configuration for sprint view models.
//!
//! A TOML file (`$SPRINT_CONFIG_PATH`, or `config.toml` in the platform
//! config directory), overridden by
//! `SPRINT_`-prefixed environment variables (`__` separates sections, so
//! `SPRINT_VIEW_MODEL__THROTTLE_INTERVAL_MS=250`), validated and turned
//! into a `sprint_core::ViewModelConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sprint_core::ViewModelConfig;
use sprint_core::config::{DEFAULT_ERROR_CAPACITY, DEFAULT_THROTTLE_INTERVAL};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("no home directory to resolve the config path; set SPRINT_CONFIG_PATH")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Defaults for every view model.
    #[serde(default)]
    pub view_model: ViewModelSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ViewModelSection {
    /// Throttle window while inactive, in milliseconds.
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,

    /// Errors buffered per observer before a slow one starts skipping.
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,
}

impl Default for ViewModelSection {
    fn default() -> Self {
        Self {
            throttle_interval_ms: default_throttle_interval_ms(),
            error_capacity: default_error_capacity(),
        }
    }
}

fn default_throttle_interval_ms() -> u64 {
    u64::try_from(DEFAULT_THROTTLE_INTERVAL.as_millis()).unwrap_or(u64::MAX)
}
fn default_error_capacity() -> usize {
    DEFAULT_ERROR_CAPACITY
}

impl Config {
    /// Validate and convert to the runtime configuration.
    pub fn to_view_model_config(&self) -> Result<ViewModelConfig, ConfigError> {
        let section = &self.view_model;
        if section.throttle_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "view_model.throttle_interval_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if section.error_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "view_model.error_capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(ViewModelConfig {
            throttle_interval: Duration::from_millis(section.throttle_interval_ms),
            error_capacity: section.error_capacity,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SPRINT_CONFIG_PATH";

/// The config file to load: `$SPRINT_CONFIG_PATH` when set, otherwise
/// `config.toml` in the platform config directory.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    ProjectDirs::from("dev", "sprint", "sprint")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path()?)
}

/// Load Config from `path` + environment. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SPRINT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// The runtime config from the canonical file + environment. A file that
/// fails to load or validate yields the built-in defaults.
pub fn view_model_config_or_default() -> ViewModelConfig {
    load_config()
        .and_then(|config| config.to_view_model_config())
        .unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path()?, cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_core() {
        let config = Config::default().to_view_model_config().unwrap();
        assert_eq!(config, ViewModelConfig::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let config = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(config.view_model, ViewModelSection::default());
            Ok(())
        });
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[view_model]\nthrottle_interval_ms = 250\n")?;

            let config = load_config_from(Path::new("config.toml"))
                .unwrap()
                .to_view_model_config()
                .unwrap();
            assert_eq!(config.throttle_interval, Duration::from_millis(250));
            assert_eq!(config.error_capacity, DEFAULT_ERROR_CAPACITY);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sprint.toml",
                "[view_model]\nthrottle_interval_ms = 250\nerror_capacity = 16\n",
            )?;
            jail.set_env("SPRINT_VIEW_MODEL__ERROR_CAPACITY", "8");

            let config = load_config_from(Path::new("sprint.toml")).unwrap();
            assert_eq!(config.view_model.throttle_interval_ms, 250);
            assert_eq!(config.view_model.error_capacity, 8);
            Ok(())
        });
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut config = Config::default();
        config.view_model.throttle_interval_ms = 0;
        let err = config.to_view_model_config().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid view_model.throttle_interval_ms: must be greater than zero"
        );

        let mut config = Config::default();
        config.view_model.error_capacity = 0;
        assert!(matches!(
            config.to_view_model_config(),
            Err(ConfigError::Validation { field, .. }) if field == "view_model.error_capacity"
        ));
    }

    #[test]
    fn malformed_file_is_a_figment_error() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[view_model]\nthrottle_interval_ms = \"soon\"\n")?;
            assert!(matches!(
                load_config_from(Path::new("config.toml")),
                Err(ConfigError::Figment(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn explicit_path_overrides_platform_dir() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[view_model]\nerror_capacity = 4\n")?;
            jail.set_env(CONFIG_PATH_ENV, "custom.toml");

            assert_eq!(config_path().unwrap(), PathBuf::from("custom.toml"));
            assert_eq!(load_config().unwrap().view_model.error_capacity, 4);
            Ok(())
        });
    }

    #[test]
    fn invalid_file_falls_back_to_default_runtime_config() {
        Jail::expect_with(|jail| {
            jail.create_file("zero.toml", "[view_model]\nthrottle_interval_ms = 0\n")?;
            jail.set_env(CONFIG_PATH_ENV, "zero.toml");
            assert_eq!(view_model_config_or_default(), ViewModelConfig::default());

            jail.create_file("zero.toml", "[view_model]\nthrottle_interval_ms = 40\n")?;
            assert_eq!(
                view_model_config_or_default().throttle_interval,
                Duration::from_millis(40)
            );
            Ok(())
        });
    }

    #[test]
    fn saved_config_loads_back() {
        Jail::expect_with(|_| {
            let path = Path::new("nested").join("config.toml");
            let mut config = Config::default();
            config.view_model.error_capacity = 32;

            save_config_to(&path, &config).unwrap();
            assert_eq!(load_config_from(&path).unwrap(), config);
            Ok(())
        });
    }
}
