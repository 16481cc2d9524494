//! Application-level configuration loading: the manager PIN and the store selection.

use std::{env, fmt, fs, io::ErrorKind, path::PathBuf, str::FromStr};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SNACK_ROSTER_CONFIG_PATH";
/// Environment variable overriding the configured manager PIN.
const MANAGER_PIN_ENV: &str = "MANAGER_PIN";
/// Environment variable overriding the configured store kind.
const STORE_KIND_ENV: &str = "STORE_KIND";
/// PIN used when neither the file nor the environment provide one.
const DEFAULT_MANAGER_PIN: &str = "1234";

/// Which [`ClaimStore`](crate::dao::claim_store::ClaimStore) the server runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Games kept in process memory; lost on restart.
    #[default]
    Local,
    /// Synchronized store over the in-process emulated backend.
    Memory,
    /// Synchronized store over MongoDB.
    Mongo,
    /// Synchronized store over CouchDB.
    Couch,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            other => Err(format!("unknown store kind `{other}`")),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Memory => "memory",
            Self::Mongo => "mongo",
            Self::Couch => "couch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    manager_pin: String,
    store: StoreKind,
}

impl AppConfig {
    /// Build a configuration from explicit values.
    pub fn new(manager_pin: impl Into<String>, store: StoreKind) -> Self {
        Self {
            manager_pin: manager_pin.into(),
            store,
        }
    }

    /// Load the configuration from disk, then apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded config file");
                    raw
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    RawConfig::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                RawConfig::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                RawConfig::default()
            }
        };

        let config = raw.resolve(
            env::var(MANAGER_PIN_ENV).ok(),
            env::var(STORE_KIND_ENV).ok(),
        );
        info!(store = %config.store, "configuration ready");
        config
    }

    /// PIN unlocking the manager operations.
    pub fn manager_pin(&self) -> &str {
        &self.manager_pin
    }

    /// Store implementation to run on.
    pub fn store(&self) -> StoreKind {
        self.store
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGER_PIN, StoreKind::default())
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    manager_pin: Option<String>,
    #[serde(default)]
    store: Option<StoreKind>,
}

impl RawConfig {
    /// Merge file values with environment overrides; the environment wins.
    fn resolve(self, pin_override: Option<String>, store_override: Option<String>) -> AppConfig {
        let manager_pin = pin_override
            .filter(|pin| !pin.is_empty())
            .or(self.manager_pin.filter(|pin| !pin.is_empty()))
            .unwrap_or_else(|| DEFAULT_MANAGER_PIN.to_owned());

        let mut store = self.store.unwrap_or_default();
        if let Some(value) = store_override.filter(|value| !value.trim().is_empty()) {
            match value.parse() {
                Ok(kind) => store = kind,
                Err(err) => warn!(error = %err, "ignoring {STORE_KIND_ENV} override"),
            }
        }

        AppConfig { manager_pin, store }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
