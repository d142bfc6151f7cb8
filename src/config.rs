//! Service configuration
//!
//! Defaults, optionally overlaid by a TOML file named in `NSDOC_CONFIG`,
//! then by individual environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | NSDOC_CONFIG | - | Path to a TOML config file |
//! | NSDOC_PORT | 8787 | HTTP listen port |
//! | NSDOC_STORE_TYPE | localfs | memory or localfs |
//! | NSDOC_DATA_PATH | /data | LocalFs directory |
//! | NSDOC_WRITE_MODE | lww | lww or cas |
//! | NSDOC_MERGE | falsy | falsy or missing |
//! | NSDOC_CORRUPT_POLICY | fail | fail or empty |
//! | NSDOC_FALLBACK_URL | https://global.trabur.workers.dev | Unmatched websites route answer |
//! | NSDOC_LOG_JSON | false | JSON log lines |
//! | API_KEYS_SECRET | between workers | Reserved for API key signing |

use crate::handler::MergeStrategy;
use crate::store::{StoreConfig, StoreType};
use crate::sync::{CorruptPayloadPolicy, SyncOptions, WriteMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

const DEFAULT_PORT: u16 = 8787;
const DEFAULT_FALLBACK_URL: &str = "https://global.trabur.workers.dev";
const DEFAULT_API_KEYS_SECRET: &str = "between workers";

/// Environment variable naming the TOML config file
pub const CONFIG_PATH_VAR: &str = "NSDOC_CONFIG";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Toml(toml::de::Error),
    Invalid { var: &'static str, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "cannot read {:?}: {}", path, source),
            ConfigError::Toml(e) => write!(f, "invalid config file: {}", e),
            ConfigError::Invalid { var, message } => write!(f, "invalid {}: {}", var, message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

/// A value that never shows up in logs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    pub store: StoreConfig,
    pub sync: SyncOptions,
    pub merge: MergeStrategy,
    pub fallback_url: String,
    pub log_json: bool,
    pub api_keys_secret: Secret,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            port: DEFAULT_PORT,
            store: StoreConfig::default(),
            sync: SyncOptions::default(),
            merge: MergeStrategy::default(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            log_json: false,
            api_keys_secret: Secret::new(DEFAULT_API_KEYS_SECRET),
        }
    }
}

impl ServiceConfig {
    /// Config for tests (in-memory store, ephemeral port)
    pub fn test() -> Self {
        ServiceConfig {
            port: 0,
            store: StoreConfig::test(),
            ..ServiceConfig::default()
        }
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => ServiceConfig::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config file {:?}", path);
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay individual variables; `lookup` returns a variable's value if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var::<u16, _>(&lookup, "NSDOC_PORT")? {
            self.port = port;
        }
        if let Some(store_type) = parse_var::<StoreType, _>(&lookup, "NSDOC_STORE_TYPE")? {
            self.store.store_type = store_type;
        }
        if let Some(path) = lookup("NSDOC_DATA_PATH") {
            self.store.data_path = PathBuf::from(path);
        }
        if let Some(mode) = parse_var::<WriteMode, _>(&lookup, "NSDOC_WRITE_MODE")? {
            self.sync.write_mode = mode;
        }
        if let Some(policy) = parse_var::<CorruptPayloadPolicy, _>(&lookup, "NSDOC_CORRUPT_POLICY")? {
            self.sync.corrupt_payload = policy;
        }
        if let Some(merge) = parse_var::<MergeStrategy, _>(&lookup, "NSDOC_MERGE")? {
            self.merge = merge;
        }
        if let Some(url) = lookup("NSDOC_FALLBACK_URL") {
            self.fallback_url = url;
        }
        if let Some(json) = lookup("NSDOC_LOG_JSON") {
            self.log_json = matches!(json.to_lowercase().as_str(), "true" | "1");
        }
        if let Some(secret) = lookup("API_KEYS_SECRET") {
            self.api_keys_secret = Secret::new(secret);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                message: e.to_string(),
            }),
    }
}
