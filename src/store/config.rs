//! Configuration for the durable store backend

use crate::store::{DurableError, DurableStore, InMemoryDurableStore, LocalFsDurableStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_DATA_PATH: &str = "/data";

/// Type of durable store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// In-memory store (lost on restart)
    Memory,
    /// Local filesystem
    LocalFs,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreType::Memory),
            "localfs" => Ok(StoreType::LocalFs),
            other => Err(format!("unknown store type: {} (expected memory or localfs)", other)),
        }
    }
}

/// Durable store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store_type: StoreType,
    /// Directory for the localfs backend
    pub data_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            store_type: StoreType::LocalFs,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
        }
    }
}

impl StoreConfig {
    /// Config for tests (in-memory)
    pub fn test() -> Self {
        StoreConfig {
            store_type: StoreType::Memory,
            data_path: PathBuf::new(),
        }
    }

    /// Config for local development
    pub fn local(path: PathBuf) -> Self {
        StoreConfig {
            store_type: StoreType::LocalFs,
            data_path: path,
        }
    }
}

/// Construct the configured backend
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn DurableStore>, DurableError> {
    match config.store_type {
        StoreType::Memory => {
            info!("Using in-memory durable store");
            Ok(Arc::new(InMemoryDurableStore::new()))
        }
        StoreType::LocalFs => {
            info!("Using local filesystem durable store at {:?}", config.data_path);
            Ok(Arc::new(LocalFsDurableStore::open(config.data_path.clone())?))
        }
    }
}
