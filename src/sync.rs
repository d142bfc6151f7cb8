//! Sync Engine
//!
//! Moves a collection between the durable store and its per-request
//! in-memory copy.
//!
//! ```text
//! durable blob ──reconcile──► Collection ──(mutate)──► Collection ──persist──► durable blob
//! ```
//!
//! - `reconcile` loads the blob and merges it into the collection keyed by
//!   `id` (remove-then-insert), so running it twice gives the same state.
//! - `persist` snapshots the whole collection and overwrites the blob.
//!
//! Two writers racing on one key lose an update under
//! [`WriteMode::LastWriterWins`]. [`WriteMode::CompareAndSwap`] turns the
//! second persist into [`SyncError::Conflict`] instead. Neither mode retries.

use crate::collection::Collection;
use crate::keys::CollectionKey;
use crate::record::Record;
use crate::store::{DurableError, DurableStore};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// How `persist` guards against concurrent writers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    /// Full overwrite, no precondition
    #[default]
    #[serde(rename = "lww")]
    LastWriterWins,
    /// Write only if the blob is unchanged since reconcile
    #[serde(rename = "cas")]
    CompareAndSwap,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lww" | "last-writer-wins" => Ok(WriteMode::LastWriterWins),
            "cas" | "compare-and-swap" => Ok(WriteMode::CompareAndSwap),
            other => Err(format!("unknown write mode: {} (expected lww or cas)", other)),
        }
    }
}

/// What reconcile does with a blob that is not a valid record array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPayloadPolicy {
    /// Fail the request
    #[default]
    Fail,
    /// Log and treat the key as holding no data
    #[serde(rename = "empty")]
    TreatAsEmpty,
}

impl FromStr for CorruptPayloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(CorruptPayloadPolicy::Fail),
            "empty" => Ok(CorruptPayloadPolicy::TreatAsEmpty),
            other => Err(format!("unknown corrupt payload policy: {} (expected fail or empty)", other)),
        }
    }
}

/// Knobs for reconcile/persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub write_mode: WriteMode,
    pub corrupt_payload: CorruptPayloadPolicy,
}

/// Error type for sync operations
#[derive(Debug)]
pub enum SyncError {
    /// Durable store failure
    Store(DurableError),
    /// Stored blob is not a JSON array of records
    Deserialization {
        key: String,
        source: serde_json::Error,
    },
    /// Collection could not be encoded
    Serialization(serde_json::Error),
    /// Blob changed between reconcile and persist
    Conflict { key: String },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Store(e) => write!(f, "Durable store error: {}", e),
            SyncError::Deserialization { key, source } => {
                write!(f, "Corrupt payload under {}: {}", key, source)
            }
            SyncError::Serialization(e) => write!(f, "Failed to encode collection: {}", e),
            SyncError::Conflict { key } => {
                write!(f, "Concurrent modification of {}, reload and retry", key)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            SyncError::Deserialization { source, .. } => Some(source),
            SyncError::Serialization(e) => Some(e),
            SyncError::Conflict { .. } => None,
        }
    }
}

impl From<DurableError> for SyncError {
    fn from(e: DurableError) -> Self {
        SyncError::Store(e)
    }
}

/// Reconcile/persist bound to one durable store
#[derive(Clone, Copy)]
pub struct SyncEngine<'a> {
    store: &'a dyn DurableStore,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn DurableStore, options: SyncOptions) -> Self {
        SyncEngine { store, options }
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// Load the blob for `key` into `collection`.
    ///
    /// Returns the decoded records, or `None` when the key holds no data.
    /// The return value is for diagnostics; the collection is the result.
    pub async fn reconcile(
        &self,
        key: &CollectionKey,
        collection: &mut Collection,
    ) -> Result<Option<Vec<Record>>, SyncError> {
        debug_assert_eq!(
            key.kind(),
            collection.kind(),
            "reconcile target must match the key's collection kind"
        );
        let storage_key = key.storage_key();

        let raw = match self.options.write_mode {
            WriteMode::LastWriterWins => self.store.get(&storage_key).await?,
            WriteMode::CompareAndSwap => {
                let found = self.store.get_versioned(&storage_key).await?;
                collection.set_observed_version(found.as_ref().map(|v| v.version));
                found.map(|v| v.data)
            }
        };

        let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
            debug!("reconcile {}: no data", storage_key);
            return Ok(None);
        };

        let records: Vec<Record> = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(source) => match self.options.corrupt_payload {
                CorruptPayloadPolicy::Fail => {
                    return Err(SyncError::Deserialization {
                        key: storage_key,
                        source,
                    })
                }
                CorruptPayloadPolicy::TreatAsEmpty => {
                    warn!(
                        "reconcile {}: ignoring corrupt payload ({} bytes): {}",
                        storage_key,
                        raw.len(),
                        source
                    );
                    return Ok(None);
                }
            },
        };

        for record in &records {
            let mut record = record.clone();
            record.strip_internal();
            collection.remove(record.id());
            if let Err(e) = collection.insert(record) {
                warn!("reconcile {}: {}", storage_key, e);
            }
        }

        debug!(
            "reconcile {}: {} records, collection now holds {}",
            storage_key,
            records.len(),
            collection.len()
        );
        Ok(Some(records))
    }

    /// Overwrite the blob for `key` with the full contents of `collection`
    pub async fn persist(
        &self,
        key: &CollectionKey,
        collection: &mut Collection,
    ) -> Result<Vec<Record>, SyncError> {
        debug_assert_eq!(
            key.kind(),
            collection.kind(),
            "persist source must match the key's collection kind"
        );
        let storage_key = key.storage_key();
        let records = collection.snapshot();
        let data = serde_json::to_vec(&records).map_err(SyncError::Serialization)?;

        match self.options.write_mode {
            WriteMode::LastWriterWins => self.store.put(&storage_key, &data).await?,
            WriteMode::CompareAndSwap => {
                let expected = collection.observed_version();
                match self.store.put_if_version(&storage_key, expected, &data).await {
                    Ok(version) => collection.set_observed_version(Some(version)),
                    Err(DurableError::VersionMismatch {
                        expected, actual, ..
                    }) => {
                        warn!(
                            "persist {}: version moved from {:?} to {:?}",
                            storage_key, expected, actual
                        );
                        return Err(SyncError::Conflict { key: storage_key });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        debug!("persist {}: {} records, {} bytes", storage_key, records.len(), data.len());
        Ok(records)
    }
}
