//! Request Session
//!
//! All in-memory state for one request. A session is built when the request
//! arrives, owns fresh collections, and is consumed by the operation it
//! serves. Nothing survives it except what `persist` wrote.
//!
//! ## Phases
//!
//! ```text
//! Unloaded → Reconciled → Mutated → Persisted → Responded
//!                 └──────────(reads)───────────────┘
//! ```

use crate::collection::Collection;
use crate::handler::error::HandlerError;
use crate::handler::schema::{MergeStrategy, ResourceSchema};
use crate::keys::{CollectionKey, CollectionKind};
use crate::record::Record;
use crate::store::DurableStore;
use crate::sync::{SyncEngine, SyncOptions};
use serde_json::Value;
use tracing::debug;

/// Where a session is in its request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unloaded,
    Reconciled,
    Mutated,
    Persisted,
    Responded,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Unloaded, Phase::Reconciled)
                | (Phase::Reconciled, Phase::Mutated)
                | (Phase::Reconciled, Phase::Responded)
                | (Phase::Mutated, Phase::Persisted)
                | (Phase::Persisted, Phase::Responded)
        )
    }
}

/// Per-request working set for one resource in one namespace
pub struct Session<'a> {
    pub(crate) engine: SyncEngine<'a>,
    pub(crate) schema: &'static ResourceSchema,
    pub(crate) merge: MergeStrategy,
    pub(crate) key: CollectionKey,
    pub(crate) primary: Collection,
    pub(crate) dependents: Vec<(CollectionKey, Collection)>,
    phase: Phase,
}

impl<'a> Session<'a> {
    pub fn new(
        store: &'a dyn DurableStore,
        options: SyncOptions,
        merge: MergeStrategy,
        schema: &'static ResourceSchema,
        namespace: impl Into<String>,
    ) -> Self {
        let key = CollectionKey::new(schema.kind, namespace);
        let dependents = schema
            .dependencies()
            .map(|kind| (key.sibling(kind), Collection::new(kind)))
            .collect();

        Session {
            engine: SyncEngine::new(store, options),
            schema,
            merge,
            primary: Collection::new(schema.kind),
            key,
            dependents,
            phase: Phase::Unloaded,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    pub fn collection(&self) -> &Collection {
        &self.primary
    }

    pub fn dependent(&self, kind: CollectionKind) -> Option<&Collection> {
        self.dependents
            .iter()
            .find(|(key, _)| key.kind() == kind)
            .map(|(_, collection)| collection)
    }

    pub(crate) fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "Invariant violated: session for {} cannot go from {:?} to {:?}",
            self.key,
            self.phase,
            next
        );
        self.phase = next;
    }

    /// Reconcile the primary collection and, for writes, the collections its
    /// foreign keys point into
    pub(crate) async fn load(&mut self, with_dependents: bool) -> Result<(), HandlerError> {
        let loaded = self.engine.reconcile(&self.key, &mut self.primary).await?;
        debug!(
            "{}: loaded {} records",
            self.key,
            loaded.as_ref().map(Vec::len).unwrap_or(0)
        );

        if with_dependents {
            for (key, collection) in self.dependents.iter_mut() {
                self.engine.reconcile(key, collection).await?;
            }
        }

        self.advance(Phase::Reconciled);
        Ok(())
    }

    /// Persist the primary collection. Dependent collections are read-only.
    pub(crate) async fn save(&mut self) -> Result<Vec<Record>, HandlerError> {
        let saved = self.engine.persist(&self.key, &mut self.primary).await?;
        self.advance(Phase::Persisted);
        Ok(saved)
    }

    pub(crate) fn respond<T>(&mut self, value: T) -> T {
        self.advance(Phase::Responded);
        value
    }

    /// Pre-write validation: every foreign key must name an existing record.
    ///
    /// The check is not transactional; a referenced record can disappear
    /// between this check and the write.
    pub(crate) fn check_foreign_keys(&self, record: &Record) -> Result<(), HandlerError> {
        for fk in self.schema.foreign_keys {
            let target = self.dependent(fk.target);
            let exists = match (record.get(fk.field), target) {
                (Some(Value::String(id)), Some(collection)) => collection.contains(id),
                _ => false,
            };
            if !exists {
                return Err(HandlerError::ForeignKeyViolation {
                    field: fk.field,
                    value: record
                        .get(fk.field)
                        .map(Value::to_string)
                        .unwrap_or_default(),
                    message: fk.message,
                });
            }
        }
        Ok(())
    }
}
