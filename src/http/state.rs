use crate::config::ServiceConfig;
use crate::handler::{MergeStrategy, ResourceSchema, Session};
use crate::store::DurableStore;
use crate::sync::SyncOptions;
use std::sync::Arc;

pub type SharedState = Arc<ServiceState>;

/// Process-wide state. Only the durable store is shared between requests;
/// everything else is read-only settings.
pub struct ServiceState {
    pub store: Arc<dyn DurableStore>,
    pub sync: SyncOptions,
    pub merge: MergeStrategy,
    pub fallback_url: String,
}

impl ServiceState {
    pub fn new(store: Arc<dyn DurableStore>, config: &ServiceConfig) -> SharedState {
        Arc::new(ServiceState {
            store,
            sync: config.sync,
            merge: config.merge,
            fallback_url: config.fallback_url.clone(),
        })
    }

    /// Fresh per-request session for one resource in one namespace
    pub fn session(&self, schema: &'static ResourceSchema, namespace: String) -> Session<'_> {
        Session::new(self.store.as_ref(), self.sync, self.merge, schema, namespace)
    }
}
