pub mod keys;
pub mod record;
pub mod collection;
pub mod store;
pub mod sync;
pub mod handler;
pub mod http;
pub mod config;
pub mod observability;
pub mod dst;

pub use keys::{CollectionKey, CollectionKind};
pub use record::Record;
pub use collection::Collection;
pub use store::{DurableError, DurableStore, InMemoryDurableStore, LocalFsDurableStore};
pub use sync::{SyncEngine, SyncError, SyncOptions, WriteMode, CorruptPayloadPolicy};
pub use handler::{HandlerError, MergeStrategy, Session};
pub use config::ServiceConfig;
