//! Durable Storage
//!
//! The only state that outlives a request. Collections are stored whole, one
//! JSON array per `(kind, namespace)` key.
//!
//! ## Backends
//!
//! - **memory**: process-local, versioned per key (tests, development)
//! - **localfs**: one file per key, versioned by content checksum
//! - **simulated**: fault-injecting wrapper for deterministic simulation

pub mod durable;
pub mod config;
pub mod simulated;

pub use durable::{
    DurableError, DurableStore, InMemoryDurableStore, LocalFsDurableStore, StoreFuture, Version,
    Versioned,
};
pub use config::{build_store, StoreConfig, StoreType};
pub use simulated::{SimulatedDurableStore, SimulatedStoreConfig, SimulatedStoreStats};
