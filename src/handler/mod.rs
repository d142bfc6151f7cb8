//! Collection Handlers
//!
//! Generic CRUD over one resource in one namespace. A handler call builds a
//! [`Session`], reconciles the collections it needs from the durable store,
//! applies one operation and persists the primary collection when the
//! operation wrote.
//!
//! ## Resources
//!
//! | Resource | Updatable fields | Foreign keys |
//! |----------|------------------|--------------|
//! | levels   | token, number, activeUsersPerHour, requestsPerDay, requestsPerMonth, name, description, stripeProductRef, stripePriceRef | - |
//! | websites | platformId, frontendDomainName | platformId → platforms |

pub mod error;
pub mod ops;
pub mod schema;
pub mod session;

pub use error::HandlerError;
pub use schema::{
    schema_for, ForeignKey, MergeStrategy, ResourceSchema, UnmatchedRoute, LEVELS,
    MISSING_RECORD_MESSAGE, RESOURCES, WEBSITES,
};
pub use session::{Phase, Session};
