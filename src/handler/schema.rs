//! Resource descriptors
//!
//! Each HTTP resource is described by a static [`ResourceSchema`]: which
//! fields a PUT may change, which foreign keys a write must satisfy, and what
//! an unmatched route answers. Handlers are generic over the schema.

use crate::keys::CollectionKind;
use crate::record::is_truthy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Message returned when an update targets a missing id
pub const MISSING_RECORD_MESSAGE: &str = "An access key with that id does not exist.";

/// A field that must reference an existing record in another collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub target: CollectionKind,
    pub message: &'static str,
}

/// Answer for requests that match no route of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedRoute {
    /// Plain-text 404
    NotFound,
    /// 200 with the configured fallback URL as a JSON string
    FallbackUrl,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResourceSchema {
    pub kind: CollectionKind,
    pub updatable_fields: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub unmatched: UnmatchedRoute,
}

impl ResourceSchema {
    /// Collections that must be reconciled before a write can be validated
    pub fn dependencies(&self) -> impl Iterator<Item = CollectionKind> + '_ {
        self.foreign_keys.iter().map(|fk| fk.target)
    }
}

pub static LEVELS: ResourceSchema = ResourceSchema {
    kind: CollectionKind::Levels,
    updatable_fields: &[
        "token",
        "number",
        "activeUsersPerHour",
        "requestsPerDay",
        "requestsPerMonth",
        "name",
        "description",
        "stripeProductRef",
        "stripePriceRef",
    ],
    foreign_keys: &[],
    unmatched: UnmatchedRoute::NotFound,
};

pub static WEBSITES: ResourceSchema = ResourceSchema {
    kind: CollectionKind::Websites,
    updatable_fields: &["platformId", "frontendDomainName"],
    foreign_keys: &[ForeignKey {
        field: "platformId",
        target: CollectionKind::Platforms,
        message: "The provided platform id foreign key does not exist.",
    }],
    unmatched: UnmatchedRoute::FallbackUrl,
};

/// Resources served over HTTP. Platforms are only ever read as a dependency.
pub static RESOURCES: [&ResourceSchema; 2] = [&LEVELS, &WEBSITES];

pub fn schema_for(kind: CollectionKind) -> Option<&'static ResourceSchema> {
    RESOURCES.iter().copied().find(|schema| schema.kind == kind)
}

/// How a PUT body is merged into the stored record, field by field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Missing-or-omitted fields are kept: only truthy incoming values
    /// replace the stored one, so `""`, `0`, `false` and `null` never clear
    #[default]
    #[serde(rename = "falsy")]
    KeepOnFalsy,
    /// Only absent or `null` fields are kept; `""`, `0`, `false` overwrite
    #[serde(rename = "missing")]
    KeepOnMissing,
}

impl MergeStrategy {
    /// Whether `incoming` should replace the stored value
    pub fn replaces(&self, incoming: Option<&Value>) -> bool {
        match (self, incoming) {
            (_, None) | (_, Some(Value::Null)) => false,
            (MergeStrategy::KeepOnFalsy, Some(value)) => is_truthy(value),
            (MergeStrategy::KeepOnMissing, Some(_)) => true,
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "falsy" | "keep-on-falsy" => Ok(MergeStrategy::KeepOnFalsy),
            "missing" | "keep-on-missing" => Ok(MergeStrategy::KeepOnMissing),
            other => Err(format!("unknown merge strategy: {} (expected falsy or missing)", other)),
        }
    }
}
