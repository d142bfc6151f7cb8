//! Deterministic Simulation Testing for the request cycle
//!
//! Shadow-state harness that drives handler sessions against a
//! fault-injecting durable store:
//! - Seeded workload over several namespaces (levels and websites)
//! - Shadow model updated only from successful responses
//! - Invariants checked against the raw blobs after the run
//!
//! ```text
//! for seed in 0..100 {
//!     let mut harness = SyncDstHarness::new(SyncDstConfig::calm(seed)).await;
//!     harness.run(300).await;
//!     harness.check_invariants();
//! }
//! ```
//!
//! With clean faults only (an operation happens fully or not at all) the
//! durable state must equal the shadow exactly. With partial writes and
//! corrupted reads only structural invariants are checked.

use crate::handler::{HandlerError, MergeStrategy, ResourceSchema, Session, LEVELS, WEBSITES};
use crate::keys::{CollectionKey, CollectionKind};
use crate::record::{Record, STORAGE_INTERNAL_FIELDS};
use crate::store::{
    DurableStore, InMemoryDurableStore, SimulatedDurableStore,
    SimulatedStoreConfig, SimulatedStoreStats,
};
use crate::sync::{CorruptPayloadPolicy, SyncOptions, WriteMode};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Platform id that is never seeded
const MISSING_PLATFORM_ID: &str = "platform-missing";

#[derive(Debug, Clone)]
pub struct SyncDstConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Durable store fault configuration
    pub store_config: SimulatedStoreConfig,
    pub sync: SyncOptions,
    pub merge: MergeStrategy,
    /// Number of namespaces the workload spreads over
    pub namespaces: u64,
    /// Platforms seeded per namespace before the run
    pub platforms_per_namespace: u64,
    /// Probability of a write (vs a read)
    pub write_probability: f64,
    /// Whether the durable state must match the shadow exactly
    pub exact: bool,
}

impl Default for SyncDstConfig {
    fn default() -> Self {
        SyncDstConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::no_faults(),
            sync: SyncOptions::default(),
            merge: MergeStrategy::default(),
            namespaces: 3,
            platforms_per_namespace: 3,
            write_probability: 0.7,
            exact: true,
        }
    }
}

impl SyncDstConfig {
    /// No faults
    pub fn calm(seed: u64) -> Self {
        SyncDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// Clean store failures; the shadow stays exact
    pub fn moderate(seed: u64) -> Self {
        SyncDstConfig {
            seed,
            store_config: SimulatedStoreConfig::failures_only(0.05),
            ..Default::default()
        }
    }

    /// Clean failures with compare-and-swap persists
    pub fn compare_and_swap(seed: u64) -> Self {
        SyncDstConfig {
            seed,
            store_config: SimulatedStoreConfig::failures_only(0.05),
            sync: SyncOptions {
                write_mode: WriteMode::CompareAndSwap,
                ..SyncOptions::default()
            },
            ..Default::default()
        }
    }

    /// Partial writes and corrupted reads, corrupt blobs treated as empty
    pub fn chaos(seed: u64) -> Self {
        SyncDstConfig {
            seed,
            store_config: SimulatedStoreConfig {
                latency_range_us: (0, 0),
                ..SimulatedStoreConfig::high_chaos()
            },
            sync: SyncOptions {
                corrupt_payload: CorruptPayloadPolicy::TreatAsEmpty,
                ..SyncOptions::default()
            },
            exact: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum SyncOperation {
    Create {
        schema: &'static ResourceSchema,
        namespace: String,
        body: Value,
    },
    Update {
        schema: &'static ResourceSchema,
        namespace: String,
        id: String,
        body: Value,
    },
    Delete {
        schema: &'static ResourceSchema,
        namespace: String,
        id: String,
    },
    Get {
        schema: &'static ResourceSchema,
        namespace: String,
        id: String,
    },
    List {
        schema: &'static ResourceSchema,
        namespace: String,
    },
}

#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Success,
    /// Rejected by the handler as the workload expected
    Rejected(u16),
    /// Failed (expected under fault injection)
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SyncDstResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub rejected_operations: u64,
    pub failed_operations: u64,
    /// Blobs that could not be decoded after the run
    pub corrupt_blobs: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
}

impl SyncDstResult {
    pub fn new(seed: u64) -> Self {
        SyncDstResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            rejected_operations: 0,
            failed_operations: 0,
            corrupt_blobs: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} rejected, {} failed), {} corrupt blobs, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.rejected_operations,
            self.failed_operations,
            self.corrupt_blobs,
            self.invariant_violations.len()
        )
    }
}

type DstStore = SimulatedDurableStore<InMemoryDurableStore>;

pub struct SyncDstHarness {
    config: SyncDstConfig,
    rng: ChaCha8Rng,
    store: DstStore,
    /// Expected records per storage key, in persisted order
    shadow: HashMap<String, Vec<Record>>,
    /// Every id a successful create returned
    created_ids: HashSet<String>,
    /// Platform blobs as seeded, by storage key
    platforms: HashMap<String, Vec<u8>>,
    platform_ids: HashMap<String, Vec<String>>,
    missing_counter: u64,
    result: SyncDstResult,
}

impl SyncDstHarness {
    pub async fn new(config: SyncDstConfig) -> Self {
        let inner = InMemoryDurableStore::new();
        let mut platforms = HashMap::new();
        let mut platform_ids = HashMap::new();

        for ns in 0..config.namespaces {
            let namespace = namespace_name(ns);
            let ids: Vec<String> = (0..config.platforms_per_namespace)
                .map(|p| format!("platform-{}-{}", ns, p))
                .collect();
            let blob: Vec<Value> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| json!({"id": id, "name": format!("p{}", i), "$loki": i + 1}))
                .collect();
            let key = CollectionKey::new(CollectionKind::Platforms, namespace.clone()).storage_key();
            let data = Value::Array(blob).to_string().into_bytes();
            // Seeding bypasses fault injection; in-memory puts do not fail
            inner.put(&key, &data).await.ok();
            platforms.insert(key, data);
            platform_ids.insert(namespace, ids);
        }

        let store = SimulatedDurableStore::new(
            inner,
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        );

        SyncDstHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            result: SyncDstResult::new(config.seed),
            config,
            store,
            shadow: HashMap::new(),
            created_ids: HashSet::new(),
            platforms,
            platform_ids,
            missing_counter: 0,
        }
    }

    pub fn result(&self) -> &SyncDstResult {
        &self.result
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_operation();
            self.execute(op).await;
        }
    }

    fn pick_namespace(&mut self) -> String {
        namespace_name(self.rng.gen_range(0..self.config.namespaces))
    }

    /// An id the shadow holds, or a fresh id no create ever returned
    fn pick_id(&mut self, schema: &ResourceSchema, namespace: &str) -> String {
        let key = CollectionKey::new(schema.kind, namespace).storage_key();
        let existing = self.shadow.get(&key).map(Vec::len).unwrap_or(0);
        if existing > 0 && self.rng.gen_bool(0.85) {
            let idx = self.rng.gen_range(0..existing);
            if let Some(record) = self.shadow.get(&key).and_then(|records| records.get(idx)) {
                return record.id().to_string();
            }
        }
        self.missing_counter += 1;
        format!("missing-{}", self.missing_counter)
    }

    fn pick_platform(&mut self, namespace: &str) -> String {
        let ids = self.platform_ids.get(namespace).cloned().unwrap_or_default();
        if self.rng.gen_bool(0.15) {
            return MISSING_PLATFORM_ID.to_string();
        }
        ids.choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| MISSING_PLATFORM_ID.to_string())
    }

    fn level_body(&mut self) -> Value {
        let n: u64 = self.rng.gen_range(0..5);
        match self.rng.gen_range(0..4) {
            0 => json!({"name": format!("level-{}", n), "number": n}),
            1 => json!({"requestsPerDay": n * 1000, "description": ""}),
            2 => json!({"token": format!("tok-{}", self.rng.gen_range(0..100)), "id": "ignored"}),
            _ => json!({"stripePriceRef": format!("price_{}", n), "$loki": 7}),
        }
    }

    fn website_body(&mut self, namespace: &str, with_platform: bool) -> Value {
        let domain = format!("site{}.example", self.rng.gen_range(0..50));
        if with_platform {
            json!({"frontendDomainName": domain, "platformId": self.pick_platform(namespace)})
        } else {
            json!({"frontendDomainName": domain})
        }
    }

    pub fn next_operation(&mut self) -> SyncOperation {
        let schema: &'static ResourceSchema = if self.rng.gen_bool(0.5) {
            &LEVELS
        } else {
            &WEBSITES
        };
        let namespace = self.pick_namespace();

        if !self.rng.gen_bool(self.config.write_probability) {
            return if self.rng.gen_bool(0.5) {
                SyncOperation::List { schema, namespace }
            } else {
                let id = self.pick_id(schema, &namespace);
                SyncOperation::Get {
                    schema,
                    namespace,
                    id,
                }
            };
        }

        match self.rng.gen_range(0..10) {
            0..=4 => {
                let body = match schema.kind {
                    CollectionKind::Websites => self.website_body(&namespace, true),
                    _ => self.level_body(),
                };
                SyncOperation::Create {
                    schema,
                    namespace,
                    body,
                }
            }
            5..=7 => {
                let id = self.pick_id(schema, &namespace);
                let body = match schema.kind {
                    CollectionKind::Websites => {
                        let with_platform = self.rng.gen_bool(0.5);
                        self.website_body(&namespace, with_platform)
                    }
                    _ => self.level_body(),
                };
                SyncOperation::Update {
                    schema,
                    namespace,
                    id,
                    body,
                }
            }
            _ => {
                let id = self.pick_id(schema, &namespace);
                SyncOperation::Delete {
                    schema,
                    namespace,
                    id,
                }
            }
        }
    }

    fn session(&self, schema: &'static ResourceSchema, namespace: &str) -> Session<'_> {
        Session::new(&self.store, self.config.sync, self.config.merge, schema, namespace)
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(message);
    }

    async fn execute(&mut self, op: SyncOperation) {
        self.result.total_operations += 1;
        let outcome = match op {
            SyncOperation::Create {
                schema,
                namespace,
                body,
            } => self.execute_create(schema, &namespace, body).await,
            SyncOperation::Update {
                schema,
                namespace,
                id,
                body,
            } => self.execute_update(schema, &namespace, &id, body).await,
            SyncOperation::Delete {
                schema,
                namespace,
                id,
            } => self.execute_delete(schema, &namespace, &id).await,
            SyncOperation::Get {
                schema,
                namespace,
                id,
            } => self.execute_get(schema, &namespace, &id).await,
            SyncOperation::List { schema, namespace } => {
                self.execute_list(schema, &namespace).await
            }
        };

        match outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Rejected(_) => self.result.rejected_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
        }
    }

    fn platform_is_valid(&self, namespace: &str, record: &Record) -> bool {
        let ids = self.platform_ids.get(namespace);
        match (record.get("platformId"), ids) {
            (Some(Value::String(id)), Some(ids)) => ids.contains(id),
            _ => false,
        }
    }

    async fn execute_create(
        &mut self,
        schema: &'static ResourceSchema,
        namespace: &str,
        body: Value,
    ) -> OperationOutcome {
        let expect_fk_violation = schema.kind == CollectionKind::Websites
            && body.get("platformId") == Some(&json!(MISSING_PLATFORM_ID));

        let result = self.session(schema, namespace).create(body).await;
        match result {
            Ok(record) => {
                if expect_fk_violation {
                    self.violation(format!(
                        "create in {}/{} accepted missing platform",
                        schema.kind, namespace
                    ));
                }
                if !self.created_ids.insert(record.id().to_string()) {
                    self.violation(format!("create returned duplicate id {}", record.id()));
                }
                let key = CollectionKey::new(schema.kind, namespace).storage_key();
                self.shadow.entry(key).or_default().push(record);
                OperationOutcome::Success
            }
            Err(e @ HandlerError::ForeignKeyViolation { .. }) => {
                if !expect_fk_violation && self.config.exact {
                    self.violation(format!(
                        "create in {}/{} rejected a valid platform: {}",
                        schema.kind, namespace, e
                    ));
                }
                OperationOutcome::Rejected(e.status_code())
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_update(
        &mut self,
        schema: &'static ResourceSchema,
        namespace: &str,
        id: &str,
        body: Value,
    ) -> OperationOutcome {
        let key = CollectionKey::new(schema.kind, namespace).storage_key();
        let known = self
            .shadow
            .get(&key)
            .is_some_and(|records| records.iter().any(|r| r.id() == id));

        let result = self.session(schema, namespace).update(id, body).await;
        match result {
            Ok(record) => {
                if !self.created_ids.contains(id) {
                    self.violation(format!("update of never-created id {} succeeded", id));
                }
                if record.id() != id {
                    self.violation(format!("update of {} returned id {}", id, record.id()));
                }
                if schema.kind == CollectionKind::Websites && !self.platform_is_valid(namespace, &record)
                {
                    self.violation(format!("update of {} stored an invalid platform", id));
                }
                if let Some(slot) = self
                    .shadow
                    .get_mut(&key)
                    .and_then(|records| records.iter_mut().find(|r| r.id() == id))
                {
                    *slot = record;
                }
                OperationOutcome::Success
            }
            Err(e @ HandlerError::NotFound(_)) => {
                if known && self.config.exact {
                    self.violation(format!("update of existing id {} reported not found", id));
                }
                OperationOutcome::Rejected(e.status_code())
            }
            Err(e @ HandlerError::ForeignKeyViolation { .. }) => {
                OperationOutcome::Rejected(e.status_code())
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_delete(
        &mut self,
        schema: &'static ResourceSchema,
        namespace: &str,
        id: &str,
    ) -> OperationOutcome {
        let result = self.session(schema, namespace).delete(id).await;
        match result {
            Ok(()) => {
                let key = CollectionKey::new(schema.kind, namespace).storage_key();
                self.shadow.entry(key).or_default().retain(|r| r.id() != id);
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_get(
        &mut self,
        schema: &'static ResourceSchema,
        namespace: &str,
        id: &str,
    ) -> OperationOutcome {
        let result = self.session(schema, namespace).get(id).await;
        match result {
            Ok(found) => {
                if self.config.exact {
                    let key = CollectionKey::new(schema.kind, namespace).storage_key();
                    let expected = self
                        .shadow
                        .get(&key)
                        .and_then(|records| records.iter().find(|r| r.id() == id))
                        .cloned();
                    if found != expected {
                        self.violation(format!(
                            "get {}/{}/{} returned {:?}, shadow has {:?}",
                            schema.kind, namespace, id, found, expected
                        ));
                    }
                }
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_list(
        &mut self,
        schema: &'static ResourceSchema,
        namespace: &str,
    ) -> OperationOutcome {
        let result = self.session(schema, namespace).list().await;
        match result {
            Ok(records) => {
                if self.config.exact {
                    let key = CollectionKey::new(schema.kind, namespace).storage_key();
                    let expected = self.shadow.get(&key).cloned().unwrap_or_default();
                    if records != expected {
                        self.violation(format!(
                            "list {}/{} returned {} records, shadow has {}",
                            schema.kind,
                            namespace,
                            records.len(),
                            expected.len()
                        ));
                    }
                }
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    /// Check the raw durable state against the shadow and structural invariants
    pub fn check_invariants(&mut self) {
        // Invariant 1: platforms are never written
        let platforms: Vec<(String, Vec<u8>)> = self
            .platforms
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, seeded) in platforms {
            if self.store.inner().raw(&key).as_deref() != Some(seeded.as_slice()) {
                self.violation(format!("platform blob {} was modified", key));
            }
        }

        for ns in 0..self.config.namespaces {
            let namespace = namespace_name(ns);
            for schema in [&LEVELS, &WEBSITES] {
                self.check_collection(schema, &namespace);
            }
        }

        self.result.store_stats = self.store.stats();
    }

    fn check_collection(&mut self, schema: &'static ResourceSchema, namespace: &str) {
        let key = CollectionKey::new(schema.kind, namespace).storage_key();
        let expected = self.shadow.get(&key).cloned().unwrap_or_default();

        let Some(raw) = self.store.inner().raw(&key) else {
            if self.config.exact && !expected.is_empty() {
                self.violation(format!("{} missing, shadow has {} records", key, expected.len()));
            }
            return;
        };

        let records: Vec<Value> = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                self.result.corrupt_blobs += 1;
                if self.config.exact {
                    self.violation(format!("{} is not a record array: {}", key, e));
                }
                return;
            }
        };

        // Invariant 2: ids are unique and were all handed out by create
        let mut seen = HashSet::new();
        for value in &records {
            let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
            if !seen.insert(id.to_string()) {
                self.violation(format!("{} holds duplicate id {}", key, id));
            }
            if !self.created_ids.contains(id) {
                self.violation(format!("{} holds unknown id {:?}", key, id));
            }
            // Invariant 3: storage-internal fields never reach the blob
            for field in STORAGE_INTERNAL_FIELDS {
                if value.get(field).is_some() {
                    self.violation(format!("{} record {} carries {}", key, id, field));
                }
            }
        }

        // Invariant 4: every stored website references a seeded platform
        if schema.kind == CollectionKind::Websites {
            let ids = self.platform_ids.get(namespace).cloned().unwrap_or_default();
            for value in &records {
                let platform = value.get("platformId").and_then(Value::as_str);
                if !platform.is_some_and(|p| ids.iter().any(|id| id == p)) {
                    self.violation(format!("{} stores website with platform {:?}", key, platform));
                }
            }
        }

        // Invariant 5: with clean faults the blob is exactly the shadow
        if self.config.exact {
            let actual: Vec<Record> = records
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect();
            if actual != expected {
                self.violation(format!(
                    "{} diverged from shadow: {} stored vs {} expected",
                    key,
                    actual.len(),
                    expected.len()
                ));
            }
        }
    }
}

fn namespace_name(n: u64) -> String {
    format!("ns{}", n)
}

/// Run `count` seeds starting at `start_seed`
pub async fn run_dst_batch<F>(
    start_seed: u64,
    count: u64,
    operations: usize,
    make_config: F,
) -> Vec<SyncDstResult>
where
    F: Fn(u64) -> SyncDstConfig,
{
    let mut results = Vec::with_capacity(count as usize);
    for seed in start_seed..start_seed + count {
        let mut harness = SyncDstHarness::new(make_config(seed)).await;
        harness.run(operations).await;
        harness.check_invariants();
        results.push(harness.result().clone());
    }
    results
}

pub fn summarize_batch(results: &[SyncDstResult]) -> String {
    let passed = results.iter().filter(|r| r.is_success()).count();
    let ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let failed: u64 = results.iter().map(|r| r.failed_operations).sum();
    let corrupt: u64 = results.iter().map(|r| r.corrupt_blobs).sum();
    let failing: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    format!(
        "Runs: {} ({} passed)\nOperations: {} ({} failed under faults)\nCorrupt blobs: {}\nFailing seeds: {:?}",
        results.len(),
        passed,
        ops,
        failed,
        corrupt,
        failing
    )
}
