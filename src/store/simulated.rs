//! Simulated Durable Store with Fault Injection
//!
//! DST wrapper around another durable store. Every fault decision is drawn
//! from a seeded RNG, so a failing seed replays the same fault sequence.

use crate::store::{DurableError, DurableStore, StoreFuture, Version, Versioned};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure (nothing written)
    pub put_fail_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of GET returning corrupted data
    pub get_corrupt_prob: f64,
    /// Probability of PUT persisting only a prefix of the blob
    pub partial_write_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,         // 1%
            get_fail_prob: 0.01,         // 1%
            get_corrupt_prob: 0.001,     // 0.1%
            partial_write_prob: 0.005,   // 0.5%
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            get_fail_prob: 0.05,
            get_corrupt_prob: 0.01,
            partial_write_prob: 0.02,
            latency_range_us: (0, 200),
        }
    }

    /// Clean failures only: an operation either happens fully or not at all
    pub fn failures_only(prob: f64) -> Self {
        SimulatedStoreConfig {
            put_fail_prob: prob,
            get_fail_prob: prob,
            get_corrupt_prob: 0.0,
            partial_write_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            get_fail_prob: 0.0,
            get_corrupt_prob: 0.0,
            partial_write_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub partial_writes: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub get_corruptions: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Simulated durable store that wraps another store and injects faults
#[derive(Clone)]
pub struct SimulatedDurableStore<S: DurableStore + Clone> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

/// What a write should do after fault rolls
enum WritePlan {
    Fail,
    Partial(usize),
    Full,
}

impl<S: DurableStore + Clone> SimulatedDurableStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedDurableStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// The wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    fn latency(&self) -> Option<std::time::Duration> {
        let (min, max) = self.config.latency_range_us;
        if max == 0 {
            return None;
        }
        let us = self.state.lock().rng.gen_range(min.min(max)..=max);
        (us > 0).then(|| std::time::Duration::from_micros(us))
    }

    fn plan_read(&self) -> bool {
        let mut s = self.state.lock();
        s.stats.get_attempts += 1;
        if s.rng.gen_bool(self.config.get_fail_prob) {
            s.stats.get_failures += 1;
            return false;
        }
        true
    }

    fn maybe_corrupt(&self, mut data: Vec<u8>) -> Vec<u8> {
        let mut s = self.state.lock();
        if !data.is_empty() && s.rng.gen_bool(self.config.get_corrupt_prob) {
            s.stats.get_corruptions += 1;
            let idx = s.rng.gen_range(0..data.len());
            data[idx] ^= 0xFF;
        }
        data
    }

    fn plan_write(&self, len: usize) -> WritePlan {
        let mut s = self.state.lock();
        s.stats.put_attempts += 1;
        if s.rng.gen_bool(self.config.put_fail_prob) {
            s.stats.put_failures += 1;
            return WritePlan::Fail;
        }
        if len > 1 && s.rng.gen_bool(self.config.partial_write_prob) {
            s.stats.partial_writes += 1;
            return WritePlan::Partial(s.rng.gen_range(1..len));
        }
        WritePlan::Full
    }

    async fn sleep_latency(&self) {
        if let Some(delay) = self.latency() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn simulated_error(msg: &str) -> DurableError {
    DurableError::Io(IoError::new(ErrorKind::Other, msg.to_string()))
}

impl<S: DurableStore + Clone> DurableStore for SimulatedDurableStore<S> {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            self.sleep_latency().await;
            if !self.plan_read() {
                return Err(simulated_error("simulated get failure"));
            }
            let data = self.inner_store.get(key).await?;
            Ok(data.map(|d| self.maybe_corrupt(d)))
        })
    }

    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sleep_latency().await;
            match self.plan_write(data.len()) {
                WritePlan::Fail => Err(simulated_error("simulated put failure")),
                WritePlan::Partial(len) => self.inner_store.put(key, &data[..len]).await,
                WritePlan::Full => self.inner_store.put(key, data).await,
            }
        })
    }

    fn get_versioned<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Versioned>> {
        Box::pin(async move {
            self.sleep_latency().await;
            if !self.plan_read() {
                return Err(simulated_error("simulated get failure"));
            }
            let found = self.inner_store.get_versioned(key).await?;
            Ok(found.map(|v| Versioned {
                data: self.maybe_corrupt(v.data),
                version: v.version,
            }))
        })
    }

    fn put_if_version<'a>(
        &'a self,
        key: &'a str,
        expected: Option<Version>,
        data: &'a [u8],
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            self.sleep_latency().await;
            match self.plan_write(data.len()) {
                WritePlan::Fail => Err(simulated_error("simulated put failure")),
                WritePlan::Partial(len) => {
                    self.inner_store
                        .put_if_version(key, expected, &data[..len])
                        .await
                }
                WritePlan::Full => self.inner_store.put_if_version(key, expected, data).await,
            }
        })
    }
}
