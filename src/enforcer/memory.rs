//! In-memory packet filter for tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{PacketFilterBackend, RuleSpec};

/// Rule table kept in a map, with knobs for injecting failures.
///
/// Also records the highest number of calls that were in progress at the
/// same time, so callers can check their concurrency bound.
#[derive(Default)]
pub struct MemoryBackend {
    /// `None` for rules created outside this backend (seeded)
    rules: Mutex<BTreeMap<String, Option<RuleSpec>>>,
    fail_add: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    fail_list: Mutex<bool>,
    /// Deletes of these report success but leave the rule in place
    sticky: Mutex<HashSet<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits `latency` before touching the table.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Add a rule as if someone else had created it.
    pub fn insert_rule(&self, name: &str) {
        lock(&self.rules).insert(name.to_string(), None);
    }

    pub fn fail_add_for(&self, name: &str) {
        lock(&self.fail_add).insert(name.to_string());
    }

    pub fn fail_delete_for(&self, name: &str) {
        lock(&self.fail_delete).insert(name.to_string());
    }

    pub fn set_fail_list(&self, fail: bool) {
        *lock(&self.fail_list) = fail;
    }

    pub fn make_sticky(&self, name: &str) {
        lock(&self.sticky).insert(name.to_string());
    }

    /// All rule names, sorted.
    pub fn rule_names(&self) -> Vec<String> {
        lock(&self.rules).keys().cloned().collect()
    }

    /// Spec of a rule created through [`PacketFilterBackend::add`].
    pub fn rule(&self, name: &str) -> Option<RuleSpec> {
        lock(&self.rules).get(name).cloned().flatten()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        // Give other calls a chance to start so overlap is observable
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PacketFilterBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let _guard = self.enter().await;
        if *lock(&self.fail_list) {
            anyhow::bail!("listing rules failed");
        }
        Ok(lock(&self.rules)
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn add(&self, rule: &RuleSpec) -> Result<()> {
        let _guard = self.enter().await;
        let name = rule.name.to_string();
        if lock(&self.fail_add).contains(&name) {
            anyhow::bail!("add rule {} rejected", name);
        }
        lock(&self.rules).insert(name, Some(rule.clone()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.enter().await;
        if lock(&self.fail_delete).contains(name) {
            anyhow::bail!("delete rule {} rejected", name);
        }
        if !lock(&self.sticky).contains(name) {
            lock(&self.rules).remove(name);
        }
        Ok(())
    }
}
