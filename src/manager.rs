//! Firewall manager: turns region requests into converged rule sets.

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::batcher::{plan_batches, region_prefix, BatchPolicy, Direction};
use crate::config::{validate_rule_prefix, ConfigStore, DEFAULT_RULE_PREFIX};
use crate::enforcer::{PacketFilterBackend, RuleSpec};
use crate::error::{FirewallError, FirewallResult};
use crate::executor::{ExecutionReport, RuleExecutor, RuleTask, DEFAULT_CONCURRENCY};
use crate::iplist::read_region_list;
use crate::region::Region;

/// Tunables of the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub rule_prefix: String,
    /// Maximum backend calls in flight per request
    pub concurrency: usize,
    pub batch_policy: BatchPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_policy: BatchPolicy::default(),
        }
    }
}

/// Immutable snapshot of the protected program's path.
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub program: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub region: Region,
    /// Addresses put into rules
    pub entries: usize,
    /// List lines dropped by validation
    pub invalid: usize,
    pub batches: usize,
    /// Rules found in the backend after creation
    pub rules: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnblockOutcome {
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub path_configured: bool,
    pub program_path: Option<PathBuf>,
}

pub struct FirewallManager {
    backend: Arc<dyn PacketFilterBackend>,
    settings: ManagerSettings,
    executor: RuleExecutor,
    path: ArcSwap<PathConfig>,
    store: Option<ConfigStore>,
}

impl FirewallManager {
    /// Build a manager; with a store, a saved program path that still
    /// exists is picked up.
    pub fn new(
        backend: Arc<dyn PacketFilterBackend>,
        settings: ManagerSettings,
        store: Option<ConfigStore>,
    ) -> FirewallResult<Self> {
        validate_rule_prefix(&settings.rule_prefix)
            .map_err(|e| FirewallError::InvalidSettings(e.to_string()))?;

        let program = store.as_ref().and_then(|s| s.load().program_path());
        if let Some(ref path) = program {
            info!("Loaded Overwatch path: {}", path.display());
        }

        Ok(Self {
            backend,
            executor: RuleExecutor::new(settings.concurrency),
            settings,
            path: ArcSwap::from_pointee(PathConfig { program }),
            store,
        })
    }

    /// Current program path, whether or not it still exists.
    pub fn get_path(&self) -> Option<PathBuf> {
        self.path.load().program.clone()
    }

    /// A program path is set and the file is still there.
    pub fn has_path(&self) -> bool {
        self.path
            .load()
            .program
            .as_deref()
            .is_some_and(Path::is_file)
    }

    /// Validate and publish a new program path, then persist it.
    ///
    /// On failure the previous path stays in effect. A failed save is only
    /// logged: the in-memory path is what the daemon enforces.
    pub fn set_path(&self, path: &str) -> FirewallResult<PathBuf> {
        let path = path.trim();
        if path.is_empty() {
            return Err(FirewallError::InvalidPath("path cannot be empty".to_string()));
        }
        let program = PathBuf::from(path);
        if !program.is_file() {
            return Err(FirewallError::InvalidPath(format!(
                "path does not exist: {}",
                path
            )));
        }

        info!("Setting Overwatch path to: {}", program.display());
        self.path.store(Arc::new(PathConfig {
            program: Some(program.clone()),
        }));

        if let Some(ref store) = self.store {
            if let Err(e) = store.save_program_path(&program) {
                warn!(
                    "Failed to save Overwatch path to {}: {:#}",
                    store.path().display(),
                    e
                );
            }
        }
        Ok(program)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            path_configured: self.has_path(),
            program_path: self.get_path(),
        }
    }

    /// Replace any rules of `region` with rules blocking its current list.
    pub async fn block_region(&self, region: Region, ip_dir: &Path) -> FirewallResult<BlockOutcome> {
        if !region.is_blockable() {
            return Err(FirewallError::InvalidRegion(region.to_string()));
        }
        let program = self.get_path().ok_or(FirewallError::PathNotConfigured)?;

        let list = read_region_list(region, ip_dir)?;
        info!(
            "Found {} valid IPs to block for region {}",
            list.len(),
            region
        );

        if !program.is_file() {
            return Err(FirewallError::ProgramPathMissing(program));
        }

        let prefix = region_prefix(&self.settings.rule_prefix, region);
        if let Err(e) = self.remove_matching(&prefix).await {
            warn!("Failed to clean up existing rules for {}: {}", region, e);
        }

        let batches = plan_batches(
            &list.entries,
            region,
            &self.settings.rule_prefix,
            self.settings.batch_policy,
        );
        info!(
            "Processing {} IPs in {} batches",
            list.len(),
            batches.len()
        );

        let mut tasks = Vec::with_capacity(batches.len() * 2);
        for batch in &batches {
            for (name, direction) in [
                (batch.outbound.clone(), Direction::Outbound),
                (batch.inbound.clone(), Direction::Inbound),
            ] {
                tasks.push(RuleTask::Add(RuleSpec {
                    name,
                    direction,
                    program: program.clone(),
                    remote: batch.entries.clone(),
                }));
            }
        }
        let expected = tasks.len();

        let report = self.executor.run(self.backend.as_ref(), tasks).await;
        check_report(&report)?;

        let rules = self.owned_rules(&prefix).await?.len();
        if rules == 0 {
            return Err(FirewallError::Verification(format!(
                "no rules found for region {} after creating {}",
                region, expected
            )));
        }
        if rules < expected {
            warn!(
                "Only {} of {} rules for region {} are visible",
                rules, expected, region
            );
        }

        info!(
            "Successfully blocked {} IPs for region {} ({} rules created)",
            list.len(),
            region,
            rules
        );
        Ok(BlockOutcome {
            region,
            entries: list.len(),
            invalid: list.invalid,
            batches: batches.len(),
            rules,
        })
    }

    /// Remove every rule of `region`.
    pub async fn unblock_region(&self, region: Region) -> FirewallResult<UnblockOutcome> {
        if !region.is_blockable() {
            return Err(FirewallError::InvalidRegion(region.to_string()));
        }
        info!("Unblocking region: {}", region);
        let removed = self
            .remove_matching(&region_prefix(&self.settings.rule_prefix, region))
            .await?;
        Ok(UnblockOutcome { removed })
    }

    /// Remove every rule this daemon owns. Needs no program path.
    pub async fn unblock_all(&self) -> FirewallResult<UnblockOutcome> {
        info!("Unblocking all regions...");
        let removed = self.remove_matching(&self.settings.rule_prefix).await?;
        Ok(UnblockOutcome { removed })
    }

    /// Owned rule names under `prefix`.
    async fn owned_rules(&self, prefix: &str) -> FirewallResult<Vec<String>> {
        let rules = self
            .backend
            .list(prefix)
            .await
            .map_err(|e| FirewallError::Command(format!("failed to list firewall rules: {:#}", e)))?;

        // Never trust the backend's filtering with the ownership boundary
        Ok(rules
            .into_iter()
            .filter(|name| name.starts_with(prefix) && name.starts_with(&self.settings.rule_prefix))
            .collect())
    }

    /// Delete all owned rules under `prefix` and check none are left.
    async fn remove_matching(&self, prefix: &str) -> FirewallResult<usize> {
        let rules = self.owned_rules(prefix).await?;
        if rules.is_empty() {
            info!("No rules found matching prefix: {}", prefix);
            return Ok(0);
        }

        info!(
            "Found {} rules to remove matching prefix: {}",
            rules.len(),
            prefix
        );
        let tasks = rules.into_iter().map(RuleTask::Delete).collect();
        let report = self.executor.run(self.backend.as_ref(), tasks).await;
        check_report(&report)?;

        let remaining = self.owned_rules(prefix).await?.len();
        if remaining > 0 {
            return Err(FirewallError::IncompleteCleanup { remaining });
        }

        info!("Successfully removed all {} rules", report.succeeded);
        Ok(report.succeeded)
    }
}

/// Turn an executor report with failures into a `PartialFailure`.
fn check_report(report: &ExecutionReport) -> FirewallResult<()> {
    if report.is_success() {
        return Ok(());
    }
    Err(FirewallError::PartialFailure {
        failed: report.failed(),
        attempted: report.attempted,
        sample: report
            .first_failure()
            .map(|first| format!("{}: {}", first.rule, first.message))
            .unwrap_or_default(),
    })
}
