//! Packet-filter backends (netsh, iptables, in-memory).
//!
//! A backend only knows how to list, add and delete named rules. Ownership
//! (which names belong to us) is decided by the caller's prefix, never by
//! the backend.

mod iptables;
pub mod memory;
mod netsh;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

pub use iptables::IptablesBackend;
pub use memory::MemoryBackend;
pub use netsh::NetshBackend;

use crate::batcher::{Direction, RuleName};
use crate::cmd_abstraction::{args_to_strings, RealCommandExecutor, SharedExecutor};
use crate::config::Backend;
use crate::error::{FirewallError, FirewallResult};
use crate::validation::AddressEntry;

/// Everything needed to create one block rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: RuleName,
    pub direction: Direction,
    /// Program whose traffic is blocked
    pub program: PathBuf,
    pub remote: Vec<AddressEntry>,
}

impl RuleSpec {
    /// Remote addresses joined with commas.
    pub fn remote_addresses(&self) -> String {
        self.remote
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Host packet-filter facility.
#[async_trait]
pub trait PacketFilterBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Names of all rules starting with `prefix` (each name once).
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create one block rule.
    async fn add(&self, rule: &RuleSpec) -> Result<()>;

    /// Delete every rule named `name`. Deleting a missing rule succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Detect the firewall facility of this host.
pub fn detect_backend(executor: &SharedExecutor) -> Result<Backend> {
    if cfg!(windows) {
        // netsh ships with every Windows install, but make sure it runs
        executor
            .execute("netsh", &args_to_strings(&["advfirewall", "show", "currentprofile"]))
            .context("netsh is not available")?;
        return Ok(Backend::Netsh);
    }

    if executor
        .execute("iptables-save", &args_to_strings(&["--version"]))
        .is_ok()
    {
        return Ok(Backend::Iptables);
    }

    anyhow::bail!("No firewall facility available (netsh or iptables-restore required)")
}

/// Create a backend for `backend`, detecting the host facility for `Auto`.
pub fn create_backend(backend: Backend) -> FirewallResult<Box<dyn PacketFilterBackend>> {
    let executor = RealCommandExecutor::shared();
    let actual = match backend {
        Backend::Auto => detect_backend(&executor)
            .map_err(|e| FirewallError::BackendNotAvailable(format!("{:#}", e)))?,
        other => other,
    };

    debug!("Using {:?} firewall backend", actual);
    match actual {
        Backend::Netsh => Ok(Box::new(NetshBackend::new(executor))),
        Backend::Iptables => Ok(Box::new(IptablesBackend::new(executor))),
        Backend::Auto => Err(FirewallError::BackendNotAvailable(
            "backend detection returned no facility".to_string(),
        )),
    }
}

/// Run a blocking command closure off the async worker threads.
///
/// Backends spawn external processes; doing that on the runtime threads
/// would serialize the bounded executor.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Firewall command task failed")?
}

/// Check that the process may change firewall rules.
#[cfg(unix)]
pub fn check_privileges() -> FirewallResult<()> {
    // SAFETY: geteuid() has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(FirewallError::Permission(
            "This application requires root privileges. Please run with sudo.".to_string(),
        ));
    }
    Ok(())
}

/// Check that the process may change firewall rules.
#[cfg(windows)]
pub fn check_privileges() -> FirewallResult<()> {
    use crate::cmd_abstraction::CommandExecutor;

    // `net session` only succeeds from an elevated prompt
    let elevated = RealCommandExecutor::new()
        .execute("net", &args_to_strings(&["session"]))
        .map(|o| o.success)
        .unwrap_or(false);

    if !elevated {
        return Err(FirewallError::Permission(
            "This application requires administrator privileges. \
             Please right-click and select 'Run as administrator'."
                .to_string(),
        ));
    }
    Ok(())
}
