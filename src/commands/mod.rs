//! CLI command implementations.

pub mod action;
pub mod daemon;

use std::sync::Arc;
use tracing::debug;

use crate::cli::Cli;
use crate::config::ConfigStore;
use crate::enforcer::{check_privileges, create_backend};
use crate::error::FirewallResult;
use crate::manager::FirewallManager;
use crate::protocol::Session;

/// Privilege check, backend selection and manager setup shared by all
/// commands that touch the firewall.
pub fn build_session(cli: &Cli) -> FirewallResult<Session> {
    check_privileges()?;

    let backend = create_backend(cli.backend)?;
    debug!("Firewall backend: {}", backend.name());

    let store = ConfigStore::new(&cli.config);
    let manager = FirewallManager::new(Arc::from(backend), cli.manager_settings(), Some(store))?;
    Ok(Session::new(Arc::new(manager), &cli.ip_dir))
}
