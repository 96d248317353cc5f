//! # regionwall - Region-based firewall rule daemon
//!
//! Restricts the network reach of one program by region. For every
//! region a plain-text list of addresses is read, split into batches, and
//! turned into pairs of outbound/inbound block rules bound to the program.
//! Rules are owned by name prefix, so they can always be found and removed
//! again without touching anybody else's rules.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (clap)                                                 │
//! │    └── daemon, block, unblock, unblock-all, status, ...     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Protocol (stdin/stdout, one response line per request)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FirewallManager                                            │
//! │    ├── IP lists + validation (ipnet)                        │
//! │    ├── Batcher (rule naming, adaptive batch size)           │
//! │    └── RuleExecutor (bounded concurrency)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (PacketFilterBackend trait)                       │
//! │    ├── NetshBackend (Windows Advanced Firewall)             │
//! │    ├── IptablesBackend (Linux)                              │
//! │    └── MemoryBackend (tests)                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use regionwall::enforcer::{check_privileges, create_backend};
//! use regionwall::config::{Backend, ConfigStore};
//! use regionwall::manager::{FirewallManager, ManagerSettings};
//! use regionwall::region::Region;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     check_privileges()?;
//!
//!     let backend = create_backend(Backend::Auto)?;
//!     let manager = FirewallManager::new(
//!         Arc::from(backend),
//!         ManagerSettings::default(),
//!         Some(ConfigStore::new("config.json")),
//!     )?;
//!
//!     manager.set_path("C:\\Games\\Overwatch\\Overwatch.exe")?;
//!     let outcome = manager.block_region(Region::Europe, Path::new("ips")).await?;
//!     println!("{} rules active", outcome.rules);
//!
//!     manager.unblock_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`batcher`] - Batch planning and rule naming
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - External command execution (mockable)
//! - [`commands`] - CLI command implementations
//! - [`config`] - Persistent settings (`config.json`)
//! - [`enforcer`] - Firewall backend abstraction (netsh, iptables)
//! - [`error`] - Error types and exit codes
//! - [`executor`] - Bounded-concurrency rule operations
//! - [`iplist`] - Region list loading
//! - [`manager`] - Region block/unblock orchestration
//! - [`process`] - Program run-state checks
//! - [`protocol`] - Line-oriented control protocol
//! - [`region`] - Region codes
//! - [`signal`] - Graceful shutdown signal handling
//! - [`validation`] - Address entry validation

pub mod batcher;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod executor;
pub mod iplist;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod region;
pub mod signal;
pub mod validation;

pub use cli::{Cli, Commands};
pub use error::{FirewallError, FirewallResult};
pub use manager::FirewallManager;
