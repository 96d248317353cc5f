//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::batcher::BatchPolicy;
use crate::config::{
    Backend, DEFAULT_CONFIG_FILE, DEFAULT_IP_LIST_DIR, DEFAULT_PROGRAM_NAME, DEFAULT_RULE_PREFIX,
};
use crate::executor::DEFAULT_CONCURRENCY;
use crate::manager::ManagerSettings;

#[derive(Parser)]
#[command(name = "regionwall")]
#[command(author, version, about = "Region-based firewall rule daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Firewall backend
    #[arg(long, value_enum, default_value_t = Backend::Auto, global = true)]
    pub backend: Backend,

    /// Name prefix marking rules owned by this daemon
    #[arg(long, default_value = DEFAULT_RULE_PREFIX, global = true)]
    pub rule_prefix: String,

    /// Maximum concurrent firewall commands
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, global = true)]
    pub concurrency: usize,

    /// Fixed addresses per rule (default: adaptive 10/25/50)
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Directory with the <region>.txt address lists
    #[arg(long, default_value = DEFAULT_IP_LIST_DIR, global = true)]
    pub ip_dir: PathBuf,
}

impl Cli {
    /// Manager settings from the global flags.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            rule_prefix: self.rule_prefix.clone(),
            concurrency: self.concurrency.max(1),
            batch_policy: match self.batch_size {
                Some(size) => BatchPolicy::Fixed(size.max(1)),
                None => BatchPolicy::default(),
            },
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the line protocol on stdin/stdout until exit or EOF
    Daemon {
        /// Refuse to block while the program is running
        #[arg(long)]
        guard: bool,

        /// Image name of the program to watch
        #[arg(long, default_value = DEFAULT_PROGRAM_NAME)]
        program_name: String,
    },

    /// Block a region's addresses for the configured program
    Block {
        /// Region code (EU, NA, SA, Afr, As, ME, Oce)
        region: String,
    },

    /// Remove a region's rules
    Unblock {
        /// Region code
        region: String,
    },

    /// Remove every rule owned by this daemon
    UnblockAll,

    /// Show daemon status
    Status,

    /// Set the path of the program to restrict
    SetPath {
        /// Path to the executable
        path: String,
    },

    /// Show the configured program path
    GetPath,

    /// Show version
    Version,
}
