//! Error types for RegionWall.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes for one-shot invocations.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ADMIN_RIGHTS: i32 = 1;
    pub const IP_LIST_READ: i32 = 2;
    pub const FIREWALL: i32 = 3;
    pub const PROCESS_CHECK: i32 = 4;
    pub const INVALID_ARGS: i32 = 5;
}

/// Broad category of a [`FirewallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Input,
    ExternalCommand,
    PartialFailure,
    Verification,
    Protocol,
    Process,
    Permission,
}

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("Overwatch path not configured")]
    PathNotConfigured,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Overwatch executable no longer exists: {}", .0.display())]
    ProgramPathMissing(PathBuf),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("IP list file not found: {}", .0.display())]
    ListNotFound(PathBuf),

    #[error("IP list file is empty: {}", .0.display())]
    ListEmpty(PathBuf),

    #[error("No valid IPs found in file: {}", .0.display())]
    NoValidEntries(PathBuf),

    #[error("Failed to read IP list {}: {source}", path.display())]
    ListRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Firewall command failed: {0}")]
    Command(String),

    #[error("Failed {failed} of {attempted} rule operations: {sample}")]
    PartialFailure {
        failed: usize,
        attempted: usize,
        sample: String,
    },

    #[error("{remaining} rules still remain after cleanup")]
    IncompleteCleanup { remaining: usize },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Cannot block while {0} is running. Please close it first.")]
    ProgramRunning(String),

    #[error("Process check failed: {0}")]
    ProcessCheck(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("{0}")]
    MissingArgument(String),
}

impl FirewallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathNotConfigured
            | Self::InvalidPath(_)
            | Self::ProgramPathMissing(_)
            | Self::InvalidSettings(_) => ErrorKind::Configuration,
            Self::ListNotFound(_)
            | Self::ListEmpty(_)
            | Self::NoValidEntries(_)
            | Self::ListRead { .. } => ErrorKind::Input,
            Self::Command(_) | Self::BackendNotAvailable(_) => ErrorKind::ExternalCommand,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::IncompleteCleanup { .. } | Self::Verification(_) => ErrorKind::Verification,
            Self::InvalidRegion(_) | Self::UnknownAction(_) | Self::MissingArgument(_) => {
                ErrorKind::Protocol
            }
            Self::ProgramRunning(_) | Self::ProcessCheck(_) => ErrorKind::Process,
            Self::Permission(_) => ErrorKind::Permission,
        }
    }

    /// Exit code used when this error ends a one-shot invocation.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Permission => exit_code::ADMIN_RIGHTS,
            ErrorKind::Input => exit_code::IP_LIST_READ,
            ErrorKind::Process => exit_code::PROCESS_CHECK,
            ErrorKind::Protocol => exit_code::INVALID_ARGS,
            _ => exit_code::FIREWALL,
        }
    }
}

/// Result alias used by the orchestrator.
pub type FirewallResult<T> = std::result::Result<T, FirewallError>;
