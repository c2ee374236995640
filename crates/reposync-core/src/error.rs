//! Error taxonomy for discovery, git operations and configuration.
//!
//! Only [`ConfigError`] is allowed to abort a run. [`SyncError`] is caught at
//! the repository boundary and turned into a [`crate::model::SyncResult`];
//! [`DiscoveryError`] excludes a single repository and surfaces as a warning.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of a single git operation against one working directory.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Refused to touch a working tree with uncommitted changes.
    #[error("working tree has uncommitted changes")]
    DirtyWorktree,

    /// The remote advanced since the last fetch. Never retried with force.
    #[error("push rejected as non-fast-forward, re-run to fetch and integrate remote changes: {0}")]
    RejectedNonFastForward(String),

    /// A git command exceeded the configured timeout.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// Any other non-zero git exit.
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The git process could not be spawned or awaited.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A merge stopped partway (failed or timed out) and the tree was reset
    /// to the commit it started from, or could not be.
    #[error("{cause}; {rollback}")]
    InterruptedMerge {
        cause: Box<SyncError>,
        rollback: Rollback,
    },
}

/// What happened to a working tree after an interrupted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// Back at the pre-merge commit with nothing staged.
    Restored,
    /// Still holds the partial merge and needs manual cleanup.
    Failed,
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rollback::Restored => f.write_str("merge rolled back to the pre-merge commit"),
            Rollback::Failed => {
                f.write_str("merge rollback failed, working tree left mid-merge")
            }
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) => ErrorKind::NetworkError,
            SyncError::Auth(_) => ErrorKind::AuthError,
            SyncError::DirtyWorktree => ErrorKind::DirtyWorktree,
            SyncError::RejectedNonFastForward(_) => ErrorKind::RejectedNonFastForward,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::CommandFailed { .. } => ErrorKind::CommandFailed,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::InterruptedMerge { cause, .. } => cause.kind(),
        }
    }
}

/// Serialisable error tag recorded on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    AuthError,
    DirtyWorktree,
    RejectedNonFastForward,
    Timeout,
    CommandFailed,
    Io,
    /// A per-repository task panicked.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::DirtyWorktree => "dirty_worktree",
            ErrorKind::RejectedNonFastForward => "rejected_non_fast_forward",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Convenience result alias for git operations.
pub type GitResult<T> = std::result::Result<T, SyncError>;

/// Why a candidate repository was excluded from the run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("repository '{name}': path does not exist: {}", .path.display())]
    MissingPath { name: String, path: PathBuf },

    #[error("repository '{name}': not a git working directory: {}", .path.display())]
    NotARepository { name: String, path: PathBuf },

    #[error("repository '{name}': no local clone found in any search location")]
    Unresolved { name: String },

    /// Same name or path as a repository already selected.
    #[error("repository '{name}': {} duplicates {}, ignored", .path.display(), .kept.display())]
    Duplicate {
        name: String,
        path: PathBuf,
        kept: PathBuf,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    pub fn name(&self) -> Option<&str> {
        match self {
            DiscoveryError::MissingPath { name, .. }
            | DiscoveryError::NotARepository { name, .. }
            | DiscoveryError::Unresolved { name }
            | DiscoveryError::Duplicate { name, .. } => Some(name),
            DiscoveryError::Io { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DiscoveryError::MissingPath { path, .. }
            | DiscoveryError::NotARepository { path, .. }
            | DiscoveryError::Duplicate { path, .. }
            | DiscoveryError::Io { path, .. } => Some(path),
            DiscoveryError::Unresolved { .. } => None,
        }
    }
}

/// Startup failures. The only errors that abort a whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
