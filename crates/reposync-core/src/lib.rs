//! Multi-repository git synchronisation.
//!
//! Discovers local clones, decides per repository whether to pull, push,
//! both or nothing, executes that without ever forcing or auto-resolving,
//! and reports the outcome of every repository.

pub mod config;
pub mod conflict;
pub mod error;
pub mod fakes;
pub mod git;
pub mod locator;
pub mod model;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod telemetry;

pub use config::{ConfiguredRepository, SyncConfig, DEFAULT_CONFIG_PATH};
pub use conflict::{ConflictClassifier, GitStatusClassifier};
pub use error::{ConfigError, DiscoveryError, ErrorKind, GitResult, Rollback, SyncError};
pub use git::{GitCli, GitCliOpener, GitRepository, RepositoryOpener};
pub use locator::{
    ConfiguredStrategy, Discovery, DiscoveryStrategy, DiscoveryWarning, RepositoryLocator,
    ScanStrategy,
};
pub use model::{
    ConflictInfo, ConflictKind, ConflictedPath, MergeFailure, PullKind, PullOutcome,
    RepositoryRef, RepositoryState, SyncAction, SyncResult, SyncStatus,
};
pub use orchestrator::{CancelSignal, RunOptions, SyncOrchestrator};
pub use planner::{SyncPlan, SyncPlanner};
pub use report::{ExitSignal, Report, ReportBuilder, Summary};
pub use telemetry::init_tracing;
