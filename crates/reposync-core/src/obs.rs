//! Structured observability hooks for the sync lifecycle.
//!
//! Spans:
//! - `reposync.run` tagged with a fresh run id, wrapping one orchestrator run
//! - `reposync.repo` tagged with the repository name, one per repository
//!
//! Events carry an `event` field so log pipelines can filter on it.

use std::time::Duration;

use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::error::DiscoveryError;
use crate::model::{RepositoryState, SyncResult, SyncStatus};
use crate::planner::SyncPlan;

/// A fresh run identifier.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span for one orchestrator run. Attach with `Instrument::instrument`.
pub fn sync_span(run_id: &str) -> Span {
    tracing::info_span!("reposync.run", run_id = %run_id)
}

pub fn repo_span(name: &str) -> Span {
    tracing::info_span!("reposync.repo", repo = %name)
}

pub fn emit_sync_started(run_id: &str, repositories: usize, dry_run: bool, max_parallel: usize) {
    info!(
        event = "sync.started",
        run_id = %run_id,
        repositories = repositories,
        dry_run = dry_run,
        max_parallel = max_parallel,
    );
}

/// Emit event: a candidate repository was excluded during discovery.
pub fn emit_discovery_warning(strategy: &str, error: &DiscoveryError) {
    warn!(event = "repo.discovery_warning", strategy = strategy, error = %error);
}

pub fn emit_repo_planned(name: &str, plan: &SyncPlan, state: &RepositoryState) {
    info!(
        event = "repo.planned",
        repo = %name,
        action = plan.action.as_str(),
        dry_run = plan.dry_run,
        branch = %state.branch,
        ahead = state.ahead,
        behind = state.behind,
        dirty = state.dirty,
    );
}

/// Emit event: merge stopped on conflicts and was rolled back.
pub fn emit_merge_aborted(name: &str, conflicted_files: usize) {
    warn!(event = "repo.merge_aborted", repo = %name, files = conflicted_files);
}

/// Emit event: one repository reached its final status. Errors log at warn.
pub fn emit_repo_finished(result: &SyncResult, elapsed: Duration) {
    let action = result.action.map(|a| a.as_str()).unwrap_or("-");
    let message = result.message.as_deref().unwrap_or("");
    if result.status == SyncStatus::Error {
        warn!(
            event = "repo.finished",
            repo = %result.name,
            action = action,
            status = result.status.as_str(),
            duration_ms = elapsed.as_millis() as u64,
            message = message,
        );
    } else {
        info!(
            event = "repo.finished",
            repo = %result.name,
            action = action,
            status = result.status.as_str(),
            duration_ms = elapsed.as_millis() as u64,
            message = message,
        );
    }
}

pub fn emit_sync_finished(run_id: &str, results: &[SyncResult], elapsed: Duration) {
    let count = |status: SyncStatus| results.iter().filter(|r| r.status == status).count();
    info!(
        event = "sync.finished",
        run_id = %run_id,
        duration_ms = elapsed.as_millis() as u64,
        succeeded = count(SyncStatus::Success),
        conflicted = count(SyncStatus::Conflict),
        skipped = count(SyncStatus::Skipped),
        errored = count(SyncStatus::Error),
    );
}
