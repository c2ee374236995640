//! Fan-out of fetch → inspect → plan → execute across repositories.
//!
//! Each repository runs its whole lifecycle inside one task, so operations on
//! a working directory are strictly sequential. Tasks run in a bounded pool;
//! results come back in input order regardless of completion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, Instrument};

use crate::config::SyncConfig;
use crate::conflict::{ConflictClassifier, GitStatusClassifier};
use crate::error::{ErrorKind, SyncError};
use crate::git::{GitRepository, RepositoryOpener};
use crate::model::{PullKind, PullOutcome, RepositoryRef, SyncAction, SyncResult};
use crate::obs::{
    emit_merge_aborted, emit_repo_finished, emit_repo_planned, emit_sync_finished,
    emit_sync_started, new_run_id, repo_span, sync_span,
};
use crate::planner::{SyncPlan, SyncPlanner};

pub const REASON_NOT_SELECTED: &str = "not selected";
pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_NO_REMOTE: &str = "no tracking branch";

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Plan and report without pulling, pushing or committing.
    pub dry_run: bool,
    /// Process only this repository; the rest are skipped as "not selected".
    pub target_repo: Option<String>,
    /// Commit uncommitted changes before planning.
    pub auto_commit: bool,
    /// Fetch before inspecting.
    pub fetch: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            target_repo: None,
            auto_commit: false,
            fetch: true,
        }
    }
}

/// External cancellation, observed between repositories.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    opener: Arc<dyn RepositoryOpener>,
    classifier: Arc<dyn ConflictClassifier>,
    cancel: CancelSignal,
}

impl SyncOrchestrator {
    pub fn new(config: Arc<SyncConfig>, opener: Arc<dyn RepositoryOpener>) -> Self {
        Self {
            config,
            opener,
            classifier: Arc::new(GitStatusClassifier::new()),
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ConflictClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Process every repository and return one result each, in input order.
    ///
    /// Never fails: every per-repository problem becomes a [`SyncResult`].
    pub async fn run(&self, refs: &[RepositoryRef], options: &RunOptions) -> Vec<SyncResult> {
        let run_id = new_run_id();
        let span = sync_span(&run_id);
        self.run_inner(&run_id, refs, options).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: &str,
        refs: &[RepositoryRef],
        options: &RunOptions,
    ) -> Vec<SyncResult> {
        let started = Instant::now();
        let max_parallel = self.config.max_parallel.max(1);
        emit_sync_started(run_id, refs.len(), options.dry_run, max_parallel);

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut slots: Vec<Option<SyncResult>> = vec![None; refs.len()];
        let mut tasks = JoinSet::new();

        for (idx, repo) in refs.iter().enumerate() {
            if let Some(target) = &options.target_repo {
                if &repo.name != target {
                    slots[idx] = Some(SyncResult::skipped(repo, None, REASON_NOT_SELECTED));
                    continue;
                }
            }

            // Waiting here is what bounds the pool; the cancel check after it
            // is the last point before a repository is touched.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    slots[idx] = Some(SyncResult::skipped(repo, None, REASON_CANCELLED));
                    continue;
                }
            };
            if self.cancel.is_cancelled() {
                debug!(repo = %repo.name, "cancelled before start");
                slots[idx] = Some(SyncResult::skipped(repo, None, REASON_CANCELLED));
                continue;
            }

            let task = RepoTask {
                repo: repo.clone(),
                git: self.opener.open(repo),
                classifier: Arc::clone(&self.classifier),
                options: options.clone(),
                commit_message: self.config.commit_message.clone(),
            };
            let span = repo_span(&repo.name);
            tasks.spawn(async move {
                let _permit = permit;
                let repo = task.repo.clone();
                let started = Instant::now();
                // Inner spawn so a panic surfaces as a JoinError we can map.
                let result = match tokio::spawn(task.run().instrument(span)).await {
                    Ok(result) => result,
                    Err(err) => SyncResult::internal_error(
                        &repo,
                        format!("repository task failed: {err}"),
                    ),
                };
                emit_repo_finished(&result, started.elapsed());
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(err) => error!(error = %err, "repository worker failed"),
            }
        }

        let results: Vec<SyncResult> = slots
            .into_iter()
            .zip(refs)
            .map(|(slot, repo)| {
                slot.unwrap_or_else(|| {
                    SyncResult::internal_error(repo, "repository task did not report a result")
                })
            })
            .collect();
        emit_sync_finished(run_id, &results, started.elapsed());
        results
    }
}

/// Everything one repository's lifecycle needs, owned by its task.
struct RepoTask {
    repo: RepositoryRef,
    git: Box<dyn GitRepository>,
    classifier: Arc<dyn ConflictClassifier>,
    options: RunOptions,
    commit_message: String,
}

impl RepoTask {
    async fn run(self) -> SyncResult {
        let repo = &self.repo;

        if self.options.fetch {
            if let Err(err) = self.git.fetch_remote().await {
                return error_result(repo, None, &err);
            }
        }

        let mut state = match self.git.inspect().await {
            Ok(state) => state,
            Err(err) => return error_result(repo, None, &err),
        };

        let mut committed = false;
        let mut projected = false;
        if self.options.auto_commit
            && state.has_local_changes()
            && state.has_tracking_branch()
            && !state.conflicted
        {
            if self.options.dry_run {
                state = state.assuming_committed();
                projected = true;
            } else {
                match self.git.commit_all(&self.commit_message).await {
                    Ok(true) => {
                        committed = true;
                        state = match self.git.inspect().await {
                            Ok(state) => state,
                            Err(err) => {
                                return error_result(repo, None, &err).with_committed(true)
                            }
                        };
                    }
                    Ok(false) => {}
                    Err(err) => return error_result(repo, None, &err),
                }
            }
        }

        let plan = SyncPlanner::plan(&state, self.options.dry_run);
        emit_repo_planned(&repo.name, &plan, &state);

        let result = self.execute(plan).await.with_committed(committed);
        if projected && result.message.is_none() {
            result.with_message("local changes would be committed first")
        } else {
            result
        }
    }

    async fn execute(&self, plan: SyncPlan) -> SyncResult {
        let repo = &self.repo;
        let action = plan.action;

        match action {
            SyncAction::SkippedNoRemote => {
                return SyncResult::skipped(repo, Some(action), REASON_NO_REMOTE)
            }
            SyncAction::SkippedDirty => {
                return SyncResult::skipped(
                    repo,
                    Some(action),
                    SyncError::DirtyWorktree.to_string(),
                )
                .with_error_kind(ErrorKind::DirtyWorktree)
            }
            SyncAction::ConflictBlocked => return self.blocked_by_unfinished_merge().await,
            SyncAction::None => return SyncResult::success(repo, action),
            _ => {}
        }

        if plan.dry_run {
            return SyncResult::success(repo, action).as_dry_run();
        }

        let mut pulled = None;
        if matches!(action, SyncAction::Pull | SyncAction::PullThenPush) {
            match self.pull_step(action).await {
                Ok(kind) => pulled = Some(kind),
                Err(result) => return result,
            }
        }

        if matches!(action, SyncAction::Push | SyncAction::PullThenPush) {
            if let Err(err) = self.git.push().await {
                let result = error_result(repo, Some(action), &err);
                return match pulled {
                    Some(kind) => result.with_pull(kind),
                    None => result,
                };
            }
        }

        let result = SyncResult::success(repo, action);
        match pulled {
            Some(kind) => result.with_pull(kind),
            None => result,
        }
    }

    /// Pull, and on conflict classify then roll back.
    async fn pull_step(&self, action: SyncAction) -> Result<PullKind, SyncResult> {
        let repo = &self.repo;
        match self.git.pull().await {
            Ok(PullOutcome::Conflicted(failure)) => {
                let info = self.classifier.classify(&failure);
                match self.git.abort_merge().await {
                    Ok(()) => {
                        emit_merge_aborted(&repo.name, info.files.len());
                        Err(SyncResult::conflict(repo, action, info)
                            .with_pull(PullKind::Conflicted))
                    }
                    Err(err) => Err(SyncResult::failed(repo, Some(action), &err)
                        .with_pull(PullKind::Conflicted)
                        .with_conflict(info)
                        .with_message(format!(
                            "merge stopped on conflicts and could not be aborted: {err}"
                        ))),
                }
            }
            Ok(outcome) => Ok(outcome.kind()),
            Err(err) => Err(error_result(repo, Some(action), &err)),
        }
    }

    /// A merge left unfinished by someone else: report it, never touch it.
    async fn blocked_by_unfinished_merge(&self) -> SyncResult {
        let repo = &self.repo;
        let action = SyncAction::ConflictBlocked;
        match self.git.pending_conflicts().await {
            Ok(failure) => SyncResult::conflict(repo, action, self.classifier.classify(&failure))
                .with_message("unfinished merge in progress, resolve or abort it manually"),
            Err(err) => error_result(repo, Some(action), &err),
        }
    }
}

/// A dirty-tree refusal is a skip; everything else is an error.
fn error_result(repo: &RepositoryRef, action: Option<SyncAction>, err: &SyncError) -> SyncResult {
    if err.kind() == ErrorKind::DirtyWorktree {
        SyncResult::skipped(repo, action, err.to_string()).with_error_kind(ErrorKind::DirtyWorktree)
    } else {
        SyncResult::failed(repo, action, err)
    }
}
