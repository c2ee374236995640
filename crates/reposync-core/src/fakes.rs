//! In-memory git fakes for orchestrator tests.
//!
//! [`ScriptedRepository`] keeps a [`RepositoryState`] in memory and updates
//! it the way real operations would (a pull clears `behind`, a push clears
//! `ahead`), so repeated runs and re-inspection behave realistically.
//! Failures are scripted per operation by [`ErrorKind`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ErrorKind, GitResult, SyncError};
use crate::git::{GitRepository, RepositoryOpener};
use crate::model::{MergeFailure, PullOutcome, RepositoryRef, RepositoryState};

/// Operations recorded by the fakes, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitCall {
    Fetch,
    Inspect,
    Pull,
    Push,
    AbortMerge,
    CommitAll,
    PendingConflicts,
}

/// Behaviour of one fake repository.
#[derive(Debug, Clone)]
pub struct RepoScript {
    pub state: RepositoryState,
    pub fetch_error: Option<ErrorKind>,
    pub inspect_error: Option<ErrorKind>,
    /// Overrides the natural pull outcome.
    pub pull_outcome: Option<PullOutcome>,
    pub pull_error: Option<ErrorKind>,
    pub push_error: Option<ErrorKind>,
    pub abort_error: Option<ErrorKind>,
    /// Held inside `fetch_remote` to make tasks overlap.
    pub fetch_delay: Option<Duration>,
    pub panic_on_inspect: bool,
}

impl RepoScript {
    pub fn new(state: RepositoryState) -> Self {
        Self {
            state,
            fetch_error: None,
            inspect_error: None,
            pull_outcome: None,
            pull_error: None,
            push_error: None,
            abort_error: None,
            fetch_delay: None,
            panic_on_inspect: false,
        }
    }

    pub fn fetch_fails(mut self, kind: ErrorKind) -> Self {
        self.fetch_error = Some(kind);
        self
    }

    pub fn inspect_fails(mut self, kind: ErrorKind) -> Self {
        self.inspect_error = Some(kind);
        self
    }

    pub fn pull_returns(mut self, outcome: PullOutcome) -> Self {
        self.pull_outcome = Some(outcome);
        self
    }

    pub fn pull_fails(mut self, kind: ErrorKind) -> Self {
        self.pull_error = Some(kind);
        self
    }

    pub fn push_fails(mut self, kind: ErrorKind) -> Self {
        self.push_error = Some(kind);
        self
    }

    pub fn abort_fails(mut self, kind: ErrorKind) -> Self {
        self.abort_error = Some(kind);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_inspect = true;
        self
    }
}

/// Build a representative [`SyncError`] for a scripted kind.
pub fn scripted_error(kind: ErrorKind, operation: &str) -> SyncError {
    match kind {
        ErrorKind::NetworkError => SyncError::Network(format!("{operation}: could not resolve host")),
        ErrorKind::AuthError => SyncError::Auth(format!("{operation}: authentication failed")),
        ErrorKind::DirtyWorktree => SyncError::DirtyWorktree,
        ErrorKind::RejectedNonFastForward => {
            SyncError::RejectedNonFastForward(format!("{operation}: [rejected] (fetch first)"))
        }
        ErrorKind::Timeout => SyncError::Timeout {
            operation: format!("git {operation}"),
            after: Duration::from_secs(1),
        },
        ErrorKind::Io => SyncError::Io(std::io::Error::other(format!("{operation}: io failure"))),
        ErrorKind::CommandFailed | ErrorKind::Internal => SyncError::CommandFailed {
            command: operation.to_string(),
            stderr: "scripted failure".to_string(),
        },
    }
}

/// Tracks how many fakes are inside `fetch_remote` at once.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A fake working directory driven by a [`RepoScript`].
#[derive(Debug)]
pub struct ScriptedRepository {
    name: String,
    script: RepoScript,
    state: Arc<Mutex<RepositoryState>>,
    calls: Arc<Mutex<Vec<(String, GitCall)>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl ScriptedRepository {
    fn record(&self, call: GitCall) {
        self.calls.lock().unwrap().push((self.name.clone(), call));
    }

    fn fail(&self, kind: Option<ErrorKind>, operation: &str) -> GitResult<()> {
        match kind {
            Some(kind) => Err(scripted_error(kind, operation)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GitRepository for ScriptedRepository {
    async fn fetch_remote(&self) -> GitResult<()> {
        self.record(GitCall::Fetch);
        self.gauge.enter();
        if let Some(delay) = self.script.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.exit();
        self.fail(self.script.fetch_error, "fetch")
    }

    async fn inspect(&self) -> GitResult<RepositoryState> {
        self.record(GitCall::Inspect);
        if self.script.panic_on_inspect {
            panic!("scripted panic in {}", self.name);
        }
        self.fail(self.script.inspect_error, "status")?;
        Ok(self.state.lock().unwrap().clone())
    }

    async fn pull(&self) -> GitResult<PullOutcome> {
        self.record(GitCall::Pull);
        self.fail(self.script.pull_error, "merge")?;
        let mut state = self.state.lock().unwrap();
        if state.dirty {
            return Err(SyncError::DirtyWorktree);
        }
        let outcome = match &self.script.pull_outcome {
            Some(outcome) => outcome.clone(),
            None if state.behind == 0 => PullOutcome::AlreadyUpToDate,
            None if state.ahead == 0 => PullOutcome::FastForwarded,
            None => PullOutcome::Merged,
        };
        match outcome {
            PullOutcome::Conflicted(_) => {}
            PullOutcome::Merged => {
                state.behind = 0;
                state.ahead += 1;
            }
            _ => state.behind = 0,
        }
        Ok(outcome)
    }

    async fn push(&self) -> GitResult<()> {
        self.record(GitCall::Push);
        self.fail(self.script.push_error, "push")?;
        self.state.lock().unwrap().ahead = 0;
        Ok(())
    }

    async fn abort_merge(&self) -> GitResult<()> {
        self.record(GitCall::AbortMerge);
        self.fail(self.script.abort_error, "merge --abort")
    }

    async fn commit_all(&self, _message: &str) -> GitResult<bool> {
        self.record(GitCall::CommitAll);
        let mut state = self.state.lock().unwrap();
        if !state.has_local_changes() {
            return Ok(false);
        }
        *state = state.assuming_committed();
        Ok(true)
    }

    async fn pending_conflicts(&self) -> GitResult<MergeFailure> {
        self.record(GitCall::PendingConflicts);
        Ok(MergeFailure {
            output: String::new(),
            status: "UU conflicted.txt\n".to_string(),
        })
    }
}

/// Opens [`ScriptedRepository`] handles by repository name.
///
/// State persists across `open` calls so a second run sees what the first
/// one left behind.
#[derive(Debug, Default)]
pub struct ScriptedOpener {
    scripts: HashMap<String, RepoScript>,
    states: Mutex<HashMap<String, Arc<Mutex<RepositoryState>>>>,
    calls: Arc<Mutex<Vec<(String, GitCall)>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, name: impl Into<String>, script: RepoScript) -> Self {
        self.scripts.insert(name.into(), script);
        self
    }

    /// Every call, as `(repository, operation)`, in the order made.
    pub fn calls(&self) -> Vec<(String, GitCall)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made against one repository.
    pub fn calls_for(&self, name: &str) -> Vec<GitCall> {
        self.calls()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c)
            .collect()
    }

    /// Current in-memory state of a repository.
    pub fn state(&self, name: &str) -> Option<RepositoryState> {
        self.states
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.lock().unwrap().clone())
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}

impl RepositoryOpener for ScriptedOpener {
    fn open(&self, repo: &RepositoryRef) -> Box<dyn GitRepository> {
        let script = self
            .scripts
            .get(&repo.name)
            .cloned()
            .unwrap_or_else(|| panic!("no script for repository {}", repo.name));
        let state = self
            .states
            .lock()
            .unwrap()
            .entry(repo.name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(script.state.clone())))
            .clone();
        Box::new(ScriptedRepository {
            name: repo.name.clone(),
            script,
            state,
            calls: Arc::clone(&self.calls),
            gauge: Arc::clone(&self.gauge),
        })
    }
}
