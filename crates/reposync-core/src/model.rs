//! Sync model: repository identity, state snapshots, planned actions and results.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SyncError};

/// Identifies one local repository. Names are unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: String,
    /// Absolute path of the working directory.
    pub path: PathBuf,
    /// Owning organization, when the repository came from configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl RepositoryRef {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

/// Snapshot of a repository at decision time. Never cached across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// Current branch, or `"HEAD"` when detached.
    pub branch: String,
    /// Tracking branch, e.g. `origin/main`. `None` when absent or gone.
    pub upstream: Option<String>,
    /// Local commits not on the tracking branch.
    pub ahead: u32,
    /// Tracking-branch commits not present locally.
    pub behind: u32,
    /// Uncommitted changes to tracked files (or unmerged entries).
    pub dirty: bool,
    /// Unmerged entries left by an unfinished merge.
    #[serde(default)]
    pub conflicted: bool,
    /// Untracked files. Informational only.
    pub untracked: u32,
}

impl RepositoryState {
    /// A clean branch tracking `upstream` with the given divergence.
    pub fn tracking(
        branch: impl Into<String>,
        upstream: impl Into<String>,
        ahead: u32,
        behind: u32,
    ) -> Self {
        Self {
            branch: branch.into(),
            upstream: Some(upstream.into()),
            ahead,
            behind,
            dirty: false,
            conflicted: false,
            untracked: 0,
        }
    }

    pub fn has_tracking_branch(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn is_synchronized(&self) -> bool {
        self.ahead == 0 && self.behind == 0
    }

    /// Whether an automatic commit would have anything to record.
    pub fn has_local_changes(&self) -> bool {
        self.dirty || self.untracked > 0
    }

    /// The state an automatic commit is expected to leave behind.
    pub fn assuming_committed(&self) -> Self {
        Self {
            ahead: self.ahead + 1,
            dirty: false,
            untracked: 0,
            ..self.clone()
        }
    }
}

/// The single action chosen for a repository in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    None,
    Pull,
    Push,
    PullThenPush,
    ConflictBlocked,
    SkippedDirty,
    SkippedNoRemote,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::None => "none",
            SyncAction::Pull => "pull",
            SyncAction::Push => "push",
            SyncAction::PullThenPush => "pull_then_push",
            SyncAction::ConflictBlocked => "conflict_blocked",
            SyncAction::SkippedDirty => "skipped_dirty",
            SyncAction::SkippedNoRemote => "skipped_no_remote",
        }
    }

    /// Actions that mutate the working tree or the remote.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            SyncAction::Pull | SyncAction::Push | SyncAction::PullThenPush
        )
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Conflict,
    Skipped,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Skipped => "skipped",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw output of a merge that stopped on conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeFailure {
    /// Combined stdout and stderr of the merge command.
    pub output: String,
    /// `git status --porcelain` taken while the merge was still in progress.
    pub status: String,
}

/// Result of a pull attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    FastForwarded,
    Merged,
    AlreadyUpToDate,
    Conflicted(MergeFailure),
}

impl PullOutcome {
    pub fn kind(&self) -> PullKind {
        match self {
            PullOutcome::FastForwarded => PullKind::FastForwarded,
            PullOutcome::Merged => PullKind::Merged,
            PullOutcome::AlreadyUpToDate => PullKind::AlreadyUpToDate,
            PullOutcome::Conflicted(_) => PullKind::Conflicted,
        }
    }
}

/// Serialisable tag of a [`PullOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullKind {
    FastForwarded,
    Merged,
    AlreadyUpToDate,
    Conflicted,
}

impl PullKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullKind::FastForwarded => "fast_forwarded",
            PullKind::Merged => "merged",
            PullKind::AlreadyUpToDate => "already_up_to_date",
            PullKind::Conflicted => "conflicted",
        }
    }
}

/// Category of a merge conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Modified on both sides.
    Content,
    /// Deleted on one side, modified on the other.
    DeleteModify,
    /// Reported under git's rename detection.
    Rename,
    Unknown,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Content => "content",
            ConflictKind::DeleteModify => "delete_modify",
            ConflictKind::Rename => "rename",
            ConflictKind::Unknown => "unknown",
        }
    }
}

/// One conflicting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictedPath {
    pub path: String,
    pub kind: ConflictKind,
}

/// Conflict details for a CONFLICT result. Built only by a conflict classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Conflicting paths in the order git reported them.
    pub files: Vec<ConflictedPath>,
    /// Overall kind of the conflict.
    pub kind: ConflictKind,
}

impl ConflictInfo {
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

/// Outcome of one repository in one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub name: String,
    pub path: PathBuf,
    /// The action that was planned; `None` when the repository never reached planning.
    pub action: Option<SyncAction>,
    pub status: SyncStatus,
    /// The action was recorded but not executed.
    #[serde(default)]
    pub dry_run: bool,
    /// Local changes were committed before syncing.
    #[serde(default)]
    pub committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<PullKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Skip reason or error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResult {
    fn base(repo: &RepositoryRef, action: Option<SyncAction>, status: SyncStatus) -> Self {
        Self {
            name: repo.name.clone(),
            path: repo.path.clone(),
            action,
            status,
            dry_run: false,
            committed: false,
            pull: None,
            conflict: None,
            error_kind: None,
            message: None,
        }
    }

    pub fn success(repo: &RepositoryRef, action: SyncAction) -> Self {
        Self::base(repo, Some(action), SyncStatus::Success)
    }

    pub fn skipped(
        repo: &RepositoryRef,
        action: Option<SyncAction>,
        reason: impl Into<String>,
    ) -> Self {
        Self::base(repo, action, SyncStatus::Skipped).with_message(reason)
    }

    pub fn conflict(repo: &RepositoryRef, action: SyncAction, info: ConflictInfo) -> Self {
        Self::base(repo, Some(action), SyncStatus::Conflict).with_conflict(info)
    }

    pub fn failed(repo: &RepositoryRef, action: Option<SyncAction>, err: &SyncError) -> Self {
        let mut result = Self::base(repo, action, SyncStatus::Error);
        result.error_kind = Some(err.kind());
        result.message = Some(err.to_string());
        result
    }

    pub fn internal_error(repo: &RepositoryRef, detail: impl Into<String>) -> Self {
        let mut result = Self::base(repo, None, SyncStatus::Error);
        result.error_kind = Some(ErrorKind::Internal);
        result.message = Some(detail.into());
        result
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_pull(mut self, pull: PullKind) -> Self {
        self.pull = Some(pull);
        self
    }

    pub fn with_conflict(mut self, info: ConflictInfo) -> Self {
        self.conflict = Some(info);
        self
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_committed(mut self, committed: bool) -> Self {
        self.committed = committed;
        self
    }

    pub fn as_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}
