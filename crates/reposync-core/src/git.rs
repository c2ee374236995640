//! Handle over one git working directory.
//!
//! [`GitRepository`] is the only way the orchestrator touches a repository.
//! [`GitCli`] drives the `git` executable; every invocation is bounded by the
//! configured timeout and the child is killed if the timeout fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GitResult, Rollback, SyncError};
use crate::model::{MergeFailure, PullOutcome, RepositoryRef, RepositoryState};

/// Read-only and mutating operations against one working directory.
#[async_trait]
pub trait GitRepository: Send + Sync {
    /// Update remote-tracking refs. Never touches the working tree.
    async fn fetch_remote(&self) -> GitResult<()>;

    /// Snapshot branch, divergence and dirtiness. Never mutates.
    async fn inspect(&self) -> GitResult<RepositoryState>;

    /// Merge the tracking branch. Refuses over uncommitted changes.
    async fn pull(&self) -> GitResult<PullOutcome>;

    /// Push the current branch to its tracking branch. Never forced.
    async fn push(&self) -> GitResult<()>;

    /// Roll back a merge stopped on conflicts.
    async fn abort_merge(&self) -> GitResult<()>;

    /// Stage everything and commit. `false` when there was nothing to commit.
    async fn commit_all(&self, message: &str) -> GitResult<bool>;

    /// Unmerged entries left behind by an earlier, unfinished merge.
    async fn pending_conflicts(&self) -> GitResult<MergeFailure>;
}

/// Builds one [`GitRepository`] per repository in a run.
pub trait RepositoryOpener: Send + Sync {
    fn open(&self, repo: &RepositoryRef) -> Box<dyn GitRepository>;
}

/// Opens [`GitCli`] handles with a shared command timeout.
#[derive(Debug, Clone)]
pub struct GitCliOpener {
    timeout: Duration,
}

impl GitCliOpener {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RepositoryOpener for GitCliOpener {
    fn open(&self, repo: &RepositoryRef) -> Box<dyn GitRepository> {
        Box::new(GitCli::new(&repo.path, self.timeout))
    }
}

/// Captured output of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// [`GitRepository`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(dir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> GitResult<GitOutput> {
        let operation = operation_name(args);
        debug!(dir = %self.dir.display(), command = %args.join(" "), "running git");

        // Paths in status output stay raw UTF-8 instead of octal-escaped.
        let child = Command::new("git")
            .args(["-c", "core.quotePath=false"])
            .args(args)
            .current_dir(&self.dir)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SyncError::Timeout {
                operation,
                after: self.timeout,
            })??;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and turn a non-zero exit into a classified error.
    async fn git_ok(&self, args: &[&str]) -> GitResult<String> {
        let out = self.git(args).await?;
        if !out.success {
            return Err(classify_failure(&operation_name(args), &out.combined()));
        }
        Ok(out.stdout)
    }

    async fn config_value(&self, key: &str) -> GitResult<Option<String>> {
        let out = self.git(&["config", "--get", key]).await?;
        Ok(Some(out.stdout.trim().to_string()).filter(|v| out.success && !v.is_empty()))
    }

    /// `(remote, merge ref)` of the current branch, if it tracks one.
    async fn tracking(&self) -> GitResult<Option<(String, String)>> {
        let head = self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        if !head.success {
            return Ok(None);
        }
        let branch = head.stdout.trim().to_string();
        let remote = self.config_value(&format!("branch.{branch}.remote")).await?;
        let merge = self.config_value(&format!("branch.{branch}.merge")).await?;
        Ok(remote.zip(merge))
    }

    /// Put the tree back at `start` after a merge that neither completed nor
    /// stopped on conflicts. A killed merge may or may not have written
    /// `MERGE_HEAD`, so both ways out are needed.
    async fn roll_back_merge(&self, start: &str, cause: SyncError) -> SyncError {
        let merging = matches!(
            self.git(&["rev-parse", "-q", "--verify", "MERGE_HEAD"]).await,
            Ok(out) if out.success
        );
        let restored = if merging {
            self.git_ok(&["merge", "--abort"]).await
        } else {
            self.git_ok(&["reset", "--merge", start]).await
        };
        let rollback = match restored {
            Ok(_) => Rollback::Restored,
            Err(err) => {
                warn!(
                    dir = %self.dir.display(),
                    error = %err,
                    "could not roll back interrupted merge"
                );
                Rollback::Failed
            }
        };
        SyncError::InterruptedMerge {
            cause: Box::new(cause),
            rollback,
        }
    }

    async fn porcelain_status(&self) -> GitResult<String> {
        self.git_ok(&["--no-optional-locks", "status", "--porcelain"])
            .await
    }
}

#[async_trait]
impl GitRepository for GitCli {
    async fn fetch_remote(&self) -> GitResult<()> {
        match self.tracking().await? {
            Some((remote, _)) if remote != "." => {
                self.git_ok(&["fetch", "--prune", remote.as_str()]).await?;
                Ok(())
            }
            _ => {
                debug!(dir = %self.dir.display(), "no tracking remote, fetch skipped");
                Ok(())
            }
        }
    }

    async fn inspect(&self) -> GitResult<RepositoryState> {
        let raw = self
            .git_ok(&["--no-optional-locks", "status", "--porcelain=v2", "--branch"])
            .await?;
        Ok(parse_status_v2(&raw))
    }

    async fn pull(&self) -> GitResult<PullOutcome> {
        let tracked_changes = self
            .git_ok(&[
                "--no-optional-locks",
                "status",
                "--porcelain",
                "--untracked-files=no",
            ])
            .await?;
        if !tracked_changes.trim().is_empty() {
            return Err(SyncError::DirtyWorktree);
        }

        let start = self.git_ok(&["rev-parse", "--verify", "HEAD"]).await?;
        let start = start.trim();

        let out = match self.git(&["merge", "--no-edit", "@{upstream}"]).await {
            Ok(out) => out,
            Err(err) => return Err(self.roll_back_merge(start, err).await),
        };
        if out.success {
            return Ok(merge_outcome(&out.stdout));
        }

        let status = self.porcelain_status().await?;
        if has_unmerged_entries(&status) || out.stdout.contains("CONFLICT") {
            return Ok(PullOutcome::Conflicted(MergeFailure {
                output: out.combined(),
                status,
            }));
        }
        let err = classify_failure("merge", &out.combined());
        Err(self.roll_back_merge(start, err).await)
    }

    async fn push(&self) -> GitResult<()> {
        let (remote, merge_ref) =
            self.tracking()
                .await?
                .ok_or_else(|| SyncError::CommandFailed {
                    command: "push".to_string(),
                    stderr: "current branch has no tracking branch".to_string(),
                })?;
        let refspec = format!("HEAD:{merge_ref}");
        self.git_ok(&["push", "--porcelain", remote.as_str(), refspec.as_str()])
            .await?;
        Ok(())
    }

    async fn abort_merge(&self) -> GitResult<()> {
        self.git_ok(&["merge", "--abort"]).await?;
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> GitResult<bool> {
        self.git_ok(&["add", "-A"]).await?;
        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        if staged.success {
            return Ok(false);
        }
        self.git_ok(&["commit", "--quiet", "-m", message]).await?;
        Ok(true)
    }

    async fn pending_conflicts(&self) -> GitResult<MergeFailure> {
        Ok(MergeFailure {
            output: String::new(),
            status: self.porcelain_status().await?,
        })
    }
}

/// First non-option argument, used to label errors.
fn operation_name(args: &[&str]) -> String {
    let sub = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .copied()
        .unwrap_or("");
    format!("git {sub}")
}

const AUTH_MARKERS: [&str; 8] = [
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "invalid username or password",
    "terminal prompts disabled",
    "the requested url returned error: 403",
    "the requested url returned error: 401",
];

const NETWORK_MARKERS: [&str; 9] = [
    "could not resolve host",
    "unable to access",
    "connection refused",
    "connection timed out",
    "connection reset",
    "network is unreachable",
    "failed to connect",
    "could not read from remote repository",
    "the remote end hung up unexpectedly",
];

const REJECTED_MARKERS: [&str; 3] = ["[rejected]", "non-fast-forward", "(fetch first)"];

/// Map git's output for a failed command to a [`SyncError`].
///
/// Auth markers are checked before network markers: an ssh key rejection
/// also prints "could not read from remote repository".
pub fn classify_failure(command: &str, output: &str) -> SyncError {
    let lower = output.to_ascii_lowercase();
    let detail = first_meaningful_line(output);
    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        SyncError::Auth(detail)
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        SyncError::Network(detail)
    } else if REJECTED_MARKERS.iter().any(|m| lower.contains(m)) {
        SyncError::RejectedNonFastForward(detail)
    } else {
        SyncError::CommandFailed {
            command: command.trim_start_matches("git ").to_string(),
            stderr: output.trim().to_string(),
        }
    }
}

/// Prefer git's `fatal:`/`error:` line over hints and progress noise.
fn first_meaningful_line(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .find(|l| l.starts_with("fatal:") || l.starts_with("error:") || l.contains("[rejected]"))
        .or_else(|| lines.first())
        .map(|l| l.to_string())
        .unwrap_or_default()
}

fn merge_outcome(stdout: &str) -> PullOutcome {
    let lower = stdout.to_ascii_lowercase();
    if lower.contains("already up to date") || lower.contains("already up-to-date") {
        PullOutcome::AlreadyUpToDate
    } else if stdout.contains("Fast-forward") {
        PullOutcome::FastForwarded
    } else {
        PullOutcome::Merged
    }
}

fn has_unmerged_entries(porcelain_v1: &str) -> bool {
    porcelain_v1.lines().any(|line| {
        matches!(
            line.get(..2),
            Some("DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU")
        )
    })
}

/// Parse `git status --porcelain=v2 --branch`.
///
/// A detached HEAD and an upstream that no longer exists (no `branch.ab`
/// line) both come back without a tracking branch.
pub fn parse_status_v2(raw: &str) -> RepositoryState {
    let mut state = RepositoryState {
        branch: "HEAD".to_string(),
        upstream: None,
        ahead: 0,
        behind: 0,
        dirty: false,
        conflicted: false,
        untracked: 0,
    };
    let mut detached = false;
    let mut has_ab = false;

    for line in raw.lines() {
        if let Some(header) = line.strip_prefix("# ") {
            let (key, value) = header.split_once(' ').unwrap_or((header, ""));
            match key {
                "branch.head" => {
                    detached = value == "(detached)";
                    if !detached {
                        state.branch = value.to_string();
                    }
                }
                "branch.upstream" => state.upstream = Some(value.to_string()),
                "branch.ab" => {
                    has_ab = true;
                    for part in value.split_whitespace() {
                        if let Some(n) = part.strip_prefix('+') {
                            state.ahead = n.parse().unwrap_or(0);
                        } else if let Some(n) = part.strip_prefix('-') {
                            state.behind = n.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        match line.split(' ').next() {
            Some("1") | Some("2") => state.dirty = true,
            Some("u") => {
                state.dirty = true;
                state.conflicted = true;
            }
            Some("?") => state.untracked += 1,
            _ => {}
        }
    }

    if detached || !has_ab {
        state.upstream = None;
        state.ahead = 0;
        state.behind = 0;
    }
    state
}
