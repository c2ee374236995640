//! `GitCli` against real repositories: a bare remote plus clones in a temp dir.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use reposync_core::{
    ConflictClassifier, ConflictInfo, ConflictKind, ErrorKind, GitCli, GitCliOpener,
    GitRepository, GitStatusClassifier, PullKind, PullOutcome, RepositoryRef, Rollback,
    RunOptions, SyncAction, SyncConfig, SyncError, SyncOrchestrator, SyncStatus,
};

const TIMEOUT: Duration = Duration::from_secs(30);

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn configure_identity(dir: &Path) {
    run_git(dir, &["config", "user.name", "test-user"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    run_git(dir, &["config", "commit.gpgsign", "false"]);
}

fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(file), contents).unwrap();
    run_git(dir, &["add", file]);
    run_git(dir, &["commit", "-m", message]);
}

/// A bare `remote.git` with one commit on `main`.
struct Fixture {
    dir: tempfile::TempDir,
    remote: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        run_git(&remote, &["init", "--bare", "--quiet"]);
        run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        run_git(&seed, &["init", "--quiet"]);
        run_git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(&seed);
        commit_file(&seed, "README.md", "hello\n", "initial");
        run_git(
            &seed,
            &["remote", "add", "origin", remote.to_str().unwrap()],
        );
        run_git(&seed, &["push", "--quiet", "-u", "origin", "main"]);

        Self { dir, remote }
    }

    fn clone(&self, name: &str) -> PathBuf {
        run_git(
            self.dir.path(),
            &["clone", "--quiet", self.remote.to_str().unwrap(), name],
        );
        let path = self.dir.path().join(name);
        configure_identity(&path);
        path
    }
}

fn cli(path: &Path) -> GitCli {
    GitCli::new(path, TIMEOUT)
}

/// Fetch, pull into a conflict, classify it, then abort and check the tree.
async fn pull_conflict_and_abort(git: &GitCli) -> ConflictInfo {
    git.fetch_remote().await.unwrap();
    let failure = match git.pull().await.unwrap() {
        PullOutcome::Conflicted(failure) => failure,
        other => panic!("expected conflict, got {other:?}"),
    };
    let info = GitStatusClassifier::new().classify(&failure);

    git.abort_merge().await.unwrap();
    let after = git.inspect().await.unwrap();
    assert!(!after.dirty);
    assert!(!after.conflicted);
    info
}

#[tokio::test]
async fn test_fresh_clone_is_synchronized() {
    let fx = Fixture::new();
    let work = fx.clone("work");

    let git = cli(&work);
    git.fetch_remote().await.unwrap();
    let state = git.inspect().await.unwrap();

    assert_eq!(state.branch, "main");
    assert_eq!(state.upstream.as_deref(), Some("origin/main"));
    assert!(state.is_synchronized());
    assert!(!state.dirty);
}

#[tokio::test]
async fn test_fetch_then_fast_forward_pull() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    commit_file(&other, "a.txt", "from other\n", "other change");
    run_git(&other, &["push", "--quiet"]);

    let git = cli(&work);
    assert_eq!(git.inspect().await.unwrap().behind, 0);
    git.fetch_remote().await.unwrap();
    assert_eq!(git.inspect().await.unwrap().behind, 1);

    let outcome = git.pull().await.unwrap();
    assert_eq!(outcome.kind(), PullKind::FastForwarded);
    assert!(git.inspect().await.unwrap().is_synchronized());
    assert!(work.join("a.txt").exists());

    assert_eq!(git.pull().await.unwrap(), PullOutcome::AlreadyUpToDate);
}

#[tokio::test]
async fn test_push_local_commit() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    commit_file(&work, "b.txt", "local\n", "local change");

    let git = cli(&work);
    assert_eq!(git.inspect().await.unwrap().ahead, 1);
    git.push().await.unwrap();
    git.fetch_remote().await.unwrap();
    assert!(git.inspect().await.unwrap().is_synchronized());

    let check = fx.clone("check");
    assert!(check.join("b.txt").exists());
}

#[tokio::test]
async fn test_push_without_fetch_is_rejected() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    commit_file(&other, "c.txt", "theirs\n", "their change");
    run_git(&other, &["push", "--quiet"]);
    commit_file(&work, "d.txt", "ours\n", "our change");

    let err = cli(&work).push().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RejectedNonFastForward);
}

#[tokio::test]
async fn test_conflicting_pull_is_classified_and_aborted() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    commit_file(&other, "README.md", "their line\n", "their readme");
    run_git(&other, &["push", "--quiet"]);
    commit_file(&work, "README.md", "our line\n", "our readme");

    let git = cli(&work);
    git.fetch_remote().await.unwrap();
    let state = git.inspect().await.unwrap();
    assert_eq!((state.ahead, state.behind), (1, 1));

    let failure = match git.pull().await.unwrap() {
        PullOutcome::Conflicted(failure) => failure,
        other => panic!("expected conflict, got {other:?}"),
    };
    let info = GitStatusClassifier::new().classify(&failure);
    assert_eq!(info.paths(), vec!["README.md"]);
    assert_eq!(info.kind, ConflictKind::Content);
    assert!(git.inspect().await.unwrap().conflicted);

    git.abort_merge().await.unwrap();
    let after = git.inspect().await.unwrap();
    assert!(!after.dirty);
    assert!(!after.conflicted);
    assert_eq!((after.ahead, after.behind), (1, 1));
    assert_eq!(
        std::fs::read_to_string(work.join("README.md")).unwrap(),
        "our line\n"
    );
}

#[tokio::test]
async fn test_modify_delete_conflict_is_classified() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    run_git(&other, &["rm", "--quiet", "README.md"]);
    run_git(&other, &["commit", "--quiet", "-m", "drop readme"]);
    run_git(&other, &["push", "--quiet"]);
    commit_file(&work, "README.md", "edited\n", "edit readme");

    let info = pull_conflict_and_abort(&cli(&work)).await;
    assert_eq!(info.paths(), vec!["README.md"]);
    assert_eq!(info.files[0].kind, ConflictKind::DeleteModify);
    assert_eq!(info.kind, ConflictKind::DeleteModify);
}

#[tokio::test]
async fn test_rename_delete_conflict_is_classified() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    run_git(&other, &["rm", "--quiet", "README.md"]);
    run_git(&other, &["commit", "--quiet", "-m", "drop readme"]);
    run_git(&other, &["push", "--quiet"]);
    run_git(&work, &["mv", "README.md", "NOTES.md"]);
    run_git(&work, &["commit", "--quiet", "-m", "rename readme"]);

    let info = pull_conflict_and_abort(&cli(&work)).await;
    assert!(!info.files.is_empty());
    assert_eq!(info.kind, ConflictKind::Rename);
    assert!(work.join("NOTES.md").exists());
}

#[tokio::test]
async fn test_non_ascii_conflict_path_is_reported_verbatim() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    commit_file(&other, "café.txt", "theirs\n", "their café");
    run_git(&other, &["push", "--quiet"]);
    commit_file(&work, "café.txt", "ours\n", "our café");

    let info = pull_conflict_and_abort(&cli(&work)).await;
    assert_eq!(info.paths(), vec!["café.txt"]);
    assert_eq!(info.kind, ConflictKind::Content);
}

#[cfg(unix)]
#[tokio::test]
async fn test_timed_out_merge_is_rolled_back() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let work = fx.clone("work");
    let other = fx.clone("other");
    commit_file(&other, "remote.txt", "theirs\n", "remote change");
    run_git(&other, &["push", "--quiet"]);
    commit_file(&work, "local.txt", "ours\n", "local change");

    // Holds the merge open after the index is written, until the timeout kills it.
    let hooks = work.join(".git").join("hooks");
    std::fs::create_dir_all(&hooks).unwrap();
    let hook = hooks.join("pre-merge-commit");
    std::fs::write(&hook, "#!/bin/sh\nsleep 5\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let git = GitCli::new(&work, Duration::from_secs(2));
    git.fetch_remote().await.unwrap();
    let before = git.inspect().await.unwrap();
    assert_eq!((before.ahead, before.behind), (1, 1));

    let err = git.pull().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(
        matches!(
            err,
            SyncError::InterruptedMerge {
                rollback: Rollback::Restored,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("rolled back"));

    let after = git.inspect().await.unwrap();
    assert!(!after.dirty);
    assert!(!after.conflicted);
    assert_eq!(after.untracked, 0);
    assert_eq!((after.ahead, after.behind), (1, 1));
    assert!(!work.join("remote.txt").exists());
}

#[tokio::test]
async fn test_pull_refuses_dirty_tree() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    std::fs::write(work.join("README.md"), "edited\n").unwrap();

    let git = cli(&work);
    assert!(git.inspect().await.unwrap().dirty);
    let err = git.pull().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DirtyWorktree);
    assert_eq!(
        std::fs::read_to_string(work.join("README.md")).unwrap(),
        "edited\n"
    );
}

#[tokio::test]
async fn test_repository_without_remote_has_no_tracking() {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "--quiet"]);
    configure_identity(dir.path());
    commit_file(dir.path(), "x.txt", "x\n", "only local");

    let git = cli(dir.path());
    git.fetch_remote().await.unwrap();
    let state = git.inspect().await.unwrap();
    assert!(!state.has_tracking_branch());
}

#[tokio::test]
async fn test_commit_all_stages_untracked_and_reports_nothing_to_do() {
    let fx = Fixture::new();
    let work = fx.clone("work");
    std::fs::write(work.join("new.txt"), "new\n").unwrap();

    let git = cli(&work);
    let before = git.inspect().await.unwrap();
    assert!(!before.dirty);
    assert_eq!(before.untracked, 1);

    assert!(git.commit_all("chore: test commit").await.unwrap());
    assert!(!git.commit_all("chore: test commit").await.unwrap());
    let after = git.inspect().await.unwrap();
    assert_eq!(after.ahead, 1);
    assert_eq!(after.untracked, 0);
}

#[tokio::test]
async fn test_orchestrated_run_over_real_clones() {
    let fx = Fixture::new();
    let behind = fx.clone("behind");
    let ahead = fx.clone("ahead");
    let dirty = fx.clone("dirty");

    let other = fx.clone("other");
    commit_file(&other, "e.txt", "e\n", "remote change");
    run_git(&other, &["push", "--quiet"]);
    std::fs::write(dirty.join("README.md"), "uncommitted\n").unwrap();

    // `ahead` first integrates the remote change, then adds its own commit.
    run_git(&ahead, &["pull", "--quiet", "--ff-only"]);
    commit_file(&ahead, "f.txt", "f\n", "ahead change");

    let config = Arc::new(SyncConfig::new(fx.dir.path()));
    let orch = SyncOrchestrator::new(config, Arc::new(GitCliOpener::new(TIMEOUT)));
    let refs = vec![
        RepositoryRef::new("ahead", &ahead),
        RepositoryRef::new("behind", &behind),
        RepositoryRef::new("dirty", &dirty),
    ];
    let results = orch.run(&refs, &RunOptions::default()).await;

    assert_eq!(results[0].action, Some(SyncAction::Push));
    assert_eq!(results[0].status, SyncStatus::Success);
    assert_eq!(results[1].action, Some(SyncAction::Pull));
    assert_eq!(results[1].status, SyncStatus::Success);
    assert_eq!(results[2].action, Some(SyncAction::SkippedDirty));
    assert_eq!(results[2].status, SyncStatus::Skipped);
    assert_eq!(
        std::fs::read_to_string(dirty.join("README.md")).unwrap(),
        "uncommitted\n"
    );
}
