//! Sync planning: a pure decision table over [`RepositoryState`].
//!
//! Rules, first match wins:
//!
//! 1. no tracking branch → [`SyncAction::SkippedNoRemote`]
//! 2. unmerged entries from an unfinished merge → [`SyncAction::ConflictBlocked`]
//! 3. dirty working tree → [`SyncAction::SkippedDirty`]
//! 4. ahead and behind → [`SyncAction::PullThenPush`]
//! 5. behind only → [`SyncAction::Pull`]
//! 6. ahead only → [`SyncAction::Push`]
//! 7. otherwise → [`SyncAction::None`]

use serde::{Deserialize, Serialize};

use crate::model::{RepositoryState, SyncAction};

/// The planned action for one repository plus whether it may execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub action: SyncAction,
    /// Record the action without running any mutating operation.
    pub dry_run: bool,
}

impl SyncPlan {
    /// Whether executing this plan will invoke pull or push.
    pub fn will_mutate(&self) -> bool {
        !self.dry_run && self.action.is_mutating()
    }
}

/// Stateless planner.
pub struct SyncPlanner;

impl SyncPlanner {
    /// Choose exactly one action for `state`. `dry_run` never changes the
    /// chosen action, only whether it runs.
    pub fn plan(state: &RepositoryState, dry_run: bool) -> SyncPlan {
        SyncPlan {
            action: Self::decide(state),
            dry_run,
        }
    }

    fn decide(state: &RepositoryState) -> SyncAction {
        if !state.has_tracking_branch() {
            return SyncAction::SkippedNoRemote;
        }
        if state.conflicted {
            return SyncAction::ConflictBlocked;
        }
        if state.dirty {
            return SyncAction::SkippedDirty;
        }
        match (state.ahead > 0, state.behind > 0) {
            (true, true) => SyncAction::PullThenPush,
            (false, true) => SyncAction::Pull,
            (true, false) => SyncAction::Push,
            (false, false) => SyncAction::None,
        }
    }
}
