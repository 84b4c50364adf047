use tracing::{debug, warn};

use crate::mirror::TaskMirror;
use crate::task::{Task, TaskId, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Committed,
    RolledBack,
}

/// A local change applied before the store confirms it.
///
/// `begin` applies the patch to the mirror and leaves the update `Pending`.
/// Exactly one of `commit` or `roll_back` then moves it to its final state;
/// `roll_back` restores the pre-patch copy of the task.
#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    task_id: TaskId,
    before: Task,
    after: Task,
    patch: TaskPatch,
    state: MutationState,
}

impl OptimisticUpdate {
    /// Returns `None` when the task is not in the mirror.
    pub fn begin(mirror: &mut TaskMirror, id: &TaskId, patch: TaskPatch) -> Option<Self> {
        let task = mirror.get_mut(id)?;
        let before = task.clone();
        patch.apply_to(task);
        let after = task.clone();
        debug!(task_id = %id, "optimistic update applied");

        Some(Self {
            task_id: id.clone(),
            before,
            after,
            patch,
            state: MutationState::Pending,
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn patch(&self) -> &TaskPatch {
        &self.patch
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn commit(&mut self) -> bool {
        if self.state != MutationState::Pending {
            warn!(task_id = %self.task_id, state = ?self.state, "commit on settled update ignored");
            return false;
        }
        self.state = MutationState::Committed;
        debug!(task_id = %self.task_id, "optimistic update committed");
        true
    }

    /// Restores the previous copy unless a newer change already replaced
    /// the optimistic one in the mirror.
    pub fn roll_back(&mut self, mirror: &mut TaskMirror) -> bool {
        if self.state != MutationState::Pending {
            warn!(task_id = %self.task_id, state = ?self.state, "rollback on settled update ignored");
            return false;
        }
        self.state = MutationState::RolledBack;

        if let Some(task) = mirror.get_mut(&self.task_id)
            && *task == self.after
        {
            *task = self.before.clone();
        }
        debug!(task_id = %self.task_id, "optimistic update rolled back");
        true
    }
}
