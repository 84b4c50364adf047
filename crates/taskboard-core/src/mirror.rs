use tracing::debug;

use crate::store::{ChangeEvent, compare_for_listing};
use crate::task::{Task, TaskId, UserId};

/// Local, eventually consistent copy of the signed-in user's tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskMirror {
    tasks: Vec<Task>,
}

impl TaskMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| &task.id == id)
    }

    pub fn replace_all(&mut self, mut tasks: Vec<Task>) {
        tasks.sort_by(compare_for_listing);
        self.tasks = tasks;
    }

    /// Replaces the task with the same id, or appends it.
    pub fn upsert(&mut self, task: Task) {
        match self.get_mut(&task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let idx = self.tasks.iter().position(|task| &task.id == id)?;
        Some(self.tasks.remove(idx))
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Applies a pushed change. Events for other owners are ignored, and an
    /// update for an unknown task is dropped rather than inserted.
    pub fn apply_change(&mut self, owner: &UserId, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Inserted(task) => {
                if &task.user_id != owner {
                    return false;
                }
                debug!(task_id = %task.id, "mirror insert");
                self.upsert(task);
                true
            }
            ChangeEvent::Updated(task) => {
                if &task.user_id != owner {
                    return false;
                }
                match self.get_mut(&task.id) {
                    Some(existing) => {
                        debug!(task_id = %task.id, "mirror update");
                        *existing = task;
                        true
                    }
                    None => false,
                }
            }
            ChangeEvent::Deleted(id) => {
                debug!(task_id = %id, "mirror delete");
                self.remove(&id).is_some()
            }
        }
    }
}
