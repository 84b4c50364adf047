//! Collaborator contracts: the task store with its change feed, the
//! identity provider and the blob store.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::BoardError;
use crate::task::{NewTask, Task, TaskId, TaskPatch, User, UserId};

const DEFAULT_FEED_CAPACITY: usize = 256;

/// A row-level change pushed by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(Task),
    Updated(Task),
    Deleted(TaskId),
}

impl ChangeEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            ChangeEvent::Inserted(task) | ChangeEvent::Updated(task) => &task.id,
            ChangeEvent::Deleted(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted(_) => "insert",
            ChangeEvent::Updated(_) => "update",
            ChangeEvent::Deleted(_) => "delete",
        }
    }
}

/// Broadcast fan-out for [`ChangeEvent`]s. Publishing never blocks; slow
/// subscribers lag instead.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::debug!(kind = event.kind(), task_id = %event.task_id(), "publishing change");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Selection over one owner's tasks. Due bounds exclude tasks without a
/// due date, the way a SQL comparison against NULL does.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskQuery {
    pub owner: UserId,
    pub due_from: Option<DateTime<Utc>>,
    pub due_until: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
}

impl TaskQuery {
    pub fn for_owner(owner: UserId) -> Self {
        Self {
            owner,
            due_from: None,
            due_until: None,
            due_before: None,
            completed: None,
        }
    }

    pub fn due_from(mut self, at: DateTime<Utc>) -> Self {
        self.due_from = Some(at);
        self
    }

    pub fn due_until(mut self, at: DateTime<Utc>) -> Self {
        self.due_until = Some(at);
        self
    }

    pub fn due_before(mut self, at: DateTime<Utc>) -> Self {
        self.due_before = Some(at);
        self
    }

    pub fn completed(mut self, value: bool) -> Self {
        self.completed = Some(value);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if task.user_id != self.owner {
            return false;
        }
        if let Some(completed) = self.completed
            && task.completed != completed
        {
            return false;
        }

        let has_due_bound =
            self.due_from.is_some() || self.due_until.is_some() || self.due_before.is_some();
        let Some(due) = task.due_date else {
            return !has_due_bound;
        };

        self.due_from.is_none_or(|from| due >= from)
            && self.due_until.is_none_or(|until| due <= until)
            && self.due_before.is_none_or(|before| due < before)
    }
}

/// Store read order: due date ascending with undated tasks last, then
/// newest first.
pub fn compare_for_listing(left: &Task, right: &Task) -> Ordering {
    let by_due = match (left.due_date, right.due_date) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_due.then_with(|| right.created_at.cmp(&left.created_at))
}

/// Object path of a public blob URL: its last two path segments
/// (`<user>/<file>`).
pub fn object_path_from_url(url: &str) -> String {
    let segments: Vec<&str> = url.trim_end_matches('/').rsplit('/').take(2).collect();
    segments.into_iter().rev().collect::<Vec<_>>().join("/")
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn select(&self, query: &TaskQuery) -> Result<Vec<Task>, BoardError>;

    async fn get(&self, id: &TaskId) -> Result<Task, BoardError>;

    async fn insert(&self, task: NewTask) -> Result<Task, BoardError>;

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), BoardError>;

    async fn delete(&self, id: &TaskId) -> Result<(), BoardError>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<User>, BoardError>;

    async fn sign_out(&self) -> Result<(), BoardError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), BoardError>;

    fn public_url(&self, path: &str) -> String;

    async fn remove(&self, paths: &[String]) -> Result<(), BoardError>;
}
