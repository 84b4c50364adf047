//! In-memory collaborators with failure injection, for tests and demos.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::BoardError;
use crate::store::{
    BlobStore, ChangeEvent, ChangeFeed, IdentityProvider, TaskQuery, TaskStore,
    compare_for_listing,
};
use crate::task::{NewTask, Task, TaskId, TaskPatch, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Select,
    Get,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct FailurePlan {
    remaining: HashMap<StoreOp, usize>,
}

impl FailurePlan {
    fn take(&mut self, op: StoreOp) -> bool {
        match self.remaining.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    failures: Mutex<FailurePlan>,
    feed: ChangeFeed,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::new())
    }

    /// A small capacity makes slow subscribers lag quickly.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self::with_feed(ChangeFeed::with_capacity(capacity))
    }

    fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            failures: Mutex::new(FailurePlan::default()),
            feed,
            clock: Mutex::new(None),
        }
    }

    /// Makes the next `count` calls of `op` fail with a store error.
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        *self.failures.lock().remaining.entry(op).or_default() += count;
    }

    /// Fixes `created_at` for inserted rows.
    pub fn set_clock(&self, now: DateTime<Utc>) {
        *self.clock.lock() = Some(now);
    }

    /// Adds a row without publishing a change.
    pub fn seed(&self, task: Task) {
        self.tasks.lock().push(task);
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    fn check(&self, op: StoreOp) -> Result<(), BoardError> {
        if self.failures.lock().take(op) {
            return Err(BoardError::Store(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn select(&self, query: &TaskQuery) -> Result<Vec<Task>, BoardError> {
        self.check(StoreOp::Select)?;
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .iter()
            .filter(|task| query.matches(task))
            .cloned()
            .collect();
        tasks.sort_by(compare_for_listing);
        Ok(tasks)
    }

    async fn get(&self, id: &TaskId) -> Result<Task, BoardError> {
        self.check(StoreOp::Get)?;
        self.tasks
            .lock()
            .iter()
            .find(|task| &task.id == id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.clone()))
    }

    async fn insert(&self, task: NewTask) -> Result<Task, BoardError> {
        self.check(StoreOp::Insert)?;
        let created_at = (*self.clock.lock()).unwrap_or_else(Utc::now);
        let task = task.into_task(TaskId::new_random(), created_at);
        self.tasks.lock().push(task.clone());
        self.feed.publish(ChangeEvent::Inserted(task.clone()));
        Ok(task)
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), BoardError> {
        self.check(StoreOp::Update)?;
        let updated = {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .iter_mut()
                .find(|task| &task.id == id)
                .ok_or_else(|| BoardError::NotFound(id.clone()))?;
            patch.apply_to(task);
            task.clone()
        };
        self.feed.publish(ChangeEvent::Updated(updated));
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), BoardError> {
        self.check(StoreOp::Delete)?;
        {
            let mut tasks = self.tasks.lock();
            let idx = tasks
                .iter()
                .position(|task| &task.id == id)
                .ok_or_else(|| BoardError::NotFound(id.clone()))?;
            tasks.remove(idx);
        }
        self.feed.publish(ChangeEvent::Deleted(id.clone()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentity {
    user: Mutex<Option<User>>,
}

impl MemoryIdentity {
    pub fn signed_in(user: User) -> Self {
        Self {
            user: Mutex::new(Some(user)),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: User) {
        *self.user.lock() = Some(user);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn current_user(&self) -> Result<Option<User>, BoardError> {
        Ok(self.user.lock().clone())
    }

    async fn sign_out(&self) -> Result<(), BoardError> {
        *self.user.lock() = None;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryBlobStore {
    base: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_uploads: Mutex<usize>,
    failing_removes: Mutex<usize>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://todo-images")
    }
}

impl MemoryBlobStore {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failing_uploads: Mutex::new(0),
            failing_removes: Mutex::new(0),
        }
    }

    pub fn fail_next_uploads(&self, count: usize) {
        *self.failing_uploads.lock() += count;
    }

    pub fn fail_next_removes(&self, count: usize) {
        *self.failing_removes.lock() += count;
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }
}

fn take_failure(counter: &Mutex<usize>) -> bool {
    let mut left = counter.lock();
    if *left > 0 {
        *left -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), BoardError> {
        if take_failure(&self.failing_uploads) {
            return Err(BoardError::Blob(format!("injected upload failure for {path}")));
        }
        self.objects.lock().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn remove(&self, paths: &[String]) -> Result<(), BoardError> {
        if take_failure(&self.failing_removes) {
            return Err(BoardError::Blob("injected remove failure".to_string()));
        }
        let mut objects = self.objects.lock();
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::UserId;

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryTaskStore::new();
        store.fail_next(StoreOp::Insert, 1);
        let draft = NewTask::pending("Buy milk", None, None, UserId::from("u1")).unwrap();

        assert!(matches!(
            store.insert(draft.clone()).await,
            Err(BoardError::Store(_))
        ));
        assert!(store.insert(draft).await.is_ok());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn blob_failures_are_consumed() {
        let blobs = MemoryBlobStore::default();
        blobs.fail_next_uploads(1);
        assert!(blobs.upload("u1/a.png", b"x").await.is_err());
        blobs.upload("u1/a.png", b"x").await.unwrap();
        assert!(blobs.contains("u1/a.png"));
        assert_eq!(blobs.public_url("u1/a.png"), "memory://todo-images/u1/a.png");
    }
}
