use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::BoardError;
use crate::store::{ChangeEvent, ChangeFeed, TaskQuery, TaskStore, compare_for_listing};
use crate::task::{NewTask, Task, TaskId, TaskPatch};

/// Task store backed by one JSONL file. Every write rewrites the file
/// through a temp file, so readers never see a partial state.
#[derive(Debug)]
pub struct JsonlTaskStore {
    pub data_dir: PathBuf,
    pub todos_path: PathBuf,
    write_lock: Mutex<()>,
    feed: ChangeFeed,
}

impl JsonlTaskStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let todos_path = data_dir.join("todos.data");
        if !todos_path.exists() {
            fs::write(&todos_path, "")
                .with_context(|| format!("failed to create {}", todos_path.display()))?;
        }

        info!(
            data_dir = %data_dir.display(),
            todos = %todos_path.display(),
            "opened task store"
        );

        Ok(Self {
            data_dir,
            todos_path,
            write_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
        })
    }

    fn load(&self) -> Result<Vec<Task>, BoardError> {
        load_jsonl(&self.todos_path)
            .context("failed to load todos.data")
            .map_err(|err| BoardError::Store(format!("{err:#}")))
    }

    fn save(&self, tasks: &[Task]) -> Result<(), BoardError> {
        save_jsonl_atomic(&self.todos_path, tasks)
            .context("failed to save todos.data")
            .map_err(|err| BoardError::Store(format!("{err:#}")))
    }
}

#[async_trait]
impl TaskStore for JsonlTaskStore {
    #[tracing::instrument(skip(self, query), fields(owner = %query.owner))]
    async fn select(&self, query: &TaskQuery) -> Result<Vec<Task>, BoardError> {
        let mut tasks: Vec<Task> = self
            .load()?
            .into_iter()
            .filter(|task| query.matches(task))
            .collect();
        tasks.sort_by(compare_for_listing);
        debug!(count = tasks.len(), "selected tasks");
        Ok(tasks)
    }

    async fn get(&self, id: &TaskId) -> Result<Task, BoardError> {
        self.load()?
            .into_iter()
            .find(|task| &task.id == id)
            .ok_or_else(|| BoardError::NotFound(id.clone()))
    }

    #[tracing::instrument(skip(self, task), fields(owner = %task.user_id))]
    async fn insert(&self, task: NewTask) -> Result<Task, BoardError> {
        let task = task.into_task(TaskId::new_random(), Utc::now());
        {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load()?;
            tasks.push(task.clone());
            self.save(&tasks)?;
        }
        info!(task_id = %task.id, "inserted task");
        self.feed.publish(ChangeEvent::Inserted(task.clone()));
        Ok(task)
    }

    #[tracing::instrument(skip(self, patch), fields(task_id = %id))]
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), BoardError> {
        let updated = {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load()?;
            let task = tasks
                .iter_mut()
                .find(|task| &task.id == id)
                .ok_or_else(|| BoardError::NotFound(id.clone()))?;
            patch.apply_to(task);
            let updated = task.clone();
            self.save(&tasks)?;
            updated
        };
        debug!("updated task");
        self.feed.publish(ChangeEvent::Updated(updated));
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: &TaskId) -> Result<(), BoardError> {
        {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load()?;
            let idx = tasks
                .iter()
                .position(|task| &task.id == id)
                .ok_or_else(|| BoardError::NotFound(id.clone()))?;
            tasks.remove(idx);
            self.save(&tasks)?;
        }
        info!("deleted task");
        self.feed.publish(ChangeEvent::Deleted(id.clone()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[tracing::instrument(skip(path))]
pub(crate) fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
pub(crate) fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

/// Writes `bytes` next to `path` and renames the temp file into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::UserId;

    fn new_task(title: &str, owner: &str) -> NewTask {
        NewTask::pending(title, None, None, UserId::from(owner)).unwrap()
    }

    #[tokio::test]
    async fn tasks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTaskStore::open(dir.path()).unwrap();
        let task = store.insert(new_task("Buy milk", "u1")).await.unwrap();
        store
            .update(&task.id, &TaskPatch::completed(true))
            .await
            .unwrap();

        let reopened = JsonlTaskStore::open(dir.path()).unwrap();
        let loaded = reopened.get(&task.id).await.unwrap();
        assert_eq!(loaded.title, "Buy milk");
        assert!(loaded.completed);
        assert_eq!(loaded.created_at, task.created_at);
    }

    #[tokio::test]
    async fn select_is_scoped_to_the_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTaskStore::open(dir.path()).unwrap();
        store.insert(new_task("mine", "u1")).await.unwrap();
        store.insert(new_task("theirs", "u2")).await.unwrap();

        let mine = store
            .select(&TaskQuery::for_owner(UserId::from("u1")))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "mine");
    }

    #[tokio::test]
    async fn writes_are_published_on_the_feed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTaskStore::open(dir.path()).unwrap();
        let mut rx = store.subscribe();

        let task = store.insert(new_task("Buy milk", "u1")).await.unwrap();
        store.delete(&task.id).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Inserted(t) if t.id == task.id));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::Deleted(task.id.clone()));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTaskStore::open(dir.path()).unwrap();
        let id = TaskId::from("missing");
        assert!(matches!(store.get(&id).await, Err(BoardError::NotFound(_))));
        assert!(matches!(
            store.update(&id, &TaskPatch::completed(true)).await,
            Err(BoardError::NotFound(_))
        ));
        assert!(matches!(store.delete(&id).await, Err(BoardError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_line_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTaskStore::open(dir.path()).unwrap();
        fs::write(&store.todos_path, "{not json}\n").unwrap();
        let err = store
            .select(&TaskQuery::for_owner(UserId::from("u1")))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Store(msg) if msg.contains("line 1")));
    }
}
