//! Application state: the signed-in user, the local task mirror, the active
//! filter and view, and the notices waiting to be shown.
//!
//! A [`Board`] is the single owner of that state. Every operation takes
//! `&mut self`, applies its local effect synchronously and only then awaits
//! the collaborators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::bucket::{GroupedTodos, StatusSplit, group_by_due_date, split_by_status};
use crate::datetime::Calendar;
use crate::drag::{DropEvent, DropPlan, IgnoreReason, ViewKind, plan_drop};
use crate::error::BoardError;
use crate::filter::{self, DateFilter};
use crate::mirror::TaskMirror;
use crate::mutation::OptimisticUpdate;
use crate::store::{BlobStore, ChangeEvent, IdentityProvider, TaskStore, object_path_from_url};
use crate::task::{NewTask, Task, TaskId, TaskPatch, User, validate_title};

#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub blobs: Arc<dyn BlobStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Extension of the original file name, `bin` when it has none.
    pub fn extension(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => ext,
            _ => "bin",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageChange {
    #[default]
    Keep,
    Replace(ImageUpload),
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Full replacement of the editable fields of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEdit {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskEdit {
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            due_date: task.due_date,
        }
    }
}

pub struct Board {
    collab: Collaborators,
    calendar: Calendar,
    changes: broadcast::Receiver<ChangeEvent>,
    user: Option<User>,
    mirror: TaskMirror,
    filter: DateFilter,
    search: String,
    view: ViewKind,
    notices: Vec<Notice>,
}

impl Board {
    pub fn new(collab: Collaborators, calendar: Calendar) -> Self {
        let changes = collab.store.subscribe();
        Self {
            collab,
            calendar,
            changes,
            user: None,
            mirror: TaskMirror::new(),
            filter: DateFilter::default(),
            search: String::new(),
            view: ViewKind::default(),
            notices: Vec::new(),
        }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn mirror(&self) -> &TaskMirror {
        &self.mirror
    }

    pub fn filter(&self) -> &DateFilter {
        &self.filter
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, notice: Notice) {
        debug!(level = ?notice.level, message = %notice.message, "notice");
        self.notices.push(notice);
    }

    fn require_user(&mut self) -> Result<User, BoardError> {
        match &self.user {
            Some(user) => Ok(user.clone()),
            None => {
                self.notify(Notice::error(BoardError::NotAuthenticated.to_string()));
                Err(BoardError::NotAuthenticated)
            }
        }
    }

    /// Resolves the signed-in user and fills the mirror.
    #[tracing::instrument(skip(self, now))]
    pub async fn load(&mut self, now: DateTime<Utc>) -> Result<(), BoardError> {
        let user = match self.collab.identity.current_user().await {
            Ok(user) => user,
            Err(err) => {
                error!(error = %err, "failed to resolve session");
                self.notify(Notice::error(format!("Could not check session: {err}")));
                return Err(err);
            }
        };
        self.user = user;
        self.require_user()?;
        self.refresh(now).await
    }

    /// Replaces the mirror with a fresh read, narrowed by the active filter.
    #[tracing::instrument(skip(self, now))]
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Result<(), BoardError> {
        let user = self.require_user()?;
        let query = self.filter.store_query(&user.id, now, &self.calendar);
        match self.collab.store.select(&query).await {
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                self.mirror.replace_all(tasks);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to load tasks");
                self.notify(Notice::error(format!("Could not load tasks: {err}")));
                Err(err)
            }
        }
    }

    /// Changing the date filter triggers a refresh.
    pub async fn set_filter(
        &mut self,
        filter: DateFilter,
        now: DateTime<Utc>,
    ) -> Result<(), BoardError> {
        if self.filter == filter {
            return Ok(());
        }
        self.filter = filter;
        self.refresh(now).await
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn set_view(&mut self, view: ViewKind) {
        self.view = view;
    }

    /// Mirror contents after the date filter and the search.
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<Task> {
        filter::apply(
            self.mirror.as_slice(),
            &self.filter,
            &self.search,
            now,
            &self.calendar,
        )
    }

    pub fn status_split(&self, now: DateTime<Utc>) -> StatusSplit {
        split_by_status(&self.visible(now))
    }

    pub fn grouped(&self, now: DateTime<Utc>) -> GroupedTodos {
        group_by_due_date(&self.visible(now), now, &self.calendar)
    }

    pub fn apply_change(&mut self, event: ChangeEvent) -> bool {
        match &self.user {
            Some(user) => self.mirror.apply_change(&user.id, event),
            None => false,
        }
    }

    /// Drains pending change events. A lagged feed lost events, so the
    /// mirror is rebuilt from the store instead.
    pub async fn sync_changes(&mut self, now: DateTime<Utc>) -> Result<usize, BoardError> {
        let mut applied = 0;
        let mut lagged = false;
        loop {
            match self.changes.try_recv() {
                Ok(event) => {
                    if self.apply_change(event) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "change feed lagged");
                    lagged = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if lagged {
            self.refresh(now).await?;
        }
        Ok(applied)
    }

    async fn upload_image(&self, path: String, image: &ImageUpload) -> Result<String, BoardError> {
        self.collab.blobs.upload(&path, &image.bytes).await?;
        Ok(self.collab.blobs.public_url(&path))
    }

    /// Uploads under the user's folder, then once more at the bucket root.
    /// Gives up with a warning notice when both fail.
    async fn upload_new_image(
        &mut self,
        user: &User,
        image: &ImageUpload,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let millis = now.timestamp_millis();
        let ext = image.extension().to_string();

        let primary = format!("{}/todo-{millis}.{ext}", user.id);
        let err = match self.upload_image(primary, image).await {
            Ok(url) => return Some(url),
            Err(err) => err,
        };
        warn!(error = %err, "image upload failed, retrying at bucket root");

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let fallback = format!("todo-{millis}-{}.{ext}", &suffix[..6]);
        match self.upload_image(fallback, image).await {
            Ok(url) => Some(url),
            Err(err) => {
                error!(error = %err, "image upload failed");
                self.notify(Notice::warning(format!("Could not process image: {err}")));
                None
            }
        }
    }

    /// Best effort; a leftover object is not worth failing the operation.
    async fn remove_image(&self, url: &str) {
        let path = object_path_from_url(url);
        match self.collab.blobs.remove(std::slice::from_ref(&path)).await {
            Ok(()) => debug!(path = %path, "removed image"),
            Err(err) => warn!(path = %path, error = %err, "failed to remove image"),
        }
    }

    #[tracing::instrument(skip(self, draft, image, now), fields(title = %draft.title))]
    pub async fn add_task(
        &mut self,
        draft: TaskDraft,
        image: Option<ImageUpload>,
        now: DateTime<Utc>,
    ) -> Result<Task, BoardError> {
        let user = self.require_user()?;
        let mut new_task = match NewTask::pending(
            &draft.title,
            draft.description,
            draft.due_date,
            user.id.clone(),
        ) {
            Ok(task) => task,
            Err(err) => {
                self.notify(Notice::error(err.to_string()));
                return Err(err);
            }
        };

        if let Some(image) = &image {
            new_task.image_url = self.upload_new_image(&user, image, now).await;
        }

        let (task, message) = match self.collab.store.insert(new_task.clone()).await {
            Ok(task) => (task, "Task added"),
            Err(err) if new_task.image_url.is_some() => {
                warn!(error = %err, "insert with image failed, retrying without it");
                new_task.image_url = None;
                match self.collab.store.insert(new_task).await {
                    Ok(task) => (task, "Task added, but without the image"),
                    Err(err) => return Err(self.add_failed(err)),
                }
            }
            Err(err) => return Err(self.add_failed(err)),
        };

        info!(task_id = %task.id, "task added");
        self.mirror.upsert(task.clone());
        self.notify(Notice::success(message));
        Ok(task)
    }

    fn add_failed(&mut self, err: BoardError) -> BoardError {
        error!(error = %err, "failed to add task");
        self.notify(Notice::error(format!("Could not add task: {err}")));
        err
    }

    /// Reads the task, checks it belongs to the current user and then writes
    /// the edited fields. The mirror is re-read afterwards.
    #[tracing::instrument(skip(self, edit, image, now), fields(task_id = %id))]
    pub async fn edit_task(
        &mut self,
        id: &TaskId,
        edit: TaskEdit,
        image: ImageChange,
        now: DateTime<Utc>,
    ) -> Result<(), BoardError> {
        let user = self.require_user()?;
        let current = match self.owned_task(&user, id).await {
            Ok(task) => task,
            Err(err) => {
                self.notify(Notice::error(format!("Could not edit task: {err}")));
                return Err(err);
            }
        };
        let title = match validate_title(&edit.title) {
            Ok(title) => title,
            Err(err) => {
                self.notify(Notice::error(err.to_string()));
                return Err(err);
            }
        };

        let mut patch = TaskPatch {
            title: Some(title),
            description: Some(edit.description.filter(|text| !text.trim().is_empty())),
            due_date: Some(edit.due_date),
            ..TaskPatch::default()
        };

        match image {
            ImageChange::Keep => {}
            ImageChange::Replace(upload) => {
                let path = format!(
                    "{}/todo-edit-{}.{}",
                    user.id,
                    now.timestamp_millis(),
                    upload.extension()
                );
                match self.upload_image(path, &upload).await {
                    Ok(url) => {
                        patch.image_url = Some(Some(url));
                        if let Some(old) = &current.image_url {
                            self.remove_image(old).await;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "image upload failed, keeping the old image");
                        self.notify(Notice::error(format!("Could not process image: {err}")));
                    }
                }
            }
            ImageChange::Remove => {
                patch.image_url = Some(None);
                if let Some(old) = &current.image_url {
                    self.remove_image(old).await;
                }
            }
        }

        if let Err(err) = self.collab.store.update(id, &patch).await {
            error!(error = %err, "failed to update task");
            self.notify(Notice::error(format!("Could not update task: {err}")));
            return Err(err);
        }

        info!("task updated");
        self.notify(Notice::success("Task updated"));
        if let Err(err) = self.refresh(now).await {
            warn!(error = %err, "refresh after edit failed");
        }
        Ok(())
    }

    async fn owned_task(&self, user: &User, id: &TaskId) -> Result<Task, BoardError> {
        let task = self.collab.store.get(id).await?;
        if task.user_id != user.id {
            warn!(task_id = %id, owner = %task.user_id, "refusing to touch another user's task");
            return Err(BoardError::Forbidden(id.clone()));
        }
        Ok(task)
    }

    /// Removes the task's image, then the task.
    #[tracing::instrument(skip(self), fields(task_id = %id))]
    pub async fn delete_task(&mut self, id: &TaskId) -> Result<(), BoardError> {
        let user = self.require_user()?;
        match self.owned_task(&user, id).await {
            Ok(task) => {
                if let Some(url) = &task.image_url {
                    self.remove_image(url).await;
                }
            }
            Err(err @ BoardError::Forbidden(_)) => {
                self.notify(Notice::error(format!("Could not delete task: {err}")));
                return Err(err);
            }
            Err(err) => warn!(error = %err, "could not read task before delete"),
        }

        if let Err(err) = self.collab.store.delete(id).await {
            error!(error = %err, "failed to delete task");
            self.notify(Notice::error(format!("Could not delete task: {err}")));
            return Err(err);
        }

        info!("task deleted");
        self.mirror.remove(id);
        self.notify(Notice::success("Task deleted"));
        Ok(())
    }

    /// Optimistic toggle of the completed flag.
    pub async fn set_completed(
        &mut self,
        id: &TaskId,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, BoardError> {
        self.require_user()?;
        self.apply_plan(id, DropPlan::SetCompleted(completed), now)
            .await
    }

    /// Applies a drop: plan it, patch the mirror, then persist. A failed
    /// write rolls the mirror back and re-reads it from the store.
    #[tracing::instrument(skip(self, event, now), fields(task_id = %event.task_id, view = %self.view))]
    pub async fn on_drop(
        &mut self,
        event: &DropEvent,
        now: DateTime<Utc>,
    ) -> Result<DropPlan, BoardError> {
        self.require_user()?;
        let plan = match plan_drop(self.view, event, now, &self.calendar) {
            Ok(plan) => plan,
            Err(err) => {
                self.notify(Notice::error(format!("Could not move task: {err}")));
                return Err(err);
            }
        };
        if let DropPlan::Ignore(reason) = plan {
            debug!(?reason, "drop ignored");
            return Ok(plan);
        }

        if self.apply_plan(&event.task_id, plan, now).await? {
            Ok(plan)
        } else {
            Ok(DropPlan::Ignore(IgnoreReason::MissingTask))
        }
    }

    /// Returns `false` when the task is not in the mirror.
    async fn apply_plan(
        &mut self,
        id: &TaskId,
        plan: DropPlan,
        now: DateTime<Utc>,
    ) -> Result<bool, BoardError> {
        let Some(patch) = plan.to_patch() else {
            return Ok(true);
        };
        let Some(task) = self.mirror.get(id) else {
            warn!(task_id = %id, "task not in view, ignoring");
            return Ok(false);
        };
        if patch.is_noop_for(task) {
            debug!(task_id = %id, "patch changes nothing, skipping write");
            return Ok(true);
        }

        let Some(mut update) = OptimisticUpdate::begin(&mut self.mirror, id, patch) else {
            return Ok(false);
        };

        match self.collab.store.update(id, update.patch()).await {
            Ok(()) => {
                update.commit();
                info!(task_id = %id, "task moved");
                if let Some(message) = plan.success_message() {
                    self.notify(Notice::success(message));
                }
                Ok(true)
            }
            Err(err) => {
                error!(task_id = %id, error = %err, "failed to persist move");
                update.roll_back(&mut self.mirror);
                self.notify(Notice::error("Could not move task. Try again."));
                if let Err(refresh_err) = self.refresh(now).await {
                    warn!(error = %refresh_err, "refresh after failed move failed");
                }
                Err(err)
            }
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), BoardError> {
        self.collab.identity.sign_out().await?;
        info!("signed out");
        self.user = None;
        self.mirror.clear();
        self.notify(Notice::success("Signed out"));
        Ok(())
    }
}
