use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoardError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used for display and prefix lookup.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    /// Rich text, may carry HTML markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub completed: bool,

    pub user_id: UserId,

    #[serde(default)]
    pub image_url: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

/// The insertable part of a task; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub completed: bool,
    pub user_id: UserId,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn pending(
        title: &str,
        description: Option<String>,
        due_date: Option<DateTime<Utc>>,
        user_id: UserId,
    ) -> Result<Self, BoardError> {
        let title = validate_title(title)?;
        Ok(Self {
            title,
            description: description.filter(|text| !text.trim().is_empty()),
            completed: false,
            user_id,
            image_url: None,
            due_date,
        })
    }

    pub fn into_task(self, id: TaskId, created_at: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            user_id: self.user_id,
            image_url: self.image_url,
            created_at,
            due_date: self.due_date,
        }
    }
}

/// Partial update. `Some(None)` on a nullable field clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub image_url: Option<Option<String>>,
}

impl TaskPatch {
    pub fn completed(value: bool) -> Self {
        Self {
            completed: Some(value),
            ..Self::default()
        }
    }

    pub fn due_date(value: Option<DateTime<Utc>>) -> Self {
        Self {
            due_date: Some(value),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(image_url) = &self.image_url {
            task.image_url = image_url.clone();
        }
    }

    /// Whether applying the patch would leave `task` unchanged.
    pub fn is_noop_for(&self, task: &Task) -> bool {
        let mut patched = task.clone();
        self.apply_to(&mut patched);
        patched == *task
    }
}

pub fn validate_title(raw: &str) -> Result<String, BoardError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(BoardError::InvalidTask("title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn sample() -> Task {
        NewTask::pending("Buy milk", None, None, UserId::from("u1"))
            .unwrap()
            .into_task(
                TaskId::from("t1"),
                Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            )
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = NewTask::pending("   ", None, None, UserId::from("u1")).unwrap_err();
        assert!(matches!(err, BoardError::InvalidTask(_)));
    }

    #[test]
    fn patch_distinguishes_clear_from_untouched() {
        let due = Utc.with_ymd_and_hms(2024, 6, 12, 0, 0, 0).unwrap();
        let mut task = sample();
        task.due_date = Some(due);

        TaskPatch::completed(true).apply_to(&mut task);
        assert!(task.completed);
        assert_eq!(task.due_date, Some(due));

        TaskPatch::due_date(None).apply_to(&mut task);
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn noop_detection() {
        let task = sample();
        assert!(TaskPatch::completed(false).is_noop_for(&task));
        assert!(!TaskPatch::completed(true).is_noop_for(&task));
        assert!(TaskPatch::default().is_noop_for(&task));
    }

    #[test]
    fn record_uses_snake_case_keys_and_keeps_null_due() {
        let task = sample();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert!(json["due_date"].is_null());
        assert!(json.get("description").is_none());

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn short_id_truncates() {
        assert_eq!(TaskId::from("0123456789abcdef").short(), "01234567");
        assert_eq!(TaskId::from("abc").short(), "abc");
    }
}
