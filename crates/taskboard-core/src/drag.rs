//! Translating a drop on the board into a task mutation.
//!
//! Planning is pure: [`plan_drop`] only looks at the event, the view and the
//! clock. Applying the plan optimistically and persisting it is done by
//! [`crate::board::Board::on_drop`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bucket::{Bucket, StatusColumn};
use crate::datetime::Calendar;
use crate::error::BoardError;
use crate::task::{TaskId, TaskPatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewKind {
    #[default]
    Status,
    DueDate,
}

impl ViewKind {
    pub fn key(self) -> &'static str {
        match self {
            ViewKind::Status => "status",
            ViewKind::DueDate => "due",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ViewKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(ViewKind::Status),
            "due" | "duedate" | "due-date" | "date" => Ok(ViewKind::DueDate),
            other => Err(anyhow::anyhow!("unknown view: {other}")),
        }
    }
}

/// A column key plus the position inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropSlot {
    pub column: String,
    pub index: usize,
}

impl DropSlot {
    pub fn new(column: impl Into<String>, index: usize) -> Self {
        Self {
            column: column.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropEvent {
    pub task_id: TaskId,
    pub source: DropSlot,
    /// `None` when the task was released outside every column.
    pub destination: Option<DropSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Status(StatusColumn),
    Due(Bucket),
}

pub fn parse_column(view: ViewKind, key: &str) -> Result<DropTarget, BoardError> {
    match view {
        ViewKind::Status => key.parse().map(DropTarget::Status),
        ViewKind::DueDate => key.parse().map(DropTarget::Due),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoDestination,
    Unmoved,
    OverdueTarget,
    MissingTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPlan {
    Ignore(IgnoreReason),
    SetCompleted(bool),
    SetDue {
        bucket: Bucket,
        due: Option<DateTime<Utc>>,
    },
}

impl DropPlan {
    /// `None` for ignored drops.
    pub fn to_patch(&self) -> Option<TaskPatch> {
        match *self {
            DropPlan::Ignore(_) => None,
            DropPlan::SetCompleted(completed) => Some(TaskPatch::completed(completed)),
            DropPlan::SetDue { due, .. } => Some(TaskPatch::due_date(due)),
        }
    }

    pub fn success_message(&self) -> Option<String> {
        match *self {
            DropPlan::Ignore(_) => None,
            DropPlan::SetCompleted(true) => Some("Task completed".to_string()),
            DropPlan::SetCompleted(false) => Some("Task reopened".to_string()),
            DropPlan::SetDue { due: None, .. } => Some("Due date cleared".to_string()),
            DropPlan::SetDue { bucket, .. } => Some(format!(
                "Due date moved to {}",
                bucket.title().to_lowercase()
            )),
        }
    }
}

/// Days added to today for a drop into a due bucket. The target is always
/// the start of that day, so e.g. "this month" lands two weeks out even
/// when that crosses the month boundary.
fn bucket_offset_days(bucket: Bucket) -> Option<i64> {
    match bucket {
        Bucket::Today => Some(0),
        Bucket::Tomorrow => Some(1),
        Bucket::ThisWeek => Some(2),
        Bucket::NextWeek => Some(7),
        Bucket::ThisMonth => Some(14),
        Bucket::Future => Some(30),
        Bucket::NoDueDate | Bucket::Overdue | Bucket::Completed => None,
    }
}

pub fn due_for_bucket(bucket: Bucket, now: DateTime<Utc>, cal: &Calendar) -> Option<DateTime<Utc>> {
    bucket_offset_days(bucket).map(|days| cal.start_of_day_after(now, days))
}

pub fn plan_drop(
    view: ViewKind,
    event: &DropEvent,
    now: DateTime<Utc>,
    cal: &Calendar,
) -> Result<DropPlan, BoardError> {
    let Some(destination) = &event.destination else {
        return Ok(DropPlan::Ignore(IgnoreReason::NoDestination));
    };
    if destination == &event.source {
        return Ok(DropPlan::Ignore(IgnoreReason::Unmoved));
    }

    let plan = match parse_column(view, &destination.column)? {
        DropTarget::Status(column) => {
            // an unknown source only means the reorder check is skipped
            let source = parse_column(view, &event.source.column).ok();
            if source == Some(DropTarget::Status(column)) {
                // reordering inside a column carries no state
                DropPlan::Ignore(IgnoreReason::Unmoved)
            } else {
                DropPlan::SetCompleted(column == StatusColumn::Completed)
            }
        }
        DropTarget::Due(Bucket::Completed) => DropPlan::SetCompleted(true),
        DropTarget::Due(Bucket::Overdue) => DropPlan::Ignore(IgnoreReason::OverdueTarget),
        DropTarget::Due(bucket) => DropPlan::SetDue {
            bucket,
            due: due_for_bucket(bucket, now, cal),
        },
    };

    debug!(task_id = %event.task_id, view = %view, to = %destination.column, plan = ?plan, "planned drop");
    Ok(plan)
}
