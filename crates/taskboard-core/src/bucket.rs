use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::datetime::Calendar;
use crate::error::BoardError;
use crate::task::Task;

/// Due-date proximity buckets, declared in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    NextWeek,
    ThisMonth,
    Future,
    NoDueDate,
    Completed,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::Overdue,
        Bucket::Today,
        Bucket::Tomorrow,
        Bucket::ThisWeek,
        Bucket::NextWeek,
        Bucket::ThisMonth,
        Bucket::Future,
        Bucket::NoDueDate,
        Bucket::Completed,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Bucket::Overdue => "overdue",
            Bucket::Today => "today",
            Bucket::Tomorrow => "tomorrow",
            Bucket::ThisWeek => "thisWeek",
            Bucket::NextWeek => "nextWeek",
            Bucket::ThisMonth => "thisMonth",
            Bucket::Future => "future",
            Bucket::NoDueDate => "noDueDate",
            Bucket::Completed => "completed",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Bucket::Overdue => "Overdue",
            Bucket::Today => "Today",
            Bucket::Tomorrow => "Tomorrow",
            Bucket::ThisWeek => "This week",
            Bucket::NextWeek => "Next week",
            Bucket::ThisMonth => "This month",
            Bucket::Future => "Future",
            Bucket::NoDueDate => "No due date",
            Bucket::Completed => "Completed",
        }
    }

    /// 1-based sort order.
    pub fn order(self) -> u8 {
        self as u8 + 1
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Bucket {
    type Err = BoardError;

    /// Accepts the camelCase keys as well as kebab-case spellings
    /// (`this-week`, `no-due-date`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        Bucket::ALL
            .into_iter()
            .find(|bucket| bucket.key().to_ascii_lowercase() == folded)
            .ok_or_else(|| BoardError::UnknownColumn(s.to_string()))
    }
}

/// Assigns `task` to exactly one bucket. First matching rule wins.
pub fn classify(task: &Task, now: DateTime<Utc>, cal: &Calendar) -> Bucket {
    if task.completed {
        return Bucket::Completed;
    }

    let Some(due) = task.due_date else {
        return Bucket::NoDueDate;
    };

    let bucket = if due < cal.start_of_day(now) {
        Bucket::Overdue
    } else if cal.is_same_day(due, now) {
        Bucket::Today
    } else if cal.is_same_day(due, cal.start_of_day_after(now, 1)) {
        Bucket::Tomorrow
    } else if cal.is_same_week(due, now) {
        Bucket::ThisWeek
    } else if due > cal.end_of_week(now) && due <= cal.end_of_next_week(now) {
        Bucket::NextWeek
    } else if cal.is_same_month(due, now) {
        Bucket::ThisMonth
    } else {
        Bucket::Future
    };

    trace!(task_id = %task.id, due = %due, bucket = %bucket, "classified task");
    bucket
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketGroup {
    pub title: &'static str,
    pub tasks: Vec<Task>,
    pub order: u8,
}

/// Bucket -> group. Iteration follows display order; empty buckets are absent.
pub type GroupedTodos = BTreeMap<Bucket, BucketGroup>;

#[tracing::instrument(skip(tasks, now, cal), fields(count = tasks.len()))]
pub fn group_by_due_date(tasks: &[Task], now: DateTime<Utc>, cal: &Calendar) -> GroupedTodos {
    let mut groups = GroupedTodos::new();
    for task in tasks {
        let bucket = classify(task, now, cal);
        groups
            .entry(bucket)
            .or_insert_with(|| BucketGroup {
                title: bucket.title(),
                tasks: Vec::new(),
                order: bucket.order(),
            })
            .tasks
            .push(task.clone());
    }
    groups
}

/// Columns of the status view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColumn {
    Pending,
    Completed,
}

impl StatusColumn {
    pub fn key(self) -> &'static str {
        match self {
            StatusColumn::Pending => "pending",
            StatusColumn::Completed => "completed",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StatusColumn::Pending => "Pending",
            StatusColumn::Completed => "Completed",
        }
    }
}

impl fmt::Display for StatusColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StatusColumn {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(StatusColumn::Pending),
            "completed" => Ok(StatusColumn::Completed),
            _ => Err(BoardError::UnknownColumn(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSplit {
    pub pending: Vec<Task>,
    pub completed: Vec<Task>,
}

impl StatusSplit {
    pub fn column(&self, column: StatusColumn) -> &[Task] {
        match column {
            StatusColumn::Pending => &self.pending,
            StatusColumn::Completed => &self.completed,
        }
    }
}

pub fn split_by_status(tasks: &[Task]) -> StatusSplit {
    let (completed, pending): (Vec<Task>, Vec<Task>) =
        tasks.iter().cloned().partition(|task| task.completed);
    StatusSplit { pending, completed }
}
