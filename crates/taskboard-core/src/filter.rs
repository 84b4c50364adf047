use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::datetime::Calendar;
use crate::store::TaskQuery;
use crate::task::{
  Task,
  UserId
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DateFilterKind {
  #[default]
  All,
  Today,
  Week,
  Month,
  Overdue
}

impl DateFilterKind {
  pub fn key(self) -> &'static str {
    match self {
      | DateFilterKind::All => "all",
      | DateFilterKind::Today => "today",
      | DateFilterKind::Week => "week",
      | DateFilterKind::Month => "month",
      | DateFilterKind::Overdue => {
        "overdue"
      }
    }
  }
}

impl fmt::Display for DateFilterKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for DateFilterKind {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(DateFilterKind::All),
      | "today" => {
        Ok(DateFilterKind::Today)
      }
      | "week" => {
        Ok(DateFilterKind::Week)
      }
      | "month" => {
        Ok(DateFilterKind::Month)
      }
      | "overdue" => {
        Ok(DateFilterKind::Overdue)
      }
      | other => {
        Err(anyhow::anyhow!(
          "unknown date filter: {other} \
           (expected all, today, week, \
           month or overdue)"
        ))
      }
    }
  }
}

/// Transient date filter selection.
/// Explicit bounds, when present,
/// replace the computed window of a
/// `today`, `week` or `month` filter.
#[derive(
  Debug, Clone, Default, PartialEq,
)]
pub struct DateFilter {
  pub kind:  DateFilterKind,
  pub start: Option<DateTime<Utc>>,
  pub end:   Option<DateTime<Utc>>
}

impl DateFilter {
  pub fn new(
    kind: DateFilterKind
  ) -> Self {
    Self {
      kind,
      start: None,
      end: None
    }
  }

  pub fn with_bounds(
    mut self,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>
  ) -> Self {
    self.start = start;
    self.end = end;
    self
  }

  pub fn label(&self) -> &'static str {
    match self.kind {
      | DateFilterKind::All => {
        "All tasks"
      }
      | DateFilterKind::Today => {
        "Today's tasks"
      }
      | DateFilterKind::Week => {
        "This week's tasks"
      }
      | DateFilterKind::Month => {
        "This month's tasks"
      }
      | DateFilterKind::Overdue => {
        "Overdue tasks"
      }
    }
  }

  /// Inclusive due-date window for the
  /// windowed kinds.
  pub fn window(
    &self,
    now: DateTime<Utc>,
    cal: &Calendar
  ) -> Option<(
    DateTime<Utc>,
    DateTime<Utc>
  )> {
    let (start, end) = match self.kind
    {
      | DateFilterKind::All
      | DateFilterKind::Overdue => {
        return None;
      }
      | DateFilterKind::Today => {
        (
          cal.start_of_day(now),
          cal.end_of_day(now)
        )
      }
      | DateFilterKind::Week => {
        (
          cal.start_of_day(now),
          cal.end_of_week(now)
        )
      }
      | DateFilterKind::Month => {
        (
          cal.start_of_day(now),
          cal.end_of_month(now)
        )
      }
    };

    Some((
      self.start.unwrap_or(start),
      self.end.unwrap_or(end)
    ))
  }

  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>,
    cal: &Calendar
  ) -> bool {
    let ok = match self.kind {
      | DateFilterKind::All => true,
      | DateFilterKind::Overdue => {
        !task.completed
          && task
            .due_date
            .map(|due| {
              due < cal.start_of_day(now)
            })
            .unwrap_or(false)
      }
      | _ => {
        match (
          task.due_date,
          self.window(now, cal)
        ) {
          | (
            Some(due),
            Some((start, end))
          ) => due >= start && due <= end,
          | _ => false
        }
      }
    };

    trace!(kind = %self.kind, task_id = %task.id, ok, "date filter evaluation");
    ok
  }

  pub fn apply(
    &self,
    tasks: &[Task],
    now: DateTime<Utc>,
    cal: &Calendar
  ) -> Vec<Task> {
    tasks
      .iter()
      .filter(|task| {
        self.matches(task, now, cal)
      })
      .cloned()
      .collect()
  }

  /// Store-side narrowing for a
  /// refresh. Only `today` and `overdue`
  /// are pushed down; the local
  /// evaluator still runs afterwards.
  pub fn store_query(
    &self,
    owner: &UserId,
    now: DateTime<Utc>,
    cal: &Calendar
  ) -> TaskQuery {
    let query =
      TaskQuery::for_owner(owner.clone());
    match self.kind {
      | DateFilterKind::Today => {
        match self.window(now, cal) {
          | Some((start, end)) => {
            query
              .due_from(start)
              .due_until(end)
          }
          | None => query
        }
      }
      | DateFilterKind::Overdue => {
        query
          .due_before(
            cal.start_of_day(now)
          )
          .completed(false)
      }
      | _ => query
    }
  }
}

/// Case-insensitive substring match on
/// title and description. Only the empty
/// term matches everything; whitespace is
/// searched for like any other text.
pub fn matches_search(
  task: &Task,
  term: &str
) -> bool {
  if term.is_empty() {
    return true;
  }

  let needle = term.to_lowercase();
  task
    .title
    .to_lowercase()
    .contains(&needle)
    || task
      .description
      .as_deref()
      .map(|text| {
        text
          .to_lowercase()
          .contains(&needle)
      })
      .unwrap_or(false)
}

/// Date filter first, then search.
#[tracing::instrument(skip(
  tasks, filter, now, cal
), fields(count = tasks.len(), kind = %filter.kind))]
pub fn apply(
  tasks: &[Task],
  filter: &DateFilter,
  search: &str,
  now: DateTime<Utc>,
  cal: &Calendar
) -> Vec<Task> {
  tasks
    .iter()
    .filter(|task| {
      filter.matches(task, now, cal)
    })
    .filter(|task| {
      matches_search(task, search)
    })
    .cloned()
    .collect()
}
