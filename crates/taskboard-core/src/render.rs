use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::board::{Notice, NoticeLevel};
use crate::bucket::{Bucket, GroupedTodos, StatusColumn, StatusSplit, classify};
use crate::config::Config;
use crate::datetime::Calendar;
use crate::task::{Task, User};

const DESCRIPTION_WIDTH: usize = 40;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colour needs `color` on and a terminal on stdout.
    pub fn new(cfg: &Config) -> Self {
        let enabled = cfg.get_bool("color").unwrap_or(true);
        Self {
            color: enabled && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, split, cal, now))]
    pub fn print_status_board<W: Write>(
        &self,
        mut out: W,
        split: &StatusSplit,
        cal: &Calendar,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        for (idx, column) in [StatusColumn::Pending, StatusColumn::Completed]
            .into_iter()
            .enumerate()
        {
            if idx > 0 {
                writeln!(out)?;
            }
            let tasks = split.column(column);
            let code = match column {
                StatusColumn::Pending => "33",
                StatusColumn::Completed => "32",
            };
            let heading = format!("{} ({})", column.title(), tasks.len());
            writeln!(out, "{}", self.paint(&heading, code))?;
            self.write_tasks(&mut out, tasks, cal, now)?;
        }
        Ok(())
    }

    /// Buckets in display order; empty buckets are skipped.
    #[tracing::instrument(skip(self, out, groups, cal, now))]
    pub fn print_due_board<W: Write>(
        &self,
        mut out: W,
        groups: &GroupedTodos,
        cal: &Calendar,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if groups.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        for (idx, (bucket, group)) in groups.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let heading = format!("{} ({})", group.title, group.tasks.len());
            writeln!(out, "{}", self.paint(&heading, bucket_color(*bucket)))?;
            self.write_tasks(&mut out, &group.tasks, cal, now)?;
        }
        Ok(())
    }

    fn write_tasks<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        cal: &Calendar,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "  (empty)")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Title".to_string(),
            "Description".to_string(),
            "Img".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let due = task
                .due_date
                .map(|due| cal.format_short(due))
                .unwrap_or_default();
            let due = match classify(task, now, cal) {
                Bucket::Overdue => self.paint(&due, "31"),
                Bucket::Today => self.paint(&due, "33"),
                _ => due,
            };

            let description = task
                .description
                .as_deref()
                .map(|html| truncate(&plain_text(html), DESCRIPTION_WIDTH))
                .unwrap_or_default();
            let image = if task.image_url.is_some() { "*" } else { "" };

            rows.push(vec![
                self.paint(task.id.short(), "33"),
                due,
                task.title.clone(),
                description,
                image.to_string(),
            ]);
        }

        write_table(out, headers, rows)
    }

    pub fn print_task_info<W: Write>(
        &self,
        mut out: W,
        task: &Task,
        cal: &Calendar,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "status      {}",
            if task.completed { "completed" } else { "pending" }
        )?;
        writeln!(out, "bucket      {}", classify(task, now, cal).title())?;
        if let Some(description) = &task.description {
            writeln!(out, "description {}", plain_text(description))?;
        }
        if let Some(due) = task.due_date {
            writeln!(out, "due         {}", cal.format_date(due))?;
        }
        if let Some(url) = &task.image_url {
            writeln!(out, "image       {url}")?;
        }
        writeln!(out, "created     {}", task.created_at.format("%Y%m%dT%H%M%SZ"))?;
        Ok(())
    }

    pub fn print_user<W: Write>(&self, mut out: W, user: &User) -> anyhow::Result<()> {
        match &user.email {
            Some(email) => writeln!(out, "{} <{email}>", user.id)?,
            None => writeln!(out, "{}", user.id)?,
        }
        Ok(())
    }

    /// Notices go to stderr in the CLI; errors are also returned as `Err`.
    pub fn print_notices<W: Write>(&self, mut out: W, notices: &[Notice]) -> anyhow::Result<()> {
        for notice in notices {
            let (label, code) = match notice.level {
                NoticeLevel::Success => ("ok", "32"),
                NoticeLevel::Warning => ("warning", "33"),
                NoticeLevel::Error => ("error", "31"),
            };
            writeln!(out, "{}: {}", self.paint(label, code), notice.message)?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Header colour of each due-date column.
pub fn bucket_color(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Overdue => "31",
        Bucket::Today => "33",
        Bucket::Tomorrow => "34",
        Bucket::ThisWeek => "94",
        Bucket::NextWeek => "35",
        Bucket::ThisMonth => "95",
        Bucket::Future => "36",
        Bucket::NoDueDate => "90",
        Bucket::Completed => "32",
    }
}

/// Drops markup tags and collapses whitespace.
fn plain_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => text.push(ch),
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    write!(writer, "  ")?;
    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    write!(writer, "  ")?;
    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        write!(writer, "  ")?;
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
