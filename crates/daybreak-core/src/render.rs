use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveDateTime};
use unicode_width::UnicodeWidthChar;

use crate::config::Config;
use crate::datetime::TimeOfDay;
use crate::task::Task;
use crate::view::{TaskView, completion_summary};

const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// The checklist for `date` followed by an `N/M completed` line. Open
    /// timed tasks whose time has passed today are highlighted.
    #[tracing::instrument(skip(self, out, views, now))]
    pub fn write_day<W: Write>(
        &self,
        mut out: W,
        date: NaiveDate,
        views: &[TaskView],
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let heading = date.format("%A, %B %-d, %Y").to_string();
        if date == now.date() {
            writeln!(out, "{heading} (today)")?;
        } else {
            writeln!(out, "{heading}")?;
        }

        if views.is_empty() {
            writeln!(out, "No tasks for this day.")?;
            return Ok(());
        }

        let headers = ["ID", "Done", "Task", "Time", "Repeats", "Resets"]
            .map(str::to_string)
            .to_vec();
        let current = TimeOfDay::of(&now);

        let mut rows = Vec::with_capacity(views.len());
        for view in views {
            let task = &view.task;
            let checkbox = if view.completed { "[x]" } else { "[ ]" };
            let title = if view.completed {
                self.paint(&task.title, "2")
            } else {
                task.title.clone()
            };

            let time = task.task_time.map(|t| t.format_12h()).unwrap_or_default();
            let late = !view.completed
                && date == now.date()
                && task.task_time.is_some_and(|t| t < current);
            let time = if late { self.paint(&time, "31") } else { time };

            rows.push(vec![
                self.paint(&task.id.to_string(), "33"),
                checkbox.to_string(),
                title,
                time,
                task.recurrence.to_string(),
                resets_label(task),
            ]);
        }

        write_table(&mut out, headers, rows)?;

        let (done, total) = completion_summary(views);
        writeln!(out)?;
        writeln!(out, "{done}/{total} completed")?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn write_task_list<W: Write>(&self, mut out: W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks yet.")?;
            return Ok(());
        }

        let headers = ["ID", "Task", "Time", "Repeats", "Resets", "Created"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    task.title.clone(),
                    task.task_time.map(|t| t.format_12h()).unwrap_or_default(),
                    task.recurrence.to_string(),
                    resets_label(task),
                    task.created_at.format("%Y-%m-%d").to_string(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_day(
        &self,
        date: NaiveDate,
        views: &[TaskView],
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        self.write_day(io::stdout().lock(), date, views, now)
    }

    pub fn print_task_list(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.write_task_list(io::stdout().lock(), tasks)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn resets_label(task: &Task) -> String {
    task.reset_time
        .map(|t| format!("Resets {}", t.format_12h()))
        .unwrap_or_default()
}

/// Left-aligned columns two spaces apart, a dashed rule under the header,
/// no trailing padding on the last column. Widths ignore ANSI escapes.
fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| visible_width(h)).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut writer, &headers, &widths)?;
    write_row(&mut writer, &rule, &widths)?;
    for row in &rows {
        write_row(&mut writer, row, &widths)?;
    }

    Ok(())
}

fn write_row<W: Write>(writer: &mut W, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let last = cells.len().saturating_sub(1);
    for (idx, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if idx == last {
            write!(writer, "{cell}")?;
        } else {
            let padding = width.saturating_sub(visible_width(cell));
            write!(writer, "{cell}{}{COLUMN_GAP}", " ".repeat(padding))?;
        }
    }
    writeln!(writer)
}

/// Display width of `s` with `ESC [ ... m` sequences skipped.
fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for ch in s.chars() {
        match (in_escape, ch) {
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, '\x1b') => in_escape = true,
            (false, _) => width += UnicodeWidthChar::width(ch).unwrap_or(0),
        }
    }
    width
}
