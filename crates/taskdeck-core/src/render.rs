use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{MonthGrid, weekday_labels};
use crate::datetime::parse_canonical_date;
use crate::filter::StatusCounts;
use crate::notice::{Notice, NoticeLevel};
use crate::task::{Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colors only apply when stdout is a terminal.
    pub fn new(color: bool) -> Self {
        Self {
            color: color && io::stdout().is_terminal(),
        }
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_table(&self, tasks: &[Task], today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tasks.is_empty() {
            writeln!(out, "No matching tasks.")?;
            return Ok(());
        }
        self.write_task_table(&mut out, tasks, today)
    }

    fn write_task_table<W: Write>(
        &self,
        writer: W,
        tasks: &[Task],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Priority".to_string(),
            "Status".to_string(),
            "Title".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let due = task.due_date.clone().unwrap_or_default();
                let overdue = !task.completed
                    && task
                        .due_date
                        .as_deref()
                        .and_then(parse_canonical_date)
                        .is_some_and(|date| date < today);
                let due = if overdue { self.paint(&due, "31") } else { due };

                let priority = match task.priority {
                    Priority::High => self.paint(task.priority.as_str(), "31"),
                    Priority::Medium => self.paint(task.priority.as_str(), "33"),
                    Priority::Low => self.paint(task.priority.as_str(), "32"),
                };
                let status = if task.completed {
                    self.paint("completed", "2")
                } else {
                    "in progress".to_string()
                };

                vec![
                    self.paint(task.id.as_str(), "33"),
                    due,
                    priority,
                    status,
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(writer, headers, rows)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(
            out,
            "due       {}",
            task.due_date.as_deref().unwrap_or("-")
        )?;
        writeln!(out, "priority  {}", task.priority)?;
        writeln!(
            out,
            "status    {}",
            if task.completed { "completed" } else { "in progress" }
        )?;
        writeln!(out, "created   {}", task.created_at.format("%Y-%m-%d %H:%M:%SZ"))?;
        writeln!(out, "updated   {}", task.updated_at.format("%Y-%m-%d %H:%M:%SZ"))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, grid), fields(year = grid.year, month = grid.month))]
    pub fn print_calendar(&self, grid: &MonthGrid) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_calendar(&mut out, grid)
    }

    fn write_calendar<W: Write>(&self, mut writer: W, grid: &MonthGrid) -> anyhow::Result<()> {
        writeln!(writer, "{}", grid.title())?;
        writeln!(writer)?;

        let headers = weekday_labels().iter().map(|label| label.to_string()).collect();
        let rows = grid
            .weeks()
            .map(|week| {
                week.iter()
                    .map(|cell| {
                        let mut text = cell.date.format("%e").to_string();
                        if !cell.tasks.is_empty() {
                            text.push_str(&format!(" ({})", cell.tasks.len()));
                        }
                        if cell.is_today {
                            self.paint(&text, "7")
                        } else if !cell.in_month {
                            self.paint(&text, "2")
                        } else {
                            text
                        }
                    })
                    .collect()
            })
            .collect();
        write_table(&mut writer, headers, rows)?;

        let due_days: Vec<_> = grid.cells.iter().filter(|cell| !cell.tasks.is_empty()).collect();
        if !due_days.is_empty() {
            writeln!(writer)?;
        }
        for cell in due_days {
            let titles = cell
                .tasks
                .iter()
                .map(|task| {
                    if task.completed {
                        self.paint(&task.title, "9")
                    } else {
                        task.title.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(writer, "{}  {}", cell.date.format("%Y-%m-%d"), titles)?;
        }

        Ok(())
    }

    pub fn print_counts(&self, counts: StatusCounts) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "All tasks    {}", counts.all)?;
        writeln!(out, "In progress  {}", counts.in_progress)?;
        writeln!(out, "Completed    {}", counts.completed)?;
        Ok(())
    }

    /// Notices go to stderr so list output stays clean for pipes.
    pub fn print_notice(&self, notice: &Notice) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        let line = match notice.level {
            NoticeLevel::Success => self.paint(&notice.message, "32"),
            NoticeLevel::Error => self.paint(&notice.message, "31"),
        };
        writeln!(err, "{line}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
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
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
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
