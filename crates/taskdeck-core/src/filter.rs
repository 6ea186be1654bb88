use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::task::{Priority, Task};

/// One entry of the priority filter: a concrete priority or the `all`
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrioritySelection {
    All,
    Only(Priority),
}

impl From<Priority> for PrioritySelection {
    fn from(value: Priority) -> Self {
        Self::Only(value)
    }
}

impl fmt::Display for PrioritySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(priority) => write!(f, "{priority}"),
        }
    }
}

impl FromStr for PrioritySelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<Priority>().map(Self::Only)
    }
}

/// Priority filter state.
///
/// Never empty, and never holds `all` together with a concrete priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFilter {
    selected: BTreeSet<PrioritySelection>,
}

impl Default for PriorityFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl PriorityFilter {
    #[must_use]
    pub fn all() -> Self {
        Self {
            selected: BTreeSet::from([PrioritySelection::All]),
        }
    }

    /// Builds a filter from an arbitrary selection, collapsing to `{all}`
    /// when the input is empty or mentions `all`.
    pub fn from_selection<I>(selection: I) -> Self
    where
        I: IntoIterator<Item = PrioritySelection>,
    {
        let selected: BTreeSet<PrioritySelection> = selection.into_iter().collect();
        if selected.is_empty() || selected.contains(&PrioritySelection::All) {
            return Self::all();
        }
        Self { selected }
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.selected.contains(&PrioritySelection::All)
    }

    #[must_use]
    pub fn contains(&self, selection: PrioritySelection) -> bool {
        self.selected.contains(&selection)
    }

    pub fn selections(&self) -> impl Iterator<Item = PrioritySelection> + '_ {
        self.selected.iter().copied()
    }

    pub fn toggle(&mut self, selection: PrioritySelection) {
        match selection {
            PrioritySelection::All => {
                *self = Self::all();
            }
            specific => {
                if self.is_all() {
                    self.selected.clear();
                    self.selected.insert(specific);
                } else if self.selected.contains(&specific) {
                    self.selected.remove(&specific);
                    if self.selected.is_empty() {
                        *self = Self::all();
                    }
                } else {
                    self.selected.insert(specific);
                }
            }
        }
        trace!(selection = %self, "toggled priority filter");
    }

    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.is_all() || self.selected.contains(&PrioritySelection::Only(task.priority))
    }
}

impl fmt::Display for PriorityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.selected.iter().map(ToString::to_string).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusFilter {
    #[default]
    All,
    InProgress,
    Completed,
}

impl StatusFilter {
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::InProgress => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::InProgress => "in-progress",
            StatusFilter::Completed => "completed",
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "in-progress" | "in_progress" | "open" | "pending" => Ok(StatusFilter::InProgress),
            "completed" | "done" => Ok(StatusFilter::Completed),
            other => Err(anyhow!("unknown status filter: {other}")),
        }
    }
}

/// Status and priority filters combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: StatusFilter,
    pub priority: PriorityFilter,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task) && self.priority.matches(task)
    }

    /// Keeps the matching tasks in their original order.
    #[must_use]
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        tasks.iter().filter(|task| self.matches(task)).cloned().collect()
    }
}

/// Sidebar section sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub all: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl StatusCounts {
    #[must_use]
    pub fn tally(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|task| task.completed).count();
        Self {
            all: tasks.len(),
            in_progress: tasks.len() - completed,
            completed,
        }
    }
}
