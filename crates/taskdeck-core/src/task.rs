use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque row identifier assigned by the remote datastore.
///
/// Tables keyed by `int8` hand back numbers, tables keyed by `uuid` hand
/// back strings; both decode into the same textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub due_date: Option<String>,

    pub priority: Priority,

    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Merges every field present in `patch` into this record.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = patch.title.as_ref() {
            self.title = title.clone();
        }
        if let Some(due_date) = patch.due_date.as_ref() {
            self.due_date = due_date.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }
}

/// Insert payload; the remote assigns `id` and the timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub due_date: Option<String>,
    pub priority: Priority,
    pub completed: bool,
}

impl NewTask {
    pub fn new(title: impl Into<String>, due_date: Option<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            due_date,
            priority,
            completed: false,
        }
    }
}

/// Partial update. `due_date: Some(None)` clears the date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    #[must_use]
    pub fn completed(value: bool) -> Self {
        Self {
            completed: Some(value),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_due_date(mut self, due_date: impl Into<String>) -> Self {
        self.due_date = Some(Some(due_date.into()));
        self
    }

    #[must_use]
    pub fn clearing_due_date(mut self) -> Self {
        self.due_date = Some(None);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.completed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Priority, Task, TaskId, TaskPatch};

    fn sample() -> Task {
        let now = Utc.with_ymd_and_hms(2024, 3, 18, 9, 0, 0).unwrap();
        Task {
            id: TaskId::new("1"),
            title: "Complete project proposal".to_string(),
            due_date: Some("2024-03-20".to_string()),
            priority: Priority::High,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut task = sample();
        task.apply_patch(&TaskPatch::default().with_title("Send proposal"));
        assert_eq!(task.title, "Send proposal");
        assert_eq!(task.due_date.as_deref(), Some("2024-03-20"));
        assert_eq!(task.priority, Priority::High);

        task.apply_patch(&TaskPatch::default().clearing_due_date());
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn patch_serializes_cleared_date_as_null() {
        let patch = TaskPatch::completed(true).clearing_due_date();
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"due_date": null, "completed": true}));
    }

    #[test]
    fn completed_defaults_to_false_on_decode() {
        let raw = r#"{
            "id": 42,
            "title": "Review team updates",
            "due_date": "2024-03-21",
            "priority": "medium",
            "created_at": "2024-03-18T09:00:00+00:00",
            "updated_at": "2024-03-18T09:00:00.123456+00:00"
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert!(!task.completed);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.id.as_str(), "42");
    }

    #[test]
    fn priority_parses_short_and_long_names() {
        assert_eq!("H".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("medium".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
