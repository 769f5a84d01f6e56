use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::error::TaskvaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Active,
    Done,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Active => "active",
            CompletionStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CompletionStatus::Active),
            "done" => Some(CompletionStatus::Done),
            _ => None,
        }
    }

    pub fn completed(&self) -> bool {
        matches!(self, CompletionStatus::Done)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn attachment(&self, key: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.key == key)
    }

    pub fn has_attachment(&self, key: &str) -> bool {
        self.attachment(key).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

impl CreateTask {
    /// Trim text fields and reject an empty title.
    pub fn normalized(self) -> Result<Self, TaskvaultError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskvaultError::InvalidInput("title is required".into()));
        }
        Ok(Self {
            title,
            description: self.description.trim().to_string(),
            completed: self.completed,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl UpdateTask {
    pub fn normalized(self) -> Result<Self, TaskvaultError> {
        let title = match self.title {
            Some(t) => {
                let t = t.trim().to_string();
                if t.is_empty() {
                    return Err(TaskvaultError::InvalidInput("title cannot be empty".into()));
                }
                Some(t)
            }
            None => None,
        };
        Ok(Self {
            title,
            description: self.description.map(|d| d.trim().to_string()),
            completed: self.completed,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Matches tasks whose title contains this word (case-insensitive).
    pub title: Option<String>,
    /// Matches tasks created on this UTC calendar day.
    pub date: Option<NaiveDate>,
    pub status: Option<CompletionStatus>,
    pub limit: Option<i64>,
}

impl TaskFilter {
    /// Build a filter from raw query-string values.
    pub fn parse(
        title: Option<&str>,
        date: Option<&str>,
        status: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Self, TaskvaultError> {
        let title = title
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let date = match date.filter(|d| !d.is_empty()) {
            Some(d) => Some(NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                TaskvaultError::InvalidInput(format!("invalid date '{d}', expected YYYY-MM-DD"))
            })?),
            None => None,
        };
        let status = match status.filter(|s| !s.is_empty()) {
            Some(s) => Some(CompletionStatus::from_str(s).ok_or_else(|| {
                TaskvaultError::InvalidInput(format!("invalid status '{s}', expected active or done"))
            })?),
            None => None,
        };
        Ok(Self {
            title,
            date,
            status,
            limit,
        })
    }
}

/// Lowercased alphanumeric words of a title, used for word search.
pub fn title_tokens(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_lowercase() && !c.is_ascii_digit())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
