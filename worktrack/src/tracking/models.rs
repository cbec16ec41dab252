// Tracking data model - shared structs for the gateway, the store and the shell
// Wire format is camelCase JSON, matching the remote project API

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Workflow status of a task as reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
    Blocked,
    /// Any status this client does not know about yet
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "To do"),
            TaskStatus::InProgress => write!(f, "In progress"),
            TaskStatus::Review => write!(f, "Review"),
            TaskStatus::Done => write!(f, "Done"),
            TaskStatus::Blocked => write!(f, "Blocked"),
            TaskStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Task priority as reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::Unknown => write!(f, "-"),
        }
    }
}

/// Aggregate of time already booked against a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkedTime {
    /// Total booked time in seconds
    pub total_seconds: u64,
    /// Number of tracking sessions that make up the total
    #[serde(default)]
    pub session_count: u32,
}

/// A task as served by the gateway.
///
/// The cache never patches a task field by field; a refetch replaces the
/// whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worked_time: Option<WorkedTime>,
    /// Set by the server when some session is currently open on this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_tracking: Option<bool>,
}

impl Task {
    /// Minimal task with default status and priority
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            scheduled_start: None,
            scheduled_end: None,
            worked_time: None,
            is_tracking: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Case-insensitive substring match against title and description.
    ///
    /// `needle` must already be lowercased; an empty needle matches everything.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle)
            || self
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(needle))
                .unwrap_or(false)
    }
}

/// One contiguous interval of worked time bound to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    /// Calendar day the session is booked on
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    /// Absent while the session is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackingSession {
    /// A session is open until the server stamps an end time on it
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A payload together with the instant it was captured.
///
/// Freshness is always evaluated against a clock reading, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub payload: T,
    pub captured_at: DateTime<Utc>,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T, captured_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            captured_at,
        }
    }

    /// Fresh iff `now - captured_at < ttl` (strict)
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        let age = now.signed_duration_since(self.captured_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age < ttl,
            // A TTL too large for chrono never expires
            Err(_) => true,
        }
    }
}
