//! Wire types for the markmap rendering service.
//!
//! These are the JSON bodies returned by the HTTP surface. They carry no
//! behavior; the server builds them and clients deserialize them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A single downloadable file belonging to an artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLink {
    pub file_name: String,
    pub url: String,
}

/// Response body for a successful submission.
///
/// Cache hits return the stored value unchanged, so two identical submissions
/// observe the same `base_name` and links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub success: bool,
    pub message: String,
    pub base_name: String,
    /// Unix seconds at which the artifact set was created.
    pub timestamp: i64,
    /// Name of the HTML rendering, kept for clients of the `/upload` route.
    pub file_name: String,
    pub preview_url: String,
    pub source: ArtifactLink,
    pub html: ArtifactLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<ArtifactLink>,
    pub png_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

/// Metadata for a file that currently exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileView {
    pub file_name: String,
    pub url: String,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
}

/// Listing of an artifact set, keyed by file type (`md`, `html`, `png`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactListing {
    pub base_name: String,
    pub files: BTreeMap<String, StoredFileView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: Uuid,
    pub state: TaskState,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_task_omits_completion_fields() {
        let view = TaskView {
            task_id: Uuid::nil(),
            state: TaskState::Pending,
            message: "queued".to_string(),
            created_at: time::macros::datetime!(2024-05-01 12:00 UTC),
            completed_at: None,
            error: None,
        };

        let json = serde_json::to_value(&view).expect("serialize task view");
        assert_eq!(json["state"], "pending");
        assert_eq!(json["created_at"], "2024-05-01T12:00:00Z");
        assert!(json.get("completed_at").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }
}
