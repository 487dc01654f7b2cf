//! Task data model for the generation queue.
//!
//! A task is one queued job: a working directory rendered into short videos
//! for one or more language lanes. Tasks are created when added to the queue
//! and only the queue (on behalf of the orchestrator running them) mutates
//! their status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::provider::ImageProvider;

/// Stable identifier for a task within the queue.
///
/// Ids are assigned sequentially by the queue and never reused while the
/// process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim_start_matches('#').parse()?))
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// An orchestrator is driving the task.
    Running,
    /// Every video of every lane was produced.
    Completed,
    /// A phase failed; the task needs a manual restart.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Stopped by the user.
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single job in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Directory holding the per-language source texts.
    pub work_dir: PathBuf,
    /// Language identifiers, one lane each, in display order.
    pub languages: Vec<String>,
    /// Image provider the task starts with. Rewritten by a manual switch
    /// while the task is still queued.
    pub image_service: ImageProvider,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Latest human-readable status per language lane.
    pub lane_status: Vec<String>,
    /// When the task was added.
    pub created_at: DateTime<Utc>,
    /// When the task last started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task last finished (any outcome).
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a queued task.
    pub fn new(
        id: TaskId,
        work_dir: impl Into<PathBuf>,
        languages: Vec<String>,
        image_service: ImageProvider,
    ) -> Self {
        let lane_status = vec!["Queued".to_string(); languages.len()];
        Self {
            id,
            work_dir: work_dir.into(),
            languages,
            image_service,
            status: TaskStatus::Queued,
            lane_status,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Record a lane status message. Out-of-range lanes are ignored.
    pub fn set_lane_status(&mut self, lane: usize, message: &str) {
        if let Some(slot) = self.lane_status.get_mut(lane) {
            *slot = message.to_string();
        }
    }

    /// Set the same status on every lane.
    pub fn set_all_lanes(&mut self, message: &str) {
        for slot in &mut self.lane_status {
            *slot = message.to_string();
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Running)
    }

    /// Whether the task has not been started since it was queued.
    pub fn is_queued(&self) -> bool {
        matches!(self.status, TaskStatus::Queued)
    }
}
