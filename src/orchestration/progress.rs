//! Status events flowing from workers up to the queue and its observers.

use tokio::sync::mpsc;

use crate::core::provider::ImageProvider;
use crate::core::task::TaskId;

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    /// Lane status shown once the task stops.
    pub fn lane_status(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "Completed ✅",
            TaskOutcome::Failed(_) => "Failed ❌",
            TaskOutcome::Cancelled => "Cancelled ⏹",
        }
    }
}

/// Raised by workers of a running task.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Status { lane: usize, message: String },
    ServiceSwitched { from: ImageProvider, to: ImageProvider },
}

/// Events published by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    TaskStarted {
        task_id: TaskId,
    },
    Status {
        task_id: TaskId,
        lane: usize,
        message: String,
        progress: u8,
    },
    TaskFinished {
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    /// Every task in the queue completed.
    QueueFinished,
    /// A task failed; later tasks were not started.
    QueueHalted {
        task_id: TaskId,
        error: String,
    },
    /// The queue was stopped or its running task cancelled.
    QueueStopped,
    ServiceSwitched {
        task_id: TaskId,
        from: ImageProvider,
        to: ImageProvider,
        manual: bool,
    },
}

/// Progress percentage a status message stands for, if any.
pub fn progress_for(message: &str) -> Option<u8> {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n) || lower.contains(n));

    if has(&["✅", "completed", "❌", "failed"]) {
        Some(100)
    } else if has(&["🎬", "finaliz"]) {
        Some(95)
    } else if has(&["🎞️", "montage"]) {
        Some(80)
    } else if has(&["✒️", "transcri"]) {
        Some(65)
    } else if has(&["🎤", "narration", "audio"]) {
        Some(50)
    } else if has(&["🖼️", "image"]) && !has(&["prompt"]) {
        Some(30)
    } else if has(&["📝", "scenario", "prompt"]) {
        Some(15)
    } else {
        None
    }
}

/// Per-lane progress that never goes backwards.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    lanes: Vec<u8>,
}

impl ProgressTracker {
    pub fn new(lanes: usize) -> Self {
        Self {
            lanes: vec![0; lanes],
        }
    }

    /// Apply a status message to `lane` and return its progress.
    pub fn update(&mut self, lane: usize, message: &str) -> u8 {
        if lane >= self.lanes.len() {
            self.lanes.resize(lane + 1, 0);
        }
        if let Some(p) = progress_for(message) {
            self.lanes[lane] = self.lanes[lane].max(p);
        }
        self.lanes[lane]
    }

    pub fn get(&self, lane: usize) -> u8 {
        self.lanes.get(lane).copied().unwrap_or(0)
    }
}

/// Handle workers use to publish status for their task.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    task_id: TaskId,
    tx: Option<mpsc::UnboundedSender<WorkerEvent>>,
}

impl StatusReporter {
    pub fn new(task_id: TaskId, tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            task_id,
            tx: Some(tx),
        }
    }

    /// A reporter that drops everything.
    pub fn disabled(task_id: TaskId) -> Self {
        Self { task_id, tx: None }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn status(&self, lane: usize, message: impl Into<String>) {
        self.send(WorkerEvent::Status {
            lane,
            message: message.into(),
        });
    }

    pub fn service_switched(&self, from: ImageProvider, to: ImageProvider) {
        self.send(WorkerEvent::ServiceSwitched { from, to });
    }

    fn send(&self, event: WorkerEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means the task finished; late events are moot
            let _ = tx.send(event);
        }
    }
}
