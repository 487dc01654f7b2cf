//! Pipeline phase definitions.

use serde::{Deserialize, Serialize};

/// Phases a task moves through while an orchestrator drives it.
///
/// The happy path is:
/// 1. ScriptGeneration - scenarios and image prompts, language by language
/// 2. AssetGeneration - images, titles and narration+transcription in parallel
/// 3. Montage - silent videos on the assembly pool
/// 4. Finalize - subtitles burned into the silent videos
/// 5. Completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Created,
    ScriptGeneration,
    AssetGeneration,
    Montage,
    Finalize,
    Completed,
    Failed,
    Cancelled,
}

impl TaskPhase {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }

    /// Whether a failure inside this phase may fail the task.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            TaskPhase::ScriptGeneration
                | TaskPhase::AssetGeneration
                | TaskPhase::Montage
                | TaskPhase::Finalize
        )
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Created => write!(f, "created"),
            TaskPhase::ScriptGeneration => write!(f, "script_generation"),
            TaskPhase::AssetGeneration => write!(f, "asset_generation"),
            TaskPhase::Montage => write!(f, "montage"),
            TaskPhase::Finalize => write!(f, "finalize"),
            TaskPhase::Completed => write!(f, "completed"),
            TaskPhase::Failed => write!(f, "failed"),
            TaskPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}
