//! Task phase state with transition validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::TaskPhase;

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: TaskPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the phase of one task run and rejects out-of-order transitions.
///
/// Created -> ScriptGeneration -> AssetGeneration -> Montage -> Finalize -> Completed
///
/// Any working phase may move to Failed; any non-terminal phase may move to
/// Cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    phase: TaskPhase,
    history: Vec<PhaseHistoryEntry>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self {
            phase: TaskPhase::Created,
            history: vec![PhaseHistoryEntry {
                phase: TaskPhase::Created,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn can_transition(&self, target: TaskPhase) -> bool {
        let current = self.phase;
        match target {
            TaskPhase::Cancelled => !current.is_terminal(),
            TaskPhase::Failed => current.can_fail(),
            _ => matches!(
                (current, target),
                (TaskPhase::Created, TaskPhase::ScriptGeneration)
                    | (TaskPhase::ScriptGeneration, TaskPhase::AssetGeneration)
                    | (TaskPhase::AssetGeneration, TaskPhase::Montage)
                    | (TaskPhase::Montage, TaskPhase::Finalize)
                    | (TaskPhase::Finalize, TaskPhase::Completed)
            ),
        }
    }

    /// Move to `target`, recording it in the history.
    pub fn transition(&mut self, target: TaskPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn current(&self) -> TaskPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    /// Visited phases in order, without timestamps.
    pub fn phases(&self) -> Vec<TaskPhase> {
        self.history.iter().map(|e| e.phase).collect()
    }
}
