//! Phase state machine for a single task run.

mod state;
mod types;

pub use state::{PhaseHistoryEntry, PhaseState};
pub use types::TaskPhase;
