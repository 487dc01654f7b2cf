pub mod provider;
pub mod scenario;
pub mod task;

pub use provider::{ImageProvider, VoiceService};
pub use scenario::ScenarioUnit;
pub use task::{Task, TaskId, TaskStatus};
