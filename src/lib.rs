pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod services;
pub mod subtitles;
pub mod util;
pub mod workers;
pub mod workflow;

pub use error::{Error, Result};
pub use orchestration::{QueueEvent, TaskOrchestrator, TaskOutcome, TaskQueue};
