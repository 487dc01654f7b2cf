//! Phase workers: one module per unit of work a task goes through.
//!
//! Workers are plain async functions over a [`WorkerContext`]. They report
//! progress through the context's reporter and check the cancellation token
//! between steps; the orchestrator decides how many run at once.

mod finalize;
mod images;
mod montage;
mod narration;
mod preview;
mod script;
mod titles;
mod transcription;

pub use finalize::finalize_video;
pub use images::generate_images;
pub use montage::assemble_montage;
pub use narration::{generate_narration, narrate_scenario};
pub use preview::{render_preview, PreviewPaths};
pub use script::generate_scripts;
pub use titles::{generate_title, generate_titles};
pub use transcription::{transcribe_all, transcribe_scenario};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{LanguageConfig, Settings};
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::failover::ServiceFailoverPolicy;
use crate::orchestration::pool::Pools;
use crate::orchestration::progress::StatusReporter;
use crate::orchestration::retry::{RetryPolicy, RetryableClient};
use crate::services::ServiceRegistry;

/// One language of a task.
#[derive(Debug, Clone)]
pub struct Lane {
    /// Position in the task's language list; status updates are keyed by it.
    pub index: usize,
    pub id: String,
    pub config: Arc<LanguageConfig>,
}

/// Everything a worker needs, shared by all workers of one task run.
#[derive(Clone)]
pub struct WorkerContext {
    pub task_id: TaskId,
    pub settings: Arc<Settings>,
    pub services: Arc<ServiceRegistry>,
    pub pools: Pools,
    pub failover: Arc<ServiceFailoverPolicy>,
    pub cancel: CancellationToken,
    pub reporter: StatusReporter,
}

impl WorkerContext {
    /// Retrying client for `service`, bound to this task's cancellation.
    pub fn client(&self, service: &str) -> RetryableClient {
        RetryableClient::new(
            service,
            RetryPolicy::from_settings(&self.settings.retry),
            self.cancel.clone(),
        )
        .with_detailed_logging(self.settings.detailed_logging())
    }

    /// Barrier poll interval.
    pub fn poll(&self) -> Duration {
        self.settings.retry.barrier_poll()
    }

    /// Fail with [`Error::Cancelled`] once the task is cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
