//! Drives one task through its phases.
//!
//! ```text
//! Created -> ScriptGeneration -> AssetGeneration -> Montage -> Finalize -> Completed
//!                    \                  \               \           \
//!                     +------------------+---------------+-----------+--> Failed / Cancelled
//! ```
//!
//! Script generation runs language by language. Asset generation runs three
//! branches at once (images, titles, narration followed by transcription),
//! each fanning out behind its own barrier, all joined by one outer barrier.
//! Montage and finalize fan out on the assembly pool. Any failure fails the
//! whole task; scenario files already written stay on disk.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::core::scenario::ScenarioUnit;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::orchestration::barrier::PhaseBarrier;
use crate::orchestration::failover::ServiceFailoverPolicy;
use crate::orchestration::pool::Pools;
use crate::orchestration::progress::{StatusReporter, TaskOutcome};
use crate::services::ServiceRegistry;
use crate::workers::{
    assemble_montage, finalize_video, generate_images, generate_narration, generate_scripts,
    generate_titles, transcribe_all, Lane, WorkerContext,
};
use crate::workflow::{PhaseHistoryEntry, PhaseState, TaskPhase};

/// Result of one orchestrator run.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    pub history: Vec<PhaseHistoryEntry>,
    pub scenario_count: usize,
    pub videos: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetBranch {
    Images,
    Titles,
    Voice,
}

pub struct TaskOrchestrator {
    work_dir: PathBuf,
    languages: Vec<String>,
    ctx: WorkerContext,
    phase: PhaseState,
    scenarios: Vec<ScenarioUnit>,
    videos: Vec<PathBuf>,
}

impl TaskOrchestrator {
    pub fn new(
        task: &Task,
        settings: Arc<Settings>,
        services: Arc<ServiceRegistry>,
        failover: Arc<ServiceFailoverPolicy>,
        cancel: CancellationToken,
        reporter: StatusReporter,
    ) -> Self {
        let pools = Pools::from_settings(&settings.pools);
        Self {
            work_dir: task.work_dir.clone(),
            languages: task.languages.clone(),
            ctx: WorkerContext {
                task_id: task.id,
                settings,
                services,
                pools,
                failover,
                cancel,
                reporter,
            },
            phase: PhaseState::new(),
            scenarios: Vec::new(),
            videos: Vec::new(),
        }
    }

    /// Replace the worker pools, e.g. to observe them from tests.
    pub fn with_pools(mut self, pools: Pools) -> Self {
        self.ctx.pools = pools;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.ctx.task_id
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase.current()
    }

    /// Run the task to a terminal phase.
    pub async fn run(mut self) -> TaskReport {
        let task_id = self.ctx.task_id;
        info!(task = %task_id, dir = %self.work_dir.display(), "task started");

        let outcome = match self.drive().await {
            Ok(()) => {
                info!(task = %task_id, videos = self.videos.len(), "task completed");
                TaskOutcome::Completed
            }
            Err(e) if e.is_cancelled() || self.ctx.cancel.is_cancelled() => {
                warn!(task = %task_id, phase = %self.phase.current(), "task cancelled");
                self.enter_terminal(TaskPhase::Cancelled);
                TaskOutcome::Cancelled
            }
            Err(e) => {
                error!(task = %task_id, phase = %self.phase.current(), error = %e, "task failed");
                self.enter_terminal(TaskPhase::Failed);
                TaskOutcome::Failed(e.to_string())
            }
        };

        TaskReport {
            task_id,
            outcome,
            history: self.phase.history().to_vec(),
            scenario_count: self.scenarios.len(),
            videos: self.videos,
        }
    }

    fn enter_terminal(&mut self, phase: TaskPhase) {
        if let Err(e) = self.phase.transition(phase) {
            warn!(task = %self.ctx.task_id, error = %e, "terminal transition rejected");
        }
    }

    fn enter(&mut self, phase: TaskPhase) -> Result<()> {
        self.ctx.checkpoint()?;
        self.phase.transition(phase)?;
        info!(task = %self.ctx.task_id, phase = %phase, "phase entered");
        Ok(())
    }

    async fn drive(&mut self) -> Result<()> {
        self.enter(TaskPhase::ScriptGeneration)?;
        let lanes = self.resolve_lanes()?;
        self.scenarios = generate_scripts(&self.ctx, &self.work_dir, &lanes).await?;
        info!(task = %self.ctx.task_id, scenarios = self.scenarios.len(), "scripts ready");

        self.enter(TaskPhase::AssetGeneration)?;
        self.generate_assets().await?;

        self.enter(TaskPhase::Montage)?;
        let report = PhaseBarrier::run(
            "montage",
            &self.ctx.pools.assembly,
            self.scenarios.clone(),
            &self.ctx.cancel,
            self.ctx.poll(),
            |_, unit| assemble_montage(self.ctx.clone(), unit),
        )
        .await?;
        report.into_values()?;

        self.enter(TaskPhase::Finalize)?;
        let report = PhaseBarrier::run(
            "finalize",
            &self.ctx.pools.assembly,
            self.scenarios.clone(),
            &self.ctx.cancel,
            self.ctx.poll(),
            |_, unit| finalize_video(self.ctx.clone(), unit),
        )
        .await?;
        self.videos = report.into_values()?;

        self.enter(TaskPhase::Completed)?;
        Ok(())
    }

    /// Configured languages of the task. Unknown ids are skipped but keep
    /// their lane position.
    fn resolve_lanes(&self) -> Result<Vec<Lane>> {
        let mut lanes = Vec::new();
        for (index, id) in self.languages.iter().enumerate() {
            match self.ctx.settings.language(id) {
                Ok(config) => lanes.push(Lane {
                    index,
                    id: id.clone(),
                    config: Arc::new(config.clone()),
                }),
                Err(e) => {
                    warn!(task = %self.ctx.task_id, lang = %id, error = %e, "skipping language");
                    self.ctx.reporter.status(index, "⚠️ Unknown language");
                }
            }
        }
        if lanes.is_empty() {
            return Err(Error::Config(format!(
                "task {} has no configured languages",
                self.ctx.task_id
            )));
        }
        Ok(lanes)
    }

    async fn generate_assets(&self) -> Result<()> {
        let units = Arc::new(self.scenarios.clone());
        let branches = vec![AssetBranch::Images, AssetBranch::Titles, AssetBranch::Voice];

        let report = PhaseBarrier::run(
            "assets",
            &self.ctx.pools.coordinators,
            branches,
            &self.ctx.cancel,
            self.ctx.poll(),
            |_, branch| {
                let ctx = self.ctx.clone();
                let units = Arc::clone(&units);
                async move {
                    match branch {
                        AssetBranch::Images => {
                            generate_images(&ctx, &units).await?;
                        }
                        AssetBranch::Titles => {
                            generate_titles(&ctx, &units).await?;
                        }
                        AssetBranch::Voice => {
                            generate_narration(&ctx, &units).await?;
                            ctx.checkpoint()?;
                            transcribe_all(&ctx, &units).await?;
                        }
                    }
                    Ok(())
                }
            },
        )
        .await?;
        report.into_values()?;
        Ok(())
    }
}
