//! Image generation across every scenario of a task.
//!
//! All prompts of all languages are collected into one pending list. The
//! active provider is read from the failover policy at the start of each
//! unit of work: a batch provider takes every pending prompt in one unit, a
//! sequential provider takes one prompt per unit. Saved images are never
//! regenerated, so a provider switch only affects what is still pending.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use tracing::{info, warn};

use super::WorkerContext;
use crate::core::provider::ImageProvider;
use crate::core::scenario::{parse_image_prompts, ScenarioUnit};
use crate::error::{Error, Result};
use crate::orchestration::failover::FailureDecision;
use crate::services::ImageBackend;
use crate::util::sleep_or_cancel;

#[derive(Debug, Clone)]
struct ImageJob {
    lane: usize,
    scenario: String,
    prompt: String,
    dir: PathBuf,
    /// 1-based position within the scenario's prompt list.
    index: usize,
}

impl ImageJob {
    fn path(&self, provider: ImageProvider) -> PathBuf {
        self.dir
            .join(format!("img_{}.{}", self.index, provider.extension()))
    }
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() > 60 {
        format!("{}...", prompt.chars().take(60).collect::<String>())
    } else {
        prompt.to_string()
    }
}

async fn collect_jobs(units: &[ScenarioUnit]) -> Result<Vec<ImageJob>> {
    let mut jobs = Vec::new();
    for unit in units {
        let text = tokio::fs::read_to_string(unit.prompts_file()).await?;
        let prompts = parse_image_prompts(&text);
        info!(scenario = %unit.name(), lang = %unit.lang_id, prompts = prompts.len(), "image prompts read");
        if prompts.is_empty() {
            continue;
        }
        let dir = unit.images_dir();
        tokio::fs::create_dir_all(&dir).await?;
        jobs.extend(prompts.into_iter().enumerate().map(|(i, prompt)| ImageJob {
            lane: unit.lang_index,
            scenario: unit.name(),
            prompt,
            dir: dir.clone(),
            index: i + 1,
        }));
    }
    Ok(jobs)
}

/// One unit of work on `provider`. Returns how many pending jobs it saved.
async fn run_unit(
    ctx: &WorkerContext,
    provider: ImageProvider,
    pending: &VecDeque<ImageJob>,
    saved: usize,
    total: usize,
) -> Result<usize> {
    let client = ctx.client(&provider.to_string());

    match ctx.services.image(provider)? {
        ImageBackend::Batch(service) => {
            let lanes: BTreeSet<usize> = pending.iter().map(|j| j.lane).collect();
            for lane in lanes {
                ctx.reporter.status(
                    lane,
                    format!("🖼️ {}: generating {} images", provider, pending.len()),
                );
            }
            let prompts: Vec<String> = pending.iter().map(|j| j.prompt.clone()).collect();
            let images = client
                .attempt("batch images", service.generate_batch(&prompts))
                .await?;
            if images.len() != prompts.len() {
                return Err(Error::transient(
                    provider.to_string(),
                    format!("expected {} images, got {}", prompts.len(), images.len()),
                ));
            }
            for (job, bytes) in pending.iter().zip(images) {
                tokio::fs::write(job.path(provider), bytes).await?;
            }
            Ok(prompts.len())
        }
        ImageBackend::Single(service) => {
            let Some(job) = pending.front() else {
                return Ok(0);
            };
            ctx.reporter.status(
                job.lane,
                format!(
                    "🖼️ {} [{}/{}]: {}",
                    provider,
                    saved + 1,
                    total,
                    preview(&job.prompt)
                ),
            );
            let bytes = client.attempt("image", service.generate(&job.prompt)).await?;
            tokio::fs::write(job.path(provider), bytes).await?;
            info!(scenario = %job.scenario, image = job.index, provider = %provider, "image saved");
            Ok(1)
        }
    }
}

/// Generate and save every image of `units`. Returns the number saved.
pub async fn generate_images(ctx: &WorkerContext, units: &[ScenarioUnit]) -> Result<usize> {
    let jobs = collect_jobs(units).await?;
    let total = jobs.len();
    if total == 0 {
        warn!(task = %ctx.task_id, "no image prompts to generate");
        return Ok(0);
    }
    info!(task = %ctx.task_id, total, "image generation started");

    let mut pending: VecDeque<ImageJob> = jobs.into();
    let mut saved = 0;

    while let Some(first) = pending.front() {
        ctx.checkpoint()?;
        let lane = first.lane;
        let unit = ctx.failover.begin_unit();
        let provider = unit.provider;
        if let Some(from) = unit.returned_from {
            ctx.reporter.service_switched(from, provider);
            ctx.reporter
                .status(lane, format!("🖼️ {} worked, back to {}", from, provider));
        }

        match run_unit(ctx, provider, &pending, saved, total).await {
            Ok(done) => {
                ctx.failover.record_success(provider);
                pending.drain(..done.min(pending.len()));
                saved += done;
                if !pending.is_empty() && !provider.is_batch() {
                    sleep_or_cancel(ctx.settings.retry.image_pause(), &ctx.cancel).await?;
                }
            }
            Err(e) if e.is_remote() => {
                warn!(task = %ctx.task_id, provider = %provider, error = %e, "image attempt error");
                match ctx.failover.record_failure(provider) {
                    FailureDecision::Retry { delay } => {
                        ctx.reporter.status(
                            lane,
                            format!("🖼️ {} error, retrying in {}s", provider, delay.as_secs()),
                        );
                        sleep_or_cancel(delay, &ctx.cancel).await?;
                    }
                    FailureDecision::Switched { from, to } => {
                        ctx.reporter.service_switched(from, to);
                        ctx.reporter
                            .status(lane, format!("🖼️ {} error, switching to {}", from, to));
                    }
                    FailureDecision::ExhaustedBackoff { delay } => {
                        ctx.reporter.status(
                            lane,
                            format!("🖼️ {} keeps erroring, retrying in {}s", provider, delay.as_secs()),
                        );
                        sleep_or_cancel(delay, &ctx.cancel).await?;
                    }
                    FailureDecision::Superseded { active } => {
                        info!(task = %ctx.task_id, stale = %provider, active = %active, "provider changed during attempt");
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    info!(task = %ctx.task_id, saved, "image generation finished");
    Ok(saved)
}
