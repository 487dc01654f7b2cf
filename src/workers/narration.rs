use std::path::PathBuf;

use tracing::info;

use super::WorkerContext;
use crate::core::scenario::ScenarioUnit;
use crate::error::{Error, Result};
use crate::orchestration::barrier::PhaseBarrier;
use crate::services::{
    NarrationBackend, NarrationFetch, NarrationStatus, TaskNarrationService, VoiceParams,
};
use crate::util::sleep_or_cancel;

async fn narrate_tasked(
    ctx: &WorkerContext,
    unit: &ScenarioUnit,
    service: &dyn TaskNarrationService,
    text: &str,
    voice: &VoiceParams,
) -> Result<Vec<u8>> {
    let name = unit.name();
    let lane = unit.lang_index;
    let client = ctx.client("elevenlabs");
    let poll = ctx.settings.retry.narration_poll();

    ctx.reporter
        .status(lane, format!("🎤 Narration: creating job for {}", name));
    let job = client.call("submit", || service.submit(text, voice)).await?;
    info!(scenario = %name, lang = %unit.lang_id, job = %job, "narration job created");

    loop {
        ctx.checkpoint()?;
        match client.call("status", || service.poll(&job)).await? {
            NarrationStatus::Ready => break,
            NarrationStatus::Failed { detail } => {
                return Err(Error::Service {
                    service: "elevenlabs".to_string(),
                    message: format!("job {} for {}: {}", job, name, detail),
                });
            }
            NarrationStatus::Processing { label } => {
                ctx.reporter
                    .status(lane, format!("🎤 Narration ({}): {}", name, label));
                sleep_or_cancel(poll, &ctx.cancel).await?;
            }
        }
    }

    loop {
        ctx.checkpoint()?;
        ctx.reporter
            .status(lane, format!("🎤 Narration: downloading audio for {}", name));
        match client.call("result", || service.fetch(&job)).await? {
            NarrationFetch::Ready(bytes) => return Ok(bytes),
            NarrationFetch::Pending => {
                ctx.reporter
                    .status(lane, format!("🎤 Narration: audio for {} not ready yet", name));
                sleep_or_cancel(poll, &ctx.cancel).await?;
            }
        }
    }
}

/// Narrate one scenario into `audio.mp3` with its language's voice service.
pub async fn narrate_scenario(ctx: WorkerContext, unit: ScenarioUnit) -> Result<PathBuf> {
    ctx.checkpoint()?;
    let text = tokio::fs::read_to_string(unit.scenario_file()).await?;
    let voice = VoiceParams {
        voice: unit.language.voice_template.clone(),
        language_code: unit.language.voice_code.clone(),
    };
    let service = unit.language.voice_service;

    let audio = match ctx.services.narration(service)? {
        NarrationBackend::Tasked(tasked) => {
            narrate_tasked(&ctx, &unit, tasked.as_ref(), &text, &voice).await?
        }
        NarrationBackend::Direct(direct) => {
            ctx.reporter.status(
                unit.lang_index,
                format!("🎤 {}: generating audio for {}", service, unit.name()),
            );
            ctx.client(&service.to_string())
                .call("narration", || direct.generate(&text, &voice))
                .await?
        }
    };
    if audio.is_empty() {
        return Err(Error::Service {
            service: service.to_string(),
            message: format!("empty audio for {}", unit.name()),
        });
    }

    let path = unit.audio_file();
    tokio::fs::write(&path, audio).await?;
    ctx.reporter
        .status(unit.lang_index, format!("🎤 Audio for {} saved", unit.name()));
    Ok(path)
}

/// Narrate every scenario, one language at a time; the scenarios of a
/// language run concurrently on the general pool.
pub async fn generate_narration(ctx: &WorkerContext, units: &[ScenarioUnit]) -> Result<Vec<PathBuf>> {
    let mut languages: Vec<usize> = units.iter().map(|u| u.lang_index).collect();
    languages.sort_unstable();
    languages.dedup();

    let mut audio = Vec::with_capacity(units.len());
    for lang in languages {
        ctx.checkpoint()?;
        let batch: Vec<ScenarioUnit> = units
            .iter()
            .filter(|u| u.lang_index == lang)
            .cloned()
            .collect();
        info!(task = %ctx.task_id, lane = lang, scenarios = batch.len(), "narration started");
        let report = PhaseBarrier::run(
            "narration",
            &ctx.pools.general,
            batch,
            &ctx.cancel,
            ctx.poll(),
            |_, unit| narrate_scenario(ctx.clone(), unit),
        )
        .await?;
        audio.extend(report.into_values()?);
    }
    Ok(audio)
}
