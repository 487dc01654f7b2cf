use std::path::PathBuf;

use tracing::info;

use super::WorkerContext;
use crate::core::scenario::ScenarioUnit;
use crate::error::{Error, Result};
use crate::subtitles::render_ass;

/// Transcribe one scenario's narration into a styled `subtitles.ass`.
pub async fn transcribe_scenario(ctx: &WorkerContext, unit: &ScenarioUnit) -> Result<PathBuf> {
    ctx.checkpoint()?;
    let audio = unit.audio_file();
    if !tokio::fs::try_exists(&audio).await? {
        return Err(Error::LocalInput(format!(
            "no narration audio for {} ({})",
            unit.name(),
            unit.lang_id
        )));
    }

    ctx.reporter
        .status(unit.lang_index, format!("✒️ Transcribing {}", unit.name()));
    let language = unit.language.transcription_language();
    let segments = ctx
        .services
        .transcriber
        .transcribe(&audio, &language, &ctx.cancel)
        .await?;
    let ass = render_ass(&segments, &unit.settings.subtitle)?;

    let path = unit.subtitles_file();
    tokio::fs::write(&path, ass).await?;
    info!(scenario = %unit.name(), lang = %unit.lang_id, segments = segments.len(), "subtitles written");
    Ok(path)
}

/// Transcribe every scenario in order. The transcriber is a single-instance
/// tool, so this never runs more than one at a time.
pub async fn transcribe_all(ctx: &WorkerContext, units: &[ScenarioUnit]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(units.len());
    for unit in units {
        written.push(transcribe_scenario(ctx, unit).await?);
    }
    Ok(written)
}
