use std::path::PathBuf;

use tracing::{info, warn};

use super::WorkerContext;
use crate::core::scenario::ScenarioUnit;
use crate::error::{Error, Result};

/// Burn the subtitles into the silent montage, producing the final video.
/// The temporary montage is removed whatever the outcome.
pub async fn finalize_video(ctx: WorkerContext, unit: ScenarioUnit) -> Result<PathBuf> {
    let paths = unit.video_paths().await;
    let result = burn(&ctx, &unit, &paths.temp, &paths.fin).await;

    if tokio::fs::try_exists(&paths.temp).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(&paths.temp).await {
            warn!(path = %paths.temp.display(), error = %e, "could not remove temporary video");
        }
    }
    result
}

async fn burn(
    ctx: &WorkerContext,
    unit: &ScenarioUnit,
    temp: &std::path::Path,
    fin: &std::path::Path,
) -> Result<PathBuf> {
    ctx.checkpoint()?;
    ctx.reporter
        .status(unit.lang_index, format!("🎬 Finalizing {}", unit.name()));

    let subtitles = unit.subtitles_file();
    for input in [temp, subtitles.as_path()] {
        if !tokio::fs::try_exists(input).await? {
            return Err(Error::LocalInput(format!(
                "missing {} for {}",
                input.display(),
                unit.name()
            )));
        }
    }

    let video = ctx
        .services
        .assembler
        .burn_subtitles(temp, &subtitles, fin, &ctx.cancel)
        .await?;
    info!(scenario = %unit.name(), lang = %unit.lang_id, video = %video.display(), "video finalized");
    Ok(video)
}
