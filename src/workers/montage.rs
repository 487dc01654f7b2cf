use std::path::{Path, PathBuf};

use tracing::info;

use super::WorkerContext;
use crate::core::scenario::ScenarioUnit;
use crate::error::{Error, Result};

/// Image number `k` of `img_<k>.<ext>`.
fn image_number(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("img_")?
        .parse()
        .ok()
}

/// Images of a scenario ordered by number. When a number exists under two
/// extensions after a provider switch, the name sorting first is kept.
async fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(usize, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(k) = image_number(&path) {
            found.push((k, path));
        }
    }
    found.sort();
    found.dedup_by_key(|(k, _)| *k);
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

/// Render the silent montage of one scenario to its temporary video path.
pub async fn assemble_montage(ctx: WorkerContext, unit: ScenarioUnit) -> Result<PathBuf> {
    ctx.checkpoint()?;
    let images_dir = unit.images_dir();
    let images = if tokio::fs::try_exists(&images_dir).await? {
        list_images(&images_dir).await?
    } else {
        Vec::new()
    };
    if images.is_empty() {
        return Err(Error::LocalInput(format!(
            "no images for {} ({})",
            unit.name(),
            unit.lang_id
        )));
    }
    let audio = unit.audio_file();
    if !tokio::fs::try_exists(&audio).await? {
        return Err(Error::LocalInput(format!("no audio for {} ({})", unit.name(), unit.lang_id)));
    }

    ctx.reporter
        .status(unit.lang_index, format!("🎞️ Montage for {}", unit.name()));
    let paths = unit.video_paths().await;
    let video = ctx
        .services
        .assembler
        .assemble_silent(&images, &audio, &paths.temp, &ctx.cancel)
        .await?;
    info!(scenario = %unit.name(), lang = %unit.lang_id, images = images.len(), "montage done");
    Ok(video)
}
