//! One-off render of a sample video, used to try subtitle and montage
//! settings without running a task.
//!
//! The preview directory holds `audio.mp3` and an `images/` folder. The
//! render writes `subtitles.ass` and `preview_video.mp4` next to them.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SubtitleStyle;
use crate::error::{Error, Result};
use crate::services::ServiceRegistry;
use crate::subtitles::render_ass;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// File layout of a preview directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPaths {
    pub audio: PathBuf,
    pub images: PathBuf,
    pub subtitles: PathBuf,
    pub temp: PathBuf,
    pub output: PathBuf,
}

impl PreviewPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            audio: dir.join("audio.mp3"),
            images: dir.join("images"),
            subtitles: dir.join("subtitles.ass"),
            temp: dir.join("preview_temp.mp4"),
            output: dir.join("preview_video.mp4"),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Every image in `dir`, ordered by file name.
async fn preview_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Montage, transcribe, subtitle and burn the preview in `dir`.
///
/// The temporary montage is removed whatever the outcome.
pub async fn render_preview(
    dir: &Path,
    language: &str,
    services: &ServiceRegistry,
    style: &SubtitleStyle,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let paths = PreviewPaths::new(dir);
    for required in [&paths.audio, &paths.images] {
        if !tokio::fs::try_exists(required).await? {
            return Err(Error::LocalInput(format!("preview needs {}", required.display())));
        }
    }
    let images = preview_images(&paths.images).await?;
    if images.is_empty() {
        return Err(Error::LocalInput(format!("no images in {}", paths.images.display())));
    }

    let result = render(&paths, &images, language, services, style, cancel).await;
    if tokio::fs::try_exists(&paths.temp).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(&paths.temp).await {
            warn!(path = %paths.temp.display(), error = %e, "could not remove temporary preview");
        }
    }
    result
}

async fn render(
    paths: &PreviewPaths,
    images: &[PathBuf],
    language: &str,
    services: &ServiceRegistry,
    style: &SubtitleStyle,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    info!(images = images.len(), "preview montage started");
    let silent = services
        .assembler
        .assemble_silent(images, &paths.audio, &paths.temp, cancel)
        .await?;

    let segments = services
        .transcriber
        .transcribe(&paths.audio, language, cancel)
        .await?;
    tokio::fs::write(&paths.subtitles, render_ass(&segments, style)?).await?;

    let video = services
        .assembler
        .burn_subtitles(&silent, &paths.subtitles, &paths.output, cancel)
        .await?;
    info!(video = %video.display(), "preview rendered");
    Ok(video)
}
