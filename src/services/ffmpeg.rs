//! Video assembly through ffmpeg.
//!
//! Each image is scaled up, animated with a slow zoom and pan, and
//! cross-faded into the next one over the narration track. Subtitles are
//! burned in by a second pass so the silent montage can be produced before
//! transcription finishes.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::VideoAssemblyTool;
use crate::config::{expand_tilde, AssemblySettings, CodecProfile, PanDirection};
use crate::error::{Error, Result};
use crate::util::run_command;

const FPS: u32 = 30;
const OUTPUT_SIZE: &str = "1080x1920";

pub struct FfmpegAssembler {
    settings: AssemblySettings,
}

impl FfmpegAssembler {
    pub fn new(settings: AssemblySettings) -> Self {
        Self { settings }
    }

    async fn probe_duration(&self, audio: &Path, cancel: &CancellationToken) -> Result<f64> {
        let ffprobe = self.settings.ffprobe_path()?;
        let output = run_command(
            &ffprobe,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                audio.as_os_str(),
            ],
            None,
            cancel,
        )
        .await?;
        output
            .stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::process("ffprobe", format!("bad duration '{}': {}", output.stdout.trim(), e)))
    }
}

fn pan_for(direction: PanDirection, index: usize) -> PanDirection {
    match direction {
        PanDirection::Cycle => [
            PanDirection::Horizontal,
            PanDirection::Vertical,
            PanDirection::Infinity,
        ][index % 3],
        other => other,
    }
}

fn image_filter(settings: &AssemblySettings, index: usize, image_duration: f64) -> String {
    let mut stream = format!("[{}:v]scale=2160:3840,setsar=1,format=yuv420p", index);

    if (settings.zoom_effect || settings.pan_effect) && image_duration > 0.0 {
        let total_frames = (image_duration * FPS as f64) as u64;
        let (mut px, mut py) = ("0".to_string(), "0".to_string());
        if settings.pan_effect {
            let amp = settings.pan_amount * 100.0;
            let period = 20.0 * FPS as f64;
            match pan_for(settings.pan_direction, index) {
                PanDirection::Horizontal => px = format!("sin(2*PI*on/{})*{}", period, amp),
                PanDirection::Vertical => py = format!("sin(2*PI*on/{})*{}", period, amp),
                _ => {
                    px = format!("sin(2*PI*on/{})*{}", period, amp);
                    py = format!("sin(4*PI*on/{})*{}", period, amp / 2.0);
                }
            }
        }
        let zoom = if settings.zoom_effect {
            let start = settings.zoom_start;
            let end = settings.zoom_end.max(start);
            format!(
                "{}+{}*cos(2*PI*on/{})",
                (start + end) / 2.0,
                (end - start) / 2.0,
                10.0 * FPS as f64
            )
        } else {
            "1.1".to_string()
        };
        stream.push_str(&format!(
            ",zoompan=z='{z}':d={d}:s={size}:x='(iw-iw/({z}))/2+{px}':y='(ih-ih/({z}))/2+{py}':fps={fps}",
            z = zoom,
            d = total_frames,
            size = OUTPUT_SIZE,
            px = px,
            py = py,
            fps = FPS,
        ));
    } else {
        stream.push_str(",scale=1080:1920:force_original_aspect_ratio=decrease,pad=1080:1920:(ow-iw)/2:(oh-ih)/2");
    }
    stream.push_str(&format!("[v{}]", index));
    stream
}

fn codec_args(codec: &CodecProfile) -> Vec<String> {
    let mut args = vec!["-c:v".to_string(), codec.codec.clone()];
    if let Some(bitrate) = &codec.bitrate {
        args.extend(["-b:v".to_string(), bitrate.clone()]);
    } else if let (Some(preset), Some(crf)) = (&codec.preset, &codec.crf) {
        args.extend([
            "-preset".to_string(),
            preset.clone(),
            "-crf".to_string(),
            crf.clone(),
        ]);
    }
    args
}

/// Arguments for the silent montage of `images` over `audio` lasting
/// `total_duration` seconds.
///
/// Time is split evenly between images after subtracting the cross-fades;
/// when that leaves nothing the fades are dropped.
pub fn montage_args(
    settings: &AssemblySettings,
    images: &[PathBuf],
    audio: &Path,
    total_duration: f64,
    output: &Path,
) -> Vec<String> {
    let count = images.len().max(1) as f64;
    let transitions = images.len().saturating_sub(1);
    let mut fade = settings.transition_duration;
    let mut image_duration = (total_duration - transitions as f64 * fade) / count;
    if image_duration <= 0.0 {
        image_duration = total_duration / count;
        fade = 0.0;
    }

    let mut args = vec!["-y".to_string()];
    for (i, image) in images.iter().enumerate() {
        let length = image_duration + if i < transitions { fade } else { 0.0 };
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            length.to_string(),
            "-i".to_string(),
            image.display().to_string(),
        ]);
    }
    args.extend(["-i".to_string(), audio.display().to_string()]);

    let mut filters: Vec<String> = (0..images.len())
        .map(|i| image_filter(settings, i, image_duration))
        .collect();
    let mut last = "[v0]".to_string();
    for i in 0..transitions {
        let offset = (i + 1) as f64 * image_duration + i as f64 * fade;
        filters.push(format!(
            "{}[v{}]xfade=transition=fade:duration={}:offset={}[vt{}]",
            last,
            i + 1,
            fade,
            offset,
            i
        ));
        last = format!("[vt{}]", i);
    }
    filters.push(format!("{}format=yuv420p[outv]", last));

    args.extend([
        "-filter_complex".to_string(),
        filters.join(";"),
        "-map".to_string(),
        "[outv]".to_string(),
        "-map".to_string(),
        format!("{}:a", images.len()),
    ]);
    args.extend(codec_args(&settings.codec()));
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-shortest".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// Escape a path for use inside an ffmpeg filter option.
fn filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn burn_args(settings: &AssemblySettings, video: &Path, subtitles: &Path, output: &Path) -> Vec<String> {
    let mut filter = format!("ass=filename='{}'", filter_path(subtitles));
    if let Some(fonts) = &settings.fonts_dir {
        filter.push_str(&format!(":fontsdir='{}'", filter_path(&expand_tilde(fonts))));
    }
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-vf".to_string(),
        filter,
    ];
    args.extend(codec_args(&settings.codec()));
    args.extend([
        "-c:a".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ]);
    args
}

#[async_trait]
impl VideoAssemblyTool for FfmpegAssembler {
    async fn assemble_silent(
        &self,
        images: &[PathBuf],
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if images.is_empty() {
            return Err(Error::LocalInput("montage needs at least one image".to_string()));
        }
        let ffmpeg = self.settings.ffmpeg_path()?;
        let duration = self.probe_duration(audio, cancel).await?;
        info!(images = images.len(), duration, output = %output.display(), "assembling montage");
        run_command(
            &ffmpeg,
            montage_args(&self.settings, images, audio, duration, output),
            None,
            cancel,
        )
        .await?;
        Ok(output.to_path_buf())
    }

    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let ffmpeg = self.settings.ffmpeg_path()?;
        info!(video = %video.display(), output = %output.display(), "burning subtitles");
        run_command(
            &ffmpeg,
            burn_args(&self.settings, video, subtitles, output),
            None,
            cancel,
        )
        .await?;
        Ok(output.to_path_buf())
    }
}
