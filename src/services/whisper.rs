use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::TranscriptionTool;
use crate::config::{expand_tilde, TranscriptionSettings};
use crate::error::{Error, Result};
use crate::subtitles::{parse_srt, TimedSegment};
use crate::util::run_command;

const TOOL: &str = "whisper";

/// whisper.cpp command line transcriber.
///
/// The tool saturates the GPU, so at most one instance runs per process;
/// concurrent callers queue on `running`.
pub struct WhisperCli {
    settings: TranscriptionSettings,
    running: Mutex<()>,
}

impl WhisperCli {
    pub fn new(settings: TranscriptionSettings) -> Self {
        Self {
            settings,
            running: Mutex::new(()),
        }
    }

    fn args(&self, audio: &Path, language: &str) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            expand_tilde(&self.settings.model_path).display().to_string(),
            "-f".to_string(),
            audio.display().to_string(),
            "-l".to_string(),
            language.to_lowercase(),
            "-osrt".to_string(),
            "-t".to_string(),
            self.settings.threads.to_string(),
            "--no-timestamps".to_string(),
        ];
        if self.settings.use_gpu {
            args.extend(["-gpu".to_string(), "0".to_string()]);
        }
        args
    }
}

/// Where whisper put its SRT: `<audio>.srt`, else `<stem>.srt`.
fn srt_output(audio: &Path) -> Option<PathBuf> {
    let mut appended = audio.as_os_str().to_owned();
    appended.push(".srt");
    [PathBuf::from(appended), audio.with_extension("srt")]
        .into_iter()
        .find(|p| p.exists())
}

#[async_trait]
impl TranscriptionTool for WhisperCli {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimedSegment>> {
        let binary = self.settings.binary_path()?;
        let model = expand_tilde(&self.settings.model_path);
        if !model.exists() {
            return Err(Error::Config(format!(
                "whisper model not found: {}",
                model.display()
            )));
        }

        let _guard = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.running.lock() => guard,
        };
        info!(audio = %audio.display(), language, "transcribing");
        run_command(
            &binary,
            self.args(audio, language),
            Some(self.settings.timeout()),
            cancel,
        )
        .await?;

        let srt = srt_output(audio)
            .ok_or_else(|| Error::process(TOOL, format!("no SRT written for {}", audio.display())))?;
        let content = tokio::fs::read_to_string(&srt).await?;
        if let Err(e) = tokio::fs::remove_file(&srt).await {
            debug!(path = %srt.display(), error = %e, "could not remove srt");
        }

        let segments = parse_srt(&content);
        if segments.is_empty() {
            return Err(Error::process(TOOL, "transcript is empty"));
        }
        Ok(segments)
    }
}
