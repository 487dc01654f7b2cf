use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::core::provider::{ImageProvider, VoiceService};
use crate::{Error, Result};

/// Generation settings.
///
/// Loaded once and shared as `Arc<Settings>` by every orchestrator. The only
/// value that changes while a task runs is the active image provider, which
/// lives in the failover policy rather than here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detailed_logging: bool,
    pub default_image_service: ImageProvider,
    pub auto_fallback_image_service: bool,
    /// Consecutive image failures before the provider is switched.
    pub image_service_retry_attempts: u32,
    pub retry: RetrySettings,
    pub pools: PoolSettings,
    pub api: ApiSettings,
    pub languages: BTreeMap<String, LanguageConfig>,
    pub transcription: TranscriptionSettings,
    pub assembly: AssemblySettings,
    pub subtitle: SubtitleStyle,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detailed_logging: false,
            default_image_service: ImageProvider::Recraft,
            auto_fallback_image_service: true,
            image_service_retry_attempts: 5,
            retry: RetrySettings::default(),
            pools: PoolSettings::default(),
            api: ApiSettings::default(),
            languages: BTreeMap::new(),
            transcription: TranscriptionSettings::default(),
            assembly: AssemblySettings::default(),
            subtitle: SubtitleStyle::default(),
        }
    }
}

/// Retry and polling intervals, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Sleep between attempts of a failing remote call.
    pub backoff_ms: u64,
    /// Optional cap on attempts. Unset means retry until cancelled.
    pub max_attempts: Option<u32>,
    /// Sleep between image attempts on the same provider.
    pub failover_delay_ms: u64,
    /// Sleep once the failure threshold is hit with auto-fallback off.
    pub exhausted_delay_ms: u64,
    /// How often a waiting barrier re-checks cancellation.
    pub barrier_poll_ms: u64,
    /// Pause between successful sequential image calls.
    pub image_pause_ms: u64,
    /// Interval between narration task status polls.
    pub narration_poll_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            backoff_ms: 15_000,
            max_attempts: None,
            failover_delay_ms: 10_000,
            exhausted_delay_ms: 30_000,
            barrier_poll_ms: 200,
            image_pause_ms: 2_000,
            narration_poll_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn failover_delay(&self) -> Duration {
        Duration::from_millis(self.failover_delay_ms)
    }

    pub fn exhausted_delay(&self) -> Duration {
        Duration::from_millis(self.exhausted_delay_ms)
    }

    pub fn barrier_poll(&self) -> Duration {
        Duration::from_millis(self.barrier_poll_ms.max(1))
    }

    pub fn image_pause(&self) -> Duration {
        Duration::from_millis(self.image_pause_ms)
    }

    pub fn narration_poll(&self) -> Duration {
        Duration::from_millis(self.narration_poll_ms)
    }
}

/// Worker pool widths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub general: usize,
    pub assembly: usize,
    pub batch_images: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            general: 20,
            assembly: 3,
            batch_images: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiSettings {
    pub openrouter: OpenRouterSettings,
    pub recraft: RecraftSettings,
    pub pollinations: PollinationsSettings,
    pub googler: GooglerSettings,
    pub elevenlabs: ElevenLabsSettings,
    pub voicemaker: VoicemakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelParams {
    pub id: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub base_url: String,
    pub models: Vec<ModelParams>,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            models: vec![ModelParams {
                id: "openai/gpt-3.5-turbo".to_string(),
                temperature: 0.7,
                max_tokens: 1500,
            }],
        }
    }
}

impl OpenRouterSettings {
    /// The model every text call uses: the first configured one.
    pub fn primary_model(&self) -> Result<&ModelParams> {
        self.models
            .first()
            .ok_or_else(|| Error::Config("no OpenRouter model configured".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecraftSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub style: String,
    pub size: String,
    pub negative_prompt: String,
}

impl Default for RecraftSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://external.api.recraft.ai/v1".to_string(),
            model: "recraftv3".to_string(),
            style: "digital_illustration".to_string(),
            size: "1024x1024".to_string(),
            negative_prompt: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollinationsSettings {
    pub token: String,
    pub base_url: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub nologo: bool,
}

impl Default for PollinationsSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: "https://image.pollinations.ai/prompt/".to_string(),
            model: "flux".to_string(),
            width: 1024,
            height: 1024,
            nologo: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GooglerSettings {
    pub api_key: String,
    pub base_url: String,
    pub aspect_ratio: String,
    pub seed: Option<u64>,
}

impl Default for GooglerSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://app.recrafter.fun/api/v1".to_string(),
            aspect_ratio: "IMAGE_ASPECT_RATIO_PORTRAIT".to_string(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsSettings {
    pub api_key: String,
    pub base_url: String,
}

impl Default for ElevenLabsSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://voiceapi.csv666.ru".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicemakerSettings {
    pub api_key: String,
    pub base_url: String,
    pub engine: String,
    pub sample_rate: String,
}

impl Default for VoicemakerSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://developer.voicemaker.in/voice/api".to_string(),
            engine: "neural".to_string(),
            sample_rate: "48000".to_string(),
        }
    }
}

/// One language lane.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LanguageConfig {
    /// Display name.
    pub name: String,
    /// System prompt splitting the source text into numbered scenarios.
    pub scenario_prompt: String,
    /// System prompt producing numbered image prompts for one scenario.
    pub image_prompt_prompt: String,
    /// System prompt for the video title. Titles are skipped when unset.
    pub title_prompt: Option<String>,
    pub voice_service: VoiceService,
    /// ElevenLabs template uuid or Voicemaker voice id.
    pub voice_template: String,
    /// Locale such as `uk-UA`; its language part feeds transcription.
    pub voice_code: String,
}

impl LanguageConfig {
    /// Two-letter language hint for the transcriber, `en` when unknown.
    pub fn transcription_language(&self) -> String {
        self.voice_code
            .split('-')
            .next()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "en".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper CLI binary. Looked up on `PATH` when unset.
    pub binary: Option<String>,
    pub model_path: String,
    pub threads: u32,
    pub use_gpu: bool,
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            binary: None,
            model_path: "~/.reelforge/models/ggml-base.bin".to_string(),
            threads: 4,
            use_gpu: true,
            timeout_secs: 600,
        }
    }
}

impl TranscriptionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn binary_path(&self) -> Result<PathBuf> {
        resolve_binary(self.binary.as_deref(), "whisper-cli")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PanDirection {
    /// Rotate horizontal, vertical and infinity per image.
    #[default]
    Cycle,
    Horizontal,
    Vertical,
    Infinity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CodecProfile {
    pub codec: String,
    pub bitrate: Option<String>,
    pub preset: Option<String>,
    pub crf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
    pub transition_duration: f64,
    pub zoom_effect: bool,
    pub zoom_start: f64,
    pub zoom_end: f64,
    pub pan_effect: bool,
    pub pan_direction: PanDirection,
    pub pan_amount: f64,
    pub selected_codec: String,
    pub codecs: BTreeMap<String, CodecProfile>,
    pub fonts_dir: Option<String>,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        let mut codecs = BTreeMap::new();
        for (name, codec) in [
            ("NVIDIA (h264_nvenc)", "h264_nvenc"),
            ("AMD (h264_amf)", "h264_amf"),
            ("Apple (h264_videotoolbox)", "h264_videotoolbox"),
        ] {
            codecs.insert(
                name.to_string(),
                CodecProfile {
                    codec: codec.to_string(),
                    bitrate: Some("8000k".to_string()),
                    ..Default::default()
                },
            );
        }
        codecs.insert(
            "CPU (libx264)".to_string(),
            CodecProfile {
                codec: "libx264".to_string(),
                preset: Some("medium".to_string()),
                crf: Some("23".to_string()),
                ..Default::default()
            },
        );
        Self {
            ffmpeg: None,
            ffprobe: None,
            transition_duration: 1.0,
            zoom_effect: true,
            zoom_start: 1.0,
            zoom_end: 1.2,
            pan_effect: true,
            pan_direction: PanDirection::Cycle,
            pan_amount: 0.05,
            selected_codec: "CPU (libx264)".to_string(),
            codecs,
            fonts_dir: None,
        }
    }
}

impl AssemblySettings {
    /// Selected codec profile, falling back to plain libx264.
    pub fn codec(&self) -> CodecProfile {
        self.codecs
            .get(&self.selected_codec)
            .cloned()
            .unwrap_or_else(|| CodecProfile {
                codec: "libx264".to_string(),
                ..Default::default()
            })
    }

    pub fn ffmpeg_path(&self) -> Result<PathBuf> {
        resolve_binary(self.ffmpeg.as_deref(), "ffmpeg")
    }

    pub fn ffprobe_path(&self) -> Result<PathBuf> {
        resolve_binary(self.ffprobe.as_deref(), "ffprobe")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SubtitleAnimation {
    #[default]
    None,
    Fade,
    Karaoke,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleStyle {
    pub fontname: String,
    pub fontsize: u32,
    pub primary_color: String,
    pub secondary_color: String,
    pub outline_color: String,
    pub shadow_color: String,
    pub outline: f32,
    pub shadow: f32,
    pub bold: bool,
    pub italic: bool,
    /// Numpad alignment, 2 is bottom centre.
    pub alignment: u8,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
    pub animation: SubtitleAnimation,
    pub max_words_per_segment: usize,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            fontname: "Arial".to_string(),
            fontsize: 60,
            primary_color: "&H00FFFFFF".to_string(),
            secondary_color: "&H000000FF".to_string(),
            outline_color: "&H00000000".to_string(),
            shadow_color: "&H96000000".to_string(),
            outline: 3.0,
            shadow: 3.0,
            bold: true,
            italic: false,
            alignment: 2,
            margin_l: 20,
            margin_r: 20,
            margin_v: 60,
            animation: SubtitleAnimation::None,
            max_words_per_segment: 8,
        }
    }
}

impl Settings {
    pub fn reelforge_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".reelforge"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::reelforge_dir()?.join("reelforge.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load settings from `path`, falling back to defaults when it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading settings");
        if !path.exists() {
            debug!("settings file not found, using defaults");
            return Ok(Self::default());
        }
        let settings: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            languages = settings.languages.len(),
            default_image_service = %settings.default_image_service,
            "settings loaded"
        );
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!(dir = %parent.display(), "creating settings directory");
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn language(&self, id: &str) -> Result<&LanguageConfig> {
        self.languages
            .get(id)
            .ok_or_else(|| Error::Config(format!("unknown language '{}'", id)))
    }

    /// Detailed request/response logging, from the settings or debug mode.
    pub fn detailed_logging(&self) -> bool {
        self.detailed_logging || crate::log::is_debug()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn resolve_binary(configured: Option<&str>, name: &str) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(expand_tilde(path)),
        None => which::which(name)
            .map_err(|e| Error::Config(format!("{} not found on PATH: {}", name, e))),
    }
}
