//! External collaborators the pipeline consumes.
//!
//! One trait per capability, one concrete type per provider. The
//! orchestrator only sees the traits; which provider backs a capability is
//! data held by the [`ServiceRegistry`].

mod elevenlabs;
mod ffmpeg;
mod googler;
mod openrouter;
mod pollinations;
mod recraft;
mod voicemaker;
mod whisper;

pub use elevenlabs::{ElevenLabsClient, VoiceTemplate};
pub use ffmpeg::{montage_args, FfmpegAssembler};
pub use googler::GooglerClient;
pub use openrouter::OpenRouterClient;
pub use pollinations::PollinationsClient;
pub use recraft::RecraftClient;
pub use voicemaker::VoicemakerClient;
pub use whisper::WhisperCli;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ModelParams, Settings};
use crate::core::provider::{ImageProvider, VoiceService};
use crate::error::{Error, Result};
use crate::subtitles::TimedSegment;

/// Account-level checks a remote provider can answer.
///
/// Registered next to the capability a provider backs, so account checks
/// never go through the task retry machinery.
#[async_trait]
pub trait ProviderAccount: Send + Sync {
    /// Verify credentials and reachability. Returns a short account summary.
    async fn check_connection(&self) -> Result<String>;

    /// Remaining quota as the provider words it. None when the provider
    /// has no notion of one.
    async fn balance(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Result of checking one provider account.
#[derive(Debug)]
pub struct AccountReport {
    pub service: String,
    pub connection: Result<String>,
    pub balance: Result<Option<String>>,
}

#[async_trait]
pub trait TextCompletionService: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_text: &str, model: &ModelParams) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// One image for one prompt. Style parameters come from the provider's
    /// settings.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait BatchImageGenerationService: Send + Sync {
    /// One image per prompt, in prompt order.
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<Vec<u8>>>;
}

/// Voice selection for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    /// Template uuid or voice id, depending on the service.
    pub voice: String,
    /// Locale such as `en-US`.
    pub language_code: String,
}

#[async_trait]
pub trait NarrationService: Send + Sync {
    async fn generate(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationStatus {
    Processing { label: String },
    Ready,
    Failed { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationFetch {
    Ready(Vec<u8>),
    Pending,
}

/// Narration through a remote job: submit, poll, then fetch.
#[async_trait]
pub trait TaskNarrationService: Send + Sync {
    async fn submit(&self, text: &str, voice: &VoiceParams) -> Result<String>;
    async fn poll(&self, job_id: &str) -> Result<NarrationStatus>;
    async fn fetch(&self, job_id: &str) -> Result<NarrationFetch>;
}

/// Speech-to-text through a single-instance external tool.
#[async_trait]
pub trait TranscriptionTool: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimedSegment>>;
}

#[async_trait]
pub trait VideoAssemblyTool: Send + Sync {
    /// Render `images` over `audio` into a video without subtitles.
    async fn assemble_silent(
        &self,
        images: &[PathBuf],
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;

    /// Burn `subtitles` into `video`, keeping its audio.
    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

#[derive(Clone)]
pub enum ImageBackend {
    Single(Arc<dyn ImageGenerationService>),
    Batch(Arc<dyn BatchImageGenerationService>),
}

#[derive(Clone)]
pub enum NarrationBackend {
    Direct(Arc<dyn NarrationService>),
    Tasked(Arc<dyn TaskNarrationService>),
}

/// Concrete service per capability and provider.
#[derive(Clone)]
pub struct ServiceRegistry {
    pub text: Arc<dyn TextCompletionService>,
    pub transcriber: Arc<dyn TranscriptionTool>,
    pub assembler: Arc<dyn VideoAssemblyTool>,
    images: HashMap<ImageProvider, ImageBackend>,
    narration: HashMap<VoiceService, NarrationBackend>,
    accounts: Vec<(String, Arc<dyn ProviderAccount>)>,
}

impl ServiceRegistry {
    pub fn new(
        text: Arc<dyn TextCompletionService>,
        transcriber: Arc<dyn TranscriptionTool>,
        assembler: Arc<dyn VideoAssemblyTool>,
    ) -> Self {
        Self {
            text,
            transcriber,
            assembler,
            images: HashMap::new(),
            narration: HashMap::new(),
            accounts: Vec::new(),
        }
    }

    pub fn with_image(mut self, provider: ImageProvider, backend: ImageBackend) -> Self {
        self.images.insert(provider, backend);
        self
    }

    pub fn with_narration(mut self, service: VoiceService, backend: NarrationBackend) -> Self {
        self.narration.insert(service, backend);
        self
    }

    pub fn with_account(mut self, service: impl Into<String>, account: Arc<dyn ProviderAccount>) -> Self {
        self.accounts.push((service.into(), account));
        self
    }

    /// Real HTTP and process backed services.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        let detailed = settings.detailed_logging();
        let api = &settings.api;

        let openrouter = Arc::new(OpenRouterClient::new(http.clone(), api.openrouter.clone(), detailed));
        let recraft = Arc::new(RecraftClient::new(http.clone(), api.recraft.clone()));
        let pollinations = Arc::new(PollinationsClient::new(http.clone(), api.pollinations.clone()));
        let googler = Arc::new(GooglerClient::new(
            http.clone(),
            api.googler.clone(),
            settings.pools.batch_images,
        ));
        let elevenlabs = Arc::new(ElevenLabsClient::new(http.clone(), api.elevenlabs.clone()));
        let voicemaker = Arc::new(VoicemakerClient::new(http, api.voicemaker.clone()));

        Ok(Self::new(
            openrouter.clone(),
            Arc::new(WhisperCli::new(settings.transcription.clone())),
            Arc::new(FfmpegAssembler::new(settings.assembly.clone())),
        )
        .with_image(ImageProvider::Recraft, ImageBackend::Single(recraft.clone()))
        .with_image(ImageProvider::Pollinations, ImageBackend::Single(pollinations.clone()))
        .with_image(ImageProvider::Googler, ImageBackend::Batch(googler.clone()))
        .with_narration(VoiceService::ElevenLabs, NarrationBackend::Tasked(elevenlabs.clone()))
        .with_narration(VoiceService::Voicemaker, NarrationBackend::Direct(voicemaker.clone()))
        .with_account("openrouter", openrouter)
        .with_account("recraft", recraft)
        .with_account("pollinations", pollinations)
        .with_account("googler", googler)
        .with_account("elevenlabs", elevenlabs)
        .with_account("voicemaker", voicemaker))
    }

    /// Check every registered account concurrently, in registration order.
    pub async fn account_reports(&self) -> Vec<AccountReport> {
        futures::future::join_all(self.accounts.iter().map(|(service, account)| async move {
            let (connection, balance) = futures::join!(account.check_connection(), account.balance());
            if let Err(e) = &connection {
                warn!(service = %service, error = %e, "connection check failed");
            }
            AccountReport {
                service: service.clone(),
                connection,
                balance,
            }
        }))
        .await
    }

    pub fn image(&self, provider: ImageProvider) -> Result<ImageBackend> {
        self.images
            .get(&provider)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no backend for image service {}", provider)))
    }

    pub fn narration(&self, service: VoiceService) -> Result<NarrationBackend> {
        self.narration
            .get(&service)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no backend for voice service {}", service)))
    }
}

/// Map an HTTP response status onto the error taxonomy: 5xx, 408 and 429 are
/// transient, any other failure status is a hard service error.
pub(crate) async fn check_status(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body.trim());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(Error::transient(service, message))
    } else {
        Err(Error::Service {
            service: service.to_string(),
            message,
        })
    }
}

/// Log a request/response pair when detailed logging is on.
pub(crate) fn log_exchange(detailed: bool, service: &str, request: &serde_json::Value, response: &[u8]) {
    if !detailed {
        return;
    }
    debug!(
        service,
        request = %request,
        response = %crate::log::summarize(response, 2000),
        "api exchange"
    );
}

/// Fetch a generated asset by URL.
pub(crate) async fn download(client: &reqwest::Client, service: &str, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;
    let bytes = check_status(service, response).await?.bytes().await?;
    if bytes.is_empty() {
        return Err(Error::transient(service, format!("empty download from {}", url)));
    }
    Ok(bytes.to_vec())
}

/// Refuse account calls without credentials.
pub(crate) fn require_key(service: &str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::Config(format!("{} API key is missing", service)));
    }
    Ok(())
}

/// `1234567` as `1,234,567`.
pub(crate) fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
