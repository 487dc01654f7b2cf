//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Settings with millisecond timings and two language lanes
//! - Working directories with per-language source texts
//! - Mock services behind every service trait, with call counters and
//!   failure injection

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use reelforge::config::{LanguageConfig, ModelParams, Settings};
use reelforge::core::{ImageProvider, Task, TaskId, VoiceService};
use reelforge::orchestration::{
    FailoverConfig, ServiceFailoverPolicy, StatusReporter, TaskOrchestrator, WorkerEvent,
};
use reelforge::services::{
    BatchImageGenerationService, ImageBackend, ImageGenerationService, NarrationBackend,
    NarrationFetch, NarrationService, NarrationStatus, ProviderAccount, ServiceRegistry,
    TaskNarrationService,
    TextCompletionService, TranscriptionTool, VideoAssemblyTool, VoiceParams,
};
use reelforge::subtitles::TimedSegment;
use reelforge::{Error, Result};

pub const SCENARIO_PROMPT: &str = "SPLIT INTO SCENARIOS";
pub const IMAGE_PROMPT_PROMPT: &str = "WRITE IMAGE PROMPTS";
pub const TITLE_PROMPT: &str = "WRITE A TITLE";

/// Upper bound for any single integration test to reach its end state.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn language(name: &str, voice_service: VoiceService, voice_code: &str) -> LanguageConfig {
    LanguageConfig {
        name: name.to_string(),
        scenario_prompt: SCENARIO_PROMPT.to_string(),
        image_prompt_prompt: IMAGE_PROMPT_PROMPT.to_string(),
        title_prompt: Some(TITLE_PROMPT.to_string()),
        voice_service,
        voice_template: format!("{}-voice", name.to_lowercase()),
        voice_code: voice_code.to_string(),
    }
}

/// Settings with `en` (ElevenLabs) and `uk` (Voicemaker) lanes and
/// millisecond timings.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.image_service_retry_attempts = 2;
    settings.retry.backoff_ms = 1;
    settings.retry.failover_delay_ms = 1;
    settings.retry.exhausted_delay_ms = 1;
    settings.retry.barrier_poll_ms = 5;
    settings.retry.image_pause_ms = 0;
    settings.retry.narration_poll_ms = 1;
    settings.pools.general = 4;
    settings.pools.assembly = 2;
    settings.pools.batch_images = 3;
    settings.api.openrouter.models = vec![ModelParams {
        id: "test/model".to_string(),
        temperature: 0.5,
        max_tokens: 100,
    }];
    settings
        .languages
        .insert("en".to_string(), language("English", VoiceService::ElevenLabs, "en-US"));
    settings
        .languages
        .insert("uk".to_string(), language("Ukrainian", VoiceService::Voicemaker, "uk-UA"));
    settings
}

/// A working directory with a source text for each of `languages`.
/// The first language uses `rewritten_text.txt`, the others
/// `translation.txt`.
pub struct WorkDir {
    pub temp_dir: TempDir,
}

impl WorkDir {
    pub fn new(languages: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        for (i, lang) in languages.iter().enumerate() {
            let dir = temp_dir.path().join(lang);
            std::fs::create_dir_all(&dir).expect("Failed to create language directory");
            let name = if i == 0 { "rewritten_text.txt" } else { "translation.txt" };
            std::fs::write(dir.join(name), format!("A long story told in {}.", lang))
                .expect("Failed to write source text");
        }
        Self { temp_dir }
    }

    /// A directory with no source texts at all.
    pub fn empty() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn scenario_dir(&self, lang: &str, number: usize) -> PathBuf {
        self.path()
            .join(lang)
            .join("shorts")
            .join(format!("scenario_{}", number))
    }

    /// Every finished video of a language, sorted.
    pub fn videos(&self, lang: &str) -> Vec<String> {
        let shorts = self.path().join(lang).join("shorts");
        let mut names: Vec<String> = std::fs::read_dir(shorts)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.ends_with(".mp4"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

// ============================================================================
// Mock services
// ============================================================================

/// Answers by system prompt: a numbered scenario list, a numbered prompt
/// list, or a title derived from the scenario.
pub struct MockText {
    pub scenarios: usize,
    pub prompts: usize,
    pub calls: AtomicUsize,
    pub title_calls: AtomicUsize,
}

impl MockText {
    pub fn new(scenarios: usize, prompts: usize) -> Self {
        Self {
            scenarios,
            prompts,
            calls: AtomicUsize::new(0),
            title_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextCompletionService for MockText {
    async fn generate(&self, system_prompt: &str, user_text: &str, _model: &ModelParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match system_prompt {
            SCENARIO_PROMPT => (1..=self.scenarios)
                .map(|n| format!("{}. Story {} of {}", n, n, user_text))
                .collect::<Vec<_>>()
                .join("\n"),
            IMAGE_PROMPT_PROMPT => (1..=self.prompts)
                .map(|n| format!("{}) picture {} for {}", n, n, user_text))
                .collect::<Vec<_>>()
                .join("\n"),
            TITLE_PROMPT => {
                self.title_calls.fetch_add(1, Ordering::SeqCst);
                let words: Vec<&str> = user_text.split_whitespace().take(2).collect();
                format!("Title: {}", words.join(" "))
            }
            other => return Err(Error::LocalInput(format!("unexpected prompt {}", other))),
        };
        Ok(text)
    }
}

#[async_trait]
impl ProviderAccount for MockText {
    async fn check_connection(&self) -> Result<String> {
        Ok("connected".to_string())
    }

    async fn balance(&self) -> Result<Option<String>> {
        Ok(Some(format!("{} calls", self.calls.load(Ordering::SeqCst))))
    }
}

/// Single-image provider. Fails with a transient error while `failures`
/// is above zero, or always when `always_fail` is set.
pub struct MockImages {
    pub name: &'static str,
    pub calls: AtomicUsize,
    pub failures: AtomicUsize,
    pub always_fail: AtomicBool,
}

impl MockImages {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        let mock = Self::new(name);
        mock.always_fail.store(true, Ordering::SeqCst);
        mock
    }
}

#[async_trait]
impl ImageGenerationService for MockImages {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::transient(self.name, "503 Service Unavailable"));
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::transient(self.name, "429 Too Many Requests"));
        }
        Ok(format!("{}:{}", self.name, prompt).into_bytes())
    }
}

/// A failing provider also refuses connection checks, the way an expired
/// key would.
#[async_trait]
impl ProviderAccount for MockImages {
    async fn check_connection(&self) -> Result<String> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::Service {
                service: self.name.to_string(),
                message: "401 Unauthorized".to_string(),
            });
        }
        Ok(format!("{} ok", self.name))
    }
}

/// Batch provider whose per-prompt calls finish in reverse order.
pub struct MockBatchImages {
    pub batches: AtomicUsize,
}

impl MockBatchImages {
    pub fn new() -> Self {
        Self {
            batches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BatchImageGenerationService for MockBatchImages {
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<Vec<u8>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let total = prompts.len() as u64;
        reelforge::orchestration::run_ordered(3, prompts.to_vec(), |index, prompt| async move {
            tokio::time::sleep(Duration::from_millis((total - index as u64) * 3)).await;
            Ok(prompt.into_bytes())
        })
        .await
    }
}

/// Task-based narration: every job reports one processing state and one
/// pending fetch before its audio is ready.
pub struct MockTaskNarration {
    pub submits: AtomicUsize,
    polls: Mutex<HashMap<String, usize>>,
    fetches: Mutex<HashMap<String, usize>>,
    pub fail_jobs: AtomicBool,
}

impl MockTaskNarration {
    pub fn new() -> Self {
        Self {
            submits: AtomicUsize::new(0),
            polls: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            fail_jobs: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TaskNarrationService for MockTaskNarration {
    async fn submit(&self, _text: &str, voice: &VoiceParams) -> Result<String> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-job-{}", voice.voice, n))
    }

    async fn poll(&self, job_id: &str) -> Result<NarrationStatus> {
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Ok(NarrationStatus::Failed {
                detail: "voice quota exceeded".to_string(),
            });
        }
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            Ok(NarrationStatus::Processing {
                label: "in queue".to_string(),
            })
        } else {
            Ok(NarrationStatus::Ready)
        }
    }

    async fn fetch(&self, job_id: &str) -> Result<NarrationFetch> {
        let mut fetches = self.fetches.lock().unwrap();
        let count = fetches.entry(job_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            Ok(NarrationFetch::Pending)
        } else {
            Ok(NarrationFetch::Ready(b"ID3 elevenlabs audio".to_vec()))
        }
    }
}

pub struct MockNarration {
    pub calls: AtomicUsize,
}

impl MockNarration {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NarrationService for MockNarration {
    async fn generate(&self, _text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ID3 voicemaker {}", voice.language_code).into_bytes())
    }
}

/// Transcriber that checks it is never run concurrently.
pub struct MockTranscriber {
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub overlapped: AtomicBool,
    pub fail: AtomicBool,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TranscriptionTool for MockTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<TimedSegment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::process("whisper", "model file is corrupt"));
        }
        assert!(audio.exists(), "transcribing missing audio {}", audio.display());
        Ok(vec![
            TimedSegment {
                start: 0.0,
                end: 1.2,
                text: format!("hello in {}", language),
            },
            TimedSegment {
                start: 1.2,
                end: 2.5,
                text: "and goodbye".to_string(),
            },
        ])
    }
}

/// Writes small placeholder videos. When `block_montage` is set the montage
/// waits for cancellation instead, signalling `montage_started` first.
pub struct MockAssembler {
    pub montages: AtomicUsize,
    pub burns: AtomicUsize,
    pub block_montage: AtomicBool,
    pub montage_started: Notify,
    pub delay: Duration,
}

impl MockAssembler {
    pub fn new() -> Self {
        Self {
            montages: AtomicUsize::new(0),
            burns: AtomicUsize::new(0),
            block_montage: AtomicBool::new(false),
            montage_started: Notify::new(),
            delay: Duration::from_millis(5),
        }
    }
}

#[async_trait]
impl VideoAssemblyTool for MockAssembler {
    async fn assemble_silent(
        &self,
        images: &[PathBuf],
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if self.block_montage.load(Ordering::SeqCst) {
            self.montage_started.notify_one();
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }
        assert!(!images.is_empty());
        assert!(audio.exists());
        tokio::time::sleep(self.delay).await;
        self.montages.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, format!("silent video of {} images", images.len())).await?;
        Ok(output.to_path_buf())
    }

    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        assert!(video.exists() && subtitles.exists());
        tokio::time::sleep(self.delay).await;
        self.burns.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"final video").await?;
        Ok(output.to_path_buf())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Every mock, shared with the registry built from them.
pub struct Mocks {
    pub text: Arc<MockText>,
    pub recraft: Arc<MockImages>,
    pub pollinations: Arc<MockImages>,
    pub googler: Arc<MockBatchImages>,
    pub elevenlabs: Arc<MockTaskNarration>,
    pub voicemaker: Arc<MockNarration>,
    pub transcriber: Arc<MockTranscriber>,
    pub assembler: Arc<MockAssembler>,
}

impl Mocks {
    /// Mocks producing `scenarios` scenarios per language with `prompts`
    /// image prompts each.
    pub fn new(scenarios: usize, prompts: usize) -> Self {
        Self {
            text: Arc::new(MockText::new(scenarios, prompts)),
            recraft: Arc::new(MockImages::new("recraft")),
            pollinations: Arc::new(MockImages::new("pollinations")),
            googler: Arc::new(MockBatchImages::new()),
            elevenlabs: Arc::new(MockTaskNarration::new()),
            voicemaker: Arc::new(MockNarration::new()),
            transcriber: Arc::new(MockTranscriber::new()),
            assembler: Arc::new(MockAssembler::new()),
        }
    }

    pub fn with_recraft(mut self, recraft: MockImages) -> Self {
        self.recraft = Arc::new(recraft);
        self
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new(
            self.text.clone(),
            self.transcriber.clone(),
            self.assembler.clone(),
        )
        .with_image(ImageProvider::Recraft, ImageBackend::Single(self.recraft.clone()))
        .with_image(
            ImageProvider::Pollinations,
            ImageBackend::Single(self.pollinations.clone()),
        )
        .with_image(ImageProvider::Googler, ImageBackend::Batch(self.googler.clone()))
        .with_narration(
            VoiceService::ElevenLabs,
            NarrationBackend::Tasked(self.elevenlabs.clone()),
        )
        .with_narration(
            VoiceService::Voicemaker,
            NarrationBackend::Direct(self.voicemaker.clone()),
        )
        .with_account("openrouter", self.text.clone())
        .with_account("recraft", self.recraft.clone())
        .with_account("pollinations", self.pollinations.clone());
        Arc::new(registry)
    }
}

/// An orchestrator for `task` and the receiver of its worker events.
pub fn orchestrator(
    task: &Task,
    settings: &Arc<Settings>,
    mocks: &Mocks,
    cancel: CancellationToken,
) -> (TaskOrchestrator, mpsc::UnboundedReceiver<WorkerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let failover = Arc::new(ServiceFailoverPolicy::new(
        FailoverConfig::from_settings(settings),
        task.image_service,
    ));
    let orchestrator = TaskOrchestrator::new(
        task,
        Arc::clone(settings),
        mocks.registry(),
        failover,
        cancel,
        StatusReporter::new(task.id, tx),
    );
    (orchestrator, rx)
}

pub fn test_task(id: u64, dir: &WorkDir, languages: &[&str], provider: ImageProvider) -> Task {
    Task::new(
        TaskId(id),
        dir.path(),
        languages.iter().map(|l| l.to_string()).collect(),
        provider,
    )
}

/// Drain whatever events are buffered.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
