//! Scenario units and the text parsing that produces them.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::config::{LanguageConfig, Settings};
use crate::core::task::TaskId;

/// One short-video candidate: a scenario directory plus everything a phase
/// worker needs to process it.
///
/// Produced by script generation and never modified afterwards.
#[derive(Debug, Clone)]
pub struct ScenarioUnit {
    pub task_id: TaskId,
    /// Index of the language lane within the task.
    pub lang_index: usize,
    pub lang_id: String,
    pub language: Arc<LanguageConfig>,
    pub settings: Arc<Settings>,
    /// `<work_dir>/<lang>/shorts/scenario_<number>`
    pub path: PathBuf,
    /// 1-based scenario number within its language.
    pub number: usize,
}

impl ScenarioUnit {
    pub fn name(&self) -> String {
        format!("scenario_{}", self.number)
    }

    pub fn scenario_file(&self) -> PathBuf {
        self.path.join("scenario.txt")
    }

    pub fn prompts_file(&self) -> PathBuf {
        self.path.join("image_prompts.txt")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.path.join("images")
    }

    pub fn title_file(&self) -> PathBuf {
        self.path.join("title.txt")
    }

    pub fn audio_file(&self) -> PathBuf {
        self.path.join("audio.mp3")
    }

    pub fn subtitles_file(&self) -> PathBuf {
        self.path.join("subtitles.ass")
    }

    /// Directory receiving the finished videos (the `shorts` directory).
    pub fn output_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Final and temporary video paths, named after `title.txt` when present.
    pub async fn video_paths(&self) -> VideoPaths {
        let title = tokio::fs::read_to_string(self.title_file()).await.ok();
        let name = video_file_name(title.as_deref(), self.number);
        VideoPaths {
            temp: self.output_dir().join(format!("temp_{}", name)),
            fin: self.output_dir().join(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPaths {
    /// Silent montage, removed by the finalizer.
    pub temp: PathBuf,
    /// Video with subtitles burned in.
    pub fin: PathBuf,
}

/// A line opening a numbered block: `1.` or `1)`.
static NUMBERED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]").unwrap());

/// Leading numbering to strip, the separator being optional.
static NUMBERING_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]?\s*").unwrap());

fn strip_numbering(text: &str) -> &str {
    match NUMBERING_PREFIX_RE.find(text) {
        Some(m) => text[m.end()..].trim(),
        None => text.trim(),
    }
}

/// Split an LLM response into scenario texts.
///
/// A new scenario starts at every line that opens with `N.` or `N)` in its
/// first column. Whatever precedes the first numbered line is a scenario of
/// its own. Blocks left empty once their numbering is stripped are dropped.
pub fn split_scenarios(text: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();

    for line in text.trim().split('\n') {
        if blocks.is_empty() || NUMBERED_LINE_RE.is_match(line) {
            blocks.push(line.to_string());
        } else if let Some(current) = blocks.last_mut() {
            current.push('\n');
            current.push_str(line);
        }
    }

    blocks
        .iter()
        .map(|b| strip_numbering(b.trim()).to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

/// Parse numbered image prompts. Continuation lines are joined to the prompt
/// above them with a space.
pub fn parse_image_prompts(text: &str) -> Vec<String> {
    let mut prompts = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if NUMBERING_PREFIX_RE.is_match(line) {
            if let Some(done) = current.take() {
                prompts.push(done);
            }
            current = Some(line.to_string());
        } else if let Some(prompt) = current.as_mut() {
            prompt.push(' ');
            prompt.push_str(line);
        }
    }
    prompts.extend(current);

    prompts
        .iter()
        .map(|p| strip_numbering(p).to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Video file name from a title, or `video_<number>.mp4` without one.
pub fn video_file_name(title: Option<&str>, number: usize) -> String {
    let sanitized: String = title
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        format!("video_{}.mp4", number)
    } else {
        format!("{}.mp4", sanitized)
    }
}
