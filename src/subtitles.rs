//! SRT parsing, styled ASS rendering and ASS style import.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::config::{SubtitleAnimation, SubtitleStyle};
use crate::error::{Error, Result};

/// One transcribed span of speech, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

fn parse_srt_time(value: &str) -> Option<f64> {
    let (clock, millis) = value.trim().split_once([',', '.'])?;
    let mut parts = clock.split(':').map(|p| p.trim().parse::<u64>());
    let (h, m, s) = (parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?);
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = millis.trim().parse().ok()?;
    Some((h * 3600 + m * 60 + s) as f64 + ms as f64 / 1000.0)
}

/// Parse SRT text. Malformed blocks are skipped with a warning.
pub fn parse_srt(content: &str) -> Vec<TimedSegment> {
    let normalized = content.replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 3 {
            continue;
        }
        let Some((start, end)) = lines[1].split_once(" --> ") else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_srt_time(start), parse_srt_time(end)) else {
            warn!(block = lines[0], "skipping srt block with bad timestamps");
            continue;
        };
        let text = lines[2..].join(" ").trim().to_string();
        if !text.is_empty() {
            segments.push(TimedSegment { start, end, text });
        }
    }
    segments
}

/// `H:MM:SS.cc`
fn ass_time(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        centis / 360_000,
        (centis / 6_000) % 60,
        (centis / 100) % 60,
        centis % 100
    )
}

fn ass_bool(value: bool) -> i8 {
    if value {
        -1
    } else {
        0
    }
}

fn animation_tag(animation: SubtitleAnimation) -> &'static str {
    match animation {
        SubtitleAnimation::None => "",
        SubtitleAnimation::Fade => r"{\fad(250,250)}",
        SubtitleAnimation::Karaoke => r"{\fad(150,150)}",
    }
}

/// Break a segment into chunks of at most `max_words`, sharing its duration
/// evenly between words.
fn chunk_segment(segment: &TimedSegment, max_words: usize) -> Vec<TimedSegment> {
    let words: Vec<&str> = segment.text.split_whitespace().collect();
    let max_words = max_words.max(1);
    if words.len() <= max_words {
        return vec![segment.clone()];
    }
    let per_word = (segment.end - segment.start) / words.len() as f64;
    words
        .chunks(max_words)
        .enumerate()
        .map(|(i, chunk)| {
            let first = i * max_words;
            TimedSegment {
                start: segment.start + first as f64 * per_word,
                end: segment.start + (first + chunk.len()) as f64 * per_word,
                text: chunk.join(" "),
            }
        })
        .collect()
}

/// Render segments as an ASS document for a 1080x1920 video.
pub fn render_ass(segments: &[TimedSegment], style: &SubtitleStyle) -> Result<String> {
    if segments.is_empty() {
        return Err(Error::LocalInput("no subtitle segments to render".to_string()));
    }

    let mut out = String::new();
    out.push_str("[Script Info]\nScriptType: v4.00+\nPlayResX: 1080\nPlayResY: 1920\nWrapStyle: 0\nScaledBorderAndShadow: yes\n\n");
    out.push_str("[V4+ Styles]\n");
    out.push_str("Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n");
    let _ = writeln!(
        out,
        "Style: Default,{},{},{},{},{},{},{},{},0,0,100,100,0,0,1,{},{},{},{},{},{},1\n",
        style.fontname,
        style.fontsize,
        style.primary_color,
        style.secondary_color,
        style.outline_color,
        style.shadow_color,
        ass_bool(style.bold),
        ass_bool(style.italic),
        style.outline,
        style.shadow,
        style.alignment,
        style.margin_l,
        style.margin_r,
        style.margin_v,
    );
    out.push_str("[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");

    let tag = animation_tag(style.animation);
    for segment in segments {
        for chunk in chunk_segment(segment, style.max_words_per_segment) {
            let _ = writeln!(
                out,
                "Dialogue: 0,{},{},Default,,0,0,0,,{}{}",
                ass_time(chunk.start),
                ass_time(chunk.end),
                tag,
                chunk.text.replace('\n', r"\N")
            );
        }
    }
    Ok(out)
}

/// One `Style:` line of an ASS file, keyed by its `Format:` column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssStyle {
    fields: HashMap<String, String>,
}

impl AssStyle {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Copy the columns this style defines onto `style`. Columns that are
    /// missing or unparseable leave the current value alone.
    pub fn apply_to(&self, style: &mut SubtitleStyle) {
        if let Some(font) = self.get("Fontname").filter(|f| !f.is_empty()) {
            style.fontname = font.to_string();
        }
        if let Some(size) = self.parsed::<f32>("Fontsize") {
            style.fontsize = size.round().max(1.0) as u32;
        }
        let colours = [
            ("PrimaryColour", &mut style.primary_color),
            ("SecondaryColour", &mut style.secondary_color),
            ("OutlineColour", &mut style.outline_color),
            ("BackColour", &mut style.shadow_color),
        ];
        for (key, target) in colours {
            if let Some(colour) = self.get(key).filter(|c| c.starts_with("&H")) {
                *target = colour.to_string();
            }
        }
        if let Some(bold) = self.get("Bold") {
            style.bold = bold == "-1";
        }
        if let Some(italic) = self.get("Italic") {
            style.italic = italic == "-1";
        }
        if let Some(outline) = self.parsed("Outline") {
            style.outline = outline;
        }
        if let Some(shadow) = self.parsed("Shadow") {
            style.shadow = shadow;
        }
        if let Some(alignment) = self.parsed::<u8>("Alignment").filter(|a| (1..=9).contains(a)) {
            style.alignment = alignment;
        }
        if let Some(margin) = self.parsed("MarginL") {
            style.margin_l = margin;
        }
        if let Some(margin) = self.parsed("MarginR") {
            style.margin_r = margin;
        }
        if let Some(margin) = self.parsed("MarginV") {
            style.margin_v = margin;
        }
    }
}

/// Read the `[V4+ Styles]` section of an ASS document, keyed by style name.
///
/// Columns follow the section's `Format:` line. `Style:` lines before it,
/// or without a name, are ignored.
pub fn parse_ass_styles(content: &str) -> BTreeMap<String, AssStyle> {
    let mut styles = BTreeMap::new();
    let mut in_section = false;
    let mut columns: Vec<String> = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.eq_ignore_ascii_case("[V4+ Styles]") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if line.starts_with('[') {
            break;
        }
        if let Some(format) = line.strip_prefix("Format:") {
            columns = format.split(',').map(|c| c.trim().to_string()).collect();
        } else if let Some(values) = line.strip_prefix("Style:") {
            if columns.is_empty() {
                continue;
            }
            let fields: HashMap<String, String> = columns
                .iter()
                .cloned()
                .zip(values.split(',').map(|v| v.trim().to_string()))
                .collect();
            let style = AssStyle { fields };
            match style.get("Name").filter(|n| !n.is_empty()) {
                Some(name) => {
                    styles.insert(name.to_string(), style);
                }
                None => warn!(line, "ASS style without a name skipped"),
            }
        }
    }
    styles
}

/// Load the named style from an ASS file. With no name the file must hold
/// exactly one style.
pub fn load_ass_style(path: &Path, name: Option<&str>) -> Result<AssStyle> {
    let mut styles = parse_ass_styles(&fs::read_to_string(path)?);
    let found = match name {
        Some(name) => styles.remove(name),
        None if styles.len() == 1 => styles.into_values().next(),
        None => {
            return Err(Error::LocalInput(format!(
                "{} defines {} styles, pick one by name",
                path.display(),
                styles.len()
            )))
        }
    };
    found.ok_or_else(|| {
        Error::LocalInput(format!(
            "style {} not found in {}",
            name.unwrap_or("(any)"),
            path.display()
        ))
    })
}
