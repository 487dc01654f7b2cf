//! Identifiers for interchangeable external providers.

use serde::{Deserialize, Serialize};

/// Image generation providers.
///
/// Selection is data: the failover policy holds the active value and the
/// service registry maps it to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageProvider {
    #[default]
    Recraft,
    Pollinations,
    Googler,
}

impl ImageProvider {
    pub const ALL: [ImageProvider; 3] = [
        ImageProvider::Recraft,
        ImageProvider::Pollinations,
        ImageProvider::Googler,
    ];

    /// Whether the provider takes every prompt in one batch call.
    pub fn is_batch(self) -> bool {
        matches!(self, ImageProvider::Googler)
    }

    /// File extension of the images this provider returns.
    pub fn extension(self) -> &'static str {
        match self {
            ImageProvider::Recraft => "png",
            ImageProvider::Pollinations | ImageProvider::Googler => "jpg",
        }
    }
}

impl std::fmt::Display for ImageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageProvider::Recraft => write!(f, "Recraft"),
            ImageProvider::Pollinations => write!(f, "Pollinations"),
            ImageProvider::Googler => write!(f, "Googler"),
        }
    }
}

impl std::str::FromStr for ImageProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recraft" => Ok(ImageProvider::Recraft),
            "pollinations" => Ok(ImageProvider::Pollinations),
            "googler" => Ok(ImageProvider::Googler),
            other => Err(format!("unknown image service: {}", other)),
        }
    }
}

/// Narration (text-to-speech) providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoiceService {
    #[default]
    ElevenLabs,
    Voicemaker,
}

impl std::fmt::Display for VoiceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceService::ElevenLabs => write!(f, "ElevenLabs"),
            VoiceService::Voicemaker => write!(f, "Voicemaker"),
        }
    }
}
