use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, download, group_thousands, require_key, NarrationService, ProviderAccount, VoiceParams};
use crate::config::VoicemakerSettings;
use crate::error::{Error, Result};

const SERVICE: &str = "voicemaker";

/// Voicemaker synthesis: one call returns a URL to the rendered mp3.
pub struct VoicemakerClient {
    client: Client,
    settings: VoicemakerSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SynthesisRequest<'a> {
    engine: &'a str,
    voice_id: &'a str,
    language_code: &'a str,
    text: &'a str,
    output_format: &'a str,
    sample_rate: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    success: bool,
    path: Option<String>,
    message: Option<String>,
    #[serde(rename = "remainChars")]
    remain_chars: Option<u64>,
}

impl SynthesisResponse {
    fn failure_message(&self) -> String {
        self.message.clone().unwrap_or_else(|| "unknown error".to_string())
    }
}

impl VoicemakerClient {
    pub fn new(client: Client, settings: VoicemakerSettings) -> Self {
        Self { client, settings }
    }

    /// The voice listing endpoint, a sibling of the synthesis endpoint.
    fn list_url(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match base.rsplit_once('/') {
            Some((parent, _)) => format!("{}/list", parent),
            None => format!("{}/list", base),
        }
    }
}

#[async_trait]
impl ProviderAccount for VoicemakerClient {
    async fn check_connection(&self) -> Result<String> {
        require_key(SERVICE, &self.settings.api_key)?;
        let response = self
            .client
            .post(self.list_url())
            .bearer_auth(&self.settings.api_key)
            .json(&serde_json::json!({"language": "en-US"}))
            .send()
            .await?;
        let parsed: SynthesisResponse = check_status(SERVICE, response).await?.json().await?;
        if !parsed.success {
            return Err(Error::Service {
                service: SERVICE.to_string(),
                message: parsed.failure_message(),
            });
        }
        Ok("connected".to_string())
    }

    /// Synthesizes a single character; the response reports the remaining quota.
    async fn balance(&self) -> Result<Option<String>> {
        require_key(SERVICE, &self.settings.api_key)?;
        let request = SynthesisRequest {
            engine: "neural",
            voice_id: "ai3-Jony",
            language_code: "en-US",
            text: ".",
            output_format: "mp3",
            sample_rate: &self.settings.sample_rate,
        };
        let response = self
            .client
            .post(&self.settings.base_url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let parsed: SynthesisResponse = check_status(SERVICE, response).await?.json().await?;
        if !parsed.success {
            return Err(Error::Service {
                service: SERVICE.to_string(),
                message: parsed.failure_message(),
            });
        }
        Ok(parsed.remain_chars.map(group_thousands))
    }
}

#[async_trait]
impl NarrationService for VoicemakerClient {
    async fn generate(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        let language_code = if voice.language_code.is_empty() {
            "en-US"
        } else {
            &voice.language_code
        };
        let request = SynthesisRequest {
            engine: &self.settings.engine,
            voice_id: &voice.voice,
            language_code,
            text,
            output_format: "mp3",
            sample_rate: &self.settings.sample_rate,
        };
        let response = self
            .client
            .post(&self.settings.base_url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let parsed: SynthesisResponse = check_status(SERVICE, response).await?.json().await?;

        // success=false is retried like a network error
        if !parsed.success {
            return Err(Error::transient(SERVICE, parsed.failure_message()));
        }
        let url = parsed
            .path
            .ok_or_else(|| Error::transient(SERVICE, "response carried no audio path"))?;
        download(&self.client, SERVICE, &url).await
    }
}
