use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, download, require_key, ImageGenerationService, ProviderAccount};
use crate::config::RecraftSettings;
use crate::error::{Error, Result};

const SERVICE: &str = "recraft";

/// Recraft image generation. The API answers with a URL which is then
/// downloaded.
pub struct RecraftClient {
    client: Client,
    settings: RecraftSettings,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    prompt: &'a str,
    style: &'a str,
    model: &'a str,
    size: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: Option<String>,
    credits: Option<serde_json::Value>,
}

fn credits_text(credits: Option<&serde_json::Value>) -> String {
    match credits {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

impl RecraftClient {
    pub fn new(client: Client, settings: RecraftSettings) -> Self {
        Self { client, settings }
    }

    async fn user(&self) -> Result<UserInfo> {
        require_key(SERVICE, &self.settings.api_key)?;
        let url = format!("{}/users/me", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;
        Ok(check_status(SERVICE, response).await?.json().await?)
    }

    fn request<'a>(&'a self, prompt: &'a str) -> GenerationRequest<'a> {
        let negative = self.settings.negative_prompt.trim();
        GenerationRequest {
            prompt,
            style: &self.settings.style,
            model: &self.settings.model,
            size: &self.settings.size,
            n: 1,
            negative_prompt: (!negative.is_empty()).then_some(negative),
        }
    }
}

#[async_trait]
impl ImageGenerationService for RecraftClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        if self.settings.api_key.is_empty() {
            return Err(Error::Service {
                service: SERVICE.to_string(),
                message: "API key is missing".to_string(),
            });
        }
        let url = format!("{}/images/generations", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;
        let parsed: GenerationResponse = check_status(SERVICE, response).await?.json().await?;

        let image_url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| Error::transient(SERVICE, "response carried no image url"))?;
        debug!(url = %image_url, "downloading recraft image");
        download(&self.client, SERVICE, &image_url).await
    }
}

#[async_trait]
impl ProviderAccount for RecraftClient {
    async fn check_connection(&self) -> Result<String> {
        let user = self.user().await?;
        Ok(format!(
            "user {}, credits {}",
            user.name.as_deref().unwrap_or("unknown"),
            credits_text(user.credits.as_ref())
        ))
    }

    async fn balance(&self) -> Result<Option<String>> {
        let user = self.user().await?;
        Ok(Some(credits_text(user.credits.as_ref())))
    }
}
