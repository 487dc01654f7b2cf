//! Googler batch image generation.
//!
//! The API has no batch endpoint: a batch is fanned out as one request per
//! prompt, bounded by the configured concurrency, and reassembled in prompt
//! order. Any single failure fails the whole batch.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_status, require_key, BatchImageGenerationService, ProviderAccount};
use crate::config::GooglerSettings;
use crate::error::{Error, Result};
use crate::orchestration::pool::run_ordered;

const SERVICE: &str = "googler";

pub struct GooglerClient {
    client: Client,
    settings: GooglerSettings,
    concurrency: usize,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    provider: &'a str,
    operation: &'a str,
    parameters: ImageParameters<'a>,
}

#[derive(Debug, Serialize)]
struct ImageParameters<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    success: bool,
    result: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsageResponse {
    account_limits: AccountLimits,
    current_usage: CurrentUsage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccountLimits {
    img_gen_per_hour_limit: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CurrentUsage {
    hourly_usage: HourlyUsage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HourlyUsage {
    image_generation: UsageCounter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsageCounter {
    current_usage: i64,
}

impl UsageResponse {
    fn limit(&self) -> i64 {
        self.account_limits.img_gen_per_hour_limit
    }

    fn remaining(&self) -> i64 {
        self.limit() - self.current_usage.hourly_usage.image_generation.current_usage
    }
}

impl GooglerClient {
    pub fn new(client: Client, settings: GooglerSettings, concurrency: usize) -> Self {
        Self {
            client,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ImageRequest<'a> {
        ImageRequest {
            provider: "google_fx",
            operation: "generate",
            parameters: ImageParameters {
                prompt,
                aspect_ratio: &self.settings.aspect_ratio,
                seed: self.settings.seed,
            },
        }
    }

    async fn usage(&self) -> Result<UsageResponse> {
        require_key(SERVICE, &self.settings.api_key)?;
        let url = format!("{}/usage", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;
        Ok(check_status(SERVICE, response).await?.json().await?)
    }

    async fn generate_one(&self, index: usize, total: usize, prompt: &str) -> Result<Vec<u8>> {
        let url = format!("{}/images", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.settings.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;
        let parsed: ImageResponse = check_status(SERVICE, response).await?.json().await?;
        if !parsed.success {
            return Err(Error::Service {
                service: SERVICE.to_string(),
                message: parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        let data = parsed
            .result
            .ok_or_else(|| Error::transient(SERVICE, "response carried no image"))?;
        debug!(image = index + 1, total, "googler image generated");
        decode_data_uri(&data)
    }
}

/// Decode `data:<mime>;base64,<payload>`, or a bare base64 payload.
pub(crate) fn decode_data_uri(data: &str) -> Result<Vec<u8>> {
    let payload = match data.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => data,
    };
    Ok(STANDARD.decode(payload.trim())?)
}

#[async_trait]
impl BatchImageGenerationService for GooglerClient {
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<Vec<u8>>> {
        if self.settings.api_key.is_empty() {
            return Err(Error::Service {
                service: SERVICE.to_string(),
                message: "API key is missing".to_string(),
            });
        }
        let total = prompts.len();
        info!(total, concurrency = self.concurrency, "googler batch started");
        run_ordered(self.concurrency, prompts.iter().collect(), |index, prompt| {
            self.generate_one(index, total, prompt)
        })
        .await
    }
}

#[async_trait]
impl ProviderAccount for GooglerClient {
    async fn check_connection(&self) -> Result<String> {
        let usage = self.usage().await?;
        Ok(format!("image limit {}/hour", usage.limit()))
    }

    async fn balance(&self) -> Result<Option<String>> {
        let usage = self.usage().await?;
        Ok(Some(format!("{}/{}", usage.remaining(), usage.limit())))
    }
}
