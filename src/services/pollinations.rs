use async_trait::async_trait;
use reqwest::Client;

use super::{check_status, ImageGenerationService, ProviderAccount};
use crate::config::PollinationsSettings;
use crate::error::{Error, Result};

const SERVICE: &str = "pollinations";

/// Pollinations: the prompt goes into the URL path and the response body is
/// the image.
pub struct PollinationsClient {
    client: Client,
    settings: PollinationsSettings,
}

impl PollinationsClient {
    pub fn new(client: Client, settings: PollinationsSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self, prompt: &str) -> String {
        format!("{}{}", self.settings.base_url, urlencoding::encode(prompt))
    }

    /// The model listing endpoint, served next to `/prompt/`.
    fn models_url(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let root = base.strip_suffix("/prompt").unwrap_or(base);
        format!("{}/models", root)
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("width", self.settings.width.to_string()),
            ("height", self.settings.height.to_string()),
            ("model", self.settings.model.clone()),
        ];
        if self.settings.nologo {
            params.push(("nologo", "true".to_string()));
        }
        if !self.settings.token.is_empty() {
            params.push(("token", self.settings.token.clone()));
        }
        params
    }
}

#[async_trait]
impl ImageGenerationService for PollinationsClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url(prompt))
            .query(&self.query())
            .send()
            .await?;
        let bytes = check_status(SERVICE, response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::transient(SERVICE, "empty image body"));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ProviderAccount for PollinationsClient {
    async fn check_connection(&self) -> Result<String> {
        let response = self.client.get(self.models_url()).send().await?;
        let models: serde_json::Value = check_status(SERVICE, response).await?.json().await?;
        Ok(match models.as_array() {
            Some(list) => format!("{} models available", list.len()),
            None => "connected".to_string(),
        })
    }
}
