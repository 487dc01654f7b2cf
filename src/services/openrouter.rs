//! Chat-completion client for OpenRouter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, log_exchange, require_key, ProviderAccount, TextCompletionService};
use crate::config::{ModelParams, OpenRouterSettings};
use crate::error::{Error, Result};

const SERVICE: &str = "openrouter";

pub struct OpenRouterClient {
    client: Client,
    settings: OpenRouterSettings,
    detailed: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    #[serde(default)]
    data: KeyInfo,
}

/// Spend limit and usage of the API key, in dollars.
#[derive(Debug, Default, Deserialize, PartialEq)]
struct KeyInfo {
    limit: Option<f64>,
    #[serde(default)]
    usage: f64,
    label: Option<String>,
}

impl KeyInfo {
    fn balance_text(&self) -> String {
        match self.limit {
            Some(limit) => format!("${:.4} left", limit - self.usage),
            None => format!("Usage: ${:.4}", self.usage),
        }
    }
}

impl OpenRouterClient {
    pub fn new(client: Client, settings: OpenRouterSettings, detailed: bool) -> Self {
        Self {
            client,
            settings,
            detailed,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn key_info(&self) -> Result<KeyInfo> {
        require_key(SERVICE, &self.settings.api_key)?;
        let response = self
            .client
            .get(self.url("/key"))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;
        let parsed: KeyResponse = check_status(SERVICE, response).await?.json().await?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl ProviderAccount for OpenRouterClient {
    async fn check_connection(&self) -> Result<String> {
        let info = self.key_info().await?;
        Ok(match info.label {
            Some(label) => format!("key {}", label),
            None => "connected".to_string(),
        })
    }

    async fn balance(&self) -> Result<Option<String>> {
        Ok(Some(self.key_info().await?.balance_text()))
    }
}

#[async_trait]
impl TextCompletionService for OpenRouterClient {
    async fn generate(&self, system_prompt: &str, user_text: &str, model: &ModelParams) -> Result<String> {
        let request = ChatRequest {
            model: &model.id,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt,
                },
                Message {
                    role: "user",
                    content: user_text,
                },
            ],
            temperature: model.temperature,
            max_tokens: model.max_tokens,
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let body = check_status(SERVICE, response).await?.bytes().await?;
        log_exchange(self.detailed, SERVICE, &serde_json::to_value(&request)?, &body);

        let parsed: ChatResponse = serde_json::from_slice(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::transient(SERVICE, "response carried no completion text"))
    }
}
