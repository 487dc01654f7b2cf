use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    check_status, require_key, NarrationFetch, NarrationStatus, ProviderAccount, TaskNarrationService,
    VoiceParams,
};
use crate::config::ElevenLabsSettings;
use crate::error::{Error, Result};

const SERVICE: &str = "elevenlabs";

/// ElevenLabs through the task-based proxy API.
pub struct ElevenLabsClient {
    client: Client,
    settings: ElevenLabsSettings,
}

/// A saved voice template. Its `uuid` is what a language lane puts in
/// `voice_template`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceTemplate {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTask<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_uuid: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    task_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    #[serde(default)]
    status: String,
    status_label: Option<String>,
    detail: Option<String>,
    error: Option<String>,
}

impl TaskStatusResponse {
    fn into_status(self) -> NarrationStatus {
        match self.status.as_str() {
            "ending" | "ending_processed" => NarrationStatus::Ready,
            "error" => NarrationStatus::Failed {
                detail: self
                    .detail
                    .or(self.error)
                    .or(self.status_label)
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            _ => NarrationStatus::Processing {
                label: self.status_label.unwrap_or(self.status),
            },
        }
    }
}

impl ElevenLabsClient {
    pub fn new(client: Client, settings: ElevenLabsSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Voice templates saved on the account.
    pub async fn templates(&self) -> Result<Vec<VoiceTemplate>> {
        require_key(SERVICE, &self.settings.api_key)?;
        let response = self
            .client
            .get(self.url("/templates"))
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;
        Ok(check_status(SERVICE, response).await?.json().await?)
    }

    async fn balance_text(&self) -> Result<String> {
        require_key(SERVICE, &self.settings.api_key)?;
        let response = self
            .client
            .get(self.url("/balance"))
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;
        let parsed: BalanceResponse = check_status(SERVICE, response).await?.json().await?;
        Ok(parsed.balance_text.unwrap_or_else(|| "N/A".to_string()))
    }
}

#[async_trait]
impl ProviderAccount for ElevenLabsClient {
    async fn check_connection(&self) -> Result<String> {
        Ok(format!("balance {}", self.balance_text().await?))
    }

    async fn balance(&self) -> Result<Option<String>> {
        Ok(Some(self.balance_text().await?))
    }
}

#[async_trait]
impl TaskNarrationService for ElevenLabsClient {
    async fn submit(&self, text: &str, voice: &VoiceParams) -> Result<String> {
        let request = CreateTask {
            text,
            template_uuid: (!voice.voice.is_empty()).then_some(voice.voice.as_str()),
        };
        let response = self
            .client
            .post(self.url("/tasks"))
            .header("X-API-Key", &self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let created: CreatedTask = check_status(SERVICE, response).await?.json().await?;
        match created.task_id {
            serde_json::Value::String(id) => Ok(id),
            serde_json::Value::Number(id) => Ok(id.to_string()),
            other => Err(Error::transient(SERVICE, format!("unexpected task id {}", other))),
        }
    }

    async fn poll(&self, job_id: &str) -> Result<NarrationStatus> {
        let response = self
            .client
            .get(self.url(&format!("/tasks/{}/status", job_id)))
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;
        let status: TaskStatusResponse = check_status(SERVICE, response).await?.json().await?;
        Ok(status.into_status())
    }

    async fn fetch(&self, job_id: &str) -> Result<NarrationFetch> {
        let response = self
            .client
            .get(self.url(&format!("/tasks/{}/result", job_id)))
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(NarrationFetch::Pending);
        }
        let bytes = check_status(SERVICE, response).await?.bytes().await?;
        Ok(NarrationFetch::Ready(bytes.to_vec()))
    }
}
