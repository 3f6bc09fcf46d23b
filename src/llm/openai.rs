//! OpenAI-compatible chat completions client
//!
//! Works with the OpenAI API and Azure OpenAI deployments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Budget, CompletionError, CompletionService, Prompt};
use crate::core::config::{CompletionConfig, CompletionProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Azure deployment; selects Azure URL layout and auth header
    azure_deployment: Option<String>,
    api_version: String,
    timeout_secs: u64,
}

impl OpenAiService {
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CompletionError::NotConfigured("no API key".to_string()))?;

        let timeout_secs = config.timeout_secs.max(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CompletionError::NotConfigured(e.to_string()))?;

        let (base_url, azure_deployment) = match config.provider {
            CompletionProvider::Azure => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    CompletionError::NotConfigured("Azure provider needs an endpoint".to_string())
                })?;
                let deployment = config
                    .deployment
                    .clone()
                    .unwrap_or_else(|| config.model.clone());
                (endpoint, Some(deployment))
            }
            _ => (
                config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                None,
            ),
        };

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            azure_deployment,
            api_version: config.api_version.clone(),
            timeout_secs,
        })
    }

    /// Get the chat completions URL
    fn chat_url(&self) -> String {
        match &self.azure_deployment {
            Some(deployment) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, deployment, self.api_version
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    fn request_body(&self, prompt: &Prompt, budget: Budget) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(prompt.system.clone()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(prompt.user.clone()),
                },
            ],
            max_tokens: budget.max_output_tokens,
            temperature: budget.temperature,
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiService {
    fn name(&self) -> &str {
        if self.azure_deployment.is_some() {
            "azure"
        } else {
            "openai"
        }
    }

    async fn complete(&self, prompt: &Prompt, budget: Budget) -> Result<String, CompletionError> {
        let url = self.chat_url();
        debug!(model = %self.model, service = self.name(), "Sending completion request");

        let mut req = self.client.post(&url).json(&self.request_body(prompt, budget));
        req = match self.azure_deployment {
            Some(_) => req.header("api-key", &self.api_key),
            None => req.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout {
                    seconds: self.timeout_secs,
                }
            } else {
                CompletionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => CompletionError::RateLimited(text),
                401 | 403 => CompletionError::Authentication(text),
                s if s >= 500 => CompletionError::Unavailable(text),
                _ => {
                    error!(status = %status, "Completion API error: {}", text);
                    CompletionError::InvalidResponse(format!("API error {}: {}", status, text))
                }
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        extract_content(body)
    }
}

fn extract_content(body: ChatResponse) -> Result<String, CompletionError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| CompletionError::InvalidResponse("response has no message content".to_string()))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}
