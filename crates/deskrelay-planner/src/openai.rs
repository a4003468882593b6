//! Decomposer backed by an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use deskrelay_core::{DecompositionError, Decomposer, RawAction};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{parse::parse_actions, prompt::SYSTEM_PROMPT};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Connection and sampling settings for the completion service.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub base_url: String,
    /// Without a key every request fails as unavailable.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions decomposer.
#[derive(Debug, Clone)]
pub struct OpenAiDecomposer {
    client: Client,
    config: PlannerConfig,
}

impl OpenAiDecomposer {
    /// Build a decomposer with its own HTTP client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(config: PlannerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, api_key: &str, instruction: &str) -> Result<String, DecompositionError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: instruction,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DecompositionError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(DecompositionError::Unavailable(
                    "authentication with the completion service failed".to_string(),
                ));
            }
            status => {
                let detail = response.text().await.unwrap_or_default();
                return Err(DecompositionError::Unavailable(format!(
                    "completion service returned {status}: {}",
                    detail.trim()
                )));
            }
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| DecompositionError::Malformed(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DecompositionError::Malformed("reply has no message content".to_string()))
    }
}

#[async_trait]
impl Decomposer for OpenAiDecomposer {
    async fn decompose(&self, instruction: &str) -> Result<Vec<RawAction>, DecompositionError> {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(DecompositionError::Unavailable(
                "API key not configured on the relay".to_string(),
            ));
        };

        tracing::debug!(model = %self.config.model, "Requesting command decomposition");
        let reply = self.complete(api_key, instruction).await?;
        let actions = parse_actions(&reply)?;
        tracing::info!(count = actions.len(), "Command decomposed");
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let decomposer = OpenAiDecomposer::new(PlannerConfig {
            base_url: "http://localhost:9000/v1/".to_string(),
            ..PlannerConfig::default()
        })
        .unwrap();
        assert_eq!(decomposer.endpoint(), "http://localhost:9000/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let decomposer = OpenAiDecomposer::new(PlannerConfig::default()).unwrap();
        assert!(matches!(
            decomposer.decompose("open example.com").await,
            Err(DecompositionError::Unavailable(_))
        ));
    }
}
