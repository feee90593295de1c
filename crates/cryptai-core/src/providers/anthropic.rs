//! Anthropic Claude client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;

use super::types::{CanonicalMessage, CompletionRequest, ProviderClient, ProviderId, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// Split system turns into the dedicated `system` field; everything else
    /// keeps its order
    fn split_system(messages: &[CanonicalMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let system_parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        let turns = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        (system, turns)
    }

    fn build_body(request: &CompletionRequest) -> AnthropicRequest {
        let (system, messages) = Self::split_system(&request.messages);
        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages,
        }
    }

    /// Concatenate the text blocks of the response
    fn from_anthropic_response(resp: AnthropicApiResponse) -> String {
        resp.content
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(request);

        debug!(
            "Anthropic request: model={}, messages={}, system={}",
            body.model,
            body.messages.len(),
            body.system.is_some()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::vendor(ProviderId::Anthropic, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::http_status(
                ProviderId::Anthropic,
                status.as_u16(),
                error_text,
            ));
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::vendor(ProviderId::Anthropic, e))?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Ok(Self::from_anthropic_response(api_response))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
}
