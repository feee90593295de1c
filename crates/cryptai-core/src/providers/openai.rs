//! OpenAI chat-completions client, also used for the OpenAI-compatible
//! endpoints of Groq and Mistral

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;

use super::types::{CanonicalMessage, CompletionRequest, ProviderClient, ProviderId};

/// Client for any endpoint speaking the OpenAI chat-completions format
pub struct OpenAiClient {
    provider: ProviderId,
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiClient {
    /// `base_url` is the API root including the version segment,
    /// e.g. `https://api.openai.com/v1`
    pub fn new(provider: ProviderId, client: Client, api_key: String, base_url: String) -> Self {
        Self {
            provider,
            client,
            api_key,
            base_url,
        }
    }

    /// Roles and order carry over one to one
    fn to_openai_messages(messages: &[CanonicalMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn build_body(request: &CompletionRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: Self::to_openai_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }

    /// First choice's content; missing content is an empty completion
    fn from_openai_response(&self, resp: OpenAiApiResponse) -> Result<String, ProviderError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::vendor(self.provider, "response had no choices"))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);

        debug!(
            "{} request: model={}, messages={}",
            self.provider,
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::vendor(self.provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::http_status(self.provider, status.as_u16(), error_text));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::vendor(self.provider, e))?;

        debug!(
            "{} response: choices={}, finish_reason={:?}",
            self.provider,
            api_response.choices.len(),
            api_response.choices.first().and_then(|c| c.finish_reason.as_deref())
        );

        self.from_openai_response(api_response)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(messages: Vec<CanonicalMessage>) -> CompletionRequest {
        CompletionRequest {
            messages,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(
            ProviderId::OpenAi,
            Client::new(),
            "sk-test".to_string(),
            format!("{}/v1", server.uri()),
        )
    }

    #[test]
    fn test_to_openai_messages_preserves_order() {
        let msgs = vec![
            CanonicalMessage::system("You are a crypto analyst."),
            CanonicalMessage::user("price of BTC?"),
            CanonicalMessage::assistant("About 60k."),
            CanonicalMessage::user("and ETH?"),
        ];
        let result = OpenAiClient::to_openai_messages(&msgs);
        let roles: Vec<&str> = result.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        let contents: Vec<&str> = result.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["You are a crypto analyst.", "price of BTC?", "About 60k.", "and ETH?"]
        );
    }

    #[test]
    fn test_build_body_fields() {
        let body = OpenAiClient::build_body(&request(vec![CanonicalMessage::user("hi")]));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["max_tokens"], 256);
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(&request(vec![CanonicalMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_complete_null_content_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(&request(vec![CanonicalMessage::user("hi")]))
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_complete_status_error_is_vendor_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&request(vec![CanonicalMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::VendorCall { provider: ProviderId::OpenAi, status: Some(401), .. }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_complete_no_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&request(vec![CanonicalMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::VendorCall { status: None, .. }));
    }

    #[tokio::test]
    async fn test_wire_payload_keeps_message_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let msgs = vec![
            CanonicalMessage::system("s"),
            CanonicalMessage::user("u1"),
            CanonicalMessage::assistant("a1"),
            CanonicalMessage::user("u2"),
        ];
        client_for(&server).complete(&request(msgs)).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        let contents: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["s", "u1", "a1", "u2"]);
    }

    #[test]
    fn test_openai_client_debug_hides_key() {
        let client = OpenAiClient::new(
            ProviderId::Groq,
            Client::new(),
            "gsk_secret".to_string(),
            "https://api.groq.com/openai/v1".to_string(),
        );
        let debug = format!("{:?}", client);
        assert!(!debug.contains("gsk_secret"));
        assert!(debug.contains("Groq"));
    }
}
