//! Google Gemini client
//!
//! The conversation is flattened into a single prompt; Gemini receives one
//! user turn containing the whole labelled transcript.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::ProviderError;

use super::types::{CanonicalMessage, CompletionRequest, ProviderClient, ProviderId, Role};

/// Google Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Render a conversation as one prompt string, in order, ending with an
/// open assistant turn
pub fn flatten_prompt(messages: &[CanonicalMessage]) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", label, m.content)
        })
        .collect();
    parts.push("Assistant:".to_string());
    parts.join("\n\n")
}

impl GeminiClient {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// `{base}/v1beta/models/{model}:generateContent`, with the model as one
    /// escaped path segment
    fn endpoint(&self, model: &str) -> Result<Url, ProviderError> {
        let segment = format!("{}:generateContent", model);
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Config(format!("invalid Gemini base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Config(format!("invalid Gemini base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1beta", "models", segment.as_str()]);
        Ok(url)
    }

    fn build_body(request: &CompletionRequest) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Some(flatten_prompt(&request.messages)),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }

    /// Text of the first candidate; no candidates (e.g. safety block) means no content
    fn from_gemini_response(resp: GeminiApiResponse) -> String {
        resp.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = self.endpoint(&request.model)?;
        let body = Self::build_body(request);

        debug!(
            "Gemini request: model={}, turns flattened={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::vendor(ProviderId::Gemini, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::http_status(
                ProviderId::Gemini,
                status.as_u16(),
                error_text,
            ));
        }

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::vendor(ProviderId::Gemini, e))?;

        debug!("Gemini response: candidates={}", api_response.candidates.len());

        Ok(Self::from_gemini_response(api_response))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(messages: Vec<CanonicalMessage>) -> CompletionRequest {
        CompletionRequest {
            messages,
            model: "gemini-1.5-flash".to_string(),
            max_tokens: 1024,
            temperature: 0.5,
        }
    }

    #[test]
    fn test_flatten_prompt_keeps_order() {
        let msgs = vec![
            CanonicalMessage::system("You track DeFi yields."),
            CanonicalMessage::user("Best stablecoin APY?"),
            CanonicalMessage::assistant("Around 5%."),
            CanonicalMessage::user("Where?"),
        ];
        assert_eq!(
            flatten_prompt(&msgs),
            "System: You track DeFi yields.\n\n\
             User: Best stablecoin APY?\n\n\
             Assistant: Around 5%.\n\n\
             User: Where?\n\n\
             Assistant:"
        );
    }

    #[test]
    fn test_flatten_prompt_empty_conversation() {
        assert_eq!(flatten_prompt(&[]), "Assistant:");
    }

    #[test]
    fn test_build_body_single_user_turn() {
        let body = GeminiClient::build_body(&request(vec![
            CanonicalMessage::system("s"),
            CanonicalMessage::user("u"),
        ]));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"].as_array().unwrap().len(), 1);
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_from_gemini_response_no_candidates_is_empty() {
        let resp: GeminiApiResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert_eq!(GeminiClient::from_gemini_response(resp), "");
    }

    #[test]
    fn test_from_gemini_response_joins_parts() {
        let resp: GeminiApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "to the "}, {"text": "moon"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(GeminiClient::from_gemini_response(resp), "to the moon");
    }

    #[tokio::test]
    async fn test_complete_posts_flattened_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "AIza-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), "AIza-test".to_string(), server.uri());
        let text = client
            .complete(&request(vec![
                CanonicalMessage::user("first"),
                CanonicalMessage::assistant("second"),
            ]))
            .await
            .unwrap();
        assert_eq!(text, "ok");

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "User: first\n\nAssistant: second\n\nAssistant:"
        );
    }

    #[test]
    fn test_endpoint_escapes_model_name() {
        let client = GeminiClient::new(
            Client::new(),
            "k".to_string(),
            "https://generativelanguage.googleapis.com".to_string(),
        );
        assert_eq!(
            client.endpoint("gemini-1.5-flash").unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );

        let url = client.endpoint("../../v1/files?x=1#frag").unwrap();
        assert_eq!(
            url.path(),
            "/v1beta/models/..%2F..%2Fv1%2Ffiles%3Fx=1%23frag:generateContent"
        );
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = GeminiClient::new(
            Client::new(),
            "k".to_string(),
            "http://localhost:8080/gemini".to_string(),
        );
        assert_eq!(
            client.endpoint("gemini-1.5-pro").unwrap().as_str(),
            "http://localhost:8080/gemini/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[tokio::test]
    async fn test_complete_model_cannot_change_request_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), "k".to_string(), server.uri());
        let mut req = request(vec![CanonicalMessage::user("hi")]);
        req.model = "x/../../admin?drop=1#y".to_string();
        client.complete(&req).await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].url.path().starts_with("/v1beta/models/x%2F"));
        assert!(received[0].url.path().ends_with(":generateContent"));
        assert!(received[0].url.query().is_none());
    }

    #[tokio::test]
    async fn test_complete_malformed_body_is_vendor_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), "k".to_string(), server.uri());
        let err = client
            .complete(&request(vec![CanonicalMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::VendorCall { provider: ProviderId::Gemini, status: None, .. }
        ));
    }

    #[test]
    fn test_gemini_client_debug_hides_key() {
        let client = GeminiClient::new(
            Client::new(),
            "AIza-secret".to_string(),
            "https://generativelanguage.googleapis.com".to_string(),
        );
        let debug = format!("{:?}", client);
        assert!(!debug.contains("AIza-secret"));
    }
}
