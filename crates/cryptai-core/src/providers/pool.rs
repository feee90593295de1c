//! Lazily constructed, cached vendor clients and the single-call adapter

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ProviderError;

use super::anthropic::AnthropicClient;
use super::google::GeminiClient;
use super::openai::OpenAiClient;
use super::registry::{ProviderProfile, ProviderRegistry};
use super::types::{CanonicalMessage, CompletionRequest, GenerationOptions, ProviderClient, ProviderId};

/// Returned instead of an empty completion; an empty answer is not a failure
pub const EMPTY_COMPLETION_PLACEHOLDER: &str =
    "I couldn't come up with a response to that. Could you rephrase your question?";

/// Per-attempt deadline when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where API keys come from
pub trait CredentialSource: Send + Sync {
    /// Value of the named credential, `None` when unset
    fn get(&self, env_var: &str) -> Option<String>;
}

/// Reads credentials from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, env_var: &str) -> Option<String> {
        std::env::var(env_var).ok()
    }
}

/// Builds the vendor client for a profile
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        profile: &ProviderProfile,
        api_key: String,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError>;
}

/// Builds real HTTP clients sharing one connection pool
pub struct HttpClientFactory {
    http: Client,
    base_urls: HashMap<ProviderId, String>,
}

impl std::fmt::Debug for HttpClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientFactory")
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl HttpClientFactory {
    pub fn new(request_timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_urls: HashMap::new(),
        })
    }

    /// Point a provider at a different endpoint root (proxy, self-hosted gateway)
    pub fn with_base_url(mut self, id: ProviderId, base_url: &str) -> Result<Self, ProviderError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ProviderError::Config(format!("invalid base URL for {}: {}", id, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Config(format!(
                "base URL for {} must be http(s), got {}",
                id,
                parsed.scheme()
            )));
        }
        self.base_urls
            .insert(id, base_url.trim_end_matches('/').to_string());
        Ok(self)
    }

    /// Endpoint root used for a provider
    pub fn base_url(&self, id: ProviderId) -> String {
        self.base_urls
            .get(&id)
            .cloned()
            .unwrap_or_else(|| default_base_url(id).to_string())
    }
}

/// Public API root of each vendor
pub fn default_base_url(id: ProviderId) -> &'static str {
    match id {
        ProviderId::OpenAi => "https://api.openai.com/v1",
        ProviderId::Anthropic => "https://api.anthropic.com",
        ProviderId::Gemini => "https://generativelanguage.googleapis.com",
        ProviderId::Groq => "https://api.groq.com/openai/v1",
        ProviderId::Mistral => "https://api.mistral.ai/v1",
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(
        &self,
        profile: &ProviderProfile,
        api_key: String,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let base_url = self.base_url(profile.id);
        let client: Arc<dyn ProviderClient> = match profile.id {
            ProviderId::OpenAi | ProviderId::Groq | ProviderId::Mistral => Arc::new(
                OpenAiClient::new(profile.id, self.http.clone(), api_key, base_url),
            ),
            ProviderId::Anthropic => {
                Arc::new(AnthropicClient::new(self.http.clone(), api_key, base_url))
            }
            ProviderId::Gemini => Arc::new(GeminiClient::new(self.http.clone(), api_key, base_url)),
        };
        Ok(client)
    }
}

/// Owns one client per provider for the process lifetime
pub struct ClientPool {
    registry: Arc<ProviderRegistry>,
    factory: Arc<dyn ClientFactory>,
    credentials: Arc<dyn CredentialSource>,
    clients: RwLock<BTreeMap<ProviderId, Arc<dyn ProviderClient>>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("live", &self.live_providers())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientPool {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        factory: Arc<dyn ClientFactory>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            registry,
            factory,
            credentials,
            clients: RwLock::new(BTreeMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the per-attempt deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Non-empty credential for a provider, if configured
    fn credential(&self, profile: &ProviderProfile) -> Option<String> {
        self.credentials
            .get(profile.api_key_env)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    /// Whether the provider's credential is present (without building a client)
    pub fn has_credential(&self, id: ProviderId) -> bool {
        self.credential(self.registry.get_profile(id)).is_some()
    }

    /// Cached client for a provider, constructing it on first use
    pub fn get_or_create_client(&self, id: ProviderId) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        if let Ok(clients) = self.clients.read() {
            if let Some(client) = clients.get(&id) {
                return Ok(client.clone());
            }
        }

        let profile = self.registry.get_profile(id);
        let api_key = self
            .credential(profile)
            .ok_or_else(|| ProviderError::CredentialMissing {
                provider: id,
                env_var: profile.api_key_env.to_string(),
            })?;

        let mut clients = match self.clients.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another caller may have built it while we waited for the write lock
        if let Some(client) = clients.get(&id) {
            return Ok(client.clone());
        }
        let client = self.factory.create(profile, api_key)?;
        info!("Initialized {} client (default model: {})", id, profile.default_model);
        clients.insert(id, client.clone());
        Ok(client)
    }

    /// Build clients for every provider that has a credential
    pub fn warm_up(&self) -> Vec<ProviderId> {
        let mut ready = Vec::new();
        for profile in self.registry.profiles() {
            match self.get_or_create_client(profile.id) {
                Ok(_) => ready.push(profile.id),
                Err(ProviderError::CredentialMissing { env_var, .. }) => {
                    debug!("Skipping {}: {} not set", profile.id, env_var);
                }
                Err(e) => warn!("Could not initialize {}: {}", profile.id, e),
            }
        }
        info!("{} of {} providers ready", ready.len(), self.registry.profiles().count());
        ready
    }

    /// Providers with a constructed client, in registry order
    pub fn live_providers(&self) -> Vec<ProviderId> {
        match self.clients.read() {
            Ok(clients) => clients.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    /// Resolve model and limits for one provider
    pub fn build_request(
        &self,
        id: ProviderId,
        messages: &[CanonicalMessage],
        options: &GenerationOptions,
    ) -> CompletionRequest {
        let profile = self.registry.get_profile(id);
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| profile.default_model.to_string());
        let max_tokens = options
            .max_output_tokens
            .unwrap_or(profile.max_output_tokens)
            .clamp(1, profile.max_output_tokens);
        CompletionRequest {
            messages: messages.to_vec(),
            model,
            max_tokens,
            temperature: options.temperature,
        }
    }

    /// Run one completion against one provider under the per-attempt deadline
    pub async fn call(
        &self,
        id: ProviderId,
        messages: &[CanonicalMessage],
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let client = self.get_or_create_client(id)?;
        let request = self.build_request(id, messages, options);
        if options.stream {
            debug!("{}: streaming requested, collecting the full completion instead", id);
        }

        let text = match tokio::time::timeout(self.request_timeout, client.complete(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProviderError::Timeout {
                    provider: id,
                    after: self.request_timeout,
                });
            }
        };

        if text.trim().is_empty() {
            warn!("{} ({}) returned an empty completion", id, request.model);
            return Ok(EMPTY_COMPLETION_PLACEHOLDER.to_string());
        }
        Ok(text)
    }
}
