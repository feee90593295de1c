//! Scripted clients for exercising the pool and router without a network

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

use super::pool::{ClientFactory, ClientPool, CredentialSource};
use super::registry::{ProviderProfile, ProviderRegistry};
use super::types::{CompletionRequest, ProviderClient, ProviderId};

/// What a scripted provider does when called
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Answer with this text (possibly empty)
    Reply(String),
    /// Fail with this HTTP status
    Fail(u16),
    /// Never answer
    Hang,
}

/// In-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    /// Non-empty key for each listed provider
    pub fn for_providers(ids: &[ProviderId]) -> Self {
        let registry = ProviderRegistry::builtin();
        let mut creds = Self::default();
        for id in ids {
            creds = creds.with(registry.get_profile(*id).api_key_env, "test-key");
        }
        creds
    }

    pub fn with(mut self, env_var: &str, value: &str) -> Self {
        self.values.insert(env_var.to_string(), value.to_string());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn get(&self, env_var: &str) -> Option<String> {
        self.values.get(env_var).cloned()
    }
}

/// Shared record of every call and construction
#[derive(Debug, Default)]
struct Journal {
    calls: Vec<(ProviderId, CompletionRequest)>,
    created: Vec<ProviderId>,
}

/// Factory handing out scripted clients; unscripted providers reply
/// `"from <provider>"`
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    behaviours: HashMap<ProviderId, Behaviour>,
    journal: Arc<Mutex<Journal>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: ProviderId, behaviour: Behaviour) -> Self {
        self.behaviours.insert(id, behaviour);
        self
    }

    /// Providers called, in call order
    pub fn call_order(&self) -> Vec<ProviderId> {
        self.journal.lock().unwrap().calls.iter().map(|(id, _)| *id).collect()
    }

    /// Requests received, in call order
    pub fn requests(&self) -> Vec<(ProviderId, CompletionRequest)> {
        self.journal.lock().unwrap().calls.clone()
    }

    pub fn created_count(&self, id: ProviderId) -> usize {
        self.journal
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|c| **c == id)
            .count()
    }
}

impl ClientFactory for MockFactory {
    fn create(
        &self,
        profile: &ProviderProfile,
        _api_key: String,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        self.journal.lock().unwrap().created.push(profile.id);
        let behaviour = self
            .behaviours
            .get(&profile.id)
            .cloned()
            .unwrap_or_else(|| Behaviour::Reply(format!("from {}", profile.id)));
        Ok(Arc::new(ScriptedClient {
            provider: profile.id,
            behaviour,
            journal: self.journal.clone(),
        }))
    }
}

struct ScriptedClient {
    provider: ProviderId,
    behaviour: Behaviour,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.journal
            .lock()
            .unwrap()
            .calls
            .push((self.provider, request.clone()));
        match &self.behaviour {
            Behaviour::Reply(text) => Ok(text.clone()),
            Behaviour::Fail(status) => Err(ProviderError::http_status(
                self.provider,
                *status,
                "scripted failure",
            )),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

/// Pool over the builtin registry with the given factory and credentials
pub fn pool_with(factory: MockFactory, credentials: StaticCredentials) -> ClientPool {
    ClientPool::new(
        Arc::new(ProviderRegistry::builtin()),
        Arc::new(factory),
        Arc::new(credentials),
    )
}
