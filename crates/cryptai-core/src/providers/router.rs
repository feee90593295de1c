//! Request router with primary resolution, retry and provider failover

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ProviderError;

use super::observer::{AttemptObserver, AttemptOutcome, AttemptRecord, AttemptStats};
use super::pool::ClientPool;
use super::registry::{Criterion, ProviderSummary};
use super::selection::{Selection, SelectionState};
use super::types::{CanonicalMessage, GenerationOptions, ProviderId};

/// What end users see when every provider failed
pub const TERMINAL_FAILURE_MESSAGE: &str = "I'm experiencing technical difficulties right now. \
     Please try again in a few minutes.";

/// Prompt used by [`ProviderRouter::test_provider`]
const TEST_PROMPT: &str = "Hello! Please reply with a short greeting so I know you're working.";

/// Upper bound on attempts against a single provider
pub const MAX_ATTEMPTS_PER_PROVIDER: u32 = 10;

/// Upper bound on a single backoff sleep
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Router tuning, usually built from the config file
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Explicit fallback order; derived from the registry when `None`
    pub fallback_order: Option<Vec<ProviderId>>,
    /// Attempts per provider for retryable failures (1 = no retry)
    pub max_attempts_per_provider: u32,
    /// Base delay for exponential backoff between attempts
    pub base_retry_delay: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            fallback_order: None,
            max_attempts_per_provider: 1,
            base_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Kind of work, used to pick a primary provider by score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Regular conversation
    Chat,
    /// Market or portfolio analysis where answer quality matters most
    Analysis,
    /// Short lookups where latency matters most
    Quick,
    /// Background summarisation and other high-volume work
    Bulk,
}

impl TaskKind {
    pub fn criterion(&self) -> Criterion {
        match self {
            Self::Chat => Criterion::Balanced,
            Self::Analysis => Criterion::Quality,
            Self::Quick => Criterion::Speed,
            Self::Bulk => Criterion::Cost,
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "analysis" => Ok(Self::Analysis),
            "quick" => Ok(Self::Quick),
            "bulk" => Ok(Self::Bulk),
            _ => Err(ProviderError::UnknownTask(s.to_string())),
        }
    }
}

/// Successful routed generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
    /// Calls made across all providers, including failed ones
    pub attempts: u32,
}

/// Result of a single diagnostic call
#[derive(Debug, Clone, Serialize)]
pub struct ProviderTestReport {
    pub provider: String,
    pub success: bool,
    /// Seconds
    pub response_time: f64,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Routes generation requests across providers with failover
pub struct ProviderRouter {
    pool: Arc<ClientPool>,
    selection: Arc<SelectionState>,
    /// Providers tried after the primary, in order
    fallback_order: Vec<ProviderId>,
    max_attempts_per_provider: u32,
    base_retry_delay: Duration,
    stats: Arc<AttemptStats>,
    observers: Vec<Arc<dyn AttemptObserver>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("selection", &self.selection.get_current())
            .field("fallback_order", &self.fallback_order)
            .field("max_attempts_per_provider", &self.max_attempts_per_provider)
            .finish()
    }
}

impl ProviderRouter {
    pub fn new(pool: Arc<ClientPool>, selection: Arc<SelectionState>, settings: RouterSettings) -> Self {
        let fallback_order = match settings.fallback_order {
            Some(order) => order,
            None => pool
                .registry()
                .ranked_by(Criterion::Reliability)
                .into_iter()
                .filter(|id| pool.has_credential(*id))
                .collect(),
        };
        info!(
            "Provider router ready (current: {}, fallback: [{}])",
            selection.get_current().provider,
            fallback_order
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let max_attempts_per_provider = settings
            .max_attempts_per_provider
            .clamp(1, MAX_ATTEMPTS_PER_PROVIDER);
        if max_attempts_per_provider != settings.max_attempts_per_provider {
            warn!(
                "max_attempts_per_provider {} out of range, using {}",
                settings.max_attempts_per_provider, max_attempts_per_provider
            );
        }
        let stats = Arc::new(AttemptStats::new());
        Self {
            pool,
            selection,
            fallback_order,
            max_attempts_per_provider,
            base_retry_delay: settings.base_retry_delay,
            observers: vec![stats.clone() as Arc<dyn AttemptObserver>],
            stats,
        }
    }

    /// Register an extra observer for every attempt
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn fallback_order(&self) -> &[ProviderId] {
        &self.fallback_order
    }

    pub fn stats(&self) -> &AttemptStats {
        &self.stats
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    /// Current selection
    pub fn current(&self) -> Selection {
        self.selection.get_current()
    }

    /// Generate with the currently selected provider as primary.
    /// Never fails: exhaustion yields [`TERMINAL_FAILURE_MESSAGE`].
    pub async fn generate(&self, messages: &[CanonicalMessage], options: &GenerationOptions) -> String {
        self.generate_with(messages, None, options).await
    }

    /// Generate with an explicit primary (or the selection when `None`)
    pub async fn generate_with(
        &self,
        messages: &[CanonicalMessage],
        provider: Option<ProviderId>,
        options: &GenerationOptions,
    ) -> String {
        match self.try_generate(messages, provider, options).await {
            Ok(generation) => generation.text,
            Err(e) => {
                error!("Returning fallback message to caller: {}", e);
                TERMINAL_FAILURE_MESSAGE.to_string()
            }
        }
    }

    /// Generate with the best live provider for a kind of task as primary
    pub async fn generate_for_task(
        &self,
        messages: &[CanonicalMessage],
        task: TaskKind,
        options: &GenerationOptions,
    ) -> String {
        let primary = self.best_provider_for(task.criterion());
        debug!("Task {:?} routed to {} ({})", task, primary, task.criterion());
        self.generate_with(messages, Some(primary), options).await
    }

    /// Same as [`generate_with`](Self::generate_with) but reports which
    /// provider answered, or `AllProvidersExhausted`
    pub async fn try_generate(
        &self,
        messages: &[CanonicalMessage],
        provider: Option<ProviderId>,
        options: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        let (primary, primary_model) = match provider {
            Some(id) => (id, options.model.clone()),
            None => {
                let current = self.selection.get_current();
                (current.provider, options.model.clone().or(current.model))
            }
        };

        let request_id = Uuid::new_v4();
        let candidates = self.candidates(primary);
        let mut attempted = Vec::with_capacity(candidates.len());
        let mut calls = 0u32;

        debug!(
            "Request {}: primary={}, candidates={}, messages={}",
            request_id,
            primary,
            candidates.len(),
            messages.len()
        );

        for (idx, provider) in candidates.iter().copied().enumerate() {
            // Model overrides are vendor specific; fallbacks use their defaults
            let attempt_options = GenerationOptions {
                model: if idx == 0 { primary_model.clone() } else { None },
                ..options.clone()
            };
            let model = self
                .pool
                .build_request(provider, &[], &attempt_options)
                .model;

            attempted.push(provider);
            match self
                .attempt_provider(request_id, provider, &model, messages, &attempt_options, &mut calls)
                .await
            {
                Ok(text) => {
                    if idx > 0 {
                        info!("Request {} succeeded on failover provider {} ({})", request_id, provider, model);
                    }
                    return Ok(Generation {
                        text,
                        provider,
                        model,
                        attempts: calls,
                    });
                }
                Err(_) => {
                    if let Some(next) = candidates.get(idx + 1) {
                        info!("Failing over from {} to {}", provider, next);
                    }
                }
            }
        }

        let err = ProviderError::AllProvidersExhausted { attempted };
        error!("Request {}: {}", request_id, err);
        Err(err)
    }

    /// Primary first, then the fallback order without duplicates
    fn candidates(&self, primary: ProviderId) -> Vec<ProviderId> {
        let mut candidates = vec![primary];
        for id in &self.fallback_order {
            if !candidates.contains(id) {
                candidates.push(*id);
            }
        }
        candidates
    }

    /// Call one provider, retrying retryable failures with exponential backoff
    async fn attempt_provider(
        &self,
        request_id: Uuid,
        provider: ProviderId,
        model: &str,
        messages: &[CanonicalMessage],
        options: &GenerationOptions,
        calls: &mut u32,
    ) -> Result<String, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Request {}: trying {} ({}) attempt {}/{}",
                request_id, provider, model, attempt, self.max_attempts_per_provider
            );

            let started = Instant::now();
            let result = self.pool.call(provider, messages, options).await;
            let latency = started.elapsed();

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(ProviderError::CredentialMissing { env_var, .. }) => AttemptOutcome::Skipped {
                    reason: format!("{} not set", env_var),
                },
                Err(e) => AttemptOutcome::Failed {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                },
            };
            if !matches!(outcome, AttemptOutcome::Skipped { .. }) {
                *calls += 1;
            }
            self.notify(&AttemptRecord {
                request_id,
                provider,
                model: model.to_string(),
                attempt,
                outcome,
                latency,
                at: Utc::now(),
            });

            let err = match result {
                Ok(text) => return Ok(text),
                Err(e @ ProviderError::CredentialMissing { .. }) => {
                    warn!("Skipping {}: {}", provider, e);
                    return Err(e);
                }
                Err(e) => e,
            };

            let retryable = err.is_retryable();
            warn!(
                "Provider {} ({}) failed (attempt {}, retryable={}): {}",
                provider, model, attempt, retryable, err
            );
            if !retryable || attempt >= self.max_attempts_per_provider {
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            debug!("Backing off for {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Sleep before the retry that follows `attempt`: base * 2^(attempt-1), capped
    fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_retry_delay.checked_mul(factor))
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }

    fn notify(&self, record: &AttemptRecord) {
        for observer in &self.observers {
            observer.on_attempt(record);
        }
    }

    /// Best provider for a criterion among those with a live client
    pub fn best_provider_for(&self, criterion: Criterion) -> ProviderId {
        let live = self.pool.live_providers();
        if live.is_empty() {
            debug!("No live providers yet, scoring the whole registry");
        }
        self.pool.registry().best_provider_for(criterion, &live)
    }

    /// Switch the selected provider; false when unknown, unusable or not persisted
    pub fn switch_provider(&self, provider: &str, model: Option<String>) -> bool {
        self.selection.switch(provider, model, &self.pool)
    }

    /// Status of every provider for display
    pub fn list_providers(&self) -> BTreeMap<ProviderId, ProviderSummary> {
        let live = self.pool.live_providers();
        let mut summaries = self
            .pool
            .registry()
            .list_profiles(&self.selection.get_current());
        for (id, summary) in summaries.iter_mut() {
            summary.ready = live.contains(id);
            summary.credential_present = self.pool.has_credential(*id);
            summary.stats = self.stats.get(*id);
        }
        summaries
    }

    /// One timed call against a single provider, without fallback
    pub async fn test_provider(&self, provider: &str) -> ProviderTestReport {
        let started = Instant::now();
        let id: ProviderId = match provider.parse() {
            Ok(id) => id,
            Err(e) => {
                return ProviderTestReport {
                    provider: provider.to_string(),
                    success: false,
                    response_time: 0.0,
                    response: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let options = GenerationOptions::default();
        let model = self.pool.build_request(id, &[], &options).model;
        let result = self
            .pool
            .call(id, &[CanonicalMessage::user(TEST_PROMPT)], &options)
            .await;
        let latency = started.elapsed();

        let outcome = match &result {
            Ok(_) => AttemptOutcome::Success,
            Err(e) => AttemptOutcome::Failed {
                error: e.to_string(),
                retryable: e.is_retryable(),
            },
        };
        self.notify(&AttemptRecord {
            request_id: Uuid::new_v4(),
            provider: id,
            model,
            attempt: 1,
            outcome,
            latency,
            at: Utc::now(),
        });

        match result {
            Ok(text) => {
                info!("Provider {} answered in {:.2}s", id, latency.as_secs_f64());
                ProviderTestReport {
                    provider: id.to_string(),
                    success: true,
                    response_time: latency.as_secs_f64(),
                    response: Some(text),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Provider {} test failed: {}", id, e);
                ProviderTestReport {
                    provider: id.to_string(),
                    success: false,
                    response_time: latency.as_secs_f64(),
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
