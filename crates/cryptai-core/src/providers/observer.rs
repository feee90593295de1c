//! Per-attempt observation hook and the built-in statistics collector

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::ProviderId;

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Provider skipped because its client could not be built
    Skipped { reason: String },
    Failed { error: String, retryable: bool },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One call (or skip) against one provider during a routed request
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub request_id: Uuid,
    pub provider: ProviderId,
    pub model: String,
    /// 1-based attempt number against this provider
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

/// Receives every attempt the router makes
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);
}

/// Rolling counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderStats {
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    /// Sum of latencies of real calls, for averaging
    #[serde(skip)]
    pub total_latency: Duration,
    pub last_error: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ProviderStats {
    /// Mean latency over successful and failed calls (skips excluded)
    pub fn average_latency(&self) -> Option<Duration> {
        let calls = self.successes + self.failures;
        if calls == 0 {
            return None;
        }
        u32::try_from(calls).ok().map(|n| self.total_latency / n)
    }

    pub fn success_rate(&self) -> Option<f64> {
        let calls = self.successes + self.failures;
        if calls == 0 {
            None
        } else {
            Some(self.successes as f64 / calls as f64)
        }
    }
}

/// Collects [`ProviderStats`] for every provider the router touches
#[derive(Debug, Default)]
pub struct AttemptStats {
    stats: Mutex<BTreeMap<ProviderId, ProviderStats>>,
}

impl AttemptStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for one provider
    pub fn get(&self, provider: ProviderId) -> Option<ProviderStats> {
        self.lock().get(&provider).cloned()
    }

    /// Snapshot of everything recorded so far
    pub fn snapshot(&self) -> BTreeMap<ProviderId, ProviderStats> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ProviderId, ProviderStats>> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AttemptObserver for AttemptStats {
    fn on_attempt(&self, record: &AttemptRecord) {
        let mut stats = self.lock();
        let entry = stats.entry(record.provider).or_default();
        match &record.outcome {
            AttemptOutcome::Success => {
                entry.successes += 1;
                entry.total_latency += record.latency;
                entry.last_used = Some(record.at);
            }
            AttemptOutcome::Failed { error, .. } => {
                entry.failures += 1;
                entry.total_latency += record.latency;
                entry.last_error = Some(error.clone());
                entry.last_used = Some(record.at);
            }
            AttemptOutcome::Skipped { reason } => {
                entry.skipped += 1;
                entry.last_error = Some(reason.clone());
            }
        }
    }
}
