//! Static catalog of supported providers and score-based selection

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ProviderError;

use super::observer::ProviderStats;
use super::selection::Selection;
use super::types::ProviderId;

/// Declared capabilities and limits of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub id: ProviderId,
    pub name: &'static str,
    /// Environment variable holding the API key
    pub api_key_env: &'static str,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
    pub max_output_tokens: u32,
    pub supports_streaming: bool,
    pub supports_functions: bool,
    pub requests_per_minute: u32,
    /// Approximate USD per 1000 tokens
    pub cost_per_1k_tokens: f64,
    pub quality: u8,
    pub speed: u8,
    pub reliability: u8,
}

impl ProviderProfile {
    /// Cost mapped onto the same 1-10 "higher is better" scale as the other scores
    pub fn cost_score(&self) -> f64 {
        (10.0 - self.cost_per_1k_tokens * 1000.0).max(1.0)
    }

    /// Score under a selection criterion (higher is better)
    pub fn score(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Speed => f64::from(self.speed),
            Criterion::Quality => f64::from(self.quality),
            Criterion::Reliability => f64::from(self.reliability),
            Criterion::Cost => self.cost_score(),
            Criterion::Balanced => {
                0.4 * f64::from(self.quality)
                    + 0.3 * f64::from(self.reliability)
                    + 0.2 * f64::from(self.speed)
                    + 0.1 * self.cost_score()
            }
        }
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.contains(&model)
    }
}

/// What to optimise for when picking a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Speed,
    Quality,
    Reliability,
    Cost,
    Balanced,
}

impl std::str::FromStr for Criterion {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "speed" => Ok(Self::Speed),
            "quality" => Ok(Self::Quality),
            "reliability" => Ok(Self::Reliability),
            "cost" => Ok(Self::Cost),
            "balanced" => Ok(Self::Balanced),
            _ => Err(ProviderError::UnknownCriterion(s.to_string())),
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Speed => write!(f, "speed"),
            Self::Quality => write!(f, "quality"),
            Self::Reliability => write!(f, "reliability"),
            Self::Cost => write!(f, "cost"),
            Self::Balanced => write!(f, "balanced"),
        }
    }
}

/// Display/introspection record for one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub name: String,
    pub current: bool,
    /// Model that would be used right now
    pub model: String,
    /// True when `model` comes from a selection override rather than the profile default
    pub model_overridden: bool,
    pub max_output_tokens: u32,
    pub requests_per_minute: u32,
    pub cost_per_1k_tokens: f64,
    pub quality: u8,
    pub speed: u8,
    pub reliability: u8,
    /// A client has been constructed and can be used now
    pub ready: bool,
    pub credential_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProviderStats>,
}

/// Immutable provider catalog
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    profiles: Vec<ProviderProfile>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// The hard-coded vendor table
    pub fn builtin() -> Self {
        let profiles = vec![
            ProviderProfile {
                id: ProviderId::OpenAi,
                name: "OpenAI",
                api_key_env: "OPENAI_API_KEY",
                default_model: "gpt-4o-mini",
                models: &["gpt-4o-mini", "gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
                max_output_tokens: 4096,
                supports_streaming: true,
                supports_functions: true,
                requests_per_minute: 500,
                cost_per_1k_tokens: 0.002,
                quality: 9,
                speed: 7,
                reliability: 9,
            },
            ProviderProfile {
                id: ProviderId::Anthropic,
                name: "Anthropic Claude",
                api_key_env: "ANTHROPIC_API_KEY",
                default_model: "claude-3-5-haiku-latest",
                models: &[
                    "claude-3-5-haiku-latest",
                    "claude-3-5-sonnet-latest",
                    "claude-3-opus-latest",
                ],
                max_output_tokens: 4096,
                supports_streaming: true,
                supports_functions: true,
                requests_per_minute: 50,
                cost_per_1k_tokens: 0.003,
                quality: 9,
                speed: 7,
                reliability: 9,
            },
            ProviderProfile {
                id: ProviderId::Gemini,
                name: "Google Gemini",
                api_key_env: "GEMINI_API_KEY",
                default_model: "gemini-1.5-flash",
                models: &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash"],
                max_output_tokens: 8192,
                supports_streaming: true,
                supports_functions: true,
                requests_per_minute: 60,
                cost_per_1k_tokens: 0.0005,
                quality: 8,
                speed: 8,
                reliability: 8,
            },
            ProviderProfile {
                id: ProviderId::Groq,
                name: "Groq",
                api_key_env: "GROQ_API_KEY",
                default_model: "llama-3.1-8b-instant",
                models: &[
                    "llama-3.1-8b-instant",
                    "llama-3.3-70b-versatile",
                    "mixtral-8x7b-32768",
                ],
                max_output_tokens: 8192,
                supports_streaming: true,
                supports_functions: false,
                requests_per_minute: 30,
                cost_per_1k_tokens: 0.0002,
                quality: 7,
                speed: 10,
                reliability: 7,
            },
            ProviderProfile {
                id: ProviderId::Mistral,
                name: "Mistral AI",
                api_key_env: "MISTRAL_API_KEY",
                default_model: "mistral-small-latest",
                models: &[
                    "mistral-small-latest",
                    "mistral-medium-latest",
                    "mistral-large-latest",
                ],
                max_output_tokens: 4096,
                supports_streaming: true,
                supports_functions: true,
                requests_per_minute: 60,
                cost_per_1k_tokens: 0.001,
                quality: 7,
                speed: 8,
                reliability: 8,
            },
        ];
        Self { profiles }
    }

    /// Profile for a provider; every `ProviderId` has exactly one
    pub fn get_profile(&self, id: ProviderId) -> &ProviderProfile {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .unwrap_or_else(|| unreachable!("builtin registry covers every ProviderId"))
    }

    /// Look up a profile by user-supplied name
    pub fn profile_by_name(&self, name: &str) -> Result<&ProviderProfile, ProviderError> {
        let id: ProviderId = name.parse()?;
        Ok(self.get_profile(id))
    }

    /// Profiles in registry order
    pub fn profiles(&self) -> impl Iterator<Item = &ProviderProfile> {
        self.profiles.iter()
    }

    /// Static summary of every provider relative to the current selection
    ///
    /// Readiness, credential presence and stats are filled in by the router.
    pub fn list_profiles(&self, current: &Selection) -> BTreeMap<ProviderId, ProviderSummary> {
        self.profiles
            .iter()
            .map(|p| {
                let is_current = p.id == current.provider;
                let override_model = current.model.as_ref().filter(|_| is_current);
                let summary = ProviderSummary {
                    id: p.id,
                    name: p.name.to_string(),
                    current: is_current,
                    model: override_model
                        .cloned()
                        .unwrap_or_else(|| p.default_model.to_string()),
                    model_overridden: override_model.is_some(),
                    max_output_tokens: p.max_output_tokens,
                    requests_per_minute: p.requests_per_minute,
                    cost_per_1k_tokens: p.cost_per_1k_tokens,
                    quality: p.quality,
                    speed: p.speed,
                    reliability: p.reliability,
                    ready: false,
                    credential_present: false,
                    stats: None,
                };
                (p.id, summary)
            })
            .collect()
    }

    /// Highest scoring provider among `live`; all providers when `live` is empty.
    /// Ties go to the earlier entry in registry order.
    pub fn best_provider_for(&self, criterion: Criterion, live: &[ProviderId]) -> ProviderId {
        let mut best: Option<(&ProviderProfile, f64)> = None;
        for profile in self
            .profiles
            .iter()
            .filter(|p| live.is_empty() || live.contains(&p.id))
        {
            let score = profile.score(criterion);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((profile, score)),
            }
        }
        best.map(|(p, _)| p.id).unwrap_or(ProviderId::ALL[0])
    }

    /// All providers ordered by descending score, registry order on ties
    pub fn ranked_by(&self, criterion: Criterion) -> Vec<ProviderId> {
        let mut ranked: Vec<&ProviderProfile> = self.profiles.iter().collect();
        // sort_by is stable, so equal scores keep registry order
        ranked.sort_by(|a, b| b.score(criterion).total_cmp(&a.score(criterion)));
        ranked.into_iter().map(|p| p.id).collect()
    }
}
