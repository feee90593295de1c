//! Multi-provider generation layer
//!
//! Supports OpenAI, Anthropic, Google Gemini, Groq and Mistral. Vendors
//! implement [`ProviderClient`]; the [`ClientPool`] builds them lazily from
//! environment credentials and the [`ProviderRouter`] composes them with
//! retry and automatic failover.

pub mod anthropic;
pub mod google;
pub mod observer;
pub mod openai;
pub mod pool;
pub mod registry;
pub mod router;
pub mod selection;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use observer::{AttemptObserver, AttemptOutcome, AttemptRecord, AttemptStats, ProviderStats};
pub use pool::{ClientFactory, ClientPool, CredentialSource, EnvCredentials, HttpClientFactory};
pub use registry::{Criterion, ProviderProfile, ProviderRegistry, ProviderSummary};
pub use router::{Generation, ProviderRouter, ProviderTestReport, RouterSettings, TaskKind};
pub use selection::{Selection, SelectionState, SelectionStore, TomlSelectionFile};
pub use types::{CanonicalMessage, CompletionRequest, GenerationOptions, ProviderClient, ProviderId, Role};
