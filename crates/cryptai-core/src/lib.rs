//! cryptai-core - AI provider routing for the cryptai assistant
//!
//! This crate provides:
//! - A static registry of supported vendors with scores and limits
//! - Vendor clients for OpenAI, Anthropic, Gemini, Groq and Mistral
//! - A lazily populated client pool keyed by provider
//! - A persisted provider selection that can be switched at runtime
//! - A router that retries, fails over, and never surfaces vendor errors

pub mod error;
pub mod providers;

// Re-export main types for convenience
pub use error::ProviderError;
pub use providers::{
    CanonicalMessage, ClientPool, Criterion, Generation, GenerationOptions, HttpClientFactory,
    ProviderId, ProviderRegistry, ProviderRouter, ProviderTestReport, RouterSettings, Selection,
    SelectionState, TaskKind, TomlSelectionFile,
};
pub use providers::pool::{DEFAULT_REQUEST_TIMEOUT, EMPTY_COMPLETION_PLACEHOLDER};
pub use providers::router::TERMINAL_FAILURE_MESSAGE;
