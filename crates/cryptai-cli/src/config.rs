use anyhow::{Context, Result, anyhow};
use cryptai_core::providers::{RouterSettings, Selection};
use cryptai_core::{DEFAULT_REQUEST_TIMEOUT, ProviderId, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptaiConfig {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_provider: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Empty means: rank credentialed providers by reliability
    #[serde(default)]
    pub fallback_order: Vec<String>,
    #[serde(default)]
    pub selection_file: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts_per_provider: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            fallback_order: Vec::new(),
            selection_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Provider name -> API base URL override
    #[serde(default)]
    pub base_urls: BTreeMap<String, String>,
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cryptai")
}

/// Show enough of a secret to recognise it
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

// Utility: expand a leading ~ in paths
fn shellexpand(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

impl CryptaiConfig {
    /// Load from `custom_path`, or `~/.cryptai/config.toml`. A missing
    /// default file means built-in defaults; a missing explicit file is an error.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    info!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `cryptai init` first.",
                path.display()
            )
        })?;
        Self::parse(&content, &path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        for (name, url) in &config.providers.base_urls {
            if url.contains("key=") {
                warn!(
                    "Base URL for {} appears to embed a key. Use the provider's environment variable instead.",
                    name
                );
            }
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.request_timeout_secs.max(1))
    }

    /// Selection used until a switch has been persisted
    pub fn default_selection(&self) -> Result<Selection> {
        let provider: ProviderId = self
            .ai
            .default_provider
            .parse()
            .context("Invalid [ai] default_provider")?;
        let mut selection = Selection::new(provider);
        if let Some(model) = self.ai.default_model.as_deref().filter(|m| !m.is_empty()) {
            selection = selection.with_model(model);
        }
        Ok(selection)
    }

    pub fn router_settings(&self) -> Result<RouterSettings> {
        let fallback_order = if self.ai.fallback_order.is_empty() {
            None
        } else {
            let order = self
                .ai
                .fallback_order
                .iter()
                .map(|name| name.parse::<ProviderId>())
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid [ai] fallback_order")?;
            Some(order)
        };
        Ok(RouterSettings {
            fallback_order,
            max_attempts_per_provider: self.ai.max_attempts_per_provider,
            base_retry_delay: Duration::from_millis(self.ai.retry_delay_ms),
        })
    }

    /// Base URL overrides keyed by provider
    pub fn base_urls(&self) -> Result<Vec<(ProviderId, &str)>> {
        self.providers
            .base_urls
            .iter()
            .map(|(name, url)| {
                let id = name
                    .parse::<ProviderId>()
                    .map_err(|e| anyhow!("Invalid [providers.base_urls] entry: {}", e))?;
                Ok((id, url.as_str()))
            })
            .collect()
    }

    pub fn selection_path(&self) -> PathBuf {
        match self.ai.selection_file.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => shellexpand(path),
            None => config_dir().join("selection.toml"),
        }
    }
}

/// Credential status per provider, secrets masked
pub fn credential_report(
    registry: &ProviderRegistry,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(ProviderId, &'static str, String)> {
    registry
        .profiles()
        .map(|profile| {
            let status = match lookup(profile.api_key_env) {
                Some(value) if !value.trim().is_empty() => mask_secret(value.trim()),
                _ => "(not set)".to_string(),
            };
            (profile.id, profile.api_key_env, status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_template_parses() {
        let cfg = CryptaiConfig::parse(
            include_str!("../../../config/default.toml"),
            Path::new("default.toml"),
        )
        .unwrap();
        assert_eq!(cfg.ai.default_provider, "openai");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert!(cfg.providers.base_urls.is_empty());

        let settings = cfg.router_settings().unwrap();
        assert!(settings.fallback_order.is_none());
        assert_eq!(settings.max_attempts_per_provider, 1);
        assert_eq!(settings.base_retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let cfg = CryptaiConfig::parse("", Path::new("empty.toml")).unwrap();
        assert_eq!(cfg.ai.max_attempts_per_provider, 1);
        assert_eq!(
            cfg.default_selection().unwrap(),
            Selection::new(ProviderId::OpenAi)
        );
    }

    #[test]
    fn test_full_config() {
        let cfg = CryptaiConfig::parse(
            r#"
            [ai]
            default_provider = "claude"
            default_model = "claude-3-5-sonnet-latest"
            request_timeout_secs = 10
            max_attempts_per_provider = 3
            retry_delay_ms = 250
            fallback_order = ["groq", "Gemini"]
            selection_file = "/tmp/cryptai-selection.toml"

            [providers.base_urls]
            openai = "http://localhost:8080/v1"
            "#,
            Path::new("custom.toml"),
        )
        .unwrap();

        assert_eq!(
            cfg.default_selection().unwrap(),
            Selection::new(ProviderId::Anthropic).with_model("claude-3-5-sonnet-latest")
        );
        let settings = cfg.router_settings().unwrap();
        assert_eq!(
            settings.fallback_order,
            Some(vec![ProviderId::Groq, ProviderId::Gemini])
        );
        assert_eq!(settings.max_attempts_per_provider, 3);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(
            cfg.base_urls().unwrap(),
            vec![(ProviderId::OpenAi, "http://localhost:8080/v1")]
        );
        assert_eq!(
            cfg.selection_path(),
            PathBuf::from("/tmp/cryptai-selection.toml")
        );
    }

    #[test]
    fn test_invalid_provider_names_are_errors() {
        let mut cfg = CryptaiConfig::default();
        cfg.ai.default_provider = "cohere".to_string();
        assert!(cfg.default_selection().is_err());

        let mut cfg = CryptaiConfig::default();
        cfg.ai.fallback_order = vec!["openai".to_string(), "llama".to_string()];
        let err = cfg.router_settings().unwrap_err();
        assert!(format!("{:#}", err).contains("llama"));

        let mut cfg = CryptaiConfig::default();
        cfg.providers
            .base_urls
            .insert("azure".to_string(), "https://example.com".to_string());
        assert!(cfg.base_urls().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ai]\ndefault_provider = \"mistral\"\n").unwrap();

        let cfg = CryptaiConfig::load(&Some(path)).unwrap();
        assert_eq!(cfg.ai.default_provider, "mistral");

        let missing = dir.path().join("nope.toml");
        let err = CryptaiConfig::load(&Some(missing)).unwrap_err();
        assert!(err.to_string().contains("cryptai init"));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ai\ndefault_provider = ").unwrap();
        let err = CryptaiConfig::load(&Some(path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefghijkl"), "sk-...ijkl");
    }

    #[test]
    fn test_credential_report_masks_values() {
        let registry = ProviderRegistry::builtin();
        let report = credential_report(&registry, |var| match var {
            "OPENAI_API_KEY" => Some("sk-proj-1234567890".to_string()),
            "GROQ_API_KEY" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(report.len(), ProviderId::ALL.len());
        let openai = report.iter().find(|r| r.0 == ProviderId::OpenAi).unwrap();
        assert_eq!(openai.1, "OPENAI_API_KEY");
        assert_eq!(openai.2, "sk-...7890");
        let groq = report.iter().find(|r| r.0 == ProviderId::Groq).unwrap();
        assert_eq!(groq.2, "(not set)");
    }

    #[test]
    fn test_default_selection_path_under_config_dir() {
        let cfg = CryptaiConfig::default();
        assert_eq!(cfg.selection_path(), config_dir().join("selection.toml"));
    }
}
