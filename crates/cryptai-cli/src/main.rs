use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cryptai_core::providers::{CredentialSource, EnvCredentials};
use cryptai_core::{
    CanonicalMessage, ClientPool, GenerationOptions, HttpClientFactory, ProviderId,
    ProviderRegistry, ProviderRouter, SelectionState, TaskKind, TomlSelectionFile,
};

mod config;

use config::CryptaiConfig;

#[derive(Parser)]
#[command(name = "cryptai")]
#[command(version)]
#[command(about = "Multi-provider AI routing for the cryptai assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration and credential status
    Config,

    /// List providers with scores, limits and readiness
    Providers {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Switch the active provider (persisted)
    Switch {
        /// Provider name (openai, anthropic, gemini, groq, mistral)
        provider: String,

        /// Model override for this provider
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Send one test prompt to a single provider
    Test {
        /// Provider name
        provider: String,
    },

    /// Send a one-shot message through the router
    Ask {
        /// The message to send
        message: String,

        /// Use this provider as primary instead of the selection
        #[arg(short, long, conflicts_with = "task")]
        provider: Option<String>,

        /// Model override for the primary provider
        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        /// Pick the primary by task kind (chat, analysis, quick, bulk)
        #[arg(long)]
        task: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Providers { json } => cmd_providers(&cli.config, json).await,
        Commands::Switch { provider, model } => cmd_switch(&cli.config, &provider, model).await,
        Commands::Test { provider } => cmd_test(&cli.config, &provider).await,
        Commands::Ask {
            message,
            provider,
            model,
            max_tokens,
            temperature,
            system,
            task,
        } => {
            let mut options = GenerationOptions::default();
            if let Some(model) = model {
                options = options.with_model(model);
            }
            if let Some(max_tokens) = max_tokens {
                options = options.with_max_output_tokens(max_tokens);
            }
            if let Some(temperature) = temperature {
                options = options.with_temperature(temperature);
            }
            cmd_ask(&cli.config, &message, provider, task, system, options).await
        }
    }
}

/// Wire config, environment credentials and the persisted selection into a router
fn build_router(cfg: &CryptaiConfig) -> Result<ProviderRouter> {
    let timeout = cfg.request_timeout();

    let mut factory = HttpClientFactory::new(timeout)?;
    for (id, url) in cfg.base_urls()? {
        factory = factory
            .with_base_url(id, url)
            .with_context(|| format!("Invalid base URL for {}", id))?;
    }

    let pool = ClientPool::new(
        Arc::new(ProviderRegistry::builtin()),
        Arc::new(factory),
        Arc::new(EnvCredentials),
    )
    .with_request_timeout(timeout);

    let selection = SelectionState::load(
        cfg.default_selection()?,
        Box::new(TomlSelectionFile::new(cfg.selection_path())),
    );

    Ok(ProviderRouter::new(
        Arc::new(pool),
        Arc::new(selection),
        cfg.router_settings()?,
    ))
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    println!("cryptai initialized at {}", config_dir.display());
    println!(
        "Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, GROQ_API_KEY or MISTRAL_API_KEY, \
         then edit {} to tune routing.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CryptaiConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);

    println!("# selection file: {}", cfg.selection_path().display());
    println!("# credentials:");
    let registry = ProviderRegistry::builtin();
    for (id, env_var, status) in config::credential_report(&registry, |var| EnvCredentials.get(var)) {
        println!("#   {:<10} {:<18} {}", id, env_var, status);
    }
    Ok(())
}

async fn cmd_providers(config_path: &Option<PathBuf>, json: bool) -> Result<()> {
    let cfg = CryptaiConfig::load(config_path)?;
    let router = build_router(&cfg)?;
    router.pool().warm_up();
    let providers = router.list_providers();

    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }

    println!(
        "  {:<10} {:<26} {:>6} {:>6} {:>8}  {:>2} {:>2} {:>2}  {}",
        "PROVIDER", "MODEL", "TOKENS", "RPM", "$/1K", "Q", "S", "R", "STATUS"
    );
    for summary in providers.values() {
        let marker = if summary.current { "*" } else { " " };
        let status = if summary.ready {
            "ready"
        } else if summary.credential_present {
            "unavailable"
        } else {
            "no key"
        };
        let model = if summary.model_overridden {
            format!("{} (override)", summary.model)
        } else {
            summary.model.clone()
        };
        println!(
            "{} {:<10} {:<26} {:>6} {:>6} {:>8.4}  {:>2} {:>2} {:>2}  {}",
            marker,
            summary.id,
            model,
            summary.max_output_tokens,
            summary.requests_per_minute,
            summary.cost_per_1k_tokens,
            summary.quality,
            summary.speed,
            summary.reliability,
            status
        );
    }
    println!(
        "\nFallback order: {}",
        router
            .fallback_order()
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(())
}

async fn cmd_switch(config_path: &Option<PathBuf>, provider: &str, model: Option<String>) -> Result<()> {
    let cfg = CryptaiConfig::load(config_path)?;
    let router = build_router(&cfg)?;

    if !router.switch_provider(provider, model) {
        bail!(
            "Could not switch to '{}'. Check the name and that its API key is set (see `cryptai config`).",
            provider
        );
    }

    let current = router.current();
    let model = current
        .model
        .clone()
        .unwrap_or_else(|| router.pool().registry().get_profile(current.provider).default_model.to_string());
    println!("Switched to {} ({})", current.provider, model);
    Ok(())
}

async fn cmd_test(config_path: &Option<PathBuf>, provider: &str) -> Result<()> {
    let cfg = CryptaiConfig::load(config_path)?;
    let router = build_router(&cfg)?;

    let report = router.test_provider(provider).await;
    if report.success {
        println!(
            "{}: OK in {:.2}s\n{}",
            report.provider,
            report.response_time,
            report.response.unwrap_or_default()
        );
        Ok(())
    } else {
        Err(anyhow!(
            "{}: FAILED after {:.2}s: {}",
            report.provider,
            report.response_time,
            report.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    message: &str,
    provider: Option<String>,
    task: Option<String>,
    system: Option<String>,
    options: GenerationOptions,
) -> Result<()> {
    let cfg = CryptaiConfig::load(config_path)?;
    let router = build_router(&cfg)?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(CanonicalMessage::system(system));
    }
    messages.push(CanonicalMessage::user(message));

    let response = match (provider, task) {
        (_, Some(task)) => {
            let task: TaskKind = task.parse()?;
            router.pool().warm_up();
            router.generate_for_task(&messages, task, &options).await
        }
        (Some(provider), None) => {
            let id: ProviderId = provider.parse()?;
            router.generate_with(&messages, Some(id), &options).await
        }
        (None, None) => router.generate(&messages, &options).await,
    };

    println!("{}", response);
    Ok(())
}
