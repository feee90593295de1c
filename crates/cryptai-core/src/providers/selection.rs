//! Current provider/model selection with persisted switching

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::pool::ClientPool;
use super::types::ProviderId;

/// Which provider (and optional model override) handles unrouted requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Selection {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Durable home of the selection, read at startup and written on switch
pub trait SelectionStore: Send + Sync {
    fn load(&self) -> Result<Option<Selection>>;
    fn save(&self, selection: &Selection) -> Result<()>;
}

/// On-disk layout of the selection file
#[derive(Debug, Serialize, Deserialize)]
struct SelectionFileContents {
    provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    switched_at: Option<DateTime<Utc>>,
}

/// Selection persisted as a small TOML file
#[derive(Debug, Clone)]
pub struct TomlSelectionFile {
    path: PathBuf,
}

impl TomlSelectionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectionStore for TomlSelectionFile {
    fn load(&self) -> Result<Option<Selection>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read selection at {}", self.path.display()))?;
        let contents: SelectionFileContents = toml::from_str(&content)
            .with_context(|| format!("Failed to parse selection at {}", self.path.display()))?;
        Ok(Some(Selection {
            provider: contents.provider,
            model: contents.model,
        }))
    }

    fn save(&self, selection: &Selection) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = SelectionFileContents {
            provider: selection.provider,
            model: selection.model.clone(),
            switched_at: Some(Utc::now()),
        };
        let serialized = toml::to_string_pretty(&contents)?;

        // Write next to the target and rename so readers never see a partial file
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, serialized)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Process-wide current selection, injected into the router
pub struct SelectionState {
    current: RwLock<Selection>,
    /// Serialises persist + update so concurrent switches cannot interleave
    switch_lock: Mutex<()>,
    store: Option<Box<dyn SelectionStore>>,
}

impl std::fmt::Debug for SelectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionState")
            .field("current", &self.get_current())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SelectionState {
    /// Memory-only selection (nothing survives a restart)
    pub fn in_memory(initial: Selection) -> Self {
        Self {
            current: RwLock::new(initial),
            switch_lock: Mutex::new(()),
            store: None,
        }
    }

    /// Resume the persisted selection, or start from `default` when there is none
    pub fn load(default: Selection, store: Box<dyn SelectionStore>) -> Self {
        let initial = match store.load() {
            Ok(Some(saved)) => {
                info!(
                    "Resuming provider selection {} (model: {})",
                    saved.provider,
                    saved.model.as_deref().unwrap_or("default")
                );
                saved
            }
            Ok(None) => {
                debug!("No persisted selection, using default {}", default.provider);
                default
            }
            Err(e) => {
                warn!("Ignoring unreadable provider selection: {:#}", e);
                default
            }
        };
        Self {
            current: RwLock::new(initial),
            switch_lock: Mutex::new(()),
            store: Some(store),
        }
    }

    /// Snapshot of the current selection
    pub fn get_current(&self) -> Selection {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Switch to another provider.
    ///
    /// Returns false when the name is unknown, when no client can be built for
    /// it, or when persisting fails. The in-memory selection only changes once
    /// the new value has been persisted.
    pub fn switch(&self, provider: &str, model: Option<String>, pool: &ClientPool) -> bool {
        let id: ProviderId = match provider.parse() {
            Ok(id) => id,
            Err(e) => {
                warn!("Refusing provider switch: {}", e);
                return false;
            }
        };

        if let Err(e) = pool.get_or_create_client(id) {
            warn!("Refusing provider switch to {}: {}", id, e);
            return false;
        }

        if let Some(model) = model.as_deref() {
            if !pool.registry().get_profile(id).has_model(model) {
                warn!("Model '{}' is not in the {} catalog, using it anyway", model, id);
            }
        }

        let next = Selection {
            provider: id,
            model,
        };

        let _guard = match self.switch_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&next) {
                error!("Failed to persist provider switch to {}: {:#}", id, e);
                return false;
            }
        }

        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!("Switched provider to {}", id);
        true
    }
}
