use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads. Changes apply to sessions created
/// after the update.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Load from `path`; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let config: AppConfig = toml::from_str(&text)
                    .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.validate()?;
        Ok(Self::with_path(config, Some(path.to_path_buf())))
    }

    /// In-memory store
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_path(config, None))
    }

    fn with_path(config: AppConfig, path: Option<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        }
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure
    ///
    /// The modified copy is validated before it replaces the cached value;
    /// on error the current configuration stays in place.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);
        config.validate()?;

        self.cache.store(Arc::new(config));
        debug!("Configuration updated");

        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });
        Ok(())
    }

    /// Write the current configuration as TOML
    pub async fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&*self.get())
            .map_err(|e| AppError::Config(format!("failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, text).await?;
        info!("Configuration written to {}", path.display());
        Ok(())
    }

    /// File the configuration was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}
