use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::AppConfig;
use crate::error::Result;

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads. A store without a path keeps
/// its configuration in memory only.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist yet
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_file(path).await?,
            None => AppConfig::default(),
        };
        config.validate()?;

        Ok(Self {
            path: path.map(Path::to_path_buf),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn load_file(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                info!("Loaded configuration from {}", path.display());
                Ok(serde_json::from_str(&text)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                Ok(AppConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure and persist it
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        config.validate()?;

        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let json = serde_json::to_string_pretty(&config)?;
            tokio::fs::write(path, json).await?;
        }

        self.cache.store(Arc::new(config));
        Ok(())
    }
}
