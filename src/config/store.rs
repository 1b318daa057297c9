use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open a configuration file
    ///
    /// A missing file yields the default configuration; it is written on the
    /// first `set`.
    pub async fn open(path: &Path) -> Result<Self> {
        let config = Self::load_file(path).await?;

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn load_file(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_file(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let text = toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Set entire configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        self.save_file(&config).await?;
        self.cache.store(Arc::new(config));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(&dir.path().join("meshcall.toml")).await.unwrap();

        let config = store.get();
        assert_eq!(config.relay.reconnect_interval_ms, 500);
        assert_eq!(config.relay.credential_poll_ms, 250);
        assert_eq!(
            config.webrtc.stun_servers,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
        assert!(config.call.room_id.is_none());
    }

    #[tokio::test]
    async fn test_config_store_persists_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("meshcall.toml");

        let store = ConfigStore::open(&path).await.unwrap();
        let mut config = (*store.get()).clone();
        config.identity.id = "p@example.com".to_string();
        config.call.room_id = Some(7);
        config.media.camera = false;
        store.set(config).await.unwrap();

        assert_eq!(store.get().call.room_id, Some(7));

        let reopened = ConfigStore::open(&path).await.unwrap();
        let config = reopened.get();
        assert_eq!(config.identity.id, "p@example.com");
        assert_eq!(config.call.room_id, Some(7));
        assert!(!config.media.camera);
        assert!(config.media.microphone);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meshcall.toml");
        tokio::fs::write(&path, "[relay]\nurl = \"https://chat.example.com\"\n")
            .await
            .unwrap();

        let store = ConfigStore::open(&path).await.unwrap();
        let config = store.get();
        assert_eq!(config.relay.url, "https://chat.example.com");
        assert_eq!(config.relay.reconnect_interval_ms, 500);
        assert!(config.media.screen);
    }

    #[tokio::test]
    async fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meshcall.toml");
        tokio::fs::write(&path, "relay = 3").await.unwrap();

        let err = ConfigStore::open(&path).await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
