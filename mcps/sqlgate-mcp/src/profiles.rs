//! Named connection profile persistence
//!
//! Profiles live in the `[profiles]` table of the config file. The store
//! rewrites the whole file on every change and leaves the other sections
//! untouched.

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, ConfigFile, ConnectionProfile};

/// Key-value persistence for connection profiles
pub trait ProfileStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<ConnectionProfile>, ConfigError>;

    /// Insert or replace a profile
    fn set(&self, name: &str, profile: ConnectionProfile) -> Result<(), ConfigError>;

    /// Profile names in sorted order
    fn list(&self) -> Result<Vec<String>, ConfigError>;

    /// Remove a profile; returns whether it existed
    fn delete(&self, name: &str) -> Result<bool, ConfigError>;
}

/// [`ProfileStore`] backed by the TOML config file
#[derive(Debug, Clone)]
pub struct TomlProfileStore {
    path: PathBuf,
}

impl TomlProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ConfigFile, ConfigError> {
        ConfigFile::load_from(&self.path)
    }
}

impl ProfileStore for TomlProfileStore {
    fn get(&self, name: &str) -> Result<Option<ConnectionProfile>, ConfigError> {
        Ok(self.read()?.profiles.remove(name))
    }

    fn set(&self, name: &str, profile: ConnectionProfile) -> Result<(), ConfigError> {
        let mut file = self.read()?;
        file.profiles.insert(name.to_string(), profile);
        file.save_to(&self.path)?;
        tracing::info!("Saved profile '{}' to {:?}", name, self.path);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.read()?.profiles.into_keys().collect())
    }

    fn delete(&self, name: &str) -> Result<bool, ConfigError> {
        let mut file = self.read()?;
        let existed = file.profiles.remove(name).is_some();
        if existed {
            if file.active_profile.as_deref() == Some(name) {
                file.active_profile = None;
            }
            file.save_to(&self.path)?;
            tracing::info!("Removed profile '{}' from {:?}", name, self.path);
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use tempfile::tempdir;

    #[test]
    fn test_profile_crud() {
        let dir = tempdir().unwrap();
        let store = TomlProfileStore::new(dir.path().join("config.toml"));

        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.get("prod").unwrap(), None);

        store
            .set("prod", ConnectionProfile::with_database("/data/prod.db"))
            .unwrap();
        store
            .set("dev", ConnectionProfile::with_database("/data/dev.db"))
            .unwrap();

        assert_eq!(store.list().unwrap(), vec!["dev".to_string(), "prod".to_string()]);
        assert_eq!(
            store.get("prod").unwrap().and_then(|p| p.path),
            Some(PathBuf::from("/data/prod.db"))
        );

        assert!(store.delete("prod").unwrap());
        assert!(!store.delete("prod").unwrap());
        assert_eq!(store.list().unwrap(), vec!["dev".to_string()]);
    }

    #[test]
    fn test_store_preserves_server_section_and_clears_dangling_active() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = ConfigFile::default();
        file.server.transport = TransportKind::Stdio;
        file.active_profile = Some("prod".to_string());
        file.profiles
            .insert("prod".to_string(), ConnectionProfile::with_database("/p.db"));
        file.save_to(&path).unwrap();

        let store = TomlProfileStore::new(&path);
        store.delete("prod").unwrap();

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded.server.transport, TransportKind::Stdio);
        assert_eq!(reloaded.active_profile, None);
    }
}
