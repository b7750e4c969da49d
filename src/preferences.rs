//! Persisted user preferences (selected device and voice)

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEVICE_KEY: &str = "selectedDeviceId";
pub const VOICE_KEY: &str = "selectedVoiceId";

/// Key-value store that survives restarts
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// One JSON object on disk, rewritten on every `set`
pub struct JsonFilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFilePreferences {
    /// Load `path`; a missing or unreadable file starts empty
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring malformed preferences at {:?}: {}", path, e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        debug!("Loaded {} preferences from {:?}", values.len(), path);
        Self { path, values }
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let json = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write preferences to {:?}", self.path))
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.persist()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("prefs.json");

        let mut prefs = JsonFilePreferences::open(&path);
        assert!(prefs.get(VOICE_KEY).is_none());
        prefs.set(VOICE_KEY, "21m00Tcm4TlvDq8ikWAM")?;

        let reopened = JsonFilePreferences::open(&path);
        assert_eq!(reopened.get(VOICE_KEY).as_deref(), Some("21m00Tcm4TlvDq8ikWAM"));
        Ok(())
    }

    #[test]
    fn test_malformed_file_starts_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json")?;

        let prefs = JsonFilePreferences::open(&path);
        assert!(prefs.get(DEVICE_KEY).is_none());
        Ok(())
    }
}
