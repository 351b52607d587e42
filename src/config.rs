// File: src/config.rs
// Handles user preferences: loading, saving, and defaults.
use crate::paths::AppPaths;
use crate::storage;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// User preferences persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// The user-chosen shared directory mirrored by the external file-sync
    /// tool. `None` until the user picks one.
    #[serde(default)]
    pub sync_dir: Option<Utf8PathBuf>,
    /// Split each calendar into one file per event instead of one file per
    /// calendar.
    #[serde(default)]
    pub fragment_calendars: bool,
}

impl Preferences {
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::config_file()?)
    }

    /// Load preferences from an explicit path. A missing file yields the
    /// defaults; an unreadable or malformed file is an error (never
    /// silently replaced, it would drop the user's sync-dir choice).
    pub fn load_from(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read preferences file '{path}'"))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse preferences file '{path}'"))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::config_file()?)
    }

    pub fn save_to(&self, path: &Utf8Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize preferences")?;
        storage::atomic_write(path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(test_name: &str) -> Utf8PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "icsmirror_config_{}_{}",
            test_name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        Utf8PathBuf::from_path_buf(dir).unwrap().join("config.toml")
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = temp_config_path("missing");
        let prefs = Preferences::load_from(&path).unwrap();
        assert_eq!(prefs, Preferences::default());
        assert_eq!(prefs.sync_dir, None);
        assert!(!prefs.fragment_calendars);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_config_path("round_trip");
        let prefs = Preferences {
            sync_dir: Some(Utf8PathBuf::from("/tmp/somewhere/synced")),
            fragment_calendars: true,
        };
        prefs.save_to(&path).unwrap();
        let loaded = Preferences::load_from(&path).unwrap();
        assert_eq!(loaded, prefs);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_unknown_and_absent_fields_tolerated() {
        let path = temp_config_path("partial");
        fs::write(&path, "fragment_calendars = true\n").unwrap();
        let prefs = Preferences::load_from(&path).unwrap();
        assert!(prefs.fragment_calendars);
        assert_eq!(prefs.sync_dir, None);

        fs::write(&path, "not valid toml [[[").unwrap();
        assert!(Preferences::load_from(&path).is_err());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
