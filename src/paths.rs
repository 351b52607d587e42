// File: src/paths.rs
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use directories::ProjectDirs;
use std::env;
use std::fs;
use std::path::PathBuf;

pub struct AppPaths;

impl AppPaths {
    /// Returns the ProjectDirs struct, common to all path lookups.
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("org", "icsmirror", "icsmirror")
    }

    /// Helper to ensure a directory exists before returning it.
    fn ensure_exists(path: PathBuf) -> Result<Utf8PathBuf> {
        if !path.exists() {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Utf8PathBuf::from_path_buf(path)
            .map_err(|p| anyhow::anyhow!("Directory path is not valid UTF-8: {:?}", p))
    }

    /// Base directory for a class of app files, honoring the test override.
    fn resolve_base(subdir: &str) -> Option<PathBuf> {
        // Test override: everything lands in one disposable directory.
        if let Ok(test_dir) = env::var("ICSMIRROR_TEST_DIR") {
            return Some(PathBuf::from(test_dir));
        }

        let proj = Self::project_dirs()?;
        let dir = match subdir {
            "data" => proj.data_dir(),
            "config" => proj.config_dir(),
            _ => return None,
        };
        Some(dir.to_path_buf())
    }

    /// Where the mirrored calendar files and the recycle bin live.
    pub fn data_dir() -> Result<Utf8PathBuf> {
        let path = Self::resolve_base("data")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Self::ensure_exists(path)
    }

    pub fn config_dir() -> Result<Utf8PathBuf> {
        let path = Self::resolve_base("config")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Self::ensure_exists(path)
    }

    pub fn config_file() -> Result<Utf8PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}
