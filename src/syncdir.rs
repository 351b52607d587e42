// File: src/syncdir.rs
//
// The user-chosen shared directory mirrored by the external file-sync tool.
// Everything here works on plain UTF-8 paths; files whose contents the sync
// tool merges are treated as opaque payload.

use crate::storage::{self, AppStorage};
use anyhow::{Context, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::{self, ErrorKind, Read};

/// Characters that can't appear in mirrored file names.
pub const ILLEGAL_FILE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Whether `name` is usable as a mirrored file name.
pub fn valid_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(ILLEGAL_FILE_CHARS)
}

/// Result of importing a file through the sync boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The file was imported; `name` is the calendar name (the file stem)
    /// under which it should appear.
    Imported { name: String },
    /// A mirrored file with this name already exists. The caller decides
    /// whether to rename the import or overwrite the existing calendar.
    NameConflict { name: String },
}

/// Handle on the sync directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDir {
    root: Utf8PathBuf,
}

impl SyncDir {
    /// Open the sync directory. Fails if the path does not point at an
    /// existing directory.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = path.into();
        if !root.is_dir() {
            anyhow::bail!("Sync directory '{root}' does not exist or is not a directory");
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Create the mirrored sub-directory layout.
    pub fn initialize(&self) -> Result<()> {
        for dir in [storage::CALENDARS_DIR, storage::CONTACTS_DIR] {
            self.create_dir_at(Utf8Path::new(dir))?;
        }
        Ok(())
    }

    /// File names inside one of the mirrored sub-directories, sorted.
    pub fn entries(&self, sub_dir: &str) -> Result<Vec<String>> {
        let path = self.root.join(sub_dir);
        let reader =
            fs::read_dir(&path).with_context(|| format!("Failed to read directory '{path}'"))?;
        let mut names = Vec::new();
        for entry in reader {
            let name = entry?
                .file_name()
                .into_string()
                .map_err(|name| anyhow::anyhow!("File name {name:?} is not valid UTF-8"))?;
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub fn file_exists(&self, rel: &Utf8Path) -> bool {
        self.root.join(rel).exists()
    }

    /// The mirrored path for a calendar/contact file, routed by extension.
    pub fn file_path(&self, file_name: &str) -> Utf8PathBuf {
        self.root
            .join(storage::destination_dir(file_name))
            .join(file_name)
    }

    /// Reject paths that could escape the sync directory.
    fn validate_relative(path: &Utf8Path) -> Result<()> {
        if path.as_str().is_empty() {
            anyhow::bail!("Path must not be empty");
        }
        if path.is_absolute() {
            anyhow::bail!("Path argument must be a relative path; provided absolute path");
        }
        if !path
            .components()
            .all(|c| matches!(c, Utf8Component::Normal(_)))
        {
            anyhow::bail!(
                "Path contains invalid components (e.g. \"..\"); must be a plain relative path"
            );
        }
        Ok(())
    }

    /// Create a file below the root, creating parent directories as needed.
    /// Fails if the file already exists.
    pub fn create_file_at(&self, rel: &Utf8Path) -> Result<Utf8PathBuf> {
        Self::validate_relative(rel)?;
        let file_name = rel
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Path must have a file name"))?;
        if !valid_file_name(file_name) {
            anyhow::bail!("File name {file_name:?} contains illegal characters");
        }
        let dir = match rel.parent().filter(|p| !p.as_str().is_empty()) {
            Some(parent) => self.create_dir_at(parent)?,
            None => self.root.clone(),
        };
        let path = dir.join(file_name);
        fs::File::create_new(&path).with_context(|| format!("Failed to create file '{path}'"))?;
        Ok(path)
    }

    /// Create (or open) a directory below the root, creating parents as
    /// needed. Fails if a non-directory occupies any part of the path.
    pub fn create_dir_at(&self, rel: &Utf8Path) -> Result<Utf8PathBuf> {
        Self::validate_relative(rel)?;
        let mut current = self.root.clone();
        for component in rel.components() {
            let Utf8Component::Normal(name) = component else {
                anyhow::bail!(
                    "Path contains invalid components (e.g. \"..\"); must be a plain relative path"
                );
            };
            current = current.join(name);
            if current.exists() {
                if !current.is_dir() {
                    anyhow::bail!("'{current}' already exists, but it is not a directory");
                }
            } else {
                fs::create_dir(&current)
                    .with_context(|| format!("Failed to create directory '{current}'"))?;
            }
        }
        Ok(current)
    }

    /// Import a file the user picked.
    ///
    /// The file lands in the app-internal directory first; a file of the
    /// same name already there reports [`ImportOutcome::NameConflict`]
    /// instead of overwriting. On success the file is mirrored out to this
    /// sync directory and the calendar name is returned. I/O failures are
    /// errors, with the internal copy undone so the import can be retried
    /// cleanly.
    pub fn import_file<R: Read>(
        &self,
        mut source: R,
        file_name: &str,
        storage: &AppStorage,
    ) -> Result<ImportOutcome> {
        if !valid_file_name(file_name) {
            anyhow::bail!("File name {file_name:?} contains illegal characters");
        }
        let name = storage::file_stem(file_name).to_string();

        let internal_path = storage.file_path(file_name);
        let mut internal_file = match fs::File::create_new(&internal_path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                log::info!("'{file_name}' is already imported");
                return Ok(ImportOutcome::NameConflict { name });
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to create '{internal_path}'"));
            }
        };
        if let Err(error) = io::copy(&mut source, &mut internal_file) {
            drop(internal_file);
            let _ = fs::remove_file(&internal_path);
            return Err(error).with_context(|| format!("Failed to copy into '{internal_path}'"));
        }
        drop(internal_file);

        if let Err(error) = self.export_file(file_name, storage) {
            log::error!("Error mirroring '{file_name}' to the sync directory; aborting import");
            let _ = fs::remove_file(&internal_path);
            return Err(error);
        }

        log::info!("File '{file_name}' imported");
        Ok(ImportOutcome::Imported { name })
    }

    /// Copy a file from the app-internal directory into the sync directory,
    /// replacing any previous mirrored copy.
    pub fn export_file(&self, file_name: &str, storage: &AppStorage) -> Result<()> {
        let dest_dir = self.create_dir_at(Utf8Path::new(storage::destination_dir(file_name)))?;
        let from = storage.file_path(file_name);
        let to = dest_dir.join(file_name);
        fs::copy(&from, &to).with_context(|| format!("Failed to copy '{from}' to '{to}'"))?;
        Ok(())
    }

    /// Delete a mirrored file. Returns whether it existed.
    pub fn delete_file(&self, file_name: &str) -> Result<bool> {
        let path = self.file_path(file_name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to delete '{path}'"))?;
        Ok(true)
    }

    /// Rename a mirrored file, keeping its extension.
    pub fn rename_file(&self, old_file_name: &str, new_name: &str) -> Result<()> {
        if !valid_file_name(new_name) {
            anyhow::bail!("File name {new_name:?} contains illegal characters");
        }
        let from = self.file_path(old_file_name);
        let ext = Utf8Path::new(old_file_name).extension().unwrap_or("ics");
        let to = from.with_file_name(format!("{new_name}.{ext}"));
        fs::rename(&from, &to).with_context(|| format!("Failed to rename '{from}' to '{to}'"))?;
        Ok(())
    }
}
