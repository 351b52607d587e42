// File: src/registry.rs
//
// The authoritative list of calendars the app mirrors, plus the operations
// that keep the calendar store, the internal files and the sync directory
// in agreement with it. Checks run up front and files are unwound when the
// store refuses an operation, so a failed operation leaves no observable
// change behind.

use crate::calendar::{CalendarEditor, CalendarRecord, CalendarSeed, DeviceCalendar};
use crate::color::DEFAULT_CALENDAR_COLOR;
use crate::keyed_list::{Editable, KeyedList};
use crate::provider::{CalendarChanges, CalendarProvider};
use crate::storage::{self, AppStorage};
use crate::syncdir::{self, ImportOutcome, SyncDir};
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::io::Read;

/// How to resolve a name conflict while copying or importing a calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Import under a different name.
    Rename(String),
    /// Replace the existing calendar.
    Overwrite,
    /// Leave the existing calendar alone and skip this one.
    Skip,
}

pub struct CalendarRegistry<P: CalendarProvider> {
    provider: P,
    storage: AppStorage,
    sync_dir: Option<SyncDir>,
    calendars: KeyedList<CalendarRecord>,
}

impl<P: CalendarProvider> CalendarRegistry<P> {
    pub fn new(provider: P, storage: AppStorage) -> Self {
        Self {
            provider,
            storage,
            sync_dir: None,
            calendars: KeyedList::new(),
        }
    }

    /// Populate the list from the calendar store. Also empties the recycle
    /// bin: deletions only have to be undoable until the next startup.
    pub fn load(&mut self) -> Result<()> {
        self.storage.purge_bin()?;
        let records = self
            .provider
            .app_calendars()
            .context("Failed to query the calendar store")?;
        self.calendars.clear();
        for record in records {
            self.calendars
                .add(record)
                .context("Calendar store returned duplicate calendar names")?;
        }
        self.storage.save_snapshot(&self.calendars)?;
        Ok(())
    }

    pub fn calendars(&self) -> &KeyedList<CalendarRecord> {
        &self.calendars
    }

    pub fn storage(&self) -> &AppStorage {
        &self.storage
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn sync_dir(&self) -> Option<&SyncDir> {
        self.sync_dir.as_ref()
    }

    /// Select the sync directory. Initializes its layout and mirrors every
    /// calendar already known into it, so the external side starts
    /// complete.
    pub fn attach_sync_dir(&mut self, dir: SyncDir) -> Result<()> {
        dir.initialize()?;
        for record in self.calendars.iter() {
            let file_name = record.file_name();
            if let Err(error) = dir.export_file(&file_name, &self.storage) {
                log::error!(
                    "Error mirroring '{file_name}' to the newly-selected sync directory: {error:#}"
                );
            }
        }
        self.sync_dir = Some(dir);
        Ok(())
    }

    /// Create a new, empty calendar from `seed`.
    pub fn create(&mut self, seed: CalendarSeed) -> Result<CalendarRecord> {
        if seed.name.trim().is_empty() {
            anyhow::bail!("Calendar name can't be blank");
        }
        let file_name = format!("{}.ics", seed.name);
        if !syncdir::valid_file_name(&file_name) {
            anyhow::bail!("Calendar name {:?} contains illegal characters", seed.name);
        }
        if self.calendars.contains_key(seed.name.as_str()) {
            anyhow::bail!("A calendar named {:?} already exists", seed.name);
        }

        self.storage.create_calendar_file(&file_name, seed.color)?;
        if let Some(dir) = &self.sync_dir
            && let Err(error) = dir.export_file(&file_name, &self.storage)
        {
            let _ = self.storage.delete_file(&file_name);
            return Err(error.context("Failed to mirror the new calendar file to the sync directory"));
        }

        let record = match self.provider.create_calendar(&seed) {
            Ok(record) => record,
            Err(error) => {
                // Leave nothing behind for a calendar that never existed.
                let _ = self.storage.delete_file(&file_name);
                if let Some(dir) = &self.sync_dir {
                    let _ = dir.delete_file(&file_name);
                }
                return Err(anyhow::Error::from(error)
                    .context("Failed to create the calendar in the calendar store"));
            }
        };

        self.calendars
            .add(record.clone())
            .context("Calendar list out of sync with the calendar store")?;
        self.storage.save_snapshot(&self.calendars)?;
        log::info!("Created calendar \"{}\"", record.name);
        Ok(record)
    }

    /// Edit a calendar's mutable fields (color, sync flag) through its
    /// editor. The record keeps its position in the list.
    pub fn edit<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut CalendarEditor),
    {
        let record = self
            .calendars
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("No calendar named {name:?}"))?;
        let id = record.id;
        let old = record.editor();
        let mut editor = old;
        f(&mut editor);
        if editor == old {
            return Ok(());
        }

        if editor.color != old.color {
            self.storage.write_color(name, editor.color)?;
        }
        self.provider
            .update_calendar(
                id,
                &CalendarChanges {
                    name: None,
                    color: (editor.color != old.color).then_some(editor.color),
                    synced: (editor.synced != old.synced).then_some(editor.synced),
                },
            )
            .context("Failed to edit the calendar in the calendar store")?;
        if editor.color != old.color
            && let Some(dir) = &self.sync_dir
        {
            let _ = dir.export_file(&format!("{name}.ics"), &self.storage);
        }

        self.calendars
            .edit(name, |e| *e = editor)
            .context("Calendar list changed underneath an edit")?;
        self.storage.save_snapshot(&self.calendars)?;
        Ok(())
    }

    pub fn set_synced(&mut self, name: &str, synced: bool) -> Result<()> {
        self.edit(name, |editor| editor.synced = synced)
    }

    /// Rename a calendar. Renames ripple into the mirrored file names, so
    /// they are not part of the generic editor.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if old_name == new_name {
            return Ok(());
        }
        if new_name.trim().is_empty() {
            anyhow::bail!("Calendar name can't be blank");
        }
        if !syncdir::valid_file_name(&format!("{new_name}.ics")) {
            anyhow::bail!("Calendar name {new_name:?} contains illegal characters");
        }
        if self.calendars.contains_key(new_name) {
            anyhow::bail!("A calendar named {new_name:?} already exists");
        }
        let record = self
            .calendars
            .get(old_name)
            .ok_or_else(|| anyhow::anyhow!("No calendar named {old_name:?}"))?
            .clone();

        self.storage.rename_calendar_file(old_name, new_name)?;
        if let Some(dir) = &self.sync_dir
            && let Err(error) = dir.rename_file(&record.file_name(), new_name)
        {
            // Roll the internal rename back so both mirrors stay in step.
            let _ = self.storage.rename_calendar_file(new_name, old_name);
            return Err(error);
        }
        if let Err(error) = self.provider.update_calendar(
            record.id,
            &CalendarChanges {
                name: Some(new_name.to_string()),
                color: None,
                synced: None,
            },
        ) {
            let _ = self.storage.rename_calendar_file(new_name, old_name);
            if let Some(dir) = &self.sync_dir {
                let _ = dir.rename_file(&format!("{new_name}.ics"), old_name);
            }
            return Err(anyhow::Error::from(error)
                .context("Failed to rename the calendar in the calendar store"));
        }

        let renamed = CalendarRecord {
            name: new_name.to_string(),
            ..record
        };
        self.calendars
            .replace(old_name, renamed)
            .context("Calendar list changed underneath a rename")?;
        self.storage.save_snapshot(&self.calendars)?;
        log::info!("Renamed calendar \"{old_name}\" to \"{new_name}\"");
        Ok(())
    }

    /// Remove a calendar. The store entry goes first, so a half-removed
    /// calendar never lingers there; the live file moves to the recycle bin
    /// so the removal can be undone with [`CalendarRegistry::restore`].
    pub fn remove(&mut self, name: &str) -> Result<CalendarRecord> {
        let record = self
            .calendars
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("No calendar named {name:?}"))?
            .clone();
        let file_name = record.file_name();

        if !self.provider.delete_calendar(name) {
            anyhow::bail!("Calendar {name:?} not removed from the calendar store");
        }
        self.storage
            .discard(&file_name)
            .with_context(|| format!("Failed to move '{file_name}' to the recycle bin"))?;
        if let Some(dir) = &self.sync_dir {
            let _ = dir.delete_file(&file_name);
        }

        let removed = self
            .calendars
            .remove(name)
            .ok_or_else(|| anyhow::anyhow!("Calendar list changed underneath a removal"))?;
        self.storage.save_snapshot(&self.calendars)?;
        log::info!("Deleted calendar \"{name}\"");
        Ok(removed)
    }

    /// Undo a removal: move the recycled file back, re-create the store
    /// entry and mirror the file out again.
    pub fn restore(&mut self, name: &str) -> Result<()> {
        if self.calendars.contains_key(name) {
            anyhow::bail!("A calendar named {name:?} already exists");
        }
        let file_name = format!("{name}.ics");
        self.storage.restore(&file_name)?;
        let color = self.storage.read_color(name)?.unwrap_or(DEFAULT_CALENDAR_COLOR);
        let record = match self.provider.create_calendar(&CalendarSeed::new(name, color)) {
            Ok(record) => record,
            Err(error) => {
                // Back into the bin rather than leaving a live file with no
                // store entry.
                let _ = self.storage.discard(&file_name);
                return Err(anyhow::Error::from(error)
                    .context("Failed to re-create the restored calendar in the calendar store"));
            }
        };
        if let Some(dir) = &self.sync_dir {
            let _ = dir.export_file(&file_name, &self.storage);
        }
        self.calendars
            .add(record)
            .context("Calendar list out of sync with the calendar store")?;
        self.storage.save_snapshot(&self.calendars)?;
        log::info!("Restored calendar \"{name}\"");
        Ok(())
    }

    /// Device calendars that can be copied in, with `copied_to` filled in
    /// for the ones that already were.
    pub fn device_calendars(&self) -> Result<Vec<DeviceCalendar>> {
        let device = self
            .provider
            .device_calendars()
            .context("Failed to query the calendar store")?;
        Ok(DeviceCalendar::link_copies(device, &self.calendars))
    }

    /// Copy device calendars into the mirror. `resolve` is consulted when a
    /// selected calendar's name collides with an existing one. Returns the
    /// names the copies ended up under.
    pub fn copy_from_device<F>(&mut self, device_ids: &[i64], mut resolve: F) -> Result<Vec<String>>
    where
        F: FnMut(&str) -> ConflictChoice,
    {
        let device = self
            .provider
            .device_calendars()
            .context("Failed to query the calendar store")?;
        let mut copied = Vec::new();
        for &id in device_ids {
            let source = device
                .iter()
                .find(|cal| cal.id == id)
                .ok_or_else(|| anyhow::anyhow!("No device calendar with id {id}"))?;

            let name = if self.calendars.contains_key(source.name.as_str()) {
                match resolve(&source.name) {
                    ConflictChoice::Rename(new_name) => new_name,
                    ConflictChoice::Overwrite => {
                        self.remove(&source.name)?;
                        source.name.clone()
                    }
                    ConflictChoice::Skip => continue,
                }
            } else {
                source.name.clone()
            };
            if self.calendars.contains_key(name.as_str()) {
                anyhow::bail!("A calendar named {name:?} already exists");
            }

            let record = self
                .provider
                .copy_device_calendar(id, &name, source.color)
                .with_context(|| format!("Error copying calendar {:?}", source.name))?;
            let file_name = record.file_name();
            self.storage.create_calendar_file(&file_name, record.color)?;
            if let Some(dir) = &self.sync_dir {
                let _ = dir.export_file(&file_name, &self.storage);
            }
            self.calendars
                .add(record)
                .context("Calendar list out of sync with the calendar store")?;
            copied.push(name);
        }
        self.storage.save_snapshot(&self.calendars)?;
        Ok(copied)
    }

    /// Import a calendar file the user picked. On a name conflict the
    /// caller decides between [`CalendarRegistry::import_file_renamed`] and
    /// [`CalendarRegistry::import_file_overwrite`].
    pub fn import_file<R: Read>(&mut self, source: R, file_name: &str) -> Result<ImportOutcome> {
        let dir = self
            .sync_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No sync directory selected"))?;
        let outcome = dir.import_file(source, file_name, &self.storage)?;
        if let ImportOutcome::Imported { name } = &outcome {
            self.finish_import(name)?;
        }
        Ok(outcome)
    }

    /// Retry a conflicted import under a new name.
    pub fn import_file_renamed<R: Read>(
        &mut self,
        source: R,
        file_name: &str,
        new_name: &str,
    ) -> Result<ImportOutcome> {
        let ext = Utf8Path::new(file_name).extension().unwrap_or("ics");
        self.import_file(source, &format!("{new_name}.{ext}"))
    }

    /// Resolve a conflicted import by replacing the existing calendar.
    pub fn import_file_overwrite<R: Read>(
        &mut self,
        source: R,
        file_name: &str,
    ) -> Result<ImportOutcome> {
        let name = storage::file_stem(file_name).to_string();
        if self.calendars.contains_key(name.as_str()) {
            self.remove(&name)?;
        } else {
            // The conflicting file never made it into the calendar store;
            // clear it out directly.
            let _ = self.storage.delete_file(file_name);
            if let Some(dir) = &self.sync_dir {
                let _ = dir.delete_file(file_name);
            }
        }
        self.import_file(source, file_name)
    }

    /// Register a freshly imported calendar file with the calendar store
    /// and the list. The file's color is honored when it carries one.
    fn finish_import(&mut self, name: &str) -> Result<()> {
        let color = self.storage.read_color(name)?.unwrap_or(DEFAULT_CALENDAR_COLOR);
        let record = match self.provider.create_calendar(&CalendarSeed::new(name, color)) {
            Ok(record) => record,
            Err(error) => {
                // Drop the imported files so the import can be retried.
                let file_name = format!("{name}.ics");
                let _ = self.storage.delete_file(&file_name);
                if let Some(dir) = &self.sync_dir {
                    let _ = dir.delete_file(&file_name);
                }
                return Err(anyhow::Error::from(error)
                    .context("Failed to create the imported calendar in the calendar store"));
            }
        };
        self.calendars
            .add(record)
            .context("Calendar list out of sync with the calendar store")?;
        self.storage.save_snapshot(&self.calendars)?;
        Ok(())
    }

    /// Remove every calendar.
    pub fn clear(&mut self) -> Result<()> {
        let names: Vec<String> = self.calendars.keys().cloned().collect();
        for name in names {
            self.remove(&name)?;
        }
        Ok(())
    }
}
