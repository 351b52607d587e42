// Manages the app-internal directory of mirrored calendar files.
//
// Layout under the storage root:
//   calendars/<name>.ics       live calendar files
//   contacts/<name>.vcf        reserved for contact mirroring
//   deleted/calendars/...      recycle bin, emptied on the next startup
//   calendars.json             snapshot of the registry's record list

use crate::calendar::CalendarRecord;
use crate::color::Color;
use crate::paths::AppPaths;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use icalendar::{Calendar, Property};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

pub const CALENDARS_DIR: &str = "calendars";
pub const CONTACTS_DIR: &str = "contacts";
pub const DELETED_DIR: &str = "deleted";

/// Calendar-level ICS property carrying the calendar's color.
const COLOR_PROPERTY: &str = "X-APPLE-CALENDAR-COLOR";

const SNAPSHOT_FILENAME: &str = "calendars.json";
// Increment when making breaking changes to the snapshot format.
const SNAPSHOT_VERSION: u32 = 1;

/// Get the file name without its extension. A leading `.` is not treated as
/// an extension separator.
pub fn file_stem(file_name: &str) -> &str {
    file_name
        .strip_prefix('.')
        .unwrap_or(file_name)
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
}

/// Which mirrored sub-directory a file belongs to, by extension.
pub fn destination_dir(file_name: &str) -> &'static str {
    match Utf8Path::new(file_name).extension() {
        Some("vcf") => CONTACTS_DIR,
        _ => CALENDARS_DIR,
    }
}

/// Atomic write: write to a `.tmp` sibling then rename over the target.
pub fn atomic_write(path: &Utf8Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents.as_ref())
        .with_context(|| format!("Failed to write '{tmp_path}'"))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move '{tmp_path}' into place at '{path}'"))?;
    Ok(())
}

fn lock_path(path: &Utf8Path) -> Utf8PathBuf {
    match path.extension() {
        Some(ext) => path.with_extension(format!("{ext}.lock")),
        None => path.with_extension("lock"),
    }
}

/// Run `f` while holding an exclusive lock on a sidecar file next to
/// `path`, guarding against a concurrently running second instance.
pub fn with_lock<F, T>(path: &Utf8Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let lock = lock_path(path);
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock)?;

    file.lock_exclusive()?;
    let result = f();
    FileExt::unlock(&file)?;
    result
}

/// Versioned on-disk snapshot of the calendars known to the registry, so a
/// host can show the list without querying the calendar store first.
#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    #[serde(default)]
    version: u32,
    saved_at: DateTime<Utc>,
    calendars: Vec<CalendarRecord>,
}

/// The app-internal storage root and its calendar-file operations.
#[derive(Debug, Clone)]
pub struct AppStorage {
    root: Utf8PathBuf,
}

impl AppStorage {
    /// Open (and create, if needed) the storage layout under `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [CALENDARS_DIR, CONTACTS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory '{path}'"))?;
        }
        Ok(Self { root })
    }

    /// Open the storage in the OS-standard data directory.
    pub fn open_default() -> Result<Self> {
        Self::new(AppPaths::data_dir()?)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of a live mirrored file, routed by extension.
    pub fn file_path(&self, file_name: &str) -> Utf8PathBuf {
        self.root.join(destination_dir(file_name)).join(file_name)
    }

    /// Path of a file in the recycle bin.
    pub fn bin_path(&self, file_name: &str) -> Utf8PathBuf {
        self.root
            .join(DELETED_DIR)
            .join(destination_dir(file_name))
            .join(file_name)
    }

    /// Create the `.ics` file for a new calendar: a VCALENDAR skeleton
    /// carrying the calendar's name and color. Fails if the file already
    /// exists.
    pub fn create_calendar_file(&self, file_name: &str, color: Color) -> Result<Utf8PathBuf> {
        let path = self.file_path(file_name);
        let mut file = fs::File::create_new(&path)
            .with_context(|| format!("Failed to create calendar file '{path}'"))?;
        file.write_all(calendar_skeleton(file_stem(file_name), color).as_bytes())
            .with_context(|| format!("Failed to write calendar file '{path}'"))?;
        log::info!("Created calendar file '{path}'");
        Ok(path)
    }

    /// Rewrite the color property of an existing calendar file in place.
    pub fn write_color(&self, name: &str, color: Color) -> Result<()> {
        let path = self.file_path(&format!("{name}.ics"));
        with_lock(&path, || {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read calendar file '{path}'"))?;
            let property = format!("{COLOR_PROPERTY}:{color}");
            let mut replaced = false;
            let mut lines: Vec<String> = Vec::new();
            for line in contents.lines() {
                if line.starts_with(COLOR_PROPERTY) {
                    lines.push(property.clone());
                    replaced = true;
                } else {
                    lines.push(line.to_string());
                }
            }
            if !replaced {
                // Keep the file well-formed: the property goes before the
                // closing line.
                let end = lines
                    .iter()
                    .rposition(|l| l.trim() == "END:VCALENDAR")
                    .unwrap_or(lines.len());
                lines.insert(end, property);
            }
            let mut body = lines.join("\r\n");
            body.push_str("\r\n");
            atomic_write(&path, body)
        })
    }

    /// Read the color stored in a calendar's file, if there is one.
    pub fn read_color(&self, name: &str) -> Result<Option<Color>> {
        let path = self.file_path(&format!("{name}.ics"));
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read calendar file '{path}'"))?;
        Ok(contents.lines().find_map(|line| {
            let value = line.strip_prefix(COLOR_PROPERTY)?.strip_prefix(':')?;
            value.trim().parse().ok()
        }))
    }

    /// Move a live file into the recycle bin. Copies first and deletes
    /// after, so a failed copy never loses the live file.
    pub fn discard(&self, file_name: &str) -> Result<()> {
        let live = self.file_path(file_name);
        let bin = self.bin_path(file_name);
        if let Some(parent) = bin.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{parent}'"))?;
        }
        fs::copy(&live, &bin)
            .with_context(|| format!("Failed to copy '{live}' to the recycle bin"))?;
        fs::remove_file(&live).with_context(|| format!("Failed to remove '{live}'"))?;
        log::info!("Moved '{file_name}' to the recycle bin");
        Ok(())
    }

    /// Move a recycled file back to its live location.
    pub fn restore(&self, file_name: &str) -> Result<Utf8PathBuf> {
        let bin = self.bin_path(file_name);
        let live = self.file_path(file_name);
        fs::rename(&bin, &live)
            .with_context(|| format!("Failed to restore '{file_name}' from the recycle bin"))?;
        log::info!("Restored '{file_name}' from the recycle bin");
        Ok(live)
    }

    /// Permanently delete one recycled file. No-op if it is not there.
    pub fn purge_one(&self, file_name: &str) -> Result<()> {
        let bin = self.bin_path(file_name);
        if bin.exists() {
            fs::remove_file(&bin).with_context(|| format!("Failed to delete '{bin}'"))?;
        }
        Ok(())
    }

    /// Empty the recycle bin. Deletions only have to be undoable until the
    /// next startup.
    pub fn purge_bin(&self) -> Result<()> {
        let bin = self.root.join(DELETED_DIR);
        if bin.exists() {
            fs::remove_dir_all(&bin)
                .with_context(|| format!("Failed to empty the recycle bin '{bin}'"))?;
        }
        Ok(())
    }

    /// Delete a live file. Returns whether it existed.
    pub fn delete_file(&self, file_name: &str) -> Result<bool> {
        let path = self.file_path(file_name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to delete '{path}'"))?;
        Ok(true)
    }

    /// Rename a calendar's file, keeping the `.ics` extension.
    pub fn rename_calendar_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let from = self.file_path(&format!("{old_name}.ics"));
        let to = self.file_path(&format!("{new_name}.ics"));
        fs::rename(&from, &to)
            .with_context(|| format!("Failed to rename '{from}' to '{to}'"))?;
        Ok(())
    }

    /// Persist the registry's record list.
    pub fn save_snapshot(&self, calendars: &[CalendarRecord]) -> Result<()> {
        let path = self.root.join(SNAPSHOT_FILENAME);
        with_lock(&path, || {
            let snapshot = RegistrySnapshot {
                version: SNAPSHOT_VERSION,
                saved_at: Utc::now(),
                calendars: calendars.to_vec(),
            };
            let json = serde_json::to_string_pretty(&snapshot)?;
            atomic_write(&path, json)
        })
    }

    /// Load the persisted record list. An absent snapshot yields an empty
    /// list; a snapshot from a newer version of the app is an error rather
    /// than a silent partial read.
    pub fn load_snapshot(&self) -> Result<Vec<CalendarRecord>> {
        let path = self.root.join(SNAPSHOT_FILENAME);
        if !path.exists() {
            return Ok(vec![]);
        }
        let json = with_lock(&path, || {
            fs::read_to_string(&path).with_context(|| format!("Failed to read '{path}'"))
        })?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse calendar snapshot '{path}'"))?;
        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "Calendar snapshot version {} is newer than supported version {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot.calendars)
    }
}

/// Minimal VCALENDAR body for a calendar with no events yet.
fn calendar_skeleton(name: &str, color: Color) -> String {
    let mut calendar = Calendar::new();
    calendar.append_property(Property::new("X-WR-CALNAME", name));
    calendar.append_property(Property::new(COLOR_PROPERTY, color.to_string().as_str()));
    calendar.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(test_name: &str) -> AppStorage {
        let dir = std::env::temp_dir().join(format!(
            "icsmirror_storage_{}_{}",
            test_name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        AppStorage::new(Utf8PathBuf::from_path_buf(dir).unwrap()).unwrap()
    }

    fn cleanup(storage: &AppStorage) {
        let _ = fs::remove_dir_all(storage.root());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Personal.ics"), "Personal");
        assert_eq!(file_stem("noextension"), "noextension");
        assert_eq!(file_stem("two.dots.ics"), "two.dots");
        assert_eq!(file_stem(".hidden.ics"), "hidden");
    }

    #[test]
    fn test_destination_dir_routes_by_extension() {
        assert_eq!(destination_dir("Personal.ics"), CALENDARS_DIR);
        assert_eq!(destination_dir("people.vcf"), CONTACTS_DIR);
        assert_eq!(destination_dir("odd.txt"), CALENDARS_DIR);
    }

    #[test]
    fn test_create_calendar_file_writes_skeleton() {
        let storage = temp_storage("skeleton");
        let path = storage
            .create_calendar_file("Personal.ics", Color::new(0xcd, 0x58, 0xbb))
            .unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("BEGIN:VCALENDAR"));
        assert!(contents.contains("X-WR-CALNAME:Personal"));
        assert!(contents.contains("X-APPLE-CALENDAR-COLOR:#cd58bb"));
        assert!(contents.trim_end().ends_with("END:VCALENDAR"));

        // A second create with the same name must fail.
        assert!(
            storage
                .create_calendar_file("Personal.ics", Color::new(0, 0, 0))
                .is_err()
        );
        cleanup(&storage);
    }

    #[test]
    fn test_color_round_trip_through_file() {
        let storage = temp_storage("color");
        storage
            .create_calendar_file("Personal.ics", Color::new(0x11, 0x22, 0x33))
            .unwrap();
        assert_eq!(
            storage.read_color("Personal").unwrap(),
            Some(Color::new(0x11, 0x22, 0x33))
        );

        storage
            .write_color("Personal", Color::new(0xaa, 0xbb, 0xcc))
            .unwrap();
        assert_eq!(
            storage.read_color("Personal").unwrap(),
            Some(Color::new(0xaa, 0xbb, 0xcc))
        );
        // Rewriting must not duplicate the property.
        let contents = fs::read_to_string(storage.file_path("Personal.ics")).unwrap();
        assert_eq!(contents.matches(COLOR_PROPERTY).count(), 1);
        cleanup(&storage);
    }

    #[test]
    fn test_write_color_inserts_when_absent() {
        let storage = temp_storage("color_insert");
        let path = storage.file_path("Bare.ics");
        fs::write(&path, "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n").unwrap();
        storage.write_color("Bare", Color::new(1, 2, 3)).unwrap();
        assert_eq!(storage.read_color("Bare").unwrap(), Some(Color::new(1, 2, 3)));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.trim_end().ends_with("END:VCALENDAR"));
        cleanup(&storage);
    }

    #[test]
    fn test_discard_restore_and_purge() {
        let storage = temp_storage("bin");
        storage
            .create_calendar_file("Personal.ics", Color::new(1, 2, 3))
            .unwrap();

        storage.discard("Personal.ics").unwrap();
        assert!(!storage.file_path("Personal.ics").exists());
        assert!(storage.bin_path("Personal.ics").exists());

        let live = storage.restore("Personal.ics").unwrap();
        assert!(live.exists());
        assert!(!storage.bin_path("Personal.ics").exists());
        assert_eq!(storage.read_color("Personal").unwrap(), Some(Color::new(1, 2, 3)));

        storage.discard("Personal.ics").unwrap();
        storage.purge_one("Personal.ics").unwrap();
        assert!(!storage.bin_path("Personal.ics").exists());
        assert!(storage.restore("Personal.ics").is_err());
        // Purging an already-empty bin is a no-op.
        storage.purge_one("Personal.ics").unwrap();
        storage.purge_bin().unwrap();
        cleanup(&storage);
    }

    #[test]
    fn test_rename_calendar_file() {
        let storage = temp_storage("rename");
        storage
            .create_calendar_file("Old.ics", Color::new(1, 2, 3))
            .unwrap();
        storage.rename_calendar_file("Old", "New").unwrap();
        assert!(!storage.file_path("Old.ics").exists());
        assert!(storage.file_path("New.ics").exists());
        cleanup(&storage);
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let storage = temp_storage("atomic");
        let path = storage.root().join("calendars").join("a.txt");
        atomic_write(&path, "first").unwrap();
        atomic_write(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
        cleanup(&storage);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let storage = temp_storage("snapshot");
        assert!(storage.load_snapshot().unwrap().is_empty());

        let records = vec![CalendarRecord {
            id: 4,
            name: "Personal".to_string(),
            account: "mirror@local".to_string(),
            color: Color::new(0x68, 0xac, 0xef),
            synced: true,
            copied_from: Some(2),
        }];
        storage.save_snapshot(&records).unwrap();
        assert_eq!(storage.load_snapshot().unwrap(), records);
        cleanup(&storage);
    }

    #[test]
    fn test_snapshot_rejects_future_versions() {
        let storage = temp_storage("snapshot_version");
        let json = format!(
            r#"{{"version": {}, "saved_at": "2026-01-01T00:00:00Z", "calendars": []}}"#,
            SNAPSHOT_VERSION + 1
        );
        fs::write(storage.root().join(SNAPSHOT_FILENAME), json).unwrap();
        let err = storage.load_snapshot().unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
        cleanup(&storage);
    }

    #[test]
    fn test_with_lock_serializes_writers() {
        use std::sync::Arc;
        use std::thread;

        let storage = temp_storage("lock");
        let path = Arc::new(storage.root().join("counter.txt"));
        fs::write(path.as_path(), "0").unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let path = path.clone();
            handles.push(thread::spawn(move || {
                with_lock(&path, || {
                    let n: i32 = fs::read_to_string(path.as_path())?.parse()?;
                    thread::sleep(std::time::Duration::from_millis(5));
                    fs::write(path.as_path(), (n + 1).to_string())?;
                    Ok(())
                })
                .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fs::read_to_string(path.as_path()).unwrap(), "10");
        cleanup(&storage);
    }
}
