// File: src/calendar.rs
// Record types for the calendars the app mirrors.

use crate::color::Color;
use crate::keyed_list::{Editable, Keyed};
use serde::{Deserialize, Serialize};

/// A calendar owned by this app.
///
/// Names are unique across the app's calendars and double as the stem of
/// the calendar's `.ics` file name, so the name is the record's key in the
/// calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRecord {
    /// Identifier assigned by the calendar store on insert.
    pub id: i64,
    pub name: String,
    /// Account the calendar belongs to.
    pub account: String,
    pub color: Color,
    /// Whether the user chose to sync this calendar. New and copied
    /// calendars start out not synced.
    pub synced: bool,
    /// Id of the device calendar this one was copied from, if any. Keeps a
    /// device calendar from being copied twice.
    pub copied_from: Option<i64>,
}

impl CalendarRecord {
    /// Name of the `.ics` file backing this calendar.
    pub fn file_name(&self) -> String {
        format!("{}.ics", self.name)
    }
}

impl Keyed for CalendarRecord {
    type Key = String;

    fn key(&self) -> &String {
        &self.name
    }
}

/// The mutable subset of a [`CalendarRecord`]. Everything else is assigned
/// by the calendar store and fixed for the record's lifetime; renames are a
/// separate registry operation because they ripple into file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEditor {
    pub color: Color,
    pub synced: bool,
}

impl Editable for CalendarRecord {
    type Editor = CalendarEditor;

    fn editor(&self) -> CalendarEditor {
        CalendarEditor {
            color: self.color,
            synced: self.synced,
        }
    }

    fn apply(&mut self, editor: CalendarEditor) {
        self.color = editor.color;
        self.synced = editor.synced;
    }
}

/// What a caller supplies to create a calendar. The remaining
/// [`CalendarRecord`] fields only exist once the calendar store has
/// inserted the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSeed {
    pub name: String,
    pub color: Color,
}

impl CalendarSeed {
    pub fn new(name: impl Into<String>, color: Color) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

/// A calendar owned by another app on the device, shown to the user as a
/// candidate for copying into the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCalendar {
    pub id: i64,
    pub name: String,
    pub account: String,
    pub color: Color,
    /// Name of the app calendar that was copied from this one, if any.
    pub copied_to: Option<String>,
}

impl DeviceCalendar {
    /// Fill in `copied_to` by cross-referencing the app calendars'
    /// `copied_from` field.
    pub fn link_copies(
        mut calendars: Vec<DeviceCalendar>,
        app_calendars: &[CalendarRecord],
    ) -> Vec<DeviceCalendar> {
        for cal in &mut calendars {
            cal.copied_to = app_calendars
                .iter()
                .find(|app| app.copied_from == Some(cal.id))
                .map(|app| app.name.clone());
        }
        calendars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> CalendarRecord {
        CalendarRecord {
            id: 1,
            name: name.to_string(),
            account: "mirror@local".to_string(),
            color: Color::new(0, 0, 0),
            synced: false,
            copied_from: None,
        }
    }

    #[test]
    fn test_name_is_the_key() {
        let cal = record("Personal");
        assert_eq!(cal.key(), "Personal");
        assert_eq!(cal.file_name(), "Personal.ics");
    }

    #[test]
    fn test_editor_covers_only_mutable_fields() {
        let mut cal = record("Personal");
        let mut editor = cal.editor();
        editor.color = Color::new(1, 2, 3);
        editor.synced = true;
        cal.apply(editor);
        assert_eq!(cal.color, Color::new(1, 2, 3));
        assert!(cal.synced);
        // Key and store-assigned fields untouched.
        assert_eq!(cal.name, "Personal");
        assert_eq!(cal.id, 1);
    }

    #[test]
    fn test_link_copies() {
        let mut app = record("Copied work");
        app.copied_from = Some(7);
        let device = vec![
            DeviceCalendar {
                id: 7,
                name: "Work".to_string(),
                account: "other@device".to_string(),
                color: Color::new(9, 9, 9),
                copied_to: None,
            },
            DeviceCalendar {
                id: 8,
                name: "Gym".to_string(),
                account: "other@device".to_string(),
                color: Color::new(9, 9, 9),
                copied_to: None,
            },
        ];

        let linked = DeviceCalendar::link_copies(device, &[app]);
        assert_eq!(linked[0].copied_to.as_deref(), Some("Copied work"));
        assert_eq!(linked[1].copied_to, None);
    }
}
