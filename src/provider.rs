// File: src/provider.rs
//
// Boundary to the device calendar store. The registry consumes the
// [`CalendarProvider`] trait and nothing else; the row/projection machinery
// below exists so a provider can copy calendars (with their events,
// reminders and attendees) generically, moving scalar fields around without
// interpreting them.

use crate::calendar::{CalendarRecord, CalendarSeed, DeviceCalendar};
use crate::color::Color;
use std::fmt;
use strum::{EnumIter, IntoEnumIterator};

/// A scalar cell as returned by calendar-store queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One row of a calendar-store query: ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing any previous value.
    pub fn put(&mut self, column: impl Into<String>, value: Value) -> &mut Self {
        let column = column.into();
        if let Some(cell) = self.cells.iter_mut().find(|(c, _)| *c == column) {
            cell.1 = value;
        } else {
            self.cells.push((column, value));
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let i = self.cells.iter().position(|(c, _)| c == column)?;
        Some(self.cells.remove(i).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    /// Copy the columns of projection `P` out of this row. Null cells and
    /// columns the row doesn't carry are skipped.
    pub fn project<P>(&self) -> Row
    where
        P: Projection + IntoEnumIterator,
    {
        let mut out = Row::new();
        for column in P::iter() {
            if let Some(value) = self.get(column.column())
                && !value.is_null()
            {
                out.put(column.column(), value.clone());
            }
        }
        out
    }
}

/// The set of columns a query reads or a copy transfers, one enum per
/// table. Entries are the columns, in declaration order.
pub trait Projection {
    /// The column name as the store knows it.
    fn column(&self) -> &'static str;
}

/// All column names of a projection, in declaration order.
pub fn projection_columns<P>() -> Vec<&'static str>
where
    P: Projection + IntoEnumIterator,
{
    P::iter().map(|c| c.column()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum CalendarColumn {
    Id,
    Name,
    Account,
    Color,
    Synced,
    CopiedFrom,
}

impl Projection for CalendarColumn {
    fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Account => "account",
            Self::Color => "color",
            Self::Synced => "synced",
            Self::CopiedFrom => "copied_from",
        }
    }
}

// Columns that transfer when an event is copied between calendars. The id
// is carried along only to find the event's reminders and attendees; the
// copy gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum EventColumn {
    Id,
    Title,
    Organizer,
    Location,
    Description,
    Timezone,
    EndTimezone,
    DateStart,
    DateEnd,
    Duration,
    AllDay,
    RecurrenceRule,
    RecurrenceDates,
    ExclusionRule,
    ExclusionDates,
    Availability,
}

impl Projection for EventColumn {
    fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Organizer => "organizer",
            Self::Location => "location",
            Self::Description => "description",
            Self::Timezone => "timezone",
            Self::EndTimezone => "end_timezone",
            Self::DateStart => "dtstart",
            Self::DateEnd => "dtend",
            Self::Duration => "duration",
            Self::AllDay => "all_day",
            Self::RecurrenceRule => "rrule",
            Self::RecurrenceDates => "rdate",
            Self::ExclusionRule => "exrule",
            Self::ExclusionDates => "exdate",
            Self::Availability => "availability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ReminderColumn {
    Method,
    Minutes,
}

impl Projection for ReminderColumn {
    fn column(&self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Minutes => "minutes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum AttendeeColumn {
    Name,
    Email,
    Relationship,
    Kind,
    Status,
}

impl Projection for AttendeeColumn {
    fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Relationship => "relationship",
            Self::Kind => "kind",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// A calendar with this name already exists in the store.
    AlreadyExists(String),
    /// No calendar matched the given name or id.
    NotFound(String),
    /// The store failed in some way the core does not interpret.
    Failed(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists(name) => {
                write!(f, "a calendar named {name:?} already exists in the calendar store")
            }
            Self::NotFound(what) => write!(f, "calendar store has no {what}"),
            Self::Failed(msg) => write!(f, "calendar store operation failed: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// What an edit may change about an existing calendar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarChanges {
    pub name: Option<String>,
    pub color: Option<Color>,
    pub synced: Option<bool>,
}

/// The narrow contract the registry consumes from the device calendar
/// store. The core copies returned scalar fields into records and nothing
/// more.
pub trait CalendarProvider {
    /// Calendars owned by this app.
    fn app_calendars(&self) -> Result<Vec<CalendarRecord>, ProviderError>;

    /// Calendars owned by other apps, candidates for copying in. The
    /// `copied_to` field is left unset; the registry fills it.
    fn device_calendars(&self) -> Result<Vec<DeviceCalendar>, ProviderError>;

    /// Insert a new calendar; the store assigns its id. New calendars start
    /// out not synced.
    fn create_calendar(&mut self, seed: &CalendarSeed) -> Result<CalendarRecord, ProviderError>;

    fn update_calendar(&mut self, id: i64, changes: &CalendarChanges)
    -> Result<(), ProviderError>;

    /// Delete by name (names are unique). A calendar's events go with it.
    /// Returns whether anything was deleted.
    fn delete_calendar(&mut self, name: &str) -> bool;

    /// Copy a device calendar into this app's account under `name`, along
    /// with its events, reminders and attendees. The copy records where it
    /// came from so the same device calendar can't be copied twice.
    fn copy_device_calendar(
        &mut self,
        device_id: i64,
        name: &str,
        color: Color,
    ) -> Result<CalendarRecord, ProviderError>;
}

/// In-memory calendar store. Stands in for the platform store on hosts
/// without one, and backs the test suite.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    account: String,
    next_id: i64,
    calendars: Vec<Row>,
    /// (owning calendar id, event row)
    events: Vec<(i64, Row)>,
    /// (owning event id, reminder row)
    reminders: Vec<(i64, Row)>,
    /// (owning event id, attendee row)
    attendees: Vec<(i64, Row)>,
}

impl MemoryProvider {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            next_id: 1,
            ..Self::default()
        }
    }

    fn assign_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn calendar_row(
        id: i64,
        name: &str,
        account: &str,
        color: Color,
        synced: bool,
        copied_from: Option<i64>,
    ) -> Row {
        let mut row = Row::new();
        row.put("id", Value::Integer(id))
            .put("name", Value::Text(name.to_string()))
            .put("account", Value::Text(account.to_string()))
            .put("color", Value::Integer(color.to_argb() as i64))
            .put("synced", Value::Integer(synced as i64))
            .put("copied_from", copied_from.map_or(Value::Null, Value::Integer));
        row
    }

    fn record_from_row(row: &Row) -> CalendarRecord {
        CalendarRecord {
            id: row.get("id").and_then(Value::as_integer).unwrap_or(0),
            name: row
                .get("name")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string(),
            account: row
                .get("account")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string(),
            color: Color::from_argb(
                row.get("color").and_then(Value::as_integer).unwrap_or(0) as u32,
            ),
            synced: row.get("synced").and_then(Value::as_integer).unwrap_or(0) != 0,
            copied_from: row.get("copied_from").and_then(Value::as_integer),
        }
    }

    fn is_own(&self, row: &Row) -> bool {
        row.get("account").and_then(Value::as_text) == Some(self.account.as_str())
    }

    /// Add a calendar owned by another account, as other apps on a device
    /// would. Returns its id.
    pub fn seed_device_calendar(&mut self, name: &str, account: &str, color: Color) -> i64 {
        let id = self.assign_id();
        let row = Self::calendar_row(id, name, account, color, false, None);
        self.calendars.push(row);
        id
    }

    /// Attach an event row to a calendar. Returns the event id.
    pub fn seed_event(&mut self, calendar_id: i64, mut row: Row) -> i64 {
        let id = self.assign_id();
        row.put("id", Value::Integer(id));
        self.events.push((calendar_id, row));
        id
    }

    pub fn seed_reminder(&mut self, event_id: i64, row: Row) {
        self.reminders.push((event_id, row));
    }

    pub fn seed_attendee(&mut self, event_id: i64, row: Row) {
        self.attendees.push((event_id, row));
    }

    /// Events attached to a calendar. Inspection helper.
    pub fn events_for(&self, calendar_id: i64) -> Vec<&Row> {
        self.events
            .iter()
            .filter(|(c, _)| *c == calendar_id)
            .map(|(_, r)| r)
            .collect()
    }

    /// Reminders attached to an event. Inspection helper.
    pub fn reminders_for(&self, event_id: i64) -> Vec<&Row> {
        self.reminders
            .iter()
            .filter(|(e, _)| *e == event_id)
            .map(|(_, r)| r)
            .collect()
    }

    /// Attendees attached to an event. Inspection helper.
    pub fn attendees_for(&self, event_id: i64) -> Vec<&Row> {
        self.attendees
            .iter()
            .filter(|(e, _)| *e == event_id)
            .map(|(_, r)| r)
            .collect()
    }

    fn own_calendar_named(&self, name: &str) -> Option<&Row> {
        self.calendars
            .iter()
            .find(|row| self.is_own(row) && row.get("name").and_then(Value::as_text) == Some(name))
    }
}

impl CalendarProvider for MemoryProvider {
    fn app_calendars(&self) -> Result<Vec<CalendarRecord>, ProviderError> {
        Ok(self
            .calendars
            .iter()
            .filter(|row| self.is_own(row))
            .map(Self::record_from_row)
            .collect())
    }

    fn device_calendars(&self) -> Result<Vec<DeviceCalendar>, ProviderError> {
        Ok(self
            .calendars
            .iter()
            .filter(|row| !self.is_own(row))
            .map(|row| {
                let record = Self::record_from_row(row);
                DeviceCalendar {
                    id: record.id,
                    name: record.name,
                    account: record.account,
                    color: record.color,
                    copied_to: None,
                }
            })
            .collect())
    }

    fn create_calendar(&mut self, seed: &CalendarSeed) -> Result<CalendarRecord, ProviderError> {
        if self.own_calendar_named(&seed.name).is_some() {
            return Err(ProviderError::AlreadyExists(seed.name.clone()));
        }
        let id = self.assign_id();
        let row = Self::calendar_row(id, &seed.name, &self.account, seed.color, false, None);
        let record = Self::record_from_row(&row);
        self.calendars.push(row);
        log::info!("Created calendar \"{}\" with id {id}", seed.name);
        Ok(record)
    }

    fn update_calendar(
        &mut self,
        id: i64,
        changes: &CalendarChanges,
    ) -> Result<(), ProviderError> {
        if let Some(new_name) = &changes.name
            && self.calendars.iter().any(|row| {
                self.is_own(row)
                    && row.get("name").and_then(Value::as_text) == Some(new_name.as_str())
                    && row.get("id").and_then(Value::as_integer) != Some(id)
            })
        {
            return Err(ProviderError::AlreadyExists(new_name.clone()));
        }

        let account = self.account.clone();
        let row = self
            .calendars
            .iter_mut()
            .find(|row| {
                row.get("id").and_then(Value::as_integer) == Some(id)
                    && row.get("account").and_then(Value::as_text) == Some(account.as_str())
            })
            .ok_or_else(|| ProviderError::NotFound(format!("calendar with id {id}")))?;

        if let Some(name) = &changes.name {
            row.put("name", Value::Text(name.clone()));
        }
        if let Some(color) = changes.color {
            row.put("color", Value::Integer(color.to_argb() as i64));
        }
        if let Some(synced) = changes.synced {
            row.put("synced", Value::Integer(synced as i64));
        }
        Ok(())
    }

    fn delete_calendar(&mut self, name: &str) -> bool {
        let Some(i) = self.calendars.iter().position(|row| {
            self.is_own(row) && row.get("name").and_then(Value::as_text) == Some(name)
        }) else {
            log::error!("Failed to delete calendar \"{name}\": not found");
            return false;
        };
        let row = self.calendars.remove(i);
        let calendar_id = row.get("id").and_then(Value::as_integer).unwrap_or(-1);

        // Events go with the calendar, and their reminders and attendees
        // with them.
        let removed_events: Vec<i64> = self
            .events
            .iter()
            .filter(|(c, _)| *c == calendar_id)
            .filter_map(|(_, r)| r.get("id").and_then(Value::as_integer))
            .collect();
        self.events.retain(|(c, _)| *c != calendar_id);
        self.reminders.retain(|(e, _)| !removed_events.contains(e));
        self.attendees.retain(|(e, _)| !removed_events.contains(e));

        log::info!("Deleted calendar \"{name}\"");
        true
    }

    fn copy_device_calendar(
        &mut self,
        device_id: i64,
        name: &str,
        color: Color,
    ) -> Result<CalendarRecord, ProviderError> {
        let source = self
            .calendars
            .iter()
            .find(|row| {
                !self.is_own(row) && row.get("id").and_then(Value::as_integer) == Some(device_id)
            })
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("device calendar with id {device_id}")))?;
        if self.own_calendar_named(name).is_some() {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }

        let new_id = self.assign_id();
        let mut copy = source.project::<CalendarColumn>();
        copy.put("id", Value::Integer(new_id))
            .put("name", Value::Text(name.to_string()))
            .put("account", Value::Text(self.account.clone()))
            .put("color", Value::Integer(color.to_argb() as i64))
            // The copy starts as not synced; the user opts in per calendar.
            .put("synced", Value::Integer(0))
            .put("copied_from", Value::Integer(device_id));
        let record = Self::record_from_row(&copy);
        self.calendars.push(copy);

        let source_events: Vec<Row> = self
            .events
            .iter()
            .filter(|(c, _)| *c == device_id)
            .map(|(_, r)| r.clone())
            .collect();
        for event in source_events {
            let old_event_id = event.get("id").and_then(Value::as_integer);
            let new_event_id = self.assign_id();
            let mut event_copy = event.project::<EventColumn>();
            event_copy.put("id", Value::Integer(new_event_id));
            self.events.push((new_id, event_copy));

            let Some(old_event_id) = old_event_id else {
                continue;
            };
            let reminder_copies: Vec<Row> = self
                .reminders
                .iter()
                .filter(|(e, _)| *e == old_event_id)
                .map(|(_, r)| r.project::<ReminderColumn>())
                .collect();
            for reminder in reminder_copies {
                self.reminders.push((new_event_id, reminder));
            }
            let attendee_copies: Vec<Row> = self
                .attendees
                .iter()
                .filter(|(e, _)| *e == old_event_id)
                .map(|(_, r)| r.project::<AttendeeColumn>())
                .collect();
            for attendee in attendee_copies {
                self.attendees.push((new_event_id, attendee));
            }
        }

        log::info!("Copied device calendar {device_id} as \"{name}\"");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: &str = "mirror@local";

    fn provider() -> MemoryProvider {
        MemoryProvider::new(OWN)
    }

    #[test]
    fn test_projection_columns_in_declaration_order() {
        assert_eq!(
            projection_columns::<CalendarColumn>(),
            ["id", "name", "account", "color", "synced", "copied_from"]
        );
        assert_eq!(projection_columns::<ReminderColumn>(), ["method", "minutes"]);
    }

    #[test]
    fn test_row_put_get_and_project() {
        let mut row = Row::new();
        row.put("id", Value::Integer(3))
            .put("title", Value::Text("Standup".to_string()))
            .put("location", Value::Null)
            .put("unrelated", Value::Integer(9));
        // put replaces in place.
        row.put("title", Value::Text("Standup (moved)".to_string()));
        assert_eq!(row.get("title").and_then(Value::as_text), Some("Standup (moved)"));

        let projected = row.project::<EventColumn>();
        assert_eq!(projected.get("id"), Some(&Value::Integer(3)));
        // Nulls and foreign columns are dropped.
        assert_eq!(projected.get("location"), None);
        assert_eq!(projected.get("unrelated"), None);
    }

    #[test]
    fn test_create_assigns_ids_and_rejects_duplicates() {
        let mut provider = provider();
        let seed = CalendarSeed::new("Personal", Color::new(1, 2, 3));
        let record = provider.create_calendar(&seed).unwrap();
        assert_eq!(record.name, "Personal");
        assert_eq!(record.account, OWN);
        assert!(!record.synced);
        assert_eq!(record.copied_from, None);

        let err = provider.create_calendar(&seed).unwrap_err();
        assert_eq!(err, ProviderError::AlreadyExists("Personal".to_string()));

        let second = provider
            .create_calendar(&CalendarSeed::new("Work", Color::new(0, 0, 0)))
            .unwrap();
        assert_ne!(record.id, second.id);
        assert_eq!(provider.app_calendars().unwrap().len(), 2);
    }

    #[test]
    fn test_update_calendar() {
        let mut provider = provider();
        let record = provider
            .create_calendar(&CalendarSeed::new("Personal", Color::new(1, 2, 3)))
            .unwrap();

        provider
            .update_calendar(
                record.id,
                &CalendarChanges {
                    name: None,
                    color: Some(Color::new(9, 9, 9)),
                    synced: Some(true),
                },
            )
            .unwrap();
        let reloaded = provider.app_calendars().unwrap();
        assert_eq!(reloaded[0].color, Color::new(9, 9, 9));
        assert!(reloaded[0].synced);

        let err = provider
            .update_calendar(999, &CalendarChanges::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_update_rejects_name_collision() {
        let mut provider = provider();
        provider
            .create_calendar(&CalendarSeed::new("A", Color::new(0, 0, 0)))
            .unwrap();
        let b = provider
            .create_calendar(&CalendarSeed::new("B", Color::new(0, 0, 0)))
            .unwrap();
        let err = provider
            .update_calendar(
                b.id,
                &CalendarChanges {
                    name: Some("A".to_string()),
                    ..CalendarChanges::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, ProviderError::AlreadyExists("A".to_string()));
    }

    #[test]
    fn test_delete_cascades_to_events() {
        let mut provider = provider();
        let record = provider
            .create_calendar(&CalendarSeed::new("Personal", Color::new(1, 2, 3)))
            .unwrap();
        let mut event = Row::new();
        event.put("title", Value::Text("Dentist".to_string()));
        let event_id = provider.seed_event(record.id, event);
        let mut reminder = Row::new();
        reminder.put("minutes", Value::Integer(10));
        provider.seed_reminder(event_id, reminder);

        assert!(provider.delete_calendar("Personal"));
        assert!(provider.app_calendars().unwrap().is_empty());
        assert!(provider.events_for(record.id).is_empty());
        assert!(provider.reminders_for(event_id).is_empty());

        assert!(!provider.delete_calendar("Personal"));
    }

    #[test]
    fn test_device_calendars_are_separate() {
        let mut provider = provider();
        provider.seed_device_calendar("Work", "other@device", Color::new(5, 5, 5));
        provider
            .create_calendar(&CalendarSeed::new("Personal", Color::new(1, 2, 3)))
            .unwrap();

        let device = provider.device_calendars().unwrap();
        assert_eq!(device.len(), 1);
        assert_eq!(device[0].name, "Work");
        assert_eq!(device[0].account, "other@device");

        let own = provider.app_calendars().unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].name, "Personal");
    }

    #[test]
    fn test_copy_device_calendar_copies_the_whole_tree() {
        let mut provider = provider();
        let device_id = provider.seed_device_calendar("Work", "other@device", Color::new(5, 5, 5));
        let mut event = Row::new();
        event
            .put("title", Value::Text("Standup".to_string()))
            .put("dtstart", Value::Integer(1_700_000_000))
            .put("secret_column", Value::Text("should not transfer".to_string()));
        let event_id = provider.seed_event(device_id, event);
        let mut reminder = Row::new();
        reminder
            .put("method", Value::Integer(1))
            .put("minutes", Value::Integer(15));
        provider.seed_reminder(event_id, reminder);
        let mut attendee = Row::new();
        attendee.put("email", Value::Text("ana@example.org".to_string()));
        provider.seed_attendee(event_id, attendee);

        let copy = provider
            .copy_device_calendar(device_id, "Work", Color::new(5, 5, 5))
            .unwrap();
        assert_eq!(copy.account, OWN);
        assert_eq!(copy.copied_from, Some(device_id));
        assert!(!copy.synced);

        let copied_events = provider.events_for(copy.id);
        assert_eq!(copied_events.len(), 1);
        assert_eq!(
            copied_events[0].get("title").and_then(Value::as_text),
            Some("Standup")
        );
        // Only projected columns transfer.
        assert_eq!(copied_events[0].get("secret_column"), None);

        let copied_event_id = copied_events[0]
            .get("id")
            .and_then(Value::as_integer)
            .unwrap();
        assert_ne!(copied_event_id, event_id);
        assert_eq!(provider.reminders_for(copied_event_id).len(), 1);
        assert_eq!(provider.attendees_for(copied_event_id).len(), 1);

        // The source is untouched.
        assert_eq!(provider.events_for(device_id).len(), 1);
        assert_eq!(provider.reminders_for(event_id).len(), 1);

        // Copying again under the same name conflicts.
        let err = provider
            .copy_device_calendar(device_id, "Work", Color::new(5, 5, 5))
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
    }
}
