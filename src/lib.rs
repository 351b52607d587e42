// Crate root library declaration and module exports.
pub mod calendar;
pub mod color;
pub mod config;
pub mod keyed_list;
pub mod paths;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod syncdir;

pub use calendar::{CalendarEditor, CalendarRecord, CalendarSeed, DeviceCalendar};
pub use color::{Color, DEFAULT_CALENDAR_COLOR};
pub use config::Preferences;
pub use keyed_list::{Editable, Keyed, KeyedList, KeyedListError};
pub use provider::{CalendarChanges, CalendarProvider, MemoryProvider, ProviderError};
pub use registry::{CalendarRegistry, ConflictChoice};
pub use storage::AppStorage;
pub use syncdir::{ImportOutcome, SyncDir};
