// File: src/keyed_list.rs
//
// An insertion-ordered collection of records that carry their own unique
// key. Calendars need to behave like a list (stable display order,
// indexable) and like a map (looked up by name) at the same time, and new
// entries can only be built with context a plain map insert doesn't have
// (fields the calendar store assigns on insert). Hence the split between
// `add`, which takes a fully-formed record, and `edit`, which hands out a
// restricted editor over an existing slot.
//
// Lookups are linear scans over the backing vector; records carry their own
// keys and no side index is kept.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

/// A record whose key is derived from one of its own fields.
///
/// For example, [`CalendarRecord`](crate::calendar::CalendarRecord) uses its
/// **name** as the key in the app's calendar list.
pub trait Keyed {
    type Key: PartialEq + fmt::Debug;

    fn key(&self) -> &Self::Key;
}

/// A record that can be mutated through a restricted editor.
///
/// The editor carries the record's legally-mutable fields and nothing else;
/// in particular it can never touch the key, so editing cannot break the
/// list's unique-key invariant.
pub trait Editable: Keyed {
    type Editor;

    /// Snapshot the mutable fields into an editor.
    fn editor(&self) -> Self::Editor;

    /// Write an editor's fields back into the record.
    fn apply(&mut self, editor: Self::Editor);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyedListError {
    /// An entry with this key is already present.
    DuplicateKey(String),
    /// No entry has this key.
    NotFound(String),
    /// `put` was asked to insert a key it has never seen. A brand-new record
    /// can't be synthesized generically; use `add` with a complete record.
    UnsupportedInsert(String),
}

impl fmt::Display for KeyedListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey(key) => write!(f, "an entry with key {key} already exists"),
            Self::NotFound(key) => write!(f, "no entry with key {key}"),
            Self::UnsupportedInsert(key) => write!(
                f,
                "can't insert new entry {key} through put(); use add() with a fully-formed record"
            ),
        }
    }
}

impl std::error::Error for KeyedListError {}

/// Insertion-ordered list of unique-keyed records.
///
/// Dereferences to a slice for the list side of its personality; the map
/// side is `get`/`add`/`edit`/`remove` and the [`KeysView`]/[`ValuesView`]/
/// [`EntriesView`] projections.
///
/// All operations run synchronously on the caller's thread with no interior
/// locking; a multi-threaded host wraps the whole structure in its own
/// synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedList<V> {
    records: Vec<V>,
}

impl<V> Default for KeyedList<V> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<V> KeyedList<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl<V> Deref for KeyedList<V> {
    type Target = [V];

    fn deref(&self) -> &[V] {
        &self.records
    }
}

impl<'a, V> IntoIterator for &'a KeyedList<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl<V: Keyed> KeyedList<V> {
    /// Index of the entry with this key, if any. Linear scan.
    pub fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.records.iter().position(|r| r.key().borrow() == key)
    }

    /// The entry with this key. Linear scan; at most one entry can match.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).map(|i| &self.records[i])
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).is_some()
    }

    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.records.contains(value)
    }

    /// Append a fully-formed record to the end of the list.
    ///
    /// Fails with [`KeyedListError::DuplicateKey`] if an entry with the same
    /// key already exists; the list is left unchanged in that case.
    pub fn add(&mut self, record: V) -> Result<(), KeyedListError> {
        if self.records.iter().any(|r| r.key() == record.key()) {
            return Err(KeyedListError::DuplicateKey(format!("{:?}", record.key())));
        }
        self.records.push(record);
        Ok(())
    }

    /// Remove the entry with this key, preserving the relative order of the
    /// remaining entries. Returns the removed record, or `None` (no-op) if
    /// the key is absent.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let i = self.position(key)?;
        Some(self.records.remove(i))
    }

    /// Replace the record stored under `key` with a fully-formed `record`,
    /// keeping its position. The replacement may carry a different key as
    /// long as it doesn't collide with another entry.
    pub fn replace<Q>(&mut self, key: &Q, record: V) -> Result<V, KeyedListError>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + fmt::Debug + ?Sized,
    {
        let Some(i) = self.position(key) else {
            return Err(KeyedListError::NotFound(format!("{key:?}")));
        };
        if let Some(j) = self.records.iter().position(|r| r.key() == record.key())
            && j != i
        {
            return Err(KeyedListError::DuplicateKey(format!("{:?}", record.key())));
        }
        Ok(std::mem::replace(&mut self.records[i], record))
    }

    pub fn keys(&self) -> impl Iterator<Item = &V::Key> {
        self.records.iter().map(|r| r.key())
    }

    pub fn values(&self) -> std::slice::Iter<'_, V> {
        self.records.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&V::Key, &V)> {
        self.records.iter().map(|r| (r.key(), r))
    }

    /// Mutable key projection backed by this list.
    pub fn keys_view(&mut self) -> KeysView<'_, V> {
        KeysView { list: self }
    }

    /// Mutable value projection backed by this list.
    pub fn values_view(&mut self) -> ValuesView<'_, V> {
        ValuesView { list: self }
    }

    /// Mutable entry projection backed by this list.
    pub fn entries_view(&mut self) -> EntriesView<'_, V> {
        EntriesView { list: self }
    }
}

impl<V: Editable> KeyedList<V> {
    /// Change some data about the entry identified by `key`, in place.
    ///
    /// The closure receives an editor over the entry's mutable fields; the
    /// editor is written back when the closure returns and discarded. The
    /// entry keeps its position. Fails with [`KeyedListError::NotFound`] if
    /// no entry has this key, leaving the list unchanged.
    pub fn edit<Q, F>(&mut self, key: &Q, f: F) -> Result<(), KeyedListError>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + fmt::Debug + ?Sized,
        F: FnOnce(&mut V::Editor),
    {
        let Some(i) = self.position(key) else {
            return Err(KeyedListError::NotFound(format!("{key:?}")));
        };
        let mut editor = self.records[i].editor();
        f(&mut editor);
        self.records[i].apply(editor);
        Ok(())
    }

    /// Map-insert compatibility shim. Copies every editor-visible field of
    /// `value` into the existing entry and returns the entry's previous
    /// state.
    ///
    /// Inserting an unseen key this way is not possible (the list can't
    /// synthesize a record) and fails with
    /// [`KeyedListError::UnsupportedInsert`]; use [`KeyedList::add`].
    pub fn put<Q>(&mut self, key: &Q, value: V) -> Result<V, KeyedListError>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + fmt::Debug + ?Sized,
        V: Clone,
    {
        let Some(i) = self.position(key) else {
            return Err(KeyedListError::UnsupportedInsert(format!("{key:?}")));
        };
        let previous = self.records[i].clone();
        self.records[i].apply(value.editor());
        Ok(previous)
    }
}

// -- Map projections
//
// Thin wrappers holding the owning list by reference, so mutation through
// any view is visible through all others and through the list itself.

pub struct KeysView<'a, V> {
    list: &'a mut KeyedList<V>,
}

impl<V: Keyed> KeysView<'_, V> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &V::Key> {
        self.list.keys()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.list.contains_key(key)
    }

    /// Remove the entry with this key. Returns whether anything was removed.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.list.remove(key).is_some()
    }

    /// Keep only the entries whose key satisfies `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&V::Key) -> bool,
    {
        self.list.records.retain(|r| keep(r.key()));
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}

pub struct ValuesView<'a, V> {
    list: &'a mut KeyedList<V>,
}

impl<V: Keyed> ValuesView<'_, V> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.list.values()
    }

    pub fn contains(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.list.contains_value(value)
    }

    /// Remove the entry carrying this value's key. Returns whether anything
    /// was removed.
    pub fn remove(&mut self, value: &V) -> bool {
        self.list.remove(value.key()).is_some()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}

pub struct EntriesView<'a, V> {
    list: &'a mut KeyedList<V>,
}

impl<V: Keyed> EntriesView<'_, V> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&V::Key, &V)> {
        self.list.entries()
    }

    /// Remove the entry with this key. Returns whether anything was removed.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.list.remove(key).is_some()
    }

    /// Entry-level `put`: copy `value`'s editor-visible fields into the
    /// entry stored under `key` and return its previous state.
    pub fn set<Q>(&mut self, key: &Q, value: V) -> Result<V, KeyedListError>
    where
        V::Key: Borrow<Q>,
        Q: PartialEq + fmt::Debug + ?Sized,
        V: Editable + Clone,
    {
        self.list.put(key, value)
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}
