//! The keyed store seam between the upserter and its backends.
//!
//! The MongoDB backend lives in the `docsync-store` crate. [`MemoryStore`]
//! here backs dry runs and tests.

use anyhow::format_err;
use bson::{Bson, Document};
use crate::{record::ID_FIELD, Result};
use serde::Serialize;
use std::sync::Mutex;
use valuable::Valuable;

/// What one upsert did to the store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Valuable)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No entry had the key; a new one was created.
    Inserted,
    /// An entry had the key and at least one field changed.
    Updated,
    /// An entry had the key and every field already had the given value.
    Unchanged,
}

/// A persistent collection of documents addressed by `_id`.
#[async_trait::async_trait]
pub trait KeyedStore: Send + Sync {
    /// Atomically merge `fields` into the entry with key `id`, creating it if absent.
    ///
    /// Top-level fields in `fields` overwrite stored values; stored fields absent
    /// from `fields` are kept. An `_id` inside `fields` is ignored in favour of `id`.
    async fn upsert(&self, id: &Bson, fields: &Document) -> Result<UpsertOutcome>;

    /// Fetch the entry with key `id`.
    async fn get(&self, id: &Bson) -> Result<Option<Document>>;

    /// Human readable name of the target, e.g. `test.airlines`.
    fn describe(&self) -> String;
}

/// An in-process [`KeyedStore`]. Entries are kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Create a store already holding `entries`. Each must have an `_id`.
    pub fn with_entries(entries: impl IntoIterator<Item = Document>) -> Result<MemoryStore> {
        let entries = entries.into_iter().collect::<Vec<Document>>();
        if let Some(pos) = entries.iter().position(|e| !e.contains_key(ID_FIELD)) {
            return Err(format_err!("MemoryStore entry at position {pos} has no `{ID_FIELD}`"));
        }

        Ok(MemoryStore {
            entries: Mutex::new(entries),
        })
    }

    /// A copy of every entry, in insertion order.
    pub fn snapshot(&self) -> Result<Vec<Document>> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Document>>> {
        self.entries.lock().map_err(|_| format_err!("MemoryStore mutex poisoned"))
    }
}

/// Key equality as the server applies it: numbers compare by value across
/// `Int32`, `Int64` and `Double`, so `1`, `1_i64` and `1.0` are one key.
fn same_key(stored: Option<&Bson>, id: &Bson) -> bool {
    let Some(stored) = stored else {
        return false;
    };

    match (stored, id) {
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) =>
            as_i64(stored) == as_i64(id),
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_),
         Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) =>
            as_f64(stored) == as_f64(id),
        _ => stored == id,
    }
}

fn as_i64(b: &Bson) -> Option<i64> {
    match b {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn as_f64(b: &Bson) -> Option<f64> {
    match b {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

#[async_trait::async_trait]
impl KeyedStore for MemoryStore {
    async fn upsert(&self, id: &Bson, fields: &Document) -> Result<UpsertOutcome> {
        let mut entries = self.lock()?;

        let existing = entries.iter().position(|e| same_key(e.get(ID_FIELD), id));

        let Some(pos) = existing else {
            let mut entry = Document::new();
            entry.insert(ID_FIELD, id.clone());
            for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
                entry.insert(k.clone(), v.clone());
            }
            entries.push(entry);
            return Ok(UpsertOutcome::Inserted);
        };

        let entry = &mut entries[pos];
        let mut changed = false;
        for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
            if entry.get(k) != Some(v) {
                entry.insert(k.clone(), v.clone());
                changed = true;
            }
        }

        Ok(if changed { UpsertOutcome::Updated } else { UpsertOutcome::Unchanged })
    }

    async fn get(&self, id: &Bson) -> Result<Option<Document>> {
        Ok(self.lock()?
               .iter()
               .find(|e| same_key(e.get(ID_FIELD), id))
               .cloned())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
