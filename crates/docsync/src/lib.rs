//! Load schema-free JSON documents from a local file and upsert them by `_id`
//! into a keyed document store.

// Sub-modules are in alphabetical order.
pub mod names;
pub mod record;
pub mod source;
pub mod store;
pub mod upsert;
pub mod util;

pub use names::{CollectionName, DatabaseName};
pub use record::{InvalidRecord, InvalidRecordReason, Record, ID_FIELD};
pub use source::{FileSpec, RecordSet};
pub use store::{KeyedStore, MemoryStore, UpsertOutcome};
pub use upsert::{upsert_all, FailurePolicy, RecordFailure, UpsertOptions, UpsertReport};

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
