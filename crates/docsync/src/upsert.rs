//! Apply a [`RecordSet`] to a [`KeyedStore`], one record at a time in input order.

use anyhow::{format_err, Context};
use crate::{
    record::{id_to_string, InvalidRecord},
    source::RecordSet,
    store::{KeyedStore, UpsertOutcome},
    Error,
    Result,
    util::fmt::{self, Duration, RecordRate},
};
use serde::Serialize;
use std::{
    fmt::Write,
    time::{Duration as StdDuration, Instant},
};
use valuable::Valuable;

/// What to do with records that are invalid or that the store rejects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Valuable, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Validate every record before writing anything, and stop at the first store error.
    #[default]
    Abort,

    /// Skip invalid records, record store errors, and carry on with the rest.
    Continue,
}

#[derive(Clone, Debug)]
pub struct UpsertOptions {
    pub failure_policy: FailurePolicy,

    /// How often to log a progress event during a long batch.
    pub progress_interval: StdDuration,
}

#[derive(Clone, Debug, Serialize, Valuable)]
pub struct RecordFailure {
    /// Position of the record in the input array.
    pub index: u64,

    /// The record's `_id` as Extended JSON, if it had a usable one.
    pub id: Option<String>,

    pub error: String,
}

#[derive(Clone, Debug, Serialize, Valuable)]
pub struct UpsertReport {
    pub store: String,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,

    /// Valid records the store failed to write.
    pub failed: Vec<RecordFailure>,

    /// Invalid records that were never sent to the store.
    pub skipped: Vec<RecordFailure>,

    pub duration: Duration,
    pub rate: RecordRate,
}

const PROGRESS_INTERVAL_DEFAULT: StdDuration = StdDuration::from_secs(2);

/// Invalid records listed individually in an abort error; the rest are counted.
const MAX_LISTED_INVALID: usize = 10;

impl Default for UpsertOptions {
    fn default() -> UpsertOptions {
        UpsertOptions {
            failure_policy: FailurePolicy::default(),
            progress_interval: PROGRESS_INTERVAL_DEFAULT,
        }
    }
}

impl UpsertReport {
    fn new(store: String) -> UpsertReport {
        UpsertReport {
            store,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failed: Vec::new(),
            skipped: Vec::new(),
            duration: Duration(StdDuration::ZERO),
            rate: RecordRate(0.),
        }
    }

    /// Count of records sent to the store, whether or not the write succeeded.
    pub fn records_processed(&self) -> u64 {
        self.records_written() + self.failed.len() as u64
    }

    /// Count of records the store accepted.
    pub fn records_written(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    /// True when every input element was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    fn finish(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        self.duration = Duration(elapsed);
        self.rate = RecordRate::new(self.records_processed(), elapsed);
    }
}

impl From<&InvalidRecord> for RecordFailure {
    fn from(invalid: &InvalidRecord) -> RecordFailure {
        RecordFailure {
            index: invalid.index,
            id: None,
            error: invalid.reason.to_string(),
        }
    }
}

/// Upsert every record in `records` into `store`, sequentially and in input order.
///
/// Each record is one atomic merge keyed by its `_id`, so running the same
/// batch again is safe. With [`FailurePolicy::Abort`] any invalid record fails
/// the whole batch before the first write, and the first store error ends it.
/// With [`FailurePolicy::Continue`] both are collected in the returned report.
pub async fn upsert_all<S>(records: &RecordSet, store: &S, opts: &UpsertOptions
) -> Result<UpsertReport>
    where S: KeyedStore + ?Sized
{
    let start = Instant::now();

    if opts.failure_policy == FailurePolicy::Abort && !records.invalid().is_empty() {
        return Err(invalid_records_error(records.invalid()));
    }

    let mut report = UpsertReport::new(store.describe());
    report.skipped = records.invalid().iter().map(RecordFailure::from).collect();

    for invalid in records.invalid() {
        tracing::warn!(index = invalid.index, reason = %invalid.reason, "Skipping invalid record");
    }

    let records_total = records.len() as u64;

    tracing::info!(store = %report.store,
                   records_total,
                   skipped = report.skipped.len(),
                   failure_policy = opts.failure_policy.as_value(),
                   "Starting upsert");

    let mut next_progress = start + opts.progress_interval;

    for record in records.records() {
        let res = store.upsert(record.id(), record.doc()).await
            .with_context(|| format!("while upserting record #{index} id={id}",
                                     index = record.index(),
                                     id = id_to_string(record.id())));

        match res {
            Ok(outcome) => {
                tracing::debug!(index = record.index(),
                                id = %id_to_string(record.id()),
                                outcome = outcome.as_value(),
                                "Record upserted");
                report.count(outcome);
            },
            Err(e) if opts.failure_policy == FailurePolicy::Continue => {
                tracing::warn!(err = %format!("{e:#}"), "Record upsert failed, continuing");
                report.failed.push(RecordFailure {
                    index: record.index(),
                    id: Some(id_to_string(record.id())),
                    error: format!("{e:#}"),
                });
            },
            Err(e) => {
                report.finish(start);
                tracing::info!(report = report.as_value(), "Upsert aborted");
                return Err(e);
            },
        }

        let now = Instant::now();
        if now >= next_progress {
            next_progress = now + opts.progress_interval;
            log_progress(start, report.records_processed(), records_total);
        }
    }

    report.finish(start);

    tracing::info!(report = report.as_value(), "Upsert done");

    Ok(report)
}

fn invalid_records_error(invalid: &[InvalidRecord]) -> Error {
    let mut msg = format!("{n} invalid record(s) in the input, so no documents were written. \
                           Fix the input or use the `continue` failure policy to skip them.",
                          n = invalid.len());

    for record in invalid.iter().take(MAX_LISTED_INVALID) {
        // Writing to a String cannot fail.
        let _ = write!(msg, "\n-   {record}");
    }

    if invalid.len() > MAX_LISTED_INVALID {
        let _ = write!(msg, "\n-   ... and {more} more", more = invalid.len() - MAX_LISTED_INVALID);
    }

    format_err!(msg)
}

fn log_progress(start: Instant, done: u64, total: u64) {
    let elapsed = Duration(start.elapsed());
    let percent_complete = ((done as f64) / (total as f64)) * 100.0;

    let remaining: Option<Duration> = match done {
        0 => None,
        done => Some(Duration(elapsed.0.mul_f64(((total - done) as f64) / (done as f64)))),
    };

    let eta: Option<String> = remaining
        .and_then(|dur| chrono::Duration::from_std(dur.0).ok())
        .map(|dur| fmt::chrono_time(chrono::Local::now() + dur));

    tracing::info!(done,
                   total,
                   percent_complete = %format!("{percent_complete:3.1}%"),
                   elapsed = elapsed.as_value(),
                   remaining = remaining.as_value(),
                   eta,
                   "Upsert progress");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bson::{doc, Bson, Document};
    use crate::store::MemoryStore;

    fn record_set(json: &str) -> RecordSet {
        RecordSet::from_json_slice(json.as_bytes(), None).expect("parse record set")
    }

    fn sorted(mut docs: Vec<Document>) -> Vec<Document> {
        docs.sort_by_key(|d| id_to_string(d.get("_id").expect("_id")));
        docs
    }

    /// Fails every upsert for one key, delegates the rest.
    struct RejectingStore {
        inner: MemoryStore,
        reject_id: Bson,
    }

    #[async_trait]
    impl KeyedStore for RejectingStore {
        async fn upsert(&self, id: &Bson, fields: &Document) -> Result<UpsertOutcome> {
            if id == &self.reject_id {
                anyhow::bail!("write rejected by test store");
            }
            self.inner.upsert(id, fields).await
        }

        async fn get(&self, id: &Bson) -> Result<Option<Document>> {
            self.inner.get(id).await
        }

        fn describe(&self) -> String {
            "rejecting".to_string()
        }
    }

    #[tokio::test]
    async fn insert_into_empty_store() {
        let store = MemoryStore::new();
        let records = record_set(r#"[{"_id": 1, "name": "Fido", "species": "dog"}]"#);

        let report = upsert_all(&records, &store, &UpsertOptions::default()).await
                         .expect("upsert_all");

        assert_eq!(report.inserted, 1);
        assert_eq!(report.records_processed(), 1);
        assert!(report.is_complete());
        assert_eq!(store.snapshot().expect("snapshot"),
                   vec![doc! { "_id": 1, "name": "Fido", "species": "dog" }]);
    }

    #[tokio::test]
    async fn merge_keeps_other_fields() {
        let store = MemoryStore::with_entries([doc! { "_id": 1, "name": "Fido", "species": "dog" }])
                                .expect("store");
        let records = record_set(r#"[{"_id": 1, "species": "cat"}]"#);

        let report = upsert_all(&records, &store, &UpsertOptions::default()).await
                         .expect("upsert_all");

        assert_eq!(report.updated, 1);
        assert_eq!(store.snapshot().expect("snapshot"),
                   vec![doc! { "_id": 1, "name": "Fido", "species": "cat" }]);
    }

    #[tokio::test]
    async fn empty_input_leaves_store_unchanged() {
        let before = vec![doc! { "_id": "x", "n": 1 }];
        let store = MemoryStore::with_entries(before.clone()).expect("store");

        let report = upsert_all(&record_set("[]"), &store, &UpsertOptions::default()).await
                         .expect("upsert_all");

        assert_eq!(report.records_processed(), 0);
        assert!(report.is_complete());
        assert_eq!(store.snapshot().expect("snapshot"), before);
    }

    #[tokio::test]
    async fn missing_id_aborts_before_any_write() {
        let store = MemoryStore::new();
        let records = record_set(r#"[{"_id": 1, "a": 1}, {"a": 2}, {"_id": 3, "a": 3}]"#);

        let err = upsert_all(&records, &store, &UpsertOptions::default()).await
                      .expect_err("invalid record aborts");

        assert!(err.to_string().contains("record #1: missing `_id` field"), "err = {err}");
        assert_eq!(store.len().expect("len"), 0);
    }

    #[tokio::test]
    async fn missing_id_skipped_with_continue() {
        let store = MemoryStore::new();
        let records = record_set(r#"[{"_id": 1, "a": 1}, {"a": 2}, {"_id": null}, {"_id": 3}]"#);
        let opts = UpsertOptions {
            failure_policy: FailurePolicy::Continue,
            ..UpsertOptions::default()
        };

        let report = upsert_all(&records, &store, &opts).await.expect("upsert_all");

        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(report.skipped[1].index, 2);
        assert!(!report.is_complete());

        let stored = store.snapshot().expect("snapshot");
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|d| !matches!(d.get("_id"), None | Some(Bson::Null))));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = MemoryStore::with_entries([doc! { "_id": 9, "keep": true }]).expect("store");
        let records = record_set(r#"[
            {"_id": 1, "name": "Fido"},
            {"_id": 2, "name": "Tom", "tags": ["a", "b"]},
            {"_id": 9, "extra": {"nested": 1}}
        ]"#);

        let first = upsert_all(&records, &store, &UpsertOptions::default()).await.expect("first");
        let after_first = store.snapshot().expect("snapshot");

        let second = upsert_all(&records, &store, &UpsertOptions::default()).await.expect("second");
        let after_second = store.snapshot().expect("snapshot");

        assert_eq!(after_first, after_second);
        assert_eq!((first.inserted, first.updated), (2, 1));
        assert_eq!((second.inserted, second.updated, second.unchanged), (0, 0, 3));
        assert_eq!(store.get(&Bson::Int32(9)).await.expect("get"),
                   Some(doc! { "_id": 9, "keep": true, "extra": { "nested": 1 } }));
    }

    #[tokio::test]
    async fn order_of_distinct_keys_does_not_matter() {
        let forward = record_set(r#"[{"_id": 1, "a": 1}, {"_id": "two", "a": 2}, {"_id": 3.5}]"#);
        let reverse = record_set(r#"[{"_id": 3.5}, {"_id": "two", "a": 2}, {"_id": 1, "a": 1}]"#);

        let store_fwd = MemoryStore::with_entries([doc! { "_id": 1, "b": 0 }]).expect("store");
        let store_rev = MemoryStore::with_entries([doc! { "_id": 1, "b": 0 }]).expect("store");

        upsert_all(&forward, &store_fwd, &UpsertOptions::default()).await.expect("forward");
        upsert_all(&reverse, &store_rev, &UpsertOptions::default()).await.expect("reverse");

        assert_eq!(sorted(store_fwd.snapshot().expect("snapshot")),
                   sorted(store_rev.snapshot().expect("snapshot")));
    }

    #[tokio::test]
    async fn integer_and_double_keys_are_one_entry() {
        let store = MemoryStore::new();
        let records = record_set(r#"[{"_id": 1}, {"_id": 1.0, "a": 1}]"#);

        let report = upsert_all(&records, &store, &UpsertOptions::default()).await
                         .expect("upsert_all");

        assert_eq!((report.inserted, report.updated), (1, 1));
        assert_eq!(store.snapshot().expect("snapshot"), vec![doc! { "_id": 1, "a": 1 }]);
    }

    #[tokio::test]
    async fn store_error_aborts_remaining_batch() {
        let store = RejectingStore { inner: MemoryStore::new(), reject_id: Bson::Int32(2) };
        let records = record_set(r#"[{"_id": 1}, {"_id": 2}, {"_id": 3}]"#);

        let err = upsert_all(&records, &store, &UpsertOptions::default()).await
                      .expect_err("store error aborts");

        assert!(format!("{err:#}").contains("while upserting record #1 id=2"), "err = {err:#}");
        assert_eq!(store.inner.snapshot().expect("snapshot"), vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn store_error_collected_with_continue() {
        let store = RejectingStore { inner: MemoryStore::new(), reject_id: Bson::Int32(2) };
        let records = record_set(r#"[{"_id": 1}, {"_id": 2}, {"_id": 3}]"#);
        let opts = UpsertOptions {
            failure_policy: FailurePolicy::Continue,
            ..UpsertOptions::default()
        };

        let report = upsert_all(&records, &store, &opts).await.expect("upsert_all");

        assert_eq!(report.inserted, 2);
        assert_eq!(report.records_processed(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id.as_deref(), Some("2"));
        assert!(report.failed[0].error.contains("write rejected by test store"));
        assert_eq!(report.store, "rejecting");
    }

    #[test]
    fn invalid_records_error_truncates_list() {
        let json = format!("[{}]", vec!["{}"; 12].join(","));
        let records = record_set(&json);

        let msg = invalid_records_error(records.invalid()).to_string();

        assert!(msg.starts_with("12 invalid record(s)"), "msg = {msg}");
        assert!(msg.contains("record #9:"));
        assert!(!msg.contains("record #10:"));
        assert!(msg.contains("... and 2 more"));
    }
}
