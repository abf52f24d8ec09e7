//! Read records from a local JSON file.

use anyhow::{bail, Context};
use crate::{
    record::{InvalidRecord, Record},
    Result,
    util::fmt::Bytes,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::Level;
use valuable::Valuable;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Clone, Debug, Serialize, Valuable)]
pub struct FileSpec {
    pub path: PathBuf,

    /// Maximum count of array elements to read. No limit if `None`.
    pub limit: Option<u64>,
}

/// The records loaded from one input file, in file order.
///
/// Elements that failed validation are kept separately in `invalid()` so the
/// caller can decide whether they abort the run.
#[derive(Clone, Debug)]
pub struct RecordSet {
    file_len: Bytes,
    elements_total: u64,
    records: Vec<Record>,
    invalid: Vec<InvalidRecord>,
}

/// Summary of a loaded file, suitable for logging or printing as JSON.
#[derive(Clone, Debug, Serialize, Valuable)]
pub struct SourceSummary {
    pub file: FileSpec,
    pub file_len: Bytes,
    pub elements_total: u64,
    pub records_valid: u64,
    pub invalid: Vec<InvalidRecord>,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>) -> FileSpec {
        FileSpec {
            path: path.into(),
            limit: None,
        }
    }

    pub fn path(&self) -> &Path {
        &*self.path
    }

    #[tracing::instrument(level = "debug", name = "FileSpec::load()", skip_all,
                          fields(path = %self.path.display(), limit = ?self.limit))]
    pub fn load(&self) -> Result<RecordSet> {
        let bytes = std::fs::read(&*self.path)
            .with_context(|| format!("while reading input file path='{path}'",
                                     path = self.path.display()))?;

        let set = RecordSet::from_json_slice(&*bytes, self.limit)
            .with_context(|| format!("while parsing input file path='{path}'",
                                     path = self.path.display()))?;

        tracing::debug!(file_len = set.file_len.as_value(),
                        elements_total = set.elements_total,
                        records_valid = set.records.len(),
                        records_invalid = set.invalid.len(),
                        "Input file loaded");

        Ok(set)
    }
}

impl RecordSet {
    /// Parse a JSON document whose top-level value is an array of objects.
    pub fn from_json_slice(bytes: &[u8], limit: Option<u64>) -> Result<RecordSet> {
        let file_len = Bytes(u64::try_from(bytes.len())?);
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let serde_json::Value::Array(elements) = value else {
            bail!("Expected the top-level JSON value to be an array of objects");
        };

        let take = match limit {
            Some(limit) => usize::try_from(limit)?,
            None => usize::MAX,
        };

        let mut records = Vec::with_capacity(elements.len().min(take));
        let mut invalid = Vec::new();
        let mut elements_total: u64 = 0;

        for (index, element) in elements.into_iter().take(take).enumerate() {
            elements_total += 1;
            match Record::from_json(u64::try_from(index)?, element) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::debug!(invalid = e.as_value(), "Invalid record in input");
                    invalid.push(e);
                }
            }
        }

        if tracing::enabled!(Level::TRACE) {
            tracing::trace!(ids = ?records.iter()
                                          .map(|r| crate::record::id_to_string(r.id()))
                                          .collect::<Vec<String>>(),
                            "Record ids loaded");
        }

        Ok(RecordSet {
            file_len,
            elements_total,
            records,
            invalid,
        })
    }

    pub fn records(&self) -> &[Record] {
        &*self.records
    }

    pub fn invalid(&self) -> &[InvalidRecord] {
        &*self.invalid
    }

    /// Count of valid records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of array elements read, valid or not.
    pub fn elements_total(&self) -> u64 {
        self.elements_total
    }

    pub fn file_len(&self) -> Bytes {
        self.file_len
    }

    pub fn summary(&self, file: &FileSpec) -> SourceSummary {
        SourceSummary {
            file: file.clone(),
            file_len: self.file_len,
            elements_total: self.elements_total,
            records_valid: self.records.len() as u64,
            invalid: self.invalid.clone(),
        }
    }
}
