//! Schema-free records, keyed by their `_id` field.

use anyhow::{bail, Context};
use bson::{Bson, Document};
use crate::Result;
use serde::Serialize;
use std::fmt::{self, Display};
use valuable::Valuable;

/// Name of the identifier field every record must carry.
pub const ID_FIELD: &str = "_id";

/// One document from the input, with a validated `_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Position of this record in the input array, starting at 0.
    index: u64,
    doc: Document,
}

/// An input element that could not become a [`Record`].
#[derive(Clone, Debug, PartialEq, Serialize, Valuable)]
pub struct InvalidRecord {
    pub index: u64,
    pub reason: InvalidRecordReason,
}

#[derive(Clone, Debug, PartialEq, Serialize, Valuable)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum InvalidRecordReason {
    /// The array element was not a JSON object; holds the JSON type name found.
    NotAnObject(String),
    MissingId,
    NullId,
    ArrayId,
    /// The element looked like Extended JSON (e.g. `{"$oid": 5}`) but was malformed.
    ExtendedJson(String),
    /// A top-level field name contains `.` or starts with `$`; holds the name.
    ///
    /// The server reads such names in an update as paths or operators, so the
    /// stored document would not match the record.
    FieldName(String),
}

impl Record {
    /// Convert one element of the input array into a record.
    ///
    /// Values are read as relaxed Extended JSON, so `{"$oid": "..."}` becomes an
    /// `ObjectId` and `{"$date": "..."}` a `DateTime`.
    pub fn from_json(index: u64, value: serde_json::Value) -> std::result::Result<Record, InvalidRecord> {
        let invalid = |reason| InvalidRecord { index, reason };

        if !value.is_object() {
            return Err(invalid(InvalidRecordReason::NotAnObject(json_type_name(&value).to_string())));
        }

        let doc = match Bson::try_from(value) {
            Ok(Bson::Document(doc)) => doc,
            Ok(other) => return Err(invalid(InvalidRecordReason::NotAnObject(
                format!("{:?}", other.element_type())))),
            Err(e) => return Err(invalid(InvalidRecordReason::ExtendedJson(e.to_string()))),
        };

        Self::from_document(index, doc)
    }

    pub fn from_document(index: u64, doc: Document) -> std::result::Result<Record, InvalidRecord> {
        if let Err(reason) = check_id(doc.get(ID_FIELD)) {
            return Err(InvalidRecord { index, reason });
        }

        if let Some(key) = doc.keys().find(|k| k.contains('.') || k.starts_with('$')) {
            return Err(InvalidRecord {
                index,
                reason: InvalidRecordReason::FieldName(key.clone()),
            });
        }

        Ok(Record { index, doc })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn id(&self) -> &Bson {
        // Checked present in `from_document`.
        self.doc.get(ID_FIELD).unwrap_or(&Bson::Null)
    }

    /// All fields of the record, including `_id`.
    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn into_doc(self) -> Document {
        self.doc
    }
}

fn check_id(id: Option<&Bson>) -> std::result::Result<(), InvalidRecordReason> {
    match id {
        None => Err(InvalidRecordReason::MissingId),
        Some(Bson::Null) | Some(Bson::Undefined) => Err(InvalidRecordReason::NullId),
        Some(Bson::Array(_)) => Err(InvalidRecordReason::ArrayId),
        Some(_) => Ok(()),
    }
}

/// Parse an `_id` value typed by a user.
///
/// The input is tried as Extended JSON first (`1`, `"abc"`, `{"$oid": "..."}`);
/// text that is not valid JSON is taken as a plain string key.
pub fn parse_id(s: &str) -> Result<Bson> {
    let id = match serde_json::from_str::<serde_json::Value>(s) {
        Ok(json) => Bson::try_from(json)
                        .with_context(|| format!("while parsing id as Extended JSON id='{s}'"))?,
        Err(_) => Bson::String(s.to_string()),
    };

    if let Err(reason) = check_id(Some(&id)) {
        bail!("Invalid id '{s}': {reason}");
    }

    Ok(id)
}

/// Formats a key as compact relaxed Extended JSON, e.g. `1` or `{"$oid":"64a5..."}`.
pub fn id_to_string(id: &Bson) -> String {
    id.clone().into_relaxed_extjson().to_string()
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl Display for InvalidRecordReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotAnObject(found) => write!(f, "expected a JSON object, found {found}"),
            Self::MissingId => write!(f, "missing `{ID_FIELD}` field"),
            Self::NullId => write!(f, "`{ID_FIELD}` is null"),
            Self::ArrayId => write!(f, "`{ID_FIELD}` must not be an array"),
            Self::ExtendedJson(e) => write!(f, "invalid Extended JSON: {e}"),
            Self::FieldName(name) => write!(f, "field name {name:?} must not contain '.' or start with '$'"),
        }
    }
}

impl Display for InvalidRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "record #{index}: {reason}", index = self.index, reason = self.reason)
    }
}
