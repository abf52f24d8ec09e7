//! Validated names for the target database and collection.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{
    fmt::{self, Display},
    result::Result as StdResult,
    str::FromStr,
};
use valuable::Valuable;

/// A MongoDB database name.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Valuable)]
#[serde(transparent)]
pub struct DatabaseName(pub String);

/// A MongoDB collection name.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Valuable)]
#[serde(transparent)]
pub struct CollectionName(pub String);

/// Server limit on database name length in bytes.
const DATABASE_NAME_MAX_LEN: usize = 63;

static DATABASE_NAME_INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\. "$\x00]"#).expect("regex to compile"));

impl Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&*self.0)
    }
}

impl Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&*self.0)
    }
}

impl FromStr for DatabaseName {
    type Err = clap::Error;

    fn from_str(s: &str) -> StdResult<DatabaseName, clap::Error> {
        if s.is_empty() {
            return Err(invalid_value("The database name must not be empty."));
        }

        if s.len() > DATABASE_NAME_MAX_LEN {
            return Err(invalid_value(format!(
                "The database name was too long max_len={DATABASE_NAME_MAX_LEN} len={len}",
                len = s.len())));
        }

        if let Some(m) = DATABASE_NAME_INVALID_CHARS.find(s) {
            return Err(invalid_value(format!(
                "The database name contains the invalid character {c:?}. \
                 Database names must not contain any of: / \\ . space \" $ NUL",
                c = m.as_str())));
        }

        Ok(DatabaseName(s.to_string()))
    }
}

impl FromStr for CollectionName {
    type Err = clap::Error;

    fn from_str(s: &str) -> StdResult<CollectionName, clap::Error> {
        if s.is_empty() {
            return Err(invalid_value("The collection name must not be empty."));
        }

        if s.contains('$') || s.contains('\0') {
            return Err(invalid_value(
                "The collection name must not contain '$' or the NUL character."));
        }

        if s.starts_with("system.") {
            return Err(invalid_value(
                "The collection name must not start with the reserved prefix 'system.'"));
        }

        Ok(CollectionName(s.to_string()))
    }
}

fn invalid_value(msg: impl Display) -> clap::Error {
    clap::error::Error::raw(clap::error::ErrorKind::ValueValidation, msg)
}
