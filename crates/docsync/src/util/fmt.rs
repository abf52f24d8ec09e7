//! Wrapper types that format in a useful way with Debug, Display or
//! Valuable; typically as a human-readable string.
//!
//! The [new type idiom] also keeps byte counts, record counts and rates
//! from being confused at compile time.
//!
//! [new type idiom]: https://doc.rust-lang.org/rust-by-example/generics/new_types.html

use std::{
    fmt::{Debug, Display, Write},
    result::Result as StdResult,
    time::Duration as StdDuration,
};
use valuable::{Fields, NamedField, NamedValues, Structable, StructDef, Valuable, Value, Visit};

/// Stores a number of bytes as a `u64`, formats with `Display` as a human readable string like "12.53 MiB"
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Bytes(pub u64);

/// Records processed per second, formats with `Display` like "1.25 k records/s"
#[derive(Clone, Copy)]
pub struct RecordRate(pub f64);

/// Stores a `std::time::Duration`,
/// but formats with `Debug` or `Display` as a human-readable string like "1h 2m 1s 10ms",
/// and translates with `Valuable` as
///     `{ secs: 3721_u64, nanos: 10_000_000_u32, str: "1h 2m 1s 10ms" }`
#[derive(Clone, Copy)]
pub struct Duration(pub StdDuration);

const MINUTE: StdDuration = StdDuration::from_secs(60);
const HOUR:   StdDuration = StdDuration::from_secs(60 * 60);

impl Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Bytes({num} = {pretty})", num = self.0, pretty = bytes(self.0))
    }
}

impl Display for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&*bytes(self.0))
    }
}

impl Bytes {
    const FIELDS: &'static [NamedField<'static>] = &[
        NamedField::new("int"),
        NamedField::new("str"),
    ];
}

impl Valuable for Bytes {
    fn as_value(&self) -> Value<'_> {
        Value::Structable(self)
    }

    fn visit(&self, visit: &mut dyn Visit) {
        let s = bytes(self.0);
        visit.visit_named_fields(
            &NamedValues::new(
                Self::FIELDS,
                &[Value::U64(self.0),
                  Value::String(&*s)]))
    }
}

impl Structable for Bytes {
    fn definition(&self) -> StructDef<'_> {
        StructDef::new_static("Bytes", Fields::Named(Self::FIELDS))
    }
}

impl serde::Serialize for Bytes {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
        where S: serde::Serializer
    {
        valuable_serde::Serializable::new(self).serialize(serializer)
    }
}

impl RecordRate {
    const FIELDS: &'static [NamedField<'static>] = &[
        NamedField::new("float"),
        NamedField::new("str"),
    ];

    pub fn new(count: u64, duration: StdDuration) -> RecordRate {
        let secs = duration.as_secs_f64();
        let rate = if secs.abs() < f64::EPSILON {
            0.
        } else {
            (count as f64) / secs
        };

        RecordRate(rate)
    }
}

impl Debug for RecordRate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RecordRate({num:.1} = {pretty})", num = self.0, pretty = records_per_second(self.0))
    }
}

impl Display for RecordRate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&*records_per_second(self.0))
    }
}

impl Valuable for RecordRate {
    fn as_value(&self) -> Value<'_> {
        Value::Structable(self)
    }

    fn visit(&self, visit: &mut dyn Visit) {
        let s = records_per_second(self.0);
        visit.visit_named_fields(
            &NamedValues::new(
                Self::FIELDS,
                &[Value::F64(self.0),
                  Value::String(&*s)]))
    }
}

impl Structable for RecordRate {
    fn definition(&self) -> StructDef<'_> {
        StructDef::new_static("RecordRate", Fields::Named(Self::FIELDS))
    }
}

impl serde::Serialize for RecordRate {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
        where S: serde::Serializer
    {
        valuable_serde::Serializable::new(self).serialize(serializer)
    }
}

impl Debug for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let dur: StdDuration = self.0;
        let mut secs = dur.as_secs();
        let mut out = String::new();

        for (unit, suffix) in [(HOUR, 'h'), (MINUTE, 'm')] {
            let unit_secs = unit.as_secs();
            if secs >= unit_secs {
                write!(out, " {n}{suffix}", n = secs / unit_secs)?;
                secs %= unit_secs;
            }
        }

        if secs > 0 {
            write!(out, " {secs}s")?;
        }

        let ms = dur.subsec_millis();
        if ms > 0 || out.is_empty() {
            write!(out, " {ms}ms")?;
        }

        f.pad(out.trim_start())
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Duration {
    const FIELDS: &'static [NamedField<'static>] = &[
        NamedField::new("secs"),
        NamedField::new("nanos"),
        NamedField::new("str"),
    ];
}

impl Valuable for Duration {
    fn as_value(&self) -> Value<'_> {
        Value::Structable(self)
    }

    fn visit(&self, visit: &mut dyn Visit) {
        let s = format!("{:?}", self);
        visit.visit_named_fields(
            &NamedValues::new(
                Self::FIELDS,
                &[Value::U64(self.0.as_secs()),
                  Value::U32(self.0.subsec_nanos()),
                  Value::String(&*s)]))
    }
}

impl Structable for Duration {
    fn definition(&self) -> StructDef<'_> {
        StructDef::new_static("Duration", Fields::Named(Self::FIELDS))
    }
}

impl serde::Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
        where S: serde::Serializer
    {
        valuable_serde::Serializable::new(self).serialize(serializer)
    }
}

pub fn bytes(len: u64) -> String {
    human_format::Formatter::new()
        .with_scales(human_format::Scales::Binary())
        .with_decimals(2)
        .with_units("B")
        .format(len as f64)
}

pub fn records_per_second(rate: f64) -> String {
    human_format::Formatter::new()
        .with_decimals(2)
        .with_units("records/s")
        .format(rate)
}

pub fn chrono_time<Tz: chrono::TimeZone>(dt: chrono::DateTime<Tz>) -> String
    where <Tz as chrono::TimeZone>::Offset: Display
{
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs,
                       true /* use_z */)
      .replace('T', " ")
}
