//! Typed attribute values and literal coercion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Integer,
    Boolean,
    Bytes,
    Timestamp,
    Certificate,
    Event,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Bytes => "bytes",
            Self::Timestamp => "timestamp",
            Self::Certificate => "certificate",
            Self::Event => "event",
        };
        f.write_str(name)
    }
}

/// A value stored in one attribute version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// PEM-encoded certificate text.
    Certificate(String),
    Event(Box<Event>),
}

impl AttributeValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Integer(_) => ValueKind::Integer,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Certificate(_) => ValueKind::Certificate,
            Self::Event(_) => ValueKind::Event,
        }
    }

    /// Truthiness used by `has` predicates and comparison filters.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::String(s) | Self::Certificate(s) => !s.is_empty(),
            Self::Integer(i) => *i != 0,
            Self::Boolean(b) => *b,
            Self::Bytes(b) => !b.is_empty(),
            Self::Timestamp(t) => t.timestamp_micros() != 0,
            Self::Event(_) => true,
        }
    }

    /// Text form used for regex matching.
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) | Self::Certificate(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Timestamp(t) => format_timestamp(t),
            Self::Event(e) => format_timestamp(&e.timestamp),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Certificate(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Event(e) => Some(e.timestamp),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Order this value against a query literal, coercing the literal to
    /// this value's type. `None` means the two are not comparable.
    pub fn compare_literal(&self, literal: &Literal) -> Option<Ordering> {
        match self {
            Self::String(s) | Self::Certificate(s) => Some(s.as_str().cmp(literal.raw())),
            Self::Integer(i) => literal.integer().map(|l| i.cmp(&l)),
            Self::Boolean(b) => literal.boolean().map(|l| b.cmp(&l)),
            Self::Bytes(b) => Some(b.as_slice().cmp(literal.raw().as_bytes())),
            Self::Timestamp(t) => compare_time(t, literal),
            Self::Event(e) => compare_time(&e.timestamp, literal),
        }
    }
}

fn compare_time(t: &DateTime<Utc>, literal: &Literal) -> Option<Ordering> {
    if let Some(lit) = literal.timestamp() {
        return Some(t.cmp(&lit));
    }
    literal.integer().map(|micros| t.timestamp_micros().cmp(&micros))
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Event> for AttributeValue {
    fn from(value: Event) -> Self {
        Self::Event(Box::new(value))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A structured record stored in a time series.
///
/// Fields are addressed by dotted paths (`stat.st_mtime`); queries may
/// prefix them with `event.`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, AttributeValue>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Event at `micros` microseconds since the epoch.
    pub fn at_micros(micros: i64) -> Self {
        Self::new(Utc.timestamp_nanos(micros.saturating_mul(1_000)))
    }

    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    /// Look up `timestamp` or a field path, with or without the `event.` prefix.
    pub fn field(&self, path: &str) -> Option<AttributeValue> {
        let path = path.strip_prefix("event.").unwrap_or(path);
        if path == "timestamp" {
            return Some(AttributeValue::Timestamp(self.timestamp));
        }
        self.fields.get(path).cloned()
    }
}

// ── Literals ─────────────────────────────────────────────────────────

/// A query operand, pre-parsed into every type it could be coerced to.
#[derive(Clone, Debug, PartialEq)]
pub struct Literal {
    raw: String,
    integer: Option<i64>,
    boolean: Option<bool>,
    timestamp: Option<DateTime<Utc>>,
}

impl Literal {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let integer = raw.parse::<i64>().ok();
        let boolean = match raw.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        };
        let timestamp = parse_time_literal(&raw);
        Self {
            raw,
            integer,
            boolean,
            timestamp,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn integer(&self) -> Option<i64> {
        self.integer
    }

    pub fn boolean(&self) -> Option<bool> {
        self.boolean
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

/// Dates are midnight UTC; full timestamps may be RFC 3339 or `YYYY-MM-DD HH:MM:SS`.
fn parse_time_literal(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    for format in ["%Y/%m/%d", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, format) {
            return d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!AttributeValue::from("").is_truthy());
        assert!(AttributeValue::from("x").is_truthy());
        assert!(!AttributeValue::Integer(0).is_truthy());
        assert!(AttributeValue::Boolean(true).is_truthy());
        assert!(!AttributeValue::Bytes(vec![]).is_truthy());
    }

    #[test]
    fn test_literal_parsing() {
        let lit = Literal::parse("2000");
        assert_eq!(lit.integer(), Some(2000));
        assert!(lit.timestamp().is_none());

        let date = Literal::parse("2011/11/18");
        assert_eq!(
            date.timestamp(),
            Some(Utc.with_ymd_and_hms(2011, 11, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Literal::parse("2011-11-18 10:00:00").timestamp(),
            Some(Utc.with_ymd_and_hms(2011, 11, 18, 10, 0, 0).unwrap())
        );
        assert_eq!(Literal::parse("TRUE").boolean(), Some(true));
    }

    #[test]
    fn test_compare_timestamp_against_date_and_micros() {
        let t = AttributeValue::Timestamp(Utc.with_ymd_and_hms(2011, 11, 18, 16, 0, 0).unwrap());
        assert_eq!(
            t.compare_literal(&Literal::parse("2011/11/18")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            t.compare_literal(&Literal::parse("2011/11/19")),
            Some(Ordering::Less)
        );
        assert_eq!(
            t.compare_literal(&Literal::parse("2000")),
            Some(Ordering::Greater)
        );
        assert_eq!(t.compare_literal(&Literal::parse("soon")), None);
    }

    #[test]
    fn test_compare_integer_needs_numeric_literal() {
        let v = AttributeValue::Integer(10);
        assert_eq!(v.compare_literal(&Literal::parse("9")), Some(Ordering::Greater));
        assert_eq!(v.compare_literal(&Literal::parse("ten")), None);
    }

    #[test]
    fn test_event_field_lookup() {
        let event = Event::at_micros(1_321_633_293_629_468)
            .with_field("stat.st_mtime", AttributeValue::Integer(5))
            .with_field("stat.pathspec.path", "Fri Nov 18");
        assert_eq!(event.field("event.stat.st_mtime"), Some(AttributeValue::Integer(5)));
        assert_eq!(
            event.field("timestamp").and_then(|v| v.as_timestamp()),
            Some(event.timestamp)
        );
        assert_eq!(event.timestamp.timestamp_micros(), 1_321_633_293_629_468);
        assert!(event.field("missing").is_none());
    }

    #[test]
    fn test_value_serde_tagging() {
        let json = serde_json::to_string(&AttributeValue::Integer(3)).unwrap();
        assert_eq!(json, r#"{"kind":"integer","value":3}"#);
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttributeValue::Integer(3));
    }
}
