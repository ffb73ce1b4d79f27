//! Schemaless line protocol.
//!
//! A line carries one measurement point:
//!
//! ```text
//! <measurement>[,<tag>=<value>]* <field>=<value>[,<field>=<value>]* [<timestamp>]
//! ```
//!
//! Values carry explicit type suffixes so the store can rebuild exact types
//! without a schema: `3i64`, `1.5f64`, `L"text"`, `true`/`false`.

mod encode;
mod parse;
mod template;

pub use encode::encode;
pub use parse::decode;
pub use template::{placeholders, replace_placeholders};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tdengine_connect_core::ConnectorError;

/// Unit of an integer timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "us")]
    Micros,
    #[serde(rename = "ns")]
    Nanos,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Millis => "ms",
            Precision::Micros => "us",
            Precision::Nanos => "ns",
        }
    }

    /// Number of units per millisecond
    pub fn per_milli(&self) -> i64 {
        match self {
            Precision::Millis => 1,
            Precision::Micros => 1_000,
            Precision::Nanos => 1_000_000,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" => Ok(Precision::Millis),
            "us" | "µs" => Ok(Precision::Micros),
            "ns" => Ok(Precision::Nanos),
            other => Err(ConnectorError::config(format!(
                "unsupported timestamp precision '{}', expected ms, us or ns",
                other
            ))),
        }
    }
}

/// Schemaless sub-protocol accepted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Line,
    Telnet,
    Json,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Line => "line",
            Protocol::Telnet => "telnet",
            Protocol::Json => "json",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Protocol::Line),
            "telnet" => Ok(Protocol::Telnet),
            "json" => Ok(Protocol::Json),
            other => Err(ConnectorError::config(format!(
                "unsupported schemaless protocol '{}', expected line, telnet or json",
                other
            ))),
        }
    }
}

/// Typed tag or field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// One measurement point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, FieldValue)>,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: Option<i64>,
    pub precision: Option<Precision>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
            precision: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn timestamp(mut self, timestamp: i64, precision: Precision) -> Self {
        self.timestamp = Some(timestamp);
        self.precision = Some(precision);
        self
    }

    /// Check the structural invariants of a point
    pub fn validate(&self) -> Result<(), String> {
        if self.measurement.is_empty() {
            return Err("measurement name is required".to_string());
        }
        if self.fields.is_empty() {
            return Err("at least one field is required".to_string());
        }
        check_keys("tag", &self.tags)?;
        check_keys("field", &self.fields)?;
        Ok(())
    }
}

fn check_keys(kind: &str, pairs: &[(String, FieldValue)]) -> Result<(), String> {
    for (i, (key, _)) in pairs.iter().enumerate() {
        if key.is_empty() {
            return Err(format!("empty {} key", kind));
        }
        if pairs[..i].iter().any(|(other, _)| other == key) {
            return Err(format!("duplicate {} key '{}'", kind, key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_point() -> Point {
        Point::new("st")
            .tag("t1", 3i64)
            .field("c1", 3i64)
            .field("c2", false)
            .timestamp(1626006833639000000, Precision::Nanos)
    }

    #[test]
    fn test_reference_line() {
        let line = encode(&reference_point()).unwrap();
        assert_eq!(line, "st,t1=3i64 c1=3i64,c2=false 1626006833639000000");

        let decoded = decode(&line, Some(Precision::Nanos)).unwrap();
        assert_eq!(decoded, reference_point());
    }

    #[test]
    fn test_round_trip_mixed_types_and_escapes() {
        let points = vec![
            Point::new("weather report")
                .tag("location", "San Francisco, CA")
                .tag("zone", 7i64)
                .field("temp", 21.5)
                .field("label", r#"say "hi" \ bye"#)
                .field("ok", true)
                .field("count", -42i64)
                .timestamp(1626006833639, Precision::Millis),
            Point::new("m=1")
                .field("k=v", "a,b c")
                .timestamp(1626006833639123, Precision::Micros),
            Point::new("no_ts").field("x", 0.000001),
            Point::new("big").field("v", 1e300).field("n", i64::MIN),
            Point::new("say\"what").tag("k\"q", "v").field("a\"b", 1i64),
            Point::new("a\tb").field("f\tg", 1i64).timestamp(5, Precision::Millis),
        ];

        for point in points {
            let line = encode(&point).unwrap();
            let decoded = decode(&line, point.precision).unwrap();
            assert_eq!(decoded, point, "line: {}", line);
        }
    }

    #[test]
    fn test_tag_order_is_preserved() {
        let point = Point::new("m")
            .tag("z", "1")
            .tag("a", "2")
            .field("f", 1i64);
        let line = encode(&point).unwrap();
        assert_eq!(line, r#"m,z=L"1",a=L"2" f=1i64"#);
        assert_eq!(decode(&line, None).unwrap().tags, point.tags);
    }

    #[test]
    fn test_validate() {
        assert!(Point::new("").field("a", 1i64).validate().is_err());
        assert!(Point::new("m").validate().is_err());
        assert!(Point::new("m")
            .field("a", 1i64)
            .field("a", 2i64)
            .validate()
            .is_err());
        assert!(Point::new("m")
            .tag("a", 1i64)
            .field("a", 2i64)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_precision_and_protocol_parsing() {
        assert_eq!("ns".parse::<Precision>().unwrap(), Precision::Nanos);
        assert_eq!(" MS ".parse::<Precision>().unwrap(), Precision::Millis);
        assert!("s".parse::<Precision>().is_err());
        assert_eq!(Precision::Micros.per_milli(), 1000);

        assert_eq!("telnet".parse::<Protocol>().unwrap(), Protocol::Telnet);
        assert!("influx".parse::<Protocol>().is_err());
    }
}
