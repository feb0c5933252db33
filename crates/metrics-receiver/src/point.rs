// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point data model.
//!
//! A [`Point`] is one decoded `measurement + tags + fields + timestamp`
//! record. Points are immutable once built: every later stage that changes
//! tags produces a new `Point` via [`Point::with_tags`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Tag mapping. Ordered so encoding and row building are deterministic.
pub type Tags = BTreeMap<String, String>;

/// Field mapping.
pub type Fields = BTreeMap<String, FieldValue>;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One decoded metric record.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Tags,
    fields: Fields,
    timestamp: DateTime<Utc>,
}

impl Point {
    /// Create a new point.
    pub fn new(
        measurement: impl Into<String>,
        tags: Tags,
        fields: Fields,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp,
        }
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tag mapping.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Field mapping.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Point timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp as nanoseconds since the Unix epoch.
    ///
    /// Returns `None` outside the range representable in an `i64`
    /// (roughly years 1677..2262).
    pub fn timestamp_nanos(&self) -> Option<i64> {
        self.timestamp.timestamp_nanos_opt()
    }

    /// Copy of this point carrying a different tag mapping.
    pub fn with_tags(&self, tags: Tags) -> Point {
        Point {
            measurement: self.measurement.clone(),
            tags,
            fields: self.fields.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Points sharing one measurement name, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGroup {
    pub measurement: String,
    pub points: Vec<Point>,
}

impl PointGroup {
    /// Create an empty group for `measurement`.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_point() -> Point {
        let mut tags = Tags::new();
        tags.insert("host".into(), "a".into());
        let mut fields = Fields::new();
        fields.insert("value".into(), FieldValue::Integer(1));
        Point::new("cpu", tags, fields, Utc.timestamp_nanos(42))
    }

    #[test]
    fn test_with_tags_leaves_original_untouched() {
        let point = sample_point();
        let mut tags = point.tags().clone();
        tags.insert("region".into(), "eu".into());

        let enriched = point.with_tags(tags);

        assert_eq!(point.tags().len(), 1);
        assert_eq!(enriched.tags().len(), 2);
        assert_eq!(enriched.fields(), point.fields());
        assert_eq!(enriched.timestamp(), point.timestamp());
        assert_eq!(enriched.measurement(), "cpu");
    }

    #[test]
    fn test_timestamp_nanos() {
        assert_eq!(sample_point().timestamp_nanos(), Some(42));
    }

    #[test]
    fn test_field_value_json_is_untagged() {
        let mut fields = Fields::new();
        fields.insert("a".into(), FieldValue::Integer(3));
        fields.insert("b".into(), FieldValue::Float(1.5));
        fields.insert("c".into(), FieldValue::Text("x".into()));

        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"a":3,"b":1.5,"c":"x"}"#);
    }
}
