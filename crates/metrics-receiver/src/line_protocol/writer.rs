// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line Protocol encoder used by the time-series sink.
//!
//! Output follows the upstream InfluxDB escaping rules so that any
//! InfluxDB-compatible endpoint accepts it:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```

use crate::error::BackendError;
use crate::point::{FieldValue, Point};

impl FieldValue {
    /// Format this value for Line Protocol.
    ///
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - Float: written as-is (e.g., `3.14`)
    /// - Text: quoted with double quotes, inner quotes and backslashes escaped
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Text(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
        }
    }
}

/// Encode a single point as one Line Protocol line (no trailing newline).
///
/// InfluxDB rejects points without fields, so an empty field set is an error.
pub fn encode_point(point: &Point) -> Result<String, BackendError> {
    if point.fields().is_empty() {
        return Err(BackendError::Encode(format!(
            "point in '{}' has no fields",
            point.measurement()
        )));
    }
    let timestamp = point.timestamp_nanos().ok_or_else(|| {
        BackendError::Encode(format!("timestamp {} out of range", point.timestamp()))
    })?;

    let mut line = escape_measurement(point.measurement());

    // Tags are already sorted by key
    for (key, value) in point.tags() {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');

    for (i, (key, value)) in point.fields().iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&value.to_line_protocol());
    }

    line.push(' ');
    line.push_str(&timestamp.to_string());

    Ok(line)
}

/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys: commas, equals signs, and spaces.
fn escape_key(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
