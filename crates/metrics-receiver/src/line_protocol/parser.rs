// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line Protocol parser.
//!
//! Line format:
//! ```text
//! measurement[,tag=value]* field=value[,field=value]* [timestamp_ns]
//! ```
//!
//! Differences from the upstream InfluxDB grammar:
//! - Unsuffixed numerals that parse as an integer become [`FieldValue::Integer`];
//!   only non-integral numerals become floats.
//! - Quoted field values go through the same numeric coercion as bare ones
//!   once their quotes are stripped.
//! - Booleans are not recognised and stay text.
//!
//! Escapes (`\ `, `\,`, `\=`, `\"`, `\\`) are swapped for NUL-delimited
//! sentinels in one left-to-right pass before any split, and restored only
//! after the split that could have been confused by them.

use crate::error::ParseError;
use crate::point::{FieldValue, Fields, Point, Tags};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

const ESCAPE_PATTERN: &str = r#"\\([ ,="\\])"#;
const QUOTED_PATTERN: &str = r#"="(.*?)""#;
const PLACEHOLDER_PATTERN: &str = r"\x00v(\d+)\x00";
const SENTINEL_PATTERN: &str = r"\x00([scebq])\x00";
const SUFFIXED_INT_PATTERN: &str = r"^([+-]?\d+)[iu]$";

/// Parser holding precompiled patterns. Stateless between calls.
#[derive(Debug, Clone)]
pub struct LineProtocolParser {
    escape: Regex,
    quoted: Regex,
    placeholder: Regex,
    sentinel: Regex,
    suffixed_int: Regex,
}

impl Default for LineProtocolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineProtocolParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self {
            escape: compile(ESCAPE_PATTERN),
            quoted: compile(QUOTED_PATTERN),
            placeholder: compile(PLACEHOLDER_PATTERN),
            sentinel: compile(SENTINEL_PATTERN),
            suffixed_int: compile(SUFFIXED_INT_PATTERN),
        }
    }

    /// Parse a payload into points, in input order.
    ///
    /// Blank lines and lines starting with `#` are skipped. `now` is used for
    /// lines without a timestamp. The first malformed line aborts the call.
    pub fn parse(&self, input: &str, now: DateTime<Utc>) -> Result<Vec<Point>, ParseError> {
        let mut points = Vec::new();

        for (idx, raw) in input.split('\n').enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            points.push(self.parse_line(line, idx + 1, now)?);
        }

        Ok(points)
    }

    /// Parse one line. `line_no` is only used for error reporting.
    pub fn parse_line(
        &self,
        line: &str,
        line_no: usize,
        now: DateTime<Utc>,
    ) -> Result<Point, ParseError> {
        if line.contains('\0') {
            return Err(ParseError::new(line_no, "line contains a NUL byte"));
        }

        let escaped = self.escape.replace_all(line, |caps: &Captures<'_>| {
            sentinel_for(caps.get(1).map_or("", |m| m.as_str()))
        });

        // Measurement and tags never contain an unescaped space.
        let (head, rest) = escaped.split_once(' ').ok_or_else(|| {
            ParseError::new(line_no, "expected '<measurement> <fields> [timestamp]'")
        })?;

        // Quoted values may contain spaces and commas; lift them out first.
        let mut quoted_values: Vec<String> = Vec::new();
        let rest = self.quoted.replace_all(rest, |caps: &Captures<'_>| {
            let idx = quoted_values.len();
            quoted_values.push(caps.get(1).map_or("", |m| m.as_str()).to_string());
            format!("=\0v{}\0", idx)
        });

        let (field_set, timestamp) = match rest.rsplit_once(' ') {
            Some((fields, ts)) => (fields, Some(ts)),
            None => (rest.as_ref(), None),
        };

        let mut head_parts = head.split(',');
        let measurement = self.unescape(head_parts.next().unwrap_or_default());
        if measurement.is_empty() {
            return Err(ParseError::new(line_no, "missing measurement"));
        }

        let mut tags = Tags::new();
        for tag in head_parts {
            if let Some((key, value)) = split_pair(tag) {
                tags.insert(self.unescape(key), self.unescape(value));
            }
        }

        let mut fields = Fields::new();
        for field in field_set.split(',') {
            if let Some((key, value)) = split_pair(field) {
                let value = self.restore_quoted(value, &quoted_values);
                let value = self.unescape(&value);
                fields.insert(self.unescape(key), self.coerce(&value, line_no)?);
            }
        }

        let timestamp = match timestamp.filter(|ts| !ts.is_empty()) {
            Some(ts) => {
                let nanos: i64 = ts.parse().map_err(|_| {
                    ParseError::new(line_no, format!("invalid timestamp '{}'", self.unescape(ts)))
                })?;
                DateTime::from_timestamp_nanos(nanos)
            }
            None => now,
        };

        Ok(Point::new(measurement, tags, fields, timestamp))
    }

    /// Type a field value: integer, then float, then suffixed integer, then text.
    fn coerce(&self, value: &str, line_no: usize) -> Result<FieldValue, ParseError> {
        if let Ok(v) = value.parse::<i64>() {
            return Ok(FieldValue::Integer(v));
        }
        if let Ok(v) = value.parse::<f64>() {
            return Ok(FieldValue::Float(v));
        }
        if let Some(caps) = self.suffixed_int.captures(value) {
            let digits = caps.get(1).map_or("", |m| m.as_str());
            return digits.parse::<i64>().map(FieldValue::Integer).map_err(|_| {
                ParseError::new(line_no, format!("integer out of range '{}'", value))
            });
        }
        Ok(FieldValue::Text(value.to_string()))
    }

    fn restore_quoted(&self, value: &str, quoted_values: &[String]) -> String {
        self.placeholder
            .replace_all(value, |caps: &Captures<'_>| {
                caps.get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .and_then(|idx| quoted_values.get(idx))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }

    fn unescape(&self, s: &str) -> String {
        self.sentinel
            .replace_all(s, |caps: &Captures<'_>| {
                match caps.get(1).map_or("", |m| m.as_str()) {
                    "s" => " ",
                    "c" => ",",
                    "e" => "=",
                    "q" => "\"",
                    _ => "\\",
                }
            })
            .into_owned()
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("line protocol patterns are constant")
}

fn sentinel_for(escaped: &str) -> &'static str {
    match escaped {
        " " => "\0s\0",
        "," => "\0c\0",
        "=" => "\0e\0",
        "\"" => "\0q\0",
        _ => "\0b\0",
    }
}

/// Split `key=value`. Anything without exactly one unescaped `=` is skipped.
fn split_pair(s: &str) -> Option<(&str, &str)> {
    let (key, value) = s.split_once('=')?;
    if value.contains('=') {
        return None;
    }
    Some((key, value))
}
