// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag include/block filtering.
//!
//! A point passes the include stage when no include rules exist, or when at
//! least one of its tags matches an include rule for that key. The block
//! stage then drops every point with at least one tag matching a block rule.
//! Block is evaluated last, so it wins when both apply on different keys.

use crate::config::TagFilterRules;
use crate::point::Point;

/// Rule value matching any tag value.
pub const WILDCARD: &str = "*";

/// Apply include then block rules.
pub fn filter_points<'a, I>(
    points: I,
    include: &TagFilterRules,
    block: &TagFilterRules,
) -> Vec<&'a Point>
where
    I: IntoIterator<Item = &'a Point>,
{
    points
        .into_iter()
        .filter(|p| include.is_empty() || matches_any_rule(p, include))
        .filter(|p| !matches_any_rule(p, block))
        .collect()
}

/// True if any tag of `point` matches a rule for its key.
pub fn matches_any_rule(point: &Point, rules: &TagFilterRules) -> bool {
    if rules.is_empty() {
        return false;
    }
    point.tags().iter().any(|(key, value)| {
        rules
            .get(key)
            .is_some_and(|allowed| allowed.iter().any(|v| v == WILDCARD || v == value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FieldValue, Fields, Tags};
    use chrono::DateTime;

    fn point(tags: &[(&str, &str)]) -> Point {
        let tags: Tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut fields = Fields::new();
        fields.insert("v".into(), FieldValue::Integer(1));
        Point::new("m", tags, fields, DateTime::from_timestamp_nanos(0))
    }

    fn rules(entries: &[(&str, &[&str])]) -> TagFilterRules {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_no_rules_passes_everything() {
        let points = vec![point(&[("a", "1")]), point(&[])];
        let out = filter_points(&points, &TagFilterRules::new(), &TagFilterRules::new());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_include_exact_and_wildcard() {
        let points = vec![
            point(&[("env", "prod")]),
            point(&[("env", "dev")]),
            point(&[("team", "x")]),
            point(&[]),
        ];

        let exact = filter_points(&points, &rules(&[("env", &["prod"])]), &TagFilterRules::new());
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].tags()["env"], "prod");

        let wildcard = filter_points(&points, &rules(&[("env", &["*"])]), &TagFilterRules::new());
        assert_eq!(wildcard.len(), 2);
    }

    #[test]
    fn test_block_wins_over_include() {
        let points = vec![
            point(&[("env", "prod"), ("host", "bad")]),
            point(&[("env", "prod"), ("host", "good")]),
        ];
        let out = filter_points(
            &points,
            &rules(&[("env", &["prod"])]),
            &rules(&[("host", &["bad"])]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tags()["host"], "good");
    }

    #[test]
    fn test_block_wildcard_drops_any_value() {
        let points = vec![point(&[("debug", "yes")]), point(&[("other", "1")])];
        let out = filter_points(&points, &TagFilterRules::new(), &rules(&[("debug", &["*"])]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tags()["other"], "1");
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let points = vec![
            point(&[("env", "prod"), ("host", "a")]),
            point(&[("env", "prod"), ("host", "b")]),
            point(&[("env", "dev"), ("host", "a")]),
            point(&[("host", "c")]),
        ];
        let include = rules(&[("env", &["prod", "dev"])]);
        let block = rules(&[("host", &["b"])]);

        let once = filter_points(&points, &include, &block);
        let twice = filter_points(once.iter().copied(), &include, &block);
        assert_eq!(once, twice);
    }
}
