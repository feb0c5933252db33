// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Grouping of parsed points by measurement.

use crate::point::{Point, PointGroup};
use std::collections::HashMap;

/// Partition points into one group per measurement.
///
/// Points keep their input order within a group. Groups come out in order of
/// first appearance, but callers must not rely on group order.
pub fn split_by_measurement(points: Vec<Point>) -> Vec<PointGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<PointGroup> = Vec::new();

    for point in points {
        let slot = match index.get(point.measurement()) {
            Some(&slot) => slot,
            None => {
                index.insert(point.measurement().to_string(), groups.len());
                groups.push(PointGroup::new(point.measurement()));
                groups.len() - 1
            }
        };
        groups[slot].points.push(point);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FieldValue, Fields, Tags};
    use chrono::DateTime;

    fn point(measurement: &str, value: i64) -> Point {
        let mut fields = Fields::new();
        fields.insert("v".into(), FieldValue::Integer(value));
        Point::new(
            measurement,
            Tags::new(),
            fields,
            DateTime::from_timestamp_nanos(value),
        )
    }

    #[test]
    fn test_groups_preserve_point_order() {
        let groups = split_by_measurement(vec![
            point("weather", 1),
            point("weather2", 2),
            point("weather", 3),
        ]);

        assert_eq!(groups.len(), 2);
        let weather = groups.iter().find(|g| g.measurement == "weather").unwrap();
        let values: Vec<_> = weather
            .points
            .iter()
            .map(|p| p.fields()["v"].clone())
            .collect();
        assert_eq!(values, vec![FieldValue::Integer(1), FieldValue::Integer(3)]);

        let weather2 = groups.iter().find(|g| g.measurement == "weather2").unwrap();
        assert_eq!(weather2.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_by_measurement(Vec::new()).is_empty());
    }
}
