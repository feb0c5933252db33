// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-output preparation of point groups.
//!
//! For every group: resolve the measurement config, skip ignored
//! measurements, resolve the enrichment set, apply tag filters (unless the
//! measurement opts out), then enrich and overlay the static added tags.
//! Added tags are applied last and win over enriched tags.

use crate::config::{EnrichmentSet, OutputConfig};
use crate::enrichment::EnrichmentCache;
use crate::error::PipelineError;
use crate::filter::filter_points;
use crate::point::{Point, PointGroup};
use tracing::debug;

/// Outcome of preparing every group for one output.
///
/// A failing group never stops the others: its error is kept and the
/// remaining groups are still prepared. The caller decides, from the
/// output's write strategy, whether any error aborts the write.
#[derive(Debug, Default)]
pub struct PreparedGroups {
    pub groups: Vec<PointGroup>,
    pub errors: Vec<PipelineError>,
}

/// Prepare `groups` for one output.
///
/// Input points are never modified; every emitted point is a new value.
pub fn prepare_point_groups(
    groups: &[PointGroup],
    output: &dyn OutputConfig,
    sets: &[EnrichmentSet],
    cache: &EnrichmentCache,
) -> PreparedGroups {
    let mut prepared = PreparedGroups {
        groups: Vec::with_capacity(groups.len()),
        errors: Vec::new(),
    };

    for group in groups {
        match prepare_group(group, output, sets, cache) {
            Ok(Some(group)) => prepared.groups.push(group),
            Ok(None) => {}
            Err(e) => prepared.errors.push(e),
        }
    }

    prepared
}

/// Prepare one group. `None` when the group is ignored or filtered out.
fn prepare_group(
    group: &PointGroup,
    output: &dyn OutputConfig,
    sets: &[EnrichmentSet],
    cache: &EnrichmentCache,
) -> Result<Option<PointGroup>, PipelineError> {
    let config = output.measurement_config(&group.measurement).ok_or_else(|| {
        PipelineError::UnknownMeasurement {
            measurement: group.measurement.clone(),
        }
    })?;

    if config.ignore {
        debug!("{}: measurement '{}' ignored", output.name(), group.measurement);
        return Ok(None);
    }

    let set = match config.enrichment_set() {
        Some(name) => Some(sets.iter().find(|s| s.name == name).ok_or_else(|| {
            PipelineError::UnknownEnrichmentSet {
                name: name.to_string(),
            }
        })?),
        None => None,
    };

    let selected: Vec<&Point> = if config.ignore_filtering {
        group.points.iter().collect()
    } else {
        filter_points(&group.points, output.include_filters(), output.block_filters())
    };

    if selected.is_empty() {
        debug!(
            "{}: measurement '{}' filtered out entirely",
            output.name(),
            group.measurement
        );
        return Ok(None);
    }

    let mut points = Vec::with_capacity(selected.len());
    for point in selected {
        let mut tags = cache.enrich_tags(point.tags(), set)?.into_owned();
        for (key, value) in &config.added_tags {
            tags.insert(key.clone(), value.clone());
        }
        points.push(point.with_tags(tags));
    }

    debug!(
        "{}: prepared {} of {} points for '{}'",
        output.name(),
        points.len(),
        group.points.len(),
        group.measurement
    );
    Ok(Some(PointGroup {
        measurement: group.measurement.clone(),
        points,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeasurementConfig, TimeSeriesOutput};
    use crate::enrichment::{Attributes, CacheSnapshot, SetSnapshot};
    use crate::error::ErrorKind;
    use crate::point::{FieldValue, Fields, Tags};
    use chrono::{DateTime, Utc};

    fn point(measurement: &str, tags: &[(&str, &str)]) -> Point {
        let tags: Tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut fields = Fields::new();
        fields.insert("value".into(), FieldValue::Integer(1));
        Point::new(measurement, tags, fields, DateTime::from_timestamp_nanos(7))
    }

    fn group(measurement: &str, points: Vec<Point>) -> PointGroup {
        PointGroup {
            measurement: measurement.into(),
            points,
        }
    }

    fn hosts_set() -> EnrichmentSet {
        EnrichmentSet::new("hosts", "host", "hostname", "host").attributes(["os", "team"])
    }

    fn valid_cache() -> EnrichmentCache {
        let cache = EnrichmentCache::new();
        let mut snapshot = CacheSnapshot::new();
        let mut entries = SetSnapshot::new();
        entries.insert(
            "web-1".into(),
            Attributes::from([
                ("os".to_string(), "linux".to_string()),
                ("team".to_string(), "from-inventory".to_string()),
            ]),
        );
        snapshot.insert_set("hosts", entries);
        cache.record_success(snapshot, Utc::now());
        cache
    }

    #[test]
    fn test_unknown_measurement() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .measurement("weather", MeasurementConfig::default());
        let groups = vec![group("weather2", vec![point("weather2", &[])])];

        let prepared = prepare_point_groups(&groups, &output, &[], &EnrichmentCache::new());
        assert!(prepared.groups.is_empty());
        assert_eq!(prepared.errors.len(), 1);
        assert_eq!(prepared.errors[0].kind(), ErrorKind::UnknownMeasurement);
    }

    #[test]
    fn test_failing_group_does_not_stop_others() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .measurement("weather", MeasurementConfig::default());
        let groups = vec![
            group("weather2", vec![point("weather2", &[])]),
            group("weather", vec![point("weather", &[]), point("weather", &[])]),
        ];

        let prepared = prepare_point_groups(&groups, &output, &[], &EnrichmentCache::new());

        assert_eq!(prepared.errors.len(), 1);
        assert!(prepared.errors[0].to_string().contains("weather2"));
        assert_eq!(prepared.groups.len(), 1);
        assert_eq!(prepared.groups[0].measurement, "weather");
        assert_eq!(prepared.groups[0].points.len(), 2);
    }

    #[test]
    fn test_ignored_measurement_skips_without_error() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .measurement("debug", MeasurementConfig::ignored().with_enrichment("missing"));
        let groups = vec![group("debug", vec![point("debug", &[])])];

        let prepared = prepare_point_groups(&groups, &output, &[], &EnrichmentCache::new());
        assert!(prepared.errors.is_empty());
        assert!(prepared.groups.is_empty());
    }

    #[test]
    fn test_unknown_enrichment_set() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .measurement("cpu", MeasurementConfig::default().with_enrichment("missing"));
        let groups = vec![group("cpu", vec![point("cpu", &[])])];

        let prepared = prepare_point_groups(&groups, &output, &[hosts_set()], &valid_cache());
        assert_eq!(prepared.errors[0].kind(), ErrorKind::UnknownEnrichmentSet);
    }

    #[test]
    fn test_filtering_and_ignore_filtering() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .include("env", &["prod"])
            .measurement("cpu", MeasurementConfig::default())
            .measurement("audit", MeasurementConfig::default().without_filtering());
        let groups = vec![
            group(
                "cpu",
                vec![point("cpu", &[("env", "prod")]), point("cpu", &[("env", "dev")])],
            ),
            group("audit", vec![point("audit", &[("env", "dev")])]),
        ];

        let prepared = prepare_point_groups(&groups, &output, &[], &EnrichmentCache::new()).groups;
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].points.len(), 1);
        assert_eq!(prepared[1].points.len(), 1);
    }

    #[test]
    fn test_fully_filtered_group_is_skipped() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .block("env", &["*"])
            .measurement("cpu", MeasurementConfig::default());
        let groups = vec![group("cpu", vec![point("cpu", &[("env", "prod")])])];

        let prepared = prepare_point_groups(&groups, &output, &[], &EnrichmentCache::new());
        assert!(prepared.errors.is_empty());
        assert!(prepared.groups.is_empty());
    }

    #[test]
    fn test_added_tags_win_over_enrichment() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db").measurement(
            "cpu",
            MeasurementConfig::default()
                .with_enrichment("hosts")
                .with_added_tag("team", "static"),
        );
        let original = point("cpu", &[("host", "web-1")]);
        let groups = vec![group("cpu", vec![original.clone()])];

        let prepared = prepare_point_groups(&groups, &output, &[hosts_set()], &valid_cache()).groups;
        let p = &prepared[0].points[0];

        assert_eq!(p.tags()["os"], "linux");
        assert_eq!(p.tags()["team"], "static");
        assert_eq!(p.fields(), original.fields());
        assert_eq!(p.timestamp(), original.timestamp());
        assert_eq!(groups[0].points[0], original);
    }

    #[test]
    fn test_invalid_cache_fails_enrichment() {
        let output = TimeSeriesOutput::new("ts", "http://x", "db")
            .measurement("cpu", MeasurementConfig::default().with_enrichment("hosts"));
        let groups = vec![group("cpu", vec![point("cpu", &[("host", "web-1")])])];

        let prepared =
            prepare_point_groups(&groups, &output, &[hosts_set()], &EnrichmentCache::new());
        assert_eq!(prepared.errors[0].kind(), ErrorKind::EnrichmentCacheInvalid);
    }

    #[test]
    fn test_outputs_do_not_alias() {
        let groups = vec![group("cpu", vec![point("cpu", &[("host", "web-1")])])];
        let a = TimeSeriesOutput::new("a", "http://x", "db")
            .measurement("cpu", MeasurementConfig::default().with_added_tag("out", "a"));
        let b = TimeSeriesOutput::new("b", "http://x", "db")
            .measurement("cpu", MeasurementConfig::default().with_added_tag("out", "b"));
        let cache = EnrichmentCache::new();

        let for_a = prepare_point_groups(&groups, &a, &[], &cache).groups;
        let for_b = prepare_point_groups(&groups, &b, &[], &cache).groups;

        assert_eq!(for_a[0].points[0].tags()["out"], "a");
        assert_eq!(for_b[0].points[0].tags()["out"], "b");
        assert!(!groups[0].points[0].tags().contains_key("out"));
    }
}
