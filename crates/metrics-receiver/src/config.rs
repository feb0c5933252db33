// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver configuration.
//!
//! Loaded from JSON (the historical format) or TOML, chosen by file
//! extension. Measurement entries accept both snake_case keys and the
//! PascalCase keys used by older configuration files (`AddedTags`,
//! `IgnoreFiltering`, `TargetTable`, ...).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tag key -> accepted (or blocked) values. `"*"` matches any value.
pub type TagFilterRules = BTreeMap<String, Vec<String>>;

/// Whether a failing output aborts the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    /// Any error on this output fails the request.
    Commit,
    /// Errors are recorded and the request carries on.
    #[default]
    #[serde(alias = "best_effort", alias = "")]
    BestEffort,
}

/// Top-level receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// HTTP listen port.
    #[serde(default = "default_port", alias = "Port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between internal counter snapshots (0 disables).
    #[serde(default = "default_collect_interval")]
    pub internal_metrics_collect_interval: u64,

    /// Seconds between flushes of collected internal metrics (0 disables).
    #[serde(default = "default_flush_cycle")]
    pub internal_metrics_flush_cycle: u64,

    /// Measurement name used for internal metrics.
    #[serde(default = "default_internal_measurement")]
    pub internal_metrics_measurement: String,

    /// Maximum accepted request body, after decompression.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Columnar (relational) outputs.
    #[serde(default, rename = "outputs_timescaledb", alias = "outputs_columnar")]
    pub columnar_outputs: Vec<ColumnarOutput>,

    /// Time-series (InfluxDB) outputs.
    #[serde(default, rename = "outputs_influxdb", alias = "outputs_timeseries")]
    pub timeseries_outputs: Vec<TimeSeriesOutput>,
}

fn default_port() -> u16 {
    80
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_collect_interval() -> u64 {
    60
}

fn default_flush_cycle() -> u64 {
    1
}

fn default_internal_measurement() -> String {
    "metrics_receiver".to_string()
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_write_timeout() -> u64 {
    30
}

fn default_api_version() -> String {
    "1".to_string()
}

fn default_influx_version() -> u8 {
    1
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            internal_metrics_collect_interval: default_collect_interval(),
            internal_metrics_flush_cycle: default_flush_cycle(),
            internal_metrics_measurement: default_internal_measurement(),
            max_body_bytes: default_max_body_bytes(),
            enrichment: EnrichmentConfig::default(),
            columnar_outputs: Vec::new(),
            timeseries_outputs: Vec::new(),
        }
    }
}

impl ReceiverConfig {
    /// Load configuration from a `.json` or `.toml` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        config.assign_output_names();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.assign_output_names();
        config.validate()?;
        Ok(config)
    }

    /// Give unnamed outputs a positional label.
    pub fn assign_output_names(&mut self) {
        for (i, output) in self.columnar_outputs.iter_mut().enumerate() {
            if output.name.is_empty() {
                output.name = format!("timescaledb[{}]", i);
            }
        }
        for (i, output) in self.timeseries_outputs.iter_mut().enumerate() {
            if output.name.is_empty() {
                output.name = format!("influxdb[{}]", i);
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.enrichment.validate()?;

        let set_names: HashSet<&str> = self
            .enrichment
            .sets
            .iter()
            .map(|s| s.name.as_str())
            .collect();

        let mut output_names = HashSet::new();
        for output in self.outputs() {
            if !output_names.insert(output.name().to_string()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate output name '{}'",
                    output.name()
                )));
            }
            for (measurement, config) in output.measurements() {
                if let Some(set) = config.enrichment_set() {
                    if !set_names.contains(set) {
                        return Err(ConfigError::Invalid(format!(
                            "Output '{}' measurement '{}' references unknown enrichment set '{}'",
                            output.name(),
                            measurement,
                            set
                        )));
                    }
                }
            }
        }

        for output in &self.columnar_outputs {
            output.validate()?;
        }
        for output in &self.timeseries_outputs {
            output.validate()?;
        }

        Ok(())
    }

    /// All outputs, columnar first.
    pub fn outputs(&self) -> impl Iterator<Item = &dyn OutputConfig> {
        self.columnar_outputs
            .iter()
            .map(|o| o as &dyn OutputConfig)
            .chain(self.timeseries_outputs.iter().map(|o| o as &dyn OutputConfig))
    }
}

/// Enrichment source and sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub sets: Vec<EnrichmentSet>,

    /// Consecutive refresh failures tolerated before the cache is invalidated.
    #[serde(default)]
    pub retry_count: u32,

    /// Seconds between refreshes.
    #[serde(default)]
    pub collect_interval: u64,

    /// Base URL of the inventory service.
    #[serde(default)]
    pub server_url: String,

    /// API version segment used in request paths.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Static bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            sets: Vec::new(),
            retry_count: 0,
            collect_interval: 0,
            server_url: String::new(),
            api_version: default_api_version(),
            auth_token: None,
        }
    }
}

impl EnrichmentConfig {
    /// True when at least one enrichment set is configured.
    pub fn is_enabled(&self) -> bool {
        !self.sets.is_empty()
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.server_url.is_empty() {
            return Err(ConfigError::Invalid(
                "Enrichment sets configured without server_url".into(),
            ));
        }
        if self.collect_interval == 0 {
            return Err(ConfigError::Invalid(
                "Enrichment sets configured with collect_interval 0".into(),
            ));
        }

        let mut names = HashSet::new();
        for set in &self.sets {
            if set.name.is_empty() {
                return Err(ConfigError::Invalid("Enrichment set with empty name".into()));
            }
            if !names.insert(set.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate enrichment set '{}'",
                    set.name
                )));
            }
            if set.trait_id.is_empty()
                || set.lookup_tag.is_empty()
                || set.trait_attribute_identifier.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "Enrichment set '{}' needs trait_id, lookup_tag and trait_attribute_identifier",
                    set.name
                )));
            }
        }
        Ok(())
    }
}

/// How to join external attributes onto a point's tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSet {
    pub name: String,

    /// Trait whose entities are fetched from the inventory service.
    pub trait_id: String,

    /// Attribute whose value is the join key.
    pub trait_attribute_identifier: String,

    /// Attributes copied onto matching points. Empty copies none.
    #[serde(default)]
    pub trait_attribute_list: Vec<String>,

    /// Layer scopes passed to the inventory service.
    #[serde(default)]
    pub layer_ids: Vec<String>,

    /// Point tag whose value is looked up.
    pub lookup_tag: String,

    #[serde(default)]
    pub case_insensitive_matching: bool,
}

impl EnrichmentSet {
    pub fn new(
        name: impl Into<String>,
        trait_id: impl Into<String>,
        trait_attribute_identifier: impl Into<String>,
        lookup_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            trait_id: trait_id.into(),
            trait_attribute_identifier: trait_attribute_identifier.into(),
            trait_attribute_list: Vec::new(),
            layer_ids: Vec::new(),
            lookup_tag: lookup_tag.into(),
            case_insensitive_matching: false,
        }
    }

    /// Restrict copied attributes.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trait_attribute_list = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layer_ids = layers.into_iter().map(Into::into).collect();
        self
    }

    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive_matching = enabled;
        self
    }
}

/// Per-measurement settings shared by all output kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Tags added to every point, applied after enrichment.
    #[serde(default, alias = "AddedTags")]
    pub added_tags: BTreeMap<String, String>,

    /// Drop the whole measurement without error.
    #[serde(default, alias = "Ignore")]
    pub ignore: bool,

    /// Bypass the output's include/block filters.
    #[serde(default, alias = "IgnoreFiltering")]
    pub ignore_filtering: bool,

    /// Name of the enrichment set to apply.
    #[serde(default, alias = "Enrichment", skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<String>,
}

impl MeasurementConfig {
    /// Configured enrichment set; an empty name counts as none.
    pub fn enrichment_set(&self) -> Option<&str> {
        self.enrichment.as_deref().filter(|s| !s.is_empty())
    }

    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Default::default()
        }
    }

    pub fn with_added_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.added_tags.insert(key.into(), value.into());
        self
    }

    pub fn with_enrichment(mut self, set: impl Into<String>) -> Self {
        self.enrichment = Some(set.into());
        self
    }

    pub fn without_filtering(mut self) -> Self {
        self.ignore_filtering = true;
        self
    }
}

/// Columnar measurement: shared settings plus the column projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnarMeasurement {
    #[serde(flatten)]
    pub common: MeasurementConfig,

    /// Fields stored in their own column, in this order.
    #[serde(default, alias = "FieldsAsColumns")]
    pub fields_as_columns: Vec<String>,

    /// Tags stored in their own column, in this order.
    #[serde(default, alias = "TagsAsColumns")]
    pub tags_as_columns: Vec<String>,

    #[serde(default, alias = "TargetTable")]
    pub target_table: String,
}

impl ColumnarMeasurement {
    pub fn new(target_table: impl Into<String>) -> Self {
        Self {
            target_table: target_table.into(),
            ..Default::default()
        }
    }

    pub fn fields<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields_as_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn tags<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags_as_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn common(mut self, common: MeasurementConfig) -> Self {
        self.common = common;
        self
    }
}

/// Capability set shared by every output kind.
pub trait OutputConfig: Send + Sync {
    /// Label used in logs and errors.
    fn name(&self) -> &str;

    fn write_strategy(&self) -> WriteStrategy;

    fn include_filters(&self) -> &TagFilterRules;

    fn block_filters(&self) -> &TagFilterRules;

    /// Shared settings for `measurement`, if configured.
    fn measurement_config(&self, measurement: &str) -> Option<&MeasurementConfig>;

    /// All configured measurements.
    fn measurements(&self) -> Vec<(&str, &MeasurementConfig)>;

    /// Upper bound on one write call.
    fn write_timeout(&self) -> Duration;
}

/// Columnar (relational) output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnarOutput {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub tagfilter_include: TagFilterRules,

    #[serde(default)]
    pub tagfilter_block: TagFilterRules,

    #[serde(default)]
    pub write_strategy: WriteStrategy,

    #[serde(default)]
    pub measurements: BTreeMap<String, ColumnarMeasurement>,

    /// SQLite database path.
    pub connection: String,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl ColumnarOutput {
    pub fn new(name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            write_timeout_secs: default_write_timeout(),
            ..Default::default()
        }
    }

    pub fn strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    pub fn measurement(mut self, name: impl Into<String>, config: ColumnarMeasurement) -> Self {
        self.measurements.insert(name.into(), config);
        self
    }

    pub fn include(mut self, tag: impl Into<String>, values: &[&str]) -> Self {
        self.tagfilter_include
            .insert(tag.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn block(mut self, tag: impl Into<String>, values: &[&str]) -> Self {
        self.tagfilter_block
            .insert(tag.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Full column projection for `measurement`.
    pub fn columnar_measurement(&self, measurement: &str) -> Option<&ColumnarMeasurement> {
        self.measurements.get(measurement)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Output '{}' has no connection",
                self.name
            )));
        }
        for (name, measurement) in &self.measurements {
            if !measurement.common.ignore && measurement.target_table.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Output '{}' measurement '{}' has no target table",
                    self.name, name
                )));
            }
        }
        Ok(())
    }
}

impl OutputConfig for ColumnarOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_strategy(&self) -> WriteStrategy {
        self.write_strategy
    }

    fn include_filters(&self) -> &TagFilterRules {
        &self.tagfilter_include
    }

    fn block_filters(&self) -> &TagFilterRules {
        &self.tagfilter_block
    }

    fn measurement_config(&self, measurement: &str) -> Option<&MeasurementConfig> {
        self.measurements.get(measurement).map(|m| &m.common)
    }

    fn measurements(&self) -> Vec<(&str, &MeasurementConfig)> {
        self.measurements
            .iter()
            .map(|(name, m)| (name.as_str(), &m.common))
            .collect()
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Time-series (InfluxDB) output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeriesOutput {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub tagfilter_include: TagFilterRules,

    #[serde(default)]
    pub tagfilter_block: TagFilterRules,

    #[serde(default)]
    pub write_strategy: WriteStrategy,

    #[serde(default)]
    pub measurements: BTreeMap<String, MeasurementConfig>,

    /// Server base URL.
    pub connection: String,

    /// Database (v1) or bucket (v2).
    #[serde(default)]
    pub db_name: String,

    /// Write protocol version: 1 or 2.
    #[serde(default = "default_influx_version")]
    pub version: u8,

    /// Organisation (v2 only).
    #[serde(default)]
    pub org: String,

    /// API token (v2 only).
    #[serde(default)]
    pub auth_token: String,

    /// Basic-auth user (v1 only).
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl TimeSeriesOutput {
    pub fn new(name: impl Into<String>, connection: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            db_name: db_name.into(),
            version: default_influx_version(),
            write_timeout_secs: default_write_timeout(),
            ..Default::default()
        }
    }

    pub fn strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    pub fn measurement(mut self, name: impl Into<String>, config: MeasurementConfig) -> Self {
        self.measurements.insert(name.into(), config);
        self
    }

    pub fn include(mut self, tag: impl Into<String>, values: &[&str]) -> Self {
        self.tagfilter_include
            .insert(tag.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn block(mut self, tag: impl Into<String>, values: &[&str]) -> Self {
        self.tagfilter_block
            .insert(tag.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Output '{}' has no connection",
                self.name
            )));
        }
        match self.version {
            1 => {}
            2 if self.org.is_empty() => {
                return Err(ConfigError::Invalid(format!(
                    "Output '{}' uses version 2 without org",
                    self.name
                )));
            }
            2 => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Output '{}' has unsupported version {} (expected 1 or 2)",
                    self.name, other
                )));
            }
        }
        if self.db_name.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Output '{}' has no db_name",
                self.name
            )));
        }
        Ok(())
    }
}

impl OutputConfig for TimeSeriesOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_strategy(&self) -> WriteStrategy {
        self.write_strategy
    }

    fn include_filters(&self) -> &TagFilterRules {
        &self.tagfilter_include
    }

    fn block_filters(&self) -> &TagFilterRules {
        &self.tagfilter_block
    }

    fn measurement_config(&self, measurement: &str) -> Option<&MeasurementConfig> {
        self.measurements.get(measurement)
    }

    fn measurements(&self) -> Vec<(&str, &MeasurementConfig)> {
        self.measurements
            .iter()
            .map(|(name, m)| (name.as_str(), m))
            .collect()
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}
