// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Enrichment source: the inventory service queried for trait entities.
//!
//! # Example
//!
//! ```ignore
//! use metrics_receiver::enrichment::{OmnikeeperClient, TraitSource};
//!
//! let client = OmnikeeperClient::new(&config.enrichment)?;
//! let entities = client.effective_traits(&set).await?;
//! ```

use crate::config::{EnrichmentConfig, EnrichmentSet};
use crate::error::SourceError;
use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Entity id -> effective trait.
pub type EffectiveTraits = HashMap<String, EffectiveTrait>;

/// Attributes carried by one entity for the requested trait.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTrait {
    #[serde(rename = "traitAttributes", default)]
    pub trait_attributes: HashMap<String, TraitAttribute>,
}

impl EffectiveTrait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-valued text attribute.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.trait_attributes.insert(
            name.clone(),
            TraitAttribute {
                name,
                value: AttributeValue {
                    kind: "Text".into(),
                    is_array: false,
                    values: vec![value.into()],
                },
            },
        );
        self
    }

    /// Add a multi-valued text attribute.
    pub fn array_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        self.trait_attributes.insert(
            name.clone(),
            TraitAttribute {
                name,
                value: AttributeValue {
                    kind: "Text".into(),
                    is_array: true,
                    values: values.into_iter().map(Into::into).collect(),
                },
            },
        );
        self
    }

    /// First value of a single-valued attribute.
    pub fn single_value(&self, name: &str) -> Option<&str> {
        self.trait_attributes
            .get(name)
            .filter(|a| !a.value.is_array)
            .and_then(|a| a.value.values.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraitAttribute {
    #[serde(default)]
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "isArray", default)]
    pub is_array: bool,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Source of trait entities for enrichment sets.
pub trait TraitSource: Send + Sync {
    /// Fetch every entity carrying the set's trait within its layers.
    fn effective_traits(
        &self,
        set: &EnrichmentSet,
    ) -> impl std::future::Future<Output = Result<EffectiveTraits, SourceError>> + Send;
}

/// HTTP client for the Omnikeeper inventory API.
#[derive(Debug, Clone)]
pub struct OmnikeeperClient {
    base_url: String,
    api_version: String,
    auth_token: Option<String>,
    client: Client,
}

impl OmnikeeperClient {
    /// Create a client from the enrichment configuration.
    pub fn new(config: &EnrichmentConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn traits_url(&self, set: &EnrichmentSet) -> Result<Url, SourceError> {
        let raw = format!(
            "{}/api/v{}/Trait/getEffectiveTraitsForTraitName",
            self.base_url, self.api_version
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| SourceError::Other(format!("invalid server url '{}': {}", raw, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("traitName", &set.trait_id);
            for layer in &set.layer_ids {
                query.append_pair("layerIDs", layer);
            }
        }
        Ok(url)
    }
}

impl TraitSource for OmnikeeperClient {
    async fn effective_traits(&self, set: &EnrichmentSet) -> Result<EffectiveTraits, SourceError> {
        let url = self.traits_url(set)?;
        debug!("Fetching trait '{}' for set '{}'", set.trait_id, set.name);

        let mut request = self.client.get(url);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

/// In-memory trait source for tests and local runs.
#[derive(Debug, Default)]
pub struct MockTraitSource {
    traits: Mutex<HashMap<String, EffectiveTraits>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockTraitSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `entities` for `trait_id`.
    pub fn with_trait(self, trait_id: impl Into<String>, entities: EffectiveTraits) -> Self {
        self.set_trait(trait_id, entities);
        self
    }

    pub fn set_trait(&self, trait_id: impl Into<String>, entities: EffectiveTraits) {
        self.traits.lock().insert(trait_id.into(), entities);
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TraitSource for MockTraitSource {
    async fn effective_traits(&self, set: &EnrichmentSet) -> Result<EffectiveTraits, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Other("mock source unavailable".into()));
        }
        Ok(self
            .traits
            .lock()
            .get(&set.trait_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl<S: TraitSource> TraitSource for std::sync::Arc<S> {
    fn effective_traits(
        &self,
        set: &EnrichmentSet,
    ) -> impl std::future::Future<Output = Result<EffectiveTraits, SourceError>> + Send {
        (**self).effective_traits(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let body = r#"{
            "ci-1": {
                "traitAttributes": {
                    "hostname": {"name": "hostname", "value": {"type": "Text", "isArray": false, "values": ["web-1"]}},
                    "ips": {"name": "ips", "value": {"type": "Text", "isArray": true, "values": ["10.0.0.1", "10.0.0.2"]}}
                }
            }
        }"#;
        let traits: EffectiveTraits = serde_json::from_str(body).unwrap();
        let entity = &traits["ci-1"];
        assert_eq!(entity.single_value("hostname"), Some("web-1"));
        assert_eq!(entity.single_value("ips"), None);
        assert_eq!(entity.trait_attributes["ips"].value.values.len(), 2);
    }

    #[test]
    fn test_traits_url() {
        let config = EnrichmentConfig {
            server_url: "http://inventory.local/".into(),
            ..Default::default()
        };
        let client = OmnikeeperClient::new(&EnrichmentConfig {
            api_version: "1".into(),
            ..config
        })
        .unwrap();
        let set = EnrichmentSet::new("hosts", "host trait", "hostname", "host").layers(["1", "2"]);

        let url = client.traits_url(&set).unwrap();
        assert_eq!(
            url.as_str(),
            "http://inventory.local/api/v1/Trait/getEffectiveTraitsForTraitName?traitName=host+trait&layerIDs=1&layerIDs=2"
        );
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mut entities = EffectiveTraits::new();
        entities.insert("ci-1".into(), EffectiveTrait::new().attribute("hostname", "web-1"));
        let source = MockTraitSource::new().with_trait("host", entities);
        let set = EnrichmentSet::new("hosts", "host", "hostname", "host");

        let traits = source.effective_traits(&set).await.unwrap();
        assert_eq!(traits.len(), 1);

        source.set_failing(true);
        assert!(source.effective_traits(&set).await.is_err());
        assert_eq!(source.calls(), 2);
    }
}
