// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic enrichment cache refresh.

use super::cache::{Attributes, CacheSnapshot, EnrichmentCache, SetSnapshot};
use super::source::{EffectiveTraits, TraitSource};
use crate::config::{EnrichmentConfig, EnrichmentSet};
use crate::error::SourceError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Attribute never copied onto points.
const ENTITY_ID_ATTRIBUTE: &str = "ciid";

/// Build the lookup table for one set from fetched entities.
///
/// The join key is the first value of the set's identifier attribute;
/// entities without it are skipped. Only single-valued attributes are kept.
pub fn build_set_snapshot(set: &EnrichmentSet, entities: &EffectiveTraits) -> SetSnapshot {
    let mut entries = SetSnapshot::with_capacity(entities.len());

    for (entity_id, entity) in entities {
        let Some(key) = entity.single_value(&set.trait_attribute_identifier) else {
            debug!(
                "Entity '{}' has no '{}' attribute, skipped",
                entity_id, set.trait_attribute_identifier
            );
            continue;
        };
        let key = if set.case_insensitive_matching {
            key.to_lowercase()
        } else {
            key.to_string()
        };

        let attributes: Attributes = entity
            .trait_attributes
            .iter()
            .filter(|(name, attr)| name.as_str() != ENTITY_ID_ATTRIBUTE && !attr.value.is_array)
            .filter_map(|(name, attr)| {
                attr.value
                    .values
                    .first()
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        entries.insert(key, attributes);
    }

    entries
}

/// Rebuilds the enrichment cache from a [`TraitSource`].
pub struct EnrichmentRefresher<S> {
    source: S,
    cache: Arc<EnrichmentCache>,
    sets: Vec<EnrichmentSet>,
    retry_threshold: u32,
    interval: Duration,
}

impl<S: TraitSource> EnrichmentRefresher<S> {
    pub fn new(source: S, cache: Arc<EnrichmentCache>, config: &EnrichmentConfig) -> Self {
        Self {
            source,
            cache,
            sets: config.sets.clone(),
            retry_threshold: config.retry_count,
            interval: config.collect_interval(),
        }
    }

    pub fn cache(&self) -> &Arc<EnrichmentCache> {
        &self.cache
    }

    /// Fetch every set and swap in the result.
    ///
    /// All sets are fetched before the cache is touched. If any fetch fails
    /// the whole refresh counts as one failure and the old snapshot stays.
    pub async fn refresh_once(&self) -> Result<(), SourceError> {
        let mut snapshot = CacheSnapshot::new();

        for set in &self.sets {
            match self.source.effective_traits(set).await {
                Ok(entities) => {
                    let entries = build_set_snapshot(set, &entities);
                    debug!("Enrichment set '{}': {} entries", set.name, entries.len());
                    snapshot.insert_set(set.name.clone(), entries);
                }
                Err(e) => {
                    let still_valid = self.cache.record_failure(self.retry_threshold);
                    warn!(
                        "Enrichment refresh failed on set '{}' (attempt {}, cache {}): {}",
                        set.name,
                        self.cache.retry_count(),
                        if still_valid { "valid" } else { "invalid" },
                        e
                    );
                    return Err(e);
                }
            }
        }

        self.cache.record_success(snapshot, Utc::now());
        Ok(())
    }

    /// Refresh every interval until `shutdown` flips to `true`.
    ///
    /// The first refresh happens one interval after the call; run
    /// [`refresh_once`](Self::refresh_once) beforehand for an initial fill.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.sets.is_empty() || self.interval.is_zero() {
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Enrichment refresher started ({} sets, every {:?})",
            self.sets.len(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are recorded on the cache and logged.
                    let _ = self.refresh_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Enrichment refresher stopped");
    }
}
