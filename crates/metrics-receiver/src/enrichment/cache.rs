// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Enrichment attribute cache.
//!
//! One writer (the refresher) swaps in complete snapshots; any number of
//! request handlers read concurrently. The write lock is held only for the
//! pointer swap, never across a network call, so a reader sees either the
//! old snapshot or the new one.

use crate::config::EnrichmentSet;
use crate::error::PipelineError;
use crate::point::Tags;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info};

/// Attribute name -> value for one inventory entity.
pub type Attributes = BTreeMap<String, String>;

/// Lookup value -> attributes, for one enrichment set.
pub type SetSnapshot = HashMap<String, Attributes>;

/// Immutable view of every enrichment set.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    sets: HashMap<String, SetSnapshot>,
}

impl CacheSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_set(&mut self, name: impl Into<String>, entries: SetSnapshot) {
        self.sets.insert(name.into(), entries);
    }

    pub fn set(&self, name: &str) -> Option<&SetSnapshot> {
        self.sets.get(name)
    }

    /// Number of cached entries across all sets.
    pub fn len(&self) -> usize {
        self.sets.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct CacheState {
    snapshot: Arc<CacheSnapshot>,
    valid: bool,
    retry_count: u32,
    last_update: Option<DateTime<Utc>>,
}

/// Read-only status report. Never includes attribute values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub is_valid: bool,
    pub retry_count: u32,
    pub last_update: Option<DateTime<Utc>>,
    /// Names of cached sets.
    pub cache_items: Vec<String>,
    /// Cached lookup keys per set, sorted.
    pub lookup_keys: BTreeMap<String, Vec<String>>,
}

/// Shared enrichment cache.
///
/// Starts invalid: enrichment requests fail until the first successful
/// refresh.
#[derive(Debug)]
pub struct EnrichmentCache {
    state: RwLock<CacheState>,
}

impl Default for EnrichmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrichmentCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                snapshot: Arc::new(CacheSnapshot::new()),
                valid: false,
                retry_count: 0,
                last_update: None,
            }),
        }
    }

    /// Swap in a freshly built snapshot and mark the cache valid.
    pub fn record_success(&self, snapshot: CacheSnapshot, now: DateTime<Utc>) {
        let entries = snapshot.len();
        let snapshot = Arc::new(snapshot);
        {
            let mut state = self.state.write();
            state.snapshot = snapshot;
            state.valid = true;
            state.retry_count = 0;
            state.last_update = Some(now);
        }
        info!("Enrichment cache refreshed ({} entries)", entries);
    }

    /// Count a failed refresh. Returns whether the cache is still valid.
    ///
    /// The cache turns invalid once the consecutive failure count exceeds
    /// `threshold`. The previous snapshot stays in place either way.
    pub fn record_failure(&self, threshold: u32) -> bool {
        let mut state = self.state.write();
        state.retry_count = state.retry_count.saturating_add(1);
        if state.retry_count > threshold && state.valid {
            state.valid = false;
            error!(
                "Enrichment cache invalidated after {} failed refreshes",
                state.retry_count
            );
        }
        state.valid
    }

    pub fn is_valid(&self) -> bool {
        self.state.read().valid
    }

    pub fn retry_count(&self) -> u32 {
        self.state.read().retry_count
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.state.read().snapshot)
    }

    /// Status report for the cache-info endpoint.
    pub fn status(&self) -> CacheStatus {
        let (snapshot, valid, retry_count, last_update) = {
            let state = self.state.read();
            (
                Arc::clone(&state.snapshot),
                state.valid,
                state.retry_count,
                state.last_update,
            )
        };

        let mut lookup_keys = BTreeMap::new();
        for (name, entries) in &snapshot.sets {
            let mut keys: Vec<String> = entries.keys().cloned().collect();
            keys.sort();
            lookup_keys.insert(name.clone(), keys);
        }

        CacheStatus {
            is_valid: valid,
            retry_count,
            last_update,
            cache_items: lookup_keys.keys().cloned().collect(),
            lookup_keys,
        }
    }

    /// Join cached attributes onto `tags`.
    ///
    /// Without a set, or when the lookup tag is absent or has no cached
    /// entry, the input is returned borrowed and unchanged. On a hit the
    /// allow-listed attributes are copied into a new map; an empty allow-list
    /// copies nothing. The input map is never modified.
    pub fn enrich_tags<'a>(
        &self,
        tags: &'a Tags,
        set: Option<&EnrichmentSet>,
    ) -> Result<Cow<'a, Tags>, PipelineError> {
        let Some(set) = set else {
            return Ok(Cow::Borrowed(tags));
        };

        let snapshot = {
            let state = self.state.read();
            if !state.valid {
                return Err(PipelineError::EnrichmentCacheInvalid {
                    set: set.name.clone(),
                });
            }
            Arc::clone(&state.snapshot)
        };

        let Some(lookup_value) = tags.get(&set.lookup_tag) else {
            return Ok(Cow::Borrowed(tags));
        };
        let Some(entries) = snapshot.set(&set.name) else {
            return Ok(Cow::Borrowed(tags));
        };

        let key: Cow<'_, str> = if set.case_insensitive_matching {
            Cow::Owned(lookup_value.to_lowercase())
        } else {
            Cow::Borrowed(lookup_value.as_str())
        };
        let Some(attributes) = entries.get(key.as_ref()) else {
            return Ok(Cow::Borrowed(tags));
        };

        let mut enriched = tags.clone();
        for name in &set.trait_attribute_list {
            if let Some(value) = attributes.get(name) {
                enriched.insert(name.clone(), value.clone());
            }
        }
        Ok(Cow::Owned(enriched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn hosts_set() -> EnrichmentSet {
        EnrichmentSet::new("hosts", "host", "hostname", "host").attributes(["os"])
    }

    fn hosts_entries() -> SetSnapshot {
        let mut entries = SetSnapshot::new();
        entries.insert(
            "web-1".into(),
            Attributes::from([
                ("os".to_string(), "linux".to_string()),
                ("owner".to_string(), "ops".to_string()),
            ]),
        );
        entries
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid_cache() -> EnrichmentCache {
        let cache = EnrichmentCache::new();
        let mut snapshot = CacheSnapshot::new();
        snapshot.insert_set("hosts", hosts_entries());
        cache.record_success(snapshot, Utc::now());
        cache
    }

    #[test]
    fn test_new_cache_is_invalid() {
        let cache = EnrichmentCache::new();
        assert!(!cache.is_valid());
        let err = cache
            .enrich_tags(&tags(&[("host", "web-1")]), Some(&hosts_set()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnrichmentCacheInvalid);
    }

    #[test]
    fn test_no_set_is_pass_through() {
        let cache = EnrichmentCache::new();
        let input = tags(&[("host", "web-1")]);
        let out = cache.enrich_tags(&input, None).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(*out, input);
    }

    #[test]
    fn test_hit_copies_allow_listed_attributes_only() {
        let cache = valid_cache();
        let input = tags(&[("host", "web-1"), ("dc", "a")]);

        let out = cache.enrich_tags(&input, Some(&hosts_set())).unwrap();

        assert_eq!(out["os"], "linux");
        assert!(!out.contains_key("owner"));
        assert_eq!(out["dc"], "a");
        assert_eq!(input.len(), 2, "input must not be mutated");
    }

    #[test]
    fn test_empty_allow_list_copies_nothing() {
        let cache = valid_cache();
        let set = EnrichmentSet::new("hosts", "host", "hostname", "host");
        let input = tags(&[("host", "web-1")]);

        let out = cache.enrich_tags(&input, Some(&set)).unwrap();
        assert_eq!(*out, input);
    }

    #[test]
    fn test_miss_and_missing_lookup_tag_borrow() {
        let cache = valid_cache();
        let miss = tags(&[("host", "web-9")]);
        let absent = tags(&[("region", "eu")]);

        assert!(matches!(
            cache.enrich_tags(&miss, Some(&hosts_set())).unwrap(),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            cache.enrich_tags(&absent, Some(&hosts_set())).unwrap(),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        // Keys of case-insensitive sets are stored lower-cased.
        let cache = valid_cache();
        let set = hosts_set().case_insensitive(true);
        let input = tags(&[("host", "WEB-1")]);

        let out = cache.enrich_tags(&input, Some(&set)).unwrap();
        assert_eq!(out["os"], "linux");

        let strict = cache.enrich_tags(&input, Some(&hosts_set())).unwrap();
        assert!(!strict.contains_key("os"));
    }

    #[test]
    fn test_failures_past_threshold_invalidate() {
        let cache = valid_cache();

        assert!(cache.record_failure(2));
        assert!(cache.record_failure(2));
        assert!(!cache.record_failure(2));
        assert_eq!(cache.retry_count(), 3);
        assert!(cache
            .enrich_tags(&tags(&[("host", "web-1")]), Some(&hosts_set()))
            .is_err());

        let mut snapshot = CacheSnapshot::new();
        snapshot.insert_set("hosts", hosts_entries());
        cache.record_success(snapshot, Utc::now());

        assert!(cache.is_valid());
        assert_eq!(cache.retry_count(), 0);
        assert!(cache
            .enrich_tags(&tags(&[("host", "web-1")]), Some(&hosts_set()))
            .is_ok());
    }

    #[test]
    fn test_success_replaces_every_set() {
        let cache = valid_cache();
        assert!(!cache.record_failure(0));

        let mut snapshot = CacheSnapshot::new();
        snapshot.insert_set("racks", SetSnapshot::new());
        cache.record_success(snapshot, Utc::now());

        assert!(cache.is_valid());
        assert!(cache.snapshot().set("hosts").is_none());
        assert_eq!(cache.status().cache_items, vec!["racks".to_string()]);
    }

    #[test]
    fn test_zero_threshold_invalidates_on_first_failure() {
        let cache = valid_cache();
        assert!(!cache.record_failure(0));
    }

    #[test]
    fn test_status_lists_keys_without_values() {
        let cache = valid_cache();
        let status = cache.status();

        assert!(status.is_valid);
        assert_eq!(status.cache_items, vec!["hosts".to_string()]);
        assert_eq!(status.lookup_keys["hosts"], vec!["web-1".to_string()]);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"isValid\":true"));
        assert!(json.contains("\"retryCount\":0"));
        assert!(!json.contains("linux"));
    }

    #[test]
    fn test_readers_see_whole_snapshots() {
        use std::thread;

        fn snapshot_for(version: usize) -> CacheSnapshot {
            let mut entries = SetSnapshot::new();
            entries.insert(
                "web-1".into(),
                Attributes::from([
                    ("os".to_string(), format!("v{}", version)),
                    ("owner".to_string(), format!("v{}", version)),
                ]),
            );
            let mut snapshot = CacheSnapshot::new();
            snapshot.insert_set("hosts", entries);
            snapshot
        }

        let cache = Arc::new(EnrichmentCache::new());
        cache.record_success(snapshot_for(0), Utc::now());

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 1..200 {
                    cache.record_success(snapshot_for(i), Utc::now());
                }
            })
        };

        let set = EnrichmentSet::new("hosts", "host", "hostname", "host").attributes(["os", "owner"]);
        let input = tags(&[("host", "web-1")]);
        for _ in 0..200 {
            let out = cache.enrich_tags(&input, Some(&set)).unwrap();
            assert_eq!(out["os"], out["owner"]);
        }
        writer.join().unwrap();
    }
}
