// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag enrichment from an external inventory service.
//!
//! ```text
//! TraitSource --> EnrichmentRefresher --(swap)--> EnrichmentCache <-- enrich_tags (request handlers)
//! ```

pub mod cache;
pub mod refresh;
pub mod source;

pub use cache::{Attributes, CacheSnapshot, CacheStatus, EnrichmentCache, SetSnapshot};
pub use refresh::{build_set_snapshot, EnrichmentRefresher};
pub use source::{
    AttributeValue, EffectiveTrait, EffectiveTraits, MockTraitSource, OmnikeeperClient,
    TraitAttribute, TraitSource,
};
