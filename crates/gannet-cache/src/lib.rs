//! A process-wide, TTL-less key/value cache for rendered link listings.
//!
//! Entries are deterministic functions of committed store state, so a race
//! to populate a key is harmless (last writer wins). Eviction is always
//! explicit: whoever mutates a package's releases or builds invalidates the
//! affected keys.

use std::fmt;

use dashmap::DashMap;
use tracing::trace;

use gannet_normalize::PackageName;

/// The key of one cached listing:
/// `links-index:{index_slugs}-platform:{platform}-package:{package}`, with
/// multi-index sets joined by `+` in request order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    indexes: String,
    platform: String,
    package: String,
}

impl CacheKey {
    pub fn links(index_slugs: &[&str], platform_slug: &str, package: &PackageName) -> Self {
        Self {
            indexes: index_slugs.join("+"),
            platform: platform_slug.to_string(),
            package: package.as_str().to_string(),
        }
    }

    fn mentions_index(&self, index_slug: &str) -> bool {
        self.indexes.split('+').any(|slug| slug == index_slug)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "links-index:{}-platform:{}-package:{}",
            self.indexes, self.platform, self.package
        )
    }
}

/// The cache handle, threaded explicitly through constructors so test
/// doubles can substitute their own.
#[derive(Debug, Default)]
pub struct LinkCache {
    entries: DashMap<CacheKey, String>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let hit = self.entries.get(key).map(|entry| entry.clone());
        trace!(key = %key, hit = hit.is_some(), "links cache lookup");
        hit
    }

    pub fn set(&self, key: CacheKey, rendered: String) {
        self.entries.insert(key, rendered);
    }

    /// Drop every listing that contains the given package of the given
    /// index, across all platforms and all index sets that include it.
    pub fn invalidate_package(&self, index_slug: &str, package: &PackageName) {
        self.entries.retain(|key, _| {
            !(key.package == package.as_str() && key.mentions_index(index_slug))
        });
    }

    /// Drop every listing rendered from the given index.
    pub fn invalidate_index(&self, index_slug: &str) {
        self.entries.retain(|key, _| !key.mentions_index(index_slug));
    }

    /// Drop every listing rendered for the given platform.
    pub fn invalidate_platform(&self, platform_slug: &str) {
        self.entries.retain(|key, _| key.platform != platform_slug);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
