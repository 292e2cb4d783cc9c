// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Lazy, thread-safe cache over the profile loader.

use crate::{ProfileLoader, VariantProfile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Caches [`VariantProfile`]s keyed by `(hardware platform, variant name)`.
///
/// Entries are loaded on first request and never replaced, so repeated calls
/// return the same shared profile. Safe to share across every scheduler and
/// daemon of a process.
pub struct ProfileCache {
    loader: ProfileLoader,
    entries: Mutex<HashMap<(String, String), Arc<VariantProfile>>>,
}

impl ProfileCache {
    /// Creates an empty cache over the given loader.
    #[must_use]
    pub fn new(loader: ProfileLoader) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the profile for the pair, reading it from disk on first use.
    pub fn load(&self, hardware_platform: &str, name: &str) -> Arc<VariantProfile> {
        let key = (hardware_platform.to_owned(), name.to_owned());
        let mut entries = self.entries.lock();
        entries
            .entry(key)
            .or_insert_with(|| Arc::new(self.loader.load(hardware_platform, name)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_loads_return_the_same_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ProfileCache::new(ProfileLoader::new(dir.path()));

        let first = cache.load("xavier", "resnet50");
        let second = cache.load("xavier", "resnet50");
        assert!(Arc::ptr_eq(&first, &second));

        let other = cache.load("orin", "resnet50");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.hardware_platform(), "orin");
    }
}
