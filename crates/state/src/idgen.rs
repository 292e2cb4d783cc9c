// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Unique random ids for deployments and endpoints.

use rand::prelude::*;
use std::collections::HashSet;

const DEFAULT_SEED: u64 = 1234;

/// Draws ids uniformly from `[999, 9999]`, never repeating one within the
/// lifetime of the generator.
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
    used: HashSet<u32>,
}

impl IdGenerator {
    /// Creates a generator with the default seed, so id sequences are
    /// reproducible across runs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Creates a generator with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            used: HashSet::new(),
        }
    }

    /// The next unused id.
    pub fn next(&mut self) -> u32 {
        loop {
            let id = self.rng.random_range(999..=9999);
            if self.used.insert(id) {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_in_range() {
        let mut generator = IdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let id = generator.next();
            assert!((999..=9999).contains(&id));
            assert!(seen.insert(id), "id {id} was handed out twice");
        }
    }

    #[test]
    fn seeded_generators_agree() {
        let mut a = IdGenerator::with_seed(42);
        let mut b = IdGenerator::with_seed(42);
        let left: Vec<u32> = (0..16).map(|_| a.next()).collect();
        let right: Vec<u32> = (0..16).map(|_| b.next()).collect();
        assert_eq!(left, right);
    }
}
