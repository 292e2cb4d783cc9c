// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Weighted round robin over an application's running placements.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Classic weighted round robin with GCD decrement.
///
/// Keys are visited in insertion order; a key is eligible whenever its
/// weight is at least the current weight, which drops by the GCD of all
/// weights on every wrap-around and resets to the maximum weight when it
/// reaches zero.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    keys: Vec<String>,
    weights: HashMap<String, u32>,
    cursor: isize,
    current_weight: u32,
}

impl WeightedRoundRobin {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            weights: HashMap::new(),
            cursor: -1,
            current_weight: 0,
        }
    }

    /// Inserts a key or updates its weight.
    pub fn set(&mut self, key: &str, weight: u32) {
        if !self.weights.contains_key(key) {
            self.keys.push(key.to_owned());
        }
        let _ = self.weights.insert(key.to_owned(), weight);
    }

    /// Updates the weight of an existing key; unknown keys are ignored.
    pub fn update(&mut self, key: &str, weight: u32) {
        if let Some(slot) = self.weights.get_mut(key) {
            *slot = weight;
        }
    }

    /// Removes a key from the rotation.
    pub fn remove(&mut self, key: &str) {
        self.keys.retain(|k| k != key);
        let _ = self.weights.remove(key);
    }

    /// The weight currently assigned to a key.
    #[must_use]
    pub fn weight(&self, key: &str) -> Option<u32> {
        self.weights.get(key).copied()
    }

    /// Whether any key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The next key of the rotation, or `None` when the table is empty or
    /// every weight is zero.
    pub fn next(&mut self) -> Option<String> {
        let n = self.keys.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(self.keys[0].clone());
        }

        loop {
            self.cursor = (self.cursor + 1) % n as isize;
            if self.cursor == 0 {
                let gcd = self
                    .keys
                    .iter()
                    .filter_map(|key| self.weights.get(key).copied())
                    .fold(0, gcd);
                self.current_weight = self.current_weight.saturating_sub(gcd);
                if self.current_weight == 0 {
                    self.current_weight = self
                        .keys
                        .iter()
                        .filter_map(|key| self.weights.get(key).copied())
                        .max()
                        .unwrap_or(0);
                    if self.current_weight == 0 {
                        return None;
                    }
                }
            }

            let key = &self.keys[self.cursor as usize];
            if self.weights.get(key).copied().unwrap_or(0) >= self.current_weight {
                return Some(key.clone());
            }
        }
    }
}

impl fmt::Display for WeightedRoundRobin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .keys
            .iter()
            .map(|key| format!("'{key}': {}", self.weights.get(key).copied().unwrap_or(0)))
            .collect();
        write!(f, "wrr -> [{}]", entries.join(", "))
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Per-application weighted round robin, keyed by
/// `"{variant_id}_{worker_id}"` placement keys.
///
/// Written by the profiling daemon, read by the per-application dispatch
/// daemons; an internal lock guards the rotation state.
#[derive(Default)]
pub struct LoadBalancer {
    apps: Mutex<HashMap<String, WeightedRoundRobin>>,
}

impl LoadBalancer {
    /// Creates an empty balancer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or reweights one placement of an application.
    pub fn set(&self, app_id: &str, key: &str, weight: u32) {
        self.apps
            .lock()
            .entry(app_id.to_owned())
            .or_default()
            .set(key, weight);
    }

    /// Updates an existing placement's weight.
    pub fn update(&self, app_id: &str, key: &str, weight: u32) {
        if let Some(wrr) = self.apps.lock().get_mut(app_id) {
            wrr.update(key, weight);
        }
    }

    /// Retires one placement of an application.
    pub fn remove(&self, app_id: &str, key: &str) {
        if let Some(wrr) = self.apps.lock().get_mut(app_id) {
            wrr.remove(key);
        }
    }

    /// The next placement key for an application, or `None` when it has no
    /// weighted placements.
    pub fn next(&self, app_id: &str) -> Option<String> {
        self.apps.lock().get_mut(app_id)?.next()
    }

    /// The weight of one placement, mostly for inspection.
    #[must_use]
    pub fn weight(&self, app_id: &str, key: &str) -> Option<u32> {
        self.apps.lock().get(app_id)?.weight(key)
    }
}
