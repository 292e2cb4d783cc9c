// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The controller-side mirror of one GPU worker.

use crate::variant::Variant;
use std::fmt;

/// A server owning one GPU and the variants running on it.
///
/// `total_memory` is 0 until the HELLO handshake reports it; every placement
/// check fails on such a worker.
#[derive(Debug, Clone)]
pub struct Worker {
    id: u32,
    hardware_platform: String,
    total_memory: u64,
    deploying: bool,
    variants: Vec<Variant>,
}

impl Worker {
    /// Creates a worker mirror with no memory report yet.
    pub fn new(id: u32, hardware_platform: impl Into<String>) -> Self {
        Self {
            id,
            hardware_platform: hardware_platform.into(),
            total_memory: 0,
            deploying: false,
            variants: Vec::new(),
        }
    }

    /// Identifier assigned at controller configuration time.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The worker's hardware platform name.
    #[must_use]
    pub fn hardware_platform(&self) -> &str {
        &self.hardware_platform
    }

    /// Overwrites the platform name once the worker reports it.
    pub fn set_hardware_platform(&mut self, platform: impl Into<String>) {
        self.hardware_platform = platform.into();
    }

    /// Usable GPU memory in bytes, as established by the handshake.
    #[must_use]
    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    /// Records the usable GPU memory.
    pub fn set_total_memory(&mut self, bytes: u64) {
        self.total_memory = bytes;
    }

    /// Whether a deployment is currently in flight on this worker.
    #[must_use]
    pub fn deploying(&self) -> bool {
        self.deploying
    }

    /// Sets or clears the in-flight deployment barrier.
    pub fn set_deploying(&mut self, value: bool) {
        self.deploying = value;
    }

    /// The variants currently hosted, in deployment order.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub(crate) fn variants_mut(&mut self) -> &mut Vec<Variant> {
        &mut self.variants
    }

    /// Appends a variant to the hosted set.
    pub fn add_variant(&mut self, variant: Variant) {
        self.variants.push(variant);
    }

    /// Detaches a variant by id.
    pub fn remove_variant(&mut self, variant_id: u32) -> Option<Variant> {
        let index = self.variants.iter().position(|v| v.id == variant_id)?;
        Some(self.variants.remove(index))
    }

    /// The hosted variant with the given id, if any.
    #[must_use]
    pub fn find_variant(&self, variant_id: u32) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Memory consumed by the hosted variants, in bytes.
    #[must_use]
    pub fn used_memory(&self) -> u64 {
        self.variants.iter().map(Variant::memory).sum()
    }

    /// Memory left for further deployments, in bytes.
    #[must_use]
    pub fn free_memory(&self) -> u64 {
        self.total_memory.saturating_sub(self.used_memory())
    }

    /// Occupation in percent after hypothetically adding `additional`
    /// bytes. Infinite while the handshake has not reported any memory, so
    /// placement checks reject the worker.
    #[must_use]
    pub fn percent_occupation(&self, additional: u64) -> f64 {
        if self.total_memory == 0 {
            return f64::INFINITY;
        }
        let used = self.used_memory() + additional;
        used as f64 / self.total_memory as f64 * 100.0
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.variants.iter().map(|v| v.name.as_str()).collect();
        write!(
            f,
            "Worker(id={}, free={}, total={}, platform={}, deploying={}, variants={names:?})",
            self.id,
            self.free_memory(),
            self.total_memory,
            self.hardware_platform,
            self.deploying
        )
    }
}
