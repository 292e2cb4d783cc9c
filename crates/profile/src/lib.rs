// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Pre-profiled metadata for model variants.
//!
//! Every variant is profiled offline per batch size: its kernel launches,
//! its memory footprint, and its measured inference times. The resulting
//! [`VariantProfile`] is immutable; schedulers consume it through the
//! process-wide [`ProfileCache`].

use std::collections::BTreeMap;

pub mod cache;
pub mod kernel;
pub mod loader;

pub use cache::ProfileCache;
pub use kernel::Kernel;
pub use loader::ProfileLoader;

/// The batch sizes variants are profiled (and deployed) at.
pub const BATCH_SIZES: [u32; 3] = [32, 64, 128];

/// Immutable offline profile of one `(hardware platform, variant)` pair.
///
/// Accessors return zero or empty values for batch sizes that were never
/// profiled; a variant whose throughput is zero at a batch size is not
/// deployable at that batch size.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantProfile {
    name: String,
    hardware_platform: String,
    throughput: BTreeMap<u32, f64>,
    memory: BTreeMap<u32, u64>,
    kernels: BTreeMap<u32, Vec<Kernel>>,
}

impl VariantProfile {
    /// Creates a profile with no measurements, e.g. for worker-side variant
    /// mirrors that never consult profiled data.
    pub fn empty(name: impl Into<String>, hardware_platform: impl Into<String>) -> Self {
        Self::from_parts(
            name,
            hardware_platform,
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    /// Assembles a profile from already-loaded tables.
    pub fn from_parts(
        name: impl Into<String>,
        hardware_platform: impl Into<String>,
        throughput: BTreeMap<u32, f64>,
        memory: BTreeMap<u32, u64>,
        kernels: BTreeMap<u32, Vec<Kernel>>,
    ) -> Self {
        Self {
            name: name.into(),
            hardware_platform: hardware_platform.into(),
            throughput,
            memory,
            kernels,
        }
    }

    /// The variant name this profile describes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hardware platform this profile was captured on.
    #[must_use]
    pub fn hardware_platform(&self) -> &str {
        &self.hardware_platform
    }

    /// Profiled throughput in queries per second, 0.0 if unprofiled.
    #[must_use]
    pub fn throughput(&self, batch_size: u32) -> f64 {
        self.throughput.get(&batch_size).copied().unwrap_or(0.0)
    }

    /// Profiled memory footprint in bytes, 0 if unprofiled.
    #[must_use]
    pub fn memory(&self, batch_size: u32) -> u64 {
        self.memory.get(&batch_size).copied().unwrap_or(0)
    }

    /// The ordered kernel launches of one forward pass.
    #[must_use]
    pub fn kernels(&self, batch_size: u32) -> &[Kernel] {
        self.kernels
            .get(&batch_size)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the variant can be deployed at this batch size.
    #[must_use]
    pub fn deployable(&self, batch_size: u32) -> bool {
        self.throughput(batch_size) > 0.0
    }
}

/// Median of a sample; 0.0 for an empty one.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprofiled_batch_sizes_read_as_zero() {
        let profile = VariantProfile::from_parts(
            "resnet50",
            "xavier",
            BTreeMap::from([(32, 200.0)]),
            BTreeMap::from([(32, 2 << 30)]),
            BTreeMap::new(),
        );

        assert!(profile.deployable(32));
        assert!(!profile.deployable(64));
        assert_eq!(profile.throughput(64), 0.0);
        assert_eq!(profile.memory(64), 0);
        assert!(profile.kernels(32).is_empty());
    }

    #[test]
    fn median_handles_odd_even_and_empty_samples() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0]), 3.0);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
