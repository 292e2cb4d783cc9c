// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A model variant: a model name bound to a batch size and hardware
//! platform, together with its runtime counters.

use gpufleet_profile::{Kernel, VariantProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Length of the per-second arrival window carried by every variant.
pub const INPUT_RATE_WINDOW: usize = 10;

/// A deployable (or deployed) model variant.
///
/// The offline profile is shared and immutable; the runtime fields
/// (`qsize`, achieved throughput, arrival window) are overwritten by
/// telemetry. An `id` of 0 means the variant has not been deployed yet.
#[derive(Debug, Clone)]
pub struct Variant {
    /// Deployment id, minted by the controller at deploy time.
    pub id: u32,
    /// Model name, e.g. `resnet50`.
    pub name: String,
    /// Hardware platform the profile was captured on.
    pub hardware_platform: String,
    /// Batch size this variant serves.
    pub batch_size: u32,
    /// Number of batches queued at the owning worker.
    pub qsize: u32,
    achieved_throughput: f64,
    input_rates: [u32; INPUT_RATE_WINDOW],
    profile: Arc<VariantProfile>,
}

impl Variant {
    /// Creates an undeployed candidate from an offline profile.
    #[must_use]
    pub fn from_profile(profile: Arc<VariantProfile>, batch_size: u32) -> Self {
        Self {
            id: 0,
            name: profile.name().to_owned(),
            hardware_platform: profile.hardware_platform().to_owned(),
            batch_size,
            qsize: 0,
            achieved_throughput: 0.0,
            input_rates: [0; INPUT_RATE_WINDOW],
            profile,
        }
    }

    /// Creates a worker-side mirror from a `DEPLOY` payload. Such mirrors
    /// carry no profiled data; their throughput is purely the achieved one.
    pub fn from_deploy(
        id: u32,
        name: impl Into<String>,
        hardware_platform: impl Into<String>,
        batch_size: u32,
    ) -> Self {
        let name = name.into();
        let hardware_platform = hardware_platform.into();
        let profile = Arc::new(VariantProfile::empty(&name, &hardware_platform));
        Self {
            id,
            name,
            hardware_platform,
            batch_size,
            qsize: 0,
            achieved_throughput: 0.0,
            input_rates: [0; INPUT_RATE_WINDOW],
            profile,
        }
    }

    /// The shared offline profile.
    #[must_use]
    pub fn profile(&self) -> &Arc<VariantProfile> {
        &self.profile
    }

    /// Offline throughput at this variant's batch size, in qps.
    #[must_use]
    pub fn profile_throughput(&self) -> f64 {
        self.profile.throughput(self.batch_size)
    }

    /// Memory footprint at this variant's batch size, in bytes.
    #[must_use]
    pub fn memory(&self) -> u64 {
        self.profile.memory(self.batch_size)
    }

    /// Ordered kernel launches at this variant's batch size.
    #[must_use]
    pub fn kernels(&self) -> &[Kernel] {
        self.profile.kernels(self.batch_size)
    }

    /// Whether the variant has a usable profile at its batch size.
    #[must_use]
    pub fn deployable(&self) -> bool {
        self.profile.deployable(self.batch_size)
    }

    /// Sum of the profiled kernel durations, in microseconds.
    #[must_use]
    pub fn isolated_duration(&self) -> f64 {
        self.kernels().iter().map(|kernel| kernel.duration).sum()
    }

    /// Last observed throughput, or the profiled one while nothing has been
    /// observed yet.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.achieved_throughput > 0.0 {
            self.achieved_throughput
        } else {
            self.profile_throughput()
        }
    }

    /// The last observed throughput, 0.0 before the first observation.
    #[must_use]
    pub fn achieved_throughput(&self) -> f64 {
        self.achieved_throughput
    }

    /// Overwrites the observed throughput.
    pub fn set_throughput(&mut self, achieved: f64) {
        self.achieved_throughput = achieved;
    }

    /// The per-second arrival window, most recent second first.
    #[must_use]
    pub fn input_rates(&self) -> &[u32; INPUT_RATE_WINDOW] {
        &self.input_rates
    }

    /// Pushes the latest per-second arrival count, discarding the oldest.
    pub fn record_input_rate(&mut self, count: u32) {
        self.input_rates.rotate_right(1);
        self.input_rates[0] = count;
    }

    /// Overwrites the window from telemetry. The window length never
    /// changes; surplus telemetry entries are ignored.
    pub fn set_input_rates(&mut self, rates: &[u32]) {
        for (slot, value) in self.input_rates.iter_mut().zip(rates) {
            *slot = *value;
        }
    }

    /// Pending work: queued batches plus everything that arrived within the
    /// window.
    #[must_use]
    pub fn workload(&self) -> f64 {
        f64::from(self.qsize) + f64::from(self.input_rates.iter().sum::<u32>())
    }

    /// Throughput scaled to the arrival window.
    #[must_use]
    pub fn effective_throughput(&self) -> f64 {
        self.throughput() * INPUT_RATE_WINDOW as f64
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Variant(id={}, name={}, thr={:.1}, bs={}, mem={})",
            self.id,
            self.name,
            self.throughput(),
            self.batch_size,
            self.memory()
        )
    }
}

/// One variant's entry in a worker's `PROFILE_DATA` report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Deployment id of the reported variant.
    pub variant_id: u32,
    /// Model name of the reported variant.
    pub variant_name: String,
    /// Last observed throughput, in qps.
    pub throughput: f64,
    /// The arrival window, most recent second first.
    pub input_rate: Vec<u32>,
}

impl From<&Variant> for ProfileRecord {
    fn from(variant: &Variant) -> Self {
        Self {
            variant_id: variant.id,
            variant_name: variant.name.clone(),
            throughput: variant.throughput(),
            input_rate: variant.input_rates().to_vec(),
        }
    }
}
