// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! INFaaS-style placement: profiled throughput first, free memory second.

use crate::{Error, Placement, PlacementStrategy};
use gpufleet_profile::{BATCH_SIZES, ProfileCache};
use gpufleet_state::{MAX_GPU_MEMORY_OCCUPANCY, Variant, Worker};
use std::sync::Arc;
use tracing::warn;

/// Picks the feasible candidate with the highest profiled throughput,
/// breaking ties towards the worker with the most free memory.
pub struct InfaasScheduler {
    cache: Arc<ProfileCache>,
}

impl InfaasScheduler {
    /// Creates the strategy over a shared profile cache.
    #[must_use]
    pub fn new(cache: Arc<ProfileCache>) -> Self {
        Self { cache }
    }
}

impl PlacementStrategy for InfaasScheduler {
    fn schedule(
        &mut self,
        workers: &[Worker],
        candidates: &[String],
    ) -> Result<Option<Placement>, Error> {
        let mut feasible = Vec::new();
        for name in candidates {
            for worker in workers {
                let profile = self.cache.load(worker.hardware_platform(), name);
                for batch_size in BATCH_SIZES {
                    let variant = Variant::from_profile(profile.clone(), batch_size);
                    if !variant.deployable()
                        || worker.percent_occupation(variant.memory()) > MAX_GPU_MEMORY_OCCUPANCY
                    {
                        continue;
                    }
                    feasible.push(Placement {
                        variant,
                        worker: worker.clone(),
                    });
                }
            }
        }

        if feasible.is_empty() {
            warn!(?candidates, "no feasible placement");
            return Ok(None);
        }

        feasible.sort_by(|a, b| {
            b.variant
                .profile_throughput()
                .total_cmp(&a.variant.profile_throughput())
                .then_with(|| b.worker.free_memory().cmp(&a.worker.free_memory()))
        });
        Ok(feasible.into_iter().next())
    }
}
