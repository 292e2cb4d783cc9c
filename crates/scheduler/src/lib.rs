// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Placement scheduling: given the fleet state and the variant names
//! registered to an application, pick one `(variant, worker)` assignment.
//!
//! Three interchangeable strategies implement [`PlacementStrategy`]:
//!
//! - [`InfaasScheduler`]: highest profiled throughput wins, free memory
//!   breaks ties.
//! - [`RoomieScheduler`]: simulates kernel-level interference between
//!   co-resident variants and minimizes the predicted performance drop.
//! - [`UsherScheduler`]: balances compute-heavy against memory-heavy
//!   variants when packing workers.
//!
//! All strategies honor the GPU memory occupancy cap and skip variants with
//! no usable profile at a batch size.

use gpufleet_config::SchedulingPolicy;
use gpufleet_profile::ProfileCache;
use gpufleet_state::{Variant, Worker};
use std::sync::Arc;

pub mod error;
pub mod infaas;
pub mod roomie;
pub mod usher;

pub use error::Error;
pub use infaas::InfaasScheduler;
pub use roomie::RoomieScheduler;
pub use usher::UsherScheduler;

/// One proposed assignment: a freshly built, undeployed variant bound to a
/// worker snapshot.
#[derive(Debug, Clone)]
pub struct Placement {
    /// The candidate variant (`id` is 0 until the controller deploys it).
    pub variant: Variant,
    /// Snapshot of the worker the variant should land on.
    pub worker: Worker,
}

/// A placement strategy.
///
/// `schedule` is pure with respect to the fleet: it never mutates the
/// worker snapshots it is given. `Ok(None)` means no feasible placement
/// exists; `Err` is reserved for internal invariant violations. The caller
/// re-checks the occupancy cap before acting on the result.
pub trait PlacementStrategy: Send {
    /// Picks an assignment for one of the candidate variant names, or
    /// `None` when every combination is infeasible.
    fn schedule(
        &mut self,
        workers: &[Worker],
        candidates: &[String],
    ) -> Result<Option<Placement>, Error>;
}

/// Builds the strategy selected at configuration time.
#[must_use]
pub fn strategy_for(
    policy: SchedulingPolicy,
    cache: Arc<ProfileCache>,
) -> Box<dyn PlacementStrategy> {
    match policy {
        SchedulingPolicy::Infaas => Box::new(InfaasScheduler::new(cache)),
        SchedulingPolicy::Usher => Box::new(UsherScheduler::new(cache)),
        SchedulingPolicy::Roomie => Box::new(RoomieScheduler::new(cache)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use gpufleet_profile::{ProfileCache, ProfileLoader};
    use gpufleet_state::Worker;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) const GIB: u64 = 1 << 30;

    /// On-disk profile fixtures for scheduler tests.
    pub(crate) struct ProfileFixture {
        dir: TempDir,
    }

    impl ProfileFixture {
        pub(crate) fn new() -> Self {
            Self {
                dir: tempfile::tempdir().expect("tempdir"),
            }
        }

        /// Registers throughput and memory for a `(hardware, variant)` pair,
        /// one `(batch_size, qps, bytes)` entry per profiled batch size.
        pub(crate) fn add(&self, hardware: &str, name: &str, entries: &[(u32, f64, u64)]) {
            let memory_dir = self.dir.path().join("memory").join(hardware);
            let timing_dir = self.dir.path().join("inference-times").join(hardware);
            fs::create_dir_all(&memory_dir).expect("create memory dir");
            fs::create_dir_all(&timing_dir).expect("create timing dir");

            let mut memory = String::from("batch_size,total_reserved\n");
            let mut timing = String::from("batch_size,inference_time\n");
            for (batch_size, throughput, bytes) in entries {
                memory.push_str(&format!("{batch_size},{bytes}\n"));
                if *throughput > 0.0 {
                    timing.push_str(&format!(
                        "{batch_size},{}\n",
                        f64::from(*batch_size) / throughput
                    ));
                }
            }
            fs::write(memory_dir.join(format!("{name}.csv")), memory).expect("write memory");
            fs::write(timing_dir.join(format!("{name}.csv")), timing).expect("write timing");
        }

        /// Registers a kernel trace, one `(duration_us, occupancy_pct)` entry
        /// per kernel.
        pub(crate) fn add_kernels(
            &self,
            hardware: &str,
            name: &str,
            batch_size: u32,
            kernels: &[(f64, f64)],
        ) {
            let trace_dir = self.dir.path().join("traces").join(hardware);
            fs::create_dir_all(&trace_dir).expect("create trace dir");
            let mut trace = String::from(
                "kernel_name,grid_dim_x,grid_dim_y,grid_dim_z,block_dim_x,block_dim_y,\
                 block_dim_z,threads,registers_per_thread,static_shared_memory_per_block,\
                 dynamic_shared_memory_per_block,achieved_occupancy,duration\n",
            );
            for (index, (duration, occupancy)) in kernels.iter().enumerate() {
                trace.push_str(&format!(
                    "k{index},64,1,1,256,1,1,16384,32,1024,0,{occupancy},{duration}\n"
                ));
            }
            fs::write(
                trace_dir.join(format!("{name}_batch-size{batch_size}.csv")),
                trace,
            )
            .expect("write trace");
        }

        pub(crate) fn cache(&self) -> Arc<ProfileCache> {
            Arc::new(ProfileCache::new(ProfileLoader::new(self.dir.path())))
        }
    }

    pub(crate) fn worker(id: u32, platform: &str, total_gib: u64) -> Worker {
        let mut worker = Worker::new(id, platform);
        worker.set_total_memory(total_gib * GIB);
        worker
    }
}
