// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! One GPU kernel launch within a variant's forward pass.

use serde::{Deserialize, Serialize};

/// A profiled kernel launch.
///
/// Rows come straight out of the per-batch-size kernel trace CSV, so the
/// field names match the trace columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Mangled kernel name, as reported by the profiler.
    pub kernel_name: String,
    /// Grid width.
    pub grid_dim_x: u32,
    /// Grid height.
    pub grid_dim_y: u32,
    /// Grid depth.
    pub grid_dim_z: u32,
    /// Block width.
    pub block_dim_x: u32,
    /// Block height.
    pub block_dim_y: u32,
    /// Block depth.
    pub block_dim_z: u32,
    /// Total threads of the launch.
    pub threads: u32,
    /// Registers required per thread.
    pub registers_per_thread: u32,
    /// Static shared memory per block, in bytes.
    pub static_shared_memory_per_block: f64,
    /// Dynamic shared memory per block, in bytes.
    pub dynamic_shared_memory_per_block: f64,
    /// Achieved occupancy, as a percentage of SM warp capacity.
    pub achieved_occupancy: f64,
    /// Kernel duration, in microseconds.
    pub duration: f64,
}

impl Kernel {
    /// Threads per block of the launch.
    #[must_use]
    pub fn thread_block(&self) -> u32 {
        self.block_dim_x * self.block_dim_y * self.block_dim_z
    }

    /// Total shared memory per block, in bytes.
    #[must_use]
    pub fn shared_memory_per_block(&self) -> f64 {
        self.static_shared_memory_per_block + self.dynamic_shared_memory_per_block
    }
}
