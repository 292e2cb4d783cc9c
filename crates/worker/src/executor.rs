// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The device boundary: inference execution is an opaque callable that
//! returns an elapsed time per batch.

use crate::error::Error;
use std::time::Duration;

/// Shape of the synthetic input one forward pass consumes, after the batch
/// dimension: channels, height, width.
pub const SYNTHETIC_INPUT_DIMS: [u32; 3] = [3, 224, 224];

/// Device memory figures, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Memory not currently allocated.
    pub free: u64,
    /// Total device memory.
    pub total: u64,
}

/// The GPU context a worker engine drives.
///
/// Implementations should return from `load` and `forward` promptly or run
/// the engine on a multi-threaded runtime, since the inference daemons call
/// them in-line.
pub trait InferenceExecutor: Send + Sync {
    /// Free and total device memory.
    fn memory_info(&self) -> MemoryInfo;

    /// Loads the model artifact of one variant at the given batch size.
    fn load(&self, name: &str, batch_size: u32) -> Result<Box<dyn LoadedModel>, Error>;
}

/// One loaded model instance.
pub trait LoadedModel: Send {
    /// Runs one forward pass over a synthetic
    /// `(batch, SYNTHETIC_INPUT_DIMS)` input and returns the elapsed time.
    fn forward(&mut self) -> Result<Duration, Error>;
}

/// Deterministic device stand-in for tests and CPU-only runs: the reported
/// latency grows linearly with the batch size, no time actually passes.
#[derive(Debug, Clone)]
pub struct SyntheticExecutor {
    total_memory: u64,
    per_sample_latency: Duration,
}

impl SyntheticExecutor {
    /// Creates a synthetic device with the given memory and per-sample
    /// latency.
    #[must_use]
    pub fn new(total_memory: u64, per_sample_latency: Duration) -> Self {
        Self {
            total_memory,
            per_sample_latency,
        }
    }
}

impl Default for SyntheticExecutor {
    fn default() -> Self {
        Self::new(16 << 30, Duration::from_micros(500))
    }
}

impl InferenceExecutor for SyntheticExecutor {
    fn memory_info(&self) -> MemoryInfo {
        MemoryInfo {
            free: self.total_memory,
            total: self.total_memory,
        }
    }

    fn load(&self, _name: &str, batch_size: u32) -> Result<Box<dyn LoadedModel>, Error> {
        Ok(Box::new(SyntheticModel {
            latency: self.per_sample_latency * batch_size,
        }))
    }
}

struct SyntheticModel {
    latency: Duration,
}

impl LoadedModel for SyntheticModel {
    fn forward(&mut self) -> Result<Duration, Error> {
        Ok(self.latency)
    }
}
