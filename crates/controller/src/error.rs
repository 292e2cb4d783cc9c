// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the controller crate.

use miette::Diagnostic;

/// Errors that can occur in the controller.
///
/// Daemons catch these at their top level, log, and continue; only
/// configuration errors abort startup.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The controller configuration is unusable.
    #[error("invalid controller configuration: {0}")]
    Config(#[from] gpufleet_config::Error),

    /// A transport endpoint failed.
    #[error("transport error: {0}")]
    Transport(#[from] gpufleet_transport::Error),

    /// The placement strategy reported an invariant violation.
    #[error("scheduling failed: {0}")]
    Scheduler(#[from] gpufleet_scheduler::Error),

    /// A message referenced a worker the controller does not know.
    #[error("no worker with id {worker_id}")]
    UnknownWorker {
        /// The unresolved worker id.
        worker_id: u32,
    },

    /// A deployment would exceed the memory occupancy cap.
    #[error(
        "deploying would put worker {worker_id} at {occupation:.1}% \
         of its memory (limit {limit}%)"
    )]
    OccupancyExceeded {
        /// The targeted worker.
        worker_id: u32,
        /// Occupation the deployment would reach, in percent.
        occupation: f64,
        /// The configured cap, in percent.
        limit: f64,
    },

    /// A `PROFILE_DATA` payload could not be parsed.
    #[error("malformed telemetry from worker {worker_id}: {details}")]
    MalformedTelemetry {
        /// The reporting worker.
        worker_id: u32,
        /// A description of the parse failure.
        details: String,
    },
}
