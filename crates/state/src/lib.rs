// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory model of the fleet: model variants bound to batch sizes,
//! workers owning their running variants, the controller's datastore, and
//! the weighted-round-robin load balancer.

pub mod balancer;
pub mod datastore;
pub mod idgen;
pub mod variant;
pub mod worker;

pub use balancer::{LoadBalancer, WeightedRoundRobin};
pub use datastore::DataStore;
pub use idgen::IdGenerator;
pub use variant::{INPUT_RATE_WINDOW, ProfileRecord, Variant};
pub use worker::Worker;

/// Highest tolerated GPU memory occupation, in percent. A deployment that
/// would push a worker past this line is rejected.
pub const MAX_GPU_MEMORY_OCCUPANCY: f64 = 90.0;
