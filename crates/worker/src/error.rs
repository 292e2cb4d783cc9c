// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the worker crate.

use miette::Diagnostic;

/// Errors that can occur in the worker engine.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The worker configuration is unusable.
    #[error("invalid worker configuration: {0}")]
    Config(#[from] gpufleet_config::Error),

    /// The configuration names no controller to connect back to.
    #[error("worker configuration lists no remote engine")]
    NoController,

    /// A transport endpoint failed.
    #[error("transport error: {0}")]
    Transport(#[from] gpufleet_transport::Error),

    /// A model artifact could not be loaded onto the device.
    #[error("failed to load model `{name}`: {details}")]
    ModelLoad {
        /// The model that failed to load.
        name: String,
        /// A description of the failure.
        details: String,
    },

    /// A forward pass failed on the device.
    #[error("inference failed for `{name}`: {details}")]
    Inference {
        /// The model whose forward pass failed.
        name: String,
        /// A description of the failure.
        details: String,
    },

    /// The inference log could not be written.
    #[error("inference log error: {0}")]
    Log(#[from] std::io::Error),

    /// The inference log could not be serialized.
    #[error("inference log row error: {0}")]
    LogRow(#[from] csv::Error),
}
