// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the generator crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur in the query generator.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The generator configuration is unusable.
    #[error("invalid generator configuration: {0}")]
    Config(#[from] gpufleet_config::Error),

    /// The configuration names no controller to connect to.
    #[error("generator configuration lists no remote engine")]
    NoController,

    /// The configured domain holds no variant names.
    #[error("generator domain is empty")]
    EmptyDomain,

    /// The query trace could not be read.
    #[error("failed to read query trace `{path}`: {details}")]
    TraceRead {
        /// Path of the trace file.
        path: PathBuf,
        /// A description of the failure.
        details: String,
    },
}
