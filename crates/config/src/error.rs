// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while loading or interrogating a configuration.
///
/// All of these are fatal at startup: a process with an unreadable or
/// malformed configuration exits non-zero.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("failed to read configuration file `{path}`: {details}")]
    #[diagnostic(code(gpufleet_config::file_read_error))]
    FileReadError {
        /// Path of the configuration file.
        path: PathBuf,
        /// A description of the error that occurred.
        details: String,
    },

    /// The configuration file is not valid JSON or does not match the model.
    #[error("failed to parse configuration file `{path}`: {details}")]
    #[diagnostic(code(gpufleet_config::deserialization_error))]
    DeserializationError {
        /// Path of the configuration file.
        path: PathBuf,
        /// A description of the error that occurred.
        details: String,
    },

    /// The `parameters` block does not match the declared engine type.
    #[error("engine type `{engine}` expects {expected} parameters, found {actual}")]
    #[diagnostic(code(gpufleet_config::mismatched_parameters))]
    MismatchedParameters {
        /// The declared engine type.
        engine: &'static str,
        /// The parameter shape the engine type requires.
        expected: &'static str,
        /// The parameter shape actually present in the file.
        actual: &'static str,
    },
}
