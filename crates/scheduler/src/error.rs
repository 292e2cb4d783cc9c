// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the scheduler crate.

/// Errors that can occur while computing a placement.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The interference heuristic predicted a duration below the isolated
    /// one, which can only happen on corrupt profile data.
    #[error(
        "interference heuristic lowered a duration for co-resident models [{models}]\n\
         \tisolated durations: {isolated:?}\n\
         \tinterfered durations: {interfered:?}"
    )]
    InterferenceInvariant {
        /// `(name, batch size)` of every co-resident model, formatted.
        models: String,
        /// Isolated duration per model, in microseconds.
        isolated: Vec<f64>,
        /// Predicted co-located duration per model, in microseconds.
        interfered: Vec<f64>,
    },
}
