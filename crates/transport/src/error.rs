// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the transport crate.

use crate::message::MessageKind;

/// Errors that can occur while encoding, decoding, or moving messages.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A message could not be serialized to its wire form.
    #[error("failed to encode `{kind}` message: {source}")]
    Encode {
        /// Kind of the message that failed to encode.
        kind: MessageKind,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A wire payload could not be parsed as a message.
    #[error("failed to decode message: {source}")]
    Decode {
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A required payload field was absent.
    #[error("`{kind}` message is missing field `{field}`")]
    MissingField {
        /// Kind of the offending message.
        kind: MessageKind,
        /// Name of the missing field.
        field: String,
    },

    /// A payload field carried a value that could not be parsed.
    #[error("field `{field}` of `{kind}` message has invalid value `{value}`")]
    InvalidField {
        /// Kind of the offending message.
        kind: MessageKind,
        /// Name of the invalid field.
        field: String,
        /// The raw value as received.
        value: String,
    },

    /// Binding the listening socket failed.
    #[error("failed to bind `{addr}`: {source}")]
    Bind {
        /// The local address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to a remote endpoint failed after all retries.
    #[error("connection to `{addr}` failed after {attempts} attempts: {source}")]
    Connect {
        /// The remote address.
        addr: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The last connection error observed.
        #[source]
        source: std::io::Error,
    },
}
