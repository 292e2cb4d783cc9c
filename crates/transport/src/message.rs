// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Wire message model: a timestamp, a kind, and a string-to-string payload.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The set of message kinds exchanged between fleet processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// An inference request: `{app_id}` towards the controller,
    /// `{variant_id, batch_size}` towards a worker.
    Query,
    /// Handshake between controller and worker; the reply carries
    /// `total_mem`.
    Hello,
    /// Signals connection teardown to the transport.
    Finished,
    /// Application registration from a generator.
    Register,
    /// Periodic telemetry from a worker: throughput and input-rate windows.
    ProfileData,
    /// Instructs a worker to terminate one variant's inference loop.
    Stop,
    /// Instructs a worker to spawn an inference loop for a new variant.
    Deploy,
    /// Acknowledges a completed deployment back to the controller.
    Deployed,
}

impl MessageKind {
    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Query => "QUERY",
            MessageKind::Hello => "HELLO",
            MessageKind::Finished => "FINISHED",
            MessageKind::Register => "REGISTER",
            MessageKind::ProfileData => "PROFILE_DATA",
            MessageKind::Stop => "STOP",
            MessageKind::Deploy => "DEPLOY",
            MessageKind::Deployed => "DEPLOYED",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed message: `{timestamp, type, data}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Seconds since the epoch at emission time; zero when unset.
    #[serde(default)]
    pub timestamp: f64,
    /// The message kind, serialized under the `type` key.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Free-form string payload.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Message {
    /// Creates a message of the given kind with an empty payload.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            timestamp: 0.0,
            kind,
            data: BTreeMap::new(),
        }
    }

    /// Creates a message with the given payload entries.
    pub fn with_data<I, K, V>(kind: MessageKind, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            timestamp: 0.0,
            kind,
            data: data
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets the emission timestamp (seconds since the epoch).
    #[must_use]
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Inserts one payload entry, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.data.insert(key.into(), value.into());
    }

    /// Returns a payload field, or an error naming the missing key.
    pub fn field(&self, key: &str) -> Result<&str, Error> {
        self.data
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingField {
                kind: self.kind,
                field: key.to_owned(),
            })
    }

    /// Returns a payload field if present.
    #[must_use]
    pub fn opt_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Parses a payload field into any `FromStr` type.
    pub fn parse_field<T: FromStr>(&self, key: &str) -> Result<T, Error> {
        let raw = self.field(key)?;
        raw.parse().map_err(|_| Error::InvalidField {
            kind: self.kind,
            field: key.to_owned(),
            value: raw.to_owned(),
        })
    }

    /// Serializes to the single-line wire form.
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|source| Error::Encode {
            kind: self.kind,
            source,
        })
    }

    /// Parses a wire line back into a message.
    pub fn decode(line: &str) -> Result<Self, Error> {
        serde_json::from_str(line).map_err(|source| Error::Decode { source })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.kind, self.data)
    }
}
