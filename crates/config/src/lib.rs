// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for fleet processes.
//!
//! Every process (query generator, controller, worker) is described by one
//! JSON file:
//!
//! ```json
//! {
//!   "id": 1,
//!   "type": "Controller",
//!   "host": "0.0.0.0",
//!   "port": 9001,
//!   "parameters": { "scheduling": "UsherSchaduling", "log_dir": "logs" },
//!   "remote_engines": [ { "remote_host": "10.0.0.2", "remote_port": 9002 } ]
//! }
//! ```
//!
//! `host`/`port` describe the process's own listening endpoint (a port of 0
//! disables it); `remote_engines` lists the endpoints it connects out to.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

pub mod error;

pub use error::Error;

/// The kind of engine a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// Replays a query trace against the controller.
    PoissonZipfQueryGenerator,
    /// The central controller.
    Controller,
    /// A GPU worker.
    WorkerEngine,
}

impl EngineKind {
    /// The configuration-file spelling of this engine kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineKind::PoissonZipfQueryGenerator => "PoissonZipfQueryGenerator",
            EngineKind::Controller => "Controller",
            EngineKind::WorkerEngine => "WorkerEngine",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing connection of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Host of the remote engine.
    pub remote_host: String,
    /// Port of the remote engine.
    pub remote_port: u16,
}

/// The placement strategy a controller runs.
///
/// The wire spellings are historical; any unrecognized value selects Roomie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    /// Throughput-first placement.
    Infaas,
    /// Compute/memory-balance-driven placement.
    Usher,
    /// Interference-aware placement.
    #[default]
    Roomie,
}

impl SchedulingPolicy {
    /// The configuration-file spelling of this policy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::Infaas => "INFaaSSchaduling",
            SchedulingPolicy::Usher => "UsherSchaduling",
            SchedulingPolicy::Roomie => "RoomieSchaduling",
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SchedulingPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SchedulingPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "INFaaSSchaduling" => SchedulingPolicy::Infaas,
            "UsherSchaduling" => SchedulingPolicy::Usher,
            _ => SchedulingPolicy::Roomie,
        })
    }
}

/// Parameters of a query generator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorParams {
    /// Experiment duration, in minutes.
    pub duration: f64,
    /// Nominal query rate the trace was generated for, informational.
    pub qps: u32,
    /// Variant names the generator registers and queries.
    pub domain: Vec<String>,
    /// Path of the query trace CSV (`timestamp,model` rows).
    pub path: PathBuf,
}

impl GeneratorParams {
    /// Experiment duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration * 60.0
    }
}

/// Parameters of a controller process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerParams {
    /// The placement strategy to run.
    pub scheduling: SchedulingPolicy,
    /// Directory for controller logs, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Root of the offline profile artifacts; defaults to `data/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Parameters of a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerParams {
    /// Index of the GPU device this worker drives.
    pub device: u32,
    /// The worker's hardware platform name (keys the profile artifacts).
    pub hardware_platform: String,
    /// Directory for the inference log, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Per-engine-kind parameters.
///
/// The variants have disjoint required fields, so the JSON shape alone
/// identifies the right one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameters {
    /// Generator parameters.
    Generator(GeneratorParams),
    /// Worker parameters.
    Worker(WorkerParams),
    /// Controller parameters.
    Controller(ControllerParams),
}

impl Parameters {
    const fn shape_name(&self) -> &'static str {
        match self {
            Parameters::Generator(_) => "generator",
            Parameters::Worker(_) => "worker",
            Parameters::Controller(_) => "controller",
        }
    }
}

/// Top-level configuration of one fleet process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identifier of this process.
    pub id: u32,
    /// The engine kind this process runs.
    #[serde(rename = "type")]
    pub kind: EngineKind,
    /// Host of this process's own listening endpoint.
    pub host: String,
    /// Port of this process's own listening endpoint; 0 disables it.
    #[serde(default)]
    pub port: u16,
    /// Engine-kind-specific parameters.
    pub parameters: Parameters,
    /// Endpoints this process connects out to.
    #[serde(default)]
    pub remote_engines: Vec<RemoteEndpoint>,
}

impl EngineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| Error::DeserializationError {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// The generator parameters, or an error if the file declares another
    /// shape.
    pub fn generator(&self) -> Result<&GeneratorParams, Error> {
        match &self.parameters {
            Parameters::Generator(params) => Ok(params),
            other => Err(self.mismatch("generator", other)),
        }
    }

    /// The controller parameters, or an error if the file declares another
    /// shape.
    pub fn controller(&self) -> Result<&ControllerParams, Error> {
        match &self.parameters {
            Parameters::Controller(params) => Ok(params),
            other => Err(self.mismatch("controller", other)),
        }
    }

    /// The worker parameters, or an error if the file declares another
    /// shape.
    pub fn worker(&self) -> Result<&WorkerParams, Error> {
        match &self.parameters {
            Parameters::Worker(params) => Ok(params),
            other => Err(self.mismatch("worker", other)),
        }
    }

    fn mismatch(&self, expected: &'static str, actual: &Parameters) -> Error {
        Error::MismatchedParameters {
            engine: self.kind.as_str(),
            expected,
            actual: actual.shape_name(),
        }
    }
}
