// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Replays a pre-generated Poisson/Zipf query trace against a controller.
//!
//! The trace CSV holds `timestamp,model` rows: an arrival offset in seconds
//! and an index into the configured variant domain. Each model's arrivals
//! are replayed on their own task with the original inter-arrival gaps, so
//! the controller sees the trace's temporal shape.

use gpufleet_config::{EngineConfig, GeneratorParams};
use gpufleet_transport::{Message, MessageKind, Outlet};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;
use tracing::{error, info};

pub mod error;

pub use error::Error;

#[derive(Debug, Deserialize)]
struct TraceRow {
    timestamp: f64,
    model: usize,
}

/// The query generator engine.
pub struct QueryGenerator {
    params: GeneratorParams,
    outlet: Arc<Outlet>,
}

impl QueryGenerator {
    /// Builds the generator from its configuration; the first remote engine
    /// is the controller. Must be called inside a tokio runtime.
    pub fn new(config: &EngineConfig) -> Result<Self, Error> {
        let params = config.generator()?.clone();
        if params.domain.is_empty() {
            return Err(Error::EmptyDomain);
        }
        let controller = config.remote_engines.first().ok_or(Error::NoController)?;
        let outlet = Arc::new(Outlet::connect(
            config.id,
            &controller.remote_host,
            controller.remote_port,
        ));
        Ok(Self { params, outlet })
    }

    /// Registers the domain, replays the trace, and tears the connection
    /// down when every replay task has drained.
    pub async fn run(&self) -> Result<(), Error> {
        info!(
            duration_secs = self.params.duration_secs(),
            qps = self.params.qps,
            domain = ?self.params.domain,
            path = %self.params.path.display(),
            "query generator running"
        );

        self.outlet.push(Message::with_data(
            MessageKind::Register,
            self.params
                .domain
                .iter()
                .map(|name| (name.clone(), name.clone())),
        ));

        let trace = self.load_trace()?;
        let mut replays = JoinSet::new();
        for (index, mut timestamps) in trace {
            let app_id = self.params.domain[index % self.params.domain.len()].clone();
            let outlet = self.outlet.clone();
            let _ = replays.spawn(async move {
                timestamps.sort_by(f64::total_cmp);
                let mut clock = 0.0;
                let mut sent = 0u64;
                for timestamp in timestamps {
                    let gap = timestamp - clock;
                    if gap > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(gap)).await;
                    }
                    outlet.push(
                        Message::with_data(MessageKind::Query, [("app_id", app_id.clone())])
                            .at(unix_now()),
                    );
                    clock = timestamp;
                    sent += 1;
                }
                (app_id, sent)
            });
        }

        while let Some(result) = replays.join_next().await {
            match result {
                Ok((app_id, sent)) => info!(%app_id, sent, "replay drained"),
                Err(err) => error!(%err, "replay task failed"),
            }
        }

        self.outlet.finish();
        Ok(())
    }

    /// Loads the trace, keeping arrivals within the configured duration and
    /// grouping them per model index.
    fn load_trace(&self) -> Result<HashMap<usize, Vec<f64>>, Error> {
        let mut reader =
            csv::Reader::from_path(&self.params.path).map_err(|err| Error::TraceRead {
                path: self.params.path.clone(),
                details: err.to_string(),
            })?;
        let horizon = self.params.duration_secs();
        let mut trace: HashMap<usize, Vec<f64>> = HashMap::new();
        for row in reader.deserialize::<TraceRow>() {
            let row = row.map_err(|err| Error::TraceRead {
                path: self.params.path.clone(),
                details: err.to_string(),
            })?;
            if row.timestamp <= horizon {
                trace.entry(row.model).or_default().push(row.timestamp);
            }
        }
        Ok(trace)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
