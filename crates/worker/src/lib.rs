// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The worker engine: one process per GPU.
//!
//! A worker answers the controller's handshake with its device memory,
//! spawns one inference daemon per deployed variant, tracks per-second
//! arrival rates, and reports throughput and arrival windows back to the
//! controller every few seconds.
//!
//! The GPU itself sits behind [`InferenceExecutor`], so the engine (and its
//! tests) can run against the deterministic [`SyntheticExecutor`].

use gpufleet_channel::BlockingQueue;
use gpufleet_config::{EngineConfig, WorkerParams};
use gpufleet_state::{ProfileRecord, Variant};
use gpufleet_transport::{Inlet, Message, MessageKind, Outlet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub mod error;
pub mod executor;
pub mod inference_log;

pub use error::Error;
pub use executor::{
    InferenceExecutor, LoadedModel, MemoryInfo, SYNTHETIC_INPUT_DIMS, SyntheticExecutor,
};
pub use inference_log::InferenceLog;

/// Queue token that terminates a variant's inference loop.
const STOP_TOKEN: u32 = 0;

/// The worker engine.
pub struct WorkerEngine {
    host: String,
    port: u16,
    params: WorkerParams,
    executor: Arc<dyn InferenceExecutor>,
    outlet: Outlet,
    deployment_queue: BlockingQueue<Message>,
    inference_queues: Mutex<HashMap<u32, BlockingQueue<u32>>>,
    num_received: Mutex<HashMap<u32, u64>>,
    variants: Mutex<HashMap<u32, Variant>>,
    worker_id: AtomicU32,
    log: Mutex<Option<InferenceLog>>,
    monitor_interval: Duration,
    telemetry_interval: Duration,
}

impl WorkerEngine {
    /// Builds the engine from its configuration; the first remote engine is
    /// the controller. Must be called inside a tokio runtime.
    pub fn new(
        config: &EngineConfig,
        executor: Arc<dyn InferenceExecutor>,
    ) -> Result<Self, Error> {
        let params = config.worker()?.clone();
        let controller = config.remote_engines.first().ok_or(Error::NoController)?;
        let outlet = Outlet::connect(config.id, &controller.remote_host, controller.remote_port);
        info!(
            device = params.device,
            platform = %params.hardware_platform,
            controller = %outlet.remote_addr(),
            "worker configured"
        );
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            params,
            executor,
            outlet,
            deployment_queue: BlockingQueue::new(),
            inference_queues: Mutex::new(HashMap::new()),
            num_received: Mutex::new(HashMap::new()),
            variants: Mutex::new(HashMap::new()),
            worker_id: AtomicU32::new(0),
            log: Mutex::new(None),
            monitor_interval: Duration::from_secs(1),
            telemetry_interval: Duration::from_secs(5),
        })
    }

    /// Overrides the monitor and telemetry intervals.
    #[must_use]
    pub fn with_intervals(mut self, monitor: Duration, telemetry: Duration) -> Self {
        self.monitor_interval = monitor;
        self.telemetry_interval = telemetry;
        self
    }

    /// Binds the inlet, starts every daemon, and serves forever.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let sink = BlockingQueue::new();
        let inlet = Inlet::bind(&self.host, self.port, sink.clone()).await?;
        info!(addr = %inlet.local_addr(), "worker running");

        let router = self.clone();
        let _ = tokio::spawn(async move {
            let _inlet = inlet;
            loop {
                let message = sink.pop().await;
                router.route(message);
            }
        });

        let deployer = self.clone();
        let _ = tokio::spawn(async move { deployer.deployment_daemon().await });

        let monitor = self.clone();
        let _ = tokio::spawn(async move { monitor.monitor_daemon().await });

        let telemetry = self.clone();
        let _ = tokio::spawn(async move { telemetry.telemetry_daemon().await });

        std::future::pending().await
    }

    /// Demultiplexes one incoming message.
    fn route(&self, message: Message) {
        match message.kind {
            MessageKind::Deploy => self.deployment_queue.push(message),
            MessageKind::Query => {
                if let Err(err) = self.handle_query(&message) {
                    warn!(%err, "dropping query");
                }
            }
            MessageKind::Stop => match message.parse_field::<u32>("variant_id") {
                Ok(variant_id) => {
                    if let Some(queue) = self.inference_queues.lock().get(&variant_id) {
                        queue.push(STOP_TOKEN);
                    }
                }
                Err(err) => warn!(%err, "ignoring malformed stop"),
            },
            MessageKind::Hello => {
                if let Err(err) = self.handle_hello(&message) {
                    warn!(%err, "ignoring malformed handshake");
                }
            }
            MessageKind::Finished => debug!("peer finished"),
            kind => debug!(%kind, "ignoring controller-bound message"),
        }
    }

    /// Queues one work token; queries for unknown variants are ignored.
    fn handle_query(&self, message: &Message) -> Result<(), Error> {
        let variant_id: u32 = message.parse_field("variant_id")?;
        let batch_size: u64 = message.parse_field("batch_size")?;

        let queues = self.inference_queues.lock();
        let Some(queue) = queues.get(&variant_id) else {
            debug!(variant_id, "query for unknown variant");
            return Ok(());
        };
        queue.push(1);
        drop(queues);

        if let Some(received) = self.num_received.lock().get_mut(&variant_id) {
            *received += batch_size;
        }
        Ok(())
    }

    /// Adopts the controller-assigned id and reports the device memory.
    fn handle_hello(&self, message: &Message) -> Result<(), Error> {
        let worker_id: u32 = message.parse_field("worker_id")?;
        self.worker_id.store(worker_id, Ordering::Relaxed);

        if let Some(log_dir) = &self.params.log_dir {
            match InferenceLog::create(log_dir, worker_id) {
                Ok(log) => *self.log.lock() = Some(log),
                Err(err) => warn!(%err, "inference log disabled"),
            }
        }

        let memory = self.executor.memory_info();
        info!(
            worker_id,
            total = memory.total,
            free = memory.free,
            "handshake complete"
        );
        self.outlet.push(Message::with_data(
            MessageKind::Hello,
            [
                ("worker_id", worker_id.to_string()),
                ("total_mem", memory.total.to_string()),
                (
                    "hardware_platform",
                    self.params.hardware_platform.clone(),
                ),
            ],
        ));
        Ok(())
    }

    /// Turns every `DEPLOY` into a variant mirror, an inference queue, and
    /// an inference daemon.
    async fn deployment_daemon(self: Arc<Self>) {
        info!("deployment daemon running");
        loop {
            let message = self.deployment_queue.pop().await;
            if let Err(err) = self.clone().handle_deploy(&message) {
                error!(%err, "deployment failed");
            }
        }
    }

    fn handle_deploy(self: Arc<Self>, message: &Message) -> Result<(), Error> {
        let variant_id: u32 = message.parse_field("id")?;
        let name = message.field("name")?.to_owned();
        let batch_size: u32 = message.parse_field("batch_size")?;

        let variant = Variant::from_deploy(
            variant_id,
            name.clone(),
            self.params.hardware_platform.clone(),
            batch_size,
        );
        let queue = BlockingQueue::new();
        let _ = self
            .inference_queues
            .lock()
            .insert(variant_id, queue.clone());
        let _ = self.num_received.lock().insert(variant_id, 0);
        let _ = self.variants.lock().insert(variant_id, variant);

        let _ = tokio::spawn(async move {
            self.inference_daemon(variant_id, name, batch_size, queue)
                .await
        });
        Ok(())
    }

    /// Loads and prewarms the model, acknowledges the deployment, then
    /// serves one batch per queue token until the stop sentinel arrives.
    async fn inference_daemon(
        self: Arc<Self>,
        variant_id: u32,
        name: String,
        batch_size: u32,
        queue: BlockingQueue<u32>,
    ) {
        let mut model = match self.executor.load(&name, batch_size) {
            Ok(model) => model,
            Err(err) => {
                error!(variant_id, %name, %err, "model load failed");
                self.forget_variant(variant_id);
                return;
            }
        };
        if let Err(err) = model.forward() {
            warn!(variant_id, %name, %err, "prewarm pass failed");
        }

        let worker_id = self.worker_id.load(Ordering::Relaxed);
        let memory = self.executor.memory_info();
        info!(variant_id, %name, batch_size, "variant deployed");
        self.outlet.push(Message::with_data(
            MessageKind::Deployed,
            [
                ("worker_id", worker_id.to_string()),
                ("free_memory", memory.free.to_string()),
                ("total_memory", memory.total.to_string()),
            ],
        ));

        loop {
            let token = queue.pop().await;
            if token == STOP_TOKEN {
                info!(variant_id, %name, "stopping inference loop");
                break;
            }
            match model.forward() {
                Ok(elapsed) if elapsed > Duration::ZERO => {
                    let throughput = f64::from(batch_size) / elapsed.as_secs_f64();
                    if let Some(variant) = self.variants.lock().get_mut(&variant_id) {
                        variant.set_throughput(throughput);
                    }
                    self.log_batch(worker_id, variant_id, &name, batch_size);
                }
                Ok(_) => warn!(variant_id, "zero-duration forward pass"),
                Err(err) => warn!(variant_id, %name, %err, "forward pass failed"),
            }
        }
        self.forget_variant(variant_id);
    }

    fn forget_variant(&self, variant_id: u32) {
        let _ = self.variants.lock().remove(&variant_id);
        let _ = self.inference_queues.lock().remove(&variant_id);
        let _ = self.num_received.lock().remove(&variant_id);
    }

    fn log_batch(&self, worker_id: u32, variant_id: u32, name: &str, batch_size: u32) {
        if let Some(log) = &*self.log.lock() {
            if let Err(err) = log.record(unix_now(), worker_id, variant_id, name, batch_size) {
                warn!(%err, "inference log write failed");
            }
        }
    }

    /// Once per interval, shifts every variant's arrival window by the
    /// queries received since the previous sample.
    async fn monitor_daemon(self: Arc<Self>) {
        let mut previous: HashMap<u32, u64> = HashMap::new();
        loop {
            tokio::time::sleep(self.monitor_interval).await;
            let current = self.num_received.lock().clone();
            {
                let mut variants = self.variants.lock();
                for (variant_id, received) in &current {
                    let delta = received - previous.get(variant_id).copied().unwrap_or(0);
                    if let Some(variant) = variants.get_mut(variant_id) {
                        variant.record_input_rate(delta as u32);
                    }
                }
            }
            previous = current;
        }
    }

    /// Periodically reports every running variant's throughput and arrival
    /// window.
    async fn telemetry_daemon(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.telemetry_interval).await;
            let records: Vec<ProfileRecord> =
                self.variants.lock().values().map(ProfileRecord::from).collect();
            let payload = match serde_json::to_string(&records) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "telemetry serialization failed");
                    continue;
                }
            };
            let worker_id = self.worker_id.load(Ordering::Relaxed);
            debug!(worker_id, variants = records.len(), "emitting telemetry");
            self.outlet.push(Message::with_data(
                MessageKind::ProfileData,
                [
                    ("worker_id", worker_id.to_string()),
                    ("variants", payload),
                ],
            ));
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
