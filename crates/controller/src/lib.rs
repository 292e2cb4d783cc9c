// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The central controller of the fleet.
//!
//! The controller accepts application registrations, places variants on
//! workers through the configured strategy, dispatches queries with a
//! weighted round robin per application, ingests worker telemetry, and
//! continuously reshapes the deployment through the auto-scaler.
//!
//! Everything is driven by long-lived daemons communicating through
//! blocking queues:
//!
//! - the ingress router demultiplexes incoming messages by kind,
//! - the registration daemon performs initial placement and spawns one
//!   query-dispatch daemon per application,
//! - the profiling daemon applies `PROFILE_DATA` and recomputes the
//!   load-balancer weights,
//! - the auto-scaler runs its periodic control loop.

use gpufleet_channel::{BlockingQueue, Event};
use gpufleet_config::{ControllerParams, EngineConfig};
use gpufleet_profile::{ProfileCache, ProfileLoader};
use gpufleet_scheduler::{PlacementStrategy, strategy_for};
use gpufleet_state::{
    DataStore, IdGenerator, LoadBalancer, MAX_GPU_MEMORY_OCCUPANCY, ProfileRecord, Variant, Worker,
};
use gpufleet_transport::{Inlet, Message, MessageKind, Outlet};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod error;
pub mod scaling;

pub use error::Error;
pub use scaling::AutoScaler;

/// How long a dispatch daemon sleeps when its application has no weighted
/// placement yet.
const DISPATCH_IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// The default profile-artifact directory under the working directory.
const DEFAULT_DATA_DIR: &str = "data";

/// The controller engine.
///
/// Construction wires one [`Outlet`] (and one [`Worker`] mirror) per
/// configured remote engine; [`Controller::run`] binds the inlet and
/// spawns the daemons, then serves forever. Must live inside a tokio
/// runtime.
pub struct Controller {
    host: String,
    port: u16,
    datastore: DataStore,
    balancer: LoadBalancer,
    scheduler: Arc<Mutex<Box<dyn PlacementStrategy>>>,
    idgen: Mutex<IdGenerator>,
    outlets: HashMap<u32, Outlet>,
    registration_queue: BlockingQueue<Message>,
    profiling_queue: BlockingQueue<Message>,
    query_queues: Mutex<HashMap<String, BlockingQueue<Message>>>,
    placements: Mutex<HashMap<String, (u32, u32)>>,
    dispatching: Mutex<HashSet<String>>,
    started: Event,
    scaler_gate: Event,
}

impl Controller {
    /// Builds the controller from its configuration: one outgoing endpoint
    /// and one worker mirror per remote engine, and the strategy selected
    /// by the `scheduling` parameter.
    pub fn new(config: &EngineConfig) -> Result<Arc<Self>, Error> {
        let params: ControllerParams = config.controller()?.clone();
        let data_dir = params
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let cache = Arc::new(ProfileCache::new(ProfileLoader::new(data_dir)));
        let scheduler = Arc::new(Mutex::new(strategy_for(params.scheduling, cache)));
        info!(policy = %params.scheduling, "controller configured");

        let datastore = DataStore::new();
        let mut idgen = IdGenerator::new();
        let mut outlets = HashMap::new();
        for remote in &config.remote_engines {
            let worker_id = idgen.next();
            let outlet = Outlet::connect(worker_id, &remote.remote_host, remote.remote_port);
            let _ = outlets.insert(worker_id, outlet);
            datastore.register_worker(Worker::new(worker_id, ""));
        }

        Ok(Arc::new(Self {
            host: config.host.clone(),
            port: config.port,
            datastore,
            balancer: LoadBalancer::new(),
            scheduler,
            idgen: Mutex::new(idgen),
            outlets,
            registration_queue: BlockingQueue::new(),
            profiling_queue: BlockingQueue::new(),
            query_queues: Mutex::new(HashMap::new()),
            placements: Mutex::new(HashMap::new()),
            dispatching: Mutex::new(HashSet::new()),
            started: Event::new(),
            scaler_gate: Event::new(),
        }))
    }

    /// Greets the workers, starts every daemon, and serves forever.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let sink = BlockingQueue::new();
        let inlet = Inlet::bind(&self.host, self.port, sink.clone()).await?;
        info!(addr = %inlet.local_addr(), "controller running");

        for (worker_id, outlet) in &self.outlets {
            outlet.push(Message::with_data(
                MessageKind::Hello,
                [("worker_id", worker_id.to_string())],
            ));
        }

        let router = self.clone();
        let _ = tokio::spawn(async move {
            // The inlet lives with the router task.
            let _inlet = inlet;
            loop {
                let message = sink.pop().await;
                router.route(message);
            }
        });

        let registrar = self.clone();
        let _ = tokio::spawn(async move { registrar.registration_daemon().await });

        let profiler = self.clone();
        let _ = tokio::spawn(async move { profiler.profiling_daemon().await });

        let scaler = self.clone().auto_scaler();
        let _ = tokio::spawn(async move { scaler.run().await });

        std::future::pending().await
    }

    /// The auto-scaler wired to this controller's deploy and stop routines.
    #[must_use]
    pub fn auto_scaler(self: Arc<Self>) -> AutoScaler {
        let deployer = self.clone();
        let stopper = self.clone();
        AutoScaler::new(
            self.datastore.clone(),
            self.scheduler.clone(),
            self.scaler_gate.clone(),
            Box::new(move |app_id, variant, worker_id| {
                deployer.deploy(app_id, variant, worker_id)
            }),
            Box::new(move |app_id, variant, worker_id| stopper.stop(app_id, variant, worker_id)),
        )
    }

    /// Demultiplexes one incoming message.
    fn route(&self, message: Message) {
        match message.kind {
            MessageKind::Register => self.registration_queue.push(message),
            MessageKind::ProfileData => self.profiling_queue.push(message),
            MessageKind::Query => match message.field("app_id") {
                Ok(app_id) => {
                    let queue = self.query_queue(app_id);
                    queue.push(message);
                }
                Err(err) => warn!(%err, "dropping query without application"),
            },
            MessageKind::Hello => {
                if let Err(err) = self.handle_hello(&message) {
                    warn!(%err, "ignoring malformed handshake");
                }
            }
            MessageKind::Deployed => {
                if let Err(err) = self.handle_deployed(&message) {
                    warn!(%err, "ignoring malformed deployment ack");
                }
            }
            MessageKind::Finished => debug!("peer finished"),
            MessageKind::Deploy | MessageKind::Stop => {
                warn!(kind = %message.kind, "unexpected worker-bound message")
            }
        }
    }

    /// A worker answered the handshake: record its usable memory (half of
    /// what it reports, the rest is reserved for non-variant usage), its
    /// platform, and release the startup barrier.
    fn handle_hello(&self, message: &Message) -> Result<(), Error> {
        let worker_id: u32 = message.parse_field("worker_id")?;
        let total_mem: f64 = message.parse_field("total_mem")?;
        let usable = (total_mem / 2.0) as u64;
        if !self.datastore.set_total_memory(worker_id, usable) {
            return Err(Error::UnknownWorker { worker_id });
        }
        if let Some(platform) = message.opt_field("hardware_platform") {
            let _ = self.datastore.set_hardware_platform(worker_id, platform);
        }
        if let Some(worker) = self.datastore.worker(worker_id) {
            info!(%worker, "worker joined");
        }
        self.started.set();
        Ok(())
    }

    fn handle_deployed(&self, message: &Message) -> Result<(), Error> {
        let worker_id: u32 = message.parse_field("worker_id")?;
        if !self.datastore.set_deploying(worker_id, false) {
            return Err(Error::UnknownWorker { worker_id });
        }
        debug!(worker_id, "deployment acknowledged");
        self.started.set();
        Ok(())
    }

    /// Serves registrations once the first worker has joined. Every
    /// `(app, variant name)` entry is registered, placed, and given a
    /// dispatch daemon; the auto-scaler gate opens afterwards.
    async fn registration_daemon(self: Arc<Self>) {
        self.started.wait().await;
        info!("registration daemon running");
        loop {
            let message = self.registration_queue.pop().await;
            for (app_id, variant_name) in &message.data {
                debug!(%app_id, %variant_name, "registering application");
                self.datastore.register_app(app_id, variant_name);

                let workers = self.datastore.workers();
                let names = self.datastore.registered(app_id);
                match self.scheduler.lock().schedule(&workers, &names) {
                    Ok(Some(placement)) => {
                        if let Err(err) =
                            self.deploy(app_id, placement.variant, placement.worker.id())
                        {
                            error!(%app_id, %err, "initial placement failed");
                        }
                    }
                    Ok(None) => warn!(%app_id, "no feasible placement, application unserved"),
                    Err(err) => error!(%app_id, %err, "scheduling failed"),
                }
                self.clone().spawn_dispatch(app_id);
            }
            self.scaler_gate.set();
        }
    }

    /// Applies worker telemetry, then recomputes every application's
    /// weights.
    async fn profiling_daemon(self: Arc<Self>) {
        info!("profiling daemon running");
        loop {
            let message = self.profiling_queue.pop().await;
            if let Err(err) = self.apply_profile_message(&message) {
                warn!(%err, "ignoring telemetry");
            }
        }
    }

    fn apply_profile_message(&self, message: &Message) -> Result<(), Error> {
        let worker_id: u32 = message.parse_field("worker_id")?;
        let records: Vec<ProfileRecord> = serde_json::from_str(message.field("variants")?)
            .map_err(|err| Error::MalformedTelemetry {
                worker_id,
                details: err.to_string(),
            })?;
        let updated = self.datastore.apply_profile(worker_id, &records);
        debug!(worker_id, updated, "telemetry applied");
        self.reweight();
        Ok(())
    }

    /// Recomputes the weighted-round-robin weights from each placement's
    /// load/throughput ratio. Under-loaded placements end up with a higher
    /// share; zero-throughput placements keep their previous weight.
    fn reweight(&self) {
        for app_id in self.datastore.registration().into_keys() {
            let placements = self.datastore.variant_workers(&app_id);
            if placements.is_empty() {
                continue;
            }

            let mut entries = Vec::with_capacity(placements.len());
            for (variant, worker) in &placements {
                let throughput = variant.effective_throughput();
                if throughput == 0.0 {
                    warn!(variant = variant.id, "zero throughput, weight unchanged");
                    continue;
                }
                entries.push((
                    placement_key(variant.id, worker.id()),
                    variant.id,
                    worker.id(),
                    variant.workload() / throughput,
                ));
            }

            let total: f64 = entries.iter().map(|(_, _, _, raw)| raw.ceil()).sum();
            for (key, variant_id, worker_id, raw) in entries {
                let weight = saturating_weight(total, raw);
                let _ = self
                    .placements
                    .lock()
                    .insert(key.clone(), (variant_id, worker_id));
                self.balancer.set(&app_id, &key, weight);
            }
        }
    }

    /// Deploys a fresh variant: occupancy check, deployment barrier, id
    /// assignment, `DEPLOY` emission, and attachment to the worker mirror.
    pub fn deploy(&self, app_id: &str, mut variant: Variant, worker_id: u32) -> Result<(), Error> {
        let worker = self
            .datastore
            .worker(worker_id)
            .ok_or(Error::UnknownWorker { worker_id })?;
        let occupation = worker.percent_occupation(variant.memory());
        if occupation > MAX_GPU_MEMORY_OCCUPANCY {
            return Err(Error::OccupancyExceeded {
                worker_id,
                occupation,
                limit: MAX_GPU_MEMORY_OCCUPANCY,
            });
        }

        let _ = self.datastore.set_deploying(worker_id, true);
        variant.id = self.idgen.lock().next();
        self.send(
            worker_id,
            Message::with_data(
                MessageKind::Deploy,
                [
                    ("id", variant.id.to_string()),
                    ("name", variant.name.clone()),
                    ("batch_size", variant.batch_size.to_string()),
                ],
            ),
        )?;
        info!(app_id, %variant, worker_id, "deploying");
        let _ = self.datastore.attach_variant(worker_id, variant);
        Ok(())
    }

    /// Stops a running variant and retires its placement immediately.
    pub fn stop(&self, app_id: &str, variant: &Variant, worker_id: u32) -> Result<(), Error> {
        self.send(
            worker_id,
            Message::with_data(
                MessageKind::Stop,
                [
                    ("variant_id", variant.id.to_string()),
                    ("variant_name", variant.name.clone()),
                ],
            ),
        )?;
        let _ = self.datastore.remove_variant(worker_id, variant.id);
        let key = placement_key(variant.id, worker_id);
        self.balancer.remove(app_id, &key);
        let _ = self.placements.lock().remove(&key);
        info!(app_id, %variant, worker_id, "stopping");
        Ok(())
    }

    fn send(&self, worker_id: u32, message: Message) -> Result<(), Error> {
        let outlet = self
            .outlets
            .get(&worker_id)
            .ok_or(Error::UnknownWorker { worker_id })?;
        outlet.push(message);
        Ok(())
    }

    fn query_queue(&self, app_id: &str) -> BlockingQueue<Message> {
        self.query_queues
            .lock()
            .entry(app_id.to_owned())
            .or_default()
            .clone()
    }

    /// Starts the application's dispatch daemon, once.
    fn spawn_dispatch(self: Arc<Self>, app_id: &str) {
        if !self.dispatching.lock().insert(app_id.to_owned()) {
            return;
        }
        let app_id = app_id.to_owned();
        let _ = tokio::spawn(async move { self.dispatch_daemon(app_id).await });
    }

    /// Forwards queries for one application: pick the next placement from
    /// the balancer, consume one batch worth of queries, and emit a single
    /// batched `QUERY` to the owning worker.
    async fn dispatch_daemon(self: Arc<Self>, app_id: String) {
        info!(%app_id, "query dispatcher running");
        let queue = self.query_queue(&app_id);
        loop {
            let Some(key) = self.balancer.next(&app_id) else {
                debug!(%app_id, "no weighted placement yet");
                tokio::time::sleep(DISPATCH_IDLE_BACKOFF).await;
                continue;
            };
            let target = self.placements.lock().get(&key).copied();
            let Some((variant_id, worker_id)) = target else {
                warn!(%app_id, %key, "placement key without target");
                tokio::time::sleep(DISPATCH_IDLE_BACKOFF).await;
                continue;
            };
            let Some(variant) = self.datastore.find_variant(worker_id, variant_id) else {
                // The variant was stopped since the weights were computed.
                self.balancer.remove(&app_id, &key);
                let _ = self.placements.lock().remove(&key);
                continue;
            };

            for _ in 0..variant.batch_size {
                let _ = queue.pop().await;
            }
            let message = Message::with_data(
                MessageKind::Query,
                [
                    ("variant_id", variant_id.to_string()),
                    ("batch_size", variant.batch_size.to_string()),
                ],
            );
            if let Err(err) = self.send(worker_id, message) {
                error!(%app_id, %err, "query forwarding failed");
            }
        }
    }
}

fn placement_key(variant_id: u32, worker_id: u32) -> String {
    format!("{variant_id}_{worker_id}")
}

/// `⌈total − ⌈raw⌉⌉ + 1`, saturated into `[1, u32::MAX]`.
fn saturating_weight(total: f64, raw: f64) -> u32 {
    let adjusted = (total - raw.ceil()).ceil() + 1.0;
    if adjusted <= 1.0 {
        1
    } else if adjusted >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        adjusted as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpufleet_config::{EngineKind, Parameters, RemoteEndpoint, SchedulingPolicy};
    use gpufleet_profile::VariantProfile;
    use std::collections::BTreeMap;

    const GIB: u64 = 1 << 30;

    fn controller_config(remote_engines: Vec<RemoteEndpoint>) -> EngineConfig {
        EngineConfig {
            id: 1,
            kind: EngineKind::Controller,
            host: "127.0.0.1".to_owned(),
            port: 0,
            parameters: Parameters::Controller(ControllerParams {
                scheduling: SchedulingPolicy::Infaas,
                log_dir: None,
                data_dir: None,
            }),
            remote_engines,
        }
    }

    fn profiled_variant(name: &str, throughput: f64, memory: u64) -> Variant {
        let profile = Arc::new(VariantProfile::from_parts(
            name,
            "xavier",
            BTreeMap::from([(32, throughput)]),
            BTreeMap::from([(32, memory)]),
            BTreeMap::new(),
        ));
        Variant::from_profile(profile, 32)
    }

    #[tokio::test]
    async fn deploy_fails_loudly_past_the_occupancy_cap() {
        let controller = Controller::new(&controller_config(Vec::new())).expect("controller");
        let mut worker = Worker::new(42, "xavier");
        worker.set_total_memory(4 * GIB);
        controller.datastore.register_worker(worker);

        let oversized = profiled_variant("resnet50", 100.0, 4 * GIB);
        match controller.deploy("app1", oversized, 42) {
            Err(Error::OccupancyExceeded { occupation, .. }) => {
                assert!(occupation > MAX_GPU_MEMORY_OCCUPANCY);
            }
            other => panic!("expected OccupancyExceeded, got {other:?}"),
        }
        // Nothing was attached.
        assert!(controller.datastore.worker(42).expect("worker").variants().is_empty());
    }

    #[tokio::test]
    async fn hello_halves_the_reported_memory_and_opens_the_barrier() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let controller = Controller::new(&controller_config(vec![RemoteEndpoint {
            remote_host: "127.0.0.1".to_owned(),
            remote_port: port,
        }]))
        .expect("controller");

        let worker_id = controller.datastore.workers()[0].id();
        assert!(!controller.started.is_set());

        controller.route(Message::with_data(
            MessageKind::Hello,
            [
                ("worker_id", worker_id.to_string()),
                ("total_mem", (16 * GIB).to_string()),
                ("hardware_platform", "xavier".to_owned()),
            ],
        ));

        let worker = controller.datastore.worker(worker_id).expect("worker");
        assert_eq!(worker.total_memory(), 8 * GIB);
        assert_eq!(worker.hardware_platform(), "xavier");
        assert!(controller.started.is_set());
    }

    #[tokio::test]
    async fn telemetry_reweights_towards_underloaded_placements() {
        let controller = Controller::new(&controller_config(Vec::new())).expect("controller");
        let mut worker = Worker::new(7, "xavier");
        worker.set_total_memory(64 * GIB);
        controller.datastore.register_worker(worker);
        controller.datastore.register_app("app1", "resnet50");

        let mut lightly_loaded = profiled_variant("resnet50", 100.0, GIB);
        lightly_loaded.id = 1000;
        let mut heavily_loaded = profiled_variant("resnet50", 100.0, GIB);
        heavily_loaded.id = 1001;
        let _ = controller.datastore.attach_variant(7, lightly_loaded);
        let _ = controller.datastore.attach_variant(7, heavily_loaded);

        let records = vec![
            ProfileRecord {
                variant_id: 1000,
                variant_name: "resnet50".to_owned(),
                throughput: 100.0,
                input_rate: vec![50; 10],
            },
            ProfileRecord {
                variant_id: 1001,
                variant_name: "resnet50".to_owned(),
                throughput: 100.0,
                input_rate: vec![150; 10],
            },
        ];
        let message = Message::with_data(
            MessageKind::ProfileData,
            [
                ("worker_id", "7".to_owned()),
                (
                    "variants",
                    serde_json::to_string(&records).expect("serialize"),
                ),
            ],
        );
        controller
            .apply_profile_message(&message)
            .expect("telemetry");

        // raw = workload / effective throughput: 0.5 and 1.5; total of the
        // ceilings is 3; weights are ceil(3-1)+1 = 3 and ceil(3-2)+1 = 2.
        assert_eq!(controller.balancer.weight("app1", "1000_7"), Some(3));
        assert_eq!(controller.balancer.weight("app1", "1001_7"), Some(2));
        assert_eq!(
            controller.placements.lock().get("1000_7"),
            Some(&(1000, 7))
        );
    }

    #[tokio::test]
    async fn stop_retires_the_placement_and_the_weights() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let controller = Controller::new(&controller_config(vec![RemoteEndpoint {
            remote_host: "127.0.0.1".to_owned(),
            remote_port: port,
        }]))
        .expect("controller");

        let worker_id = controller.datastore.workers()[0].id();
        let _ = controller.datastore.set_total_memory(worker_id, 64 * GIB);

        let mut variant = profiled_variant("resnet50", 100.0, GIB);
        variant.id = 1000;
        let _ = controller.datastore.attach_variant(worker_id, variant.clone());
        let key = placement_key(1000, worker_id);
        controller.balancer.set("app1", &key, 2);
        let _ = controller.placements.lock().insert(key.clone(), (1000, worker_id));

        controller.stop("app1", &variant, worker_id).expect("stop");

        assert!(controller.datastore.find_variant(worker_id, 1000).is_none());
        assert_eq!(controller.balancer.weight("app1", &key), None);
        assert!(controller.placements.lock().get(&key).is_none());
    }

    #[test]
    fn weights_saturate_instead_of_overflowing() {
        assert_eq!(saturating_weight(3.0, 1.0), 3);
        assert_eq!(saturating_weight(0.0, 0.0), 1);
        assert_eq!(saturating_weight(f64::from(u32::MAX) * 4.0, 1.0), u32::MAX);
    }
}
