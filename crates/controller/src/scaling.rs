// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The auto-scaler: a periodic control loop that reshapes the deployment.
//!
//! Every tick it computes each application's load/throughput ratio, picks
//! the most loaded application, and either retires a variant (ratio well
//! below 1) or asks the placement strategy for an additional one (ratio
//! above the threshold). An upscale starts a per-application cool-down so
//! consecutive ticks cannot thrash the fleet.

use crate::Error;
use gpufleet_channel::Event;
use gpufleet_scheduler::{Placement, PlacementStrategy};
use gpufleet_state::{DataStore, Variant};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ticks an application stays untouched after an upscale.
pub const UPSCALE_COOLDOWN_TICKS: u32 = 5;

/// Below this ratio the lowest-throughput variant is dropped outright.
const FORCE_DOWNSCALE_RATIO: f64 = 0.5;

/// Below this ratio a variant is dropped only if the rest keeps up.
const DOWNSCALE_RATIO: f64 = 0.8;

/// Deployment callback injected by the controller: `(app_id, variant,
/// worker_id)`.
pub type DeployFn = Box<dyn Fn(&str, Variant, u32) -> Result<(), Error> + Send + Sync>;

/// Stop callback injected by the controller: `(app_id, variant,
/// worker_id)`.
pub type StopFn = Box<dyn Fn(&str, &Variant, u32) -> Result<(), Error> + Send + Sync>;

/// The periodic scaling loop.
///
/// Deploy and stop are injected as callbacks so the loop stays free of
/// transport concerns; the strategy is shared with the registration path.
pub struct AutoScaler {
    datastore: DataStore,
    scheduler: Arc<Mutex<Box<dyn PlacementStrategy>>>,
    gate: Event,
    on_deploy: DeployFn,
    on_stop: StopFn,
    interval: Duration,
    threshold: f64,
    cooldown: Mutex<HashMap<String, u32>>,
}

impl AutoScaler {
    /// Creates a scaler with the nominal 2 s tick and a threshold of 1.0.
    ///
    /// The loop does not start evaluating until `gate` is set, which the
    /// controller does after the first registration.
    #[must_use]
    pub fn new(
        datastore: DataStore,
        scheduler: Arc<Mutex<Box<dyn PlacementStrategy>>>,
        gate: Event,
        on_deploy: DeployFn,
        on_stop: StopFn,
    ) -> Self {
        Self {
            datastore,
            scheduler,
            gate,
            on_deploy,
            on_stop,
            interval: Duration::from_secs(2),
            threshold: 1.0,
            cooldown: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Waits for the gate, then evaluates forever.
    pub async fn run(&self) {
        self.gate.wait().await;
        info!(interval = ?self.interval, "auto-scaler running");
        loop {
            tokio::time::sleep(self.interval).await;
            self.tick();
        }
    }

    /// One evaluation cycle: sample every application, scale the most
    /// loaded one.
    pub fn tick(&self) {
        let mut most_loaded: Option<(String, f64)> = None;
        for app_id in self.datastore.registration().into_keys() {
            {
                let mut cooldown = self.cooldown.lock();
                if let Some(remaining) = cooldown.get_mut(&app_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        debug!(%app_id, remaining = *remaining, "cooling down");
                        continue;
                    }
                }
            }

            let variants = self.datastore.variants(&app_id);
            if variants.is_empty() {
                continue;
            }
            let workload: f64 = variants.iter().map(Variant::workload).sum();
            let throughput: f64 = variants.iter().map(Variant::effective_throughput).sum();
            if throughput == 0.0 {
                warn!(%app_id, "all variants report zero throughput");
                continue;
            }
            let ratio = workload / throughput;
            debug!(%app_id, workload, throughput, ratio, "sampled application");
            if most_loaded.as_ref().is_none_or(|(_, best)| ratio > *best) {
                most_loaded = Some((app_id, ratio));
            }
        }

        if let Some((app_id, ratio)) = most_loaded {
            if let Err(err) = self.scale(&app_id, ratio) {
                error!(%app_id, %err, "scaling action failed");
            }
        }
    }

    fn scale(&self, app_id: &str, ratio: f64) -> Result<(), Error> {
        if ratio < FORCE_DOWNSCALE_RATIO {
            if let Some((variant, worker_id)) = self.downscale(app_id, true) {
                info!(app_id, %variant, worker_id, ratio, "downscaling (forced)");
                (self.on_stop)(app_id, &variant, worker_id)?;
            }
        } else if ratio < DOWNSCALE_RATIO {
            if let Some((variant, worker_id)) = self.downscale(app_id, false) {
                info!(app_id, %variant, worker_id, ratio, "downscaling");
                (self.on_stop)(app_id, &variant, worker_id)?;
            }
        } else if ratio > self.threshold {
            if let Some(placement) = self.upscale(app_id)? {
                info!(app_id, variant = %placement.variant, ratio, "upscaling");
                (self.on_deploy)(app_id, placement.variant, placement.worker.id())?;
                let _ = self
                    .cooldown
                    .lock()
                    .insert(app_id.to_owned(), UPSCALE_COOLDOWN_TICKS);
            }
        }
        Ok(())
    }

    fn upscale(&self, app_id: &str) -> Result<Option<Placement>, Error> {
        let workers = self.datastore.workers();
        if workers.is_empty() {
            return Ok(None);
        }
        let names = self.datastore.registered(app_id);
        Ok(self.scheduler.lock().schedule(&workers, &names)?)
    }

    /// Picks the variant to retire, or `None` when fewer than two serve the
    /// application.
    ///
    /// Forced: the lowest-throughput variant goes. Otherwise a variant only
    /// qualifies if the remaining ones keep the ratio under the threshold;
    /// among those, the one on the least crowded worker goes.
    fn downscale(&self, app_id: &str, force: bool) -> Option<(Variant, u32)> {
        let candidates = self.datastore.variant_workers(app_id);
        if candidates.len() < 2 {
            return None;
        }

        if force {
            return candidates
                .into_iter()
                .min_by(|a, b| a.0.throughput().total_cmp(&b.0.throughput()))
                .map(|(variant, worker)| (variant, worker.id()));
        }

        let workload: f64 = candidates.iter().map(|(v, _)| v.workload()).sum();
        let throughput: f64 = candidates
            .iter()
            .map(|(v, _)| v.effective_throughput())
            .sum();

        let mut qualifying: Vec<_> = candidates
            .into_iter()
            .filter(|(variant, _)| {
                let remaining = throughput - variant.effective_throughput();
                remaining > 0.0 && workload / remaining < self.threshold
            })
            .collect();
        qualifying.sort_by_key(|(_, worker)| worker.variants().len());
        qualifying
            .into_iter()
            .next()
            .map(|(variant, worker)| (variant, worker.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpufleet_profile::VariantProfile;
    use gpufleet_scheduler::Error as SchedulerError;
    use gpufleet_state::Worker;
    use std::collections::BTreeMap;

    /// Strategy double that always proposes the same placement.
    struct StaticStrategy {
        placement: Option<Placement>,
    }

    impl PlacementStrategy for StaticStrategy {
        fn schedule(
            &mut self,
            _workers: &[Worker],
            _candidates: &[String],
        ) -> Result<Option<Placement>, SchedulerError> {
            Ok(self.placement.clone())
        }
    }

    #[derive(Default)]
    struct Actions {
        deployed: Mutex<Vec<(String, u32)>>,
        stopped: Mutex<Vec<(String, u32)>>,
    }

    fn variant(id: u32, name: &str, throughput: f64, rate_per_sec: u32) -> Variant {
        let profile = Arc::new(VariantProfile::from_parts(
            name,
            "xavier",
            BTreeMap::from([(32, throughput)]),
            BTreeMap::from([(32, 1_u64 << 30)]),
            BTreeMap::new(),
        ));
        let mut variant = Variant::from_profile(profile, 32);
        variant.id = id;
        variant.set_input_rates(&[rate_per_sec; 10]);
        variant
    }

    fn fleet(variants: Vec<Variant>) -> DataStore {
        let datastore = DataStore::new();
        let mut worker = Worker::new(1, "xavier");
        worker.set_total_memory(64 << 30);
        datastore.register_worker(worker);
        datastore.register_app("app1", "resnet50");
        for variant in variants {
            let _ = datastore.attach_variant(1, variant);
        }
        datastore
    }

    fn scaler(
        datastore: &DataStore,
        placement: Option<Placement>,
        actions: Arc<Actions>,
    ) -> AutoScaler {
        let scheduler: Arc<Mutex<Box<dyn PlacementStrategy>>> =
            Arc::new(Mutex::new(Box::new(StaticStrategy { placement })));
        let deploys = actions.clone();
        let stops = actions;
        AutoScaler::new(
            datastore.clone(),
            scheduler,
            Event::new(),
            Box::new(move |app, variant, worker_id| {
                deploys.deployed.lock().push((app.to_owned(), variant.id));
                let _ = worker_id;
                Ok(())
            }),
            Box::new(move |app, variant, _worker_id| {
                stops.stopped.lock().push((app.to_owned(), variant.id));
                Ok(())
            }),
        )
    }

    fn proposed_placement(datastore: &DataStore) -> Placement {
        Placement {
            variant: variant(0, "resnet50", 100.0, 0),
            worker: datastore.workers().remove(0),
        }
    }

    #[test]
    fn upscale_fires_once_then_cools_down_for_five_ticks() {
        // One variant, workload 1500 against effective throughput 1000.
        let datastore = fleet(vec![variant(1000, "resnet50", 100.0, 150)]);
        let actions = Arc::new(Actions::default());
        let scaler = scaler(
            &datastore,
            Some(proposed_placement(&datastore)),
            actions.clone(),
        );

        scaler.tick();
        assert_eq!(actions.deployed.lock().len(), 1);
        assert_eq!(
            scaler.cooldown.lock().get("app1"),
            Some(&UPSCALE_COOLDOWN_TICKS)
        );

        // The ratio stays high, but the cool-down absorbs five ticks.
        for _ in 0..UPSCALE_COOLDOWN_TICKS {
            scaler.tick();
        }
        assert_eq!(actions.deployed.lock().len(), 1);

        scaler.tick();
        assert_eq!(actions.deployed.lock().len(), 2);
    }

    #[test]
    fn a_single_variant_is_never_downscaled() {
        // Ratio far below 0.5, but force-downscaling needs two candidates.
        let datastore = fleet(vec![variant(1000, "resnet50", 100.0, 1)]);
        let actions = Arc::new(Actions::default());
        let scaler = scaler(&datastore, None, actions.clone());

        scaler.tick();
        assert!(actions.stopped.lock().is_empty());
        assert!(actions.deployed.lock().is_empty());
    }

    #[test]
    fn forced_downscale_drops_the_slowest_variant() {
        let datastore = fleet(vec![
            variant(1000, "resnet50", 100.0, 1),
            variant(1001, "resnet50", 40.0, 1),
        ]);
        let actions = Arc::new(Actions::default());
        let scaler = scaler(&datastore, None, actions.clone());

        scaler.tick();
        assert_eq!(
            actions.stopped.lock().as_slice(),
            &[("app1".to_owned(), 1001)]
        );
    }

    #[test]
    fn gentle_downscale_requires_the_rest_to_keep_up() {
        // Ratio ~0.6: workload 2400, effective throughput (100+300)*10.
        let datastore = fleet(vec![
            variant(1000, "resnet50", 100.0, 120),
            variant(1001, "resnet50", 300.0, 120),
        ]);
        let actions = Arc::new(Actions::default());
        let scaler = scaler(&datastore, None, actions.clone());

        scaler.tick();
        // Dropping 1000 leaves 3000 >= 2400; dropping 1001 would not.
        assert_eq!(
            actions.stopped.lock().as_slice(),
            &[("app1".to_owned(), 1000)]
        );
    }

    #[test]
    fn in_band_ratios_take_no_action() {
        // Ratio ~0.9: workload 900 against effective throughput 1000.
        let datastore = fleet(vec![variant(1000, "resnet50", 100.0, 90)]);
        let actions = Arc::new(Actions::default());
        let scaler = scaler(
            &datastore,
            Some(proposed_placement(&datastore)),
            actions.clone(),
        );

        scaler.tick();
        assert!(actions.deployed.lock().is_empty());
        assert!(actions.stopped.lock().is_empty());
    }
}
