// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The controller's shared view of the fleet.

use crate::variant::{ProfileRecord, Variant};
use crate::worker::Worker;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Fleet state shared between the controller daemons.
///
/// A single mutex guards the workers and the application registry; every
/// read hands out copies so no caller can observe a half-applied update.
#[derive(Clone, Default)]
pub struct DataStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    workers: Vec<Worker>,
    registration: BTreeMap<String, BTreeSet<String>>,
}

impl DataStore {
    /// Creates an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker mirror, one per configured outgoing port.
    pub fn register_worker(&self, worker: Worker) {
        self.inner.lock().workers.push(worker);
    }

    /// Snapshot of every worker.
    #[must_use]
    pub fn workers(&self) -> Vec<Worker> {
        self.inner.lock().workers.clone()
    }

    /// Snapshot of one worker.
    #[must_use]
    pub fn worker(&self, worker_id: u32) -> Option<Worker> {
        self.inner
            .lock()
            .workers
            .iter()
            .find(|w| w.id() == worker_id)
            .cloned()
    }

    /// Records the memory reported by a worker's HELLO. Returns false for an
    /// unknown worker.
    pub fn set_total_memory(&self, worker_id: u32, bytes: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.iter_mut().find(|w| w.id() == worker_id) {
            Some(worker) => {
                worker.set_total_memory(bytes);
                true
            }
            None => false,
        }
    }

    /// Records the platform a worker's HELLO reports. Returns false for an
    /// unknown worker.
    pub fn set_hardware_platform(&self, worker_id: u32, platform: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.iter_mut().find(|w| w.id() == worker_id) {
            Some(worker) => {
                worker.set_hardware_platform(platform);
                true
            }
            None => false,
        }
    }

    /// Sets or clears a worker's in-flight deployment barrier. Returns false
    /// for an unknown worker.
    pub fn set_deploying(&self, worker_id: u32, value: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.iter_mut().find(|w| w.id() == worker_id) {
            Some(worker) => {
                worker.set_deploying(value);
                true
            }
            None => false,
        }
    }

    /// Registers a variant name under an application. Registrations are
    /// monotonic: entries are never removed, and re-registering is a no-op.
    pub fn register_app(&self, app_id: &str, variant_name: &str) {
        let mut inner = self.inner.lock();
        let _ = inner
            .registration
            .entry(app_id.to_owned())
            .or_default()
            .insert(variant_name.to_owned());
    }

    /// Snapshot of the whole application registry.
    #[must_use]
    pub fn registration(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.inner.lock().registration.clone()
    }

    /// The variant names registered under an application, sorted.
    #[must_use]
    pub fn registered(&self, app_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .registration
            .get(app_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every running variant whose name is registered under the application.
    #[must_use]
    pub fn variants(&self, app_id: &str) -> Vec<Variant> {
        let inner = self.inner.lock();
        let Some(names) = inner.registration.get(app_id) else {
            return Vec::new();
        };
        inner
            .workers
            .iter()
            .flat_map(|worker| worker.variants())
            .filter(|variant| names.contains(&variant.name))
            .cloned()
            .collect()
    }

    /// Every `(variant, worker)` placement serving the application.
    #[must_use]
    pub fn variant_workers(&self, app_id: &str) -> Vec<(Variant, Worker)> {
        let inner = self.inner.lock();
        let Some(names) = inner.registration.get(app_id) else {
            return Vec::new();
        };
        let mut placements = Vec::new();
        for worker in &inner.workers {
            for variant in worker.variants() {
                if names.contains(&variant.name) {
                    placements.push((variant.clone(), worker.clone()));
                }
            }
        }
        placements
    }

    /// One hosted variant, by worker and deployment id.
    #[must_use]
    pub fn find_variant(&self, worker_id: u32, variant_id: u32) -> Option<Variant> {
        self.inner
            .lock()
            .workers
            .iter()
            .find(|w| w.id() == worker_id)
            .and_then(|w| w.find_variant(variant_id))
            .cloned()
    }

    /// Attaches a deployed variant to its worker mirror. Returns false for
    /// an unknown worker.
    pub fn attach_variant(&self, worker_id: u32, variant: Variant) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.iter_mut().find(|w| w.id() == worker_id) {
            Some(worker) => {
                worker.add_variant(variant);
                true
            }
            None => false,
        }
    }

    /// Detaches a variant from its worker mirror.
    pub fn remove_variant(&self, worker_id: u32, variant_id: u32) -> Option<Variant> {
        let mut inner = self.inner.lock();
        inner
            .workers
            .iter_mut()
            .find(|w| w.id() == worker_id)
            .and_then(|w| w.remove_variant(variant_id))
    }

    /// Applies one worker's telemetry atomically: every matching variant's
    /// throughput and arrival window is overwritten under a single lock
    /// acquisition. Returns how many variants were updated.
    pub fn apply_profile(&self, worker_id: u32, records: &[ProfileRecord]) -> usize {
        let mut inner = self.inner.lock();
        let Some(worker) = inner.workers.iter_mut().find(|w| w.id() == worker_id) else {
            return 0;
        };
        let mut updated = 0;
        for record in records {
            if let Some(variant) = worker
                .variants_mut()
                .iter_mut()
                .find(|v| v.id == record.variant_id)
            {
                variant.set_throughput(record.throughput);
                variant.set_input_rates(&record.input_rate);
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpufleet_profile::VariantProfile;
    use pretty_assertions::assert_eq;

    fn store_with_worker(worker_id: u32) -> DataStore {
        let store = DataStore::new();
        let mut worker = Worker::new(worker_id, "xavier");
        worker.set_total_memory(16 << 30);
        store.register_worker(worker);
        store
    }

    fn deployed_variant(id: u32, name: &str) -> Variant {
        let mut variant = Variant::from_profile(
            Arc::new(VariantProfile::empty(name, "xavier")),
            32,
        );
        variant.id = id;
        variant
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let store = DataStore::new();
        store.register_app("app1", "resnet50");
        store.register_app("app1", "resnet50");
        store.register_app("app1", "resnet152");

        assert_eq!(store.registered("app1"), vec!["resnet152", "resnet50"]);
        assert_eq!(store.registered("absent"), Vec::<String>::new());
    }

    #[test]
    fn variants_are_indexed_by_registered_name() {
        let store = store_with_worker(7);
        store.register_app("app1", "resnet50");
        assert!(store.attach_variant(7, deployed_variant(1000, "resnet50")));
        assert!(store.attach_variant(7, deployed_variant(1001, "bert")));

        let variants = store.variants("app1");
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].id, 1000);

        let placements = store.variant_workers("app1");
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].1.id(), 7);
    }

    #[test]
    fn reads_hand_out_copies() {
        let store = store_with_worker(7);
        let mut snapshot = store.workers();
        snapshot[0].set_total_memory(1);

        let fresh = store.worker(7).expect("worker");
        assert_eq!(fresh.total_memory(), 16 << 30);
    }

    #[test]
    fn apply_profile_updates_every_matching_variant() {
        let store = store_with_worker(7);
        store.register_app("app1", "resnet50");
        let _ = store.attach_variant(7, deployed_variant(1000, "resnet50"));
        let _ = store.attach_variant(7, deployed_variant(1001, "resnet50"));

        let records = vec![
            ProfileRecord {
                variant_id: 1000,
                variant_name: "resnet50".to_owned(),
                throughput: 120.0,
                input_rate: vec![5; 10],
            },
            ProfileRecord {
                variant_id: 1001,
                variant_name: "resnet50".to_owned(),
                throughput: 80.0,
                input_rate: vec![2; 10],
            },
            ProfileRecord {
                variant_id: 9999,
                variant_name: "ghost".to_owned(),
                throughput: 1.0,
                input_rate: vec![],
            },
        ];
        assert_eq!(store.apply_profile(7, &records), 2);

        let updated = store.find_variant(7, 1000).expect("variant");
        assert_eq!(updated.achieved_throughput(), 120.0);
        assert_eq!(updated.workload(), 50.0);
    }

    #[test]
    fn removing_a_variant_detaches_it() {
        let store = store_with_worker(7);
        let _ = store.attach_variant(7, deployed_variant(1000, "resnet50"));

        let removed = store.remove_variant(7, 1000).expect("variant");
        assert_eq!(removed.id, 1000);
        assert!(store.find_variant(7, 1000).is_none());
        assert!(store.remove_variant(7, 1000).is_none());
    }
}
