// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Roomie placement: co-location aware, driven by a kernel-interference
//! heuristic.
//!
//! For every feasible `(candidate, worker, batch size)` combination the
//! heuristic predicts how much each co-resident model would slow down if
//! the candidate landed there, as a relative duration increase per model
//! (the perf-drop vector). The combination with the lowest mean perf-drop
//! wins; an empty worker is a perfect host with a perf-drop of zero.

use crate::{Error, Placement, PlacementStrategy};
use gpufleet_profile::{BATCH_SIZES, ProfileCache, median};
use gpufleet_state::{MAX_GPU_MEMORY_OCCUPANCY, Variant, Worker};
use rand::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Probability that one kernel of a co-resident model interferes with an
/// execution slot.
const INTERFERENCE_PROBABILITY: f64 = 0.8;

/// Interference-minimizing placement strategy.
///
/// Perf-drop vectors are memoised per co-resident set, keyed by the
/// hardware platform and the sorted `name_batch` list, so repeated
/// scheduling rounds over a stable fleet do not re-simulate.
pub struct RoomieScheduler {
    cache: Arc<ProfileCache>,
    history: HashMap<String, Vec<f64>>,
    rng: StdRng,
}

impl RoomieScheduler {
    /// Creates the strategy over a shared profile cache.
    #[must_use]
    pub fn new(cache: Arc<ProfileCache>) -> Self {
        Self::with_rng(cache, StdRng::from_rng(&mut rand::rng()))
    }

    /// Creates the strategy with a seeded generator, making the
    /// interference draws reproducible.
    #[must_use]
    pub fn with_seed(cache: Arc<ProfileCache>, seed: u64) -> Self {
        Self::with_rng(cache, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cache: Arc<ProfileCache>, rng: StdRng) -> Self {
        Self {
            cache,
            history: HashMap::new(),
            rng,
        }
    }

    /// Every feasible candidate on one worker, with its perf-drop vector.
    fn compute(
        &mut self,
        name: &str,
        worker: &Worker,
    ) -> Result<Vec<(Variant, Vec<f64>)>, Error> {
        let mut results = Vec::new();
        for batch_size in BATCH_SIZES {
            let profile = self.cache.load(worker.hardware_platform(), name);
            let variant = Variant::from_profile(profile, batch_size);
            if !variant.deployable()
                || worker.percent_occupation(variant.memory()) > MAX_GPU_MEMORY_OCCUPANCY
            {
                continue;
            }

            if worker.variants().is_empty() {
                results.push((variant, vec![0.0]));
                continue;
            }

            let mut models: Vec<&Variant> = vec![&variant];
            models.extend(worker.variants());
            let key = build_key(worker.hardware_platform(), &models);

            if let Some(perf_drops) = self.history.get(&key) {
                let perf_drops = perf_drops.clone();
                results.push((variant, perf_drops));
                continue;
            }

            let (isolated, interfered) = self.heuristic(&models)?;
            let perf_drops: Vec<f64> = isolated
                .iter()
                .zip(&interfered)
                .map(|(d, nd)| if *nd > 0.0 { (nd - d) / nd } else { 0.0 })
                .collect();
            let _ = self.history.insert(key, perf_drops.clone());
            results.push((variant, perf_drops));
        }
        Ok(results)
    }

    /// Predicts isolated and co-located durations for a set of models.
    ///
    /// Each model's kernel-duration sequence is expanded into a tapered
    /// mask matrix; every other model samples interference against those
    /// rows with a Bernoulli draw per cell and adds the median row sum,
    /// scaled by the length ratio of the two kernel sequences.
    fn heuristic(&mut self, models: &[&Variant]) -> Result<(Vec<f64>, Vec<f64>), Error> {
        let isolated: Vec<f64> = models.iter().map(|m| m.isolated_duration()).collect();
        let mut interfered = isolated.clone();

        let lengths: Vec<usize> = models.iter().map(|m| m.kernels().len()).collect();
        let masks: Vec<Vec<Vec<f64>>> = models
            .iter()
            .map(|m| {
                let durations: Vec<f64> =
                    m.kernels().iter().map(|kernel| kernel.duration).collect();
                create_mask(&durations)
            })
            .collect();

        for i in 0..models.len() {
            for j in 0..models.len() {
                if i == j || lengths[i] == 0 || lengths[j] == 0 {
                    continue;
                }
                let pressure = (lengths[i] as f64 / lengths[j] as f64 / 2.0).ceil();
                let mut sums = Vec::with_capacity(masks[j].len());
                for row in &masks[j] {
                    let mut sum = 0.0;
                    for &duration in row {
                        if self.rng.random_bool(INTERFERENCE_PROBABILITY) {
                            sum += duration;
                        }
                    }
                    sums.push(sum);
                }
                interfered[i] += pressure * median(&sums);
            }
        }

        if isolated.iter().zip(&interfered).any(|(d, nd)| nd < d) {
            return Err(Error::InterferenceInvariant {
                models: models
                    .iter()
                    .map(|m| format!("({}, {})", m.name, m.batch_size))
                    .collect::<Vec<_>>()
                    .join(" "),
                isolated,
                interfered,
            });
        }
        Ok((isolated, interfered))
    }
}

impl PlacementStrategy for RoomieScheduler {
    fn schedule(
        &mut self,
        workers: &[Worker],
        candidates: &[String],
    ) -> Result<Option<Placement>, Error> {
        let mut simulations = Vec::new();
        for name in candidates {
            for worker in workers {
                for (variant, perf_drops) in self.compute(name, worker)? {
                    simulations.push((variant, worker.clone(), perf_drops));
                }
            }
        }

        if simulations.is_empty() {
            warn!(?candidates, "no feasible placement");
            return Ok(None);
        }

        simulations.sort_by(|a, b| mean(&a.2).total_cmp(&mean(&b.2)));
        Ok(simulations
            .into_iter()
            .next()
            .map(|(variant, worker, _)| Placement { variant, worker }))
    }
}

/// Expands a kernel-duration sequence into a tapered mask matrix.
///
/// The matrix has `min(⌈L/2⌉, 5)` rows, rounded up to odd. The middle row
/// is the untouched sequence; rows above zero a widening prefix, rows below
/// a widening suffix, modeling partial overlap at either end of a forward
/// pass.
fn create_mask(values: &[f64]) -> Vec<Vec<f64>> {
    let len = values.len();
    let mut rows = len.div_ceil(2).min(5).max(1);
    if rows % 2 == 0 {
        rows += 1;
    }
    let mut mask = vec![values.to_vec(); rows];
    let max_pad = rows / 2;
    for pad in 1..=max_pad {
        for j in 0..pad {
            mask[pad - 1][j] = 0.0;
        }
        for j in len - pad..len {
            mask[rows - pad][j] = 0.0;
        }
    }
    mask
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn build_key(hardware_platform: &str, models: &[&Variant]) -> String {
    let mut parts: Vec<String> = models
        .iter()
        .map(|m| format!("{}_{}", m.name, m.batch_size))
        .collect();
    parts.sort();
    format!("{hardware_platform}_{}", parts.join("+"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{GIB, ProfileFixture, worker};

    const KERNELS: [(f64, f64); 6] = [
        (120.0, 70.0),
        (45.0, 55.0),
        (200.0, 80.0),
        (15.0, 30.0),
        (90.0, 65.0),
        (60.0, 50.0),
    ];

    fn fixture() -> ProfileFixture {
        let fixture = ProfileFixture::new();
        fixture.add("xavier", "resnet50", &[(32, 200.0, 2 * GIB)]);
        fixture.add_kernels("xavier", "resnet50", 32, &KERNELS[..4]);
        fixture.add("xavier", "resnet152", &[(64, 90.0, 4 * GIB)]);
        fixture.add_kernels("xavier", "resnet152", 64, &KERNELS);
        fixture
    }

    #[test]
    fn mask_tapers_both_ends() {
        let mask = create_mask(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(mask.len(), 5);

        assert_eq!(mask[0], vec![0.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(mask[1], vec![0.0, 0.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(mask[2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(mask[3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]);
        assert_eq!(mask[4], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 0.0]);
    }

    #[test]
    fn mask_of_a_short_sequence_is_a_single_row() {
        assert_eq!(create_mask(&[7.0]), vec![vec![7.0]]);
        assert_eq!(create_mask(&[7.0, 9.0]), vec![vec![7.0, 9.0]]);
    }

    #[test]
    fn heuristic_never_shrinks_a_duration() {
        let fixture = fixture();
        let cache = fixture.cache();
        let mut scheduler = RoomieScheduler::with_seed(cache.clone(), 7);

        let a = Variant::from_profile(cache.load("xavier", "resnet50"), 32);
        let b = Variant::from_profile(cache.load("xavier", "resnet152"), 64);
        let (isolated, interfered) = scheduler.heuristic(&[&a, &b]).expect("heuristic");

        for (d, nd) in isolated.iter().zip(&interfered) {
            assert!(nd >= d, "interfered {nd} below isolated {d}");
            let drop = (nd - d) / nd;
            assert!((0.0..1.0).contains(&drop), "perf-drop {drop} out of range");
        }
    }

    #[test]
    fn empty_worker_is_preferred_over_a_busy_one() {
        let fixture = fixture();
        let cache = fixture.cache();
        let mut scheduler = RoomieScheduler::with_seed(cache.clone(), 7);

        let mut busy = worker(1, "xavier", 16);
        let mut resident = Variant::from_profile(cache.load("xavier", "resnet152"), 64);
        resident.id = 2000;
        busy.add_variant(resident);
        let idle = worker(2, "xavier", 16);

        let placement = scheduler
            .schedule(&[busy, idle], &["resnet50".to_owned()])
            .expect("schedule")
            .expect("placement");
        assert_eq!(placement.worker.id(), 2);
        assert_eq!(placement.variant.name, "resnet50");
        assert_eq!(placement.variant.id, 0);
    }

    #[test]
    fn co_resident_sets_are_memoised() {
        let fixture = fixture();
        let cache = fixture.cache();
        let mut scheduler = RoomieScheduler::with_seed(cache.clone(), 7);

        let mut busy = worker(1, "xavier", 16);
        let mut resident = Variant::from_profile(cache.load("xavier", "resnet152"), 64);
        resident.id = 2000;
        busy.add_variant(resident);
        let fleet = [busy];

        let first = scheduler
            .schedule(&fleet, &["resnet50".to_owned()])
            .expect("schedule");
        assert!(first.is_some());
        assert_eq!(scheduler.history.len(), 1);
        assert!(
            scheduler
                .history
                .contains_key("xavier_resnet152_64+resnet50_32")
        );

        // The second round reuses the memoised vector, so no further draws
        // happen and the decision is identical.
        let second = scheduler
            .schedule(&fleet, &["resnet50".to_owned()])
            .expect("schedule");
        assert_eq!(scheduler.history.len(), 1);
        assert!(second.is_some());
    }

    #[test]
    fn infeasible_fleets_yield_no_placement() {
        let fixture = fixture();
        let mut scheduler = RoomieScheduler::with_seed(fixture.cache(), 7);

        assert!(
            scheduler
                .schedule(&[], &["resnet50".to_owned()])
                .expect("schedule")
                .is_none()
        );

        // 2 GiB of model on a 2 GiB GPU blows the 90% cap.
        let tiny = worker(1, "xavier", 2);
        assert!(
            scheduler
                .schedule(&[tiny], &["resnet50".to_owned()])
                .expect("schedule")
                .is_none()
        );
    }
}
