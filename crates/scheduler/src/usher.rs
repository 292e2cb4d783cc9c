// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Usher placement: pack compute-heavy and memory-heavy variants together.
//!
//! Every variant is reduced to two scalars: `Creq`, the mean achieved
//! occupancy of its kernels, and `Mreq`, its memory footprint as a percent
//! of one GPU. Variants are grouped so that grouped compute and memory
//! demand stay balanced, paired heaviest-compute against heaviest-memory,
//! and each pair lands on the worker that maximizes the co-resident demand
//! it can still accommodate.

use crate::{Error, Placement, PlacementStrategy};
use gpufleet_profile::{BATCH_SIZES, ProfileCache};
use gpufleet_state::{MAX_GPU_MEMORY_OCCUPANCY, Variant, Worker};
use std::sync::Arc;
use tracing::warn;

/// A variant is C-heavy (resp. M-heavy) when one demand exceeds the other
/// by this factor.
const HEAVY_RATIO: f64 = 1.2;

/// Grouping stops once the largest group reaches this many variants.
const MAX_GROUP_VARIANTS: usize = 4;

/// One variant scored by its compute and memory demand.
#[derive(Debug, Clone)]
struct ScoredVariant {
    variant: Variant,
    /// The worker currently hosting the variant; `None` for candidates.
    worker_id: Option<u32>,
    c_req: f64,
    m_req: f64,
}

impl ScoredVariant {
    fn new(variant: Variant, worker_id: Option<u32>, total_memory: u64) -> Self {
        let kernels = variant.kernels();
        let c_req = if kernels.is_empty() {
            0.0
        } else {
            kernels
                .iter()
                .map(|kernel| kernel.achieved_occupancy)
                .sum::<f64>()
                / kernels.len() as f64
        };
        let m_req = if total_memory == 0 {
            0.0
        } else {
            variant.memory() as f64 / total_memory as f64 * 100.0
        };
        Self {
            variant,
            worker_id,
            c_req,
            m_req,
        }
    }

    fn is_c_heavy(&self) -> bool {
        self.c_req / self.m_req >= HEAVY_RATIO
    }

    fn is_m_heavy(&self) -> bool {
        self.m_req / self.c_req >= HEAVY_RATIO
    }

    /// Combined demand, the packing score of the variant.
    fn demand(&self) -> f64 {
        self.c_req + self.m_req
    }
}

/// Demand-balancing placement strategy.
pub struct UsherScheduler {
    cache: Arc<ProfileCache>,
}

impl UsherScheduler {
    /// Creates the strategy over a shared profile cache.
    #[must_use]
    pub fn new(cache: Arc<ProfileCache>) -> Self {
        Self { cache }
    }

    /// Phase 1: seed one group per worker (its running variants) plus one
    /// singleton per unique hardware platform carrying the candidate, then
    /// merge the two groups with the most balanced combined demand until
    /// the group count or group size bound is hit.
    fn group(
        &self,
        workers: &[Worker],
        name: &str,
        batch_size: u32,
    ) -> Vec<Vec<ScoredVariant>> {
        let mut groups: Vec<Vec<ScoredVariant>> = workers
            .iter()
            .map(|worker| {
                worker
                    .variants()
                    .iter()
                    .map(|variant| {
                        ScoredVariant::new(
                            variant.clone(),
                            Some(worker.id()),
                            worker.total_memory(),
                        )
                    })
                    .collect()
            })
            .collect();

        let mut platforms_seen: Vec<&str> = Vec::new();
        for worker in workers {
            if platforms_seen.contains(&worker.hardware_platform()) {
                continue;
            }
            platforms_seen.push(worker.hardware_platform());
            let profile = self.cache.load(worker.hardware_platform(), name);
            let variant = Variant::from_profile(profile, batch_size);
            if !variant.deployable() {
                continue;
            }
            groups.push(vec![ScoredVariant::new(
                variant,
                None,
                worker.total_memory(),
            )]);
        }

        let target = workers.len().max(2);
        loop {
            let largest = groups.iter().map(Vec::len).max().unwrap_or(0);
            if groups.len() <= target || largest >= MAX_GROUP_VARIANTS {
                break;
            }

            let sums: Vec<(f64, f64)> = groups
                .iter()
                .map(|group| {
                    group.iter().fold((0.0, 0.0), |(c, m), scored| {
                        (c + scored.c_req, m + scored.m_req)
                    })
                })
                .collect();

            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..groups.len() {
                for j in i + 1..groups.len() {
                    let distance =
                        ((sums[i].0 + sums[j].0) - (sums[i].1 + sums[j].1)).abs();
                    if best.is_none_or(|(_, _, d)| distance < d) {
                        best = Some((i, j, distance));
                    }
                }
            }
            let Some((i, j, _)) = best else { break };
            let merged = groups.remove(j);
            groups[i].extend(merged);
        }
        groups
    }

    /// Phases 2 and 3 for one group: pair the heaviest C-heavy with the
    /// heaviest M-heavy variants, pair the leftovers two at a time (a lone
    /// remainder stands alone), then place every fresh candidate of each
    /// pair.
    fn place(
        &self,
        group: Vec<ScoredVariant>,
        workers: &[Worker],
    ) -> Vec<(Variant, Worker, f64)> {
        let mut group_gpus: Vec<u32> = Vec::new();
        for scored in &group {
            if let Some(id) = scored.worker_id {
                if !group_gpus.contains(&id) {
                    group_gpus.push(id);
                }
            }
        }

        let mut c_heavy = Vec::new();
        let mut m_heavy = Vec::new();
        let mut light = Vec::new();
        for scored in group {
            if scored.is_c_heavy() {
                c_heavy.push(scored);
            } else if scored.is_m_heavy() {
                m_heavy.push(scored);
            } else {
                light.push(scored);
            }
        }
        c_heavy.sort_by(|a, b| b.demand().total_cmp(&a.demand()));
        m_heavy.sort_by(|a, b| b.demand().total_cmp(&a.demand()));

        let mut pairs: Vec<Vec<ScoredVariant>> = Vec::new();
        while !c_heavy.is_empty() && !m_heavy.is_empty() {
            pairs.push(vec![c_heavy.remove(0), m_heavy.remove(0)]);
        }
        let mut remaining = c_heavy;
        remaining.append(&mut m_heavy);
        remaining.append(&mut light);
        while !remaining.is_empty() {
            let take = remaining.len().min(2);
            pairs.push(remaining.drain(..take).collect());
        }

        let mut placements = Vec::new();
        for pair in pairs {
            let hosts: Vec<u32> = pair.iter().filter_map(|s| s.worker_id).collect();
            for member in &pair {
                if member.variant.id != 0 {
                    continue;
                }
                let needed = member.variant.memory();

                let mut candidates: Vec<&Worker> = workers
                    .iter()
                    .filter(|w| {
                        hosts.contains(&w.id())
                            && w.percent_occupation(needed) <= MAX_GPU_MEMORY_OCCUPANCY
                    })
                    .collect();
                if candidates.is_empty() {
                    candidates = workers
                        .iter()
                        .filter(|w| {
                            group_gpus.contains(&w.id())
                                && w.percent_occupation(needed) <= MAX_GPU_MEMORY_OCCUPANCY
                        })
                        .collect();
                }
                if candidates.is_empty() {
                    let mut same_platform: Vec<&Worker> = workers
                        .iter()
                        .filter(|w| {
                            w.hardware_platform() == member.variant.hardware_platform
                                && w.percent_occupation(needed) <= MAX_GPU_MEMORY_OCCUPANCY
                        })
                        .collect();
                    same_platform.sort_by(|a, b| b.free_memory().cmp(&a.free_memory()));
                    candidates = same_platform.into_iter().take(1).collect();
                }
                let Some((selected, demand)) = candidates
                    .into_iter()
                    .map(|w| {
                        let co_resident: f64 = w
                            .variants()
                            .iter()
                            .map(|v| {
                                ScoredVariant::new(v.clone(), Some(w.id()), w.total_memory())
                                    .demand()
                            })
                            .sum();
                        (w, co_resident + member.demand())
                    })
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                else {
                    continue;
                };

                if !group_gpus.contains(&selected.id()) {
                    group_gpus.push(selected.id());
                }
                placements.push((member.variant.clone(), selected.clone(), demand));
            }
        }
        placements
    }
}

impl PlacementStrategy for UsherScheduler {
    fn schedule(
        &mut self,
        workers: &[Worker],
        candidates: &[String],
    ) -> Result<Option<Placement>, Error> {
        let mut placements = Vec::new();
        for name in candidates {
            for batch_size in BATCH_SIZES {
                let groups = self.group(workers, name, batch_size);
                for group in groups {
                    placements.extend(self.place(group, workers));
                }
            }
        }

        if placements.is_empty() {
            warn!(?candidates, "no feasible placement");
            return Ok(None);
        }

        placements.sort_by(|a, b| {
            b.0.profile_throughput().total_cmp(&a.0.profile_throughput())
        });
        Ok(placements
            .into_iter()
            .next()
            .map(|(variant, worker, _)| Placement { variant, worker }))
    }
}
