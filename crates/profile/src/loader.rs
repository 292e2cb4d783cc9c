// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Reads the on-disk profiling artifacts into [`VariantProfile`]s.
//!
//! The artifact layout under the data directory is:
//!
//! ```text
//! <root>/traces/<hardware>/<variant>_batch-size<bs>.csv   kernel traces
//! <root>/memory/<hardware>/<variant>.csv                  batch_size,total_reserved
//! <root>/inference-times/<hardware>/<variant>.csv         batch_size,inference_time
//! ```
//!
//! A missing artifact is not an error: the corresponding table stays empty,
//! which downstream code treats as "not deployable".

use crate::kernel::Kernel;
use crate::{BATCH_SIZES, VariantProfile, median};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct MemoryRow {
    batch_size: u32,
    total_reserved: u64,
}

#[derive(Debug, Deserialize)]
struct TimingRow {
    batch_size: u32,
    inference_time: f64,
}

/// Loads profiles from a data directory.
#[derive(Debug, Clone)]
pub struct ProfileLoader {
    root: PathBuf,
}

impl ProfileLoader {
    /// Creates a loader rooted at the given data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory this loader reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the three artifacts of one `(hardware, variant)` pair.
    #[must_use]
    pub fn load(&self, hardware_platform: &str, name: &str) -> VariantProfile {
        VariantProfile::from_parts(
            name,
            hardware_platform,
            self.load_throughput(hardware_platform, name),
            self.load_memory(hardware_platform, name),
            self.load_kernels(hardware_platform, name),
        )
    }

    fn load_kernels(&self, hardware_platform: &str, name: &str) -> BTreeMap<u32, Vec<Kernel>> {
        let mut kernels = BTreeMap::new();
        for batch_size in BATCH_SIZES {
            let path = self
                .root
                .join("traces")
                .join(hardware_platform)
                .join(format!("{name}_batch-size{batch_size}.csv"));
            let rows: Vec<Kernel> = read_rows(&path);
            if !rows.is_empty() {
                let _ = kernels.insert(batch_size, rows);
            }
        }
        kernels
    }

    fn load_memory(&self, hardware_platform: &str, name: &str) -> BTreeMap<u32, u64> {
        let path = self
            .root
            .join("memory")
            .join(hardware_platform)
            .join(format!("{name}.csv"));
        read_rows::<MemoryRow>(&path)
            .into_iter()
            .map(|row| (row.batch_size, row.total_reserved))
            .collect()
    }

    /// Throughput per batch size, derived from the median observed
    /// inference time.
    fn load_throughput(&self, hardware_platform: &str, name: &str) -> BTreeMap<u32, f64> {
        let path = self
            .root
            .join("inference-times")
            .join(hardware_platform)
            .join(format!("{name}.csv"));

        let mut samples: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for row in read_rows::<TimingRow>(&path) {
            samples.entry(row.batch_size).or_default().push(row.inference_time);
        }

        samples
            .into_iter()
            .filter_map(|(batch_size, times)| {
                let mid = median(&times);
                (mid > 0.0).then_some((batch_size, f64::from(batch_size) / mid))
            })
            .collect()
    }
}

/// Deserializes every row of a CSV file, skipping rows that fail to parse.
/// A file that cannot be opened yields no rows.
fn read_rows<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            debug!(path = %path.display(), %err, "profile artifact unavailable");
            return Vec::new();
        }
    };
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        match row {
            Ok(row) => rows.push(row),
            Err(err) => warn!(path = %path.display(), %err, "skipping malformed row"),
        }
    }
    rows
}
