// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! CSV log of executed inference batches.

use crate::error::Error;
use parking_lot::Mutex;
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Appends one row per executed batch to
/// `<log_dir>/worker-<id>.csv` with the header
/// `timestamp,worker_id,variant_id,variant_name,batch_size`.
pub struct InferenceLog {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl InferenceLog {
    /// Creates (truncating) the log file for one worker.
    pub fn create(log_dir: &Path, worker_id: u32) -> Result<Self, Error> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("worker-{worker_id}.csv"));
        let mut writer = csv::Writer::from_path(&path).map_err(Error::LogRow)?;
        writer.write_record([
            "timestamp",
            "worker_id",
            "variant_id",
            "variant_name",
            "batch_size",
        ])?;
        writer.flush()?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// The file this log writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one inference record.
    pub fn record(
        &self,
        timestamp: f64,
        worker_id: u32,
        variant_id: u32,
        variant_name: &str,
        batch_size: u32,
    ) -> Result<(), Error> {
        let mut writer = self.writer.lock();
        writer.write_record([
            timestamp.to_string(),
            worker_id.to_string(),
            variant_id.to_string(),
            variant_name.to_owned(),
            batch_size.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = InferenceLog::create(dir.path(), 7).expect("create log");
        log.record(12.5, 7, 1000, "resnet50", 32).expect("record");
        log.record(13.0, 7, 1000, "resnet50", 32).expect("record");

        let contents = fs::read_to_string(log.path()).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,worker_id,variant_id,variant_name,batch_size"
        );
        assert_eq!(lines[1], "12.5,7,1000,resnet50,32");
        assert_eq!(lines.len(), 3);
    }
}
