//! Per-point scan record sink.
//!
//! The scan engine forwards one [`PointRecord`] per acquisition to a
//! [`ScanRecorder`]. The JSON-lines recorder shipped here writes one file
//! per scan under the session directory; its on-disk layout is a convenience,
//! not a contract. Tests use [`MemoryRecorder`].

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acquisition::DetectorOutcome;

/// Everything recorded for one scan point.
///
/// For 1-D scans both axis slots name the same axis, so a consumer can
/// treat every scan as a (possibly degenerate) two-column raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    /// The command line that started the scan.
    pub command: String,
    pub outer_axis: String,
    pub outer_position: f64,
    pub inner_axis: String,
    pub inner_position: f64,
    /// Dwell time at this point, seconds.
    pub dwell_s: f64,
    pub readings: Vec<DetectorOutcome>,
    pub timestamp: DateTime<Utc>,
}

/// Sink for per-point scan records, addressed by scan index.
#[async_trait]
pub trait ScanRecorder: Send {
    async fn append(&mut self, scan_index: u32, record: &PointRecord) -> Result<()>;
}

/// Writes one `scan_NNNN/scan_NNNN.jsonl` file per scan.
pub struct JsonlRecorder {
    save_dir: PathBuf,
    open: Option<(u32, File)>,
}

impl JsonlRecorder {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            open: None,
        }
    }

    fn file_for(&mut self, scan_index: u32) -> Result<&mut File> {
        let stale = self
            .open
            .as_ref()
            .map(|(index, _)| *index != scan_index)
            .unwrap_or(true);
        if stale {
            let dir = self.save_dir.join(format!("scan_{scan_index:04}"));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create scan directory {}", dir.display()))?;
            let path = dir.join(format!("scan_{scan_index:04}.jsonl"));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open scan file {}", path.display()))?;
            self.open = Some((scan_index, file));
        }
        let (_, file) = self.open.as_mut().context("scan file not open")?;
        Ok(file)
    }
}

#[async_trait]
impl ScanRecorder for JsonlRecorder {
    async fn append(&mut self, scan_index: u32, record: &PointRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("cannot serialize point record")?;
        let file = self.file_for(scan_index)?;
        writeln!(file, "{line}").context("cannot write point record")?;
        Ok(())
    }
}

/// Collects records in memory; the test double for the file recorder.
#[derive(Default)]
pub struct MemoryRecorder {
    pub records: Vec<(u32, PointRecord)>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanRecorder for MemoryRecorder {
    async fn append(&mut self, scan_index: u32, record: &PointRecord) -> Result<()> {
        self.records.push((scan_index, record.clone()));
        Ok(())
    }
}
