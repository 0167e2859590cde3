//! Scan session bookkeeping.
//!
//! A session names the directory scans are stored under:
//! `<base>/<YYYYMMDD>/<session>/scan_NNNN`. The scan index increments by
//! exactly one per completed scan (success or abort) and is never reused
//! within a session; on open, the next free index is rediscovered from the
//! `scan_NNNN` entries already on disk so a restarted process cannot
//! overwrite earlier data.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

pub struct ScanSession {
    base_dir: PathBuf,
    session_name: String,
    save_dir: PathBuf,
    scan_index: u32,
}

impl ScanSession {
    /// Open (or create) the dated session directory and discover the next
    /// free scan index.
    pub fn open(base_dir: impl Into<PathBuf>, session_name: &str) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        let save_dir = base_dir
            .join(Local::now().format("%Y%m%d").to_string())
            .join(session_name);
        std::fs::create_dir_all(&save_dir)?;
        let scan_index = next_free_index(&save_dir)?;

        info!(
            session = session_name,
            dir = %save_dir.display(),
            next_scan = scan_index,
            "session opened"
        );
        Ok(Self {
            base_dir,
            session_name: session_name.to_string(),
            save_dir,
            scan_index,
        })
    }

    /// Switch to a different session under the same base directory.
    pub fn switch(&mut self, session_name: &str) -> std::io::Result<()> {
        *self = Self::open(self.base_dir.clone(), session_name)?;
        Ok(())
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn scan_index(&self) -> u32 {
        self.scan_index
    }

    /// Storage directory of the current scan.
    pub fn scan_dir(&self) -> PathBuf {
        self.save_dir.join(format!("scan_{:04}", self.scan_index))
    }

    /// Move on to the next storage unit. Called once per scan, after it
    /// completes or aborts.
    pub fn advance(&mut self) {
        self.scan_index += 1;
    }
}

/// Highest existing `scan_NNNN` entry plus one, or 0 on a fresh session.
fn next_free_index(dir: &Path) -> std::io::Result<u32> {
    let mut next = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix("scan_"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        next = next.max(index + 1);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let session = ScanSession::open(dir.path(), "align").unwrap();

        assert_eq!(session.scan_index(), 0);
        assert!(session.save_dir().ends_with("align"));
        assert!(session.scan_dir().ends_with("scan_0000"));
    }

    #[test]
    fn test_index_resumes_after_existing_scans() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = ScanSession::open(dir.path(), "run1").unwrap();
            std::fs::create_dir_all(session.scan_dir()).unwrap();
            session.advance();
            std::fs::create_dir_all(session.scan_dir()).unwrap();
        }

        // a restarted process must not reuse scan_0001
        let session = ScanSession::open(dir.path(), "run1").unwrap();
        assert_eq!(session.scan_index(), 2);
    }

    #[test]
    fn test_switch_changes_directory_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScanSession::open(dir.path(), "first").unwrap();
        std::fs::create_dir_all(session.scan_dir()).unwrap();
        session.advance();

        session.switch("second").unwrap();
        assert_eq!(session.session_name(), "second");
        assert_eq!(session.scan_index(), 0);
        assert!(session.save_dir().ends_with("second"));
    }
}
