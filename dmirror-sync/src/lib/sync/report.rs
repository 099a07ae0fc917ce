use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use dmirror::path::{FsPath, FsPathBuf};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub path: FsPathBuf,
    pub error: dmirror::Error,
}

/// Aggregate outcome of a sync pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub folders_created: usize,
    pub folders_reused: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub failures: Vec<SyncFailure>,
    /// Some entries may not have been visited
    pub cancelled: bool,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Completed and without any failure
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "folders: {} created, {} reused; files: {} uploaded, {} skipped; {} failed",
            self.folders_created,
            self.folders_reused,
            self.files_uploaded,
            self.files_skipped,
            self.failed(),
        )
    }
}

/// Report under construction, shared by the tasks of a pass
#[derive(Debug, Default)]
pub(super) struct Tally(Mutex<SyncReport>);

impl Tally {
    fn update(&self, f: impl FnOnce(&mut SyncReport)) {
        let mut report = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut report);
    }

    pub fn folder_created(&self) {
        self.update(|r| r.folders_created += 1);
    }

    pub fn folder_reused(&self) {
        self.update(|r| r.folders_reused += 1);
    }

    pub fn file_uploaded(&self) {
        self.update(|r| r.files_uploaded += 1);
    }

    pub fn file_skipped(&self) {
        self.update(|r| r.files_skipped += 1);
    }

    pub fn failed(&self, path: &FsPath, error: dmirror::Error) {
        self.update(|r| {
            r.failures.push(SyncFailure {
                path: path.to_owned(),
                error,
            })
        });
    }

    pub fn finish(self, cancelled: bool) -> SyncReport {
        let mut report = self.0.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.cancelled = cancelled;
        report
    }
}

#[test]
fn test_report_summary() {
    let tally = Tally::default();
    tally.folder_created();
    tally.file_uploaded();
    tally.file_uploaded();
    tally.file_skipped();
    tally.failed(
        FsPath::new("/music/broken.mp3"),
        dmirror::Error::Api("503".into()),
    );
    let report = tally.finish(false);
    assert_eq!(
        report.to_string(),
        "folders: 1 created, 0 reused; files: 2 uploaded, 1 skipped; 1 failed"
    );
    assert!(!report.is_clean());
}
