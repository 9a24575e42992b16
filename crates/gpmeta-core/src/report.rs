use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::cleanup::CleanupOutcome;
use crate::scan::ScanError;
use crate::verify::VerifyOutcome;
use crate::writer::WriteOutcome;

/// Everything that happened to one pairing, individually attributable even
/// when processing ran in parallel.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub media_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub extension: String,
    pub directory: PathBuf,
    pub parse_error: Option<String>,
    pub write: Option<WriteOutcome>,
    pub verify: Option<VerifyOutcome>,
    pub cleanup: Option<CleanupOutcome>,
}

/// An ambiguous pairing needing manual review.
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguityReport {
    pub media: PathBuf,
    pub candidates: Vec<PathBuf>,
}

/// A per-file failure with the offending path and reason.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate outcome of one pipeline run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub total_media: u64,
    pub total_sidecars: u64,
    pub pairings: u64,

    pub written: u64,
    pub skipped_dry_run: u64,
    pub write_failed: u64,
    pub parse_failed: u64,

    pub verified: u64,
    pub mismatched: u64,
    pub unverifiable: u64,

    pub deleted: u64,
    pub retained: u64,

    /// Committed pairings per media extension.
    pub by_extension: BTreeMap<String, u64>,
    /// Committed pairings per directory.
    pub by_directory: BTreeMap<String, u64>,

    pub unmatched_media: Vec<PathBuf>,
    pub ambiguous: Vec<AmbiguityReport>,
    /// Sidecars with no committed pairing; always retained on disk.
    pub orphan_sidecars: Vec<PathBuf>,
    pub scan_errors: Vec<ScanError>,

    pub failures: Vec<FailureReport>,
    pub mismatches: Vec<FailureReport>,
    pub retained_sidecars: Vec<FailureReport>,

    pub cancelled: bool,
}

impl RunReport {
    /// Count a committed pairing in the per-extension and per-directory
    /// breakdowns. Filled at resolve time so `stats` runs see it too.
    pub fn count_pairing(&mut self, extension: &str, directory: &std::path::Path) {
        *self.by_extension.entry(extension.to_string()).or_default() += 1;
        *self
            .by_directory
            .entry(directory.display().to_string())
            .or_default() += 1;
    }

    /// Fold one pairing's outcome into the aggregate.
    pub fn absorb(&mut self, outcome: &FileOutcome) {
        if let Some(reason) = &outcome.parse_error {
            self.parse_failed += 1;
            self.failures.push(FailureReport {
                path: outcome.sidecar_path.clone(),
                reason: reason.clone(),
            });
        }

        match &outcome.write {
            Some(WriteOutcome::Written) => self.written += 1,
            Some(WriteOutcome::SkippedDryRun) => self.skipped_dry_run += 1,
            Some(WriteOutcome::Failed(reason)) => {
                self.write_failed += 1;
                self.failures.push(FailureReport {
                    path: outcome.media_path.clone(),
                    reason: reason.clone(),
                });
            }
            None => {}
        }

        match &outcome.verify {
            Some(VerifyOutcome::Verified) => self.verified += 1,
            Some(VerifyOutcome::Mismatch {
                field,
                expected,
                actual,
            }) => {
                self.mismatched += 1;
                self.mismatches.push(FailureReport {
                    path: outcome.media_path.clone(),
                    reason: format!("{field}: expected {expected:?}, found {actual:?}"),
                });
            }
            Some(VerifyOutcome::Unverifiable(reason)) => {
                self.unverifiable += 1;
                self.mismatches.push(FailureReport {
                    path: outcome.media_path.clone(),
                    reason: format!("unverifiable: {reason}"),
                });
            }
            None => {}
        }

        match &outcome.cleanup {
            Some(CleanupOutcome::Deleted) => self.deleted += 1,
            Some(CleanupOutcome::Retained(reason)) => {
                self.retained += 1;
                self.retained_sidecars.push(FailureReport {
                    path: outcome.sidecar_path.clone(),
                    reason: reason.clone(),
                });
            }
            None => {}
        }
    }

    /// Fraction of pairings that completed their write without failure.
    pub fn success_rate(&self) -> f64 {
        if self.pairings == 0 {
            return 0.0;
        }
        let ok = self.written + self.skipped_dry_run;
        ok as f64 * 100.0 / self.pairings as f64
    }

    pub fn has_failures(&self) -> bool {
        self.write_failed > 0 || self.parse_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn outcome() -> FileOutcome {
        FileOutcome {
            media_path: Path::new("/t/a.jpg").to_path_buf(),
            sidecar_path: Path::new("/t/a.jpg.json").to_path_buf(),
            extension: "jpg".to_string(),
            directory: Path::new("/t").to_path_buf(),
            parse_error: None,
            write: Some(WriteOutcome::Written),
            verify: Some(VerifyOutcome::Verified),
            cleanup: None,
        }
    }

    #[test]
    fn test_absorb_counts() {
        let mut report = RunReport {
            pairings: 2,
            ..Default::default()
        };
        report.count_pairing("jpg", Path::new("/t"));
        report.count_pairing("jpg", Path::new("/t"));
        report.absorb(&outcome());

        let mut failed = outcome();
        failed.write = Some(WriteOutcome::Failed("boom".to_string()));
        failed.verify = None;
        report.absorb(&failed);

        assert_eq!(report.written, 1);
        assert_eq!(report.write_failed, 1);
        assert_eq!(report.verified, 1);
        assert_eq!(report.by_extension["jpg"], 2);
        assert_eq!(report.by_directory["/t"], 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.success_rate(), 50.0);
        assert!(report.has_failures());
    }

    #[test]
    fn test_mismatch_recorded_with_field() {
        let mut report = RunReport::default();
        let mut o = outcome();
        o.verify = Some(VerifyOutcome::Mismatch {
            field: "GPSLatitude",
            expected: "1".to_string(),
            actual: "2".to_string(),
        });
        report.absorb(&o);
        assert_eq!(report.mismatched, 1);
        assert!(report.mismatches[0].reason.contains("GPSLatitude"));
    }
}
