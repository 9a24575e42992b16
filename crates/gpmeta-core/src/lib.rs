pub mod cancel;
pub mod cleanup;
pub mod engine;
pub mod matcher;
pub mod report;
pub mod resolve;
pub mod scan;
pub mod sidecar;
pub mod verify;
pub mod writer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::info;

pub use cancel::{CancellationToken, CancelledError};
pub use cleanup::CleanupOutcome;
pub use engine::{EngineError, ExifTool, MetadataEngine};
pub use report::{FileOutcome, RunReport};
pub use resolve::{Pairing, ResolveOutcome};
pub use scan::ScanResult;
pub use sidecar::MetadataRecord;
pub use verify::VerifyOutcome;
pub use writer::WriteOutcome;

/// Options threaded through a pipeline run. Confirmation prompting is the
/// caller's job, before the run starts; nothing here is ambient state.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub root: PathBuf,
    pub recursive: bool,
    /// Full pairing and extraction, but no writes or deletes.
    pub dry_run: bool,
    /// Read written tags back and compare (attach mode).
    pub verify: bool,
    /// Delete sidecars without verification (cleanup mode). Dangerous.
    pub waive_verification: bool,
    /// Worker threads for per-pairing engine work; 0 picks the default.
    pub jobs: usize,
}

impl PipelineOptions {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            recursive: false,
            dry_run: false,
            verify: true,
            waive_verification: false,
            jobs: 0,
        }
    }
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter - emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap();
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Scan the tree and resolve pairings, producing the report skeleton shared
/// by every mode.
fn scan_and_resolve(
    options: &PipelineOptions,
    tp: &ThrottledProgress,
) -> anyhow::Result<(ResolveOutcome, RunReport)> {
    tp.report("scan", 0, 1, "Scanning directory tree");
    let scanned = scan::scan(&options.root, options.recursive)?;
    let total_media = scanned.total_media() as u64;
    let total_sidecars = scanned.total_sidecars() as u64;
    tp.report(
        "scan",
        1,
        1,
        &format!("{total_media} media, {total_sidecars} sidecars"),
    );

    let mut report = RunReport {
        total_media,
        total_sidecars,
        scan_errors: scanned.errors.clone(),
        ..Default::default()
    };

    let outcome = resolve::resolve_all(scanned.directories);
    report.pairings = outcome.pairings.len() as u64;
    for pairing in &outcome.pairings {
        let dir = pairing
            .media
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        report.count_pairing(&pairing.media.extension, &dir);
    }
    report.unmatched_media = outcome.unmatched.iter().map(|m| m.path.clone()).collect();
    report.ambiguous = outcome
        .ambiguous
        .iter()
        .map(|a| report::AmbiguityReport {
            media: a.media.path.clone(),
            candidates: a.candidates.iter().map(|c| c.path.clone()).collect(),
        })
        .collect();
    report.orphan_sidecars = outcome
        .leftover_sidecars
        .iter()
        .map(|s| s.path.clone())
        .collect();

    info!(
        pairings = report.pairings,
        unmatched = report.unmatched_media.len(),
        ambiguous = report.ambiguous.len(),
        "resolution complete"
    );
    Ok((outcome, report))
}

fn outcome_skeleton(pairing: &Pairing) -> FileOutcome {
    FileOutcome {
        media_path: pairing.media.path.clone(),
        sidecar_path: pairing.sidecar.path.clone(),
        extension: pairing.media.extension.clone(),
        directory: pairing
            .media
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default(),
        parse_error: None,
        write: None,
        verify: None,
        cleanup: None,
    }
}

/// Scan and resolve only. Read-only; needs no engine.
pub fn run_stats(
    options: &PipelineOptions,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunReport> {
    let tp = ThrottledProgress::new(progress_callback);
    let (_, report) = scan_and_resolve(options, &tp)?;
    Ok(report)
}

/// Attach metadata: scan, resolve, then extract/write/verify each pairing.
/// Sidecars are never deleted here, so attach is safe to re-run.
///
/// Pairings are processed in parallel; each touches a disjoint media file
/// and sidecar. Cancellation is honored between pairings only, never during
/// an engine invocation.
pub fn run_attach(
    options: &PipelineOptions,
    engine: &dyn MetadataEngine,
    token: Option<&CancellationToken>,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunReport> {
    let tp = ThrottledProgress::new(progress_callback);
    let (outcome, mut report) = scan_and_resolve(options, &tp)?;

    let total = outcome.pairings.len() as u64;
    let counter = AtomicU64::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()?;
    let outcomes: Vec<Option<FileOutcome>> = pool.install(|| {
        outcome
            .pairings
            .par_iter()
            .map(|pairing| {
                if token.map_or(false, |t| t.is_cancelled()) {
                    return None;
                }
                let file_outcome = attach_one(engine, pairing, options);
                let current = counter.fetch_add(1, Ordering::Relaxed);
                tp.report("attach", current, total, &pairing.media.filename);
                Some(file_outcome)
            })
            .collect()
    });

    report.cancelled = token.map_or(false, |t| t.is_cancelled());
    for file_outcome in outcomes.into_iter().flatten() {
        report.absorb(&file_outcome);
    }
    Ok(report)
}

fn attach_one(
    engine: &dyn MetadataEngine,
    pairing: &Pairing,
    options: &PipelineOptions,
) -> FileOutcome {
    let mut out = outcome_skeleton(pairing);
    let record = match sidecar::extract(&pairing.sidecar.path) {
        Ok(record) => record,
        Err(e) => {
            out.parse_error = Some(e.to_string());
            return out;
        }
    };

    let write = writer::write_metadata(engine, &pairing.media, &record, options.dry_run);
    let verify = (options.verify && write == WriteOutcome::Written)
        .then(|| verify::verify_metadata(engine, &pairing.media, &record));
    out.write = Some(write);
    out.verify = verify;
    out
}

/// Cleanup: delete each pairing's sidecar once the media file's metadata
/// verifies (or verification is waived). Unmatched and ambiguous sidecars
/// are never deleted. The engine may be omitted only when verification is
/// waived.
pub fn run_cleanup(
    options: &PipelineOptions,
    engine: Option<&dyn MetadataEngine>,
    token: Option<&CancellationToken>,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunReport> {
    if engine.is_none() && !options.waive_verification {
        anyhow::bail!("cleanup requires the metadata engine unless verification is waived");
    }

    let tp = ThrottledProgress::new(progress_callback);
    let (outcome, mut report) = scan_and_resolve(options, &tp)?;

    let total = outcome.pairings.len() as u64;
    let counter = AtomicU64::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()?;
    let outcomes: Vec<Option<FileOutcome>> = pool.install(|| {
        outcome
            .pairings
            .par_iter()
            .map(|pairing| {
                if token.map_or(false, |t| t.is_cancelled()) {
                    return None;
                }
                let file_outcome = cleanup_one(engine, pairing, options);
                let current = counter.fetch_add(1, Ordering::Relaxed);
                tp.report("cleanup", current, total, &pairing.sidecar.filename);
                Some(file_outcome)
            })
            .collect()
    });

    report.cancelled = token.map_or(false, |t| t.is_cancelled());
    for file_outcome in outcomes.into_iter().flatten() {
        report.absorb(&file_outcome);
    }
    Ok(report)
}

fn cleanup_one(
    engine: Option<&dyn MetadataEngine>,
    pairing: &Pairing,
    options: &PipelineOptions,
) -> FileOutcome {
    let mut out = outcome_skeleton(pairing);

    let verify = if options.waive_verification {
        None
    } else {
        // Engine presence was checked up front.
        let engine = engine.expect("engine required for verified cleanup");
        match sidecar::extract(&pairing.sidecar.path) {
            Ok(record) => Some(verify::verify_metadata(engine, &pairing.media, &record)),
            Err(e) => {
                out.parse_error = Some(e.to_string());
                out.cleanup = Some(CleanupOutcome::Retained(
                    "sidecar could not be parsed".to_string(),
                ));
                return out;
            }
        }
    };

    out.cleanup = Some(if options.dry_run {
        CleanupOutcome::Retained("dry run".to_string())
    } else {
        cleanup::cleanup_sidecar(pairing, verify.as_ref(), options.waive_verification)
    });
    out.verify = verify;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::fake::FakeEngine;
    use std::fs;
    use tempfile::tempdir;

    const SIDECAR_JSON: &[u8] = br#"{
        "title": "IMG_0001.jpg",
        "description": "first day",
        "photoTakenTime": {"timestamp": "1577882096"},
        "geoData": {"latitude": 35.6586, "longitude": 139.7454, "altitude": 12.0}
    }"#;

    fn no_progress() -> &'static ProgressCallback {
        &|_, _, _, _| {}
    }

    fn fixture() -> (tempfile::TempDir, PipelineOptions) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("IMG_0001.jpg"), b"jpeg").unwrap();
        fs::write(
            dir.path().join("IMG_0001.jpg.supplemental-metadata.json"),
            SIDECAR_JSON,
        )
        .unwrap();
        fs::write(dir.path().join("IMG_0002.jpg"), b"jpeg").unwrap();
        let options = PipelineOptions {
            jobs: 1,
            ..PipelineOptions::new(dir.path().to_path_buf())
        };
        (dir, options)
    }

    #[test]
    fn test_attach_writes_and_verifies() {
        let (dir, options) = fixture();
        let engine = FakeEngine::new();
        let report = run_attach(&options, &engine, None, no_progress()).unwrap();

        assert_eq!(report.pairings, 1);
        assert_eq!(report.written, 1);
        assert_eq!(report.verified, 1);
        assert_eq!(report.unmatched_media.len(), 1);
        assert_eq!(report.by_extension["jpg"], 1);
        // Attach never deletes sidecars.
        assert!(dir
            .path()
            .join("IMG_0001.jpg.supplemental-metadata.json")
            .exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (_dir, mut options) = fixture();
        options.dry_run = true;
        let engine = FakeEngine::new();
        let report = run_attach(&options, &engine, None, no_progress()).unwrap();

        assert_eq!(report.skipped_dry_run, 1);
        assert_eq!(report.written, 0);
        assert!(engine.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_deletes_only_verified() {
        let (dir, options) = fixture();
        let sidecar_path = dir.path().join("IMG_0001.jpg.supplemental-metadata.json");
        let engine = FakeEngine::new();

        // Nothing written yet: verification fails and the sidecar stays.
        let report = run_cleanup(&options, Some(&engine), None, no_progress()).unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.retained, 1);
        assert!(sidecar_path.exists());

        // Attach, then cleanup succeeds.
        run_attach(&options, &engine, None, no_progress()).unwrap();
        let report = run_cleanup(&options, Some(&engine), None, no_progress()).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!sidecar_path.exists());
    }

    #[test]
    fn test_cleanup_without_engine_requires_waiver() {
        let (_dir, mut options) = fixture();
        assert!(run_cleanup(&options, None, None, no_progress()).is_err());

        options.waive_verification = true;
        let report = run_cleanup(&options, None, None, no_progress()).unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_cancelled_run_reports_it() {
        let (_dir, options) = fixture();
        let engine = FakeEngine::new();
        let token = CancellationToken::new();
        token.cancel();
        let report = run_attach(&options, &engine, Some(&token), no_progress()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.written, 0);
    }

    #[test]
    fn test_stats_is_read_only() {
        let (dir, options) = fixture();
        let report = run_stats(&options, no_progress()).unwrap();
        assert_eq!(report.pairings, 1);
        assert_eq!(report.total_media, 2);
        assert!(dir
            .path()
            .join("IMG_0001.jpg.supplemental-metadata.json")
            .exists());
    }
}
