// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The scan stage (§4.1, §5, §6 `scan(inbound_root) -> scan_id`): walks an inbound directory
//! tree and catalogs every audio file it finds into a fresh scan snapshot (C3).
//!
//! Grounded on the teacher's scanner (a worker pool that extracts in parallel, feeding a single
//! results channel): here a bounded pool of worker threads (default: number of cores, via
//! [`Config::analyzer_parallelism`]) extracts tags/fingerprints concurrently, while a single
//! dedicated writer — this function's own calling thread — drains completed records into the
//! snapshot store in batches, so the embedded store only ever sees one writer at a time (§5:
//! "a single dedicated writer thread drains results into the snapshot store in batches").

use crate::config::Config;
use crate::scan_store::{ScanSnapshot, MIN_INSERT_BATCH_SIZE};
use crate::scanned_file::{self, ScannedFile};
use crate::util::walk_dir;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

/// File extensions the scanner treats as candidate audio files, prior to C1's own validity check.
const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "m4a", "aac", "ogg", "opus", "wav", "alac"];

/// Cooperative cancellation handle shared between a caller and an in-flight scan (§5
/// "Cancellation").
pub type CancelToken = Arc<AtomicBool>;

/// Options controlling one `scan()` invocation.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// If set and flipped to `true` mid-scan, workers stop pulling new files and the writer
    /// flushes what it has, marking the snapshot incomplete (§5).
    pub cancel: Option<CancelToken>,
}

/// Summary of a completed (or cancelled) scan run.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// The scan id this run was assigned.
    pub scan_id: String,
    /// Path to the snapshot database file.
    pub snapshot_path: PathBuf,
    /// Total candidate files encountered.
    pub files_seen: usize,
    /// Files that passed C1 validation.
    pub files_valid: usize,
    /// `true` if the scan was cancelled before every candidate file was processed.
    pub cancelled: bool,
}

/// Generate a new scan id: a sortable UTC timestamp, matching §6's `scan_<timestamp>.db` naming.
#[must_use]
pub fn new_scan_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}

/// Returns `true` if `path`'s extension looks like an audio file worth extracting.
fn is_candidate_file(path: &Path) -> bool {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Walk `inbound_root` and collect every candidate audio file path, in directory-then-name order.
fn collect_candidates(inbound_root: &Path) -> Vec<PathBuf> {
    walk_dir(inbound_root.to_path_buf())
        .filter_map(std::io::Result::ok)
        .flat_map(|(_dir, _dirs, files)| files)
        .filter(|path| is_candidate_file(path))
        .collect()
}

/// Run the scan stage (§6 `scan(inbound_root) -> scan_id`): catalog every audio file under
/// `inbound_root` into a fresh snapshot at `snapshot_path`, tagged with `scan_id`.
///
/// Extraction runs on a bounded pool of worker threads; this function's own thread acts as the
/// single writer, batching completed records into the snapshot (§5, §4.3 "batched (≥1000 records
/// per commit for throughput)" — the configured `scan.insert_batch_size` overrides the spec
/// default when set). A cancelled scan (`options.cancel` observed `true`) still flushes whatever
/// was extracted before the signal was seen and marks the snapshot incomplete, per §5.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be created, or if a batch write to it fails.
pub fn run(
    config: &Config,
    inbound_root: &Path,
    snapshot_path: &Path,
    scan_id: &str,
    options: &ScanOptions,
) -> Result<ScanReport> {
    log::info!("Starting scan {scan_id} of {}", inbound_root.display());
    let snapshot = ScanSnapshot::create(snapshot_path, scan_id)?;
    let candidates = collect_candidates(inbound_root);
    let files_seen = candidates.len();
    log::info!("Found {files_seen} candidate audio files");

    let (work_tx, work_rx) = mpsc::channel::<PathBuf>();
    for path in candidates {
        // The receiving end is only dropped once every worker below has exited, so this cannot
        // fail.
        work_tx.send(path).expect("scan worker pool receiver dropped early");
    }
    drop(work_tx);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let (result_tx, result_rx) = mpsc::channel::<ScannedFile>();
    let num_workers = config.analyzer_parallelism().max(1);
    let batch_size = config
        .scan
        .insert_batch_size
        .filter(|&size| size > 0)
        .unwrap_or(MIN_INSERT_BATCH_SIZE);
    let cancel = options.cancel.clone();
    let file_io_timeout = config.file_io_timeout();

    let (files_valid, cancelled) = thread::scope(|scope| -> Result<(usize, bool)> {
        for worker_id in 0..num_workers {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            scope.spawn(move || {
                loop {
                    if cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                        log::debug!("scan worker {worker_id} observed cancellation, stopping");
                        break;
                    }
                    let next_path = {
                        let receiver = work_rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                        receiver.recv()
                    };
                    let Ok(path) = next_path else {
                        break;
                    };
                    let record = scanned_file::extract_with_timeout(config, &path, file_io_timeout);
                    if result_tx.send(record).is_err() {
                        break;
                    }
                }
            });
        }
        // Drop our own sender so `result_rx` closes once every worker above has exited.
        drop(result_tx);

        let mut batch = Vec::with_capacity(batch_size);
        let mut files_valid = 0_usize;
        for record in &result_rx {
            if record.valid {
                files_valid += 1;
            }
            batch.push(record);
            if batch.len() >= batch_size {
                snapshot.insert_batch(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            snapshot.insert_batch(&batch)?;
        }

        let cancelled = cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed));
        Ok((files_valid, cancelled))
    })?;

    if cancelled {
        log::warn!("Scan {scan_id} was cancelled; marking snapshot incomplete");
        snapshot.mark_incomplete()?;
    }

    log::info!("Scan {scan_id} complete: {files_valid}/{files_seen} files valid");
    Ok(ScanReport {
        scan_id: scan_id.to_owned(),
        snapshot_path: snapshot_path.to_path_buf(),
        files_seen,
        files_valid,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_flac_like(path: &Path) {
        // A real FLAC/tag header isn't needed here: extraction failures on an unreadable/
        // undecodable file still produce a `ScannedFile`, just with `valid = false`, which is
        // exactly what these orchestration-level tests want to observe.
        fs::write(path, b"not actually audio").unwrap();
    }

    #[test]
    fn test_scan_walks_directory_and_writes_snapshot() {
        let inbound = tempfile::tempdir().unwrap();
        let snapshot_dir = tempfile::tempdir().unwrap();
        write_flac_like(&inbound.path().join("a.flac"));
        write_flac_like(&inbound.path().join("b.mp3"));
        fs::write(inbound.path().join("cover.jpg"), b"not audio either").unwrap();

        let config = Config::default();
        let scan_id = "test1";
        let snapshot_path = snapshot_dir.path().join("scan_test1.db");
        let report = run(&config, inbound.path(), &snapshot_path, scan_id, &ScanOptions::default()).unwrap();

        assert_eq!(report.files_seen, 2);
        assert!(!report.cancelled);
        assert!(snapshot_path.exists());

        let reopened = ScanSnapshot::open(&snapshot_path, scan_id).unwrap();
        assert_eq!(reopened.record_count().unwrap(), 2);
    }

    #[test]
    fn test_cancelled_scan_marks_snapshot_incomplete() {
        let inbound = tempfile::tempdir().unwrap();
        let snapshot_dir = tempfile::tempdir().unwrap();
        write_flac_like(&inbound.path().join("a.flac"));

        let config = Config::default();
        let cancel: CancelToken = Arc::new(AtomicBool::new(true));
        let snapshot_path = snapshot_dir.path().join("scan_test2.db");
        let report = run(
            &config,
            inbound.path(),
            &snapshot_path,
            "test2",
            &ScanOptions { cancel: Some(cancel) },
        )
        .unwrap();

        assert!(report.cancelled);
        let reopened = ScanSnapshot::open(&snapshot_path, "test2").unwrap();
        assert!(reopened.is_incomplete().unwrap());
    }

    #[test]
    fn test_scan_id_is_sortable_timestamp() {
        let id = new_scan_id();
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(id.len() >= 15);
    }

    #[test]
    fn test_non_audio_extensions_are_skipped() {
        let inbound = tempfile::tempdir().unwrap();
        fs::write(inbound.path().join("readme.txt"), b"not audio").unwrap();
        fs::write(inbound.path().join("cover.png"), b"not audio").unwrap();
        let candidates = collect_candidates(inbound.path());
        assert!(candidates.is_empty());
    }
}
