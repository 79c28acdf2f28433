// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The promotion transactor (§4.8, C8): moves an approved staging item into the production
//! catalog and file tree.
//!
//! Per-item atomicity (§5, §8 property 6) is provided by two layers: the catalog mutations run
//! inside one SQLite transaction that is only committed after every track has been matched,
//! scored, and inserted, and the file moves that follow are tracked so they can be undone if a
//! later move in the same item fails. A failure anywhere after the sidecar is parsed but before
//! the transaction commits leaves the filesystem and the catalog exactly as they were; a failure
//! during the file-move phase triggers a best-effort reverse move of everything already relocated
//! before the surrounding transaction is rolled back. Either way, the item is marked `rejected`
//! with the failure recorded in its notes (§7 `PromotionConflict`) rather than left inconsistent.
//!
//! Once a target release-group is resolved, everything through the commit runs under that
//! group's advisory lock (§4.10, §5: "different release-groups can promote concurrently... the
//! transactor acquires a logical lock on the target release-group id to serialize edition
//! additions... released on commit or rollback").

use crate::catalog::{self, Catalog, ReleaseGroup, StagingItemRow, StagingStatus};
use crate::config::Config;
use crate::consolidate::{self, ConsolidationCandidate, ConsolidationOutcome};
use crate::normalize::normalize;
use crate::pathformat::{PathFormatter, PathFormatterValues};
use crate::quality;
use crate::sidecar::Sidecar;
use crate::{staging, ErrorType, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Default fingerprint similarity threshold (§4.8 step 5a), used when unset in config.
const DEFAULT_FINGERPRINT_THRESHOLD: f64 = 0.95;
/// Default title+duration fallback window in seconds, used when unset in config.
const DEFAULT_TITLE_DURATION_FALLBACK_SECS: u32 = 10;

/// Caller-supplied overrides for one promotion attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionOptions {
    /// Explicit release-group id to attach to, bypassing the consolidator (§9 open question
    /// resolution). Required to retry a promotion that previously returned
    /// [`PromotionOutcome::Ambiguous`].
    pub release_group_id_override: Option<i64>,
}

/// The outcome of attempting to promote one staging item (§6 `promote(ids)`).
#[derive(Debug, Clone)]
pub enum PromotionOutcome {
    /// The item was promoted into the catalog and its files now live under `production_path`.
    Promoted {
        /// The release row created for this edition.
        release_id: i64,
        /// The release-group the release was attached to.
        release_group_id: i64,
        /// Production directory the release's files now live under.
        production_path: String,
        /// Number of tracks promoted (duplicates routed to `duplicates/` during staging don't
        /// count).
        track_count: i64,
    },
    /// The release-group match was ambiguous (§4.9, §7 `ConsolidationAmbiguity`). This is not an
    /// error: nothing was mutated, and the caller should retry with
    /// [`PromotionOptions::release_group_id_override`] set to one of the candidates.
    Ambiguous(Vec<ConsolidationCandidate>),
    /// The item was rejected. Its status was set to `rejected` and `reason` was written to its
    /// notes (§7 `PromotionConflict`).
    Rejected {
        /// Human-readable reason, also persisted to the staging item's notes.
        reason: String,
    },
}

/// Internal control-flow signal distinguishing a recoverable per-item failure (which should be
/// reported as [`PromotionOutcome::Rejected`] after marking the item) from a fatal error that
/// must propagate (the connection pool itself is unusable).
enum Failure {
    /// See [`PromotionOutcome::Ambiguous`].
    Ambiguous(Vec<ConsolidationCandidate>),
    /// See [`PromotionOutcome::Rejected`].
    Reject(String),
    /// Propagates as an `Err` from [`promote_item`].
    Fatal(ErrorType),
}

/// Wrap a catalog/IO result as a per-item rejection rather than a fatal error.
fn reject<T>(result: Result<T>) -> std::result::Result<T, Failure> {
    result.map_err(|err| Failure::Reject(err.to_string()))
}

/// Promote one approved staging item into the catalog (§4.8).
///
/// # Errors
///
/// Returns an error only for fatal conditions: the staging item does not exist, is not in
/// `approved` status, or the connection pool cannot hand out a connection. Every other failure is
/// reported as [`PromotionOutcome::Rejected`] (with the item's status updated accordingly) or
/// [`PromotionOutcome::Ambiguous`], both inside `Ok`.
pub fn promote_item(
    catalog: &Catalog,
    config: &Config,
    formatter: &PathFormatter,
    item_id: &str,
    options: PromotionOptions,
) -> Result<PromotionOutcome> {
    let Some(item) = catalog.get_staging_item(item_id)? else {
        return Err(ErrorType::PromotionConflict(format!(
            "staging item {item_id} not found"
        )));
    };
    if item.status != StagingStatus::Approved {
        return Err(ErrorType::PromotionConflict(format!(
            "staging item {item_id} is not approved for promotion (status: {})",
            item.status.as_str()
        )));
    }

    match try_promote(catalog, config, formatter, &item, options) {
        Ok(outcome) => Ok(outcome),
        Err(Failure::Ambiguous(candidates)) => Ok(PromotionOutcome::Ambiguous(candidates)),
        Err(Failure::Fatal(err)) => Err(err),
        Err(Failure::Reject(reason)) => {
            let now = chrono::Utc::now().to_rfc3339();
            catalog.update_staging_status(&item.id, StagingStatus::Rejected, None, Some(&reason), &now)?;
            log::warn!("Rejected promotion of staging item {}: {reason}", item.id);
            Ok(PromotionOutcome::Rejected { reason })
        }
    }
}

/// Promote a batch of staging items (§6 `promote(ids)`), isolating each item's outcome from the
/// rest (§7: "the overall batch succeeds if at least one item succeeded unless the error is
/// global").
///
/// # Errors
///
/// Returns an error only if the connection pool itself is unusable before any item is attempted.
pub fn promote_batch(
    catalog: &Catalog,
    config: &Config,
    formatter: &PathFormatter,
    item_ids: &[String],
    options: PromotionOptions,
) -> Vec<(String, Result<PromotionOutcome>)> {
    item_ids
        .iter()
        .map(|id| (id.clone(), promote_item(catalog, config, formatter, id, options)))
        .collect()
}

/// Query every directory code currently allocated, against `conn` directly (used instead of
/// [`Catalog::all_directory_codes`] so the read participates in the open transaction).
fn existing_directory_codes(conn: &Connection) -> Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare("SELECT directory_code FROM artists")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
}

/// Resolve the sidecar's artist against the catalog, inserting a new row (with a freshly
/// allocated directory code, §4.5) if this is the first time the name has been promoted
/// (§4.8 step 2).
fn resolve_artist(
    conn: &Connection,
    config: &Config,
    sidecar_artist: &crate::sidecar::SidecarArtist,
) -> std::result::Result<catalog::Artist, Failure> {
    let name_normalized = normalize(&sidecar_artist.name);
    if let Some(existing) = reject(catalog::find_artist_by_normalized_name(conn, &name_normalized))? {
        return Ok(existing);
    }
    let existing_codes = reject(existing_directory_codes(conn))?;
    let code = crate::directory_code::allocate(&config.directory_code, &sidecar_artist.name, &existing_codes)
        .map_err(|err| Failure::Reject(err.to_string()))?;
    reject(catalog::insert_artist(
        conn,
        &sidecar_artist.name,
        &name_normalized,
        &code,
        &sidecar_artist.sort_name,
    ))
}

/// Move every file under `staging_dir` into the equivalent relative path under `production_dir`.
///
/// On the first failure, every file already moved in this call is moved back to its original
/// staging location before the error is returned (§4.8: "After partial file moves: move moved
/// files back to staging").
fn move_tree(staging_dir: &Path, production_dir: &Path) -> std::result::Result<Vec<(PathBuf, PathBuf)>, Failure> {
    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    let walk = crate::util::walk_dir(staging_dir.to_path_buf());
    for entry in walk {
        let (_, _, files) = match entry {
            Ok(entry) => entry,
            Err(err) => return Err(roll_back_and_reject(moved, err.to_string())),
        };
        for file in files {
            let relative = file.strip_prefix(staging_dir).unwrap_or(&file);
            let destination = production_dir.join(relative);
            match crate::util::move_file(&file, &destination) {
                Ok(()) => moved.push((file, destination)),
                Err(err) => return Err(roll_back_and_reject(moved, err.to_string())),
            }
        }
    }
    Ok(moved)
}

/// Move every `(original, destination)` pair in `moved` back to `original`, logging (but not
/// failing on) any error doing so, then build the [`Failure::Reject`] for `reason`.
fn roll_back_and_reject(moved: Vec<(PathBuf, PathBuf)>, reason: String) -> Failure {
    for (original, destination) in moved.into_iter().rev() {
        if let Err(err) = crate::util::move_file(&destination, &original) {
            log::error!(
                "failed to roll back file move {} -> {}: {err}",
                destination.display(),
                original.display()
            );
        }
    }
    Failure::Reject(format!("file move failed: {reason}"))
}

/// The full promotion procedure for one item (§4.8 steps 1-8), returning a [`Failure`] rather
/// than propagating an error for every recoverable condition.
#[expect(clippy::too_many_lines)]
fn try_promote(
    catalog: &Catalog,
    config: &Config,
    formatter: &PathFormatter,
    item: &StagingItemRow,
    options: PromotionOptions,
) -> std::result::Result<PromotionOutcome, Failure> {
    // Step 1: parse and verify the sidecar.
    let sidecar = Sidecar::read_and_verify(Path::new(&item.sidecar_path), &item.sidecar_checksum)
        .map_err(|err| Failure::Reject(format!("sidecar verification failed: {err}")))?;
    if sidecar.tracks.is_empty() {
        return Err(Failure::Reject("sidecar has no tracks".to_owned()));
    }

    let created_at = chrono::DateTime::parse_from_rfc3339(&item.processed_at)
        .map(|dt| dt.timestamp())
        .unwrap_or(0);
    let year = sidecar
        .album
        .release_date
        .as_deref()
        .and_then(|date| date.get(0..4))
        .and_then(|y| y.parse::<i32>().ok());

    let mut conn = catalog.connection().map_err(Failure::Fatal)?;
    let tx = conn.transaction().map_err(|err| Failure::Reject(err.to_string()))?;

    // Step 2: resolve the artist.
    let artist = resolve_artist(&tx, config, &sidecar.artist)?;

    // Step 3: resolve (or create) the release-group via the consolidator (C9). This happens
    // outside the release-group lock: the id to lock on isn't known until the consolidator
    // decides it, and an `Ambiguous` result must not serialize against anything since it mutates
    // nothing.
    let release_group = if let Some(override_id) = options.release_group_id_override {
        reject(consolidate::release_group_by_id(&tx, override_id))?.ok_or_else(|| {
            Failure::Reject(format!("release_group_id_override {override_id} does not exist"))
        })?
    } else {
        match reject(consolidate::resolve_release_group(
            &tx,
            &config.promotion,
            artist.id,
            &sidecar.album.name,
            &sidecar.album.name_normalized,
            year,
        ))? {
            ConsolidationOutcome::Attached(group) | ConsolidationOutcome::Created(group) => group,
            ConsolidationOutcome::Ambiguous(candidates) => return Err(Failure::Ambiguous(candidates)),
        }
    };

    // Steps 4-8 run under the release-group's advisory lock, held until commit or rollback (§5:
    // "the transactor acquires a logical lock on the target release-group id to serialize edition
    // additions... released on commit or rollback"). The lock closure takes ownership of `tx` so
    // the commit itself happens before the lock is released.
    let group_id = release_group.id;
    let staged = catalog.with_release_group_lock(group_id, move || {
        let staged =
            promote_within_lock(config, formatter, item, &sidecar, &tx, &artist, &release_group, year, created_at)?;
        if let Err(err) = tx.commit() {
            return Err(roll_back_and_reject(staged.moved, format!("transaction commit failed: {err}")));
        }
        Ok(staged)
    })?;

    // Step 8 (continued): delete the sidecar and the staging item row. These run after the
    // commit, so a failure here doesn't threaten the already-committed promotion; it's logged and
    // the promotion is still reported as successful.
    if let Err(err) = std::fs::remove_file(&item.sidecar_path) {
        log::warn!("failed to remove sidecar {}: {err}", item.sidecar_path);
    }
    if let Err(err) = catalog.delete_staging_item(&item.id) {
        log::warn!("failed to delete staging item row {}: {err}", item.id);
    }
    let _ = std::fs::remove_dir_all(&staged.staging_dir);

    Ok(PromotionOutcome::Promoted {
        release_id: staged.release_id,
        release_group_id: group_id,
        production_path: staged.production_path,
        track_count: staged.track_count,
    })
}

/// Result of the mutation phase performed while holding the release-group's advisory lock
/// (§4.8 steps 4-7): everything needed to report the outcome and clean up staging once the
/// surrounding transaction commits.
struct StagedPromotion {
    /// Id of the `Release` row created for this edition.
    release_id: i64,
    /// Absolute production directory the release's files now live under.
    production_path: String,
    /// Absolute staging directory the release's files were moved out of.
    staging_dir: PathBuf,
    /// Number of promotable (non-duplicate) tracks.
    track_count: i64,
    /// Every `(original, destination)` move performed, oldest first, so a failed commit can still
    /// be undone on the filesystem side.
    moved: Vec<(PathBuf, PathBuf)>,
}

/// Steps 4-7 of §4.8: create the release row, match/score/insert each track, compute the
/// production path, and move the files there. Runs while the caller holds the release-group's
/// advisory lock.
#[expect(clippy::too_many_arguments)]
fn promote_within_lock(
    config: &Config,
    formatter: &PathFormatter,
    item: &StagingItemRow,
    sidecar: &Sidecar,
    tx: &Connection,
    artist: &catalog::Artist,
    release_group: &ReleaseGroup,
    year: Option<i32>,
    created_at: i64,
) -> std::result::Result<StagedPromotion, Failure> {
    // Step 4: create this edition's release row; primary iff it is the group's first release.
    let is_first_release = !reject(catalog::release_group_has_releases(tx, release_group.id))?;
    let edition = crate::normalize::detect_edition_marker(&sidecar.album.name);
    let disc_count = i64::from(sidecar.tracks.iter().map(|track| track.disc_number).max().unwrap_or(1));
    let release = reject(catalog::insert_release(
        tx,
        release_group.id,
        &sidecar.album.name,
        edition.as_deref(),
        year,
        disc_count,
        is_first_release,
        &item.staging_path,
    ))?;

    // Step 5: match/create a logical Track for each promotable file and score it.
    let fingerprint_threshold = config
        .promotion
        .fingerprint_similarity_threshold
        .unwrap_or(DEFAULT_FINGERPRINT_THRESHOLD);
    let fallback_secs = i64::from(
        config
            .promotion
            .title_duration_fallback_secs
            .unwrap_or(DEFAULT_TITLE_DURATION_FALLBACK_SECS),
    );
    let promotable: Vec<&crate::sidecar::SidecarTrack> = sidecar
        .tracks
        .iter()
        .filter(|track| !track.file_path.starts_with("duplicates/"))
        .collect();
    if promotable.is_empty() {
        return Err(Failure::Reject("sidecar has no promotable (non-duplicate) tracks".to_owned()));
    }

    let staged_release_tracks = stage_tracks(
        tx,
        artist.id,
        release_group.id,
        release.id,
        &promotable,
        created_at,
        fingerprint_threshold,
        fallback_secs,
    )?;

    // §4.8 step 8 (partial): recompute the group's cached unique-track count now that matching is
    // done.
    reject(catalog::refresh_release_group_counts(tx, release_group.id))?;

    // Steps 6-7: compute the production path and move every staged file into it.
    let production_root = config
        .promotion
        .production_root
        .as_deref()
        .ok_or_else(|| Failure::Reject("promotion.production_root is not configured".to_owned()))?;
    let staging_root = config
        .staging
        .staging_root
        .as_deref()
        .ok_or_else(|| Failure::Reject("staging.staging_root is not configured".to_owned()))?;
    let staging_dir = Path::new(staging_root).join(&item.staging_path);

    let production_values = PathFormatterValues {
        artist: sidecar.artist.name.clone(),
        artist_code: artist.directory_code.clone(),
        album: sidecar.album.name.clone(),
        year: year.map_or_else(String::new, |y| y.to_string()),
        edition: edition.clone(),
        disc: String::new(),
        track: String::new(),
        title: String::new(),
        extension: String::new(),
    };
    let relative_production_path = formatter
        .format_production(&production_values)
        .map_err(|err| Failure::Reject(err.to_string()))?;
    let production_dir = Path::new(production_root).join(&relative_production_path);

    let moved = move_tree(&staging_dir, &production_dir)?;

    // §4.8 step 7: update each promoted release_track's file path now that the move succeeded.
    for (release_track_id, staging_file_path) in &staged_release_tracks {
        let relative = staging_file_path.strip_prefix(&staging_dir).unwrap_or(staging_file_path);
        let production_file_path = production_dir.join(relative);
        if let Err(err) =
            catalog::set_release_track_file_path(tx, *release_track_id, &production_file_path.to_string_lossy())
        {
            return Err(roll_back_and_reject(moved, err.to_string()));
        }
    }
    if let Err(err) = catalog::set_release_production_path(tx, release.id, &production_dir.to_string_lossy()) {
        return Err(roll_back_and_reject(moved, err.to_string()));
    }

    Ok(StagedPromotion {
        release_id: release.id,
        production_path: production_dir.to_string_lossy().into_owned(),
        staging_dir,
        track_count: i64::try_from(promotable.len()).unwrap_or(0),
        moved,
    })
}

/// Match or create a logical [`catalog::Track`] for each of `tracks`, insert its
/// [`catalog::ReleaseTrack`] row, and promote it to primary if it outscores the current primary
/// (§4.8 step 5). Returns the id and staging file path of each inserted release-track, for the
/// subsequent file-move step.
#[expect(clippy::too_many_arguments)]
fn stage_tracks(
    tx: &Connection,
    artist_id: i64,
    release_group_id: i64,
    release_id: i64,
    tracks: &[&crate::sidecar::SidecarTrack],
    created_at: i64,
    fingerprint_threshold: f64,
    fallback_secs: i64,
) -> std::result::Result<Vec<(i64, PathBuf)>, Failure> {
    let mut staged = Vec::with_capacity(tracks.len());
    for track in tracks {
        let title_normalized = staging::normalized_track_title(track);
        let duration_ms = i64::try_from(track.duration).unwrap_or(0);

        let matched = if let Some(fingerprint) = track.fingerprint.as_deref() {
            reject(catalog::find_track_by_fingerprint(
                tx,
                release_group_id,
                fingerprint,
                fingerprint_threshold,
            ))?
        } else {
            None
        };
        let matched = match matched {
            Some(existing) => existing,
            None => match reject(catalog::find_track_by_title_duration(
                tx,
                release_group_id,
                &title_normalized,
                duration_ms,
                fallback_secs,
            ))? {
                Some(existing) => existing,
                None => reject(catalog::insert_track(
                    tx,
                    release_group_id,
                    artist_id,
                    &track.name,
                    &title_normalized,
                    track.fingerprint.as_deref(),
                    track.isrc.as_deref(),
                    Some(duration_ms),
                ))?,
            },
        };

        let quality_input = staging::quality_input(track, created_at);
        let score = quality::score(&quality_input);
        let format = track.file_path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        let staging_file_path = PathBuf::from(&track.file_path);

        let release_track = reject(catalog::insert_release_track(
            tx,
            release_id,
            matched.id,
            i64::from(track.disc_number),
            i64::from(track.track_number),
            &staging_file_path.to_string_lossy(),
            &format,
            Some(i64::from(track.bitrate)),
            Some(i64::from(track.sample_rate)),
            track.bit_depth.map(i64::from),
            track.channels.map(i64::from),
            Some(duration_ms),
            &track.checksum,
            score,
        ))?;

        let current_primary = reject(catalog::current_primary_release_track(tx, matched.id))?;
        let should_be_primary = current_primary.as_ref().is_none_or(|primary| score > primary.quality_score);
        if should_be_primary {
            reject(catalog::set_primary_release_track(tx, matched.id, release_track.id))?;
        }

        staged.push((release_track.id, staging_file_path));
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, StagingItemRow};
    use crate::sidecar::{Sidecar, SidecarAlbum, SidecarArtist, SidecarStatus, SidecarTrack};
    use std::fs;

    struct Harness {
        _staging_dir: tempfile::TempDir,
        _production_dir: tempfile::TempDir,
        _catalog_dir: tempfile::TempDir,
        catalog: Catalog,
        config: Config,
        formatter: PathFormatter,
    }

    fn harness() -> Harness {
        let staging_dir = tempfile::tempdir().unwrap();
        let production_dir = tempfile::tempdir().unwrap();
        let catalog_dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(catalog_dir.path().join("catalog.db")).unwrap();
        let mut config = Config::default();
        config.staging.staging_root = Some(staging_dir.path().to_string_lossy().into_owned());
        config.promotion.production_root = Some(production_dir.path().to_string_lossy().into_owned());
        let formatter = PathFormatter::new(&config.paths).unwrap();
        Harness {
            _staging_dir: staging_dir,
            _production_dir: production_dir,
            _catalog_dir: catalog_dir,
            catalog,
            config,
            formatter,
        }
    }

    /// Write a one-track staging item (file + sidecar + `staging_items` row) under the harness's
    /// staging root and return its id.
    fn stage_item(
        h: &Harness,
        relative_dir: &str,
        album: &str,
        fingerprint: Option<&str>,
        format: &str,
        bitrate: u32,
        sample_rate: u32,
        bit_depth: Option<u32>,
    ) -> String {
        let staging_root = Path::new(h.config.staging.staging_root.as_ref().unwrap());
        let dir = staging_root.join(relative_dir);
        fs::create_dir_all(&dir).unwrap();
        let file_name = format!("1-01 - Tom Sawyer.{format}");
        fs::write(dir.join(&file_name), b"fake audio bytes").unwrap();

        let sidecar = Sidecar {
            version: crate::sidecar::SIDECAR_VERSION.to_owned(),
            processed_at: "2026-01-01T00:00:00Z".to_owned(),
            artist: SidecarArtist {
                name: "Rush".to_owned(),
                name_normalized: normalize("Rush"),
                directory_code: "RH".to_owned(),
                sort_name: "Rush".to_owned(),
                musicbrainz_id: None,
            },
            album: SidecarAlbum {
                name: album.to_owned(),
                name_normalized: normalize(album),
                release_date: Some("1981-02-12".to_owned()),
                album_type: "album".to_owned(),
                genres: None,
                is_compilation: false,
            },
            tracks: vec![SidecarTrack {
                track_number: 1,
                disc_number: 1,
                name: "Tom Sawyer".to_owned(),
                duration: 276_000,
                file_path: file_name,
                file_size: 17,
                bitrate,
                sample_rate,
                bit_depth,
                channels: Some(2),
                fingerprint: fingerprint.map(ToOwned::to_owned),
                isrc: None,
                checksum: "deadbeef".to_owned(),
            }],
            status: SidecarStatus::Approved,
            validation_errors: vec![],
        };
        let sidecar_path = dir.join("album.melodee.json");
        let checksum = sidecar.write_to_path(&sidecar_path).unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        h.catalog
            .insert_staging_item(&StagingItemRow {
                id: id.clone(),
                staging_path: relative_dir.to_owned(),
                sidecar_path: sidecar_path.to_string_lossy().into_owned(),
                artist_name: "Rush".to_owned(),
                album_name: album.to_owned(),
                track_count: 1,
                total_bytes: 17,
                processed_at: "2026-01-01T00:00:00Z".to_owned(),
                status: StagingStatus::Approved,
                reviewer_id: Some("admin".to_owned()),
                reviewed_at: Some("2026-01-01T00:00:00Z".to_owned()),
                notes: None,
                scan_id: Some("scan-1".to_owned()),
                sidecar_checksum: checksum,
            })
            .unwrap();
        id
    }

    #[test]
    fn test_promote_creates_artist_release_group_release_and_track() {
        let h = harness();
        let id = stage_item(&h, "RH/Rush/1981 - Moving Pictures", "Moving Pictures", None, "flac", 1000, 44_100, Some(16));

        let outcome =
            promote_item(&h.catalog, &h.config, &h.formatter, &id, PromotionOptions::default()).unwrap();
        let PromotionOutcome::Promoted {
            release_group_id,
            track_count,
            production_path,
            ..
        } = outcome
        else {
            panic!("expected Promoted");
        };
        assert_eq!(track_count, 1);
        assert!(Path::new(&production_path).is_dir());
        assert!(Path::new(&production_path).join("1-01 - Tom Sawyer.flac").is_file());
        assert!(h.catalog.get_staging_item(&id).unwrap().is_none());

        let conn = h.catalog.connection().unwrap();
        let group = consolidate::release_group_by_id(&conn, release_group_id).unwrap().unwrap();
        assert_eq!(group.total_unique_tracks, 1);
    }

    #[test]
    fn test_second_higher_quality_edition_becomes_primary() {
        let h = harness();
        let mp3_id = stage_item(&h, "RH/Rush/1981 - Moving Pictures", "Moving Pictures", Some("fp-tom-sawyer"), "mp3", 192, 44_100, None);
        promote_item(&h.catalog, &h.config, &h.formatter, &mp3_id, PromotionOptions::default()).unwrap();

        let flac_id = stage_item(
            &h,
            "RH/Rush/1981 - Moving Pictures (Deluxe)",
            "Moving Pictures (Deluxe Edition)",
            Some("fp-tom-sawyer"),
            "flac",
            1000,
            96_000,
            Some(24),
        );
        let outcome =
            promote_item(&h.catalog, &h.config, &h.formatter, &flac_id, PromotionOptions::default()).unwrap();
        assert!(matches!(outcome, PromotionOutcome::Promoted { .. }));

        let conn = h.catalog.connection().unwrap();
        let track = catalog::find_track_by_fingerprint(&conn, 1, "fp-tom-sawyer", 0.95)
            .unwrap()
            .expect("track exists");
        let primary = catalog::current_primary_release_track(&conn, track.id).unwrap().unwrap();
        assert_eq!(primary.format, "flac");
    }

    #[test]
    fn test_ambiguous_release_group_match_does_not_mutate_catalog() {
        let h = harness();
        {
            let conn = h.catalog.connection().unwrap();
            let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
            catalog::insert_release_group(&conn, artist.id, "Hemispheres", "hemispheres", Some(1978)).unwrap();
            catalog::insert_release_group(&conn, artist.id, "Hemispheree", "hemispheree", Some(1978)).unwrap();
        }
        let id = stage_item(&h, "RH/Rush/1978 - Hemispherex", "Hemispherex", None, "flac", 1000, 44_100, Some(16));

        let outcome =
            promote_item(&h.catalog, &h.config, &h.formatter, &id, PromotionOptions::default()).unwrap();
        assert!(matches!(outcome, PromotionOutcome::Ambiguous(_)));
        // Nothing was mutated: the item is still approved and pending promotion.
        let item = h.catalog.get_staging_item(&id).unwrap().unwrap();
        assert_eq!(item.status, StagingStatus::Approved);
    }

    #[test]
    fn test_promotion_rollback_on_file_move_failure() {
        let h = harness();
        let id = stage_item(&h, "RH/Rush/1981 - Moving Pictures", "Moving Pictures", None, "flac", 1000, 44_100, Some(16));

        // Make the production root unusable: a regular file in place of a directory makes every
        // `create_dir_all` underneath it fail.
        let blocked_root = tempfile::tempdir().unwrap();
        let blocker_file = blocked_root.path().join("blocker");
        fs::write(&blocker_file, b"not a directory").unwrap();
        let mut config = h.config.clone();
        config.promotion.production_root = Some(blocker_file.to_string_lossy().into_owned());

        let outcome = promote_item(&h.catalog, &config, &h.formatter, &id, PromotionOptions::default()).unwrap();
        let PromotionOutcome::Rejected { reason } = outcome else {
            panic!("expected Rejected, got {outcome:?}");
        };
        assert!(reason.contains("file move failed"));

        let item = h.catalog.get_staging_item(&id).unwrap().unwrap();
        assert_eq!(item.status, StagingStatus::Rejected);
        assert_eq!(item.notes.as_deref(), Some(reason.as_str()));

        let staging_root = Path::new(h.config.staging.staging_root.as_ref().unwrap());
        let staged_file = staging_root
            .join("RH/Rush/1981 - Moving Pictures")
            .join("1-01 - Tom Sawyer.flac");
        assert!(staged_file.is_file(), "file should have been moved back to staging");

        let conn = h.catalog.connection().unwrap();
        assert!(catalog::find_artist_by_normalized_name(&conn, "rush").unwrap().is_none());
    }

    #[test]
    fn test_promote_rejects_items_not_approved() {
        let h = harness();
        let id = stage_item(&h, "RH/Rush/1981 - Moving Pictures", "Moving Pictures", None, "flac", 1000, 44_100, Some(16));
        h.catalog
            .update_staging_status(&id, StagingStatus::PendingReview, None, None, "2026-01-01T00:00:00Z")
            .unwrap();

        let result = promote_item(&h.catalog, &h.config, &h.formatter, &id, PromotionOptions::default());
        assert!(result.is_err());
    }
}
