// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The catalog data model (§4.10, C10): the production relational store for
//! Artist/ReleaseGroup/Release/Track/ReleaseTrack, plus the co-located `staging_items` table
//! (§3 `StagingItem`) so promotion can hold both under one SQL transaction (§4.8).
//!
//! Reached through a pooled connection manager, like the scan snapshot store (§4.3); the
//! in-process per-release-group mutex registry implements the "advisory lock" requirement from
//! §4.10's implementation notes, since SQLite's single-writer semantics alone don't serialize two
//! concurrent promotions targeting the same release-group.

use crate::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS artists (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    name_normalized TEXT NOT NULL UNIQUE,
    directory_code TEXT NOT NULL UNIQUE,
    sort_name TEXT NOT NULL,
    musicbrainz_id TEXT
);

CREATE TABLE IF NOT EXISTS release_groups (
    id INTEGER PRIMARY KEY,
    artist_id INTEGER NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    name_normalized TEXT NOT NULL,
    year INTEGER,
    total_unique_tracks INTEGER NOT NULL DEFAULT 0,
    UNIQUE(artist_id, name_normalized)
);

CREATE TABLE IF NOT EXISTS releases (
    id INTEGER PRIMARY KEY,
    release_group_id INTEGER NOT NULL REFERENCES release_groups(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    edition TEXT,
    year INTEGER,
    disc_count INTEGER NOT NULL DEFAULT 1,
    track_count INTEGER NOT NULL DEFAULT 0,
    is_primary INTEGER NOT NULL DEFAULT 0,
    staging_path TEXT,
    production_path TEXT,
    file_size_sum INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY,
    release_group_id INTEGER NOT NULL REFERENCES release_groups(id) ON DELETE CASCADE,
    artist_id INTEGER NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    title_normalized TEXT NOT NULL,
    fingerprint TEXT,
    isrc TEXT,
    duration_ms INTEGER,
    primary_release_track_id INTEGER,
    track_number INTEGER,
    disc_number INTEGER,
    UNIQUE(release_group_id, fingerprint)
);

CREATE TABLE IF NOT EXISTS release_tracks (
    id INTEGER PRIMARY KEY,
    release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
    track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    disc_number INTEGER NOT NULL,
    track_number INTEGER NOT NULL,
    file_path TEXT NOT NULL,
    format TEXT NOT NULL,
    bitrate INTEGER,
    sample_rate INTEGER,
    bit_depth INTEGER,
    channels INTEGER,
    duration_ms INTEGER,
    file_hash TEXT NOT NULL,
    quality_score INTEGER NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    UNIQUE(release_id, disc_number, track_number),
    UNIQUE(release_id, file_path)
);

CREATE TABLE IF NOT EXISTS staging_items (
    id TEXT PRIMARY KEY,
    staging_path TEXT NOT NULL UNIQUE,
    sidecar_path TEXT NOT NULL,
    artist_name TEXT NOT NULL,
    album_name TEXT NOT NULL,
    track_count INTEGER NOT NULL,
    total_bytes INTEGER NOT NULL,
    processed_at TEXT NOT NULL,
    status TEXT NOT NULL,
    reviewer_id TEXT,
    reviewed_at TEXT,
    notes TEXT,
    scan_id TEXT,
    sidecar_checksum TEXT NOT NULL
);
";

/// One row of the `artists` table.
#[derive(Debug, Clone)]
pub struct Artist {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Normalized name, unique per catalog.
    pub name_normalized: String,
    /// Directory code (§4.5), immutable once allocated.
    pub directory_code: String,
    /// Sort name.
    pub sort_name: String,
    /// Optional external identifier.
    pub musicbrainz_id: Option<String>,
}

/// One row of the `release_groups` table.
#[derive(Debug, Clone)]
pub struct ReleaseGroup {
    /// Row id.
    pub id: i64,
    /// Owning artist.
    pub artist_id: i64,
    /// Display name.
    pub name: String,
    /// Normalized name, unique per artist.
    pub name_normalized: String,
    /// Release year, if known.
    pub year: Option<i32>,
    /// Cached count of distinct tracks in this group.
    pub total_unique_tracks: i64,
}

/// One row of the `releases` table.
#[derive(Debug, Clone)]
pub struct Release {
    /// Row id.
    pub id: i64,
    /// Owning release-group.
    pub release_group_id: i64,
    /// Display name.
    pub name: String,
    /// Edition tag, e.g. `"deluxe"`.
    pub edition: Option<String>,
    /// Release year.
    pub year: Option<i32>,
    /// Number of discs.
    pub disc_count: i64,
    /// Number of tracks.
    pub track_count: i64,
    /// Whether this is the group's primary release.
    pub is_primary: bool,
    /// Staging directory path, if still staged.
    pub staging_path: Option<String>,
    /// Production directory path, once promoted.
    pub production_path: Option<String>,
    /// Sum of file sizes across this release's tracks.
    pub file_size_sum: i64,
}

/// One row of the `tracks` table (the logical song, shared across releases).
#[derive(Debug, Clone)]
pub struct Track {
    /// Row id.
    pub id: i64,
    /// Owning release-group.
    pub release_group_id: i64,
    /// Denormalized artist reference.
    pub artist_id: i64,
    /// Title.
    pub title: String,
    /// Normalized title.
    pub title_normalized: String,
    /// Acoustic fingerprint, base64-encoded, if available.
    pub fingerprint: Option<String>,
    /// ISRC, if known.
    pub isrc: Option<String>,
    /// Duration in milliseconds, from the current primary version.
    pub duration_ms: Option<i64>,
    /// Row id of the current primary `ReleaseTrack`.
    pub primary_release_track_id: Option<i64>,
    /// Track number, from the primary release.
    pub track_number: Option<i64>,
    /// Disc number, from the primary release.
    pub disc_number: Option<i64>,
}

/// One row of the `release_tracks` table (a specific audio file realizing a `Track`).
#[derive(Debug, Clone)]
pub struct ReleaseTrack {
    /// Row id.
    pub id: i64,
    /// Owning release.
    pub release_id: i64,
    /// The logical track this file realizes.
    pub track_id: i64,
    /// Disc number.
    pub disc_number: i64,
    /// Track number, unique within `(release, disc_number)`.
    pub track_number: i64,
    /// File path (staging or production, depending on lifecycle stage).
    pub file_path: String,
    /// Format/extension.
    pub format: String,
    /// Bitrate in kbit/s.
    pub bitrate: Option<i64>,
    /// Sample rate in Hz.
    pub sample_rate: Option<i64>,
    /// Bit depth.
    pub bit_depth: Option<i64>,
    /// Channel count.
    pub channels: Option<i64>,
    /// Duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// SHA-256 content hash.
    pub file_hash: String,
    /// Quality score (§4.7).
    pub quality_score: i64,
    /// Whether this is the track's primary version.
    pub is_primary: bool,
}

/// Review status of a [`StagingItemRow`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingStatus {
    /// Awaiting reviewer action.
    PendingReview,
    /// Approved for promotion.
    Approved,
    /// Rejected; will not be promoted.
    Rejected,
    /// Currently being promoted.
    Processing,
}

impl StagingStatus {
    /// The string stored in the database for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processing => "processing",
        }
    }

    /// Parse a status back from its stored string form.
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "processing" => Some(Self::Processing),
            _ => None,
        }
    }
}

/// One row of the `staging_items` table (§3 `StagingItem`).
#[derive(Debug, Clone)]
pub struct StagingItemRow {
    /// Unique id (a UUID).
    pub id: String,
    /// Staging directory path.
    pub staging_path: String,
    /// Sidecar JSON path.
    pub sidecar_path: String,
    /// Artist display name.
    pub artist_name: String,
    /// Album display name.
    pub album_name: String,
    /// Number of tracks.
    pub track_count: i64,
    /// Total bytes across all files.
    pub total_bytes: i64,
    /// When this item was created, ISO-8601.
    pub processed_at: String,
    /// Review status.
    pub status: StagingStatus,
    /// Reviewer id, once reviewed.
    pub reviewer_id: Option<String>,
    /// Review timestamp, once reviewed.
    pub reviewed_at: Option<String>,
    /// Free-text notes (e.g. rejection reason, rollback diagnostics).
    pub notes: Option<String>,
    /// Originating scan id, if known.
    pub scan_id: Option<String>,
    /// SHA-256 checksum of the sidecar JSON.
    pub sidecar_checksum: String,
}

/// A filter applied by [`Catalog::list_staging_items`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StagingFilter {
    /// Restrict to this status, if set.
    pub status: Option<StagingStatus>,
}

/// The catalog: a pooled connection to the production SQLite database plus the in-process
/// release-group lock registry (§4.10 implementation notes).
pub struct Catalog {
    pool: Pool<SqliteConnectionManager>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Catalog {
    /// Open (or create) the catalog database at `path`, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder().max_size(16).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Borrow a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot hand out a connection.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run `f` while holding the in-process advisory lock for `release_group_id`, blocking until
    /// it is free (§4.10, §5). The registry entry is never removed, only ever grown, so repeated
    /// promotions against the same group always serialize on the same mutex.
    pub fn with_release_group_lock<T>(&self, release_group_id: i64, f: impl FnOnce() -> T) -> T {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(
                locks
                    .entry(release_group_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f()
    }

    /// Find an artist by normalized name.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn find_artist_by_normalized_name(&self, name_normalized: &str) -> Result<Option<Artist>> {
        let conn = self.connection()?;
        find_artist_by_normalized_name(&conn, name_normalized)
    }

    /// Insert a new artist row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert violates a uniqueness constraint or otherwise fails.
    pub fn insert_artist(
        &self,
        name: &str,
        name_normalized: &str,
        directory_code: &str,
        sort_name: &str,
    ) -> Result<Artist> {
        let conn = self.connection()?;
        insert_artist(&conn, name, name_normalized, directory_code, sort_name)
    }

    /// All directory codes currently allocated, for collision checks (C5).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn all_directory_codes(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT directory_code FROM artists")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Insert a staging item row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_staging_item(&self, item: &StagingItemRow) -> Result<()> {
        let conn = self.connection()?;
        insert_staging_item(&conn, item)
    }

    /// Fetch a staging item by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn get_staging_item(&self, id: &str) -> Result<Option<StagingItemRow>> {
        let conn = self.connection()?;
        get_staging_item(&conn, id)
    }

    /// List staging items matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_staging_items(&self, filter: StagingFilter) -> Result<Vec<StagingItemRow>> {
        let conn = self.connection()?;
        list_staging_items(&conn, filter)
    }

    /// Update a staging item's status, reviewer, and notes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying update fails.
    pub fn update_staging_status(
        &self,
        id: &str,
        status: StagingStatus,
        reviewer_id: Option<&str>,
        notes: Option<&str>,
        reviewed_at: &str,
    ) -> Result<()> {
        let conn = self.connection()?;
        update_staging_status(&conn, id, status, reviewer_id, notes, reviewed_at)
    }

    /// Delete a staging item row (called by the promotion transactor after a successful commit).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying delete fails.
    pub fn delete_staging_item(&self, id: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM staging_items WHERE id = ?1", params![id])?;
        Ok(())
    }
}

/// Find an artist by normalized name, against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn find_artist_by_normalized_name(
    conn: &Connection,
    name_normalized: &str,
) -> Result<Option<Artist>> {
    conn.query_row(
        "SELECT id, name, name_normalized, directory_code, sort_name, musicbrainz_id
         FROM artists WHERE name_normalized = ?1",
        params![name_normalized],
        row_to_artist,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert a new artist row, against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_artist(
    conn: &Connection,
    name: &str,
    name_normalized: &str,
    directory_code: &str,
    sort_name: &str,
) -> Result<Artist> {
    conn.execute(
        "INSERT INTO artists (name, name_normalized, directory_code, sort_name)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, name_normalized, directory_code, sort_name],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Artist {
        id,
        name: name.to_owned(),
        name_normalized: name_normalized.to_owned(),
        directory_code: directory_code.to_owned(),
        sort_name: sort_name.to_owned(),
        musicbrainz_id: None,
    })
}

/// Fetch every release-group belonging to `artist_id`, for consolidator candidate ranking (C9).
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn release_group_candidates(conn: &Connection, artist_id: i64) -> Result<Vec<ReleaseGroup>> {
    let mut stmt = conn.prepare(
        "SELECT id, artist_id, name, name_normalized, year, total_unique_tracks
         FROM release_groups WHERE artist_id = ?1",
    )?;
    let rows = stmt.query_map(params![artist_id], row_to_release_group)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Insert a new release-group row.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_release_group(
    conn: &Connection,
    artist_id: i64,
    name: &str,
    name_normalized: &str,
    year: Option<i32>,
) -> Result<ReleaseGroup> {
    conn.execute(
        "INSERT INTO release_groups (artist_id, name, name_normalized, year)
         VALUES (?1, ?2, ?3, ?4)",
        params![artist_id, name, name_normalized, year],
    )?;
    let id = conn.last_insert_rowid();
    Ok(ReleaseGroup {
        id,
        artist_id,
        name: name.to_owned(),
        name_normalized: name_normalized.to_owned(),
        year,
        total_unique_tracks: 0,
    })
}

/// Returns `true` if `release_group_id` already has at least one release (§4.8 step 4: only the
/// first release of a group is primary).
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn release_group_has_releases(conn: &Connection, release_group_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM releases WHERE release_group_id = ?1",
        params![release_group_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert a new release row.
///
/// # Errors
///
/// Returns an error if the insert fails.
#[expect(clippy::too_many_arguments)]
pub fn insert_release(
    conn: &Connection,
    release_group_id: i64,
    name: &str,
    edition: Option<&str>,
    year: Option<i32>,
    disc_count: i64,
    is_primary: bool,
    staging_path: &str,
) -> Result<Release> {
    conn.execute(
        "INSERT INTO releases
            (release_group_id, name, edition, year, disc_count, is_primary, staging_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            release_group_id,
            name,
            edition,
            year,
            disc_count,
            i64::from(is_primary),
            staging_path
        ],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Release {
        id,
        release_group_id,
        name: name.to_owned(),
        edition: edition.map(ToOwned::to_owned),
        year,
        disc_count,
        track_count: 0,
        is_primary,
        staging_path: Some(staging_path.to_owned()),
        production_path: None,
        file_size_sum: 0,
    })
}

/// Set a release's production path and clear its staging path after file moves complete.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_release_production_path(
    conn: &Connection,
    release_id: i64,
    production_path: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE releases SET production_path = ?2, staging_path = NULL WHERE id = ?1",
        params![release_id, production_path],
    )?;
    Ok(())
}

/// Find a track in `release_group_id` by fingerprint similarity ≥ `threshold` (§4.8 step 5a).
/// Returns the best-matching track, if any clears the threshold.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn find_track_by_fingerprint(
    conn: &Connection,
    release_group_id: i64,
    fingerprint: &str,
    threshold: f64,
) -> Result<Option<Track>> {
    let mut stmt = conn.prepare(
        "SELECT id, release_group_id, artist_id, title, title_normalized, fingerprint, isrc,
                duration_ms, primary_release_track_id, track_number, disc_number
         FROM tracks WHERE release_group_id = ?1 AND fingerprint IS NOT NULL",
    )?;
    let candidates = stmt
        .query_map(params![release_group_id], row_to_track)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let best = candidates
        .into_iter()
        .filter_map(|track| {
            let similarity = track
                .fingerprint
                .as_deref()
                .map(|existing| crate::analyzer::fingerprint_similarity(existing, fingerprint))
                .unwrap_or(0.0);
            (similarity >= threshold).then_some((similarity, track))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0));
    Ok(best.map(|(_, track)| track))
}

/// Find a track in `release_group_id` by normalized title and duration within `tolerance_secs`
/// (§4.8 step 5a fallback).
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn find_track_by_title_duration(
    conn: &Connection,
    release_group_id: i64,
    title_normalized: &str,
    duration_ms: i64,
    tolerance_secs: i64,
) -> Result<Option<Track>> {
    let tolerance_ms = tolerance_secs * 1000;
    conn.query_row(
        "SELECT id, release_group_id, artist_id, title, title_normalized, fingerprint, isrc,
                duration_ms, primary_release_track_id, track_number, disc_number
         FROM tracks
         WHERE release_group_id = ?1 AND title_normalized = ?2
           AND duration_ms IS NOT NULL AND ABS(duration_ms - ?3) <= ?4
         ORDER BY ABS(duration_ms - ?3) ASC
         LIMIT 1",
        params![release_group_id, title_normalized, duration_ms, tolerance_ms],
        row_to_track,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert a new logical track.
///
/// # Errors
///
/// Returns an error if the insert fails.
#[expect(clippy::too_many_arguments)]
pub fn insert_track(
    conn: &Connection,
    release_group_id: i64,
    artist_id: i64,
    title: &str,
    title_normalized: &str,
    fingerprint: Option<&str>,
    isrc: Option<&str>,
    duration_ms: Option<i64>,
) -> Result<Track> {
    conn.execute(
        "INSERT INTO tracks
            (release_group_id, artist_id, title, title_normalized, fingerprint, isrc, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            release_group_id,
            artist_id,
            title,
            title_normalized,
            fingerprint,
            isrc,
            duration_ms
        ],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Track {
        id,
        release_group_id,
        artist_id,
        title: title.to_owned(),
        title_normalized: title_normalized.to_owned(),
        fingerprint: fingerprint.map(ToOwned::to_owned),
        isrc: isrc.map(ToOwned::to_owned),
        duration_ms,
        primary_release_track_id: None,
        track_number: None,
        disc_number: None,
    })
}

/// Insert a new release-track row.
///
/// # Errors
///
/// Returns an error if the insert fails.
#[expect(clippy::too_many_arguments)]
pub fn insert_release_track(
    conn: &Connection,
    release_id: i64,
    track_id: i64,
    disc_number: i64,
    track_number: i64,
    file_path: &str,
    format: &str,
    bitrate: Option<i64>,
    sample_rate: Option<i64>,
    bit_depth: Option<i64>,
    channels: Option<i64>,
    duration_ms: Option<i64>,
    file_hash: &str,
    quality_score: i64,
) -> Result<ReleaseTrack> {
    conn.execute(
        "INSERT INTO release_tracks
            (release_id, track_id, disc_number, track_number, file_path, format, bitrate,
             sample_rate, bit_depth, channels, duration_ms, file_hash, quality_score, is_primary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0)",
        params![
            release_id,
            track_id,
            disc_number,
            track_number,
            file_path,
            format,
            bitrate,
            sample_rate,
            bit_depth,
            channels,
            duration_ms,
            file_hash,
            quality_score,
        ],
    )?;
    let id = conn.last_insert_rowid();
    Ok(ReleaseTrack {
        id,
        release_id,
        track_id,
        disc_number,
        track_number,
        file_path: file_path.to_owned(),
        format: format.to_owned(),
        bitrate,
        sample_rate,
        bit_depth,
        channels,
        duration_ms,
        file_hash: file_hash.to_owned(),
        quality_score,
        is_primary: false,
    })
}

/// Fetch the current primary release-track for `track_id`, if any.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn current_primary_release_track(
    conn: &Connection,
    track_id: i64,
) -> Result<Option<ReleaseTrack>> {
    conn.query_row(
        "SELECT id, release_id, track_id, disc_number, track_number, file_path, format, bitrate,
                sample_rate, bit_depth, channels, duration_ms, file_hash, quality_score, is_primary
         FROM release_tracks WHERE track_id = ?1 AND is_primary = 1",
        params![track_id],
        row_to_release_track,
    )
    .optional()
    .map_err(Into::into)
}

/// Promote `release_track_id` to primary for its track, clearing the prior primary and updating
/// the track's denormalized pointer and audio fields (§4.8 step 5d).
///
/// # Errors
///
/// Returns an error if the underlying updates fail.
pub fn set_primary_release_track(
    conn: &Connection,
    track_id: i64,
    release_track_id: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE release_tracks SET is_primary = 0 WHERE track_id = ?1",
        params![track_id],
    )?;
    conn.execute(
        "UPDATE release_tracks SET is_primary = 1 WHERE id = ?1",
        params![release_track_id],
    )?;
    let (duration_ms, track_number, disc_number): (Option<i64>, Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT duration_ms, track_number, disc_number FROM release_tracks WHERE id = ?1",
            params![release_track_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
    conn.execute(
        "UPDATE tracks
         SET primary_release_track_id = ?2, duration_ms = ?3, track_number = ?4, disc_number = ?5
         WHERE id = ?1",
        params![track_id, release_track_id, duration_ms, track_number, disc_number],
    )?;
    Ok(())
}

/// Update `release_tracks.file_path` after a production file move (§4.8 step 7).
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_release_track_file_path(
    conn: &Connection,
    release_track_id: i64,
    file_path: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE release_tracks SET file_path = ?2 WHERE id = ?1",
        params![release_track_id, file_path],
    )?;
    Ok(())
}

/// Recompute and store a release-group's cached `total_unique_tracks` count (§3 invariant, §4.8
/// step 8).
///
/// # Errors
///
/// Returns an error if the underlying query/update fails.
pub fn refresh_release_group_counts(conn: &Connection, release_group_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE release_groups SET total_unique_tracks =
            (SELECT COUNT(*) FROM tracks WHERE release_group_id = ?1)
         WHERE id = ?1",
        params![release_group_id],
    )?;
    Ok(())
}

/// Insert a staging item row against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_staging_item(conn: &Connection, item: &StagingItemRow) -> Result<()> {
    conn.execute(
        "INSERT INTO staging_items
            (id, staging_path, sidecar_path, artist_name, album_name, track_count, total_bytes,
             processed_at, status, reviewer_id, reviewed_at, notes, scan_id, sidecar_checksum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            item.id,
            item.staging_path,
            item.sidecar_path,
            item.artist_name,
            item.album_name,
            item.track_count,
            item.total_bytes,
            item.processed_at,
            item.status.as_str(),
            item.reviewer_id,
            item.reviewed_at,
            item.notes,
            item.scan_id,
            item.sidecar_checksum,
        ],
    )?;
    Ok(())
}

/// Fetch a staging item by id, against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn get_staging_item(conn: &Connection, id: &str) -> Result<Option<StagingItemRow>> {
    conn.query_row(
        "SELECT id, staging_path, sidecar_path, artist_name, album_name, track_count,
                total_bytes, processed_at, status, reviewer_id, reviewed_at, notes, scan_id,
                sidecar_checksum
         FROM staging_items WHERE id = ?1",
        params![id],
        row_to_staging_item,
    )
    .optional()
    .map_err(Into::into)
}

/// List staging items matching `filter`, against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn list_staging_items(conn: &Connection, filter: StagingFilter) -> Result<Vec<StagingItemRow>> {
    let base = "SELECT id, staging_path, sidecar_path, artist_name, album_name, track_count,
                       total_bytes, processed_at, status, reviewer_id, reviewed_at, notes, scan_id,
                       sidecar_checksum
                FROM staging_items";
    if let Some(status) = filter.status {
        let query = format!("{base} WHERE status = ?1 ORDER BY processed_at");
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params![status.as_str()], row_to_staging_item)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    } else {
        let query = format!("{base} ORDER BY processed_at");
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], row_to_staging_item)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

/// Update a staging item's status/reviewer/notes, against any connection/transaction.
///
/// # Errors
///
/// Returns an error if the underlying update fails.
pub fn update_staging_status(
    conn: &Connection,
    id: &str,
    status: StagingStatus,
    reviewer_id: Option<&str>,
    notes: Option<&str>,
    reviewed_at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE staging_items
         SET status = ?2, reviewer_id = ?3, notes = ?4, reviewed_at = ?5
         WHERE id = ?1",
        params![id, status.as_str(), reviewer_id, notes, reviewed_at],
    )?;
    Ok(())
}

fn row_to_artist(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get(0)?,
        name: row.get(1)?,
        name_normalized: row.get(2)?,
        directory_code: row.get(3)?,
        sort_name: row.get(4)?,
        musicbrainz_id: row.get(5)?,
    })
}

fn row_to_release_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReleaseGroup> {
    Ok(ReleaseGroup {
        id: row.get(0)?,
        artist_id: row.get(1)?,
        name: row.get(2)?,
        name_normalized: row.get(3)?,
        year: row.get(4)?,
        total_unique_tracks: row.get(5)?,
    })
}

fn row_to_track(row: &rusqlite::Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        release_group_id: row.get(1)?,
        artist_id: row.get(2)?,
        title: row.get(3)?,
        title_normalized: row.get(4)?,
        fingerprint: row.get(5)?,
        isrc: row.get(6)?,
        duration_ms: row.get(7)?,
        primary_release_track_id: row.get(8)?,
        track_number: row.get(9)?,
        disc_number: row.get(10)?,
    })
}

fn row_to_release_track(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReleaseTrack> {
    let is_primary: i64 = row.get(14)?;
    Ok(ReleaseTrack {
        id: row.get(0)?,
        release_id: row.get(1)?,
        track_id: row.get(2)?,
        disc_number: row.get(3)?,
        track_number: row.get(4)?,
        file_path: row.get(5)?,
        format: row.get(6)?,
        bitrate: row.get(7)?,
        sample_rate: row.get(8)?,
        bit_depth: row.get(9)?,
        channels: row.get(10)?,
        duration_ms: row.get(11)?,
        file_hash: row.get(12)?,
        quality_score: row.get(13)?,
        is_primary: is_primary != 0,
    })
}

fn row_to_staging_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<StagingItemRow> {
    let status_str: String = row.get(8)?;
    let status = StagingStatus::from_str(&status_str).unwrap_or(StagingStatus::PendingReview);
    Ok(StagingItemRow {
        id: row.get(0)?,
        staging_path: row.get(1)?,
        sidecar_path: row.get(2)?,
        artist_name: row.get(3)?,
        album_name: row.get(4)?,
        track_count: row.get(5)?,
        total_bytes: row.get(6)?,
        processed_at: row.get(7)?,
        status,
        reviewer_id: row.get(9)?,
        reviewed_at: row.get(10)?,
        notes: row.get(11)?,
        scan_id: row.get(12)?,
        sidecar_checksum: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_item(id: &str, status: StagingStatus) -> StagingItemRow {
        StagingItemRow {
            id: id.to_owned(),
            staging_path: format!("/staging/{id}"),
            sidecar_path: format!("/staging/{id}/album.melodee.json"),
            artist_name: "Rush".to_owned(),
            album_name: "Moving Pictures".to_owned(),
            track_count: 8,
            total_bytes: 1000,
            processed_at: "2026-01-01T00:00:00Z".to_owned(),
            status,
            reviewer_id: None,
            reviewed_at: None,
            notes: None,
            scan_id: Some("scan-1".to_owned()),
            sidecar_checksum: "abc".to_owned(),
        }
    }

    #[test]
    fn test_artist_insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let artist = catalog.insert_artist("Rush", "rush", "RH", "Rush").unwrap();
        let found = catalog.find_artist_by_normalized_name("rush").unwrap().unwrap();
        assert_eq!(found.id, artist.id);
        assert_eq!(found.directory_code, "RH");
    }

    #[test]
    fn test_artist_normalized_name_unique() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        catalog.insert_artist("Rush", "rush", "RH", "Rush").unwrap();
        let result = catalog.insert_artist("RUSH", "rush", "RH2", "Rush");
        assert!(result.is_err());
    }

    #[test]
    fn test_release_group_first_release_is_primary() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let conn = catalog.connection().unwrap();
        let artist = insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let group = insert_release_group(&conn, artist.id, "Moving Pictures", "movingpictures", Some(1981)).unwrap();
        assert!(!release_group_has_releases(&conn, group.id).unwrap());
        let release = insert_release(&conn, group.id, "Moving Pictures", None, Some(1981), 1, true, "/staging/x").unwrap();
        assert!(release.is_primary);
        assert!(release_group_has_releases(&conn, group.id).unwrap());
    }

    #[test]
    fn test_track_fingerprint_match() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let conn = catalog.connection().unwrap();
        let artist = insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let group = insert_release_group(&conn, artist.id, "Moving Pictures", "movingpictures", Some(1981)).unwrap();
        let fingerprint = "AQAAAAA";
        insert_track(&conn, group.id, artist.id, "Tom Sawyer", "tomsawyer", Some(fingerprint), None, Some(276_000)).unwrap();
        let found = find_track_by_fingerprint(&conn, group.id, fingerprint, 0.95).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_track_title_duration_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let conn = catalog.connection().unwrap();
        let artist = insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let group = insert_release_group(&conn, artist.id, "Moving Pictures", "movingpictures", Some(1981)).unwrap();
        insert_track(&conn, group.id, artist.id, "Tom Sawyer", "tomsawyer", None, None, Some(276_000)).unwrap();
        let found = find_track_by_title_duration(&conn, group.id, "tomsawyer", 278_000, 10).unwrap();
        assert!(found.is_some());
        let not_found = find_track_by_title_duration(&conn, group.id, "tomsawyer", 400_000, 10).unwrap();
        assert!(not_found.is_none());
    }

    #[test]
    fn test_primary_release_track_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let conn = catalog.connection().unwrap();
        let artist = insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let group = insert_release_group(&conn, artist.id, "Moving Pictures", "movingpictures", Some(1981)).unwrap();
        let release = insert_release(&conn, group.id, "Moving Pictures", None, Some(1981), 1, true, "/staging/x").unwrap();
        let track = insert_track(&conn, group.id, artist.id, "Tom Sawyer", "tomsawyer", None, None, Some(276_000)).unwrap();
        let rt1 = insert_release_track(&conn, release.id, track.id, 1, 1, "a.mp3", "mp3", Some(192), Some(44_100), None, Some(2), Some(276_000), "hash1", 500).unwrap();
        set_primary_release_track(&conn, track.id, rt1.id).unwrap();
        let rt2 = insert_release_track(&conn, release.id, track.id, 1, 1, "b.flac", "flac", Some(1000), Some(96_000), Some(24), Some(2), Some(276_000), "hash2", 1125).unwrap();
        set_primary_release_track(&conn, track.id, rt2.id).unwrap();

        let primary = current_primary_release_track(&conn, track.id).unwrap().unwrap();
        assert_eq!(primary.id, rt2.id);
    }

    #[test]
    fn test_staging_item_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        catalog.insert_staging_item(&staging_item("item-1", StagingStatus::PendingReview)).unwrap();
        let fetched = catalog.get_staging_item("item-1").unwrap().unwrap();
        assert_eq!(fetched.artist_name, "Rush");
        assert_eq!(fetched.status, StagingStatus::PendingReview);
    }

    #[test]
    fn test_list_staging_items_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        catalog.insert_staging_item(&staging_item("item-1", StagingStatus::PendingReview)).unwrap();
        catalog.insert_staging_item(&staging_item("item-2", StagingStatus::Approved)).unwrap();
        let pending = catalog
            .list_staging_items(StagingFilter {
                status: Some(StagingStatus::PendingReview),
            })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "item-1");
    }

    #[test]
    fn test_release_group_lock_allows_distinct_groups_and_serializes_same_group() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        let first = catalog.with_release_group_lock(1, || 1 + 1);
        assert_eq!(first, 2);
        let second = catalog.with_release_group_lock(1, || catalog.with_release_group_lock(2, || 3));
        assert_eq!(second, 3);
    }
}
