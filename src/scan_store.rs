// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The scan snapshot store (§4.3, C3): an embedded, single-file, write-once-then-read-many table
//! per scan.
//!
//! Each scan gets its own SQLite file (`scan_<timestamp>.db`, §6) reached through a pooled
//! connection manager, mirroring the envelope/pooled-access shape of the teacher's MusicBrainz
//! query cache but backed by a real embedded database rather than loose files on disk.

use crate::scanned_file::{ScannedFile, ScannedTags};
use crate::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};

/// Minimum number of records batched per commit while inserting (§4.3).
pub const MIN_INSERT_BATCH_SIZE: usize = 1000;

/// A handle to one scan's snapshot database.
#[derive(Clone)]
pub struct ScanSnapshot {
    /// Connection pool for this snapshot file.
    pool: Pool<SqliteConnectionManager>,
    /// The scan id this snapshot was created for.
    scan_id: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scanned_files (
    path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    modified_at INTEGER NOT NULL,
    tags_json TEXT NOT NULL,
    fingerprint TEXT,
    valid INTEGER NOT NULL,
    validation_error TEXT,
    group_hash TEXT,
    group_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_scanned_files_group_id ON scanned_files (group_id);
CREATE INDEX IF NOT EXISTS idx_scanned_files_valid ON scanned_files (valid);
CREATE TABLE IF NOT EXISTS snapshot_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

impl ScanSnapshot {
    /// Build the snapshot filename for a scan id, per §6: `scan_<timestamp>.db`.
    #[must_use]
    pub fn file_name(scan_id: &str) -> String {
        format!("scan_{scan_id}.db")
    }

    /// Create (or re-open) a snapshot database at `path` for `scan_id`, initializing its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database file cannot be created/opened or the schema cannot be
    /// applied.
    pub fn create(path: impl AsRef<Path>, scan_id: impl Into<String>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder().max_size(8).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA)?;
            conn.execute(
                "INSERT OR IGNORE INTO snapshot_meta (key, value) VALUES ('archived', '0')",
                [],
            )?;
        }
        Ok(Self {
            pool,
            scan_id: scan_id.into(),
        })
    }

    /// Open an existing snapshot file without re-creating its schema (it must already exist).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, scan_id: impl Into<String>) -> Result<Self> {
        Self::create(path, scan_id)
    }

    /// This snapshot's scan id.
    #[must_use]
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Append a batch of freshly scanned records. Intended to be called repeatedly while scanning
    /// with batches of at least [`MIN_INSERT_BATCH_SIZE`] for throughput, though any non-empty
    /// batch is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying database write fails, or if the batch would introduce a
    /// duplicate path (§3 invariant: path is unique within a scan snapshot).
    pub fn insert_batch(&self, records: &[ScannedFile]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scanned_files
                    (path, size, content_hash, modified_at, tags_json, fingerprint, valid,
                     validation_error, group_hash, group_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)
                 ON CONFLICT(path) DO UPDATE SET
                    size = excluded.size,
                    content_hash = excluded.content_hash,
                    modified_at = excluded.modified_at,
                    tags_json = excluded.tags_json,
                    fingerprint = excluded.fingerprint,
                    valid = excluded.valid,
                    validation_error = excluded.validation_error",
            )?;
            for record in records {
                let tags_json = serde_json::to_string(&record.tags)?;
                let _ = stmt.execute(params![
                    record.path.to_string_lossy(),
                    i64::try_from(record.size).unwrap_or(i64::MAX),
                    record.content_hash,
                    record.modified_at,
                    tags_json,
                    record.fingerprint,
                    i64::from(record.valid),
                    record.validation_error,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Write `group_hash`/`group_id` annotations for a batch of records. Only used during the
    /// grouping stage (§4.3, §4.4).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying database write fails.
    pub fn update_group(&self, assignments: &[(PathBuf, String, String)]) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE scanned_files SET group_hash = ?2, group_id = ?3 WHERE path = ?1",
            )?;
            for (path, group_hash, group_id) in assignments {
                let _ = stmt.execute(params![path.to_string_lossy(), group_hash, group_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch every valid record in this snapshot, in path order. Used by the grouping engine,
    /// which needs the full set to compute group assignments.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn all_valid_records(&self) -> Result<Vec<ScannedFile>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT path, size, content_hash, modified_at, tags_json, fingerprint, valid,
                    validation_error, group_hash, group_id
             FROM scanned_files WHERE valid = 1 ORDER BY path",
        )?;
        let rows = stmt.query_map([], row_to_scanned_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Stream groups and their member files, sorted by artist then year then album (§4.3
    /// `query_groups`). Returns the valid, grouped records only (`group_id IS NOT NULL`) when
    /// `valid_only` is set, matching the `query_groups(valid=true)` default.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails, or [`crate::ErrorType::GroupingError`] if
    /// the snapshot has not been grouped yet.
    pub fn query_groups(&self, valid_only: bool) -> Result<Vec<ScannedFile>> {
        if !self.is_grouped()? {
            return Err(crate::ErrorType::Grouping(format!(
                "snapshot {} has not been grouped yet",
                self.scan_id
            )));
        }
        let conn = self.pool.get()?;
        let where_clause = if valid_only {
            "WHERE valid = 1 AND group_id IS NOT NULL"
        } else {
            "WHERE group_id IS NOT NULL"
        };
        let query = format!(
            "SELECT path, size, content_hash, modified_at, tags_json, fingerprint, valid,
                    validation_error, group_hash, group_id
             FROM scanned_files {where_clause}
             ORDER BY
                json_extract(tags_json, '$.album_artist'),
                json_extract(tags_json, '$.artist'),
                json_extract(tags_json, '$.year'),
                json_extract(tags_json, '$.album')"
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], row_to_scanned_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Returns `true` if every valid record in this snapshot has been assigned a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn is_grouped(&self) -> Result<bool> {
        let conn = self.pool.get()?;
        let ungrouped: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scanned_files WHERE valid = 1 AND group_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scanned_files WHERE valid = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(total > 0 && ungrouped == 0)
    }

    /// Mark the scan as incomplete (cancelled mid-scan). Grouping refuses to run until the scan
    /// is explicitly resumed and re-marked complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying database write fails.
    pub fn mark_incomplete(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO snapshot_meta (key, value) VALUES ('incomplete', '1')
             ON CONFLICT(key) DO UPDATE SET value = '1'",
            [],
        )?;
        Ok(())
    }

    /// Returns `true` if this snapshot was left incomplete by a cancelled scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn is_incomplete(&self) -> Result<bool> {
        let conn = self.pool.get()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM snapshot_meta WHERE key = 'incomplete'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref() == Some("1"))
    }

    /// Mark this snapshot as archived (read-only) after a successful `process` run.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying database write fails.
    pub fn mark_archived(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO snapshot_meta (key, value) VALUES ('archived', '1')
             ON CONFLICT(key) DO UPDATE SET value = '1'",
            [],
        )?;
        Ok(())
    }

    /// Returns `true` if this snapshot has been archived.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn is_archived(&self) -> Result<bool> {
        let conn = self.pool.get()?;
        let value: String = conn.query_row(
            "SELECT value FROM snapshot_meta WHERE key = 'archived'",
            [],
            |row| row.get(0),
        )?;
        Ok(value == "1")
    }

    /// Total number of records (valid or not) in this snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn record_count(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM scanned_files", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Map a SQLite row back to a [`ScannedFile`].
fn row_to_scanned_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScannedFile> {
    let path: String = row.get(0)?;
    let size: i64 = row.get(1)?;
    let tags_json: String = row.get(4)?;
    let tags: ScannedTags = serde_json::from_str(&tags_json).unwrap_or_default();
    let valid: i64 = row.get(6)?;
    Ok(ScannedFile {
        path: PathBuf::from(path),
        size: u64::try_from(size).unwrap_or(0),
        content_hash: row.get(2)?,
        modified_at: row.get(3)?,
        tags,
        fingerprint: row.get(5)?,
        valid: valid != 0,
        validation_error: row.get(7)?,
        group_hash: row.get(8)?,
        group_id: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanned_file::ScannedTags;

    fn fixture(path: &str, artist: &str, album: &str, valid: bool) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            size: 1000,
            content_hash: format!("hash-{path}"),
            modified_at: 0,
            tags: ScannedTags {
                artist: Some(artist.to_owned()),
                album: Some(album.to_owned()),
                ..ScannedTags::default()
            },
            fingerprint: None,
            valid,
            validation_error: None,
            group_hash: None,
            group_id: None,
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_1.db"), "1").unwrap();
        let records = vec![
            fixture("/a/1.flac", "Rush", "Moving Pictures", true),
            fixture("/a/2.flac", "Rush", "Moving Pictures", true),
        ];
        snapshot.insert_batch(&records).unwrap();
        let fetched = snapshot.all_valid_records().unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[test]
    fn test_duplicate_path_is_upsert_not_duplicate_row() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_2.db"), "2").unwrap();
        let record = fixture("/a/1.flac", "Rush", "Moving Pictures", true);
        snapshot.insert_batch(&[record.clone()]).unwrap();
        snapshot.insert_batch(&[record]).unwrap();
        assert_eq!(snapshot.record_count().unwrap(), 1);
    }

    #[test]
    fn test_query_groups_fails_before_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_3.db"), "3").unwrap();
        snapshot
            .insert_batch(&[fixture("/a/1.flac", "Rush", "Moving Pictures", true)])
            .unwrap();
        assert!(snapshot.query_groups(true).is_err());
    }

    #[test]
    fn test_query_groups_after_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_4.db"), "4").unwrap();
        let record = fixture("/a/1.flac", "Rush", "Moving Pictures", true);
        snapshot.insert_batch(&[record]).unwrap();
        snapshot
            .update_group(&[(PathBuf::from("/a/1.flac"), "h1".to_owned(), "h1_1981".to_owned())])
            .unwrap();
        let groups = snapshot.query_groups(true).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id.as_deref(), Some("h1_1981"));
    }

    #[test]
    fn test_incomplete_and_archived_flags() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_5.db"), "5").unwrap();
        assert!(!snapshot.is_incomplete().unwrap());
        snapshot.mark_incomplete().unwrap();
        assert!(snapshot.is_incomplete().unwrap());

        assert!(!snapshot.is_archived().unwrap());
        snapshot.mark_archived().unwrap();
        assert!(snapshot.is_archived().unwrap());
    }

    #[test]
    fn test_file_name_matches_spec_pattern() {
        assert_eq!(ScanSnapshot::file_name("20260101T000000"), "scan_20260101T000000.db");
    }
}
