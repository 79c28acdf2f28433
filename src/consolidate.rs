// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The release-group consolidator (§4.9, C9): decides which existing `ReleaseGroup` row (if any)
//! a newly-promoted release belongs to, using normalized-name similarity rather than exact match
//! so that minor transcription differences between pressings of the same release don't each mint
//! a new group.
//!
//! Similarity is scored with `strsim`'s Jaro-Winkler metric over the already-normalized (§4.2)
//! artist/album strings. A release-group is attached automatically only when its candidate is
//! unambiguously the best match; otherwise resolution is left to the caller (§4.8 step 3), who may
//! retry promotion with an explicit `release_group_id` override.

use crate::catalog::{self, ReleaseGroup};
use crate::config::PromotionConfig;
use crate::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Default similarity threshold below which a candidate is not considered a match at all.
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
/// Default minimum gap between the best and second-best candidate required to auto-attach.
const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.05;

/// One scored release-group candidate.
#[derive(Debug, Clone)]
pub struct ConsolidationCandidate {
    /// The candidate release-group row.
    pub release_group: ReleaseGroup,
    /// Jaro-Winkler similarity between the candidate's normalized name and the query name.
    pub similarity: f64,
}

/// The outcome of attempting to resolve a release-group for a promoted release (§4.9).
#[derive(Debug, Clone)]
pub enum ConsolidationOutcome {
    /// An existing release-group was found unambiguously and should be reused.
    Attached(ReleaseGroup),
    /// No existing release-group matched closely enough; a new one was created.
    Created(ReleaseGroup),
    /// More than one candidate is within the ambiguity margin of the best match. Promotion must
    /// be aborted and retried with an explicit `release_group_id`.
    Ambiguous(Vec<ConsolidationCandidate>),
}

/// Resolve (or create) the release-group that a release with the given normalized name belongs
/// to, among `artist_id`'s existing release-groups (§4.9).
///
/// Must run against a connection/transaction already holding the promotion's advisory lock, since
/// it may insert a new `release_groups` row.
///
/// # Errors
///
/// Returns an error if the underlying queries or insert fail.
pub fn resolve_release_group(
    conn: &Connection,
    config: &PromotionConfig,
    artist_id: i64,
    name: &str,
    name_normalized: &str,
    year: Option<i32>,
) -> Result<ConsolidationOutcome> {
    let threshold = config
        .release_group_similarity_threshold
        .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
    let margin = config
        .release_group_ambiguity_margin
        .unwrap_or(DEFAULT_AMBIGUITY_MARGIN);

    let mut scored: Vec<ConsolidationCandidate> = catalog::release_group_candidates(conn, artist_id)?
        .into_iter()
        .map(|release_group| {
            let similarity =
                strsim::jaro_winkler(&release_group.name_normalized, name_normalized);
            ConsolidationCandidate {
                release_group,
                similarity,
            }
        })
        .filter(|candidate| candidate.similarity >= threshold)
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    if scored.is_empty() {
        let release_group =
            catalog::insert_release_group(conn, artist_id, name, name_normalized, year)?;
        return Ok(ConsolidationOutcome::Created(release_group));
    }

    let unambiguous =
        scored.len() == 1 || scored[0].similarity - scored[1].similarity >= margin;
    if unambiguous {
        return Ok(ConsolidationOutcome::Attached(scored[0].release_group.clone()));
    }
    Ok(ConsolidationOutcome::Ambiguous(scored))
}

/// Fetch a single release-group by id, for resolving an explicit override after an
/// [`ConsolidationOutcome::Ambiguous`] result (§4.9 / §9 open question).
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn release_group_by_id(conn: &Connection, release_group_id: i64) -> Result<Option<ReleaseGroup>> {
    conn.query_row(
        "SELECT id, artist_id, name, name_normalized, year, total_unique_tracks
         FROM release_groups WHERE id = ?1",
        params![release_group_id],
        |row| {
            Ok(ReleaseGroup {
                id: row.get(0)?,
                artist_id: row.get(1)?,
                name: row.get(2)?,
                name_normalized: row.get(3)?,
                year: row.get(4)?,
                total_unique_tracks: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn config() -> PromotionConfig {
        PromotionConfig {
            production_root: None,
            fingerprint_similarity_threshold: None,
            title_duration_fallback_secs: None,
            release_group_similarity_threshold: Some(0.85),
            release_group_ambiguity_margin: Some(0.05),
        }
    }

    fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.db")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn test_no_candidates_creates_new_group() {
        let (_dir, catalog) = open_catalog();
        let conn = catalog.connection().unwrap();
        let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let outcome = resolve_release_group(
            &conn,
            &config(),
            artist.id,
            "Moving Pictures",
            "movingpictures",
            Some(1981),
        )
        .unwrap();
        assert!(matches!(outcome, ConsolidationOutcome::Created(_)));
    }

    #[test]
    fn test_close_match_attaches() {
        let (_dir, catalog) = open_catalog();
        let conn = catalog.connection().unwrap();
        let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let existing = catalog::insert_release_group(
            &conn,
            artist.id,
            "Moving Pictures",
            "movingpictures",
            Some(1981),
        )
        .unwrap();
        let outcome = resolve_release_group(
            &conn,
            &config(),
            artist.id,
            "Moving Pictures",
            "movingpictures",
            Some(1981),
        )
        .unwrap();
        match outcome {
            ConsolidationOutcome::Attached(group) => assert_eq!(group.id, existing.id),
            other => panic!("expected Attached, got {other:?}"),
        }
    }

    #[test]
    fn test_two_equally_close_candidates_are_ambiguous() {
        let (_dir, catalog) = open_catalog();
        let conn = catalog.connection().unwrap();
        let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        catalog::insert_release_group(&conn, artist.id, "Hemispheres", "hemispheres", Some(1978))
            .unwrap();
        catalog::insert_release_group(&conn, artist.id, "Hemispheree", "hemispheree", Some(1978))
            .unwrap();
        let outcome =
            resolve_release_group(&conn, &config(), artist.id, "Hemispherex", "hemispherex", None)
                .unwrap();
        assert!(matches!(outcome, ConsolidationOutcome::Ambiguous(_)));
    }

    #[test]
    fn test_unrelated_name_creates_new_group_rather_than_attaching() {
        let (_dir, catalog) = open_catalog();
        let conn = catalog.connection().unwrap();
        let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        catalog::insert_release_group(
            &conn,
            artist.id,
            "Moving Pictures",
            "movingpictures",
            Some(1981),
        )
        .unwrap();
        let outcome = resolve_release_group(
            &conn,
            &config(),
            artist.id,
            "Permanent Waves",
            "permanentwaves",
            Some(1980),
        )
        .unwrap();
        assert!(matches!(outcome, ConsolidationOutcome::Created(_)));
    }

    #[test]
    fn test_release_group_by_id_round_trip() {
        let (_dir, catalog) = open_catalog();
        let conn = catalog.connection().unwrap();
        let artist = catalog::insert_artist(&conn, "Rush", "rush", "RH", "Rush").unwrap();
        let group = catalog::insert_release_group(
            &conn,
            artist.id,
            "Moving Pictures",
            "movingpictures",
            Some(1981),
        )
        .unwrap();
        let fetched = release_group_by_id(&conn, group.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Moving Pictures");
        assert!(release_group_by_id(&conn, group.id + 999).unwrap().is_none());
    }
}
