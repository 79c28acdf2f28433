// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The grouping engine (§4.4, C4): clusters [`ScannedFile`] records into release-group candidates
//! in two stages.
//!
//! Stage 1 buckets files by a hash of their normalized `(album_artist or artist, album)` pair.
//! Stage 2 splits each stage-1 bucket into one partition per distinct non-null year, so a single
//! directory holding two genuinely different editions (e.g. a 1969 original and its 2009
//! remaster) becomes two groups, not one (§8 S2 "Edition split"). Records that carry no year at
//! all don't get a partition of their own *within a bucket that has dated members*: majority vote
//! (ties broken by the *latest* candidate year) instead decides which dated partition they fold
//! into, mirroring the teacher's `MostCommonItem` consensus-finding shape but scoped to "which
//! edition does this undated file probably belong to" rather than "which year wins for everyone".
//! A bucket with no dated members at all falls back to a single `_unknown` partition.

use crate::normalize::normalize;
use crate::scan_store::ScanSnapshot;
use crate::scanned_file::ScannedFile;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hash value used for the null-year partition (§4.4: "a null-year partition uses a stable,
/// distinguishable group id suffix").
const UNKNOWN_YEAR_SUFFIX: &str = "unknown";

/// One stage-2 partition: a candidate release group with its chosen year and member files.
#[derive(Debug, Clone)]
pub struct GroupAssignment {
    /// Stage-1 hash (artist+album only, hex-encoded SHA-256).
    pub group_hash: String,
    /// Stage-2 group id (`group_hash` plus the chosen year or [`UNKNOWN_YEAR_SUFFIX`]).
    pub group_id: String,
    /// The year chosen for this partition, if any member carried one.
    pub year: Option<i32>,
    /// Paths assigned to this group, in stable input order.
    pub members: Vec<std::path::PathBuf>,
}

/// Compute the stage-1 hash for a record: `normalize(album_artist or artist) :: normalize(album)`.
///
/// Returns `None` if the record lacks an album name entirely, since a file with no album cannot
/// be grouped (it remains invalid, per §4.1, before this stage is ever reached in practice, but
/// this function stays total for reuse in tests).
#[must_use]
pub fn stage_one_hash(record: &ScannedFile) -> Option<String> {
    let album = record.tags.album.as_deref()?;
    let artist = record
        .tags
        .album_artist
        .as_deref()
        .or(record.tags.artist.as_deref())
        .unwrap_or_default();
    let key = format!("{}::{}", normalize(artist), normalize(album));
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Partition a stage-1 bucket by year (§4.4, §8 S2): one partition per distinct non-null year.
///
/// Undated records are not kept as a separate partition when the bucket has any dated members;
/// instead they're folded into the partition with the most members (ties broken by the latest
/// year) by majority vote. Majority vote never merges two *distinct* dated years together — it
/// only decides where undated stragglers land. A bucket with no dated members at all yields a
/// single `(None, ...)` partition covering every record.
fn partition_by_year(records: &[&ScannedFile]) -> Vec<(Option<i32>, Vec<std::path::PathBuf>)> {
    let mut dated: HashMap<i32, Vec<std::path::PathBuf>> = HashMap::new();
    let mut undated: Vec<std::path::PathBuf> = Vec::new();
    for record in records {
        match record.tags.year {
            Some(year) => dated.entry(year).or_default().push(record.path.clone()),
            None => undated.push(record.path.clone()),
        }
    }

    if dated.is_empty() {
        return vec![(None, undated)];
    }

    if !undated.is_empty() {
        let winner_year = dated
            .iter()
            .max_by_key(|(year, members)| (members.len(), **year))
            .map(|(year, _)| *year)
            .expect("dated is non-empty");
        dated
            .get_mut(&winner_year)
            .expect("winner_year was just read from dated")
            .extend(undated);
    }

    dated.into_iter().map(|(year, members)| (Some(year), members)).collect()
}

/// Assign stage-1 and stage-2 groups to a full set of valid, scanned records (§4.4).
///
/// Grouping is idempotent: calling this twice on the same input set produces the same
/// `group_hash`/`group_id` values, since both are pure functions of normalized tag content.
#[must_use]
pub fn assign_groups(records: &[ScannedFile]) -> Vec<GroupAssignment> {
    let mut buckets: HashMap<String, Vec<&ScannedFile>> = HashMap::new();
    for record in records {
        if let Some(hash) = stage_one_hash(record) {
            buckets.entry(hash).or_default().push(record);
        }
    }

    let mut assignments = Vec::new();
    for (group_hash, members) in buckets {
        for (year, paths) in partition_by_year(&members) {
            let group_id = match year {
                Some(year) => format!("{group_hash}_{year}"),
                None => format!("{group_hash}_{UNKNOWN_YEAR_SUFFIX}"),
            };
            assignments.push(GroupAssignment {
                group_hash: group_hash.clone(),
                group_id,
                year,
                members: paths,
            });
        }
    }
    assignments
}

/// Run the grouping engine against a scan snapshot (the `group(scan_id)` operation, §6): load the
/// valid records, assign stage-1/stage-2 groups, and persist the assignments back to the
/// snapshot. Returns the number of groups produced.
///
/// # Errors
///
/// Returns [`crate::ErrorType::IncompleteSnapshot`] if the scan that produced `snapshot` was
/// cancelled before finishing, or an error if the underlying snapshot reads/writes fail.
pub fn run(snapshot: &ScanSnapshot) -> Result<usize> {
    if snapshot.is_incomplete()? {
        return Err(crate::ErrorType::IncompleteSnapshot(format!(
            "scan {} did not complete; re-run or resume the scan before grouping",
            snapshot.scan_id()
        )));
    }
    let records = snapshot.all_valid_records()?;
    let assignments = assign_groups(&records);
    let updates: Vec<(std::path::PathBuf, String, String)> = assignments
        .iter()
        .flat_map(|assignment| {
            assignment.members.iter().map(|path| {
                (path.clone(), assignment.group_hash.clone(), assignment.group_id.clone())
            })
        })
        .collect();
    snapshot.update_group(&updates)?;
    Ok(assignments.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanned_file::ScannedTags;
    use std::path::PathBuf;

    fn record(path: &str, artist: &str, album: &str, year: Option<i32>) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            size: 0,
            content_hash: String::new(),
            modified_at: 0,
            tags: ScannedTags {
                artist: Some(artist.to_owned()),
                album: Some(album.to_owned()),
                year,
                ..ScannedTags::default()
            },
            fingerprint: None,
            valid: true,
            validation_error: None,
            group_hash: None,
            group_id: None,
        }
    }

    #[test]
    fn test_same_artist_album_same_hash() {
        let a = record("/a/1.flac", "Rush", "Moving Pictures", Some(1981));
        let b = record("/a/2.flac", "Rush", "Moving Pictures", Some(1981));
        assert_eq!(stage_one_hash(&a), stage_one_hash(&b));
    }

    #[test]
    fn test_normalization_applied_before_hashing() {
        let a = record("/a/1.flac", "The Beatles", "Abbey Road", Some(1969));
        let b = record("/a/2.flac", "Beatles", "Abbey Road", Some(1969));
        assert_eq!(stage_one_hash(&a), stage_one_hash(&b));
    }

    #[test]
    fn test_no_album_has_no_hash() {
        let mut a = record("/a/1.flac", "Rush", "Moving Pictures", Some(1981));
        a.tags.album = None;
        assert!(stage_one_hash(&a).is_none());
    }

    #[test]
    fn test_distinct_dated_years_stay_in_separate_partitions() {
        // §8 S2 "Edition split": a 1981 original and a 1997 remaster of the same album share a
        // group_hash but must never collapse into one group_id.
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/2.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/3.flac", "Rush", "Moving Pictures", Some(1997)),
        ];
        let assignments = assign_groups(&records);
        assert_eq!(assignments.len(), 2);
        let by_year: HashMap<Option<i32>, usize> =
            assignments.iter().map(|a| (a.year, a.members.len())).collect();
        assert_eq!(by_year.get(&Some(1981)), Some(&2));
        assert_eq!(by_year.get(&Some(1997)), Some(&1));
    }

    #[test]
    fn test_undated_record_folds_into_majority_dated_partition() {
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/2.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/3.flac", "Rush", "Moving Pictures", Some(1997)),
            record("/a/4.flac", "Rush", "Moving Pictures", None),
        ];
        let assignments = assign_groups(&records);
        assert_eq!(assignments.len(), 2);
        let by_year: HashMap<Option<i32>, usize> =
            assignments.iter().map(|a| (a.year, a.members.len())).collect();
        assert_eq!(by_year.get(&Some(1981)), Some(&3));
        assert_eq!(by_year.get(&Some(1997)), Some(&1));
    }

    #[test]
    fn test_undated_record_tie_break_folds_into_latest_dated_partition() {
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/2.flac", "Rush", "Moving Pictures", Some(1997)),
            record("/a/3.flac", "Rush", "Moving Pictures", None),
        ];
        let assignments = assign_groups(&records);
        assert_eq!(assignments.len(), 2);
        let by_year: HashMap<Option<i32>, usize> =
            assignments.iter().map(|a| (a.year, a.members.len())).collect();
        assert_eq!(by_year.get(&Some(1981)), Some(&1));
        assert_eq!(by_year.get(&Some(1997)), Some(&2));
    }

    #[test]
    fn test_null_year_is_its_own_partition_when_no_dated_members_exist() {
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", None),
            record("/a/2.flac", "Rush", "Moving Pictures", None),
        ];
        let assignments = assign_groups(&records);
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].year.is_none());
        assert!(assignments[0].group_id.ends_with(UNKNOWN_YEAR_SUFFIX));
    }

    #[test]
    fn test_distinct_albums_produce_distinct_groups() {
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/2.flac", "Rush", "Permanent Waves", Some(1980)),
        ];
        let assignments = assign_groups(&records);
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn test_idempotent_assignment() {
        let records = vec![
            record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
            record("/a/2.flac", "Rush", "Moving Pictures", Some(1981)),
        ];
        let first = assign_groups(&records);
        let second = assign_groups(&records);
        assert_eq!(first[0].group_id, second[0].group_id);
    }

    #[test]
    fn test_run_persists_assignments_to_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_g1.db"), "g1").unwrap();
        snapshot
            .insert_batch(&[
                record("/a/1.flac", "Rush", "Moving Pictures", Some(1981)),
                record("/a/2.flac", "Rush", "Moving Pictures", Some(1981)),
            ])
            .unwrap();
        let count = run(&snapshot).unwrap();
        assert_eq!(count, 1);
        let groups = snapshot.query_groups(true).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].group_id.is_some());
    }

    #[test]
    fn test_run_rejects_incomplete_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ScanSnapshot::create(dir.path().join("scan_g2.db"), "g2").unwrap();
        snapshot.mark_incomplete().unwrap();
        assert!(run(&snapshot).is_err());
    }
}
