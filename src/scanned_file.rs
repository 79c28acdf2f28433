// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Tag/fingerprint extraction (§4.1) and the [`ScannedFile`] record it produces.
//!
//! [`extract`] is the sole entry point: it reads a single audio file's tags, decodes it to
//! compute the enabled analyzers' results, hashes its bytes, and returns a [`ScannedFile`] that is
//! never itself fallible — any failure downgrades the record to `validity = false` with an
//! explanatory message rather than propagating an error, per §4.1 and §7's `ValidationError`
//! policy.

use crate::analyzer::{self, ChromaprintFingerprintResult, CompoundAnalyzerResult};
use crate::config::Config;
use crate::tag::{TagKey, TaggedFile};
use crate::util::{hash_file, parse_year_from_str};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, SystemTime};

/// Extracted audio container/tag attributes for one file, prior to grouping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannedTags {
    /// Track artist.
    pub artist: Option<String>,
    /// Album artist, if distinct from the track artist.
    pub album_artist: Option<String>,
    /// Album/release title.
    pub album: Option<String>,
    /// Track title.
    pub title: Option<String>,
    /// Track number (relative to the disc).
    pub track_number: Option<u32>,
    /// Disc number.
    pub disc_number: Option<u32>,
    /// Release year, if present and parseable.
    pub year: Option<i32>,
    /// Genre.
    pub genre: Option<String>,
    /// Duration in milliseconds, read from the container (null, never zero, when unknown).
    pub duration_ms: Option<u64>,
    /// Bitrate in kbit/s.
    pub bitrate: Option<u32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Number of audio channels.
    pub channels: Option<u32>,
    /// Bit depth.
    pub bit_depth: Option<u32>,
    /// Lowercase file format/extension (`flac`, `mp3`, ...).
    pub format: Option<String>,
    /// International Standard Recording Code.
    pub isrc: Option<String>,
}

/// A single audio file cataloged during a scan (§3 `ScannedFile`).
///
/// Produced by [`extract`]; annotated in place by the grouping engine (§4.4) with `group_hash`
/// and `group_id` once extraction has completed for the whole snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// SHA-256 content hash, hex-encoded.
    pub content_hash: String,
    /// Last-modified time, as seconds since the Unix epoch.
    pub modified_at: i64,
    /// Extracted tags and container attributes.
    pub tags: ScannedTags,
    /// Acoustic fingerprint, base64-encoded, if the chromaprint analyzer ran successfully.
    pub fingerprint: Option<String>,
    /// Whether this file is eligible to contribute to a group (§4.1).
    pub valid: bool,
    /// Human-readable reason the file failed validation, if `valid` is `false`.
    pub validation_error: Option<String>,
    /// Stage-1 group hash, assigned by the grouping engine (§4.4). `None` until grouped.
    pub group_hash: Option<String>,
    /// Stage-2 group id (`group_hash` + majority year), assigned by the grouping engine.
    pub group_id: Option<String>,
}

impl ScannedFile {
    /// Build a failed record for a path that could not be read or decoded at all.
    fn invalid(path: PathBuf, size: u64, modified_at: i64, reason: impl Into<String>) -> Self {
        Self {
            path,
            size,
            content_hash: String::new(),
            modified_at,
            tags: ScannedTags::default(),
            fingerprint: None,
            valid: false,
            validation_error: Some(reason.into()),
            group_hash: None,
            group_id: None,
        }
    }
}

/// Read the tags this extractor cares about from a [`TaggedFile`].
fn read_tags(tagged: &TaggedFile, extension: &str) -> ScannedTags {
    ScannedTags {
        artist: tagged.find(TagKey::Artist).map(ToOwned::to_owned),
        album_artist: tagged.find(TagKey::AlbumArtist).map(ToOwned::to_owned),
        album: tagged.find(TagKey::Album).map(ToOwned::to_owned),
        title: tagged.find(TagKey::TrackTitle).map(ToOwned::to_owned),
        track_number: tagged
            .find(TagKey::TrackNumber)
            .and_then(|v| v.split('/').next())
            .and_then(|v| v.trim().parse().ok()),
        disc_number: tagged
            .find(TagKey::DiscNumber)
            .and_then(|v| v.split('/').next())
            .and_then(|v| v.trim().parse().ok()),
        year: tagged
            .find(TagKey::ReleaseYear)
            .or_else(|| tagged.find(TagKey::ReleaseDate))
            .and_then(parse_year_from_str),
        genre: tagged.find(TagKey::Genre).map(ToOwned::to_owned),
        isrc: tagged.find(TagKey::Isrc).map(ToOwned::to_owned),
        format: Some(extension.to_ascii_lowercase()),
        ..ScannedTags::default()
    }
}

/// Merge container attributes (duration, bitrate, sample rate, ...) produced by the analyzers
/// into a tag record already populated from the file's embedded tags.
fn merge_analysis(tags: &mut ScannedTags, analysis: &CompoundAnalyzerResult, file_size: u64) {
    if let Some(Ok(duration)) = &analysis.track_length {
        let millis = duration.num_milliseconds();
        if millis > 0 {
            #[expect(clippy::cast_sign_loss)]
            let millis = millis as u64;
            tags.duration_ms = Some(millis);
            if millis > 0 {
                let bits = file_size.saturating_mul(8);
                #[expect(clippy::cast_precision_loss)]
                let kbps = (bits as f64 / millis as f64).round();
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                if kbps.is_finite() && kbps > 0.0 {
                    tags.bitrate = Some(kbps as u32);
                }
            }
        }
    }
}

/// Determine validity per §4.1: a file is invalid if it lacks both artist and title.
fn is_valid(tags: &ScannedTags) -> bool {
    tags.artist.is_some() || tags.title.is_some()
}

/// Extract tags, container attributes, content hash, and (if enabled) an acoustic fingerprint
/// from a single audio file (§4.1, C1).
///
/// This function never returns an error to the caller: any I/O or decode failure is folded into
/// an invalid [`ScannedFile`] record so a single bad file cannot abort a scan.
#[must_use]
pub fn extract(config: &Config, path: &Path) -> ScannedFile {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            return ScannedFile::invalid(path.to_path_buf(), 0, 0, format!("stat failed: {err}"));
        }
    };
    let size = metadata.len();
    let modified_at = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(0));

    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or_default();

    let content_hash = match hash_file(path) {
        Ok(hash) => hash,
        Err(err) => {
            return ScannedFile::invalid(
                path.to_path_buf(),
                size,
                modified_at,
                format!("failed to hash file: {err}"),
            );
        }
    };

    let tagged_file = match TaggedFile::read_from_path(path) {
        Ok(tagged_file) => Some(tagged_file),
        Err(err) => {
            log::debug!("Failed to read tags from {}: {err}", path.display());
            None
        }
    };

    let mut tags = tagged_file
        .as_ref()
        .map_or_else(ScannedTags::default, |tagged| read_tags(tagged, extension));
    if tags.format.is_none() {
        tags.format = Some(extension.to_ascii_lowercase());
    }

    let analysis = analyzer::analyze(config, path);
    let fingerprint = match &analysis {
        Ok(result) => {
            merge_analysis(&mut tags, result, size);
            result
                .chromaprint_fingerprint
                .as_ref()
                .and_then(|r| r.as_ref().ok())
                .map(ChromaprintFingerprintResult::fingerprint_string)
        }
        Err(err) => {
            log::debug!("Audio analysis failed for {}: {err}", path.display());
            None
        }
    };

    // §4.1: invalid if there is no decodable audio stream, or tags carry neither artist nor
    // title. Either condition alone is disqualifying.
    let validation_error = if let Err(err) = &analysis {
        Some(format!("no decodable audio stream: {err}"))
    } else if !is_valid(&tags) {
        Some("missing both artist and title tags".to_owned())
    } else {
        None
    };
    let valid = validation_error.is_none();

    ScannedFile {
        path: path.to_path_buf(),
        size,
        content_hash,
        modified_at,
        tags,
        fingerprint,
        valid,
        validation_error,
        group_hash: None,
        group_id: None,
    }
}

/// Like [`extract`], but fails the file with `validity=false` if it takes longer than `timeout`
/// (§5: "per-file IO timeouts (default 60 s) fail the file with validity=false").
///
/// The extraction itself runs on a detached worker thread so a wedged decoder or a stalled
/// network mount can't block the caller past `timeout`; if the deadline passes first, the worker
/// is abandoned (its eventual result, if any, is simply dropped) and an invalid record is
/// returned instead.
#[must_use]
pub fn extract_with_timeout(config: &Config, path: &Path, timeout: Duration) -> ScannedFile {
    let (tx, rx) = mpsc::channel();
    let config = config.clone();
    let owned_path = path.to_path_buf();
    let worker_path = owned_path.clone();
    let _ = std::thread::spawn(move || {
        let record = extract(&config, &worker_path);
        let _ = tx.send(record);
    });
    rx.recv_timeout(timeout).unwrap_or_else(|_| {
        ScannedFile::invalid(
            owned_path,
            0,
            0,
            format!("I/O timeout after {}s", timeout.as_secs()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tags(artist: Option<&str>, title: Option<&str>) -> ScannedTags {
        ScannedTags {
            artist: artist.map(ToOwned::to_owned),
            title: title.map(ToOwned::to_owned),
            ..ScannedTags::default()
        }
    }

    #[test]
    fn test_valid_requires_artist_or_title() {
        assert!(is_valid(&sample_tags(Some("Rush"), Some("Tom Sawyer"))));
        assert!(is_valid(&sample_tags(Some("Rush"), None)));
        assert!(is_valid(&sample_tags(None, Some("Tom Sawyer"))));
        assert!(!is_valid(&sample_tags(None, None)));
    }

    #[test]
    fn test_extract_with_timeout_fails_nonexistent_file_fast() {
        let config = Config::default();
        let record = extract_with_timeout(
            &config,
            Path::new("/nonexistent/path/does-not-exist.flac"),
            Duration::from_secs(5),
        );
        assert!(!record.valid);
        assert!(record.validation_error.is_some());
    }

    #[test]
    fn test_invalid_record_has_error_and_no_group() {
        let record = ScannedFile::invalid(PathBuf::from("/tmp/x.flac"), 123, 0, "boom");
        assert!(!record.valid);
        assert_eq!(record.validation_error.as_deref(), Some("boom"));
        assert!(record.group_id.is_none());
    }
}
