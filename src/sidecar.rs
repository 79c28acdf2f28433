// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The `album.melodee.json` sidecar schema (§6) written by the staging materializer and consumed
//! by the promotion transactor.
//!
//! Field order in the struct definitions below is the on-disk key order: since these are typed
//! structs (not a generic [`serde_json::Value`] map), `serde_json` serializes fields in
//! declaration order, giving every sidecar a stable, diff-friendly layout.

use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Current sidecar schema version.
pub const SIDECAR_VERSION: &str = "1.0";

/// Sidecar-level review status, mirroring `StagingItem.status` (§3) minus the transient
/// `processing` state, which never appears in a written sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarStatus {
    /// Awaiting reviewer action.
    PendingReview,
    /// Approved for promotion.
    Approved,
    /// Rejected; will not be promoted.
    Rejected,
}

/// Artist metadata embedded in a sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarArtist {
    /// Display name.
    pub name: String,
    /// Normalized name (§4.2), used for matching.
    pub name_normalized: String,
    /// Allocated directory code (§4.5).
    pub directory_code: String,
    /// Sort name (e.g. "Beatles, The").
    pub sort_name: String,
    /// Optional external identifier, left for a downstream lookup hook (§1 Non-goals).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub musicbrainz_id: Option<String>,
}

/// Album/release metadata embedded in a sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarAlbum {
    /// Display name.
    pub name: String,
    /// Normalized name (§4.2).
    pub name_normalized: String,
    /// Release date, ISO-8601, if known more precisely than just a year.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Album type (`album`, `ep`, `single`, `compilation`, ...).
    pub album_type: String,
    /// Genre tags, if any were present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    /// Whether this release is a compilation of tracks from multiple sessions/artists.
    pub is_compilation: bool,
}

/// One track entry embedded in a sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarTrack {
    /// Track number within its disc.
    pub track_number: u32,
    /// Disc number.
    pub disc_number: u32,
    /// Track title.
    pub name: String,
    /// Duration in milliseconds.
    pub duration: u64,
    /// Path to the file, relative to the staging root.
    pub file_path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Bitrate in kbit/s.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth, for lossless formats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
    /// Number of audio channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    /// Acoustic fingerprint, base64-encoded, if the chromaprint analyzer ran (§4.1, §9: fingerprint
    /// matching is optional; carried through so promotion can use it when present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// International Standard Recording Code, if tagged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    /// SHA-256 checksum of the file, hex-encoded.
    pub checksum: String,
}

/// The full `album.melodee.json` sidecar document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    /// Schema version, currently always [`SIDECAR_VERSION`].
    pub version: String,
    /// When this sidecar was written, ISO-8601 UTC.
    pub processed_at: String,
    /// Artist metadata.
    pub artist: SidecarArtist,
    /// Album metadata.
    pub album: SidecarAlbum,
    /// Per-track entries, in disc/track order.
    pub tracks: Vec<SidecarTrack>,
    /// Review status.
    pub status: SidecarStatus,
    /// Validation errors recorded during staging, if any.
    pub validation_errors: Vec<String>,
}

impl Sidecar {
    /// Serialize this sidecar to its canonical JSON text (pretty-printed, stable key order).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which only happens if a field contains
    /// non-finite floating point data (none of this schema's fields do).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a sidecar document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON or does not match this schema.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write this sidecar to `path` and return the SHA-256 checksum of the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the filesystem write fails.
    pub fn write_to_path(&self, path: &Path) -> Result<String> {
        let text = self.to_json()?;
        std::fs::write(path, &text)?;
        Ok(checksum_bytes(text.as_bytes()))
    }

    /// Read a sidecar from `path` and verify its checksum matches `expected_checksum`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or
    /// [`crate::ErrorType::StagingConflict`] if the checksum does not match.
    pub fn read_and_verify(path: &Path, expected_checksum: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let actual = checksum_bytes(text.as_bytes());
        if actual != expected_checksum {
            return Err(crate::ErrorType::StagingConflict {
                path: path.to_path_buf(),
                reason: format!(
                    "sidecar checksum mismatch: expected {expected_checksum}, found {actual}"
                ),
            });
        }
        Self::from_json(&text)
    }
}

/// Compute the SHA-256 checksum of `bytes`, hex-encoded.
#[must_use]
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:064x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sidecar {
        Sidecar {
            version: SIDECAR_VERSION.to_owned(),
            processed_at: "2026-01-01T00:00:00Z".to_owned(),
            artist: SidecarArtist {
                name: "Rush".to_owned(),
                name_normalized: "rush".to_owned(),
                directory_code: "RH".to_owned(),
                sort_name: "Rush".to_owned(),
                musicbrainz_id: None,
            },
            album: SidecarAlbum {
                name: "Moving Pictures".to_owned(),
                name_normalized: "movingpictures".to_owned(),
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
                file_path: "1-01 - Tom Sawyer.flac".to_owned(),
                file_size: 12345,
                bitrate: 1000,
                sample_rate: 44_100,
                bit_depth: Some(16),
                channels: Some(2),
                fingerprint: None,
                isrc: None,
                checksum: "abc123".to_owned(),
            }],
            status: SidecarStatus::PendingReview,
            validation_errors: vec![],
        }
    }

    #[test]
    fn test_round_trip() {
        let sidecar = sample();
        let json = sidecar.to_json().unwrap();
        let parsed = Sidecar::from_json(&json).unwrap();
        assert_eq!(parsed.artist.name, "Rush");
        assert_eq!(parsed.tracks.len(), 1);
    }

    #[test]
    fn test_key_order_is_stable() {
        let json = sample().to_json().unwrap();
        let version_pos = json.find("\"version\"").unwrap();
        let artist_pos = json.find("\"artist\"").unwrap();
        let tracks_pos = json.find("\"tracks\"").unwrap();
        let status_pos = json.find("\"status\"").unwrap();
        assert!(version_pos < artist_pos);
        assert!(artist_pos < tracks_pos);
        assert!(tracks_pos < status_pos);
    }

    #[test]
    fn test_optional_fields_omitted_when_none() {
        let json = sample().to_json().unwrap();
        assert!(!json.contains("musicbrainz_id"));
        assert!(!json.contains("genres"));
    }

    #[test]
    fn test_write_and_verify_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.melodee.json");
        let sidecar = sample();
        let checksum = sidecar.write_to_path(&path).unwrap();
        let verified = Sidecar::read_and_verify(&path, &checksum).unwrap();
        assert_eq!(verified.artist.name, "Rush");
    }

    #[test]
    fn test_verify_fails_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.melodee.json");
        sample().write_to_path(&path).unwrap();
        let result = Sidecar::read_and_verify(&path, "wrong-checksum");
        assert!(result.is_err());
    }
}
