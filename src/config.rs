// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration utils.

use crate::scan_store::ScanSnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Encountered when the configuration cannot be loaded.
#[derive(Error, Debug)]
#[error("Configuration Error: {0}")]
pub struct ConfigError(#[from] toml::de::Error);

/// Default configuration TOML string.
const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

/// Represents a piece of configuration that can be merged with another one.
trait MergeableConfig {
    /// Merge this configuration object with another one, taking values not set in this object from
    /// the other one (if present).
    fn merge(&self, other: &Self) -> Self;
}

/// Analyzer kinds that can be run on a decoded audio stream (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerType {
    /// Determine the track length from the container's codec parameters.
    TrackLength,
    /// Compute a Chromaprint-compatible acoustic fingerprint.
    ChromaprintFingerprint,
}

/// Configuration for the tag/fingerprint extractor (C1).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    /// Analyzers to run for every scanned file.
    pub enabled: Vec<AnalyzerType>,
    /// Number of worker threads used to extract tags/fingerprints concurrently.
    ///
    /// `0` means "number of CPU cores".
    pub num_parallel_jobs: Option<usize>,
    /// Per-file I/O timeout, in seconds, before a file is marked invalid (§5).
    pub file_io_timeout_secs: Option<u64>,
}

impl MergeableConfig for AnalyzerConfig {
    fn merge(&self, other: &Self) -> Self {
        AnalyzerConfig {
            enabled: if self.enabled.is_empty() {
                other.enabled.clone()
            } else {
                self.enabled.clone()
            },
            num_parallel_jobs: self.num_parallel_jobs.or(other.num_parallel_jobs),
            file_io_timeout_secs: self.file_io_timeout_secs.or(other.file_io_timeout_secs),
        }
    }
}

/// Configuration for the scan snapshot store (C3).
#[expect(missing_copy_implementations)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Directory where scan snapshot databases are kept.
    pub snapshot_dir: Option<String>,
    /// Minimum number of records batched per commit while inserting.
    pub insert_batch_size: Option<usize>,
    /// How long (in days) archived snapshots are retained before they may be deleted.
    pub archive_retention_days: Option<u32>,
}

impl MergeableConfig for ScanConfig {
    fn merge(&self, other: &Self) -> Self {
        ScanConfig {
            snapshot_dir: self.snapshot_dir.clone().or_else(|| other.snapshot_dir.clone()),
            insert_batch_size: self.insert_batch_size.or(other.insert_batch_size),
            archive_retention_days: self
                .archive_retention_days
                .or(other.archive_retention_days),
        }
    }
}

/// Configuration for the directory code allocator (C5).
#[expect(missing_copy_implementations)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryCodeConfig {
    /// Minimum code length; shorter codes are padded.
    pub min_length: Option<usize>,
    /// Maximum code length; longer codes are truncated.
    pub max_length: Option<usize>,
    /// Maximum number of `-N` collision suffixes to try before giving up.
    pub max_collision_attempts: Option<usize>,
}

impl MergeableConfig for DirectoryCodeConfig {
    fn merge(&self, other: &Self) -> Self {
        DirectoryCodeConfig {
            min_length: self.min_length.or(other.min_length),
            max_length: self.max_length.or(other.max_length),
            max_collision_attempts: self
                .max_collision_attempts
                .or(other.max_collision_attempts),
        }
    }
}

/// Configuration for the operational catalog database (C10) and the scan snapshot archive.
#[expect(missing_copy_implementations)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the catalog database file (artists/release-groups/releases/tracks/release-tracks
    /// and the co-located `staging_items` table).
    pub catalog_path: Option<String>,
}

impl MergeableConfig for DatabaseConfig {
    fn merge(&self, other: &Self) -> Self {
        DatabaseConfig {
            catalog_path: self.catalog_path.clone().or_else(|| other.catalog_path.clone()),
        }
    }
}

/// Configuration for path templates used by the staging materializer and the promotion
/// transactor (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Handlebars template for a staging release directory, relative to the staging root.
    pub staging_format: Option<String>,
    /// Handlebars template for a production release directory, relative to the production root.
    pub production_format: Option<String>,
    /// Handlebars template for a single track's filename (without directory), relative to its
    /// release directory.
    pub track_format: Option<String>,
    /// Maximum length of a single path segment.
    pub max_segment_length: Option<usize>,
    /// Maximum total path length in bytes.
    pub max_path_bytes: Option<usize>,
}

impl MergeableConfig for PathsConfig {
    fn merge(&self, other: &Self) -> Self {
        PathsConfig {
            staging_format: self.staging_format.clone().or_else(|| other.staging_format.clone()),
            production_format: self
                .production_format
                .clone()
                .or_else(|| other.production_format.clone()),
            track_format: self.track_format.clone().or_else(|| other.track_format.clone()),
            max_segment_length: self.max_segment_length.or(other.max_segment_length),
            max_path_bytes: self.max_path_bytes.or(other.max_path_bytes),
        }
    }
}

/// Configuration for the staging materializer (C6).
#[expect(missing_copy_implementations)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Root directory under which staging release directories are created.
    pub staging_root: Option<String>,
    /// Number of workers used to move files into staging concurrently.
    pub num_parallel_jobs: Option<usize>,
    /// Rate limit, in bytes/sec, applied to staging file moves. `None` disables the limit.
    pub rate_limit_bytes_per_sec: Option<u64>,
}

impl MergeableConfig for StagingConfig {
    fn merge(&self, other: &Self) -> Self {
        StagingConfig {
            staging_root: self.staging_root.clone().or_else(|| other.staging_root.clone()),
            num_parallel_jobs: self.num_parallel_jobs.or(other.num_parallel_jobs),
            rate_limit_bytes_per_sec: self
                .rate_limit_bytes_per_sec
                .or(other.rate_limit_bytes_per_sec),
        }
    }
}

/// Configuration for the promotion transactor (C8) and the release-group consolidator (C9).
#[expect(missing_copy_implementations)]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromotionConfig {
    /// Root directory of the production catalog tree.
    pub production_root: Option<String>,
    /// Minimum acoustic fingerprint similarity (in `[0, 1]`) to match an existing `Track` (§4.8).
    pub fingerprint_similarity_threshold: Option<f64>,
    /// Fallback window, in seconds, for matching tracks by normalized title + duration.
    pub title_duration_fallback_secs: Option<u32>,
    /// Minimum trigram similarity for a release-group candidate match (§4.9).
    pub release_group_similarity_threshold: Option<f64>,
    /// Minimum similarity margin between the top and runner-up candidate to auto-attach (§4.9).
    pub release_group_ambiguity_margin: Option<f64>,
}

impl MergeableConfig for PromotionConfig {
    fn merge(&self, other: &Self) -> Self {
        PromotionConfig {
            production_root: self
                .production_root
                .clone()
                .or_else(|| other.production_root.clone()),
            fingerprint_similarity_threshold: self
                .fingerprint_similarity_threshold
                .or(other.fingerprint_similarity_threshold),
            title_duration_fallback_secs: self
                .title_duration_fallback_secs
                .or(other.title_duration_fallback_secs),
            release_group_similarity_threshold: self
                .release_group_similarity_threshold
                .or(other.release_group_similarity_threshold),
            release_group_ambiguity_margin: self
                .release_group_ambiguity_margin
                .or(other.release_group_ambiguity_margin),
        }
    }
}

/// The main configuration struct.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Tag/fingerprint extraction settings (C1).
    pub analyzers: AnalyzerConfig,
    /// Scan snapshot store settings (C3).
    pub scan: ScanConfig,
    /// Directory code allocator settings (C5).
    pub directory_code: DirectoryCodeConfig,
    /// Staging materializer settings (C6).
    pub staging: StagingConfig,
    /// Promotion transactor / consolidator settings (C8/C9).
    pub promotion: PromotionConfig,
    /// Path templates (§6).
    pub paths: PathsConfig,
    /// Catalog database location (C10).
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::load_default().expect("Failed to load default config")
    }
}

impl MergeableConfig for Config {
    /// Merge this configuration object with another one, taking values not set in this object from
    /// the other one (if present).
    fn merge(&self, other: &Self) -> Self {
        Config {
            analyzers: self.analyzers.merge(&other.analyzers),
            scan: self.scan.merge(&other.scan),
            directory_code: self.directory_code.merge(&other.directory_code),
            staging: self.staging.merge(&other.staging),
            promotion: self.promotion.merge(&other.promotion),
            paths: self.paths.merge(&other.paths),
            database: self.database.merge(&other.database),
        }
    }
}

impl Config {
    /// Load the configuration from a string slice.
    fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str(text)?;
        Ok(config)
    }

    /// Load the default configuration.
    fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_str(DEFAULT_CONFIG)
    }

    /// Load the configuration from a file located at the given path.
    ///
    /// # Errors
    ///
    /// This method can fail if the file cannot be accessed or if it contains malformed
    /// configuration markup.
    pub fn load_from_path<T: AsRef<Path>>(path: T) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::load_from_str(&text)?;
        Ok(config)
    }

    /// Merge this configuration struct with the default values.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let default = Self::default();
        self.merge(&default)
    }

    /// Number of extraction worker threads to use, resolving `0` to the number of CPU cores.
    #[must_use]
    pub fn analyzer_parallelism(&self) -> usize {
        match self.analyzers.num_parallel_jobs.unwrap_or(0) {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Number of staging-move worker threads to use, resolving `0`/unset to a sensible default.
    #[must_use]
    pub fn staging_parallelism(&self) -> usize {
        match self.staging.num_parallel_jobs.unwrap_or(0) {
            0 => 4,
            n => n,
        }
    }

    /// Per-file I/O timeout (§5: "per-file IO timeouts (default 60 s) fail the file with
    /// validity=false"), resolving the configured value or the spec default.
    #[must_use]
    pub fn file_io_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.analyzers.file_io_timeout_secs.unwrap_or(60))
    }

    /// Path to the catalog database (C10), resolving the configured value or a sensible default.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        PathBuf::from(self.database.catalog_path.as_deref().unwrap_or("catalog.db"))
    }

    /// Directory where scan snapshot databases are kept (C3), resolving the configured value or
    /// a sensible default.
    #[must_use]
    pub fn scan_snapshot_dir(&self) -> PathBuf {
        PathBuf::from(self.scan.snapshot_dir.as_deref().unwrap_or("scans"))
    }

    /// Snapshot file path for a given scan id (§6: `scan_<timestamp>.db`).
    #[must_use]
    pub fn scan_snapshot_path(&self, scan_id: &str) -> PathBuf {
        self.scan_snapshot_dir().join(ScanSnapshot::file_name(scan_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config = Config::default();
        assert!(!config.analyzers.enabled.is_empty());
        assert!(config.promotion.fingerprint_similarity_threshold.unwrap() > 0.0);
    }

    #[test]
    fn test_merge_prefers_self() {
        let mut a = Config::default();
        a.staging.staging_root = Some("/custom/staging".to_owned());
        let merged = a.with_defaults();
        assert_eq!(merged.staging.staging_root.as_deref(), Some("/custom/staging"));
    }

    #[test]
    fn test_analyzer_parallelism_zero_means_num_cpus() {
        let mut config = Config::default();
        config.analyzers.num_parallel_jobs = Some(0);
        assert_eq!(config.analyzer_parallelism(), num_cpus::get());
    }
}
