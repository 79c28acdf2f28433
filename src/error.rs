// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Error and result types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type.
#[derive(Error, Debug)]
pub enum ErrorType {
    /// Configuration error.
    #[error("Configuration Error ({0})")]
    Config(#[from] crate::config::ConfigError),
    /// I/O Error.
    #[error("Input/Output error ({:?})", .0)]
    Io(#[from] io::Error),
    /// XDG BaseDirectories error.
    #[error("BaseDirectories error ({:?})", .0)]
    BaseDirectoriesError(#[from] xdg::BaseDirectoriesError),
    /// File has an unknown file extension.
    #[error("File has unknown file type")]
    UnknownFileType,
    /// Errors raised by the [`id3`] crate.
    #[cfg(feature = "id3")]
    #[error("Failed to read ID3 tag")]
    Id3(#[from] id3::Error),
    /// Errors raised by the [`metaflac`] crate.
    #[cfg(feature = "flac")]
    #[error("Failed to read FLAC tag")]
    Flac(#[from] metaflac::Error),
    /// An error occurred while analyzing the audio track.
    #[error("Audio analysis failed: {0}")]
    Analyzer(#[from] crate::analyzer::AnalyzerError),
    /// An error occurred while formatting a template string.
    #[error("Template formatting failed: {0}")]
    TemplateFormattingFailed(#[from] handlebars::RenderError),
    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Acquiring a pooled database connection failed.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    /// JSON (de-)serialization of a sidecar failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// §7 `ValidationError` — a file failed tag/format checks during extraction.
    ///
    /// Recorded against the file in the scan snapshot; never propagated to the caller.
    #[error("File validation failed: {0}")]
    Validation(String),
    /// §7 `GroupingError` — a structural error while grouping, e.g. grouping an incomplete
    /// snapshot.
    #[error("Grouping error: {0}")]
    Grouping(String),
    /// §7 `CollisionError` — a directory code or staging path could not be allocated.
    #[error("Collision error: {0}")]
    Collision(#[from] crate::directory_code::CollisionError),
    /// A staging conflict: the target staging directory already holds a non-matching sidecar.
    #[error("Staging conflict at {path}: {reason}")]
    StagingConflict {
        /// The staging directory that conflicted.
        path: PathBuf,
        /// Human-readable explanation.
        reason: String,
    },
    /// §7 `PromotionConflict` — a database uniqueness or precondition was violated while
    /// promoting a staging item. The caller should mark the item rejected and record this.
    #[error("Promotion conflict: {0}")]
    PromotionConflict(String),
    /// §9 open question resolution: an ambiguous release-group match was found and the caller
    /// must resolve it explicitly. This is not a failure, but it aborts the current promotion.
    #[error("Ambiguous release-group match ({0} candidates within the similarity margin)")]
    ConsolidationAmbiguity(usize),
    /// §7 `Cancelled` — the operation was aborted by caller-initiated cancellation.
    #[error("Operation cancelled")]
    Cancelled,
    /// The scan snapshot is incomplete (a cancelled scan) and cannot be grouped yet.
    #[error("Scan snapshot {0} is incomplete and cannot be grouped")]
    IncompleteSnapshot(String),
}

/// Convenience type.
pub type Result<T> = std::result::Result<T, ErrorType>;
