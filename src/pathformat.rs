// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Path formatting and templating (§6): renders staging/production directory names and track
//! filenames from the configured Handlebars templates.

use crate::config::PathsConfig;
use crate::Result;
use handlebars::Handlebars;
use serde::Serialize;

/// Characters that are forbidden in paths on Microsoft Windows (in addition to control characters).
#[cfg(target_os = "windows")]
const ILLEGAL_PATH_CHARS: &str = r#"\/:*?"<>|"#;

/// Characters that are forbidden in paths on Unices (in addition to control characters).
#[cfg(not(target_os = "windows"))]
const ILLEGAL_PATH_CHARS: &str = "/";

/// Name under which the staging-directory template is registered.
const TEMPLATE_STAGING: &str = "staging";
/// Name under which the production-directory template is registered.
const TEMPLATE_PRODUCTION: &str = "production";
/// Name under which the track-filename template is registered.
const TEMPLATE_TRACK: &str = "track";

/// Strips control characters, collapses whitespace runs to underscore, and replaces filesystem-
/// illegal characters with underscore (§6: "Filesystem-invalid characters are replaced with
/// underscore; runs of whitespace collapse to underscore").
fn escape_path_chars(data: &str) -> String {
    let mut result = String::with_capacity(data.len());
    let mut in_whitespace_run = false;
    for c in data.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() {
            if !in_whitespace_run {
                result.push('_');
                in_whitespace_run = true;
            }
            continue;
        }
        in_whitespace_run = false;
        if ILLEGAL_PATH_CHARS.contains(c) {
            result.push('_');
        } else {
            result.push(c);
        }
    }
    result
}

/// Truncate a path segment to `max_len` characters, preserving a trailing file extension when
/// present so a truncated track filename still keeps its `.flac`/`.mp3` suffix.
fn truncate_segment(segment: &str, max_len: usize) -> String {
    if segment.chars().count() <= max_len {
        return segment.to_owned();
    }
    if let Some(dot) = segment.rfind('.') {
        let ext = &segment[dot..];
        if ext.chars().count() < max_len {
            let stem_budget = max_len - ext.chars().count();
            let stem: String = segment[..dot].chars().take(stem_budget).collect();
            return format!("{stem}{ext}");
        }
    }
    segment.chars().take(max_len).collect()
}

/// Renders the staging/production directory templates and the track filename template (§6).
#[derive(Debug, Clone)]
pub struct PathFormatter {
    handlebars: Handlebars<'static>,
    max_segment_length: usize,
}

impl PathFormatter {
    /// Build a formatter from the resolved path configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured template fails to parse.
    pub fn new(config: &PathsConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(escape_path_chars);
        handlebars.register_template_string(
            TEMPLATE_STAGING,
            config
                .staging_format
                .as_deref()
                .unwrap_or("{{artist_code}}/{{artist}}/{{year}} - {{album}}"),
        )?;
        handlebars.register_template_string(
            TEMPLATE_PRODUCTION,
            config.production_format.as_deref().unwrap_or(
                "{{artist_code}}/{{artist}}/{{year}} - {{album}}{{#if edition}} ({{edition}}){{/if}}",
            ),
        )?;
        handlebars.register_template_string(
            TEMPLATE_TRACK,
            config
                .track_format
                .as_deref()
                .unwrap_or("{{disc}}-{{track}} - {{title}}.{{extension}}"),
        )?;
        Ok(Self {
            handlebars,
            max_segment_length: config.max_segment_length.unwrap_or(60),
        })
    }

    /// Render the staging directory path (relative to the staging root) for a group.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering the template fails.
    pub fn format_staging(&self, values: &PathFormatterValues) -> Result<String> {
        self.render(TEMPLATE_STAGING, values)
    }

    /// Render the production directory path (relative to the production root) for a group.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering the template fails.
    pub fn format_production(&self, values: &PathFormatterValues) -> Result<String> {
        self.render(TEMPLATE_PRODUCTION, values)
    }

    /// Render the track filename (without directory) for one track.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering the template fails.
    pub fn format_track(&self, values: &PathFormatterValues) -> Result<String> {
        self.render(TEMPLATE_TRACK, values)
    }

    /// Render `template_name`, then clamp each `/`-separated segment to `max_segment_length`.
    fn render(&self, template_name: &str, values: &PathFormatterValues) -> Result<String> {
        let rendered = self.handlebars.render(template_name, values)?;
        let truncated = rendered
            .split('/')
            .map(|segment| truncate_segment(segment, self.max_segment_length))
            .collect::<Vec<_>>()
            .join("/");
        Ok(truncated)
    }
}

/// Values substituted into a path template (§6 on-disk layout).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PathFormatterValues {
    /// Artist display name.
    pub artist: String,
    /// Artist directory code (§4.5).
    pub artist_code: String,
    /// Album/release display name.
    pub album: String,
    /// Release year, formatted as a plain string (empty if unknown).
    pub year: String,
    /// Edition tag (e.g. `"deluxe"`), omitted for the original release.
    pub edition: Option<String>,
    /// Disc number, formatted as a plain string.
    pub disc: String,
    /// Track number, zero-padded to two digits.
    pub track: String,
    /// Track title.
    pub title: String,
    /// File extension, without the leading dot.
    pub extension: String,
}

impl PathFormatterValues {
    /// Format a track/disc number as a zero-padded two-digit string (`{track:02d}`, §6).
    #[must_use]
    pub fn pad2(number: u32) -> String {
        format!("{number:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PathsConfig {
        PathsConfig {
            staging_format: Some("{{artist_code}}/{{artist}}/{{year}} - {{album}}".to_owned()),
            production_format: Some(
                "{{artist_code}}/{{artist}}/{{year}} - {{album}}{{#if edition}} ({{edition}}){{/if}}"
                    .to_owned(),
            ),
            track_format: Some("{{disc}}-{{track}} - {{title}}.{{extension}}".to_owned()),
            max_segment_length: Some(60),
            max_path_bytes: Some(240),
        }
    }

    fn values() -> PathFormatterValues {
        PathFormatterValues {
            artist: "Rush".to_owned(),
            artist_code: "RH".to_owned(),
            album: "Moving Pictures".to_owned(),
            year: "1981".to_owned(),
            edition: None,
            disc: "1".to_owned(),
            track: PathFormatterValues::pad2(1),
            title: "Tom Sawyer".to_owned(),
            extension: "flac".to_owned(),
        }
    }

    #[test]
    fn test_staging_path() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let output = formatter.format_staging(&values()).unwrap();
        assert_eq!(output, "RH/Rush/1981 - Moving Pictures");
    }

    #[test]
    fn test_production_path_without_edition() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let output = formatter.format_production(&values()).unwrap();
        assert_eq!(output, "RH/Rush/1981 - Moving Pictures");
    }

    #[test]
    fn test_production_path_with_edition() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let mut vals = values();
        vals.edition = Some("Deluxe".to_owned());
        let output = formatter.format_production(&vals).unwrap();
        assert_eq!(output, "RH/Rush/1981 - Moving Pictures (Deluxe)");
    }

    #[test]
    fn test_track_filename() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let output = formatter.format_track(&values()).unwrap();
        assert_eq!(output, "1-01 - Tom Sawyer.flac");
    }

    #[test]
    fn test_illegal_characters_are_escaped() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let mut vals = values();
        vals.title = "A/B: \"C\"".to_owned();
        let output = formatter.format_track(&vals).unwrap();
        assert!(!output.contains('/') || output.matches('/').count() == 1);
        assert!(!output.contains(':'));
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        let formatter = PathFormatter::new(&config()).unwrap();
        let mut vals = values();
        vals.title = "Too   Much   Space".to_owned();
        let output = formatter.format_track(&vals).unwrap();
        assert!(!output.contains("   "));
    }

    #[test]
    fn test_segment_length_is_clamped() {
        let mut cfg = config();
        cfg.max_segment_length = Some(10);
        let formatter = PathFormatter::new(&cfg).unwrap();
        let output = formatter.format_staging(&values()).unwrap();
        for segment in output.split('/') {
            assert!(segment.chars().count() <= 10);
        }
    }
}
