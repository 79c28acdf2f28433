// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The quality scorer (§4.7, C7): a pure, referentially transparent function ranking a track
//! file's measured audio attributes so the promotion transactor can pick a primary version.

use std::cmp::Ordering;

/// Measured audio attributes of one track file version, as needed to score it.
#[derive(Debug, Clone, Copy)]
pub struct QualityInput {
    /// Lowercase format/extension (`flac`, `alac`, `aac`, `m4a`, `mp3`, ...).
    pub format: &'static str,
    /// Bitrate in kbit/s.
    pub bitrate: Option<u32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Bit depth, for lossless formats.
    pub bit_depth: Option<u32>,
    /// Creation time, as seconds since the Unix epoch, used to break ties.
    pub created_at: i64,
}

/// Returns `true` for formats scored as lossless.
fn is_lossless(format: &str) -> bool {
    matches!(format, "flac" | "alac")
}

/// Base score contributed by the format alone (§4.7 table).
fn format_base(format: &str) -> i64 {
    match format {
        "flac" => 1000,
        "alac" => 900,
        "aac" => 700,
        "m4a" => 700,
        "mp3" => 500,
        _ => 0,
    }
}

/// Bitrate contribution, which differs for lossless vs. lossy formats.
fn bitrate_bonus(format: &str, bitrate: Option<u32>) -> i64 {
    let Some(bitrate) = bitrate else {
        return 0;
    };
    if is_lossless(format) {
        i64::from(bitrate.min(10_000) / 100).min(100)
    } else {
        i64::from(bitrate.min(320)) / 10
    }
}

/// Sample-rate contribution (§4.7 table): highest matching tier only.
fn sample_rate_bonus(sample_rate: Option<u32>) -> i64 {
    match sample_rate {
        Some(rate) if rate >= 96_000 => 50,
        Some(rate) if rate >= 48_000 => 30,
        Some(rate) if rate >= 44_100 => 20,
        _ => 0,
    }
}

/// Bit-depth contribution: +25 for 24-bit-or-deeper lossless.
fn bit_depth_bonus(format: &str, bit_depth: Option<u32>) -> i64 {
    if is_lossless(format) && bit_depth.is_some_and(|depth| depth >= 24) {
        25
    } else {
        0
    }
}

/// Compute the integer quality score for one track version (§4.7). Higher is better.
///
/// Referentially transparent: the same `input` always yields the same score.
#[must_use]
pub fn score(input: &QualityInput) -> i64 {
    format_base(input.format)
        + bitrate_bonus(input.format, input.bitrate)
        + sample_rate_bonus(input.sample_rate)
        + bit_depth_bonus(input.format, input.bit_depth)
}

/// Compare two versions by quality score, breaking ties by earlier creation time (§4.7).
///
/// Returns [`Ordering::Greater`] if `a` should be preferred over `b`.
#[must_use]
pub fn compare(a: &QualityInput, b: &QualityInput) -> Ordering {
    score(a).cmp(&score(b)).then_with(|| b.created_at.cmp(&a.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(format: &'static str, bitrate: Option<u32>, sample_rate: Option<u32>, bit_depth: Option<u32>) -> QualityInput {
        QualityInput {
            format,
            bitrate,
            sample_rate,
            bit_depth,
            created_at: 0,
        }
    }

    #[test]
    fn test_lossless_beats_lossy() {
        let flac = input("flac", Some(1000), Some(44_100), Some(16));
        let mp3 = input("mp3", Some(320), Some(44_100), None);
        assert!(score(&flac) > score(&mp3));
    }

    #[test]
    fn test_higher_bitrate_lossy_wins() {
        let high = input("mp3", Some(320), None, None);
        let low = input("mp3", Some(128), None, None);
        assert!(score(&high) > score(&low));
    }

    #[test]
    fn test_hi_res_bonus_applies() {
        let hires = input("flac", Some(2000), Some(96_000), Some(24));
        let cd = input("flac", Some(2000), Some(44_100), Some(16));
        assert!(score(&hires) > score(&cd));
    }

    #[test]
    fn test_quality_dominance() {
        // §8 property 7: if A strictly dominates B on every dimension, score(A) > score(B).
        let a = input("flac", Some(2000), Some(96_000), Some(24));
        let b = input("flac", Some(1000), Some(44_100), Some(16));
        assert!(score(&a) > score(&b));
    }

    #[test]
    fn test_tie_break_prefers_earlier_creation_time() {
        let earlier = QualityInput {
            format: "flac",
            bitrate: Some(1000),
            sample_rate: Some(44_100),
            bit_depth: Some(16),
            created_at: 100,
        };
        let later = QualityInput {
            created_at: 200,
            ..earlier
        };
        assert_eq!(compare(&earlier, &later), Ordering::Greater);
    }

    #[test]
    fn test_unknown_format_scores_zero_base() {
        let unknown = input("ogg", None, None, None);
        assert_eq!(format_base(unknown.format), 0);
    }
}
