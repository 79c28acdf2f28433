// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The directory code allocator (§4.5, C5): assigns each artist a short, stable, filesystem-safe
//! code used as the top-level directory in the production tree (`{artist_code}/{artist}/...`).
//!
//! Codes are built from the initials of the artist name's tokens, extended with further letters
//! (consonants preferred) when a single-token name needs padding to reach the minimum length,
//! uppercased, collision-resolved with a numeric suffix, and immutable once allocated (§3
//! invariant: an artist's directory code never changes after first assignment).

use crate::config::DirectoryCodeConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Default minimum code length, used when the config leaves it unset.
const DEFAULT_MIN_LENGTH: usize = 2;
/// Default maximum code length, used when the config leaves it unset.
const DEFAULT_MAX_LENGTH: usize = 10;
/// Default cap on collision-resolution attempts, used when the config leaves it unset.
const DEFAULT_MAX_COLLISION_ATTEMPTS: usize = 99;

/// Raised when a directory code cannot be allocated for an artist (§7 `CollisionError`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not allocate a directory code for {artist:?} after {attempts} attempts")]
pub struct CollisionError {
    /// The artist name the allocator was trying to code.
    pub artist: String,
    /// Number of suffixed attempts made before giving up.
    pub attempts: usize,
}

const VOWELS: &[char] = &['a', 'e', 'i', 'o', 'u', 'y'];

/// Strip a leading article (`the`, `a`, `an`, case-insensitive) and all non-alphabetic characters,
/// lowercasing the rest (§4.5 step 1).
fn clean_tokens(artist: &str) -> Vec<String> {
    let mut tokens: Vec<&str> = artist.split_whitespace().collect();
    if tokens.len() > 1 && matches!(tokens[0].to_ascii_lowercase().as_str(), "the" | "a" | "an") {
        tokens.remove(0);
    }
    tokens
        .into_iter()
        .map(|token| token.chars().filter(|c| c.is_alphabetic()).collect::<String>().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Build the base code (before collision resolution or length normalization) from an artist name
/// (§4.5 steps 1-2): one literal initial per token, then, if that's shorter than `min_length`
/// (most often a single-token name), extended with further letters drawn from the tokens in
/// order, preferring consonants over vowels, until the minimum is reached.
fn base_code(artist: &str, min_length: usize) -> String {
    let tokens = clean_tokens(artist);
    if tokens.is_empty() {
        return "xx".to_owned();
    }

    let initials: String = tokens.iter().filter_map(|token| token.chars().next()).collect();
    if initials.chars().count() >= min_length {
        return initials;
    }

    // Remaining letters available for extension: every token's letters after its own initial,
    // in token order, consonants first then vowels.
    let rest: Vec<char> = tokens.iter().flat_map(|token| token.chars().skip(1)).collect();
    let mut consonants = rest.iter().copied().filter(|c| !VOWELS.contains(c));
    let mut vowels = rest.iter().copied().filter(|c| VOWELS.contains(c));
    let mut code = initials;
    while code.chars().count() < min_length {
        let Some(next) = consonants.next().or_else(|| vowels.next()) else {
            break;
        };
        code.push(next);
    }
    code
}

/// Normalize a base code to the configured length bounds: truncate if too long, pad by repeating
/// the last character if too short.
fn apply_length_bounds(code: &str, min_length: usize, max_length: usize) -> String {
    let mut code: String = code.chars().take(max_length).collect();
    if code.is_empty() {
        code.push('x');
    }
    while code.chars().count() < min_length {
        let last = code.chars().next_back().unwrap_or('x');
        code.push(last);
    }
    code
}

/// Allocate a directory code for `artist`, avoiding any code already present in `existing`.
///
/// On a collision, successive attempts append `-2`, `-3`, ... to the base code. Fails with
/// [`CollisionError`] if no free code is found within the configured attempt cap.
///
/// # Errors
///
/// Returns [`CollisionError`] if every candidate code up to the configured attempt cap is already
/// taken.
pub fn allocate(
    config: &DirectoryCodeConfig,
    artist: &str,
    existing: &HashSet<String>,
) -> Result<String, CollisionError> {
    let min_length = config.min_length.unwrap_or(DEFAULT_MIN_LENGTH);
    let max_length = config.max_length.unwrap_or(DEFAULT_MAX_LENGTH);
    let max_attempts = config.max_collision_attempts.unwrap_or(DEFAULT_MAX_COLLISION_ATTEMPTS);

    let base = apply_length_bounds(&base_code(artist, min_length), min_length, max_length).to_uppercase();
    if !existing.contains(&base) {
        return Ok(base);
    }

    for attempt in 2..=max_attempts {
        let suffix = format!("-{attempt}");
        let truncated_len = max_length.saturating_sub(suffix.chars().count()).max(min_length);
        let truncated: String = base.chars().take(truncated_len).collect();
        let candidate = format!("{truncated}{suffix}");
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(CollisionError {
        artist: artist.to_owned(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DirectoryCodeConfig {
        DirectoryCodeConfig {
            min_length: Some(2),
            max_length: Some(10),
            max_collision_attempts: Some(5),
        }
    }

    #[test]
    fn test_multi_token_artist_uses_initials() {
        let code = allocate(&config(), "Pink Floyd", &HashSet::new()).unwrap();
        assert_eq!(code, "PF");
    }

    #[test]
    fn test_single_token_artist_pads_with_consonants() {
        let code = allocate(&config(), "Anthrax", &HashSet::new()).unwrap();
        assert_eq!(code, "AN");
    }

    #[test]
    fn test_directory_code_collision_scenario() {
        // §8 S6: Abba -> "AB", AC/DC -> "AC", "Ab Baker" -> "AB-2".
        let mut existing = HashSet::new();
        let abba = allocate(&config(), "Abba", &existing).unwrap();
        assert_eq!(abba, "AB");
        existing.insert(abba);

        let acdc = allocate(&config(), "AC/DC", &existing).unwrap();
        assert_eq!(acdc, "AC");
        existing.insert(acdc);

        let ab_baker = allocate(&config(), "Ab Baker", &existing).unwrap();
        assert_eq!(ab_baker, "AB-2");
    }

    #[test]
    fn test_leading_article_is_dropped() {
        let code = allocate(&config(), "The Beatles", &HashSet::new()).unwrap();
        let code_no_article = allocate(&config(), "Beatles", &HashSet::new()).unwrap();
        assert_eq!(code, code_no_article);
    }

    #[test]
    fn test_leading_a_and_an_articles_are_dropped() {
        let code = allocate(&config(), "A Perfect Circle", &HashSet::new()).unwrap();
        assert_eq!(code, "PC");
        let code = allocate(&config(), "An Cafe", &HashSet::new()).unwrap();
        assert_eq!(code, "CF");
    }

    #[test]
    fn test_leading_article_stripping_is_case_insensitive() {
        let code = allocate(&config(), "THE Beatles", &HashSet::new()).unwrap();
        let code_no_article = allocate(&config(), "Beatles", &HashSet::new()).unwrap();
        assert_eq!(code, code_no_article);
    }

    #[test]
    fn test_collision_gets_numeric_suffix() {
        let mut existing = HashSet::new();
        existing.insert("PF".to_owned());
        let code = allocate(&config(), "Pink Floyd", &existing).unwrap();
        assert_eq!(code, "PF-2");
    }

    #[test]
    fn test_collision_exhaustion_errors() {
        let mut existing = HashSet::new();
        existing.insert("PF".to_owned());
        for attempt in 2..=5 {
            existing.insert(format!("PF-{attempt}"));
        }
        let result = allocate(&config(), "Pink Floyd", &existing);
        assert!(result.is_err());
    }

    #[test]
    fn test_min_length_padding() {
        let code = allocate(&config(), "U", &HashSet::new()).unwrap();
        assert!(code.len() >= 2);
    }
}
