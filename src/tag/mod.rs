// Copyright (c) 2022 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Tags and tag-related functions.

#[cfg(feature = "flac")]
mod flac;
#[cfg(feature = "id3")]
mod id3;

use std::path::Path;

/// A tag key describes the kind of information in a generic, format-independent way.
///
/// Only the keys the ingestion core actually reads are kept; the original tagging tool this
/// crate grew from recognized many more (credits, sort orders, ReplayGain, MusicBrainz IDs for
/// every entity), none of which the extraction step in §4.1 consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKey {
    /// Title of the release.
    Album,
    /// Artist(s) primarily credited on the release.
    AlbumArtist,
    /// Track Artist Name(s).
    Artist,
    /// Number of the disc in this release that contains this track.
    DiscNumber,
    /// Genre Name(s) of the track.
    Genre,
    /// International Standard Recording Code.
    Isrc,
    /// Track Artist's MusicBrainz Identifier, used only as an optional sidecar hint.
    MusicBrainzArtistId,
    /// Release Date (YYYY-MM-DD) - the date that the release was issued.
    ReleaseDate,
    /// Release Year (YYYY) - the year that the release was issued.
    ReleaseYear,
    /// Track number on the disc.
    TrackNumber,
    /// Track Title.
    TrackTitle,
}

/// The tag type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    /// ID3v2.2 tag
    ID3v22,
    /// ID3v2.3 tag
    ID3v23,
    /// ID3v2.3 tag
    ID3v24,
    /// Vorbis tag from a FLAC file
    Flac,
}

/// A tag tag can be used for reading.
pub trait Tag {
    /// Get the tag type.
    fn tag_type(&self) -> TagType;
    /// Get the string value for the tag key.
    fn get(&self, key: &TagKey) -> Option<&str>;
}

/// A tagged file that contains zero or more tags.
pub struct TaggedFile {
    /// Tags that are present in the file.
    content: Vec<Box<dyn Tag>>,
}

impl TaggedFile {
    /// Creates a [`TaggedFile`] from the path.
    pub fn read_from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        path.as_ref()
            .extension()
            .map(std::ffi::OsStr::to_ascii_lowercase)
            .ok_or(crate::ErrorType::UnknownFileType)
            .and_then(|extension| {
                extension
                    .to_str()
                    .ok_or(crate::ErrorType::UnknownFileType)
                    .map(|ext| match ext {
                        #[cfg(feature = "id3")]
                        "mp3" => self::id3::ID3v2Tag::read_from_path(&path)
                            .map(Box::new)
                            .map(|tag| Box::<dyn Tag>::from(tag))
                            .map(|tag| vec![tag]),
                        #[cfg(feature = "flac")]
                        "flac" => self::flac::FlacTag::read_from_path(&path)
                            .map(Box::new)
                            .map(|tag| Box::<dyn Tag>::from(tag))
                            .map(|tag| vec![tag]),
                        ext => {
                            log::debug!("Unknown file extension {:?}", ext);
                            Err(crate::ErrorType::UnknownFileType)
                        }
                    })?
            })
            .map(|content| Self { content })
    }

    /// Returns zero or more [`Tag`] objects.
    pub fn tags(&self) -> &[Box<dyn Tag>] {
        &self.content
    }

    /// Look up a tag key across every tag source in this file, returning the first match.
    #[must_use]
    pub fn find(&self, key: TagKey) -> Option<&str> {
        self.content.iter().find_map(|tag| tag.get(&key))
    }
}
