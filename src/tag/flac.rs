// Copyright (c) 2022 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for FLAC tags.

#![cfg(feature = "flac")]

use crate::tag::{Tag, TagKey, TagType};
use std::path::Path;

/// FLAC tag.
pub struct FlacTag {
    /// The underlying tag data.
    data: metaflac::Tag,
}

impl FlacTag {
    /// Read the FLAC tag from the path
    pub fn read_from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let data = metaflac::Tag::read_from_path(path)?;
        Ok(FlacTag { data })
    }

    /// Get the vorbis key name for a tag key.
    fn tag_key_to_frame(key: &TagKey) -> Option<&'static str> {
        match key {
            TagKey::Album => "ALBUM".into(),
            TagKey::AlbumArtist => "ALBUMARTIST".into(),
            TagKey::Artist => "ARTIST".into(),
            TagKey::DiscNumber => "DISCNUMBER".into(),
            TagKey::Genre => "GENRE".into(),
            TagKey::Isrc => "ISRC".into(),
            TagKey::MusicBrainzArtistId => "MUSICBRAINZ_ARTISTID".into(),
            TagKey::ReleaseDate => "DATE".into(),
            TagKey::ReleaseYear => None,
            TagKey::TrackNumber => "TRACKNUMBER".into(),
            TagKey::TrackTitle => "TITLE".into(),
        }
    }
}

impl Tag for FlacTag {
    fn tag_type(&self) -> TagType {
        TagType::Flac
    }

    fn get(&self, key: &TagKey) -> Option<&str> {
        Self::tag_key_to_frame(key)
            .and_then(|key| self.data.get_vorbis(key))
            .and_then(|mut iterator| iterator.next())
    }
}
