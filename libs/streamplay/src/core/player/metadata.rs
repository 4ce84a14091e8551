// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::core::graph::{tags, Caps, FieldValue, MediaKind, Structure, TagList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MetaDataKey {
    Title,
    Author,
    AlbumTitle,
    Genre,
    Comment,
    Date,
    Language,
    FileFormat,
    Duration,
    Url,
    Resolution,
    VideoFrameRate,
    AudioCodec,
    VideoCodec,
    SubtitleCodec,
    Orientation,
}

impl MetaDataKey {
    /// Key for a tag name, if the tag is one the player surfaces.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            tags::TITLE => MetaDataKey::Title,
            tags::ARTIST => MetaDataKey::Author,
            tags::ALBUM => MetaDataKey::AlbumTitle,
            tags::GENRE => MetaDataKey::Genre,
            tags::COMMENT => MetaDataKey::Comment,
            tags::DATE => MetaDataKey::Date,
            tags::LANGUAGE_CODE => MetaDataKey::Language,
            tags::CONTAINER_FORMAT => MetaDataKey::FileFormat,
            tags::AUDIO_CODEC => MetaDataKey::AudioCodec,
            tags::VIDEO_CODEC => MetaDataKey::VideoCodec,
            tags::SUBTITLE_CODEC => MetaDataKey::SubtitleCodec,
            tags::IMAGE_ORIENTATION => MetaDataKey::Orientation,
            _ => return None,
        })
    }

    fn codec_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => MetaDataKey::VideoCodec,
            MediaKind::Audio => MetaDataKey::AudioCodec,
            MediaKind::Subtitle => MetaDataKey::SubtitleCodec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Double(f64),
    Duration(Duration),
    Size { width: u32, height: u32 },
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Str(s) => MetaValue::Str(s.clone()),
            FieldValue::Double(d) => MetaValue::Double(*d),
            other => match other.as_int() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Str(other.to_string()),
            },
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Str(s) => write!(f, "{}", s),
            MetaValue::Int(i) => write!(f, "{}", i),
            MetaValue::Double(d) => write!(f, "{}", d),
            MetaValue::Duration(d) => write!(f, "{}ms", d.as_millis()),
            MetaValue::Size { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

/// Metadata map, for the whole resource or a single track.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetaData {
    entries: BTreeMap<MetaDataKey, MetaValue>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MetaDataKey) -> Option<&MetaValue> {
        self.entries.get(&key)
    }

    pub fn get_str(&self, key: MetaDataKey) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    /// Returns whether the stored value changed.
    pub fn insert(&mut self, key: MetaDataKey, value: impl Into<MetaValue>) -> bool {
        let value = value.into();
        if self.entries.get(&key) == Some(&value) {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn remove(&mut self, key: MetaDataKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetaDataKey, &MetaValue)> {
        self.entries.iter()
    }

    /// Merge recognised tags. Returns whether anything changed.
    pub fn merge_tags(&mut self, list: &TagList) -> bool {
        let mut changed = false;
        for (tag, value) in list.iter() {
            if let Some(key) = MetaDataKey::from_tag(tag) {
                changed |= self.insert(key, MetaValue::from_field(value));
            }
        }
        changed
    }

    /// Derive the file format and per-kind codecs from a `stream-topology`
    /// structure. Codecs already known are kept.
    pub fn apply_topology(&mut self, topology: &Structure) -> bool {
        let mut changed = false;
        if let Some(container) = topology.get_caps("caps").and_then(Caps::media_type) {
            changed |= self.insert(MetaDataKey::FileFormat, container);
        }
        if let Some(list) = topology.get_tags("tags") {
            changed |= self.merge_tags(list);
        }
        for stream in topology.get_list("next").unwrap_or_default() {
            let FieldValue::Structure(stream) = stream else {
                continue;
            };
            let Some(codec) = stream.get_caps("caps").and_then(Caps::media_type) else {
                continue;
            };
            let kind = if codec.starts_with("video/") {
                MediaKind::Video
            } else if codec.starts_with("audio/") {
                MediaKind::Audio
            } else {
                MediaKind::Subtitle
            };
            let key = MetaDataKey::codec_for(kind);
            if self.get(key).is_none() {
                changed |= self.insert(key, codec);
            }
        }
        changed
    }

    /// Resolution and frame rate from negotiated video caps.
    pub fn apply_video_caps(&mut self, caps: &Caps) -> bool {
        let Some(structure) = caps.first() else {
            return false;
        };
        let mut changed = false;
        if let Some((width, height)) = structure.native_size() {
            changed |= self.insert(MetaDataKey::Resolution, MetaValue::Size { width, height });
        }
        if let Some((n, d)) = structure.get_fraction("framerate") {
            if d != 0 {
                changed |= self.insert(MetaDataKey::VideoFrameRate, MetaValue::Double(n as f64 / d as f64));
            }
        }
        changed
    }

    /// Metadata describing a single track from its pad caps and tags.
    pub fn for_track(kind: MediaKind, caps: Option<&Caps>, list: &TagList) -> Self {
        let mut meta = MetaData::new();
        if let Some(language) = list.get_str(tags::LANGUAGE_CODE) {
            meta.insert(MetaDataKey::Language, language);
        }
        if let Some(title) = list.get_str(tags::TITLE) {
            meta.insert(MetaDataKey::Title, title);
        }
        let codec_tag = match kind {
            MediaKind::Video => tags::VIDEO_CODEC,
            MediaKind::Audio => tags::AUDIO_CODEC,
            MediaKind::Subtitle => tags::SUBTITLE_CODEC,
        };
        if let Some(codec) = list.get_str(codec_tag) {
            meta.insert(MetaDataKey::codec_for(kind), codec);
        }
        if kind == MediaKind::Video {
            if let Some(caps) = caps {
                meta.apply_video_caps(caps);
            }
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_tags_maps_known_keys() {
        let mut meta = MetaData::new();
        let list = TagList::new()
            .with(tags::TITLE, "Song")
            .with(tags::ARTIST, "Band")
            .with("unknown-tag", "ignored");
        assert!(meta.merge_tags(&list));
        assert_eq!(meta.get_str(MetaDataKey::Title), Some("Song"));
        assert_eq!(meta.get_str(MetaDataKey::Author), Some("Band"));
        assert_eq!(meta.len(), 2);
        // same tags again change nothing
        assert!(!meta.merge_tags(&list));
    }

    #[test]
    fn test_topology_sets_format_and_codecs() {
        let topology = Structure::new("stream-topology")
            .with("caps", Caps::from_media_type("video/quicktime"))
            .with(
                "next",
                FieldValue::List(vec![
                    Structure::new("stream")
                        .with("caps", Caps::from_media_type("video/x-h264"))
                        .into(),
                    Structure::new("stream")
                        .with("caps", Caps::from_media_type("audio/mpeg"))
                        .into(),
                ]),
            );
        let mut meta = MetaData::new();
        meta.insert(MetaDataKey::AudioCodec, "audio/x-opus");
        assert!(meta.apply_topology(&topology));
        assert_eq!(meta.get_str(MetaDataKey::FileFormat), Some("video/quicktime"));
        assert_eq!(meta.get_str(MetaDataKey::VideoCodec), Some("video/x-h264"));
        // already known from the active track
        assert_eq!(meta.get_str(MetaDataKey::AudioCodec), Some("audio/x-opus"));
    }

    #[test]
    fn test_video_caps_resolution_and_rate() {
        let caps = Caps::new_simple(
            Structure::new("video/x-raw")
                .with("width", 1920u32)
                .with("height", 1080u32)
                .with("framerate", FieldValue::Fraction(30000, 1001)),
        );
        let mut meta = MetaData::new();
        meta.apply_video_caps(&caps);
        assert_eq!(
            meta.get(MetaDataKey::Resolution),
            Some(&MetaValue::Size { width: 1920, height: 1080 })
        );
        match meta.get(MetaDataKey::VideoFrameRate) {
            Some(MetaValue::Double(rate)) => assert!((rate - 29.97).abs() < 0.01),
            other => panic!("unexpected frame rate {:?}", other),
        }
    }

    #[test]
    fn test_track_metadata() {
        let list = TagList::new()
            .with(tags::LANGUAGE_CODE, "de")
            .with(tags::AUDIO_CODEC, "audio/mpeg");
        let meta = MetaData::for_track(MediaKind::Audio, None, &list);
        assert_eq!(meta.get_str(MetaDataKey::Language), Some("de"));
        assert_eq!(meta.get_str(MetaDataKey::AudioCodec), Some("audio/mpeg"));
    }
}
