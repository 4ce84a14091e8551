// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capability sets, structures and tag lists carried by pads and messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known tag names.
pub mod tags {
    pub const TITLE: &str = "title";
    pub const ARTIST: &str = "artist";
    pub const ALBUM: &str = "album";
    pub const GENRE: &str = "genre";
    pub const COMMENT: &str = "comment";
    pub const DATE: &str = "date";
    pub const LANGUAGE_CODE: &str = "language-code";
    pub const AUDIO_CODEC: &str = "audio-codec";
    pub const VIDEO_CODEC: &str = "video-codec";
    pub const SUBTITLE_CODEC: &str = "subtitle-codec";
    pub const CONTAINER_FORMAT: &str = "container-format";
    pub const BITRATE: &str = "bitrate";
    pub const IMAGE_ORIENTATION: &str = "image-orientation";
}

/// Media kind of a stream, derived from the negotiated caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle];

    pub fn index(self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Subtitle => 2,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// Typed value stored in a [`Structure`] field or a [`TagList`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    Fraction(i32, i32),
    List(Vec<FieldValue>),
    Structure(Box<Structure>),
    Caps(Box<Caps>),
    Tags(TagList),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Structure> for FieldValue {
    fn from(v: Structure) -> Self {
        Self::Structure(Box::new(v))
    }
}

impl From<Caps> for FieldValue {
    fn from(v: Caps) -> Self {
        Self::Caps(Box::new(v))
    }
}

impl From<TagList> for FieldValue {
    fn from(v: TagList) -> Self {
        Self::Tags(v)
    }
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_fraction(&self) -> Option<(i32, i32)> {
        match self {
            Self::Fraction(n, d) => Some((*n, *d)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
            Self::Fraction(n, d) => write!(f, "{}/{}", n, d),
            Self::List(items) => {
                write!(f, "{{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, " }}")
            }
            Self::Structure(s) => write!(f, "({})", s),
            Self::Caps(c) => write!(f, "({})", c),
            Self::Tags(t) => write!(f, "{:?}", t),
        }
    }
}

/// A named set of typed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Structure {
    name: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_name_prefix(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_int)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn get_fraction(&self, field: &str) -> Option<(i32, i32)> {
        self.get(field).and_then(FieldValue::as_fraction)
    }

    pub fn get_structure(&self, field: &str) -> Option<&Structure> {
        match self.get(field) {
            Some(FieldValue::Structure(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_list(&self, field: &str) -> Option<&[FieldValue]> {
        match self.get(field) {
            Some(FieldValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn get_caps(&self, field: &str) -> Option<&Caps> {
        match self.get(field) {
            Some(FieldValue::Caps(c)) => Some(c),
            _ => None,
        }
    }

    pub fn get_tags(&self, field: &str) -> Option<&TagList> {
        match self.get(field) {
            Some(FieldValue::Tags(t)) => Some(t),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Display size in pixels, corrected by the pixel aspect ratio if present.
    pub fn native_size(&self) -> Option<(u32, u32)> {
        let width = self.get_int("width")?;
        let height = self.get_int("height")?;
        if width <= 0 || height <= 0 {
            return None;
        }
        let (par_n, par_d) = self.get_fraction("pixel-aspect-ratio").unwrap_or((1, 1));
        let width = if par_d > 0 && par_n > 0 {
            width * par_n as i64 / par_d as i64
        } else {
            width
        };
        Some((width as u32, height as u32))
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.fields {
            write!(f, ", {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Negotiated format capabilities of a pad.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caps {
    structures: Vec<Structure>,
}

impl Caps {
    pub fn new_simple(structure: Structure) -> Self {
        Self {
            structures: vec![structure],
        }
    }

    pub fn new_empty() -> Self {
        Self {
            structures: Vec::new(),
        }
    }

    /// Caps with a single structure named `media_type` and no fields.
    pub fn from_media_type(media_type: impl Into<String>) -> Self {
        Self::new_simple(Structure::new(media_type))
    }

    pub fn append(&mut self, structure: Structure) {
        self.structures.push(structure);
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn size(&self) -> usize {
        self.structures.len()
    }

    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures.get(index)
    }

    pub fn first(&self) -> Option<&Structure> {
        self.structures.first()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.first().map(Structure::name)
    }

    /// Classify raw decoded caps into a track kind.
    pub fn media_kind(&self) -> Option<MediaKind> {
        let name = self.media_type()?;
        if name.starts_with("video/x-raw") {
            Some(MediaKind::Video)
        } else if name.starts_with("audio/x-raw") {
            Some(MediaKind::Audio)
        } else if name.starts_with("text/") {
            Some(MediaKind::Subtitle)
        } else {
            None
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.structures.is_empty() {
            return write!(f, "EMPTY");
        }
        for (i, s) in self.structures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", s)?;
        }
        Ok(())
    }
}

/// Stream or global tags (title, language, codec names, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagList {
    tags: BTreeMap<String, FieldValue>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(tag, value);
        self
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: impl Into<FieldValue>) {
        self.tags.insert(tag.into(), value.into());
    }

    pub fn get(&self, tag: &str) -> Option<&FieldValue> {
        self.tags.get(tag)
    }

    pub fn get_str(&self, tag: &str) -> Option<&str> {
        self.get(tag).and_then(FieldValue::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Merge `other` into `self`, replacing existing values.
    pub fn merge(&mut self, other: &TagList) {
        for (k, v) in &other.tags {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_classification() {
        assert_eq!(
            Caps::from_media_type("video/x-raw").media_kind(),
            Some(MediaKind::Video)
        );
        assert_eq!(
            Caps::from_media_type("audio/x-raw(memory:GLMemory)").media_kind(),
            Some(MediaKind::Audio)
        );
        assert_eq!(
            Caps::from_media_type("text/x-raw").media_kind(),
            Some(MediaKind::Subtitle)
        );
        assert_eq!(Caps::from_media_type("audio/mpeg").media_kind(), None);
        assert_eq!(Caps::new_empty().media_kind(), None);
    }

    #[test]
    fn test_native_size_applies_pixel_aspect_ratio() {
        let s = Structure::new("video/x-raw")
            .with("width", 720)
            .with("height", 576)
            .with("pixel-aspect-ratio", FieldValue::Fraction(16, 15));
        assert_eq!(s.native_size(), Some((768, 576)));

        let square = Structure::new("video/x-raw")
            .with("width", 640)
            .with("height", 480);
        assert_eq!(square.native_size(), Some((640, 480)));

        assert_eq!(Structure::new("video/x-raw").native_size(), None);
    }

    #[test]
    fn test_tag_merge_replaces_existing() {
        let mut a = TagList::new().with(tags::TITLE, "old").with(tags::ARTIST, "x");
        let b = TagList::new().with(tags::TITLE, "new");
        a.merge(&b);
        assert_eq!(a.get_str(tags::TITLE), Some("new"));
        assert_eq!(a.get_str(tags::ARTIST), Some("x"));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_caps_display() {
        let caps = Caps::new_simple(Structure::new("audio/x-raw").with("channels", 2));
        assert_eq!(caps.to_string(), "audio/x-raw, channels=2");
        assert_eq!(Caps::new_empty().to_string(), "EMPTY");
    }
}
