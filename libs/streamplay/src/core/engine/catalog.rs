// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Media known to the simulated engine, loadable from TOML.
//!
//! ```toml
//! [[media]]
//! uri = "file:///media/clip.mp4"
//! duration_ms = 5000
//! container = "video/quicktime"
//! tags = { title = "Clip" }
//!
//! [[media.streams]]
//! kind = "video"
//! codec = "video/x-h264"
//! width = 1280
//! height = 720
//! framerate = [30, 1]
//!
//! [[media.streams]]
//! kind = "audio"
//! codec = "audio/mpeg"
//! language = "en"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::core::graph::{tags, Caps, FieldValue, MediaKind, Structure, TagList};
use crate::core::{Result, StreamError};

fn default_true() -> bool {
    true
}

/// One elementary stream inside a media resource.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamDescription {
    pub kind: MediaKind,
    /// Encoded media type, e.g. `audio/mpeg` or `video/x-h264`.
    pub codec: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub framerate: Option<(i32, i32)>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub rate: Option<u32>,
    /// `false` makes preroll fail with a missing-codec error.
    #[serde(default = "default_true")]
    pub supported: bool,
}

impl StreamDescription {
    pub fn new(kind: MediaKind, codec: &str) -> Self {
        Self {
            kind,
            codec: codec.to_string(),
            language: None,
            title: None,
            width: None,
            height: None,
            framerate: None,
            channels: None,
            rate: None,
            supported: true,
        }
    }

    pub fn audio(codec: &str) -> Self {
        Self {
            channels: Some(2),
            rate: Some(44_100),
            ..Self::new(MediaKind::Audio, codec)
        }
    }

    pub fn video(codec: &str, width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            framerate: Some((25, 1)),
            ..Self::new(MediaKind::Video, codec)
        }
    }

    pub fn subtitle(codec: &str) -> Self {
        Self::new(MediaKind::Subtitle, codec)
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    fn add_format_fields(&self, mut s: Structure) -> Structure {
        if let Some(w) = self.width {
            s.set("width", w);
        }
        if let Some(h) = self.height {
            s.set("height", h);
        }
        if let Some((n, d)) = self.framerate {
            s.set("framerate", FieldValue::Fraction(n, d));
        }
        if let Some(c) = self.channels {
            s.set("channels", c);
        }
        if let Some(r) = self.rate {
            s.set("rate", r);
        }
        s
    }

    /// Caps of the encoded stream, as they appear in the stream topology.
    pub fn encoded_caps(&self) -> Caps {
        Caps::new_simple(self.add_format_fields(Structure::new(self.codec.clone())))
    }

    /// Caps of the decoded output pad.
    pub fn raw_caps(&self) -> Caps {
        let s = match self.kind {
            MediaKind::Video => Structure::new("video/x-raw").with("format", "I420"),
            MediaKind::Audio => Structure::new("audio/x-raw").with("format", "F32LE"),
            MediaKind::Subtitle => Structure::new("text/x-raw").with("format", "utf8"),
        };
        Caps::new_simple(self.add_format_fields(s))
    }

    /// Per-stream tags carried by the decoded pad.
    pub fn tags(&self) -> TagList {
        let codec_tag = match self.kind {
            MediaKind::Video => tags::VIDEO_CODEC,
            MediaKind::Audio => tags::AUDIO_CODEC,
            MediaKind::Subtitle => tags::SUBTITLE_CODEC,
        };
        let mut list = TagList::new().with(codec_tag, self.codec.as_str());
        if let Some(language) = &self.language {
            list.insert(tags::LANGUAGE_CODE, language.as_str());
        }
        if let Some(title) = &self.title {
            list.insert(tags::TITLE, title.as_str());
        }
        list
    }
}

/// A playable resource.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaDescription {
    pub uri: String,
    /// `None` for live sources.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub seekable: bool,
    /// Container media type, e.g. `video/quicktime`.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

impl MediaDescription {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            duration_ms: None,
            seekable: true,
            container: None,
            tags: BTreeMap::new(),
            streams: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_container(mut self, container: &str) -> Self {
        self.container = Some(container.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str, value: &str) -> Self {
        self.tags.insert(tag.to_string(), value.to_string());
        self
    }

    pub fn with_stream(mut self, stream: StreamDescription) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn not_seekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    pub fn is_network(&self) -> bool {
        ["http://", "https://", "rtsp://"]
            .iter()
            .any(|scheme| self.uri.starts_with(scheme))
    }

    pub fn global_tags(&self) -> TagList {
        let mut list = TagList::new();
        for (k, v) in &self.tags {
            list.insert(k.as_str(), v.as_str());
        }
        if let Some(container) = &self.container {
            list.insert(tags::CONTAINER_FORMAT, container.as_str());
        }
        list
    }

    /// The `stream-topology` structure posted while prerolling.
    pub fn topology(&self) -> Structure {
        let next: Vec<FieldValue> = self
            .streams
            .iter()
            .map(|s| FieldValue::from(Structure::new("stream").with("caps", s.encoded_caps())))
            .collect();
        let container = self.container.as_deref().unwrap_or("application/octet-stream");
        Structure::new("stream-topology")
            .with("caps", Caps::from_media_type(container))
            .with("tags", self.global_tags())
            .with("next", FieldValue::List(next))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaCatalog {
    #[serde(default)]
    media: Vec<MediaDescription>,
}

impl MediaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| StreamError::Configuration(format!("Failed to parse media catalog: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_toml_str(&content)?;
        tracing::info!(
            "[engine] Loaded {} media entries from {}",
            catalog.media.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn with(mut self, media: MediaDescription) -> Self {
        self.insert(media);
        self
    }

    /// Insert or replace the entry for `media.uri`.
    pub fn insert(&mut self, media: MediaDescription) {
        self.media.retain(|m| m.uri != media.uri);
        self.media.push(media);
    }

    pub fn get(&self, uri: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.uri == uri)
    }

    pub fn len(&self) -> usize {
        self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaDescription> {
        self.media.iter()
    }
}
