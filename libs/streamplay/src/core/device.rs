// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Output devices and the sink branches built for them.
//!
//! Device discovery lives elsewhere; this module only consumes a
//! [`DeviceDescriptor`] plus a desired format and turns them into sink
//! elements.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::graph::{factories, Caps, ElementId, ElementRegistry, FieldValue, Graph, Structure};
use crate::core::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    S16LE,
    S32LE,
    F32LE,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S16LE => write!(f, "S16LE"),
            Self::S32LE => write!(f, "S32LE"),
            Self::F32LE => write!(f, "F32LE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn to_caps(&self) -> Caps {
        Caps::new_simple(
            Structure::new("audio/x-raw")
                .with("format", self.sample_format.to_string())
                .with("rate", self.sample_rate)
                .with("channels", self.channels as u32),
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::F32LE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    I420,
    NV12,
    RGBA,
    BGRA,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I420 => write!(f, "I420"),
            Self::NV12 => write!(f, "NV12"),
            Self::RGBA => write!(f, "RGBA"),
            Self::BGRA => write!(f, "BGRA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Frames per second as numerator/denominator.
    pub framerate: (i32, i32),
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    pub fn to_caps(&self) -> Caps {
        Caps::new_simple(
            Structure::new("video/x-raw")
                .with("format", self.pixel_format.to_string())
                .with("width", self.width)
                .with("height", self.height)
                .with("framerate", FieldValue::Fraction(self.framerate.0, self.framerate.1)),
        )
    }
}

/// Device as reported by the enumeration collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub description: String,
    pub mode: DeviceMode,
    #[serde(default)]
    pub audio_formats: Vec<AudioFormat>,
    #[serde(default)]
    pub video_formats: Vec<VideoFormat>,
}

impl DeviceDescriptor {
    /// System default audio output accepting any format.
    pub fn default_audio_output() -> Self {
        Self {
            id: "default".into(),
            description: "Default audio output".into(),
            mode: DeviceMode::Output,
            audio_formats: Vec::new(),
            video_formats: Vec::new(),
        }
    }

    /// System default video output accepting any format.
    pub fn default_video_output() -> Self {
        Self {
            id: "default".into(),
            description: "Default video output".into(),
            mode: DeviceMode::Output,
            audio_formats: Vec::new(),
            video_formats: Vec::new(),
        }
    }

    /// An empty capability list means the device converts anything.
    pub fn supports_audio(&self, format: &AudioFormat) -> bool {
        self.audio_formats.is_empty() || self.audio_formats.contains(format)
    }

    pub fn supports_video(&self, format: &VideoFormat) -> bool {
        self.video_formats.is_empty() || self.video_formats.contains(format)
    }

    fn require_output(&self) -> Result<()> {
        if self.mode != DeviceMode::Output {
            return Err(StreamError::Configuration(format!(
                "device '{}' is not an output device",
                self.id
            )));
        }
        Ok(())
    }
}

/// Audio sink branch configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioOutput {
    device: DeviceDescriptor,
    format: Option<AudioFormat>,
    volume: f64,
    muted: bool,
}

impl AudioOutput {
    pub fn new(device: DeviceDescriptor) -> Result<Self> {
        device.require_output()?;
        Ok(Self {
            device,
            format: None,
            volume: 1.0,
            muted: false,
        })
    }

    /// Request a fixed format; must be one the device supports.
    pub fn with_format(mut self, format: AudioFormat) -> Result<Self> {
        if !self.device.supports_audio(&format) {
            return Err(StreamError::Configuration(format!(
                "device '{}' does not support {} Hz / {} ch / {}",
                self.device.id, format.sample_rate, format.channels, format.sample_format
            )));
        }
        self.format = Some(format);
        Ok(self)
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    pub(crate) fn build(&self, registry: &ElementRegistry, graph: &mut Graph) -> Result<ElementId> {
        let sink = registry.create(graph, factories::AUDIO_SINK, None)?;
        let element = graph.require_element_mut(sink)?;
        element.set_property("device", self.device.id.as_str())?;
        element.set_property("volume", self.volume)?;
        element.set_property("mute", self.muted)?;
        if let Some(format) = &self.format {
            element.set_property("caps", format.to_caps().to_string())?;
        }
        tracing::debug!("[device] Built audio sink for '{}'", self.device.id);
        Ok(sink)
    }
}

/// Video sink branch configuration, with an optional subtitle overlay sink.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOutput {
    device: DeviceDescriptor,
    format: Option<VideoFormat>,
    subtitles: bool,
}

/// Sink elements built for a [`VideoOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoBranch {
    pub video_sink: ElementId,
    /// `None` when subtitles are disabled or no subtitle sink is available.
    pub subtitle_sink: Option<ElementId>,
}

impl VideoOutput {
    pub fn new(device: DeviceDescriptor) -> Result<Self> {
        device.require_output()?;
        Ok(Self {
            device,
            format: None,
            subtitles: true,
        })
    }

    pub fn with_format(mut self, format: VideoFormat) -> Result<Self> {
        if !self.device.supports_video(&format) {
            return Err(StreamError::Configuration(format!(
                "device '{}' does not support {}x{} {}",
                self.device.id, format.width, format.height, format.pixel_format
            )));
        }
        self.format = Some(format);
        Ok(self)
    }

    pub fn with_subtitles(mut self, enabled: bool) -> Self {
        self.subtitles = enabled;
        self
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn format(&self) -> Option<&VideoFormat> {
        self.format.as_ref()
    }

    pub(crate) fn build(&self, registry: &ElementRegistry, graph: &mut Graph) -> Result<VideoBranch> {
        let video_sink = registry.create(graph, factories::VIDEO_SINK, None)?;
        let element = graph.require_element_mut(video_sink)?;
        element.set_property("device", self.device.id.as_str())?;
        if let Some(format) = &self.format {
            element.set_property("caps", format.to_caps().to_string())?;
        }

        let subtitle_sink = if !self.subtitles {
            None
        } else if registry.has_factory(factories::SUBTITLE_SINK) {
            Some(registry.create(graph, factories::SUBTITLE_SINK, None)?)
        } else {
            tracing::warn!(
                "[device] '{}' is not available, subtitles will not be rendered",
                factories::SUBTITLE_SINK
            );
            None
        };

        tracing::debug!("[device] Built video sink for '{}'", self.device.id);
        Ok(VideoBranch {
            video_sink,
            subtitle_sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            sample_format: SampleFormat::S16LE,
        }
    }

    #[test]
    fn test_input_device_rejected_for_output() {
        let mut device = DeviceDescriptor::default_audio_output();
        device.mode = DeviceMode::Input;
        assert!(AudioOutput::new(device).is_err());
    }

    #[test]
    fn test_format_validated_against_capabilities() {
        let mut device = DeviceDescriptor::default_audio_output();
        device.audio_formats = vec![stereo()];
        let output = AudioOutput::new(device).unwrap();

        let mono = AudioFormat {
            channels: 1,
            ..stereo()
        };
        assert!(output.clone().with_format(mono).is_err());
        let output = output.with_format(stereo()).unwrap();
        assert_eq!(output.format(), Some(&stereo()));
    }

    #[test]
    fn test_audio_sink_properties() {
        let registry = ElementRegistry::with_defaults();
        let mut graph = Graph::new();
        let output = AudioOutput::new(DeviceDescriptor::default_audio_output())
            .unwrap()
            .with_format(stereo())
            .unwrap()
            .with_volume(1.5)
            .with_muted(true);
        let sink = output.build(&registry, &mut graph).unwrap();
        let element = graph.element(sink).unwrap();
        assert_eq!(element.factory(), "audiosink");
        assert_eq!(element.property_str("device").unwrap(), "default");
        assert!(element.property_bool("mute").unwrap());
        assert!(element
            .property_str("caps")
            .unwrap()
            .starts_with("audio/x-raw"));
        assert!(graph.static_pad(sink, "sink").is_some());
    }

    #[test]
    fn test_missing_subtitle_sink_disables_subtitles() {
        let mut registry = ElementRegistry::with_defaults();
        registry.unregister(factories::SUBTITLE_SINK);
        let mut graph = Graph::new();
        let branch = VideoOutput::new(DeviceDescriptor::default_video_output())
            .unwrap()
            .build(&registry, &mut graph)
            .unwrap();
        assert!(branch.subtitle_sink.is_none());
        assert_eq!(graph.element_count(), 1);
    }

    #[test]
    fn test_video_branch_with_subtitles() {
        let registry = ElementRegistry::with_defaults();
        let mut graph = Graph::new();
        let format = VideoFormat {
            width: 1280,
            height: 720,
            framerate: (30, 1),
            pixel_format: PixelFormat::NV12,
        };
        let branch = VideoOutput::new(DeviceDescriptor::default_video_output())
            .unwrap()
            .with_format(format)
            .unwrap()
            .build(&registry, &mut graph)
            .unwrap();
        assert!(branch.subtitle_sink.is_some());
        let caps = graph
            .element(branch.video_sink)
            .unwrap()
            .property_str("caps")
            .unwrap()
            .to_string();
        assert!(caps.contains("width=1280"));
        assert!(caps.contains("framerate=30/1"));
    }
}
