// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Seek behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeekFlags: u32 {
        /// Discard in-flight data so the seek takes effect immediately.
        const FLUSH = 1 << 0;
        /// Seek to the exact position instead of the nearest keyframe.
        const ACCURATE = 1 << 1;
        const KEY_UNIT = 1 << 2;
        /// Change the rate without flushing. Only honoured by engines that
        /// advertise it.
        const INSTANT_RATE_CHANGE = 1 << 3;
    }
}

/// A seek expressed as a rate and a playback segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub rate: f64,
    pub flags: SeekFlags,
    pub start: Option<Duration>,
    /// `None` plays to the end of the stream.
    pub stop: Option<Duration>,
}

impl SeekRequest {
    /// Segment for playing from `position` at `rate`.
    ///
    /// Forward playback runs from `position` to the end; reverse playback
    /// runs from the beginning up to `position`.
    pub fn segment(position: Duration, rate: f64, flags: SeekFlags) -> Self {
        if rate >= 0.0 {
            Self {
                rate,
                flags,
                start: Some(position),
                stop: None,
            }
        } else {
            Self {
                rate,
                flags,
                start: Some(Duration::ZERO),
                stop: Some(position),
            }
        }
    }

    /// Rate-only change that keeps the current segment.
    pub fn instant_rate(rate: f64) -> Self {
        Self {
            rate,
            flags: SeekFlags::INSTANT_RATE_CHANGE,
            start: None,
            stop: None,
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.flags.contains(SeekFlags::FLUSH)
    }

    pub fn is_instant_rate_change(&self) -> bool {
        self.flags.contains(SeekFlags::INSTANT_RATE_CHANGE)
    }

    /// Position the stream should report right after the seek.
    pub fn target_position(&self) -> Option<Duration> {
        if self.rate >= 0.0 { self.start } else { self.stop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_segment() {
        let s = SeekRequest::segment(Duration::from_secs(3), 1.0, SeekFlags::FLUSH);
        assert_eq!(s.start, Some(Duration::from_secs(3)));
        assert_eq!(s.stop, None);
        assert!(s.is_flushing());
        assert_eq!(s.target_position(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_reverse_segment() {
        let s = SeekRequest::segment(Duration::from_secs(3), -2.0, SeekFlags::FLUSH);
        assert_eq!(s.start, Some(Duration::ZERO));
        assert_eq!(s.stop, Some(Duration::from_secs(3)));
        assert_eq!(s.target_position(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_instant_rate() {
        let s = SeekRequest::instant_rate(2.0);
        assert!(s.is_instant_rate_change());
        assert!(!s.is_flushing());
        assert_eq!(s.target_position(), None);
    }
}
