// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::graph::{Caps, ElementId, MediaKind, PadId, Structure, TagList};
use crate::core::pipeline::ElementState;

bitflags! {
    /// Message type tags, combinable into pop masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageType: u32 {
        const EOS = 1 << 0;
        const ERROR = 1 << 1;
        const WARNING = 1 << 2;
        const INFO = 1 << 3;
        const TAG = 1 << 4;
        const BUFFERING = 1 << 5;
        const STATE_CHANGED = 1 << 6;
        const DURATION_CHANGED = 1 << 7;
        const ASYNC_DONE = 1 << 8;
        const SEGMENT_START = 1 << 9;
        const ELEMENT = 1 << 10;
        const LATENCY = 1 << 11;
        const STREAM_START = 1 << 12;
        const PAD_ADDED = 1 << 13;
        const PAD_REMOVED = 1 << 14;
        const NEED_CONTEXT = 1 << 15;
        const APPLICATION = 1 << 16;
        const ANY = u32::MAX;
    }
}

/// Error domain reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Core,
    Library,
    /// Files, devices and network resources.
    Resource,
    /// Container and codec handling.
    Stream,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Library => write!(f, "library"),
            Self::Resource => write!(f, "resource"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Failed,
    NotImplemented,
    // resource
    NotFound,
    Busy,
    OpenRead,
    Read,
    NotAuthorized,
    // stream
    CodecNotFound,
    Decode,
    Demux,
    Format,
    TypeNotFound,
    WrongType,
}

/// Error, warning or info payload posted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub domain: ErrorDomain,
    pub code: ErrorCode,
    pub message: String,
    pub debug: Option<String>,
}

impl EngineError {
    pub fn new(domain: ErrorDomain, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
            debug: None,
        }
    }

    pub fn resource(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Resource, code, message)
    }

    pub fn stream(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Stream, code, message)
    }

    pub fn core(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Core, code, message)
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }

    pub fn matches(&self, domain: ErrorDomain, code: ErrorCode) -> bool {
        self.domain == domain && self.code == code
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{:?})", self.message, self.domain, self.code)
    }
}

/// Shared answer slot for a context request, filled by a sync filter.
#[derive(Debug, Clone, Default)]
pub struct ContextSlot(Arc<Mutex<Option<Structure>>>);

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, context: Structure) {
        *self.0.lock() = Some(context);
    }

    pub fn get(&self) -> Option<Structure> {
        self.0.lock().clone()
    }

    pub fn is_provided(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl PartialEq for ContextSlot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Typed message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageView {
    Eos,
    Error(EngineError),
    Warning(EngineError),
    Info(EngineError),
    Tag(TagList),
    Buffering {
        percent: i32,
    },
    StateChanged {
        old: ElementState,
        current: ElementState,
        pending: ElementState,
    },
    /// Duration must be re-queried.
    DurationChanged,
    AsyncDone,
    SegmentStart {
        position: Duration,
    },
    /// Element-specific structure, e.g. `stream-topology`.
    Element(Structure),
    Latency,
    StreamStart,
    /// A sometimes-pad appeared on the source element.
    PadAdded {
        pad: PadId,
    },
    /// A sometimes-pad was removed. The pad is already gone from the graph,
    /// so its last caps travel with the message.
    PadRemoved {
        pad: PadId,
        kind: Option<MediaKind>,
        caps: Option<Caps>,
    },
    NeedContext {
        context_type: String,
        reply: ContextSlot,
    },
    Application(Structure),
}

impl MessageView {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Eos => MessageType::EOS,
            Self::Error(_) => MessageType::ERROR,
            Self::Warning(_) => MessageType::WARNING,
            Self::Info(_) => MessageType::INFO,
            Self::Tag(_) => MessageType::TAG,
            Self::Buffering { .. } => MessageType::BUFFERING,
            Self::StateChanged { .. } => MessageType::STATE_CHANGED,
            Self::DurationChanged => MessageType::DURATION_CHANGED,
            Self::AsyncDone => MessageType::ASYNC_DONE,
            Self::SegmentStart { .. } => MessageType::SEGMENT_START,
            Self::Element(_) => MessageType::ELEMENT,
            Self::Latency => MessageType::LATENCY,
            Self::StreamStart => MessageType::STREAM_START,
            Self::PadAdded { .. } => MessageType::PAD_ADDED,
            Self::PadRemoved { .. } => MessageType::PAD_REMOVED,
            Self::NeedContext { .. } => MessageType::NEED_CONTEXT,
            Self::Application(_) => MessageType::APPLICATION,
        }
    }
}

/// Identity of the element that posted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSource {
    pub element: ElementId,
    pub name: String,
}

impl MessageSource {
    pub fn new(element: ElementId, name: impl Into<String>) -> Self {
        Self {
            element,
            name: name.into(),
        }
    }
}

#[derive(Debug)]
struct MessageInner {
    seqnum: u64,
    source: MessageSource,
    view: MessageView,
}

/// Immutable message envelope. Cloning shares the payload.
#[derive(Debug, Clone)]
pub struct Message(Arc<MessageInner>);

impl Message {
    pub(crate) fn new(seqnum: u64, source: MessageSource, view: MessageView) -> Self {
        Self(Arc::new(MessageInner {
            seqnum,
            source,
            view,
        }))
    }

    pub fn seqnum(&self) -> u64 {
        self.0.seqnum
    }

    pub fn message_type(&self) -> MessageType {
        self.0.view.message_type()
    }

    pub fn source(&self) -> &MessageSource {
        &self.0.source
    }

    pub fn src(&self) -> ElementId {
        self.0.source.element
    }

    pub fn view(&self) -> &MessageView {
        &self.0.view
    }

    pub fn is(&self, mask: MessageType) -> bool {
        mask.intersects(self.message_type())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:?} from '{}'",
            self.0.seqnum,
            self.message_type(),
            self.0.source.name
        )
    }
}
