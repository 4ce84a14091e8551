// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::pad::PadId;
use crate::core::error::{Result, StreamError};
use crate::core::pipeline::ElementState;

/// Stable identifier of an element inside a [`Graph`](super::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub(crate) u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Typed element property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    Pad(Option<PadId>),
}

impl PropertyValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Pad(_) => "pad",
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Option<PadId>> for PropertyValue {
    fn from(v: Option<PadId>) -> Self {
        Self::Pad(v)
    }
}

/// A processing node in the media graph.
///
/// Properties are typed: once set, a property keeps its type and a write with
/// a different type is rejected.
#[derive(Debug, Clone, Serialize)]
pub struct Element {
    id: ElementId,
    name: String,
    factory: String,
    properties: BTreeMap<String, PropertyValue>,
    pub(crate) pads: Vec<PadId>,
    pub(crate) state: ElementState,
}

impl Element {
    pub(crate) fn new(id: ElementId, name: String, factory: String) -> Self {
        Self {
            id,
            name,
            factory,
            properties: BTreeMap::new(),
            pads: Vec::new(),
            state: ElementState::Null,
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn pads(&self) -> &[PadId] {
        &self.pads
    }

    /// Last state the engine reported for this element.
    pub fn state(&self) -> ElementState {
        self.state
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        if let Some(existing) = self.properties.get(name) {
            if std::mem::discriminant(existing) != std::mem::discriminant(&value) {
                return Err(StreamError::Configuration(format!(
                    "property '{}' on '{}' is {}, got {}",
                    name,
                    self.name,
                    existing.type_name(),
                    value.type_name()
                )));
            }
        }
        self.properties.insert(name.to_string(), value);
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn require(&self, name: &str) -> Result<&PropertyValue> {
        self.properties.get(name).ok_or_else(|| {
            StreamError::Configuration(format!("'{}' has no property '{}'", self.name, name))
        })
    }

    fn mismatch(&self, name: &str, expected: &str, got: &PropertyValue) -> StreamError {
        StreamError::Configuration(format!(
            "property '{}' on '{}' is {}, expected {}",
            name,
            self.name,
            got.type_name(),
            expected
        ))
    }

    pub fn property_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            PropertyValue::Bool(v) => Ok(*v),
            other => Err(self.mismatch(name, "bool", other)),
        }
    }

    pub fn property_int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            PropertyValue::Int(v) => Ok(*v),
            PropertyValue::UInt(v) => i64::try_from(*v)
                .map_err(|_| self.mismatch(name, "int", &PropertyValue::UInt(*v))),
            other => Err(self.mismatch(name, "int", other)),
        }
    }

    pub fn property_str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            PropertyValue::Str(v) => Ok(v),
            other => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn property_pad(&self, name: &str) -> Result<Option<PadId>> {
        match self.require(name)? {
            PropertyValue::Pad(v) => Ok(*v),
            other => Err(self.mismatch(name, "pad", other)),
        }
    }
}
