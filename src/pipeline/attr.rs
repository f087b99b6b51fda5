//! Attribute values exchanged between nodes and the editing layer.
//!
//! Nodes publish a small set of named attributes for their descendants
//! (channel layout, sampling rate) and accept attribute writes from the
//! parameter-editing collaborator. Both directions use [`AttrValue`], a
//! plain value enum that is cheap to clone and compare — snapshots of
//! upstream attributes are stored and diffed to decide whether an
//! upstream change warrants reinitialization.

use crate::types::StreamInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known attribute keys published by source nodes.
pub const SAMPLE_RATE: &str = "sample_rate";
/// Channel labels in acquisition order.
pub const CHANNEL_LABELS: &str = "channel_labels";
/// Labels of channels marked bad.
pub const BAD_CHANNELS: &str = "bad_channels";

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view: accepts both `Float` and `Int`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::StrList(v) => Some(v),
            _ => None,
        }
    }
}

/// Last-known-good upstream attribute values, captured at initialization.
pub type AttrSnapshot = HashMap<&'static str, AttrValue>;

/// Resolve one of the well-known descriptor attributes from a [`StreamInfo`].
///
/// Source behaviors answer their `attr` lookups with this so that every
/// source publishes the same contract.
pub fn stream_attr(info: &StreamInfo, name: &str) -> Option<AttrValue> {
    match name {
        SAMPLE_RATE => Some(AttrValue::Float(info.sample_rate_hz)),
        CHANNEL_LABELS => Some(AttrValue::StrList(info.labels())),
        BAD_CHANNELS => Some(AttrValue::StrList(info.bad_labels())),
        _ => None,
    }
}
