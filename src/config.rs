//! Pipeline assembly configuration.
//!
//! Serializable description of the default chain, consumed by
//! [`PipelineBuilder`](crate::pipeline::PipelineBuilder). Stages are
//! optional; omitted sections fall back to their defaults, so a minimal
//! config only names the stream descriptor.

use crate::types::StreamInfo;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_feed_capacity() -> usize {
    64
}

fn default_sink_capacity() -> usize {
    256
}

/// Configuration of the default processing chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Descriptor of the incoming stream.
    pub stream: StreamInfo,

    /// Statistics/outlier screening stage.
    #[serde(default)]
    pub channel_screen: Option<ChannelScreenConfig>,

    /// Band filtering stage.
    #[serde(default)]
    pub band_filter: Option<BandFilterConfig>,

    /// Envelope extraction stage.
    #[serde(default)]
    pub envelope: Option<EnvelopeConfig>,

    /// Attach a broadcast output for the rendering collaborator.
    #[serde(default = "default_true")]
    pub broadcast: bool,

    /// Attach an in-memory segment recorder.
    #[serde(default)]
    pub recorder: bool,

    /// How many acquisition blocks may queue between ticks.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// How many sink events may queue before drops are counted.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl PipelineConfig {
    /// A chain with no processors: source straight into the broadcast sink.
    pub fn new(stream: StreamInfo) -> Self {
        Self {
            stream,
            channel_screen: None,
            band_filter: None,
            envelope: None,
            broadcast: true,
            recorder: false,
            feed_capacity: default_feed_capacity(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

/// Band filter stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BandFilterConfig {
    /// High-pass corner in Hz; unset disables the high-pass half.
    #[serde(default)]
    pub lower_cutoff: Option<f64>,
    /// Low-pass corner in Hz; unset disables the low-pass half.
    #[serde(default)]
    pub upper_cutoff: Option<f64>,
}

/// Envelope stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Exponential smoothing factor, strictly between 0 and 1.
    pub factor: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self { factor: 0.9 }
    }
}

/// Channel screening stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelScreenConfig {
    /// Length of the statistics collection window, in seconds.
    pub collect_seconds: f64,
}

impl Default for ChannelScreenConfig {
    fn default() -> Self {
        Self {
            collect_seconds: 60.0,
        }
    }
}
