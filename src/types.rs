//! Core data types for cortexflow.
//!
//! This module contains the fundamental data structures shared by every
//! pipeline stage:
//!
//! - [`StreamInfo`] - Channel/sampling descriptor a source must publish
//! - [`ChannelInfo`] / [`ChannelKind`] - Per-channel metadata
//! - [`SampleBlock`] - Owned 2-D buffer of samples, channels × time
//!
//! # Axis convention
//!
//! Blocks are laid out channels × samples, row-major. Axis 0 is channels,
//! axis [`TIME_AXIS`] is time. The convention is fixed crate-wide; every
//! stage and every collaborator feeding or reading blocks uses it.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};

/// The time axis of a [`SampleBlock`]. Axis 0 is channels.
pub const TIME_AXIS: usize = 1;

/// Kind of a recorded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChannelKind {
    /// EEG electrode.
    #[default]
    Eeg,
    /// Gradiometer (MEG).
    Grad,
    /// Magnetometer (MEG).
    Mag,
    /// Auxiliary channel (stimulus, EOG, ...). Not a signal channel.
    Misc,
}

impl ChannelKind {
    /// Whether this kind carries neural signal (as opposed to auxiliary data).
    pub fn is_signal(self) -> bool {
        matches!(self, ChannelKind::Eeg | ChannelKind::Grad | ChannelKind::Mag)
    }
}

/// Metadata for a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel label, unique within a stream.
    pub label: String,
    /// Channel kind.
    pub kind: ChannelKind,
    /// Marked bad by the acquisition layer or a screening stage.
    pub bad: bool,
}

impl ChannelInfo {
    pub fn new(label: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            label: label.into(),
            kind,
            bad: false,
        }
    }
}

/// Channel/sampling descriptor published by a source node.
///
/// Every downstream node is allowed to assume its source published a
/// descriptor that passed [`StreamInfo::validate`]; the engine enforces
/// this at source initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Channels in acquisition order.
    pub channels: Vec<ChannelInfo>,
    /// Sampling rate in Hz.
    pub sample_rate_hz: f64,
}

impl StreamInfo {
    pub fn new(channels: Vec<ChannelInfo>, sample_rate_hz: f64) -> Self {
        Self {
            channels,
            sample_rate_hz,
        }
    }

    /// Build a descriptor of `count` EEG channels labelled `ch0..chN`.
    pub fn eeg(count: usize, sample_rate_hz: f64) -> Self {
        let channels = (0..count)
            .map(|i| ChannelInfo::new(format!("ch{}", i), ChannelKind::Eeg))
            .collect();
        Self::new(channels, sample_rate_hz)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel labels in order.
    pub fn labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.label.clone()).collect()
    }

    /// Labels of channels currently marked bad.
    pub fn bad_labels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.bad)
            .map(|c| c.label.clone())
            .collect()
    }

    /// Check internal consistency. Returns a human-readable reason on failure.
    ///
    /// A valid descriptor has at least one channel, at least one *signal*
    /// channel, a positive finite sample rate, and unique labels.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.channels.is_empty() {
            return Err("descriptor has 0 channels".into());
        }
        if !self.channels.iter().any(|c| c.kind.is_signal()) {
            return Err("descriptor has no EEG/grad/mag channels".into());
        }
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for ch in &self.channels {
            if !seen.insert(ch.label.as_str()) {
                return Err(format!("duplicate channel label `{}`", ch.label));
            }
        }
        Ok(())
    }
}

/// Owned 2-D buffer of samples, channels × time, row-major.
///
/// The primary data transfer unit between stages. A node overwrites its
/// output block every update; listeners read it through the graph and must
/// not hold on to its contents across ticks.
#[derive(Clone, PartialEq)]
pub struct SampleBlock {
    channels: usize,
    samples: usize,
    data: Vec<f64>,
}

impl SampleBlock {
    /// A `channels` × `samples` block of zeros.
    pub fn zeros(channels: usize, samples: usize) -> Self {
        Self {
            channels,
            samples,
            data: vec![0.0; channels * samples],
        }
    }

    /// Build a block from per-channel rows. All rows must have equal length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let samples = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != samples) {
            return Err(GraphError::ShapeMismatch {
                expected: samples,
                actual: rows.iter().map(|r| r.len()).find(|&l| l != samples).unwrap_or(0),
            });
        }
        let mut data = Vec::with_capacity(rows.len() * samples);
        for row in rows {
            data.extend_from_slice(row);
        }
        Ok(Self {
            channels: rows.len(),
            samples,
            data,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    /// A block with no samples (or no channels) carries no data this tick.
    pub fn is_empty(&self) -> bool {
        self.samples == 0 || self.channels == 0
    }

    /// One channel's samples.
    #[inline]
    pub fn row(&self, channel: usize) -> &[f64] {
        let start = channel * self.samples;
        &self.data[start..start + self.samples]
    }

    /// One channel's samples, mutably.
    #[inline]
    pub fn row_mut(&mut self, channel: usize) -> &mut [f64] {
        let start = channel * self.samples;
        &mut self.data[start..start + self.samples]
    }

    #[inline]
    pub fn get(&self, channel: usize, sample: usize) -> Option<f64> {
        if channel < self.channels && sample < self.samples {
            Some(self.data[channel * self.samples + sample])
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, channel: usize, sample: usize, value: f64) {
        debug_assert!(channel < self.channels && sample < self.samples);
        self.data[channel * self.samples + sample] = value;
    }

    /// Raw data, channel-major.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Append `other`'s samples after this block's, along the time axis.
    pub fn append_samples(&mut self, other: &SampleBlock) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if other.channels != self.channels {
            return Err(GraphError::ShapeMismatch {
                expected: self.channels,
                actual: other.channels,
            });
        }
        let total = self.samples + other.samples;
        let mut data = Vec::with_capacity(self.channels * total);
        for ch in 0..self.channels {
            data.extend_from_slice(self.row(ch));
            data.extend_from_slice(other.row(ch));
        }
        self.samples = total;
        self.data = data;
        Ok(())
    }

    /// Apply `f` to every sample in place.
    pub fn map_inplace(&mut self, f: impl Fn(f64) -> f64) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }
}

impl std::fmt::Debug for SampleBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBlock")
            .field("channels", &self.channels)
            .field("samples", &self.samples)
            .finish()
    }
}
