//! BandFilter — per-channel first-order band filtering.
//!
//! A light stand-in for the heavyweight filter bank of the excluded DSP
//! collaborator: one first-order high-pass at `lower_cutoff` chained into
//! one first-order low-pass at `upper_cutoff`, per channel. With both
//! cutoffs unset the stage passes data through untouched.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::{AttrValue, CHANNEL_LABELS};
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};
use crate::types::SampleBlock;
use std::f64::consts::PI;

const RESET_TRIGGERS: &[&str] = &["lower_cutoff", "upper_cutoff"];
const REINIT_TRIGGERS: &[&str] = &[CHANNEL_LABELS];

/// Filter coefficients derived from the cutoffs and the sampling rate.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    /// High-pass feedback term, from `lower_cutoff`.
    high_alpha: Option<f64>,
    /// Low-pass smoothing term, from `upper_cutoff`.
    low_alpha: Option<f64>,
}

/// Per-channel delay state.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    hp_x: f64,
    hp_y: f64,
    lp_y: f64,
}

/// Band-filtering processor.
pub struct BandFilter {
    lower_cutoff: Option<f64>,
    upper_cutoff: Option<f64>,
    coefficients: Option<Coefficients>,
    state: Vec<ChannelState>,
}

impl BandFilter {
    pub fn new(lower_cutoff: Option<f64>, upper_cutoff: Option<f64>) -> Self {
        Self {
            lower_cutoff,
            upper_cutoff,
            coefficients: None,
            state: Vec::new(),
        }
    }

    pub fn lower_cutoff(&self) -> Option<f64> {
        self.lower_cutoff
    }

    pub fn upper_cutoff(&self) -> Option<f64> {
        self.upper_cutoff
    }

    /// Rebuild coefficients and delay state from the upstream contract.
    fn rebuild(&mut self, ctx: &NodeContext) -> Result<()> {
        let channel_count = ctx.upstream_channel_count()?;
        self.coefficients = if self.lower_cutoff.is_none() && self.upper_cutoff.is_none() {
            None
        } else {
            let sample_rate = ctx.upstream_sample_rate()?;
            let dt = 1.0 / sample_rate;
            let alpha = |cutoff: f64| {
                let rc = 1.0 / (2.0 * PI * cutoff);
                (rc, dt, rc + dt)
            };
            Some(Coefficients {
                high_alpha: self.lower_cutoff.map(|f| {
                    let (rc, _, sum) = alpha(f);
                    rc / sum
                }),
                low_alpha: self.upper_cutoff.map(|f| {
                    let (_, dt, sum) = alpha(f);
                    dt / sum
                }),
            })
        };
        self.state = vec![ChannelState::default(); channel_count];
        Ok(())
    }

    fn apply(&mut self, input: &SampleBlock) -> Result<SampleBlock> {
        if input.channel_count() != self.state.len() {
            return Err(GraphError::ShapeMismatch {
                expected: self.state.len(),
                actual: input.channel_count(),
            });
        }
        let coefficients = match self.coefficients {
            Some(c) => c,
            None => return Ok(input.clone()),
        };

        let mut output = input.clone();
        for ch in 0..input.channel_count() {
            let state = &mut self.state[ch];
            for value in output.row_mut(ch) {
                let mut sample = *value;
                if let Some(alpha) = coefficients.high_alpha {
                    state.hp_y = alpha * (state.hp_y + sample - state.hp_x);
                    state.hp_x = sample;
                    sample = state.hp_y;
                }
                if let Some(alpha) = coefficients.low_alpha {
                    state.lp_y += alpha * (sample - state.lp_y);
                    sample = state.lp_y;
                }
                *value = sample;
            }
        }
        Ok(output)
    }

    fn check_cutoff(&self, key: &str, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(GraphError::InvalidAttribute {
                attribute: key.to_string(),
                message: "must be a non-negative number".to_string(),
            });
        }
        match key {
            "lower_cutoff" => {
                if let Some(upper) = self.upper_cutoff {
                    if value > upper {
                        return Err(GraphError::InvalidAttribute {
                            attribute: key.to_string(),
                            message: format!(
                                "lower cutoff {} cannot exceed upper cutoff {}",
                                value, upper
                            ),
                        });
                    }
                }
            }
            "upper_cutoff" => {
                if let Some(lower) = self.lower_cutoff {
                    if value < lower {
                        return Err(GraphError::InvalidAttribute {
                            attribute: key.to_string(),
                            message: format!(
                                "upper cutoff {} cannot go below lower cutoff {}",
                                value, lower
                            ),
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl NodeBehavior for BandFilter {
    fn name(&self) -> &str {
        "BandFilter"
    }

    fn role(&self) -> Role {
        Role::Processor
    }

    fn reset_triggers(&self) -> &'static [&'static str] {
        RESET_TRIGGERS
    }

    fn reinit_triggers(&self) -> &'static [&'static str] {
        REINIT_TRIGGERS
    }

    /// Only the channel count matters to the filter bank; label renames
    /// alone should not force a rebuild.
    fn reduce_upstream_attr(&self, name: &str, value: AttrValue) -> AttrValue {
        if name == CHANNEL_LABELS {
            if let Some(labels) = value.as_str_list() {
                return AttrValue::Int(labels.len() as i64);
            }
        }
        value
    }

    fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
        let number = |v: &AttrValue| {
            v.as_float().ok_or_else(|| GraphError::InvalidAttribute {
                attribute: key.to_string(),
                message: "expected a number".to_string(),
            })
        };
        match key {
            "lower_cutoff" => {
                let v = number(value)?;
                self.check_cutoff(key, v)?;
                self.lower_cutoff = Some(v);
            }
            "upper_cutoff" => {
                let v = number(value)?;
                self.check_cutoff(key, v)?;
                self.upper_cutoff = Some(v);
            }
            _ => {
                return Err(GraphError::UnknownAttribute {
                    node: self.name().to_string(),
                    attribute: key.to_string(),
                })
            }
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut NodeContext) -> Result<()> {
        self.rebuild(ctx)
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let input = ctx.input.ok_or_else(|| GraphError::Protocol(format!(
            "{}: update hook invoked without input",
            self.name()
        )))?;
        *ctx.output = Some(self.apply(input)?);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        // New cutoffs mean a new filter; outputs do not continue the old ones.
        self.rebuild(ctx)?;
        Ok(true)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        for state in &mut self.state {
            *state = ChannelState::default();
        }
        Ok(())
    }
}
