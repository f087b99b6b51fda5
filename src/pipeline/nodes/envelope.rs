//! EnvelopeFollower — amplitude envelope per channel.
//!
//! Rectifies the signal and smooths it with a per-channel exponential
//! follower. `factor` close to 1 gives a slow, heavily smoothed envelope.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::{AttrValue, CHANNEL_LABELS};
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};

const RESET_TRIGGERS: &[&str] = &["factor", "method"];
const REINIT_TRIGGERS: &[&str] = &[CHANNEL_LABELS];

/// Smoothing methods this stage supports.
pub const SUPPORTED_METHODS: &[&str] = &["exponential"];

/// Envelope-extracting processor.
pub struct EnvelopeFollower {
    factor: f64,
    method: String,
    envelope: Vec<f64>,
}

impl EnvelopeFollower {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            method: "exponential".to_string(),
            envelope: Vec::new(),
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl NodeBehavior for EnvelopeFollower {
    fn name(&self) -> &str {
        "EnvelopeFollower"
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

    fn reduce_upstream_attr(&self, name: &str, value: AttrValue) -> AttrValue {
        if name == CHANNEL_LABELS {
            if let Some(labels) = value.as_str_list() {
                return AttrValue::Int(labels.len() as i64);
            }
        }
        value
    }

    fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
        match key {
            "factor" => {
                let v = value.as_float().ok_or_else(|| GraphError::InvalidAttribute {
                    attribute: key.to_string(),
                    message: "expected a number".to_string(),
                })?;
                if !(0.0..1.0).contains(&v) || v == 0.0 {
                    return Err(GraphError::InvalidAttribute {
                        attribute: key.to_string(),
                        message: format!("factor must be strictly between 0 and 1, got {}", v),
                    });
                }
                self.factor = v;
            }
            "method" => {
                let v = value.as_str().ok_or_else(|| GraphError::InvalidAttribute {
                    attribute: key.to_string(),
                    message: "expected a string".to_string(),
                })?;
                if !SUPPORTED_METHODS.contains(&v) {
                    return Err(GraphError::InvalidAttribute {
                        attribute: key.to_string(),
                        message: format!(
                            "method `{}` is not supported, use one of: {}",
                            v,
                            SUPPORTED_METHODS.join(", ")
                        ),
                    });
                }
                self.method = v.to_string();
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
        let channel_count = ctx.upstream_channel_count()?;
        self.envelope = vec![0.0; channel_count];
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let input = ctx.input.ok_or_else(|| GraphError::Protocol(format!(
            "{}: update hook invoked without input",
            self.name()
        )))?;
        if input.channel_count() != self.envelope.len() {
            return Err(GraphError::ShapeMismatch {
                expected: self.envelope.len(),
                actual: input.channel_count(),
            });
        }

        let mut output = input.clone();
        for ch in 0..output.channel_count() {
            let mut env = self.envelope[ch];
            for value in output.row_mut(ch) {
                env = self.factor * env + (1.0 - self.factor) * value.abs();
                *value = env;
            }
            self.envelope[ch] = env;
        }
        *ctx.output = Some(output);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        self.initialize(ctx)?;
        Ok(true)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        for env in &mut self.envelope {
            *env = 0.0;
        }
        Ok(())
    }
}
