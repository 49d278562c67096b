//! # Pipeline configuration

use crate::detection::SENSITIVITY_DOMAIN;
use crate::frame::UNCHANGED_SAMPLE_STRIDE;
use crate::prelude::v1::*;
use std::time::Duration;

/// Tunable knobs of the whole pipeline.
///
/// All values are plain numbers supplied at construction. Changing them afterwards goes
/// through [`Pipeline::reconfigure`](crate::pipeline::Pipeline::reconfigure) or the
/// [`Properties`] interface.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Half-width of each flow sampling window, in pixels.
    pub step: usize,
    /// Size of a visual grid cell.
    pub cell_spacing: f32,
    /// Amplification of motion fed into cell offsets.
    pub sensitivity: f32,
    /// Per-frame shrink factor of cell offsets.
    pub decay: f32,
    /// Motion event sensitivity, in `[1; 100]` range.
    pub event_sensitivity: f32,
    /// Minimum time between two motion events, in seconds.
    pub cooldown: f32,
    /// Threshold multiplier at the highest event sensitivity.
    pub threshold_min: f32,
    /// Threshold multiplier at the lowest event sensitivity.
    pub threshold_max: f32,
    /// Byte stride of the unchanged frame check.
    pub unchanged_stride: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step: 8,
            cell_spacing: 40.0,
            sensitivity: 1.8,
            decay: 0.8,
            event_sensitivity: 50.0,
            cooldown: 1.0,
            threshold_min: 0.001,
            threshold_max: 0.01,
            unchanged_stride: UNCHANGED_SAMPLE_STRIDE,
        }
    }
}

impl PipelineConfig {
    /// Check that every knob is within its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(anyhow!("Window step must be non-zero"));
        }

        if !(self.cell_spacing.is_finite() && self.cell_spacing > 0.0) {
            return Err(anyhow!("Invalid cell spacing {}", self.cell_spacing));
        }

        if !self.sensitivity.is_finite() {
            return Err(anyhow!("Invalid sensitivity {}", self.sensitivity));
        }

        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(anyhow!("Decay must be in (0; 1) range, got {}", self.decay));
        }

        if !(SENSITIVITY_DOMAIN.0..=SENSITIVITY_DOMAIN.1).contains(&self.event_sensitivity) {
            return Err(anyhow!(
                "Event sensitivity {} is outside [1; 100]",
                self.event_sensitivity
            ));
        }

        if !(self.cooldown.is_finite() && self.cooldown >= 0.0) {
            return Err(anyhow!("Invalid cooldown {}", self.cooldown));
        }

        if !(self.threshold_min.is_finite()
            && self.threshold_max.is_finite()
            && self.threshold_min <= self.threshold_max)
        {
            return Err(anyhow!(
                "Invalid threshold range [{}; {}]",
                self.threshold_min,
                self.threshold_max
            ));
        }

        if self.unchanged_stride == 0 {
            return Err(anyhow!("Unchanged frame stride must be non-zero"));
        }

        Ok(())
    }

    /// Cooldown as a duration.
    ///
    /// Negative or non-finite values yield zero.
    pub fn cooldown_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.cooldown).unwrap_or_default()
    }
}

impl Properties for PipelineConfig {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            ("Window step", PropertyMut::usize(&mut self.step, 1, 64)),
            (
                "Cell spacing",
                PropertyMut::float(&mut self.cell_spacing, 1.0, 1000.0),
            ),
            (
                "Sensitivity",
                PropertyMut::float(&mut self.sensitivity, 0.0, 10.0),
            ),
            ("Decay", PropertyMut::float(&mut self.decay, 0.01, 0.99)),
            (
                "Event sensitivity",
                PropertyMut::float(
                    &mut self.event_sensitivity,
                    SENSITIVITY_DOMAIN.0,
                    SENSITIVITY_DOMAIN.1,
                ),
            ),
            ("Cooldown", PropertyMut::float(&mut self.cooldown, 0.0, 60.0)),
            (
                "Threshold min",
                PropertyMut::float(&mut self.threshold_min, 0.0, 1.0),
            ),
            (
                "Threshold max",
                PropertyMut::float(&mut self.threshold_max, 0.0, 1.0),
            ),
        ]
    }
}
