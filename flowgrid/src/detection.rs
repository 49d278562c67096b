//! Motion event detection module

use crate::prelude::v1::*;
use crate::utils::map_range;
use log::*;
use std::time::Duration;

/// Domain of the event sensitivity knob.
pub const SENSITIVITY_DOMAIN: (f32, f32) = (1.0, 100.0);

/// A fired motion event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionEvent {
    /// Timestamp of the frame that fired the event.
    pub at: Duration,
    /// Aggregate movement of that frame.
    pub movement: f32,
    /// Threshold the movement exceeded.
    pub threshold: f32,
}

/// Receiver of motion events.
pub trait MotionListener {
    fn on_motion(&mut self, event: &MotionEvent);
}

impl<F: FnMut(&MotionEvent)> MotionListener for F {
    fn on_motion(&mut self, event: &MotionEvent) {
        self(event)
    }
}

/// Debounced threshold detector.
///
/// Fires when the aggregate movement of a frame exceeds `multiplier * area`, at most once per
/// cooldown window. The multiplier is derived from a sensitivity in `[1; 100]` range, mapped
/// linearly onto `[max; min]` so that higher sensitivity means a lower threshold.
#[derive(Clone, Debug)]
pub struct MotionEventDetector {
    sensitivity: f32,
    threshold_min: f32,
    threshold_max: f32,
    cooldown: Duration,
    last_fired: Option<Duration>,
}

impl MotionEventDetector {
    /// Create a new detector.
    ///
    /// # Arguments
    ///
    /// * `sensitivity` - value in `[1; 100]` range.
    /// * `threshold_min` - multiplier used at the highest sensitivity.
    /// * `threshold_max` - multiplier used at the lowest sensitivity.
    /// * `cooldown` - minimum time between two events.
    pub fn new(
        sensitivity: f32,
        threshold_min: f32,
        threshold_max: f32,
        cooldown: Duration,
    ) -> Result<Self> {
        let mut detector = Self {
            sensitivity: SENSITIVITY_DOMAIN.0,
            threshold_min: 0.0,
            threshold_max: 0.0,
            cooldown,
            last_fired: None,
        };

        detector.set_thresholds(threshold_min, threshold_max)?;
        detector.set_sensitivity(sensitivity)?;

        Ok(detector)
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Change the sensitivity.
    ///
    /// Fails if the value is outside `[1; 100]`.
    pub fn set_sensitivity(&mut self, sensitivity: f32) -> Result<()> {
        if !(SENSITIVITY_DOMAIN.0..=SENSITIVITY_DOMAIN.1).contains(&sensitivity) {
            return Err(anyhow!("Sensitivity {sensitivity} is outside [1; 100]"));
        }
        self.sensitivity = sensitivity;
        Ok(())
    }

    /// Change the multiplier range.
    pub fn set_thresholds(&mut self, threshold_min: f32, threshold_max: f32) -> Result<()> {
        if threshold_min > threshold_max {
            return Err(anyhow!(
                "Threshold range is inverted ({threshold_min} > {threshold_max})"
            ));
        }
        self.threshold_min = threshold_min;
        self.threshold_max = threshold_max;
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    /// Timestamp of the last fired event.
    pub fn last_fired(&self) -> Option<Duration> {
        self.last_fired
    }

    /// Threshold multiplier for the current sensitivity.
    pub fn multiplier(&self) -> f32 {
        map_range(
            self.sensitivity,
            SENSITIVITY_DOMAIN,
            (self.threshold_max, self.threshold_min),
        )
    }

    /// Movement threshold for a grid of given area.
    pub fn threshold(&self, area: f32) -> f32 {
        self.multiplier() * area
    }

    /// Check a frame's aggregate movement.
    ///
    /// Returns the event if it fired.
    ///
    /// # Arguments
    ///
    /// * `movement` - aggregate movement of the frame.
    /// * `area` - area of the grid that produced it.
    /// * `now` - timestamp of the frame.
    pub fn detect(&mut self, movement: f32, area: f32, now: Duration) -> Option<MotionEvent> {
        let threshold = self.threshold(area);

        if movement <= threshold {
            return None;
        }

        let cooled_down = self
            .last_fired
            .map(|last| now.saturating_sub(last) >= self.cooldown)
            .unwrap_or(true);

        if !cooled_down {
            trace!("Movement {movement} over {threshold}, still cooling down");
            return None;
        }

        self.last_fired = Some(now);

        info!(
            "Motion event at {:.3}s: movement {} > {}",
            now.as_secs_f32(),
            movement,
            threshold
        );

        Some(MotionEvent {
            at: now,
            movement,
            threshold,
        })
    }

    /// Forget the last fired event.
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}
