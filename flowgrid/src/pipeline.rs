//! # Per-frame motion pipeline
//!
//! [`Pipeline`] owns every piece of state that persists between frames: the previous frame,
//! the latest flow field, the grid cells and the event debounce state. Each call to
//! [`Pipeline::process_frame`] runs the whole chain once.

use crate::prelude::v1::*;
use log::*;
use nalgebra::Vector2;
use std::time::Duration;

/// Outcome of a single processed frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    /// How the frame compared to the previous one.
    pub delta: FrameDelta,
    /// Sum of interpolated motion magnitudes over all cells.
    pub movement: f32,
    /// Motion event fired by this frame.
    pub event: Option<MotionEvent>,
}

/// Frame processing state.
pub struct Pipeline {
    config: PipelineConfig,
    frames: FrameStore,
    estimator: Box<dyn Estimator>,
    custom_estimator: bool,
    field: FlowField,
    grid: GridResampler,
    detector: MotionEventDetector,
    listeners: Vec<Box<dyn MotionListener>>,
}

impl Pipeline {
    /// Create a new pipeline.
    ///
    /// # Arguments
    ///
    /// * `config` - pipeline configuration.
    /// * `rect` - area covered by the visual grid.
    pub fn new(config: PipelineConfig, rect: GridRect) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            frames: FrameStore::new(config.unchanged_stride),
            estimator: Box::new(LocalFlowEstimator::new(config.step)?),
            custom_estimator: false,
            field: FlowField::default(),
            grid: Self::build_grid(&config, rect)?,
            detector: MotionEventDetector::new(
                config.event_sensitivity,
                config.threshold_min,
                config.threshold_max,
                config.cooldown_duration(),
            )?,
            listeners: vec![],
            config,
        })
    }

    fn build_grid(config: &PipelineConfig, rect: GridRect) -> Result<GridResampler> {
        GridResampler::new(rect, config.cell_spacing, config.sensitivity, config.decay)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Flow field of the last processed frame.
    ///
    /// Empty if the last frame had no usable motion data.
    pub fn field(&self) -> &FlowField {
        &self.field
    }

    /// Field-wide average motion of the last processed frame.
    pub fn average(&self) -> Option<Vector2<f32>> {
        self.field.average()
    }

    pub fn grid(&self) -> &GridResampler {
        &self.grid
    }

    pub fn detector(&self) -> &MotionEventDetector {
        &self.detector
    }

    /// Replace the flow estimator.
    ///
    /// A custom estimator is kept across reconfigurations. The window step only applies to
    /// the built-in [`LocalFlowEstimator`].
    pub fn set_estimator(&mut self, estimator: Box<dyn Estimator>) {
        self.estimator = estimator;
        self.custom_estimator = true;
    }

    /// Register a receiver of motion events.
    pub fn add_listener(&mut self, listener: impl MotionListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Process a single frame.
    ///
    /// # Arguments
    ///
    /// * `frame` - RGBA frame of `width * height` pixels.
    /// * `width` - frame width in pixels.
    /// * `height` - frame height in pixels.
    /// * `now` - timestamp of the frame.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        width: usize,
        height: usize,
        now: Duration,
    ) -> Result<FrameReport> {
        if frame.len() != width * height * 4 {
            return Err(anyhow!(
                "Frame of {} bytes does not match {}x{} RGBA",
                frame.len(),
                width,
                height
            ));
        }

        let delta = self.frames.compare(frame);

        let field = match (delta, self.frames.previous()) {
            (FrameDelta::Changed, Some(previous)) => {
                self.estimator.estimate(previous, frame, width, height)?
            }
            (FrameDelta::Unchanged, _) => {
                debug!("Frame unchanged, skipping estimation");
                FlowField::default()
            }
            _ => {
                debug!("No previous {}x{} frame", width, height);
                FlowField::default()
            }
        };

        self.field = field;
        self.frames.store(frame);

        let movement = self.grid.update(&self.field);

        let event = if self.field.is_empty() {
            None
        } else {
            self.detector.detect(movement, self.grid.area(), now)
        };

        if let Some(event) = &event {
            for listener in &mut self.listeners {
                listener.on_motion(event);
            }
        }

        trace!(
            "Frame at {:.3}s: {} zones, movement {}",
            now.as_secs_f32(),
            self.field.len(),
            movement
        );

        Ok(FrameReport {
            delta,
            movement,
            event,
        })
    }

    /// Rebuild the grid over a new area.
    ///
    /// Cell offsets are discarded. On failure the old grid is kept.
    pub fn resize_grid(&mut self, rect: GridRect) -> Result<()> {
        self.grid = Self::build_grid(&self.config, rect)?;
        Ok(())
    }

    /// Apply a new configuration.
    ///
    /// Only the affected parts are rebuilt. Cell offsets survive unless the cell spacing
    /// changes, and the event cooldown keeps running. On failure nothing is changed.
    pub fn reconfigure(&mut self, config: PipelineConfig) -> Result<()> {
        config.validate()?;

        let estimator = if config.step != self.config.step && !self.custom_estimator {
            Some(LocalFlowEstimator::new(config.step)?)
        } else {
            None
        };

        let grid = if config.cell_spacing != self.config.cell_spacing {
            Some(Self::build_grid(&config, self.grid.rect())?)
        } else {
            None
        };

        self.detector
            .set_thresholds(config.threshold_min, config.threshold_max)?;
        self.detector.set_sensitivity(config.event_sensitivity)?;
        self.detector.set_cooldown(config.cooldown_duration());

        if let Some(estimator) = estimator {
            self.estimator = Box::new(estimator);
        }

        match grid {
            Some(grid) => self.grid = grid,
            None => self.grid.set_response(config.sensitivity, config.decay)?,
        }

        self.frames.set_stride(config.unchanged_stride);
        self.config = config;

        Ok(())
    }

    /// Change a single configuration knob by its property name.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let mut config = self.config.clone();
        config.set_prop_str(name, value)?;
        self.reconfigure(config)
    }

    /// Drop all frame history, cell offsets and debounce state.
    pub fn reset(&mut self) -> Result<()> {
        self.grid = Self::build_grid(&self.config, self.grid.rect())?;
        self.frames.clear();
        self.field = FlowField::default();
        self.detector.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::tests::frame;
    use assert_approx_eq::assert_approx_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    fn edge(at: usize) -> Vec<u8> {
        frame(64, 64, |x, _| if x < at { 200 } else { 50 })
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            step: 4,
            cell_spacing: 8.0,
            event_sensitivity: 100.0,
            threshold_min: 0.001,
            threshold_max: 0.01,
            unchanged_stride: 4,
            ..Default::default()
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(config(), GridRect::sized(64.0, 64.0)).unwrap()
    }

    #[test]
    fn moving_edge_end_to_end() {
        let mut pipeline = pipeline();
        let events = Rc::new(RefCell::new(vec![]));
        let sink = events.clone();
        pipeline.add_listener(move |e: &MotionEvent| sink.borrow_mut().push(*e));

        let first = pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        assert_eq!(first.delta, FrameDelta::First);
        assert_eq!(first.movement, 0.0);
        assert!(first.event.is_none());
        assert!(pipeline.field().is_empty());
        assert_eq!(pipeline.average(), None);

        let report = pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();
        assert_eq!(report.delta, FrameDelta::Changed);

        let zone = pipeline
            .field()
            .iter()
            .map(|(_, _, z)| *z)
            .find(|z| z.motion.magnitude() > 0.0)
            .unwrap();
        assert!(zone.motion.x > 0.0);
        assert_approx_eq!(zone.motion.y, 0.0);
        assert!(pipeline.average().unwrap().x > 0.0);

        // Two cells per row straddle the moving window column.
        assert_approx_eq!(report.movement, 20.0, 1e-3);
        assert!(pipeline
            .grid()
            .cells()
            .iter()
            .any(|c| c.offset().x > 0.0));

        let event = report.event.unwrap();
        assert_approx_eq!(event.threshold, 0.001 * 64.0 * 64.0, 1e-4);
        assert_eq!(*events.borrow(), vec![event]);
    }

    #[test]
    fn events_are_debounced() {
        let mut pipeline = pipeline();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        pipeline.add_listener(move |_: &MotionEvent| *sink.borrow_mut() += 1);

        let frames = [
            (edge(30), 0.0),
            (edge(31), 0.1),
            (edge(30), 0.2),
            (edge(31), 0.5),
            (edge(30), 1.2),
        ];

        let fired = frames
            .iter()
            .map(|(f, t)| pipeline.process_frame(f, 64, 64, secs(*t)).unwrap())
            .map(|r| r.event.is_some())
            .collect::<Vec<_>>();

        assert_eq!(fired, vec![false, true, false, false, true]);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn unchanged_frame_decays() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();

        let before = pipeline.grid().cells().to_vec();

        let report = pipeline.process_frame(&edge(31), 64, 64, secs(0.2)).unwrap();
        assert_eq!(report.delta, FrameDelta::Unchanged);
        assert_eq!(report.movement, 0.0);
        assert!(report.event.is_none());
        assert!(pipeline.field().is_empty());

        let decay = pipeline.config().decay;
        for (cell, prev) in pipeline.grid().cells().iter().zip(before) {
            assert_approx_eq!(cell.offset().x, prev.offset().x * decay);
        }
    }

    #[test]
    fn frame_size_change_restarts() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();

        let small = frame(32, 32, |x, _| x as u8);
        let report = pipeline.process_frame(&small, 32, 32, secs(0.1)).unwrap();
        assert_eq!(report.delta, FrameDelta::First);

        assert!(pipeline.process_frame(&small, 64, 64, secs(0.2)).is_err());
    }

    #[test]
    fn resize_grid_discards_offsets() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();

        pipeline
            .resize_grid(GridRect::new(10.0, 10.0, 32.0, 16.0))
            .unwrap();

        assert_eq!(pipeline.grid().dim(), (4, 2));
        assert!(pipeline
            .grid()
            .cells()
            .iter()
            .all(|c| c.offset() == Vector2::zeros()));

        assert!(pipeline
            .resize_grid(GridRect::sized(-1.0, 16.0))
            .is_err());
        assert_eq!(pipeline.grid().dim(), (4, 2));
    }

    #[test]
    fn reconfiguration() {
        let mut pipeline = pipeline();

        pipeline.set_property("Window step", "2").unwrap();
        assert_eq!(pipeline.config().step, 2);

        let frames = [edge(30), edge(31)];
        for (i, f) in frames.iter().enumerate() {
            pipeline
                .process_frame(f, 64, 64, secs(i as f32 * 0.1))
                .unwrap();
        }
        // Window step of 5 over 64 pixels.
        assert_eq!(pipeline.field().dim(), (12, 12));

        pipeline.set_property("Cell spacing", "16").unwrap();
        assert_eq!(pipeline.grid().dim(), (4, 4));

        pipeline.set_property("Event sensitivity", "1").unwrap();
        assert_approx_eq!(pipeline.detector().multiplier(), 0.01);

        let invalid = PipelineConfig {
            decay: 2.0,
            ..pipeline.config().clone()
        };
        assert!(pipeline.reconfigure(invalid).is_err());
        assert_eq!(pipeline.config().decay, PipelineConfig::default().decay);

        assert!(pipeline.set_property("Colour scheme", "1").is_err());
    }

    #[test]
    fn reset_clears_state() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();
        assert!(pipeline.detector().last_fired().is_some());

        pipeline.reset().unwrap();

        assert!(pipeline.field().is_empty());
        assert!(pipeline.detector().last_fired().is_none());
        assert!(pipeline
            .grid()
            .cells()
            .iter()
            .all(|c| c.offset() == Vector2::zeros()));

        let report = pipeline.process_frame(&edge(31), 64, 64, secs(0.2)).unwrap();
        assert_eq!(report.delta, FrameDelta::First);
    }

    struct ConstantFlow;

    impl Estimator for ConstantFlow {
        fn estimate(&mut self, _: &[u8], _: &[u8], _: usize, _: usize) -> Result<FlowField> {
            let mut field = FlowField::new(1, 1);
            field.set_zone(0, 0, Some(FlowZone::new(0.0, 0.0, 0.0, 1.0)));
            Ok(field)
        }
    }

    #[test]
    fn custom_estimator() {
        let mut pipeline = pipeline();
        pipeline.set_estimator(Box::new(ConstantFlow));

        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        let report = pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();

        // 8x8 cells, each picking up the single zone's motion.
        assert_approx_eq!(report.movement, 64.0, 1e-3);
        assert_eq!(pipeline.average(), Some(Vector2::new(0.0, 1.0)));

        let sensitivity = pipeline.config().sensitivity;
        let decay = pipeline.config().decay;
        assert_approx_eq!(pipeline.grid().cell(3, 3).offset().y, sensitivity * decay);
    }

    #[test]
    fn custom_estimator_survives_step_change() {
        let mut pipeline = pipeline();
        pipeline.set_estimator(Box::new(ConstantFlow));

        pipeline.set_property("Window step", "2").unwrap();
        assert_eq!(pipeline.config().step, 2);

        pipeline.process_frame(&edge(30), 64, 64, secs(0.0)).unwrap();
        pipeline.process_frame(&edge(31), 64, 64, secs(0.1)).unwrap();

        assert_eq!(pipeline.field().dim(), (1, 1));
        assert_eq!(pipeline.average(), Some(Vector2::new(0.0, 1.0)));

        let sensitivity = pipeline.config().sensitivity;
        let decay = pipeline.config().decay;
        assert_approx_eq!(pipeline.grid().cell(3, 3).offset().y, sensitivity * decay);
    }

    #[test]
    fn invalid_config() {
        let config = PipelineConfig {
            step: 0,
            ..Default::default()
        };
        assert!(Pipeline::new(config, GridRect::sized(64.0, 64.0)).is_err());
    }
}
