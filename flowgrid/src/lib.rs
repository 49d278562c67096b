//! # Block Optical Flow to Visual Grid
//!
//! This library estimates coarse optical flow between consecutive video frames, resamples it
//! onto an independently sized grid of decaying cells, and fires debounced events whenever the
//! total amount of motion crosses a threshold.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use flowgrid::prelude::v1::*;
//! ```
//!
//! Motion vectors are [`nalgebra`](https://crates.io/crates/nalgebra) `Vector2<f32>` values.

pub mod config;
pub mod detection;
pub mod estimator;
pub mod frame;
pub mod grid;
pub mod motion_field;
pub mod pipeline;
pub mod properties;
pub mod source;
pub mod utils;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            config::PipelineConfig,
            detection::{MotionEvent, MotionEventDetector, MotionListener},
            estimator::{Estimator, LocalFlowEstimator},
            frame::{FrameDelta, FrameStore, RGBA},
            grid::{Cell, GridRect, GridResampler},
            motion_field::{FlowField, FlowZone},
            pipeline::{FrameReport, Pipeline},
            properties::*,
            source::{FrameSource, RawFrameReader},
        };
        pub use anyhow::{anyhow, Error, Result};
    }
}
