//! # Visual grid resampling
//!
//! The visual grid has its own resolution, independent of the flow sampling windows. Every
//! frame, each cell samples the flow field with bilinear interpolation and accumulates the
//! result into a decaying offset.

use crate::prelude::v1::*;
use log::*;
use nalgebra::{Point2, Vector2};

/// Target rectangle of the visual grid.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct GridRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl GridRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin.
    pub fn sized(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Single grid cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    position: Point2<f32>,
    offset: Vector2<f32>,
}

impl Cell {
    /// Create a resting cell.
    ///
    /// # Arguments
    ///
    /// * `position` - rest position relative to the grid origin.
    pub fn new(position: Point2<f32>) -> Self {
        Self {
            position,
            offset: Vector2::zeros(),
        }
    }

    /// Rest position relative to the grid origin.
    pub fn position(&self) -> Point2<f32> {
        self.position
    }

    /// Accumulated motion offset.
    pub fn offset(&self) -> Vector2<f32> {
        self.offset
    }

    /// Feed a motion sample into the offset.
    ///
    /// `offset = (offset + motion * sensitivity) * decay`
    pub fn update(&mut self, motion: Vector2<f32>, sensitivity: f32, decay: f32) {
        self.offset = (self.offset + motion * sensitivity) * decay;
    }
}

/// Resamples flow fields onto a fixed grid of cells.
#[derive(Clone, Debug)]
pub struct GridResampler {
    rect: GridRect,
    spacing: f32,
    sensitivity: f32,
    decay: f32,
    cells: Vec<Cell>,
    cols: usize,
}

impl GridResampler {
    /// Build a new grid.
    ///
    /// The rectangle is covered with `ceil(width / spacing)` by `ceil(height / spacing)` cells,
    /// each resting at the center of its square.
    ///
    /// # Arguments
    ///
    /// * `rect` - area covered by the grid.
    /// * `spacing` - cell size.
    /// * `sensitivity` - amplification of incoming motion.
    /// * `decay` - per-frame offset shrink factor, in `(0; 1)` range.
    pub fn new(rect: GridRect, spacing: f32, sensitivity: f32, decay: f32) -> Result<Self> {
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(anyhow!("Invalid cell spacing {spacing}"));
        }

        if !(rect.width >= 0.0 && rect.height >= 0.0) {
            return Err(anyhow!("Invalid grid size {}x{}", rect.width, rect.height));
        }

        if !(decay > 0.0 && decay < 1.0) {
            return Err(anyhow!("Decay must be in (0; 1) range, got {decay}"));
        }

        let rows = (rect.height / spacing).ceil() as usize;
        let cols = (rect.width / spacing).ceil() as usize;

        let cells = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (col, row)))
            .map(|(col, row)| {
                Cell::new(Point2::new(
                    spacing / 2.0 + col as f32 * spacing,
                    spacing / 2.0 + row as f32 * spacing,
                ))
            })
            .collect();

        debug!("Built {cols}x{rows} grid over {rect:?}");

        Ok(Self {
            rect,
            spacing,
            sensitivity,
            decay,
            cells,
            cols,
        })
    }

    /// Get width and height of the grid, in cells.
    pub fn dim(&self) -> (usize, usize) {
        if self.cols == 0 {
            (0, 0)
        } else {
            (self.cols, self.cells.len() / self.cols)
        }
    }

    pub fn rect(&self) -> GridRect {
        self.rect
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    /// Area of the covered rectangle.
    pub fn area(&self) -> f32 {
        self.rect.area()
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Get cell at grid coordinates.
    pub fn cell(&self, x: usize, y: usize) -> &Cell {
        &self.cells[self.cols * y + x]
    }

    /// Iterate every cell.
    ///
    /// The resulting iterator yields `(x, y, cell)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Cell)> + '_ {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, c)| (i % cols, i / cols, c))
    }

    /// Absolute drawing position of a cell, including its offset.
    pub fn absolute_position(&self, cell: &Cell) -> Point2<f32> {
        Point2::new(self.rect.x, self.rect.y) + cell.position.coords + cell.offset
    }

    /// Change how cells react to motion. Offsets are kept.
    pub fn set_response(&mut self, sensitivity: f32, decay: f32) -> Result<()> {
        if !(decay > 0.0 && decay < 1.0) {
            return Err(anyhow!("Decay must be in (0; 1) range, got {decay}"));
        }
        self.sensitivity = sensitivity;
        self.decay = decay;
        Ok(())
    }

    /// Sample the flow field at a position relative to the grid origin.
    ///
    /// The position is mapped linearly from grid space onto window indices. The four
    /// surrounding windows are blended bilinearly, with indices clamped to the field. Rejected
    /// windows count as zero motion.
    ///
    /// # Arguments
    ///
    /// * `field` - flow field to sample.
    /// * `pos` - position within the grid rectangle.
    pub fn interpolate(&self, field: &FlowField, pos: Point2<f32>) -> Vector2<f32> {
        let (fw, fh) = field.dim();

        if fw == 0 || fh == 0 || self.rect.width <= 0.0 || self.rect.height <= 0.0 {
            return Vector2::zeros();
        }

        let mapped_x = pos.x / self.rect.width * fw as f32;
        let mapped_y = pos.y / self.rect.height * fh as f32;

        let left = std::cmp::min(mapped_x.floor().max(0.0) as usize, fw - 1);
        let right = std::cmp::min(left + 1, fw - 1);
        let top = std::cmp::min(mapped_y.floor().max(0.0) as usize, fh - 1);
        let bottom = std::cmp::min(top + 1, fh - 1);

        let fx = (mapped_x - left as f32).clamp(0.0, 1.0);
        let fy = (mapped_y - top as f32).clamp(0.0, 1.0);

        let top_left = field.get_motion(left, top);
        let top_right = field.get_motion(right, top);
        let bottom_left = field.get_motion(left, bottom);
        let bottom_right = field.get_motion(right, bottom);

        top_left * ((1.0 - fx) * (1.0 - fy))
            + top_right * (fx * (1.0 - fy))
            + bottom_left * ((1.0 - fx) * fy)
            + bottom_right * (fx * fy)
    }

    /// Update every cell from a flow field.
    ///
    /// Returns the sum of interpolated motion magnitudes over all cells.
    pub fn update(&mut self, field: &FlowField) -> f32 {
        let motions = self
            .cells
            .iter()
            .map(|c| self.interpolate(field, c.position))
            .collect::<Vec<_>>();

        let (sensitivity, decay) = (self.sensitivity, self.decay);

        self.cells
            .iter_mut()
            .zip(motions)
            .map(|(cell, motion)| {
                cell.update(motion, sensitivity, decay);
                motion.magnitude()
            })
            .sum()
    }
}
