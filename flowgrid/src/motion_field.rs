//! # Block flow field

use anyhow::Result;
use nalgebra::*;
use std::io::Write;

/// Motion estimated over a single sampling window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowZone {
    /// Window center in source image pixels.
    pub pos: Point2<f32>,
    /// Displacement in pixels per frame.
    pub motion: Vector2<f32>,
}

impl FlowZone {
    pub fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            pos: Point2::new(x, y),
            motion: Vector2::new(u, v),
        }
    }
}

/// Fixed size field of sampling windows.
///
/// Every window slot either holds a [`FlowZone`], or is empty when its estimate was rejected.
/// The field is rebuilt from scratch on every estimation.
#[derive(Clone, Debug, Default)]
pub struct FlowField {
    zones: Vec<Option<FlowZone>>,
    width: usize,
}

impl FlowField {
    /// Create a new flow field with all slots empty.
    ///
    /// # Arguments
    ///
    /// * `width` - number of window columns.
    /// * `height` - number of window rows.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            zones: vec![None; width * height],
            width,
        }
    }

    /// Get width and height of the field, in windows.
    pub fn dim(&self) -> (usize, usize) {
        if self.width == 0 {
            (0, 0)
        } else {
            (self.width, self.zones.len() / self.width)
        }
    }

    /// Get number of window slots.
    ///
    /// This is the same as `width * height`
    pub fn size(&self) -> usize {
        self.zones.len()
    }

    /// Number of accepted zones.
    pub fn len(&self) -> usize {
        self.zones.iter().flatten().count()
    }

    /// Returns `true` if no zone was accepted.
    pub fn is_empty(&self) -> bool {
        self.zones.iter().all(Option::is_none)
    }

    /// Set zone at given window coordinates.
    ///
    /// # Arguments
    ///
    /// * `x` - window column.
    /// * `y` - window row.
    /// * `zone` - zone to store, `None` to mark the slot as rejected.
    pub fn set_zone(&mut self, x: usize, y: usize, zone: Option<FlowZone>) {
        self.zones[self.width * y + x] = zone;
    }

    /// Get zone at window coordinates.
    ///
    /// Returns `None` for rejected slots and coordinates outside the field.
    pub fn get_zone(&self, x: usize, y: usize) -> Option<&FlowZone> {
        if x >= self.width {
            return None;
        }
        self.zones.get(self.width * y + x).and_then(Option::as_ref)
    }

    /// Get motion at window coordinates.
    ///
    /// Missing zones yield a zero vector.
    pub fn get_motion(&self, x: usize, y: usize) -> Vector2<f32> {
        self.get_zone(x, y)
            .map(|z| z.motion)
            .unwrap_or_else(Vector2::zeros)
    }

    /// Iterate every accepted zone.
    ///
    /// The resulting iterator yields `(x, y, zone)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &FlowZone)> + '_ {
        let width = self.width;
        self.zones
            .iter()
            .enumerate()
            .filter_map(move |(i, z)| z.as_ref().map(|z| (i % width, i / width, z)))
    }

    /// Field-wide average motion.
    ///
    /// Sum of all accepted motion vectors divided by the number of accepted zones. Returns
    /// `None` when there is no data.
    pub fn average(&self) -> Option<Vector2<f32>> {
        let (sum, cnt) = self
            .iter()
            .fold((Vector2::zeros(), 0usize), |(sum, cnt), (_, _, z)| {
                (sum + z.motion, cnt + 1)
            });

        if cnt == 0 {
            None
        } else {
            Some(sum / cnt as f32)
        }
    }

    /// Serialize accepted zones of the field.
    ///
    /// The number of zones is written as a 32-bit LE integer, followed by `x, y, u, v` of each
    /// zone as LE `f32` values.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.write_all(&(self.len() as u32).to_le_bytes())?;

        for v in self
            .iter()
            .flat_map(|(_, _, z)| [z.pos.x, z.pos.y, z.motion.x, z.motion.y])
        {
            out.write_all(&v.to_le_bytes())?;
        }

        Ok(())
    }
}
