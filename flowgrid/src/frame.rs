//! # Frame buffers
//!
//! Frames are plain row-major RGBA byte buffers. [`FrameStore`] keeps the previous frame around
//! so that consecutive frames can be compared without reallocating every tick.

use crate::prelude::v1::*;
use bytemuck::{Pod, Zeroable};
use log::*;

/// Default distance between sampled bytes when checking for unchanged frames.
///
/// A multiple of 4, so only the red channel gets sampled.
pub const UNCHANGED_SAMPLE_STRIDE: usize = 64;

/// RGBA colour structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct RGBA {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// View a raw byte buffer as a slice of pixels.
///
/// Fails if the buffer length is not a multiple of 4.
pub fn as_pixels(buf: &[u8]) -> Result<&[RGBA]> {
    bytemuck::try_cast_slice(buf).map_err(|e| anyhow!("Invalid RGBA buffer: {e}"))
}

/// Copy `source` into `previous`, or allocate a new buffer.
///
/// If `previous` is `None`, a zero-filled buffer with the length of `source` is returned and
/// nothing is copied. Otherwise `previous` is overwritten with the contents of `source` and
/// returned, keeping its allocation. A `previous` buffer of a different length is dropped and
/// replaced by a zero-filled one of the new length.
///
/// # Arguments
///
/// * `source` - frame to copy from.
/// * `previous` - buffer retained from the previous call.
pub fn copy_or_allocate(source: &[u8], previous: Option<Vec<u8>>) -> Vec<u8> {
    match previous {
        Some(mut previous) if previous.len() == source.len() => {
            previous.copy_from_slice(source);
            previous
        }
        _ => vec![0; source.len()],
    }
}

/// Approximate equality check between two frames.
///
/// Compares every `stride`-th byte with an index below `count`. Changes between the sampled
/// bytes are missed, so this must only be used as an early exit.
///
/// # Arguments
///
/// * `a` - first buffer.
/// * `b` - second buffer.
/// * `stride` - distance between sampled bytes.
/// * `count` - upper bound on sampled indices.
pub fn frame_unchanged(a: &[u8], b: &[u8], stride: usize, count: usize) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let count = std::cmp::min(count, a.len());

    (0..count)
        .step_by(std::cmp::max(stride, 1))
        .all(|i| a[i] == b[i])
}

/// Result of comparing a new frame against the stored one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDelta {
    /// Nothing is stored yet, or the stored frame has different dimensions.
    First,
    /// Sampled bytes are identical.
    Unchanged,
    /// The frame differs from the stored one.
    Changed,
}

/// Owner of the previous frame buffer.
#[derive(Debug)]
pub struct FrameStore {
    previous: Option<Vec<u8>>,
    stride: usize,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new(UNCHANGED_SAMPLE_STRIDE)
    }
}

impl FrameStore {
    /// Create an empty frame store.
    ///
    /// # Arguments
    ///
    /// * `stride` - sampling stride of the unchanged frame check.
    pub fn new(stride: usize) -> Self {
        Self {
            previous: None,
            stride,
        }
    }

    /// Change the sampling stride of the unchanged frame check.
    pub fn set_stride(&mut self, stride: usize) {
        self.stride = stride;
    }

    /// Get the stored frame, if any.
    pub fn previous(&self) -> Option<&[u8]> {
        self.previous.as_deref()
    }

    /// Compare `current` against the stored frame.
    pub fn compare(&self, current: &[u8]) -> FrameDelta {
        match &self.previous {
            Some(previous) if previous.len() == current.len() => {
                if frame_unchanged(previous, current, self.stride, current.len()) {
                    FrameDelta::Unchanged
                } else {
                    FrameDelta::Changed
                }
            }
            _ => FrameDelta::First,
        }
    }

    /// Retain `current` as the previous frame.
    ///
    /// The existing buffer is reused when the length matches.
    pub fn store(&mut self, current: &[u8]) {
        let previous = self.previous.take();
        let reuse = matches!(&previous, Some(p) if p.len() == current.len());

        if !reuse && previous.is_some() {
            debug!("Frame size changed, reallocating to {} bytes", current.len());
        }

        let mut buf = copy_or_allocate(current, previous);

        if !reuse {
            buf.copy_from_slice(current);
        }

        self.previous = Some(buf);
    }

    /// Drop the stored frame.
    pub fn clear(&mut self) {
        self.previous = None;
    }
}
