//! # Frame sources

use crate::prelude::v1::*;
use std::io::{ErrorKind, Read};

/// Supplier of consecutive video frames.
pub trait FrameSource {
    /// Read the next frame in the stream.
    ///
    /// On success the buffer holds a full RGBA frame and `Ok(true)` is returned. `Ok(false)`
    /// signals the end of the stream, and `Err` is returned on broken input.
    fn next_frame(&mut self, frame: &mut Vec<u8>) -> Result<bool>;

    /// Get the framerate of the stream.
    ///
    /// This will return `Some(framerate)` if it is known. On realtime streams it may
    /// not always be known. In such cases, `None` is returned.
    fn get_framerate(&self) -> Option<f64>;

    /// Get frame dimensions as `(width, height)`, if known.
    fn get_dims(&self) -> Option<(usize, usize)>;
}

/// Headerless stream of fixed size RGBA frames.
pub struct RawFrameReader<T> {
    reader: T,
    width: usize,
    height: usize,
    framerate: Option<f64>,
}

impl<T: Read> RawFrameReader<T> {
    /// Wrap a reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - underlying byte stream.
    /// * `width` - frame width in pixels.
    /// * `height` - frame height in pixels.
    pub fn new(reader: T, width: usize, height: usize) -> Self {
        Self {
            reader,
            width,
            height,
            framerate: None,
        }
    }

    /// Declare the framerate of the stream.
    pub fn with_framerate(mut self, framerate: f64) -> Self {
        self.framerate = Some(framerate);
        self
    }

    /// Size of a single frame in bytes.
    pub fn frame_len(&self) -> usize {
        self.width * self.height * 4
    }
}

impl<T: Read> FrameSource for RawFrameReader<T> {
    fn next_frame(&mut self, frame: &mut Vec<u8>) -> Result<bool> {
        let len = self.frame_len();

        if len == 0 {
            return Err(anyhow!("Empty frame dimensions"));
        }

        frame.resize(len, 0);

        let mut filled = 0;

        while filled < len {
            match self.reader.read(&mut frame[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(anyhow!("Truncated frame ({filled} of {len} bytes)")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(true)
    }

    fn get_framerate(&self) -> Option<f64> {
        self.framerate
    }

    fn get_dims(&self) -> Option<(usize, usize)> {
        Some((self.width, self.height))
    }
}
