//! # Block optical flow estimator

use crate::frame::as_pixels;
use crate::prelude::v1::*;
use log::*;
use nalgebra::{Point2, Vector2};

/// Generic optical flow estimator.
pub trait Estimator {
    /// Estimate motion between two consecutive frames.
    ///
    /// Both frames are RGBA buffers of `width * height` pixels.
    ///
    /// # Arguments
    ///
    /// * `old_image` - previous frame.
    /// * `new_image` - current frame.
    /// * `width` - frame width in pixels.
    /// * `height` - frame height in pixels.
    fn estimate(
        &mut self,
        old_image: &[u8],
        new_image: &[u8],
        width: usize,
        height: usize,
    ) -> Result<FlowField>;
}

/// Gradient sums accumulated over a single sampling window.
///
/// `x` and `y` are spatial gradients of the new frame, `t` is the temporal difference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSums {
    pub xx: i64,
    pub xy: i64,
    pub yy: i64,
    pub xt: i64,
    pub yt: i64,
}

impl WindowSums {
    fn add(&mut self, grad_x: i64, grad_y: i64, grad_t: i64) {
        self.xx += grad_x * grad_x;
        self.xy += grad_x * grad_y;
        self.yy += grad_y * grad_y;
        self.xt += grad_x * grad_t;
        self.yt += grad_y * grad_t;
    }

    /// Solve the 2x2 normal equations for the window displacement.
    ///
    /// Uses Cramer's rule when the system is regular. A singular system falls back to flow
    /// along the combined gradient direction, and to zero when that is degenerate too. The
    /// result is scaled by `step` and is always finite.
    ///
    /// # Arguments
    ///
    /// * `step` - half-width of the sampling window.
    pub fn solve(&self, step: usize) -> Vector2<f32> {
        let (xx, xy, yy, xt, yt) = (
            self.xx as i128,
            self.xy as i128,
            self.yy as i128,
            self.xt as i128,
            self.yt as i128,
        );
        let step = step as f64;

        let delta = xy * xy - xx * yy;

        if delta != 0 {
            let inv_delta = step / delta as f64;
            let delta_x = -(yt * xy - xt * yy);
            let delta_y = -(xy * xt - xx * yt);

            Vector2::new(
                (delta_x as f64 * inv_delta) as f32,
                (delta_y as f64 * inv_delta) as f32,
            )
        } else {
            let (gx, gy) = (xy + xx, yy + xy);
            let norm = gx * gx + gy * gy;

            if norm != 0 {
                let inv_norm = step / norm as f64;
                let temp = -((yt + xt) as f64) * inv_norm;

                Vector2::new((gx as f64 * temp) as f32, (gy as f64 * temp) as f32)
            } else {
                Vector2::zeros()
            }
        }
    }
}

/// Local differential flow estimator.
///
/// The image is split into square windows of `2 * step + 1` pixels. Each window gets one
/// least-squares motion estimate computed from the red channel only.
#[derive(Clone, Debug)]
pub struct LocalFlowEstimator {
    step: usize,
    rejection_bound: f32,
}

impl LocalFlowEstimator {
    /// Create a new estimator.
    ///
    /// # Arguments
    ///
    /// * `step` - half-width of each sampling window. Must be non-zero.
    pub fn new(step: usize) -> Result<Self> {
        if step == 0 {
            return Err(anyhow!("Window step must be non-zero"));
        }

        Ok(Self {
            step,
            rejection_bound: (2 * step + 1) as f32,
        })
    }

    /// Override the displacement bound above which estimates are dropped.
    ///
    /// Defaults to the window step.
    pub fn with_rejection_bound(mut self, bound: f32) -> Self {
        self.rejection_bound = bound;
        self
    }

    /// Half-width of the sampling windows.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Distance between window centers.
    pub fn window_step(&self) -> usize {
        2 * self.step + 1
    }

    pub fn rejection_bound(&self) -> f32 {
        self.rejection_bound
    }

    /// Window centers along an axis of given length.
    ///
    /// Skips a border of `step + 1` pixels. The last partial window is not covered.
    fn centers(&self, len: usize) -> impl Iterator<Item = usize> {
        let end = len.saturating_sub(self.step + 1);
        (self.step + 1..end).step_by(self.window_step())
    }

    /// Compute the flow field between two frames.
    ///
    /// # Arguments
    ///
    /// * `old_image` - previous RGBA frame.
    /// * `new_image` - current RGBA frame.
    /// * `width` - frame width in pixels.
    /// * `height` - frame height in pixels.
    pub fn calculate(
        &self,
        old_image: &[u8],
        new_image: &[u8],
        width: usize,
        height: usize,
    ) -> Result<FlowField> {
        if old_image.len() != new_image.len() {
            return Err(anyhow!(
                "Frame size mismatch ({} vs {} bytes)",
                old_image.len(),
                new_image.len()
            ));
        }

        if new_image.len() != width * height * 4 {
            return Err(anyhow!(
                "Frame of {} bytes does not match {}x{} RGBA",
                new_image.len(),
                width,
                height
            ));
        }

        let old = as_pixels(old_image)?;
        let new = as_pixels(new_image)?;

        let xs = self.centers(width).collect::<Vec<_>>();
        let ys = self.centers(height).collect::<Vec<_>>();

        let mut field = FlowField::new(xs.len(), ys.len());
        let step = self.step;
        let mut rejected = 0;

        for (wy, &gy) in ys.iter().enumerate() {
            for (wx, &gx) in xs.iter().enumerate() {
                let mut sums = WindowSums::default();

                for y in gy - step..=gy + step {
                    for x in gx - step..=gx + step {
                        let addr = y * width + x;

                        let grad_x = new[addr - 1].r as i64 - new[addr + 1].r as i64;
                        let grad_y = new[addr - width].r as i64 - new[addr + width].r as i64;
                        let grad_t = old[addr].r as i64 - new[addr].r as i64;

                        sums.add(grad_x, grad_y, grad_t);
                    }
                }

                let motion = sums.solve(step);

                if motion.x.abs() < self.rejection_bound && motion.y.abs() < self.rejection_bound
                {
                    field.set_zone(
                        wx,
                        wy,
                        Some(FlowZone {
                            pos: Point2::new(gx as f32, gy as f32),
                            motion,
                        }),
                    );
                } else {
                    rejected += 1;
                }
            }
        }

        trace!("{rejected} of {} windows rejected", xs.len() * ys.len());

        Ok(field)
    }
}

impl Estimator for LocalFlowEstimator {
    fn estimate(
        &mut self,
        old_image: &[u8],
        new_image: &[u8],
        width: usize,
        height: usize,
    ) -> Result<FlowField> {
        self.calculate(old_image, new_image, width, height)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;

    /// Build an RGBA frame from a red channel intensity function.
    pub(crate) fn frame(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Vec<u8> {
        (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                let v = f(x, y);
                [v, v, v, 255]
            })
            .collect()
    }

    #[test]
    fn identical_frames_yield_zero() {
        let mut rng = rand::thread_rng();
        let img = (0..64 * 64 * 4).map(|_| rng.gen::<u8>()).collect::<Vec<_>>();

        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&img, &img, 64, 64).unwrap();

        assert_eq!(field.dim(), (6, 6));
        assert_eq!(field.len(), 36);
        for (_, _, zone) in field.iter() {
            assert_eq!(zone.motion, Vector2::zeros());
        }
    }

    #[test]
    fn uniform_shift_on_flat_image() {
        let old = frame(32, 32, |_, _| 100);
        let new = frame(32, 32, |_, _| 140);

        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&old, &new, 32, 32).unwrap();

        assert!(!field.is_empty());
        for (_, _, zone) in field.iter() {
            assert!(zone.motion.x.is_finite() && zone.motion.y.is_finite());
            assert_eq!(zone.motion, Vector2::zeros());
        }
        assert_eq!(field.average(), Some(Vector2::zeros()));
    }

    #[test]
    fn horizontal_gradient_with_temporal_shift() {
        // Ramp of slope 2 moving right by one pixel: gradX = -4, gradT = 2 everywhere, which
        // is singular. Flow along the gradient gives u = step / 2.
        let new = frame(64, 64, |x, _| (2 * x) as u8);
        let old = frame(64, 64, |x, _| (2 * (x + 1)) as u8);

        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&old, &new, 64, 64).unwrap();

        assert_eq!(field.len(), 36);
        for (_, _, zone) in field.iter() {
            assert_approx_eq!(zone.motion.x, 2.0, 1e-5);
            assert_approx_eq!(zone.motion.y, 0.0, 1e-5);
        }
    }

    #[test]
    fn regular_system_solution() {
        let sums = WindowSums {
            xx: 2,
            xy: 0,
            yy: 2,
            xt: -2,
            yt: 4,
        };

        let motion = sums.solve(1);
        assert_approx_eq!(motion.x, 1.0);
        assert_approx_eq!(motion.y, -2.0);

        let motion = sums.solve(3);
        assert_approx_eq!(motion.x, 3.0);
        assert_approx_eq!(motion.y, -6.0);
    }

    #[test]
    fn degenerate_system_is_zero() {
        assert_eq!(WindowSums::default().solve(8), Vector2::zeros());

        // Gradients cancel out in the fallback direction.
        let sums = WindowSums {
            xx: 1,
            xy: -1,
            yy: 1,
            xt: 5,
            yt: 5,
        };
        assert_eq!(sums.solve(8), Vector2::zeros());
    }

    #[test]
    fn textured_shift_right() {
        let tex = |x: usize, y: usize| {
            let (x, y) = (x as f32, y as f32);
            (128.0 + 60.0 * (x * 0.3).sin() + 60.0 * (y * 0.23).sin()).round() as u8
        };

        let new = frame(64, 64, tex);
        let old = frame(64, 64, |x, y| tex(x + 1, y));

        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&old, &new, 64, 64).unwrap();

        let avg = field.average().unwrap();
        assert!(avg.x > 1.0 && avg.x < 3.0, "{}", avg.x);
        assert!(avg.y.abs() < 0.5, "{}", avg.y);
    }

    #[test]
    fn implausible_motion_rejected() {
        // gradX = -2, gradT = 40, giving u = 80 which is beyond the window step of 9.
        let new = frame(64, 64, |x, _| x as u8);
        let old = frame(64, 64, |x, _| x as u8 + 40);

        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&old, &new, 64, 64).unwrap();

        assert_eq!(field.dim(), (6, 6));
        assert!(field.is_empty());
        assert_eq!(field.average(), None);

        // Loosening the bound lets them through.
        let est = LocalFlowEstimator::new(4).unwrap().with_rejection_bound(100.0);
        let field = est.calculate(&old, &new, 64, 64).unwrap();
        assert_eq!(field.len(), 36);
        assert_approx_eq!(field.average().unwrap().x, 80.0, 1e-3);
    }

    #[test]
    fn moving_edge() {
        // Bright half expands right by one pixel.
        let old = frame(64, 64, |x, _| if x < 30 { 200 } else { 50 });
        let new = frame(64, 64, |x, _| if x < 31 { 200 } else { 50 });

        let est = LocalFlowEstimator::new(4).unwrap();
        assert_eq!(est.window_step(), 9);

        let field = est.calculate(&old, &new, 64, 64).unwrap();

        let moving = field
            .iter()
            .filter(|(_, _, z)| z.motion.magnitude() > 0.0)
            .collect::<Vec<_>>();

        assert!(!moving.is_empty());
        for (_, _, zone) in moving {
            assert_eq!(zone.pos.x, 32.0);
            assert!(zone.motion.x > 0.0);
            assert_approx_eq!(zone.motion.y, 0.0);
        }
    }

    #[test]
    fn too_small_for_a_window() {
        let img = frame(8, 8, |x, y| (x * y) as u8);
        let est = LocalFlowEstimator::new(4).unwrap();
        let field = est.calculate(&img, &img, 8, 8).unwrap();
        assert_eq!(field.dim(), (0, 0));
        assert_eq!(field.average(), None);
    }

    #[test]
    fn mismatched_frames() {
        let est = LocalFlowEstimator::new(4).unwrap();
        let a = frame(16, 16, |_, _| 0);
        let b = frame(16, 8, |_, _| 0);
        assert!(est.calculate(&a, &b, 16, 16).is_err());
        assert!(est.calculate(&a, &a, 16, 15).is_err());
    }

    #[test]
    fn zero_step() {
        assert!(LocalFlowEstimator::new(0).is_err());
    }
}
