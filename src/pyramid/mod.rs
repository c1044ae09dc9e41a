//! Grayscale image pyramid with separable pre-blur and 2× decimation.
//!
//! Level 0 is the 8-bit input converted to `ImageF32` in `[0, 1]`; each
//! further level halves the resolution (ceil division). A separable Gaussian
//! is applied before the first `blur_levels` decimations. Border samples
//! clamp to the image extents.
//!
//! Patch sampling addresses the pyramid in level-0 pixel coordinates:
//! [`Pyramid::sample`] scales by `2^-level` and interpolates bilinearly, so
//! callers never track per-level scale factors.

pub mod filters;
mod options;

pub use options::PyramidOptions;

use crate::image::{ImageF32, ImageU8};
use filters::apply as apply_filter;

#[derive(Clone, Debug, Default)]
pub struct Pyramid {
    pub levels: Vec<ImageF32>,
}

impl Pyramid {
    pub fn build_f32(image: ImageF32, options: PyramidOptions) -> Self {
        assert!(options.levels >= 1, "pyramid requires at least one level");
        let mut levels = Vec::with_capacity(options.levels);
        levels.push(image);

        let blur_limit = options.blur_levels;
        for lvl in 1..options.levels {
            let prev = levels.last().expect("previous level available");
            let use_blur = lvl <= blur_limit;
            let filtered = if use_blur {
                Some(apply_filter(options.filter, prev))
            } else {
                None
            };
            let src_img = filtered.as_ref().unwrap_or(prev);

            let (nw, nh) = (prev.w.div_ceil(2), prev.h.div_ceil(2));
            let mut down = ImageF32::new(nw, nh);
            for y in 0..nh {
                let sy = (y * 2).min(src_img.h - 1);
                let src_row = src_img.row(sy);
                let dst_row = down.row_mut(y);
                for (x, dst_px) in dst_row.iter_mut().enumerate() {
                    let sx = (x * 2).min(src_img.w - 1);
                    *dst_px = src_row[sx];
                }
            }
            levels.push(down);
        }

        Self { levels }
    }

    /// Build a pyramid from an 8-bit grayscale input using the provided options.
    pub fn build_u8(gray: ImageU8<'_>, options: PyramidOptions) -> Self {
        let image_l0 = convert_l0(gray);
        Pyramid::build_f32(image_l0, options)
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Borrow a level, clamping past-the-end indices to the coarsest level.
    pub fn level(&self, level: usize) -> &ImageF32 {
        let idx = level.min(self.levels.len() - 1);
        &self.levels[idx]
    }

    /// Bilinear sample at `level`, addressed in level-0 pixel coordinates.
    ///
    /// Returns `None` when the scaled coordinate falls outside the level.
    pub fn sample(&self, level: usize, u: f64, v: f64) -> Option<f32> {
        let img = self.level(level);
        let s = (1u64 << level.min(self.levels.len() - 1)) as f64;
        img.bilinear(u / s, v / s)
    }
}

fn convert_l0(gray: ImageU8<'_>) -> ImageF32 {
    let mut out = ImageF32::new(gray.w, gray.h);
    for y in 0..gray.h {
        let src = &gray.data[y * gray.stride..y * gray.stride + gray.w];
        let dst = out.row_mut(y);
        for x in 0..gray.w {
            dst[x] = src[x] as f32 / 255.0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requested_levels_with_ceil_halving() {
        let gray = vec![128u8; 10 * 7];
        let img = ImageU8 {
            w: 10,
            h: 7,
            stride: 10,
            data: &gray,
        };
        let pyr = Pyramid::build_u8(img, PyramidOptions::new(3));
        assert_eq!(pyr.num_levels(), 3);
        assert_eq!((pyr.levels[1].w, pyr.levels[1].h), (5, 4));
        assert_eq!((pyr.levels[2].w, pyr.levels[2].h), (3, 2));
    }

    #[test]
    fn sample_addresses_levels_in_l0_coordinates() {
        let mut l0 = ImageF32::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                l0.set(x, y, x as f32);
            }
        }
        let pyr = Pyramid::build_f32(l0, PyramidOptions::new(2).with_blur_levels(0));
        // Level 1 keeps even columns; L0 coordinate 4.0 maps to column 2.
        let v = pyr.sample(1, 4.0, 4.0).unwrap();
        assert!((v - 4.0).abs() < 1e-6);
    }
}
