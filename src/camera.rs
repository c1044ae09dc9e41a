//! Calibrated pinhole camera with its grayscale image pyramid.
//!
//! Cameras are immutable after construction. World points map through
//! `p_cam = R·p + t`; the camera center is `-Rᵀ·t` and the optical axis is
//! the third row of `R`. A zero-valued pixel at pyramid level 0 marks
//! background (binary mask).

use crate::error::{MvsError, Result};
use crate::image::ImageU8;
use crate::pyramid::{Pyramid, PyramidOptions};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x (pixels).
    pub fx: f64,
    /// Focal length in y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Returns `true` when all entries are finite and focal lengths non-zero.
    pub fn is_valid(self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }
}

/// A calibrated view: intrinsics, pose, and the image pyramid.
#[derive(Clone, Debug)]
pub struct Camera {
    name: String,
    image_path: PathBuf,
    intrinsics: CameraIntrinsics,
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    center: Vector3<f64>,
    optical_axis: Vector3<f64>,
    pyramid: Pyramid,
}

impl Camera {
    /// Build a camera from calibration and an 8-bit grayscale image.
    pub fn new(
        name: impl Into<String>,
        image_path: impl Into<PathBuf>,
        intrinsics: CameraIntrinsics,
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        image: ImageU8<'_>,
        pyramid_levels: usize,
    ) -> Result<Self> {
        if !intrinsics.is_valid() {
            return Err(MvsError::Config(format!(
                "invalid intrinsics: {intrinsics:?}"
            )));
        }
        if image.w == 0 || image.h == 0 {
            return Err(MvsError::Config("empty camera image".into()));
        }
        let center = -rotation.transpose() * translation;
        let optical_axis = rotation.row(2).transpose().normalize();
        let pyramid = Pyramid::build_u8(image, PyramidOptions::new(pyramid_levels.max(1)));
        Ok(Self {
            name: name.into(),
            image_path: image_path.into(),
            intrinsics,
            rotation,
            translation,
            center,
            optical_axis,
            pyramid,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_path(&self) -> &PathBuf {
        &self.image_path
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Camera center in world coordinates.
    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    /// Unit viewing direction of the optical axis in world coordinates.
    pub fn optical_axis(&self) -> &Vector3<f64> {
        &self.optical_axis
    }

    /// Level-0 image width in pixels.
    pub fn width(&self) -> usize {
        self.pyramid.levels[0].w
    }

    /// Level-0 image height in pixels.
    pub fn height(&self) -> usize {
        self.pyramid.levels[0].h
    }

    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    /// Project a world point to level-0 pixel coordinates.
    ///
    /// Returns `None` when the point lies behind the camera or projects
    /// outside the image.
    pub fn project(&self, world: &Vector3<f64>) -> Option<Vector2<f64>> {
        let pc = self.rotation * world + self.translation;
        if pc.z <= 1e-12 {
            return None;
        }
        let u = self.intrinsics.fx * pc.x / pc.z + self.intrinsics.cx;
        let v = self.intrinsics.fy * pc.y / pc.z + self.intrinsics.cy;
        let in_bounds = u >= 0.0
            && v >= 0.0
            && u <= (self.width() - 1) as f64
            && v <= (self.height() - 1) as f64;
        in_bounds.then_some(Vector2::new(u, v))
    }

    /// Unit world-space ray direction from the camera center through a
    /// level-0 pixel.
    pub fn unproject_ray(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let dir_cam = Vector3::new(
            (pixel.x - self.intrinsics.cx) / self.intrinsics.fx,
            (pixel.y - self.intrinsics.cy) / self.intrinsics.fy,
            1.0,
        );
        (self.rotation.transpose() * dir_cam).normalize()
    }

    /// Bilinear pyramid lookup at `level`, addressed in level-0 coordinates.
    pub fn sample(&self, level: usize, u: f64, v: f64) -> Option<f32> {
        self.pyramid.sample(level, u, v)
    }

    /// True when the nearest level-0 pixel is zero-valued (masked out).
    /// Out-of-bounds coordinates count as background.
    pub fn is_background(&self, u: f64, v: f64) -> bool {
        let x = u.round();
        let y = v.round();
        if x < 0.0 || y < 0.0 || x >= self.width() as f64 || y >= self.height() as f64 {
            return true;
        }
        self.pyramid.levels[0].get(x as usize, y as usize) == 0.0
    }

    /// Euclidean distance from the camera center to a world point.
    pub fn depth(&self, world: &Vector3<f64>) -> f64 {
        (world - self.center).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_camera(w: usize, h: usize) -> Camera {
        let data = vec![128u8; w * h];
        let img = ImageU8 {
            w,
            h,
            stride: w,
            data: &data,
        };
        Camera::new(
            "cam0",
            "cam0.png",
            CameraIntrinsics {
                fx: 100.0,
                fy: 100.0,
                cx: w as f64 / 2.0,
                cy: h as f64 / 2.0,
            },
            Matrix3::identity(),
            Vector3::zeros(),
            img,
            3,
        )
        .unwrap()
    }

    #[test]
    fn rejects_degenerate_intrinsics() {
        let data = vec![0u8; 16];
        let img = ImageU8 {
            w: 4,
            h: 4,
            stride: 4,
            data: &data,
        };
        let err = Camera::new(
            "bad",
            "bad.png",
            CameraIntrinsics {
                fx: 0.0,
                fy: 100.0,
                cx: 2.0,
                cy: 2.0,
            },
            Matrix3::identity(),
            Vector3::zeros(),
            img,
            1,
        );
        assert!(matches!(err, Err(MvsError::Config(_))));
    }

    #[test]
    fn project_unproject_agree_on_axis() {
        let cam = identity_camera(200, 200);
        let p = Vector3::new(0.0, 0.0, 5.0);
        let px = cam.project(&p).unwrap();
        assert!((px.x - 100.0).abs() < 1e-9);
        assert!((px.y - 100.0).abs() < 1e-9);
        let ray = cam.unproject_ray(&px);
        assert!((ray - Vector3::z()).norm() < 1e-9);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = identity_camera(200, 200);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn optical_axis_is_rotation_third_row() {
        let cam = identity_camera(64, 64);
        assert!((cam.optical_axis() - Vector3::z()).norm() < 1e-12);
    }
}
