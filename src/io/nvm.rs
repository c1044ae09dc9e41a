//! NVM sparse-reconstruction readers.
//!
//! Two dialects are accepted:
//! - `NVM_V3` (VisualSFM): per camera `name focal qw qx qy qz cx cy cz r 0`
//!   with the quaternion encoding the rotation and (cx, cy, cz) the camera
//!   center; feature measurements are offsets from the principal point.
//! - `NVM_V2`: per camera `name fx fy cx cy` followed by the row-major
//!   rotation and the translation; measurements are absolute pixels.
//!
//! Both point blocks read `x y z r g b n (img feat u v)*`. Loaded seeds are
//! re-triangulated from their measurements (`recenter_patches`) to
//! canonicalize the geometry.

use crate::camera::{Camera, CameraIntrinsics};
use crate::config::MvsParams;
use crate::engine::Mvs;
use crate::error::{MvsError, Result};
use crate::image::load_grayscale_image;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector2, Vector3};
use std::fs;
use std::path::Path;

/// Parsed camera of either dialect.
#[derive(Clone, Debug)]
pub struct NvmCamera {
    pub name: String,
    /// `None` for NVM_V3, where the principal point is the image center and
    /// fx = fy = focal.
    pub intrinsics: Option<CameraIntrinsics>,
    pub focal: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Whether measurements are offsets from the principal point (V3) or
    /// absolute pixels (V2).
    pub centered_measurements: bool,
}

/// Parsed sparse point with its per-view measurements.
#[derive(Clone, Debug)]
pub struct NvmPoint {
    pub position: Vector3<f64>,
    pub measurements: Vec<(usize, Vector2<f64>)>,
}

/// Parsed model, format-agnostic.
#[derive(Clone, Debug)]
pub struct NvmModel {
    pub cameras: Vec<NvmCamera>,
    pub points: Vec<NvmPoint>,
}

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
    path: &'a Path,
}

impl<'a> Tokens<'a> {
    fn next_str(&mut self) -> Result<&'a str> {
        self.iter
            .next()
            .ok_or_else(|| MvsError::format(self.path, "unexpected end of file"))
    }

    fn next_f64(&mut self) -> Result<f64> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| MvsError::format(self.path, format!("expected number, got '{tok}'")))
    }

    fn next_usize(&mut self) -> Result<usize> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| MvsError::format(self.path, format!("expected count, got '{tok}'")))
    }
}

/// Parse an `NVM_V3` document.
pub fn parse_nvm(text: &str, path: &Path) -> Result<NvmModel> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| MvsError::format(path, "empty file"))?;
    if !header.trim_start().starts_with("NVM_V3") {
        return Err(MvsError::format(path, "missing NVM_V3 header"));
    }
    let body: String = lines.collect::<Vec<_>>().join("\n");
    let mut tokens = Tokens {
        iter: body.split_whitespace(),
        path,
    };

    let camera_count = tokens.next_usize()?;
    let mut cameras = Vec::with_capacity(camera_count);
    for _ in 0..camera_count {
        let name = tokens.next_str()?.to_string();
        let focal = tokens.next_f64()?;
        let qw = tokens.next_f64()?;
        let qx = tokens.next_f64()?;
        let qy = tokens.next_f64()?;
        let qz = tokens.next_f64()?;
        let center = Vector3::new(tokens.next_f64()?, tokens.next_f64()?, tokens.next_f64()?);
        let _radial = tokens.next_f64()?;
        let _zero = tokens.next_f64()?;

        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz))
            .to_rotation_matrix()
            .into_inner();
        let translation = -rotation * center;
        cameras.push(NvmCamera {
            name,
            intrinsics: None,
            focal,
            rotation,
            translation,
            centered_measurements: true,
        });
    }

    let points = parse_points(&mut tokens, cameras.len())?;
    Ok(NvmModel { cameras, points })
}

/// Parse an `NVM_V2` document (rotation-matrix dialect).
pub fn parse_nvm2(text: &str, path: &Path) -> Result<NvmModel> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| MvsError::format(path, "empty file"))?;
    if !header.trim_start().starts_with("NVM_V2") {
        return Err(MvsError::format(path, "missing NVM_V2 header"));
    }
    let body: String = lines.collect::<Vec<_>>().join("\n");
    let mut tokens = Tokens {
        iter: body.split_whitespace(),
        path,
    };

    let camera_count = tokens.next_usize()?;
    let mut cameras = Vec::with_capacity(camera_count);
    for _ in 0..camera_count {
        let name = tokens.next_str()?.to_string();
        let fx = tokens.next_f64()?;
        let fy = tokens.next_f64()?;
        let cx = tokens.next_f64()?;
        let cy = tokens.next_f64()?;
        let mut rotation = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                rotation[(r, c)] = tokens.next_f64()?;
            }
        }
        let translation = Vector3::new(tokens.next_f64()?, tokens.next_f64()?, tokens.next_f64()?);
        cameras.push(NvmCamera {
            name,
            intrinsics: Some(CameraIntrinsics { fx, fy, cx, cy }),
            focal: fx,
            rotation,
            translation,
            centered_measurements: false,
        });
    }

    let points = parse_points(&mut tokens, cameras.len())?;
    Ok(NvmModel { cameras, points })
}

fn parse_points(tokens: &mut Tokens<'_>, camera_count: usize) -> Result<Vec<NvmPoint>> {
    let point_count = tokens.next_usize()?;
    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        let position = Vector3::new(tokens.next_f64()?, tokens.next_f64()?, tokens.next_f64()?);
        let _rgb = (
            tokens.next_f64()?,
            tokens.next_f64()?,
            tokens.next_f64()?,
        );
        let measurement_count = tokens.next_usize()?;
        let mut measurements = Vec::with_capacity(measurement_count);
        for _ in 0..measurement_count {
            let img = tokens.next_usize()?;
            let _feature = tokens.next_usize()?;
            let u = tokens.next_f64()?;
            let v = tokens.next_f64()?;
            if img >= camera_count {
                return Err(MvsError::format(
                    tokens.path,
                    format!("measurement references camera {img} of {camera_count}"),
                ));
            }
            measurements.push((img, Vector2::new(u, v)));
        }
        points.push(NvmPoint {
            position,
            measurements,
        });
    }
    Ok(points)
}

/// Load an `NVM_V3` reconstruction into a fresh engine.
pub fn load_nvm(path: &Path, image_dir: &Path, params: MvsParams) -> Result<Mvs> {
    let text = fs::read_to_string(path)?;
    let model = parse_nvm(&text, path)?;
    build_engine(model, image_dir, params)
}

/// Load an `NVM_V2` reconstruction into a fresh engine.
pub fn load_nvm2(path: &Path, image_dir: &Path, params: MvsParams) -> Result<Mvs> {
    let text = fs::read_to_string(path)?;
    let model = parse_nvm2(&text, path)?;
    build_engine(model, image_dir, params)
}

fn build_engine(model: NvmModel, image_dir: &Path, params: MvsParams) -> Result<Mvs> {
    let mut engine = Mvs::new(params)?;

    let mut principal_points = Vec::with_capacity(model.cameras.len());
    for cam in &model.cameras {
        let image = load_grayscale_image(&image_dir.join(&cam.name))?;
        let intrinsics = cam.intrinsics.unwrap_or(CameraIntrinsics {
            fx: cam.focal,
            fy: cam.focal,
            cx: image.width() as f64 / 2.0,
            cy: image.height() as f64 / 2.0,
        });
        principal_points.push((intrinsics.cx, intrinsics.cy, cam.centered_measurements));
        let camera = Camera::new(
            cam.name.clone(),
            cam.name.clone(),
            intrinsics,
            cam.rotation,
            cam.translation,
            image.as_view(),
            engine.params().pyramid_levels,
        )?;
        engine.add_camera(camera);
    }

    for point in &model.points {
        let mut cam_indices = Vec::with_capacity(point.measurements.len());
        let mut projections = Vec::with_capacity(point.measurements.len());
        for &(img, uv) in &point.measurements {
            if cam_indices.contains(&img) {
                continue;
            }
            let (cx, cy, centered) = principal_points[img];
            let pixel = if centered {
                Vector2::new(cx + uv.x, cy + uv.y)
            } else {
                uv
            };
            cam_indices.push(img);
            projections.push(pixel);
        }
        engine.add_seed_observed(point.position, cam_indices, projections);
    }

    // Canonicalize seed geometry from the measured observations.
    engine.recenter_patches();
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_V3: &str = "NVM_V3\n\n2\n\
        a.png 500 1 0 0 0 0 0 0 0 0\n\
        b.png 500 1 0 0 0 -1 0 0 0 0\n\
        1\n\
        0.5 0.5 4 200 180 170 2 0 0 10.5 -3.0 1 4 9.25 -2.5\n\
        0\n";

    #[test]
    fn parses_v3_cameras_and_points() {
        let model = parse_nvm(SAMPLE_V3, Path::new("sample.nvm")).unwrap();
        assert_eq!(model.cameras.len(), 2);
        assert_eq!(model.points.len(), 1);

        let cam1 = &model.cameras[1];
        assert_eq!(cam1.name, "b.png");
        assert!((cam1.focal - 500.0).abs() < 1e-12);
        // Identity quaternion, center (-1, 0, 0) => t = (1, 0, 0).
        assert!((cam1.translation - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);

        let point = &model.points[0];
        assert_eq!(point.measurements.len(), 2);
        assert_eq!(point.measurements[1].0, 1);
        assert!((point.measurements[1].1 - Vector2::new(9.25, -2.5)).norm() < 1e-12);
    }

    #[test]
    fn rejects_wrong_header() {
        assert!(parse_nvm("NVM_V2\n0\n0\n", Path::new("x.nvm")).is_err());
        assert!(parse_nvm2("NVM_V3\n0\n0\n", Path::new("x.nvm")).is_err());
    }

    #[test]
    fn rejects_out_of_range_measurement() {
        let text = "NVM_V3\n1\na.png 500 1 0 0 0 0 0 0 0 0\n1\n0 0 1 0 0 0 1 5 0 1 1\n";
        assert!(parse_nvm(text, Path::new("x.nvm")).is_err());
    }

    #[test]
    fn parses_v2_rotation_matrix_dialect() {
        let text = "NVM_V2\n1\n\
            a.png 500 510 320 240 1 0 0 0 1 0 0 0 1 0.1 0.2 0.3\n\
            0\n";
        let model = parse_nvm2(text, Path::new("x.nvm")).unwrap();
        let cam = &model.cameras[0];
        let k = cam.intrinsics.unwrap();
        assert!((k.fy - 510.0).abs() < 1e-12);
        assert!((cam.translation - Vector3::new(0.1, 0.2, 0.3)).norm() < 1e-12);
        assert!(!cam.centered_measurements);
    }
}
