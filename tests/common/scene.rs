//! Synthetic planar scene: a smoothly textured plane at z = 0 observed by
//! cameras above it looking straight down. Both views render the same world
//! texture, so photo-consistency peaks at the true geometry.

use nalgebra::{Matrix3, Vector3};
use patch_mvs::camera::{Camera, CameraIntrinsics};
use patch_mvs::config::MvsParams;
use patch_mvs::engine::Mvs;
use patch_mvs::image::ImageU8;

pub const IMG_SIZE: usize = 96;
pub const FOCAL: f64 = 160.0;
pub const CAM_HEIGHT: f64 = 5.0;
pub const BASELINE: f64 = 0.8;

/// Smooth, non-repeating plane texture in (0, 1); never hits zero, so the
/// whole image is foreground.
pub fn plane_intensity(x: f64, y: f64) -> f64 {
    0.5 + 0.18 * (2.1 * x + 0.8).sin() * (1.7 * y - 0.4).cos()
        + 0.12 * (5.3 * x - 1.9 * y).sin()
        + 0.12 * (23.0 * x + 17.0 * y + 0.5).sin()
}

/// Rotation turning the optical axis toward −z (camera above the plane).
pub fn downward_rotation() -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0)
}

/// Render the plane as seen from a camera at `center` looking down.
pub fn render_plane(center: Vector3<f64>) -> Vec<u8> {
    render_plane_masked(center, None)
}

/// Same, optionally zeroing a square block (background mask) centred at the
/// given pixel with the given half width.
pub fn render_plane_masked(
    center: Vector3<f64>,
    mask: Option<(usize, usize, usize)>,
) -> Vec<u8> {
    let cx = IMG_SIZE as f64 / 2.0;
    let cy = IMG_SIZE as f64 / 2.0;
    let mut data = vec![0u8; IMG_SIZE * IMG_SIZE];
    for v in 0..IMG_SIZE {
        for u in 0..IMG_SIZE {
            let du = (u as f64 - cx) / FOCAL;
            let dv = (v as f64 - cy) / FOCAL;
            // World ray of the pixel under the downward rotation.
            let dir = Vector3::new(du, -dv, -1.0);
            let s = center.z;
            let p = center + dir * s;
            let value = plane_intensity(p.x, p.y);
            data[v * IMG_SIZE + u] = (value * 255.0).round().clamp(1.0, 255.0) as u8;
        }
    }
    if let Some((mx, my, half)) = mask {
        for v in my.saturating_sub(half)..(my + half).min(IMG_SIZE) {
            for u in mx.saturating_sub(half)..(mx + half).min(IMG_SIZE) {
                data[v * IMG_SIZE + u] = 0;
            }
        }
    }
    data
}

pub fn make_camera(
    name: &str,
    center: Vector3<f64>,
    pixels: &[u8],
    pyramid_levels: usize,
) -> Camera {
    let rotation = downward_rotation();
    let translation = -rotation * center;
    let img = ImageU8 {
        w: IMG_SIZE,
        h: IMG_SIZE,
        stride: IMG_SIZE,
        data: pixels,
    };
    Camera::new(
        name,
        format!("{name}.png"),
        CameraIntrinsics {
            fx: FOCAL,
            fy: FOCAL,
            cx: IMG_SIZE as f64 / 2.0,
            cy: IMG_SIZE as f64 / 2.0,
        },
        rotation,
        translation,
        img,
        pyramid_levels,
    )
    .unwrap()
}

/// Tunables sized for the synthetic scene.
pub fn scene_params() -> MvsParams {
    MvsParams {
        cell_size: 8,
        patch_radius: 4,
        min_cam_num: 2,
        visible_correlation: 0.5,
        texture_variation: 1e-6,
        min_correlation: 0.7,
        max_fitness: 0.6,
        min_lod: 0,
        max_lod: 2,
        lod_ratio: 2.0,
        max_cell_patch_num: 3,
        dist_weighting: 2.0,
        diff_weighting: 0.25,
        neighbor_radius: 0.6,
        min_region_ratio: 0.2,
        depth_range_scalar: 0.1,
        particle_num: 10,
        max_iteration: 25,
        local_k: 4,
        checkpoint_interval: 500,
        pyramid_levels: 3,
    }
}

/// Camera centers of the standard two-camera rig.
pub fn rig_centers() -> [(String, Vector3<f64>); 2] {
    [
        (
            "left".to_string(),
            Vector3::new(-BASELINE, 0.0, CAM_HEIGHT),
        ),
        (
            "right".to_string(),
            Vector3::new(BASELINE, 0.0, CAM_HEIGHT),
        ),
    ]
}

/// Fresh engine with the two-camera rig and no patches.
pub fn two_camera_engine() -> Mvs {
    let mut engine = Mvs::new(scene_params()).unwrap();
    for (name, center) in rig_centers() {
        let pixels = render_plane(center);
        let camera = make_camera(&name, center, &pixels, scene_params().pyramid_levels);
        engine.add_camera(camera);
    }
    engine
}
