//! Hough-space quantization of patch normals and plane distances.
//!
//! The (theta, phi, signed plane distance) domain is voxelized over the
//! observed ranges of the current patch set; each patch votes into one bin
//! and is then snapped to the bin's representative: the normal becomes the
//! bin normal and the center is projected onto the representative plane.
//! Cell maps are rebuilt afterwards so cells keep matching the (moved)
//! projections.

use super::Mvs;
use crate::patch::spherical::spherical_to_normal;
use log::debug;
use nalgebra::Vector2;
use std::collections::HashMap;

impl Mvs {
    /// Snap every patch to its `theta_num × phi_num × dist_num` Hough bin.
    pub fn patch_quantization(&mut self, theta_num: usize, phi_num: usize, dist_num: usize) {
        if theta_num == 0 || phi_num == 0 || dist_num == 0 || self.patches.len() < 2 {
            return;
        }

        let mut min_theta = f64::MAX;
        let mut max_theta = f64::MIN;
        let mut min_phi = f64::MAX;
        let mut max_phi = f64::MIN;
        let mut min_dist = f64::MAX;
        let mut max_dist = f64::MIN;

        for patch in self.patches.values() {
            let s = patch.spherical_normal();
            let dist = -patch.normal().dot(patch.center());
            min_theta = min_theta.min(s.x);
            max_theta = max_theta.max(s.x);
            min_phi = min_phi.min(s.y);
            max_phi = max_phi.max(s.y);
            min_dist = min_dist.min(dist);
            max_dist = max_dist.max(dist);
        }

        let theta_range = max_theta - min_theta;
        let phi_range = max_phi - min_phi;
        let dist_range = max_dist - min_dist;

        let theta_step = theta_range / theta_num as f64;
        let phi_step = phi_range / phi_num as f64;
        let dist_step = dist_range / dist_num as f64;

        // Vote in Hough space.
        let mut bins: HashMap<(usize, usize, usize), Vec<u32>> = HashMap::new();
        for patch in self.patches.values() {
            let s = patch.spherical_normal();
            let dist = -patch.normal().dot(patch.center());
            let theta_idx = bin_index(s.x, min_theta, theta_range, theta_num);
            let phi_idx = bin_index(s.y, min_phi, phi_range, phi_num);
            let dist_idx = bin_index(dist, min_dist, dist_range, dist_num);
            bins.entry((theta_idx, phi_idx, dist_idx))
                .or_default()
                .push(patch.id());
        }
        debug!(
            "quantization: {} patches across {} occupied bins",
            self.patches.len(),
            bins.len()
        );

        // Snap each member to the bin representative.
        for ((theta_idx, phi_idx, dist_idx), members) in bins {
            let quan_theta = theta_idx as f64 * theta_step + min_theta;
            let quan_phi = phi_idx as f64 * phi_step + min_phi;
            let quan_dist = dist_idx as f64 * dist_step + min_dist;
            let quan_normal = spherical_to_normal(&Vector2::new(quan_theta, quan_phi));

            for id in members {
                let Some(patch) = self.patches.get_mut(&id) else {
                    continue;
                };
                let center = *patch.center();
                let offset = (center + quan_normal * quan_dist).dot(&quan_normal);
                let on_plane = center - quan_normal * offset;
                patch.apply_quantization(quan_normal, on_plane);
            }
        }

        // Projections moved with the centers; re-index if maps exist.
        if !self.cell_maps.is_empty() {
            let cameras = &self.cameras;
            for patch in self.patches.values_mut() {
                patch.refresh_projections(cameras);
            }
            let _ = self.set_cell_maps();
        }
    }
}

/// Normalize into [0, 1] and round onto `num` bins; a zero range collapses
/// to bin 0.
fn bin_index(value: f64, min: f64, range: f64, num: usize) -> usize {
    if range <= f64::EPSILON || num <= 1 {
        return 0;
    }
    let normalized = (value - min) / range;
    let idx = (normalized * (num - 1) as f64).round();
    (idx.max(0.0) as usize).min(num - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraIntrinsics};
    use crate::config::MvsParams;
    use crate::patch::Patch;
    use crate::image::ImageU8;
    use nalgebra::{Matrix3, Vector3};

    fn engine_with_tilted_patches() -> Mvs {
        let mut engine = Mvs::new(MvsParams {
            min_cam_num: 2,
            ..Default::default()
        })
        .unwrap();
        let data = vec![128u8; 64 * 64];
        for i in 0..2 {
            let img = ImageU8 {
                w: 64,
                h: 64,
                stride: 64,
                data: &data,
            };
            engine.add_camera(
                Camera::new(
                    format!("cam{i}"),
                    format!("cam{i}.png"),
                    CameraIntrinsics {
                        fx: 64.0,
                        fy: 64.0,
                        cx: 32.0,
                        cy: 32.0,
                    },
                    Matrix3::identity(),
                    Vector3::new(-0.2 * i as f64, 0.0, 0.0),
                    img,
                    3,
                )
                .unwrap(),
            );
        }
        for (id, tilt) in [(0u32, 0.00), (1, 0.02), (2, -0.015), (3, 0.01)] {
            let center = Vector3::new(0.1 * id as f64, 0.0, 3.0 + tilt);
            let normal = Vector3::new(tilt, 0.0, -1.0).normalize();
            let cam_indices = vec![0usize, 1];
            let projections = cam_indices
                .iter()
                .map(|&ci| engine.cameras()[ci].project(&center).unwrap())
                .collect();
            engine.adopt_patch(Patch::from_parts(
                id,
                center,
                normal,
                0.01,
                0,
                0,
                cam_indices,
                projections,
                0.2,
                0.9,
                0.25,
                false,
                None,
            ));
        }
        engine
    }

    #[test]
    fn single_bin_collapses_normals_and_planes() {
        let mut engine = engine_with_tilted_patches();
        engine.patch_quantization(1, 1, 1);

        let mut normals = engine.patches().map(|p| *p.normal());
        let first = normals.next().unwrap();
        for n in normals {
            assert!((n - first).norm() < 1e-12);
        }
        let dists: Vec<f64> = engine
            .patches()
            .map(|p| -p.normal().dot(p.center()))
            .collect();
        for d in &dists {
            assert!(
                (d - dists[0]).abs() < 1e-9,
                "plane distances diverge: {dists:?}"
            );
        }
    }

    #[test]
    fn quantized_normals_stay_unit_and_spherical_agrees() {
        let mut engine = engine_with_tilted_patches();
        engine.patch_quantization(2, 2, 2);
        for patch in engine.patches() {
            assert!((patch.normal().norm() - 1.0).abs() < 1e-9);
            let back = spherical_to_normal(patch.spherical_normal());
            assert!((back - patch.normal()).norm() < 1e-9);
        }
    }

    #[test]
    fn bin_index_handles_degenerate_ranges() {
        assert_eq!(bin_index(1.0, 1.0, 0.0, 8), 0);
        assert_eq!(bin_index(0.5, 0.0, 1.0, 1), 0);
        assert_eq!(bin_index(1.0, 0.0, 1.0, 4), 3);
        assert_eq!(bin_index(0.0, 0.0, 1.0, 4), 0);
    }
}
