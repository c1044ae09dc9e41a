//! Runtime filter and the post-expansion filter cascade.
//!
//! The runtime filter gates every insert and every expansion pop. The
//! post-expansion passes run in sequence, each mutating the reconstruction:
//! cell filtering (photometric dominance inside one cell), neighbor-cell
//! filtering (local surface-support ratio), visibility filtering (occlusion
//! by nearer patches in the same cell) and k-NN filtering (spatial and
//! normal-coherence outliers). The k-NN pass is parallel over patches with
//! per-task verdicts merged serially.

use super::Mvs;
use crate::patch::Patch;
use log::debug;
use nalgebra::Vector3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Offsets of the 3×3 cell neighborhood, each visited exactly once.
const NEIGHBOR_9: [(i64, i64); 9] = [
    (0, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl Mvs {
    /// Gate applied to every inserted or popped patch.
    ///
    /// All clauses must hold: live, enough cameras, sane finite metrics, the
    /// center projects onto foreground in every camera, enough front-facing
    /// views, and (once cell maps exist) at least one visible cell with room
    /// unless the patch already occupies one.
    pub fn runtime_filtering(&self, patch: &Patch) -> bool {
        if patch.is_dropped() {
            return false;
        }
        if patch.camera_number() < self.params.min_cam_num {
            return false;
        }
        let fitness = patch.fitness();
        if !(fitness > 0.0) || fitness > self.params.max_fitness {
            return false;
        }
        if !(patch.priority() <= 10000.0) {
            return false;
        }
        if !(patch.correlation() >= self.params.min_correlation) {
            return false;
        }

        // The center must land on foreground in every camera, visible or not.
        for cam in &self.cameras {
            let Some(px) = cam.project(patch.center()) else {
                return false;
            };
            if cam.is_background(px.x, px.y) {
                return false;
            }
        }

        let front_facing = patch
            .camera_indices()
            .iter()
            .filter(|&&ci| patch.normal().dot(&-self.cameras[ci].optical_axis()) > 0.0)
            .count();
        if front_facing < self.params.min_cam_num {
            return false;
        }

        // Cell saturation: inactive until the cell maps exist (seed stage).
        if self.cell_maps.is_empty() {
            return true;
        }
        let mut full_cells = 0usize;
        for (i, &ci) in patch.camera_indices().iter().enumerate() {
            let p = patch.projections()[i];
            let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
            let cell = self.cell_maps[ci].get_cell(cx, cy);
            if cell.contains(&patch.id()) {
                return true;
            }
            if cell.len() >= self.params.max_cell_patch_num {
                full_cells += 1;
            }
        }
        full_cells < patch.camera_number()
    }

    /// Remove patches dominated by their cell mates: a patch goes when its
    /// correlation times its camera count is below the summed correlation of
    /// the other occupants.
    pub fn cell_filtering(&mut self) {
        if self.cell_maps.is_empty() {
            return;
        }
        let before = self.patches.len();
        for cam_idx in 0..self.cameras.len() {
            let (width, height) = {
                let map = &self.cell_maps[cam_idx];
                (map.width(), map.height())
            };
            for cy in 0..height as i64 {
                for cx in 0..width as i64 {
                    let cell: Vec<u32> = self.cell_maps[cam_idx].get_cell(cx, cy).to_vec();
                    let mut remove = Vec::new();
                    for &id in &cell {
                        let Some(patch) = self.patches.get(&id) else {
                            debug_assert!(false, "cell references unknown patch {id}");
                            continue;
                        };
                        let corr_sum: f64 = cell
                            .iter()
                            .filter(|&&other| other != id)
                            .filter_map(|other| self.patches.get(other))
                            .map(|p| p.correlation())
                            .sum();
                        if patch.correlation() * (patch.camera_number() as f64) < corr_sum {
                            remove.push(id);
                        }
                    }
                    for id in remove {
                        self.delete_patch(id);
                    }
                }
            }
        }
        debug!("cell filtering: {} -> {}", before, self.patches.len());
    }

    /// Remove patches whose 3×3 cell neighborhood offers too little surface
    /// support: the fraction of neighborhood patches passing the neighbor
    /// test must reach `neighbor_ratio` in every visible view.
    pub fn neighbor_cell_filtering(&mut self, neighbor_ratio: f64) {
        if self.cell_maps.is_empty() {
            return;
        }
        let before = self.patches.len();
        for cam_idx in 0..self.cameras.len() {
            let (width, height) = {
                let map = &self.cell_maps[cam_idx];
                (map.width(), map.height())
            };
            for cy in 0..height as i64 {
                for cx in 0..width as i64 {
                    let cell: Vec<u32> = self.cell_maps[cam_idx].get_cell(cx, cy).to_vec();
                    let mut remove = Vec::new();
                    for &id in &cell {
                        let Some(center_patch) = self.patches.get(&id) else {
                            continue;
                        };
                        let mut total = 0usize;
                        let mut neighbors = 0usize;
                        for (dx, dy) in NEIGHBOR_9 {
                            let (nx, ny) = (cx + dx, cy + dy);
                            if !self.cell_maps[cam_idx].in_map(nx, ny) {
                                continue;
                            }
                            for other in self.cell_maps[cam_idx].get_cell(nx, ny) {
                                let Some(neighbor) = self.patches.get(other) else {
                                    continue;
                                };
                                total += 1;
                                if Patch::is_neighbor(center_patch, neighbor) {
                                    neighbors += 1;
                                }
                            }
                        }
                        if total > 0 && (neighbors as f64) / (total as f64) < neighbor_ratio {
                            remove.push(id);
                        }
                    }
                    for id in remove {
                        self.delete_patch(id);
                    }
                }
            }
        }
        debug!(
            "neighbor cell filtering: {} -> {}",
            before,
            self.patches.len()
        );
    }

    /// Remove patches occluded in too many views: a visible view stops
    /// counting when another patch in the same cell is closer to the camera.
    pub fn visibility_filtering(&mut self) {
        if self.cell_maps.is_empty() {
            return;
        }
        let before = self.patches.len();
        let ids: Vec<u32> = self.patches.keys().copied().collect();
        for id in ids {
            let Some(patch) = self.patches.get(&id) else {
                continue;
            };
            let mut visible = patch.camera_number();
            for (i, &ci) in patch.camera_indices().iter().enumerate() {
                let cam = &self.cameras[ci];
                let depth = cam.depth(patch.center());
                let p = patch.projections()[i];
                let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
                for &other in self.cell_maps[ci].get_cell(cx, cy) {
                    if other == id {
                        continue;
                    }
                    let Some(occluder) = self.patches.get(&other) else {
                        continue;
                    };
                    if cam.depth(occluder.center()) < depth {
                        visible -= 1;
                        break;
                    }
                }
            }
            if visible < self.params.min_cam_num {
                self.delete_patch(id);
            }
        }
        debug!(
            "visibility filtering: {} -> {}",
            before,
            self.patches.len()
        );
    }

    /// Remove spatial outliers via the `local_k` nearest neighbors: too far
    /// from the cloud, or with incoherent normals. Parallel over patches;
    /// deletions are merged serially afterwards.
    pub fn neighbor_patch_filtering(&mut self) {
        let local_k = self.params.local_k;
        if self.patches.len() <= local_k {
            return;
        }
        let before = self.patches.len();

        let points: Vec<PatchSite> = self
            .patches
            .values()
            .map(|p| PatchSite {
                id: p.id(),
                position: [p.center().x, p.center().y, p.center().z],
                normal: *p.normal(),
            })
            .collect();
        let tree = RTree::bulk_load(points.clone());

        let neighbor_radius = self.params.neighbor_radius;
        let visible_correlation = self.params.visible_correlation;
        let judge = |site: &PatchSite| -> Option<u32> {
            let mut sum_dist = 0.0;
            let mut sum_corr = 0.0;
            let mut taken = 0usize;
            for neighbor in tree
                .nearest_neighbor_iter(&site.position)
                .filter(|n| n.id != site.id)
                .take(local_k)
            {
                let d = site.distance_to(neighbor);
                sum_dist += d;
                sum_corr += site.normal.dot(&neighbor.normal);
                taken += 1;
            }
            if taken == 0 {
                return None;
            }
            let avg_dist = sum_dist / taken as f64;
            let avg_corr = sum_corr / taken as f64;
            (avg_dist > neighbor_radius || avg_corr < visible_correlation).then_some(site.id)
        };

        #[cfg(feature = "parallel")]
        let verdicts: Vec<Option<u32>> = points.par_iter().map(judge).collect();
        #[cfg(not(feature = "parallel"))]
        let verdicts: Vec<Option<u32>> = points.iter().map(judge).collect();

        for id in verdicts.into_iter().flatten() {
            self.delete_patch(id);
        }
        debug!(
            "neighbor patch filtering: {} -> {}",
            before,
            self.patches.len()
        );
    }
}

/// R-tree site for the k-NN filter: a patch center with its id and normal.
#[derive(Clone, Debug)]
struct PatchSite {
    id: u32,
    position: [f64; 3],
    normal: Vector3<f64>,
}

impl PatchSite {
    fn distance_to(&self, other: &PatchSite) -> f64 {
        let dx = self.position[0] - other.position[0];
        let dy = self.position[1] - other.position[1];
        let dz = self.position[2] - other.position[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl RTreeObject for PatchSite {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for PatchSite {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        let dz = self.position[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}
