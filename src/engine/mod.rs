//! MVS engine orchestrating seed refinement, expansion and filtering.
//!
//! Overview
//! - Owns the cameras, the id-keyed patch map, the per-camera cell maps and
//!   the expansion priority queue. Cells store ids only; patches live in a
//!   single `BTreeMap` so iteration order is deterministic.
//! - `refine_seed_patches` refines and prunes the sparse seeds before any
//!   cell map exists.
//! - `expand_patches` (see `expansion`) builds the cell maps and queue, then
//!   runs the best-first propagation loop.
//! - The filter cascade (see `filters`) and quantization (see
//!   `quantization`) run after expansion.
//!
//! Modules
//! - `expansion` – priority queue and neighbor-cell propagation.
//! - `filters` – runtime filter plus the post-expansion cascade.
//! - `quantization` – Hough-space snapping of normals and plane distances.

mod expansion;
mod filters;
mod quantization;

use crate::camera::Camera;
use crate::cellmap::CellMap;
use crate::config::MvsParams;
use crate::error::{MvsError, Result};
use crate::kernel::PatchDistanceKernel;
use crate::patch::{Patch, RefineContext};
use log::{debug, warn};
use nalgebra::{Vector2, Vector3};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A full reconstruction job: cameras, patches, spatial index and tunables.
pub struct Mvs {
    params: MvsParams,
    kernel: PatchDistanceKernel,
    cameras: Vec<Camera>,
    patches: BTreeMap<u32, Patch>,
    cell_maps: Vec<CellMap>,
    queue: Vec<u32>,
    next_id: u32,
    checkpoint_path: Option<PathBuf>,
}

impl Mvs {
    /// Create an engine, validating the configuration and emitting the
    /// startup report.
    pub fn new(params: MvsParams) -> Result<Self> {
        params.validate()?;
        params.report();
        let kernel = PatchDistanceKernel::new(params.patch_radius, params.dist_weighting);
        Ok(Self {
            params,
            kernel,
            cameras: Vec::new(),
            patches: BTreeMap::new(),
            cell_maps: Vec::new(),
            queue: Vec::new(),
            next_id: 0,
            checkpoint_path: None,
        })
    }

    pub fn params(&self) -> &MvsParams {
        &self.params
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Register a camera; returns its index.
    pub fn add_camera(&mut self, camera: Camera) -> usize {
        self.cameras.push(camera);
        self.cameras.len() - 1
    }

    /// Periodic checkpoint target used during expansion.
    pub fn set_checkpoint_path(&mut self, path: Option<PathBuf>) {
        self.checkpoint_path = path;
    }

    pub(crate) fn checkpoint_path(&self) -> Option<&PathBuf> {
        self.checkpoint_path.as_ref()
    }

    pub fn patch(&self, id: u32) -> Option<&Patch> {
        self.patches.get(&id)
    }

    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Allocate a fresh patch id; ids are never reused within a session.
    pub(crate) fn next_patch_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn bump_next_id(&mut self, floor: u32) {
        self.next_id = self.next_id.max(floor);
    }

    pub(crate) fn refine_context(&self) -> RefineContext<'_> {
        RefineContext {
            cameras: &self.cameras,
            kernel: &self.kernel,
            params: &self.params,
        }
    }

    /// Create a seed patch from a sparse point and its observing cameras.
    /// Returns the assigned id.
    pub fn add_seed(&mut self, center: Vector3<f64>, cam_indices: Vec<usize>) -> u32 {
        let id = self.next_patch_id();
        let ctx = RefineContext {
            cameras: &self.cameras,
            kernel: &self.kernel,
            params: &self.params,
        };
        let patch = Patch::new_seed(id, center, cam_indices, &ctx);
        self.patches.insert(id, patch);
        id
    }

    /// Create a seed patch whose visible set comes from measured feature
    /// observations (sparse-input loading) rather than reprojection.
    pub(crate) fn add_seed_observed(
        &mut self,
        center: Vector3<f64>,
        cam_indices: Vec<usize>,
        projections: Vec<Vector2<f64>>,
    ) -> u32 {
        let id = self.next_patch_id();
        let ctx = RefineContext {
            cameras: &self.cameras,
            kernel: &self.kernel,
            params: &self.params,
        };
        let mut patch = Patch::new_seed(id, center, cam_indices.clone(), &ctx);
        patch.set_observations(cam_indices, projections);
        self.patches.insert(id, patch);
        id
    }

    /// Insert a restored patch verbatim (snapshot loading).
    pub(crate) fn adopt_patch(&mut self, patch: Patch) {
        self.bump_next_id(patch.id() + 1);
        self.patches.insert(patch.id(), patch);
    }

    /// Allocate one empty cell map per camera.
    ///
    /// Fails with a configuration error when no cameras are registered.
    pub fn init_cell_maps(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(MvsError::Config(
                "cannot initialize cell maps without cameras".into(),
            ));
        }
        self.cell_maps = self
            .cameras
            .iter()
            .map(|cam| CellMap::new(cam.width(), cam.height(), self.params.cell_size))
            .collect();
        Ok(())
    }

    /// Allocate cell maps and project every current patch into the cells of
    /// its visible views.
    pub fn set_cell_maps(&mut self) -> Result<()> {
        self.init_cell_maps()?;
        for patch in self.patches.values() {
            for (i, &ci) in patch.camera_indices().iter().enumerate() {
                let p = patch.projections()[i];
                let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
                self.cell_maps[ci].insert(cx, cy, patch.id());
            }
        }
        Ok(())
    }

    /// Enumerate all patches into the priority queue.
    pub fn init_priority_queue(&mut self) {
        self.queue = self.patches.keys().copied().collect();
    }

    /// Re-triangulate every patch center from its stored projections
    /// (canonicalizes seed geometry after loading).
    pub fn recenter_patches(&mut self) {
        let cameras = &self.cameras;
        for patch in self.patches.values_mut() {
            patch.recenter(cameras);
        }
        debug!("re-triangulated {} patches", self.patches.len());
    }

    /// Refine all seed patches, dropping those with too few cameras or a
    /// failed runtime filter. Cell maps are not built yet, so the cell-full
    /// clause of the runtime filter is inactive here.
    pub fn refine_seed_patches(&mut self) {
        if self.patches.is_empty() {
            warn!("no seed patches to refine");
            return;
        }
        let ids: Vec<u32> = self.patches.keys().copied().collect();
        for id in ids {
            let Some(mut patch) = self.patches.remove(&id) else {
                continue;
            };
            if patch.camera_number() < self.params.min_cam_num {
                continue;
            }
            let ctx = RefineContext {
                cameras: &self.cameras,
                kernel: &self.kernel,
                params: &self.params,
            };
            patch.refine(&ctx);
            patch.remove_invisible_cameras(&ctx);
            if !self.runtime_filtering(&patch) {
                continue;
            }
            debug!(
                "seed {}: lod {} fitness {:.3} priority {:.3} cams {}",
                patch.id(),
                patch.lod(),
                patch.fitness(),
                patch.priority(),
                patch.camera_number()
            );
            self.patches.insert(id, patch);
        }
    }

    /// Insert a refined patch: runs the runtime filter, then registers it in
    /// the patch map, the priority queue and every visible view's cell.
    pub fn insert_patch(&mut self, patch: Patch) -> bool {
        if !self.runtime_filtering(&patch) {
            return false;
        }
        let id = patch.id();
        for (i, &ci) in patch.camera_indices().iter().enumerate() {
            let p = patch.projections()[i];
            let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
            self.cell_maps[ci].insert(cx, cy, id);
        }
        self.queue.push(id);
        debug!(
            "insert {}: fitness {:.3} priority {:.3} cams {}",
            id,
            patch.fitness(),
            patch.priority(),
            patch.camera_number()
        );
        self.patches.insert(id, patch);
        true
    }

    /// Remove a patch from the patch map and from every visible view's cell.
    /// The priority queue is cleaned lazily on pop.
    pub fn delete_patch(&mut self, id: u32) {
        let Some(mut patch) = self.patches.remove(&id) else {
            return;
        };
        patch.mark_dropped();
        if self.cell_maps.is_empty() {
            return;
        }
        for (i, &ci) in patch.camera_indices().iter().enumerate() {
            let p = patch.projections()[i];
            let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
            self.cell_maps[ci].drop(cx, cy, id);
        }
    }

    /// Verify the containment invariants between the patch map and the cell
    /// maps: every live patch is present in the cell of each of its visible
    /// views, and every id stored in a cell resolves to a live patch.
    pub fn check_invariants(&self) -> Result<()> {
        if self.cell_maps.is_empty() {
            return Ok(());
        }
        for patch in self.patches.values() {
            for (i, &ci) in patch.camera_indices().iter().enumerate() {
                let p = patch.projections()[i];
                let (cx, cy) = self.cell_maps[ci].cell_of(p.x, p.y);
                if self.cell_maps[ci].in_map(cx, cy)
                    && !self.cell_maps[ci].get_cell(cx, cy).contains(&patch.id())
                {
                    return Err(MvsError::Invariant(format!(
                        "patch {} missing from cell ({cx}, {cy}) of camera {ci}",
                        patch.id()
                    )));
                }
            }
        }
        for (ci, map) in self.cell_maps.iter().enumerate() {
            for cy in 0..map.height() as i64 {
                for cx in 0..map.width() as i64 {
                    for &id in map.get_cell(cx, cy) {
                        if !self.patches.contains_key(&id) {
                            return Err(MvsError::Invariant(format!(
                                "cell ({cx}, {cy}) of camera {ci} references unknown patch {id}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the full post-expansion cascade: cell, neighbor-cell, visibility
    /// and k-NN filtering.
    pub fn apply_filter_cascade(&mut self) {
        let before = self.patch_count();
        self.cell_filtering();
        self.neighbor_cell_filtering(self.params.min_region_ratio);
        self.visibility_filtering();
        self.neighbor_patch_filtering();
        debug!(
            "filter cascade: {} -> {} patches",
            before,
            self.patch_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraIntrinsics;
    use crate::image::ImageU8;
    use nalgebra::Matrix3;

    fn engine_with_patches() -> Mvs {
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
        for id in 0u32..3 {
            let center = Vector3::new(0.3 * id as f64 - 0.3, 0.0, 3.0);
            let cam_indices = vec![0usize, 1];
            let projections = cam_indices
                .iter()
                .map(|&ci| engine.cameras()[ci].project(&center).unwrap())
                .collect();
            engine.adopt_patch(Patch::from_parts(
                id,
                center,
                Vector3::new(0.0, 0.0, -1.0),
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
    fn init_cell_maps_fails_without_cameras() {
        let mut engine = Mvs::new(MvsParams::default()).unwrap();
        assert!(matches!(
            engine.init_cell_maps(),
            Err(MvsError::Config(_))
        ));
    }

    #[test]
    fn cell_maps_and_patch_map_stay_consistent() {
        let mut engine = engine_with_patches();
        engine.set_cell_maps().unwrap();
        engine.check_invariants().unwrap();
    }

    #[test]
    fn delete_patch_removes_map_and_cell_entries() {
        let mut engine = engine_with_patches();
        engine.set_cell_maps().unwrap();

        engine.delete_patch(1);
        assert!(engine.patch(1).is_none());
        engine.check_invariants().unwrap();
        for map in &engine.cell_maps {
            for cy in 0..map.height() as i64 {
                for cx in 0..map.width() as i64 {
                    assert!(!map.get_cell(cx, cy).contains(&1));
                }
            }
        }
    }

    #[test]
    fn patch_ids_are_never_reused() {
        let mut engine = engine_with_patches();
        let next = engine.next_patch_id();
        assert_eq!(next, 3);
        engine.delete_patch(0);
        assert_eq!(engine.next_patch_id(), 4);
    }
}
