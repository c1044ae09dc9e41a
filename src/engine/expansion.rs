//! Best-first patch expansion.
//!
//! The priority queue is a flat vector of patch ids scanned linearly:
//! stale entries (expanded or deleted patches) are discarded lazily, the
//! minimum-priority survivor wins, and ties break toward the lowest id so
//! runs are reproducible. Each popped patch spawns candidate children in the
//! four 4-connected neighbor cells of its reference-view projection.

use super::Mvs;
use crate::error::Result;
use crate::patch::Patch;
use log::{debug, warn};
use nalgebra::Vector2;

const NEIGHBOR_4: [(i64, i64); 4] = [(-1, 0), (0, -1), (1, 0), (0, 1)];

impl Mvs {
    /// Run the expansion loop until no unexpanded patch remains.
    ///
    /// Builds the cell maps (projecting the refined seeds) and the priority
    /// queue first; checkpoints the reconstruction every
    /// `checkpoint_interval` expansions when a checkpoint path is set.
    pub fn expand_patches(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            warn!("expansion skipped: no cameras registered");
            return Ok(());
        }
        self.set_cell_maps()?;
        self.init_priority_queue();

        let mut count = 0usize;
        while let Some(id) = self.pop_top_priority() {
            let Some(patch) = self.patches.get_mut(&id) else {
                continue;
            };
            patch.set_expanded();
            let parent = patch.clone();
            debug!(
                "expand {}: fitness {:.3} priority {:.3} cams {} (queue {}, patches {})",
                id,
                parent.fitness(),
                parent.priority(),
                parent.camera_number(),
                self.queue.len(),
                self.patches.len()
            );

            if !self.runtime_filtering(&parent) {
                debug!("top priority patch {id} deleted");
                self.delete_patch(id);
                continue;
            }

            self.expand_neighbor_cells(&parent);

            count += 1;
            if count % self.params.checkpoint_interval == 0 {
                self.write_checkpoint();
            }
        }
        Ok(())
    }

    /// Pop the unexpanded patch with minimum priority; lowest id wins ties.
    /// Expanded, dropped and stale ids are removed during the scan.
    pub(crate) fn pop_top_priority(&mut self) -> Option<u32> {
        let patches = &self.patches;
        self.queue
            .retain(|id| matches!(patches.get(id), Some(p) if !p.is_expanded() && !p.is_dropped()));

        let mut best: Option<(f64, u32)> = None;
        for &id in &self.queue {
            let priority = self.patches[&id].priority();
            if priority.is_nan() {
                continue;
            }
            let better = match best {
                None => true,
                Some((bp, bid)) => priority < bp || (priority == bp && id < bid),
            };
            if better {
                best = Some((priority, id));
            }
        }
        let (_, id) = best?;
        if let Some(pos) = self.queue.iter().position(|&q| q == id) {
            self.queue.remove(pos);
        }
        Some(id)
    }

    /// Examine the four neighbor cells of the parent's reference-view
    /// projection and grow a child into each cell that wants one.
    fn expand_neighbor_cells(&mut self, parent: &Patch) {
        for (i, &ci) in parent.camera_indices().iter().enumerate() {
            if ci != parent.reference_camera() {
                continue;
            }
            let proj = parent.projections()[i];
            let (cx, cy) = self.cell_maps[ci].cell_of(proj.x, proj.y);

            for (dx, dy) in NEIGHBOR_4 {
                let (nx, ny) = (cx + dx, cy + dy);
                if !self.cell_maps[ci].in_map(nx, ny) {
                    continue;
                }
                if self.skip_neighbor_cell(ci, nx, ny, parent) {
                    continue;
                }
                self.expand_cell(ci, parent, nx, ny);
            }
        }
    }

    /// A neighbor cell is skipped when it is saturated, already holds a
    /// neighbor of the parent, or holds an established occupant (high
    /// correlation across a possible depth discontinuity).
    fn skip_neighbor_cell(&self, cam_idx: usize, cx: i64, cy: i64, parent: &Patch) -> bool {
        let cell = self.cell_maps[cam_idx].get_cell(cx, cy);
        if cell.len() >= self.params.max_cell_patch_num {
            return true;
        }
        for &id in cell {
            let Some(occupant) = self.patches.get(&id) else {
                debug_assert!(false, "cell references unknown patch {id}");
                continue;
            };
            if occupant.correlation() > self.params.min_correlation {
                return true;
            }
            if Patch::is_neighbor(parent, occupant) {
                return true;
            }
        }
        false
    }

    /// Unproject the cell's pixel center, intersect with the parent plane,
    /// refine the child and attempt insertion.
    fn expand_cell(&mut self, cam_idx: usize, parent: &Patch, cx: i64, cy: i64) {
        let cell_size = self.params.cell_size as f64;
        let pixel = Vector2::new(
            (cx as f64 + 0.5) * cell_size,
            (cy as f64 + 0.5) * cell_size,
        );

        let cam = &self.cameras[cam_idx];
        let ray = cam.unproject_ray(&pixel);
        let denom = parent.normal().dot(&ray);
        if denom.abs() < 1e-12 {
            return;
        }
        let along = parent.normal().dot(&(parent.center() - cam.center())) / denom;
        if along <= 0.0 {
            return;
        }
        let center = cam.center() + ray * along;

        let id = self.next_patch_id();
        let mut child = Patch::new_expansion(id, center, parent, &self.cameras);
        let ctx = self.refine_context();
        child.refine(&ctx);
        child.remove_invisible_cameras(&ctx);
        self.insert_patch(child);
    }

    /// Write the periodic reconstruction checkpoint. I/O failures here are
    /// non-structural: log and keep expanding.
    fn write_checkpoint(&self) {
        let Some(path) = self.checkpoint_path() else {
            return;
        };
        let snapshot = self.snapshot();
        if let Err(err) = crate::io::snapshot::write_mvs(path, &snapshot) {
            warn!("checkpoint to {} failed: {err}", path.display());
        } else {
            debug!(
                "checkpoint: {} patches -> {}",
                snapshot.patches.len(),
                path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::camera::{Camera, CameraIntrinsics};
    use crate::config::MvsParams;
    use crate::engine::Mvs;
    use crate::image::ImageU8;
    use crate::patch::Patch;
    use nalgebra::{Matrix3, Vector3};

    fn small_engine() -> Mvs {
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
            let cam = Camera::new(
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
            .unwrap();
            engine.add_camera(cam);
        }
        engine
    }

    fn adopt(engine: &mut Mvs, id: u32, priority: f64) {
        let center = Vector3::new(0.0, 0.0, 3.0);
        let cam_indices = vec![0usize, 1];
        let projections = cam_indices
            .iter()
            .map(|&ci| engine.cameras()[ci].project(&center).unwrap())
            .collect();
        let patch = Patch::from_parts(
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
            priority,
            false,
            None,
        );
        engine.adopt_patch(patch);
    }

    #[test]
    fn pop_orders_by_priority_with_lowest_id_tie_break() {
        let mut engine = small_engine();
        adopt(&mut engine, 0, 3.0);
        adopt(&mut engine, 1, 1.0);
        adopt(&mut engine, 2, 1.0);
        adopt(&mut engine, 3, 2.0);
        engine.init_priority_queue();

        assert_eq!(engine.pop_top_priority(), Some(1));
        assert_eq!(engine.pop_top_priority(), Some(2));
        assert_eq!(engine.pop_top_priority(), Some(3));
        assert_eq!(engine.pop_top_priority(), Some(0));
        assert_eq!(engine.pop_top_priority(), None);
    }

    #[test]
    fn pop_never_returns_expanded_patches() {
        let mut engine = small_engine();
        adopt(&mut engine, 0, 2.0);
        adopt(&mut engine, 1, 1.0);
        adopt(&mut engine, 2, 3.0);
        engine.init_priority_queue();
        engine.patches.get_mut(&1).unwrap().set_expanded();

        let mut popped = Vec::new();
        while let Some(id) = engine.pop_top_priority() {
            assert!(!engine.patches[&id].is_expanded());
            popped.push(id);
        }
        assert_eq!(popped, vec![0, 2]);
    }

    #[test]
    fn pop_discards_deleted_ids_lazily() {
        let mut engine = small_engine();
        adopt(&mut engine, 0, 1.0);
        adopt(&mut engine, 1, 2.0);
        engine.init_priority_queue();
        engine.patches.remove(&0);

        assert_eq!(engine.pop_top_priority(), Some(1));
        assert_eq!(engine.pop_top_priority(), None);
    }
}
