//! Oriented surface patches and their refinement.
//!
//! Overview
//! - A patch is a planar disc with a world center, unit normal (kept in both
//!   Cartesian and spherical form), a level-of-detail, and an ordered set of
//!   visible cameras with level-0 projections of the center.
//! - `refine` drives a bounded particle-swarm over (theta, phi, ray depth)
//!   against the photo-consistency cost of `photo`, restarting when the
//!   level-of-detail changes, then refreshes metrics and projections.
//! - `remove_invisible_cameras` prunes views that disagree with the
//!   reference view or face the patch's back side.
//! - `recenter` re-triangulates the center from the stored projections
//!   (used after loading sparse seeds) without touching the normal.
//!
//! The patch's `scale` — the world step between adjacent window samples —
//! is fixed at construction and inherited by expansion children; it anchors
//! both LOD selection and the neighbor test.

pub(crate) mod optimizer;
pub(crate) mod photo;
pub mod spherical;

use crate::camera::Camera;
use crate::config::MvsParams;
use crate::kernel::PatchDistanceKernel;
use nalgebra::{DMatrix, Vector2, Vector3};
use photo::PatchGeometry;
use spherical::{normal_to_spherical, spherical_to_normal};
use std::f64::consts::FRAC_PI_4;

/// Shared read-only state handed to patch refinement.
#[derive(Clone, Copy)]
pub struct RefineContext<'a> {
    pub cameras: &'a [Camera],
    pub kernel: &'a PatchDistanceKernel,
    pub params: &'a MvsParams,
}

/// Oriented surface element.
#[derive(Clone, Debug)]
pub struct Patch {
    id: u32,
    center: Vector3<f64>,
    normal: Vector3<f64>,
    spherical: Vector2<f64>,
    scale: f64,
    lod: usize,
    ref_cam: usize,
    cam_indices: Vec<usize>,
    projections: Vec<Vector2<f64>>,
    fitness: f64,
    correlation: f64,
    priority: f64,
    expanded: bool,
    dropped: bool,
    parent: Option<u32>,
}

impl Patch {
    /// Build a seed patch from a sparse 3D point and the cameras observing
    /// it. Cameras the center does not project into are dropped up front.
    pub fn new_seed(
        id: u32,
        center: Vector3<f64>,
        cam_indices: Vec<usize>,
        ctx: &RefineContext<'_>,
    ) -> Self {
        let mut toward = Vector3::zeros();
        for &ci in &cam_indices {
            let dir = ctx.cameras[ci].center() - center;
            if dir.norm_squared() > 1e-18 {
                toward += dir.normalize();
            }
        }
        let normal = if toward.norm_squared() > 1e-18 {
            toward.normalize()
        } else {
            Vector3::z()
        };

        let mut patch = Self {
            id,
            center,
            normal,
            spherical: normal_to_spherical(&normal),
            scale: 0.0,
            lod: ctx.params.min_lod,
            ref_cam: cam_indices.first().copied().unwrap_or(0),
            cam_indices,
            projections: Vec::new(),
            fitness: f64::NAN,
            correlation: f64::NAN,
            priority: f64::NAN,
            expanded: false,
            dropped: false,
            parent: None,
        };
        patch.retain_projectable(ctx.cameras);
        patch.choose_reference(ctx.cameras);
        if let Some(ref_cam) = patch.reference_camera_ref(ctx.cameras) {
            let k = ref_cam.intrinsics();
            patch.scale = ctx.params.lod_ratio * ref_cam.depth(&patch.center) / k.fx.abs();
        }
        patch.lod = patch.select_lod(ctx);
        patch
    }

    /// Build an expansion child: inherits the parent's normal, visible
    /// cameras and sampling scale.
    pub fn new_expansion(id: u32, center: Vector3<f64>, parent: &Patch, cameras: &[Camera]) -> Self {
        let mut patch = Self {
            id,
            center,
            normal: parent.normal,
            spherical: parent.spherical,
            scale: parent.scale,
            lod: parent.lod,
            ref_cam: parent.ref_cam,
            cam_indices: parent.cam_indices.clone(),
            projections: Vec::new(),
            fitness: f64::NAN,
            correlation: f64::NAN,
            priority: f64::NAN,
            expanded: false,
            dropped: false,
            parent: Some(parent.id),
        };
        patch.retain_projectable(cameras);
        patch
    }

    /// Reassemble a patch from persisted state (native snapshot).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: u32,
        center: Vector3<f64>,
        normal: Vector3<f64>,
        scale: f64,
        lod: usize,
        ref_cam: usize,
        cam_indices: Vec<usize>,
        projections: Vec<Vector2<f64>>,
        fitness: f64,
        correlation: f64,
        priority: f64,
        expanded: bool,
        parent: Option<u32>,
    ) -> Self {
        Self {
            id,
            center,
            normal,
            spherical: normal_to_spherical(&normal),
            scale,
            lod,
            ref_cam,
            cam_indices,
            projections,
            fitness,
            correlation,
            priority,
            expanded,
            dropped: false,
            parent,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    pub fn spherical_normal(&self) -> &Vector2<f64> {
        &self.spherical
    }

    /// World step between adjacent window samples.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn lod(&self) -> usize {
        self.lod
    }

    /// Global index of the reference camera.
    pub fn reference_camera(&self) -> usize {
        self.ref_cam
    }

    pub fn camera_indices(&self) -> &[usize] {
        &self.cam_indices
    }

    /// Level-0 projections of the center, parallel to `camera_indices`.
    pub fn projections(&self) -> &[Vector2<f64>] {
        &self.projections
    }

    pub fn camera_number(&self) -> usize {
        self.cam_indices.len()
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn correlation(&self) -> f64 {
        self.correlation
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    pub fn set_expanded(&mut self) {
        self.expanded = true;
    }

    pub(crate) fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    /// Two patches are neighbors when each center lies close to the other's
    /// tangent plane, with the threshold derived from their sampling scales.
    pub fn is_neighbor(a: &Patch, b: &Patch) -> bool {
        let offset = b.center - a.center;
        let d1 = offset.dot(&a.normal).abs();
        let d2 = offset.dot(&b.normal).abs();
        let threshold = a.scale + b.scale;
        d1 < threshold && d2 < threshold
    }

    /// Adjust center and normal to maximise photo-consistency across the
    /// visible cameras, then refresh metrics and projections.
    ///
    /// The swarm restarts whenever the selected level-of-detail changes; the
    /// loop is bounded by the LOD range. Fitness never increases relative to
    /// the incoming geometry.
    pub fn refine(&mut self, ctx: &RefineContext<'_>) {
        if self.cam_indices.len() < 2 || self.scale <= 0.0 {
            self.invalidate_metrics();
            return;
        }
        self.choose_reference(ctx.cameras);
        let mut lod = self.select_lod(ctx);
        let max_restarts = ctx.params.max_lod - ctx.params.min_lod + 1;
        for _ in 0..max_restarts {
            self.lod = lod;
            self.optimize(ctx);
            self.choose_reference(ctx.cameras);
            let next = self.select_lod(ctx);
            if next == lod {
                break;
            }
            lod = next;
        }
        self.lod = lod;
        self.update_metrics(ctx);
        self.update_projections(ctx.cameras);
    }

    /// Drop non-reference views whose correlation with the reference view
    /// falls below `visible_correlation` or that face the patch's back side,
    /// then refresh metrics over the surviving set.
    pub fn remove_invisible_cameras(&mut self, ctx: &RefineContext<'_>) {
        let Some(eval) = photo::evaluate(
            ctx.cameras,
            ctx.kernel,
            &self.cam_indices,
            self.ref_cam,
            &self.geometry(),
            ctx.params.texture_variation,
            ctx.params.diff_weighting,
        ) else {
            self.invalidate_metrics();
            return;
        };

        let mut kept_cams = Vec::with_capacity(self.cam_indices.len());
        let mut kept_proj = Vec::with_capacity(self.projections.len());
        for (i, &ci) in self.cam_indices.iter().enumerate() {
            let cam = &ctx.cameras[ci];
            let viewing = self.center - cam.center();
            let back_facing = viewing.dot(&self.normal) >= 0.0;
            let visible = ci == self.ref_cam
                || (eval.per_view_ncc[i] >= ctx.params.visible_correlation && !back_facing);
            if visible {
                kept_cams.push(ci);
                kept_proj.push(self.projections[i]);
            }
        }
        self.cam_indices = kept_cams;
        self.projections = kept_proj;
        self.update_metrics(ctx);
    }

    /// Re-triangulate the center from the stored projections (multi-view
    /// DLT). The normal is left untouched. No-op when fewer than two views
    /// are available or the solution is degenerate.
    pub fn recenter(&mut self, cameras: &[Camera]) {
        if self.cam_indices.len() < 2 {
            return;
        }
        let rows = 2 * self.cam_indices.len();
        let mut a = DMatrix::<f64>::zeros(rows, 4);
        for (i, (&ci, proj)) in self.cam_indices.iter().zip(&self.projections).enumerate() {
            let cam = &cameras[ci];
            let p0 = projection_row(cam, 0);
            let p1 = projection_row(cam, 1);
            let p2 = projection_row(cam, 2);
            for c in 0..4 {
                a[(2 * i, c)] = proj.x * p2[c] - p0[c];
                a[(2 * i + 1, c)] = proj.y * p2[c] - p1[c];
            }
        }
        let svd = a.svd(false, true);
        let Some(v_t) = svd.v_t else {
            return;
        };
        let smallest = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(v_t.nrows() - 1);
        let solution = v_t.row(smallest);
        let w = solution[3];
        if w.abs() < 1e-12 {
            return;
        }
        self.center = Vector3::new(solution[0] / w, solution[1] / w, solution[2] / w);
    }

    /// Snap normal and center to quantized representatives (Hough bin).
    pub(crate) fn apply_quantization(&mut self, normal: Vector3<f64>, center: Vector3<f64>) {
        self.normal = normal;
        self.spherical = normal_to_spherical(&normal);
        self.center = center;
    }

    /// Recompute the projections of a moved center, dropping cameras it no
    /// longer projects into.
    pub(crate) fn refresh_projections(&mut self, cameras: &[Camera]) {
        self.update_projections(cameras);
    }

    /// Replace the visible set with measured feature observations (used when
    /// loading sparse inputs, before re-triangulation).
    pub(crate) fn set_observations(
        &mut self,
        cam_indices: Vec<usize>,
        projections: Vec<Vector2<f64>>,
    ) {
        debug_assert_eq!(cam_indices.len(), projections.len());
        self.cam_indices = cam_indices;
        self.projections = projections;
        if !self.cam_indices.contains(&self.ref_cam) {
            if let Some(&first) = self.cam_indices.first() {
                self.ref_cam = first;
            }
        }
    }

    fn geometry(&self) -> PatchGeometry {
        PatchGeometry {
            center: self.center,
            normal: self.normal,
            scale: self.scale,
            lod: self.lod,
        }
    }

    fn invalidate_metrics(&mut self) {
        self.fitness = f64::NAN;
        self.correlation = f64::NAN;
        self.priority = f64::NAN;
    }

    fn reference_camera_ref<'a>(&self, cameras: &'a [Camera]) -> Option<&'a Camera> {
        cameras.get(self.ref_cam)
    }

    /// Keep only cameras the center projects into, in lockstep with the
    /// projection list.
    fn retain_projectable(&mut self, cameras: &[Camera]) {
        let center = self.center;
        let mut kept_cams = Vec::with_capacity(self.cam_indices.len());
        let mut kept_proj = Vec::with_capacity(self.cam_indices.len());
        for &ci in &self.cam_indices {
            if let Some(px) = cameras[ci].project(&center) {
                kept_cams.push(ci);
                kept_proj.push(px);
            }
        }
        self.cam_indices = kept_cams;
        self.projections = kept_proj;
        if !self.cam_indices.contains(&self.ref_cam) {
            if let Some(&first) = self.cam_indices.first() {
                self.ref_cam = first;
            }
        }
    }

    /// Pick the visible camera most aligned with the normal.
    fn choose_reference(&mut self, cameras: &[Camera]) {
        let mut best = None;
        let mut best_dot = f64::NEG_INFINITY;
        for &ci in &self.cam_indices {
            let dir = cameras[ci].center() - self.center;
            if dir.norm_squared() < 1e-18 {
                continue;
            }
            let dot = dir.normalize().dot(&self.normal);
            if dot > best_dot {
                best_dot = dot;
                best = Some(ci);
            }
        }
        if let Some(ci) = best {
            self.ref_cam = ci;
        }
    }

    /// Level at which the projected disc diameter is about
    /// `patch_size · lod_ratio` level-0 pixels.
    fn select_lod(&self, ctx: &RefineContext<'_>) -> usize {
        let Some(ref_cam) = self.reference_camera_ref(ctx.cameras) else {
            return ctx.params.min_lod;
        };
        let depth = ref_cam.depth(&self.center);
        if depth < 1e-12 || self.scale <= 0.0 {
            return ctx.params.min_lod;
        }
        let fx = ref_cam.intrinsics().fx.abs();
        let projected = self.scale * ctx.params.patch_size() as f64 * fx / depth;
        let target = ctx.params.patch_size() as f64 * ctx.params.lod_ratio;
        let lod = (projected / target).log2().round();
        let lod = if lod.is_finite() { lod.max(0.0) as usize } else { 0 };
        lod.clamp(ctx.params.min_lod, ctx.params.max_lod)
    }

    fn optimize(&mut self, ctx: &RefineContext<'_>) {
        let Some(ref_cam) = self.reference_camera_ref(ctx.cameras) else {
            return;
        };
        let offset = self.center - ref_cam.center();
        let d0 = offset.norm();
        if d0 < 1e-12 {
            return;
        }
        let ray = offset / d0;
        let ref_center = *ref_cam.center();

        let mean_dist = self
            .cam_indices
            .iter()
            .map(|&ci| ctx.cameras[ci].depth(&self.center))
            .sum::<f64>()
            / self.cam_indices.len() as f64;
        let half_range = ctx.params.depth_range_scalar * mean_dist;

        let s = self.spherical;
        let bounds = optimizer::SearchBounds {
            lo: [s.x - FRAC_PI_4, s.y - FRAC_PI_4, (d0 - half_range).max(1e-9)],
            hi: [s.x + FRAC_PI_4, s.y + FRAC_PI_4, d0 + half_range],
        };

        let cam_indices = &self.cam_indices;
        let reference = self.ref_cam;
        let scale = self.scale;
        let lod = self.lod;
        let objective = |x: &[f64; 3]| {
            let normal = spherical_to_normal(&Vector2::new(x[0], x[1]));
            let center = ref_center + ray * x[2];
            photo::fitness_of(
                ctx.cameras,
                ctx.kernel,
                cam_indices,
                reference,
                &PatchGeometry {
                    center,
                    normal,
                    scale,
                    lod,
                },
                ctx.params.texture_variation,
                ctx.params.diff_weighting,
            )
        };
        let (best, _) = optimizer::minimize(
            u64::from(self.id),
            ctx.params.particle_num,
            ctx.params.max_iteration,
            bounds,
            [s.x, s.y, d0],
            objective,
        );

        self.spherical = Vector2::new(best[0], best[1]);
        self.normal = spherical_to_normal(&self.spherical);
        self.center = ref_center + ray * best[2];
    }

    fn update_metrics(&mut self, ctx: &RefineContext<'_>) {
        match photo::evaluate(
            ctx.cameras,
            ctx.kernel,
            &self.cam_indices,
            self.ref_cam,
            &self.geometry(),
            ctx.params.texture_variation,
            ctx.params.diff_weighting,
        ) {
            Some(eval) => {
                self.fitness = eval.fitness;
                self.correlation = eval.correlation;
                self.priority = if eval.correlation > 0.0 && eval.fitness.is_finite() {
                    eval.fitness / eval.correlation
                } else {
                    f64::INFINITY
                };
            }
            None => self.invalidate_metrics(),
        }
    }

    fn update_projections(&mut self, cameras: &[Camera]) {
        self.retain_projectable(cameras);
        if !self.cam_indices.contains(&self.ref_cam) {
            self.invalidate_metrics();
        }
    }
}

fn rt_row(cam: &Camera, r: usize, c: usize) -> f64 {
    if c < 3 {
        cam.rotation()[(r, c)]
    } else {
        cam.translation()[r]
    }
}

/// Row `r` of the 3×4 projection matrix `K·[R|t]`.
fn projection_row(cam: &Camera, r: usize) -> [f64; 4] {
    let k = cam.intrinsics();
    let mut out = [0.0; 4];
    for (c, entry) in out.iter_mut().enumerate() {
        *entry = match r {
            0 => k.fx * rt_row(cam, 0, c) + k.cx * rt_row(cam, 2, c),
            1 => k.fy * rt_row(cam, 1, c) + k.cy * rt_row(cam, 2, c),
            _ => rt_row(cam, 2, c),
        };
    }
    out
}
