//! Photo-consistency of an oriented patch across its visible views.
//!
//! A patch samples a `(2·patch_radius+1)²` grid in its tangent plane,
//! projects every sample into each visible camera at the patch LOD, and
//! compares the bilinearly sampled intensities against the reference view
//! with normalized cross-correlation. The fitness term weights the NCC by
//! the precomputed Gaussian kernel; the correlation term is plain NCC.
//!
//! NaN fitness encodes an unusable window (reference samples out of bounds
//! or texture variance below the gate); the runtime filter deletes such
//! patches instead of propagating an error.

use crate::camera::Camera;
use crate::kernel::PatchDistanceKernel;
use nalgebra::Vector3;

/// Geometry of one evaluation: a candidate center/normal at a fixed scale.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PatchGeometry {
    pub center: Vector3<f64>,
    pub normal: Vector3<f64>,
    /// World step between adjacent tangent-plane samples.
    pub scale: f64,
    /// Pyramid level sampled in every view.
    pub lod: usize,
}

/// Full evaluation result.
#[derive(Clone, Debug)]
pub(crate) struct Evaluation {
    /// Mean over non-reference views of `1 − weighted NCC`.
    pub fitness: f64,
    /// Mean plain NCC over non-reference views.
    pub correlation: f64,
    /// Plain NCC per visible view (reference entry is 1.0; views that fail
    /// to sample get −1.0).
    pub per_view_ncc: Vec<f64>,
}

/// Orthonormal tangent basis of the patch plane, aligned with the reference
/// view's image x-axis so the sampling grid tracks the image rows.
pub(crate) fn tangent_basis(
    normal: &Vector3<f64>,
    reference: &Camera,
) -> (Vector3<f64>, Vector3<f64>) {
    let x_axis = reference.rotation().row(0).transpose();
    let mut dx = x_axis - normal * x_axis.dot(normal);
    if dx.norm_squared() < 1e-12 {
        let y_axis = reference.rotation().row(1).transpose();
        dx = y_axis - normal * y_axis.dot(normal);
    }
    let dx = dx.normalize();
    let dy = normal.cross(&dx).normalize();
    (dx, dy)
}

/// Sample the tangent grid of one view. `None` when any sample misses the
/// pyramid support.
fn sample_window(
    cam: &Camera,
    geom: &PatchGeometry,
    dx: &Vector3<f64>,
    dy: &Vector3<f64>,
    radius: i64,
    out: &mut Vec<f32>,
) -> bool {
    out.clear();
    for j in -radius..=radius {
        for i in -radius..=radius {
            let p =
                geom.center + dx * (geom.scale * i as f64) + dy * (geom.scale * j as f64);
            let pc = cam.rotation() * p + cam.translation();
            if pc.z <= 1e-12 {
                return false;
            }
            let k = cam.intrinsics();
            let u = k.fx * pc.x / pc.z + k.cx;
            let v = k.fy * pc.y / pc.z + k.cy;
            match cam.sample(geom.lod, u, v) {
                Some(value) => out.push(value),
                None => return false,
            }
        }
    }
    true
}

fn weighted_ncc(a: &[f32], b: &[f32], weights: &[f64]) -> f64 {
    let mut mean_a = 0.0;
    let mut mean_b = 0.0;
    for ((&x, &y), &w) in a.iter().zip(b).zip(weights) {
        mean_a += w * x as f64;
        mean_b += w * y as f64;
    }
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for ((&x, &y), &w) in a.iter().zip(b).zip(weights) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        cov += w * da * db;
        var_a += w * da * da;
        var_b += w * db * db;
    }
    if var_a < 1e-12 || var_b < 1e-12 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

fn plain_ncc(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a < 1e-12 || var_b < 1e-12 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Kernel-weighted variance of the reference window, used as the texture gate.
fn weighted_variance(a: &[f32], weights: &[f64]) -> f64 {
    let mean: f64 = a
        .iter()
        .zip(weights)
        .map(|(&x, &w)| w * x as f64)
        .sum();
    a.iter()
        .zip(weights)
        .map(|(&x, &w)| {
            let d = x as f64 - mean;
            w * d * d
        })
        .sum()
}

fn mean(a: &[f32]) -> f64 {
    a.iter().map(|&x| x as f64).sum::<f64>() / a.len() as f64
}

/// Fitness only, for the optimizer's inner loop. NaN windows map to +∞ so
/// the search can still compare candidates.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fitness_of(
    cameras: &[Camera],
    kernel: &PatchDistanceKernel,
    cam_indices: &[usize],
    reference: usize,
    geom: &PatchGeometry,
    texture_variation: f64,
    diff_weighting: f64,
) -> f64 {
    match evaluate(
        cameras,
        kernel,
        cam_indices,
        reference,
        geom,
        texture_variation,
        diff_weighting,
    ) {
        Some(eval) if eval.fitness.is_finite() => eval.fitness,
        _ => f64::INFINITY,
    }
}

/// Full photo-consistency evaluation. `None` when the reference window
/// cannot be sampled or its texture variance falls below the gate.
///
/// Each non-reference view's fitness contribution is down-weighted by a
/// Gaussian of its mean-brightness difference against the reference
/// (`diff_weighting` sigma), so views across exposure changes count less.
#[allow(clippy::too_many_arguments)]
pub(crate) fn evaluate(
    cameras: &[Camera],
    kernel: &PatchDistanceKernel,
    cam_indices: &[usize],
    reference: usize,
    geom: &PatchGeometry,
    texture_variation: f64,
    diff_weighting: f64,
) -> Option<Evaluation> {
    let radius = (kernel.patch_size() / 2) as i64;
    let ref_cam = &cameras[reference];
    let (dx, dy) = tangent_basis(&geom.normal, ref_cam);

    let mut ref_window = Vec::with_capacity(kernel.patch_size() * kernel.patch_size());
    if !sample_window(ref_cam, geom, &dx, &dy, radius, &mut ref_window) {
        return None;
    }
    if weighted_variance(&ref_window, kernel.weights()) < texture_variation {
        return None;
    }
    let ref_mean = mean(&ref_window);
    let diff_s2 = 1.0 / (2.0 * diff_weighting * diff_weighting);

    let mut per_view_ncc = Vec::with_capacity(cam_indices.len());
    let mut fitness_sum = 0.0;
    let mut weight_sum = 0.0;
    let mut corr_sum = 0.0;
    let mut others = 0usize;
    let mut window = Vec::with_capacity(ref_window.len());

    for &ci in cam_indices {
        if ci == reference {
            per_view_ncc.push(1.0);
            continue;
        }
        let cam = &cameras[ci];
        if sample_window(cam, geom, &dx, &dy, radius, &mut window) {
            let ncc_w = weighted_ncc(&window, &ref_window, kernel.weights());
            let ncc_p = plain_ncc(&window, &ref_window);
            let diff = mean(&window) - ref_mean;
            let dw = (-diff * diff * diff_s2).exp();
            fitness_sum += dw * (1.0 - ncc_w);
            weight_sum += dw;
            corr_sum += ncc_p;
            per_view_ncc.push(ncc_p);
        } else {
            fitness_sum += 2.0;
            weight_sum += 1.0;
            corr_sum += -1.0;
            per_view_ncc.push(-1.0);
        }
        others += 1;
    }

    if others == 0 || weight_sum <= 0.0 {
        return None;
    }

    Some(Evaluation {
        fitness: fitness_sum / weight_sum,
        correlation: corr_sum / others as f64,
        per_view_ncc,
    })
}
