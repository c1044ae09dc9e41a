//! Bounded particle-swarm search used by patch refinement.
//!
//! The optimizer is a black box behind the refine contract: given an initial
//! point and per-dimension bounds it returns a point whose objective value
//! never exceeds the initial one. The swarm is seeded from the patch id so
//! refinement, and hence expansion order, is reproducible for fixed inputs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const INERTIA: f64 = 0.7;
const COGNITIVE: f64 = 1.5;
const SOCIAL: f64 = 1.5;

/// Per-dimension search interval.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SearchBounds {
    pub lo: [f64; 3],
    pub hi: [f64; 3],
}

impl SearchBounds {
    fn clamp(&self, x: &mut [f64; 3]) {
        for d in 0..3 {
            x[d] = x[d].clamp(self.lo[d], self.hi[d]);
        }
    }

    fn range(&self, d: usize) -> f64 {
        self.hi[d] - self.lo[d]
    }
}

/// Minimize `objective` over the bounded box.
///
/// The initial point joins the swarm as the first particle, so the returned
/// value is never worse than `objective(init)`.
pub(crate) fn minimize<F>(
    seed: u64,
    particle_num: usize,
    max_iteration: usize,
    bounds: SearchBounds,
    init: [f64; 3],
    mut objective: F,
) -> ([f64; 3], f64)
where
    F: FnMut(&[f64; 3]) -> f64,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let n = particle_num.max(1);

    let mut positions = Vec::with_capacity(n);
    let mut velocities = Vec::with_capacity(n);
    positions.push(init);
    velocities.push([0.0; 3]);
    for _ in 1..n {
        let mut x = [0.0; 3];
        let mut v = [0.0; 3];
        for d in 0..3 {
            x[d] = rng.gen_range(bounds.lo[d]..=bounds.hi[d]);
            let r = bounds.range(d);
            v[d] = rng.gen_range(-0.25 * r..=0.25 * r);
        }
        positions.push(x);
        velocities.push(v);
    }

    let mut best_local = positions.clone();
    let mut best_local_val: Vec<f64> = positions.iter().map(|x| objective(x)).collect();
    let start = best_local_val
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .expect("swarm is non-empty");
    let mut best_global = best_local[start.0];
    let mut best_global_val = *start.1;

    for _ in 0..max_iteration {
        for i in 0..n {
            for d in 0..3 {
                let r1: f64 = rng.gen();
                let r2: f64 = rng.gen();
                velocities[i][d] = INERTIA * velocities[i][d]
                    + COGNITIVE * r1 * (best_local[i][d] - positions[i][d])
                    + SOCIAL * r2 * (best_global[d] - positions[i][d]);
                let vmax = 0.25 * bounds.range(d);
                velocities[i][d] = velocities[i][d].clamp(-vmax, vmax);
                positions[i][d] += velocities[i][d];
            }
            bounds.clamp(&mut positions[i]);

            let val = objective(&positions[i]);
            if val < best_local_val[i] {
                best_local[i] = positions[i];
                best_local_val[i] = val;
            }
            if val < best_global_val {
                best_global = positions[i];
                best_global_val = val;
            }
        }
    }

    (best_global, best_global_val)
}
