//! Precomputed isotropic Gaussian weights over the patch sampling window.

/// `patch_size × patch_size` Gaussian weights, normalized to sum 1.
#[derive(Clone, Debug)]
pub struct PatchDistanceKernel {
    patch_size: usize,
    weights: Vec<f64>,
}

impl PatchDistanceKernel {
    /// Build the kernel for a window of `2·patch_radius + 1` samples with
    /// standard deviation `sigma`.
    pub fn new(patch_radius: usize, sigma: f64) -> Self {
        let patch_size = 2 * patch_radius + 1;
        let s2 = 1.0 / (2.0 * sigma * sigma);
        let s = 1.0 / (2.0 * std::f64::consts::PI * sigma * sigma);

        let mut weights = Vec::with_capacity(patch_size * patch_size);
        for y in 0..patch_size {
            for x in 0..patch_size {
                let dx = x as f64 - patch_radius as f64;
                let dy = y as f64 - patch_radius as f64;
                weights.push(s * (-(dx * dx + dy * dy) * s2).exp());
            }
        }
        let sum: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= sum;
        }

        Self {
            patch_size,
            weights,
        }
    }

    /// Window side length in samples.
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Weight at window position (x, y).
    #[inline]
    pub fn weight(&self, x: usize, y: usize) -> f64 {
        self.weights[y * self.patch_size + x]
    }

    /// All weights in row-major order.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_sums_to_one() {
        for (radius, sigma) in [(1usize, 0.5f64), (2, 1.0), (3, 2.5), (5, 4.0)] {
            let kernel = PatchDistanceKernel::new(radius, sigma);
            let sum: f64 = kernel.weights().iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-9,
                "radius {radius} sigma {sigma}: sum {sum}"
            );
        }
    }

    #[test]
    fn kernel_peaks_at_center() {
        let kernel = PatchDistanceKernel::new(2, 1.0);
        let center = kernel.weight(2, 2);
        for y in 0..kernel.patch_size() {
            for x in 0..kernel.patch_size() {
                assert!(kernel.weight(x, y) <= center);
            }
        }
    }

    #[test]
    fn kernel_is_symmetric() {
        let kernel = PatchDistanceKernel::new(3, 1.5);
        let n = kernel.patch_size() - 1;
        for y in 0..kernel.patch_size() {
            for x in 0..kernel.patch_size() {
                let a = kernel.weight(x, y);
                let b = kernel.weight(n - x, n - y);
                assert!((a - b).abs() < 1e-15);
            }
        }
    }
}
