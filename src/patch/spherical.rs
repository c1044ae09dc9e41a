//! Spherical-coordinate representation of unit normals.
//!
//! Convention: `n = (sinθ·cosφ, sinθ·sinφ, cosθ)` with θ ∈ [0, π] and
//! φ ∈ (−π, π]. Conversions are exact inverses for unit vectors.

use nalgebra::{Vector2, Vector3};

/// Convert a unit normal to (theta, phi).
pub fn normal_to_spherical(normal: &Vector3<f64>) -> Vector2<f64> {
    let theta = normal.z.clamp(-1.0, 1.0).acos();
    let phi = normal.y.atan2(normal.x);
    Vector2::new(theta, phi)
}

/// Convert (theta, phi) to a unit normal.
pub fn spherical_to_normal(spherical: &Vector2<f64>) -> Vector3<f64> {
    let (theta, phi) = (spherical.x, spherical.y);
    let sin_t = theta.sin();
    Vector3::new(sin_t * phi.cos(), sin_t * phi.sin(), theta.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_unit_normals() {
        let normals = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 2.0, 3.0).normalize(),
            Vector3::new(-0.3, 0.4, -0.5).normalize(),
        ];
        for n in &normals {
            let s = normal_to_spherical(n);
            let back = spherical_to_normal(&s);
            assert!((back - n).norm() < 1e-9, "normal {n:?} round-trip {back:?}");
            assert!((back.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn theta_measures_angle_from_z() {
        let s = normal_to_spherical(&Vector3::new(1.0, 0.0, 0.0));
        assert!((s.x - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
