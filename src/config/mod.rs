//! Parameter types and runtime configuration loading.
//!
//! [`MvsParams`] is the flat record of tunables captured once at engine
//! construction; [`RuntimeConfig`] wraps it with input/output paths for the
//! CLI. Defaults aim for mid-resolution photographic datasets; for tuning,
//! start with `min_correlation` and `max_fitness`, which gate how aggressive
//! expansion is.

use crate::error::{MvsError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Engine-wide tunables controlling refinement, expansion and filtering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MvsParams {
    /// Cell edge length of the per-camera grids (pixels).
    pub cell_size: usize,
    /// Patch window radius; the sampling window is `2·patch_radius + 1` wide.
    pub patch_radius: usize,
    /// Minimum number of visible cameras for a patch to survive.
    pub min_cam_num: usize,
    /// Per-view NCC below which a camera is dropped from the visible set.
    pub visible_correlation: f64,
    /// Minimum kernel-weighted variance of the reference window.
    pub texture_variation: f64,
    /// Minimum mean correlation for a patch to survive runtime filtering.
    pub min_correlation: f64,
    /// Maximum fitness for a patch to survive runtime filtering.
    pub max_fitness: f64,
    /// Coarsest admissible pyramid level for patch sampling.
    pub min_lod: usize,
    /// Finest admissible pyramid level for patch sampling.
    pub max_lod: usize,
    /// Target ratio between the projected disc diameter and the window size.
    pub lod_ratio: f64,
    /// Cell saturation bound; inserts into full cells are rejected.
    pub max_cell_patch_num: usize,
    /// Gaussian sigma of the patch distance kernel (window samples).
    pub dist_weighting: f64,
    /// Gaussian sigma of the per-view brightness-difference weighting.
    pub diff_weighting: f64,
    /// Mean k-NN distance above which a patch is an outlier (world units).
    pub neighbor_radius: f64,
    /// Minimum neighbor ratio in the 3×3 cell neighborhood.
    pub min_region_ratio: f64,
    /// Depth search half-range as a fraction of the mean camera distance.
    pub depth_range_scalar: f64,
    /// Particle count of the refinement swarm.
    pub particle_num: usize,
    /// Iteration bound of the refinement swarm.
    pub max_iteration: usize,
    /// Neighborhood size of the k-NN outlier filter.
    pub local_k: usize,
    /// Expansions between reconstruction checkpoints.
    pub checkpoint_interval: usize,
    /// Pyramid levels built per camera (must exceed `max_lod`).
    pub pyramid_levels: usize,
}

impl Default for MvsParams {
    fn default() -> Self {
        Self {
            cell_size: 8,
            patch_radius: 5,
            min_cam_num: 3,
            visible_correlation: 0.7,
            texture_variation: 1e-4,
            min_correlation: 0.7,
            max_fitness: 0.6,
            min_lod: 0,
            max_lod: 3,
            lod_ratio: 2.0,
            max_cell_patch_num: 3,
            dist_weighting: 2.5,
            diff_weighting: 0.25,
            neighbor_radius: 2.0,
            min_region_ratio: 0.3,
            depth_range_scalar: 0.25,
            particle_num: 15,
            max_iteration: 60,
            local_k: 10,
            checkpoint_interval: 500,
            pyramid_levels: 4,
        }
    }
}

impl MvsParams {
    /// Window side length in samples.
    pub fn patch_size(&self) -> usize {
        2 * self.patch_radius + 1
    }

    /// Check internal consistency of the record.
    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 {
            return Err(MvsError::Config("cell_size must be positive".into()));
        }
        if self.patch_radius == 0 {
            return Err(MvsError::Config("patch_radius must be positive".into()));
        }
        if self.min_cam_num < 2 {
            return Err(MvsError::Config("min_cam_num must be at least 2".into()));
        }
        if !(-1.0..=1.0).contains(&self.visible_correlation) {
            return Err(MvsError::Config(
                "visible_correlation must lie in [-1, 1]".into(),
            ));
        }
        if self.min_lod > self.max_lod {
            return Err(MvsError::Config(
                "min_lod must not exceed max_lod".into(),
            ));
        }
        if self.pyramid_levels <= self.max_lod {
            return Err(MvsError::Config(
                "pyramid_levels must exceed max_lod".into(),
            ));
        }
        if self.lod_ratio <= 0.0 {
            return Err(MvsError::Config("lod_ratio must be positive".into()));
        }
        if self.max_cell_patch_num == 0 {
            return Err(MvsError::Config(
                "max_cell_patch_num must be positive".into(),
            ));
        }
        if self.dist_weighting <= 0.0 || self.diff_weighting <= 0.0 {
            return Err(MvsError::Config(
                "kernel sigmas must be positive".into(),
            ));
        }
        if self.depth_range_scalar <= 0.0 {
            return Err(MvsError::Config(
                "depth_range_scalar must be positive".into(),
            ));
        }
        if self.particle_num == 0 || self.local_k == 0 || self.checkpoint_interval == 0 {
            return Err(MvsError::Config(
                "particle_num, local_k and checkpoint_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Emit the configuration report at startup.
    pub fn report(&self) {
        info!("MVS configuration");
        info!("  cell size: {} px", self.cell_size);
        info!(
            "  patch radius: {} px (window {}x{})",
            self.patch_radius,
            self.patch_size(),
            self.patch_size()
        );
        info!("  minimum camera number: {}", self.min_cam_num);
        info!("  visible correlation: {}", self.visible_correlation);
        info!("  texture variation: {}", self.texture_variation);
        info!("  minimum correlation: {}", self.min_correlation);
        info!("  maximum fitness: {}", self.max_fitness);
        info!(
            "  LOD: [{}, {}] ratio {}",
            self.min_lod, self.max_lod, self.lod_ratio
        );
        info!("  maximum cell patch number: {}", self.max_cell_patch_num);
        info!("  distance weighting: {}", self.dist_weighting);
        info!("  difference weighting: {}", self.diff_weighting);
        info!("  neighbor radius: {}", self.neighbor_radius);
        info!("  minimum region ratio: {}", self.min_region_ratio);
        info!("  depth range scalar: {}", self.depth_range_scalar);
        info!(
            "  swarm: {} particles, {} iterations",
            self.particle_num, self.max_iteration
        );
        info!("  local k: {}", self.local_k);
        info!("  checkpoint interval: {}", self.checkpoint_interval);
        info!("  pyramid levels: {}", self.pyramid_levels);
    }
}

/// Sparse-input flavours accepted by the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Nvm,
    Nvm2,
    Mvs,
}

/// Output paths; absent entries skip the corresponding writer.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OutputConfig {
    pub snapshot_out: Option<PathBuf>,
    pub ply_out: Option<PathBuf>,
    pub psr_out: Option<PathBuf>,
    /// Periodic checkpoint target during expansion.
    pub checkpoint_path: Option<PathBuf>,
}

/// Quantization grid resolution, applied after the filter cascade.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct QuantizationConfig {
    pub theta_num: usize,
    pub phi_num: usize,
    pub dist_num: usize,
}

/// Full CLI job description.
#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    pub input_path: PathBuf,
    pub input_format: InputFormat,
    /// Directory camera image paths are resolved against (defaults to the
    /// input file's directory).
    pub image_dir: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    pub quantization: Option<QuantizationConfig>,
    #[serde(default)]
    pub params: MvsParams,
}

/// Load a [`RuntimeConfig`] from a JSON file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let contents = fs::read_to_string(path)?;
    let config: RuntimeConfig = serde_json::from_str(&contents)
        .map_err(|e| MvsError::format(path, format!("failed to parse config: {e}")))?;
    config.params.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        assert!(MvsParams::default().validate().is_ok());
    }

    #[test]
    fn validation_rejects_inverted_lod_range() {
        let params = MvsParams {
            min_lod: 3,
            max_lod: 1,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(MvsError::Config(_))));
    }

    #[test]
    fn validation_requires_pyramid_cover_for_max_lod() {
        let params = MvsParams {
            max_lod: 4,
            pyramid_levels: 4,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
