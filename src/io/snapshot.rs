//! Native reconstruction snapshot.
//!
//! A [`Reconstruction`] is the serde image of the full engine state: camera
//! calibration (pixels stay on disk, referenced by path) and every patch
//! with its metrics. serde_json emits shortest-round-trip floats, so
//! `write_mvs` followed by `read_mvs` reproduces the document exactly;
//! metrics are expected to be finite (patches in the engine have passed the
//! runtime filter).

use crate::camera::{Camera, CameraIntrinsics};
use crate::config::MvsParams;
use crate::engine::Mvs;
use crate::error::{MvsError, Result};
use crate::image::{load_grayscale_image, write_json_file};
use crate::patch::Patch;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted calibration of one view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub name: String,
    pub image_path: PathBuf,
    pub intrinsics: CameraIntrinsics,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Persisted state of one patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub id: u32,
    pub center: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub scale: f64,
    pub lod: usize,
    pub reference_camera: usize,
    pub camera_indices: Vec<usize>,
    pub projections: Vec<Vector2<f64>>,
    pub fitness: f64,
    pub correlation: f64,
    pub priority: f64,
    pub expanded: bool,
    pub parent: Option<u32>,
}

/// Full snapshot document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    pub cameras: Vec<CameraRecord>,
    pub patches: Vec<PatchRecord>,
}

/// Write a snapshot as pretty JSON.
pub fn write_mvs(path: &Path, reconstruction: &Reconstruction) -> Result<()> {
    write_json_file(path, reconstruction)
}

/// Read a snapshot document back.
pub fn read_mvs(path: &Path) -> Result<Reconstruction> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| MvsError::format(path, format!("failed to parse snapshot: {e}")))
}

/// Read a snapshot and rebuild a full engine, loading camera images
/// relative to `image_dir`.
pub fn load_mvs(path: &Path, image_dir: &Path, params: MvsParams) -> Result<Mvs> {
    let reconstruction = read_mvs(path)?;
    let mut engine = Mvs::new(params)?;
    for record in &reconstruction.cameras {
        let image = load_grayscale_image(&image_dir.join(&record.image_path))?;
        let camera = Camera::new(
            record.name.clone(),
            record.image_path.clone(),
            record.intrinsics,
            record.rotation,
            record.translation,
            image.as_view(),
            engine.params().pyramid_levels,
        )?;
        engine.add_camera(camera);
    }
    engine.restore_patches(&reconstruction)?;
    Ok(engine)
}

impl Mvs {
    /// Capture the current engine state as a snapshot document.
    pub fn snapshot(&self) -> Reconstruction {
        let cameras = self
            .cameras()
            .iter()
            .map(|cam| CameraRecord {
                name: cam.name().to_string(),
                image_path: cam.image_path().clone(),
                intrinsics: cam.intrinsics(),
                rotation: *cam.rotation(),
                translation: *cam.translation(),
            })
            .collect();
        let patches = self
            .patches()
            .map(|p| PatchRecord {
                id: p.id(),
                center: *p.center(),
                normal: *p.normal(),
                scale: p.scale(),
                lod: p.lod(),
                reference_camera: p.reference_camera(),
                camera_indices: p.camera_indices().to_vec(),
                projections: p.projections().to_vec(),
                fitness: p.fitness(),
                correlation: p.correlation(),
                priority: p.priority(),
                expanded: p.is_expanded(),
                parent: p.parent(),
            })
            .collect();
        Reconstruction { cameras, patches }
    }

    /// Adopt the patches of a snapshot document. Camera indices must refer
    /// to already-registered cameras.
    pub fn restore_patches(&mut self, reconstruction: &Reconstruction) -> Result<()> {
        let camera_count = self.cameras().len();
        for record in &reconstruction.patches {
            if record.camera_indices.len() != record.projections.len() {
                return Err(MvsError::Invariant(format!(
                    "patch {}: {} camera indices vs {} projections",
                    record.id,
                    record.camera_indices.len(),
                    record.projections.len()
                )));
            }
            if record.camera_indices.iter().any(|&ci| ci >= camera_count) {
                return Err(MvsError::Invariant(format!(
                    "patch {} references a camera outside the registered set",
                    record.id
                )));
            }
            let patch = Patch::from_parts(
                record.id,
                record.center,
                record.normal,
                record.scale,
                record.lod,
                record.reference_camera,
                record.camera_indices.clone(),
                record.projections.clone(),
                record.fitness,
                record.correlation,
                record.priority,
                record.expanded,
                record.parent,
            );
            self.adopt_patch(patch);
        }
        Ok(())
    }
}
