#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod camera;
pub mod cellmap;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod kernel;
pub mod patch;

// “Expert” modules – still public, but considered unstable internals.
pub mod image;
pub mod pyramid;

// --- High-level re-exports -------------------------------------------------

// Main entry points: engine + configuration + errors.
pub use crate::config::{load_config, InputFormat, MvsParams, RuntimeConfig};
pub use crate::engine::Mvs;
pub use crate::error::MvsError;

// Core model types.
pub use crate::camera::{Camera, CameraIntrinsics};
pub use crate::patch::Patch;

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use patch_mvs::prelude::*;
///
/// # fn main() -> Result<(), patch_mvs::MvsError> {
/// let mut engine = Mvs::new(MvsParams::default())?;
/// // engine.add_camera(...); engine.add_seed(...);
/// engine.refine_seed_patches();
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::camera::{Camera, CameraIntrinsics};
    pub use crate::config::MvsParams;
    pub use crate::engine::Mvs;
    pub use crate::patch::Patch;
}
