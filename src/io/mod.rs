//! Reconstruction I/O: sparse inputs, native snapshots, point-cloud exports.
//!
//! - `nvm`: VisualSFM-style NVM / NVM2 sparse reconstructions (read).
//! - `snapshot`: native JSON snapshot of the full engine state (read/write,
//!   exact round-trip).
//! - `ply`: ASCII PLY oriented point cloud (write).
//! - `psr`: oriented points for Poisson surface reconstruction (write).

pub mod nvm;
pub mod ply;
pub mod psr;
pub mod snapshot;

pub use nvm::{load_nvm, load_nvm2};
pub use ply::write_ply;
pub use psr::write_psr;
pub use snapshot::{load_mvs, read_mvs, write_mvs, Reconstruction};
