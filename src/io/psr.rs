//! Oriented-point export for Poisson surface reconstruction.
//!
//! Bare whitespace-separated `x y z nx ny nz` lines, one per patch, as
//! consumed by the PoissonRecon `npts` input.

use crate::engine::Mvs;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write the oriented points without any header.
pub fn write_psr(path: &Path, mvs: &Mvs) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    for patch in mvs.patches() {
        let c = patch.center();
        let n = patch.normal();
        writeln!(file, "{} {} {} {} {} {}", c.x, c.y, c.z, n.x, n.y, n.z)?;
    }
    Ok(())
}
