//! ASCII PLY export of the oriented point cloud.

use crate::engine::Mvs;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write every patch as an oriented vertex (`x y z nx ny nz`).
pub fn write_ply(path: &Path, mvs: &Mvs) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "ply")?;
    writeln!(file, "format ascii 1.0")?;
    writeln!(file, "element vertex {}", mvs.patch_count())?;
    writeln!(file, "property float x")?;
    writeln!(file, "property float y")?;
    writeln!(file, "property float z")?;
    writeln!(file, "property float nx")?;
    writeln!(file, "property float ny")?;
    writeln!(file, "property float nz")?;
    writeln!(file, "end_header")?;

    for patch in mvs.patches() {
        let c = patch.center();
        let n = patch.normal();
        writeln!(file, "{} {} {} {} {} {}", c.x, c.y, c.z, n.x, n.y, n.z)?;
    }

    Ok(())
}
