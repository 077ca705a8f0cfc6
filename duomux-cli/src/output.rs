use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Resolve where the output file goes.
///
/// Creates `outdir` recursively. An existing file is kept unless `overwrite`
/// is set; the new file is then named `<epoch millis>.<name>`.
pub fn resolve_output_path(outdir: &Path, name: &str, overwrite: bool) -> Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .filter(|_| !name.ends_with('/'))
        .ok_or_else(|| AppError::InvalidOutput(format!("not a file name: {name:?}")))?;

    std::fs::create_dir_all(outdir)?;

    let target = outdir.join(file_name);
    if overwrite || !target.exists() {
        return Ok(target);
    }

    let millis = chrono::Utc::now().timestamp_millis();
    let renamed = format!("{millis}.{}", file_name.to_string_lossy());
    tracing::debug!(existing = %target.display(), renamed = %renamed, "output exists, not overwriting");
    Ok(outdir.join(renamed))
}

pub fn print_summary(output: &Path, elapsed: Duration) {
    println!("file path: {}", output.display());
    println!("done in {:.2}s", elapsed.as_secs_f64());
}
