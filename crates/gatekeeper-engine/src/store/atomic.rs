use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Write content atomically: write to temp file, fsync, rename.
pub fn atomic_write(path: &str, content: &[u8]) -> Result<()> {
    let dir = Path::new(path).parent().unwrap_or(Path::new("."));
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("cannot create temp file for {path}"))?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("cannot rename temp to {path}"));
    }
    Ok(())
}
