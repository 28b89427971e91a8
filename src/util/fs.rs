use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Replace `dst` with `content` using write-to-temp-then-rename.
///
/// The destination is either left untouched or fully replaced; a crash
/// mid-write never leaves a truncated file behind.
pub fn write_atomic(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_sibling(dst);

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fails if the file exists (prevents symlink race)
        .open(&temp_path)?;

    if let Err(e) = temp_file.write_all(content).and_then(|_| temp_file.sync_all()) {
        drop(temp_file);
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    drop(temp_file);

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    std::fs::rename(&temp_path, dst).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}

/// SEC-009: Unpredictable temp name next to the destination so the rename
/// stays on one filesystem.
fn temp_sibling(dst: &Path) -> PathBuf {
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{:016x}", random_suffix));
    dst.with_file_name(name)
}
