//! Moves into the archive and dead-letter folders.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Suffix of a retry sidecar.
pub const SIDECAR_SUFFIX: &str = ".retry.json";

/// `<path>.retry.json`
#[must_use]
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Returns true if `path` names a retry sidecar.
#[must_use]
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() > SIDECAR_SUFFIX.len() && n.to_ascii_lowercase().ends_with(SIDECAR_SUFFIX))
}

/// Returns true for `*.pdf`, any case.
#[must_use]
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// A free path for `file_name` in `dir`.
///
/// An existing file is never overwritten: a `_yyyyMMdd-HHmmss` suffix goes
/// before the extension, then a counter if that is taken too.
#[must_use]
pub fn unique_destination(dir: &Path, file_name: &str, now: DateTime<Local>) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file_name, String::new()),
    };
    let stamp = now.format("%Y%m%d-%H%M%S");
    let candidate = dir.join(format!("{stem}_{stamp}{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{stamp}-{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Moves `src` into `dir` without overwriting, returning the new path.
///
/// # Errors
///
/// Returns an error if the file cannot be moved.
pub fn move_into(src: &Path, dir: &Path, now: DateTime<Local>) -> io::Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string_lossy()
        .into_owned();
    std::fs::create_dir_all(dir)?;
    let dest = unique_destination(dir, &name, now);
    move_file(src, &dest)?;
    Ok(dest)
}

/// Renames, falling back to copy and delete across file systems.
///
/// # Errors
///
/// Returns an error if the file cannot be moved.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(src, dest) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            std::fs::copy(src, dest)?;
            std::fs::remove_file(src)
        }
        other => other,
    }
}
