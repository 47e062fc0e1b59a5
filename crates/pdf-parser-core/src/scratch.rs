//! Per-job scratch directories and the filesystem moves reconcilers share.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use tempfile::TempDir;

/// An exclusively-owned directory holding raw engine output.
///
/// Removed by [`close`](ScratchDir::close), or on drop when a job bails out
/// early.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root` (system temp dir when `None`).
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf-parser-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The path with a trailing separator, for engines that append file
    /// names to a prefix argument.
    pub fn prefix_arg(&self) -> OsString {
        let mut arg = self.dir.path().as_os_str().to_os_string();
        if !arg.to_string_lossy().ends_with(MAIN_SEPARATOR) {
            arg.push(MAIN_SEPARATOR.to_string());
        }
        arg
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// File name without its last extension, like `paper` for `paper.pdf`.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split a file name at its last dot: `("0", "json")` for `0.json`.
/// Names without a stem or extension yield `None`.
pub fn split_extension(name: &str) -> Option<(&str, &str)> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some((stem, ext)),
        _ => None,
    }
}

/// Immediate entries of `dir`, sorted by path.
pub fn list_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Move a file or directory, replacing whatever is at `dst`.
///
/// Falls back to copy-and-delete when a rename is not possible (scratch
/// directories usually live on another filesystem).
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.is_dir() {
        fs::remove_dir_all(dst)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    if src.is_dir() {
        copy_dir_all(src, dst)?;
        fs::remove_dir_all(src)
    } else {
        fs::copy(src, dst)?;
        fs::remove_file(src)
    }
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
