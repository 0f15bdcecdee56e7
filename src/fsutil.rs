//! Utilities for copying trees and managing directories.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use walkdir::WalkDir;

/// Ensure all parent directories of a file exist.
///
/// Creates all parent directories of the given path. If the path has no
/// parents, does nothing.
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Copy a file or directory tree, preserving permissions and symlinks.
///
/// Existing files at the destination are overwritten. Returns the number of
/// bytes copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("Copy source not found: {}", src.display()))?;

    if !meta.is_dir() {
        ensure_parent_exists(dst)?;
        return copy_entry(src, dst, &meta);
    }

    let mut total = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let meta = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;

        if meta.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            fs::set_permissions(&target, meta.permissions())?;
        } else {
            total += copy_entry(entry.path(), &target, &meta)?;
        }
    }
    Ok(total)
}

fn copy_entry(src: &Path, dst: &Path, meta: &fs::Metadata) -> Result<u64> {
    if meta.file_type().is_symlink() {
        let link = fs::read_link(src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst)?;
        }
        symlink(&link, dst)
            .with_context(|| format!("Failed to create symlink {}", dst.display()))?;
        return Ok(0);
    }
    if !meta.is_file() {
        bail!("Refusing to copy special file {}", src.display());
    }
    // fs::copy carries the permission bits over.
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
}

/// Count files under `dir` whose name ends with one of `suffixes`.
pub fn count_files(dir: &Path, suffixes: &[&str]) -> usize {
    let mut count = 0;
    for entry in WalkDir::new(dir) {
        match entry {
            Ok(e) if e.file_type().is_file() => {
                let name = e.file_name().to_string_lossy();
                if suffixes.iter().any(|s| name.ends_with(s)) {
                    count += 1;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Error reading entry under {}: {}", dir.display(), e),
        }
    }
    count
}
