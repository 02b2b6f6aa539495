//! Platform abstraction: the one place OS-specific branches live.
//!
//! spec.md §9 asks for a single seam exposing hardware parallelism, directory
//! walking, home directory, canonicalization, and file stat — the CORE
//! depends only on this module, never on `std::env`/`std::fs` conditionals
//! scattered through its logic.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Hardware parallelism, clamped to `[1, 16]` per spec.md §5's resource cap.
#[must_use]
pub fn hw_parallelism() -> usize {
    num_cpus::get().clamp(1, 16)
}

/// The current user's home directory, if determinable.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Canonicalizes a path, resolving symlinks and `.`/`..`.
pub fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path)
}

/// Stat information the collector and diff engine need from a filesystem
/// entry.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub mtime: i64,
    pub is_dir: bool,
}

/// Reads file metadata without following symlinks (matches spec.md's
/// Non-goal of symlink preservation: a symlink is stat'd as itself, not
/// dereferenced, and the collector treats anything that isn't a regular
/// file or directory as unsupported).
pub fn file_stat(path: &Path) -> io::Result<Stat> {
    let meta = fs::symlink_metadata(path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);

    Ok(Stat {
        size: meta.len(),
        mtime,
        is_dir: meta.is_dir(),
    })
}

/// One directory's immediate children, in a stable deterministic order
/// (lexicographic on the host byte representation, per spec.md §4.3).
pub fn read_dir_sorted(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}
