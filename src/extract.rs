//! Listing, integrity testing, and extraction.
//!
//! spec.md treats these as "external collaborators," described only for the
//! safety checks they share with the core path model (`is_safe_path`). This
//! module implements the real operations on top of that shared contract, in
//! the style of the teacher's `archive.rs` progress-bar plumbing.

use crate::error::{Error, Result};
use crate::path_model::{is_safe_path, join_host};
use crate::pipeline::zip_datetime_to_unix;
use filetime::FileTime;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

/// Safety caps applied during extraction, per spec.md §6 and Open Question
/// 3's resolved defaults (SPEC_FULL.md §E.3).
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_entries: u64,
    pub max_total_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_total_bytes: 16 * 1024 * 1024 * 1024,
            max_compression_ratio: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub is_directory: bool,
}

/// Lists an archive's members without extracting anything.
pub fn list(archive_path: &Path) -> Result<Vec<ListedEntry>> {
    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        out.push(ListedEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            is_directory: entry.is_dir(),
        });
    }
    Ok(out)
}

/// Verifies every member's CRC by reading it fully, without writing
/// anything to disk.
pub fn test_integrity(archive_path: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        io::copy(&mut entry, &mut io::sink())
            .map_err(|e| Error::ArchiveCorrupt(format!("CRC check failed: {e}")))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub force: bool,
    pub junk_paths: bool,
    pub quiet: bool,
    pub limits: ExtractLimits,
}

/// Extracts every safe entry of `archive_path` into `dest_dir`.
///
/// Refuses to proceed if the archive's aggregate entry count, total
/// uncompressed size, or any single entry's compression ratio exceeds
/// `opts.limits`, unless `opts.force` is set. Individual entries whose name
/// fails [`is_safe_path`] are skipped with a warning rather than aborting
/// the whole operation.
pub fn extract(archive_path: &Path, dest_dir: &Path, opts: &ExtractOptions) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

    check_limits(&mut archive, opts)?;

    fs::create_dir_all(dest_dir).map_err(|e| Error::io(dest_dir, e))?;

    let progress = if opts.quiet {
        None
    } else {
        progress_bar(archive.len() as u64)
    };

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        let raw_name = entry.name().to_string();

        if !is_safe_path(&raw_name) {
            log::warn!("skipping unsafe entry name: {raw_name}");
            continue;
        }

        let rel_name = if opts.junk_paths {
            raw_name
                .rsplit('/')
                .next()
                .unwrap_or(&raw_name)
                .to_string()
        } else {
            raw_name.clone()
        };

        if rel_name.is_empty() {
            continue;
        }

        let dest_path = join_host(dest_dir, &rel_name);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| Error::io(&dest_path, e))?;
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        if dest_path.exists() && !opts.force {
            return Err(Error::SecurityViolation(format!(
                "{} already exists; pass force to overwrite",
                dest_path.display()
            )));
        }

        let mtime = zip_datetime_to_unix(entry.last_modified());
        let mut out_file = File::create(&dest_path).map_err(|e| Error::io(&dest_path, e))?;
        io::copy(&mut entry, &mut out_file).map_err(|e| Error::io(&dest_path, e))?;
        set_mtime(&out_file, mtime);

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok(())
}

/// Restores an extracted file's mtime from its archive entry, per spec.md
/// P3's round-trip property. Best-effort: a failure here doesn't fail the
/// whole extraction, since the file's contents are already written.
fn set_mtime(file: &File, unix_mtime: i64) {
    let ft = FileTime::from_unix_time(unix_mtime, 0);
    if let Err(err) = filetime::set_file_handle_times(file, None, Some(ft)) {
        log::warn!("failed to restore mtime: {err}");
    }
}

fn check_limits<R: io::Read + io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    opts: &ExtractOptions,
) -> Result<()> {
    if opts.force {
        return Ok(());
    }

    let entry_count = archive.len() as u64;
    if entry_count > opts.limits.max_entries {
        return Err(Error::ResourceExhausted(format!(
            "archive has {entry_count} entries, exceeding the cap of {}",
            opts.limits.max_entries
        )));
    }

    let mut total_bytes: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        total_bytes = total_bytes.saturating_add(entry.size());

        let compressed = entry.compressed_size().max(1);
        let ratio = entry.size() / compressed;
        if ratio > opts.limits.max_compression_ratio {
            return Err(Error::SecurityViolation(format!(
                "{}: compression ratio {ratio}:1 exceeds cap of {}:1",
                entry.name(),
                opts.limits.max_compression_ratio
            )));
        }
    }

    if total_bytes > opts.limits.max_total_bytes {
        return Err(Error::ResourceExhausted(format!(
            "archive's uncompressed size {total_bytes} exceeds the cap of {}",
            opts.limits.max_total_bytes
        )));
    }

    Ok(())
}

fn progress_bar(len: u64) -> Option<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("━━─"),
    );
    Some(pb)
}
