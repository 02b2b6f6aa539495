//! Diff engine (C5): compare an existing archive's entry index against a
//! fresh collection, emit a [`ChangeSet`], and apply it.
//!
//! Grounded on `files-diff`'s `zip.rs` (reference pack): that crate reads an
//! existing archive with `zip::ZipArchive`, rebuilds a new one with
//! `zip::ZipWriter`, and carries forward unchanged members by copying their
//! bytes across — the same shape this module uses, adapted to mtime/size
//! comparison instead of byte-level patch operations (spec.md's diff mode
//! deletes + re-adds, it never patches, per the Non-goals).

use crate::collector::FileEntry;
use crate::error::{Error, Result};
use crate::pipeline::{self, PipelineOptions};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::Path;

/// One member's recorded metadata from an existing archive's central
/// directory.
#[derive(Debug, Clone, Copy)]
pub struct IndexedEntry {
    pub mtime: i64,
    pub size: u64,
    pub is_directory: bool,
}

/// Snapshot of an existing archive's entries, keyed by archive path.
#[derive(Debug, Default)]
pub struct ArchiveEntryIndex {
    pub entries: HashMap<String, IndexedEntry>,
}

/// Reads `archive_path`'s central directory into an [`ArchiveEntryIndex`].
pub fn read_index(archive_path: &Path) -> Result<ArchiveEntryIndex> {
    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

    let mut entries = HashMap::new();
    for i in 0..archive.len() {
        let zip_file = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;
        let is_directory = zip_file.is_dir();
        if is_directory {
            continue;
        }
        let name = zip_file.name().to_string();
        let mtime = pipeline::zip_datetime_to_unix(zip_file.last_modified());
        entries.insert(
            name,
            IndexedEntry {
                mtime,
                size: zip_file.size(),
                is_directory,
            },
        );
    }

    Ok(ArchiveEntryIndex { entries })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Change {
    pub archive_path: String,
    pub kind: ChangeKind,
    pub old_mtime: Option<i64>,
    pub new_mtime: Option<i64>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
}

/// An ordered changeset: insertion order follows `current`'s collection
/// order for Added/Modified, then archive order for Deleted, matching
/// spec.md §4.5's outer-join description.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

/// Computes the changeset between an existing archive's index and a fresh
/// collection of the directory.
#[must_use]
pub fn diff(archive_index: &ArchiveEntryIndex, current: &[FileEntry]) -> ChangeSet {
    let mut changes = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for entry in current {
        if entry.is_directory {
            continue;
        }
        seen.insert(entry.archive_path.clone());

        match archive_index.entries.get(&entry.archive_path) {
            None => changes.push(Change {
                archive_path: entry.archive_path.clone(),
                kind: ChangeKind::Added,
                old_mtime: None,
                new_mtime: Some(entry.mtime),
                old_size: None,
                new_size: Some(entry.size),
            }),
            Some(indexed) => {
                if entry.mtime > indexed.mtime || entry.size != indexed.size {
                    changes.push(Change {
                        archive_path: entry.archive_path.clone(),
                        kind: ChangeKind::Modified,
                        old_mtime: Some(indexed.mtime),
                        new_mtime: Some(entry.mtime),
                        old_size: Some(indexed.size),
                        new_size: Some(entry.size),
                    });
                }
            }
        }
    }

    for (path, indexed) in &archive_index.entries {
        if !seen.contains(path) {
            changes.push(Change {
                archive_path: path.clone(),
                kind: ChangeKind::Deleted,
                old_mtime: Some(indexed.mtime),
                new_mtime: None,
                old_size: Some(indexed.size),
                new_size: None,
            });
        }
    }

    ChangeSet { changes }
}

/// Applies a changeset to an existing archive by rewriting it to a
/// temporary file and atomically renaming over the original.
///
/// `current` must be the full collection-order entry list for the
/// directory being diffed (the desired post-apply state): unchanged
/// entries are carried forward from the old archive via `raw_copy_file`
/// (no recompression); Added/Modified entries are (re)written from disk.
///
/// `keep_missing` distinguishes the two CLI modes that call this function:
/// full diff (`-D`) passes `false`, dropping archive members whose source
/// file is gone (the `Deleted` changes); update (`-u`, add-or-replace only)
/// passes `true`, carrying those members forward untouched instead of
/// deleting them.
pub fn apply(
    archive_path: &Path,
    current: &[FileEntry],
    change_set: &ChangeSet,
    opts: &PipelineOptions,
    keep_missing: bool,
) -> Result<()> {
    let changed: std::collections::HashSet<&str> = change_set
        .changes
        .iter()
        .filter(|c| c.kind != ChangeKind::Deleted)
        .map(|c| c.archive_path.as_str())
        .collect();
    let missing: Vec<&str> = change_set
        .changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Deleted)
        .map(|c| c.archive_path.as_str())
        .collect();

    let source_file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut source_archive = zip::ZipArchive::new(BufReader::new(source_file))
        .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

    let dir = archive_path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".zipcraft-diff-")
        .tempfile_in(dir)
        .map_err(|e| Error::io(archive_path, e))?;

    let result = (|| -> Result<()> {
        let mut writer = zip::ZipWriter::new(temp.as_file_mut());

        for entry in current {
            if entry.is_directory {
                let options = zip_dir_options(opts);
                writer
                    .add_directory(&entry.archive_path, options)
                    .map_err(|e| Error::ArchiveWriteFailure(e.to_string()))?;
                continue;
            }

            if changed.contains(entry.archive_path.as_str()) {
                pipeline::write_entry(&mut writer, entry, opts)?;
            } else {
                copy_unchanged(&mut source_archive, &mut writer, &entry.archive_path)?;
            }
        }

        if keep_missing {
            for path in &missing {
                copy_unchanged(&mut source_archive, &mut writer, path)?;
            }
        }

        writer
            .finish()
            .map_err(|e| Error::ArchiveWriteFailure(e.to_string()))?;
        Ok(())
    })();

    result?;

    temp.as_file_mut()
        .rewind()
        .map_err(|e| Error::io(archive_path, e))?;
    temp.persist(archive_path)
        .map_err(|e| Error::ArchiveWriteFailure(e.error.to_string()))?;

    Ok(())
}

fn zip_dir_options(opts: &PipelineOptions) -> zip::write::SimpleFileOptions {
    let method = if opts.compression_level == 0 {
        zip::CompressionMethod::Stored
    } else {
        zip::CompressionMethod::Deflated
    };
    zip::write::SimpleFileOptions::default().compression_method(method)
}

fn copy_unchanged<R: std::io::Read + Seek>(
    source: &mut zip::ZipArchive<R>,
    writer: &mut zip::ZipWriter<&mut std::fs::File>,
    archive_path: &str,
) -> Result<()> {
    let zip_file = source
        .by_name(archive_path)
        .map_err(|e| Error::ArchiveCorrupt(format!("{archive_path}: {e}")))?;
    writer
        .raw_copy_file(zip_file)
        .map_err(|e| Error::ArchiveWriteFailure(format!("{archive_path}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FileEntry;

    fn fe(path: &str, size: u64, mtime: i64) -> FileEntry {
        FileEntry {
            source_path: std::path::PathBuf::from(path),
            archive_path: path.to_string(),
            size,
            mtime,
            is_directory: false,
            precompressed: None,
        }
    }

    #[test]
    fn diff_classifies_added_modified_deleted() {
        let mut archive_index = ArchiveEntryIndex::default();
        archive_index.entries.insert(
            "a.txt".to_string(),
            IndexedEntry {
                mtime: 100,
                size: 10,
                is_directory: false,
            },
        );
        archive_index.entries.insert(
            "gone.txt".to_string(),
            IndexedEntry {
                mtime: 50,
                size: 5,
                is_directory: false,
            },
        );

        let current = vec![fe("a.txt", 15, 100), fe("new.txt", 3, 10)];

        let change_set = diff(&archive_index, &current);
        let mut kinds: Vec<(String, ChangeKind)> = change_set
            .changes
            .iter()
            .map(|c| (c.archive_path.clone(), c.kind))
            .collect();
        kinds.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            kinds,
            vec![
                ("a.txt".to_string(), ChangeKind::Modified),
                ("gone.txt".to_string(), ChangeKind::Deleted),
                ("new.txt".to_string(), ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn diff_requires_strict_greater_than_mtime() {
        let mut archive_index = ArchiveEntryIndex::default();
        archive_index.entries.insert(
            "a.txt".to_string(),
            IndexedEntry {
                mtime: 100,
                size: 10,
                is_directory: false,
            },
        );
        let current = vec![fe("a.txt", 10, 100)];
        let change_set = diff(&archive_index, &current);
        assert!(change_set.changes.is_empty());
    }

    #[test]
    fn diff_size_change_at_equal_mtime_is_modified() {
        let mut archive_index = ArchiveEntryIndex::default();
        archive_index.entries.insert(
            "a.txt".to_string(),
            IndexedEntry {
                mtime: 100,
                size: 10,
                is_directory: false,
            },
        );
        let current = vec![fe("a.txt", 11, 100)];
        let change_set = diff(&archive_index, &current);
        assert_eq!(change_set.changes.len(), 1);
        assert_eq!(change_set.changes[0].kind, ChangeKind::Modified);
    }
}
