//! Recursive, ignore-aware tree walk producing an ordered [`FileEntry`] list.
//!
//! Replaces the teacher's `walk.rs`. The walk order is the collector's
//! contract with everything downstream: Phase C of the pipeline and the
//! diff engine both depend on entries arriving in the order the collector
//! emits them.

use crate::ignore::IgnoreContext;
use crate::path_model::to_archive_path;
use crate::platform::{file_stat, read_dir_sorted};
use std::path::{Path, PathBuf};

/// "Large" threshold for Phase B eligibility, per spec.md §4.4: 1 MiB.
pub const LARGE_FILE_THRESHOLD: u64 = 1024 * 1024;

/// One unit of archive work produced by the collector.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub source_path: PathBuf,
    /// Forward-slash relative path as it will appear in the archive. Ends
    /// in exactly one `/` for directories.
    pub archive_path: String,
    pub size: u64,
    pub mtime: i64,
    pub is_directory: bool,
    /// Set by Phase B; `None` until pre-compression runs or is skipped.
    pub precompressed: Option<Precompressed>,
}

/// Payload produced by a Phase B worker: a complete single-entry ZIP,
/// already compressed on that worker's thread. Phase C recovers the entry
/// with `raw_copy_file` (see `pipeline::write_entry`) and copies its
/// compressed bytes straight into the real archive, so the DEFLATE pass
/// never repeats.
#[derive(Debug, Clone)]
pub struct Precompressed {
    pub bytes: Vec<u8>,
    pub compression_ok: bool,
}

impl FileEntry {
    #[must_use]
    pub fn is_large(&self) -> bool {
        !self.is_directory && self.size >= LARGE_FILE_THRESHOLD
    }
}

/// Summary counters accumulated while collecting, per spec.md §4.3/§4.4.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectSummary {
    pub total_files: u64,
    pub total_bytes: u64,
    pub large_file_count: u64,
    pub large_file_bytes: u64,
}

/// Walks `roots`, applying `ignore_ctx`, and returns the entries in
/// deterministic collection order plus summary counters.
///
/// `archive_to_exclude`, if given, is canonicalized and compared against
/// every visited path so the archive being written never reads itself
/// (spec.md invariant I5).
///
/// `base_dir` and every entry of `roots` are resolved through
/// [`crate::platform::canonicalize`] before the walk starts. `base_dir`
/// itself is typically already absolute (callers derive it from
/// `canonicalize`d inputs), but `roots` are exactly what the user typed —
/// including relative arguments like `.` — and `to_archive_path` requires
/// `source`/`base` to agree on absolute-vs-relative form, or every
/// `strip_prefix` call fails and the walk silently emits nothing.
pub fn collect(
    roots: &[PathBuf],
    base_dir: &Path,
    ignore_ctx: &mut IgnoreContext,
    archive_to_exclude: Option<&Path>,
) -> (Vec<FileEntry>, CollectSummary) {
    let mut entries = Vec::new();
    let mut summary = CollectSummary::default();
    let exclude_canonical = archive_to_exclude.and_then(|p| crate::platform::canonicalize(p).ok());
    let base_dir =
        crate::platform::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

    for root in roots {
        let root = crate::platform::canonicalize(root).unwrap_or_else(|_| root.clone());
        collect_root(
            &root,
            &base_dir,
            ignore_ctx,
            exclude_canonical.as_deref(),
            &mut entries,
            &mut summary,
        );
    }

    (entries, summary)
}

fn collect_root(
    root: &Path,
    base_dir: &Path,
    ignore_ctx: &mut IgnoreContext,
    exclude: Option<&Path>,
    entries: &mut Vec<FileEntry>,
    summary: &mut CollectSummary,
) {
    let Ok(stat) = file_stat(root) else {
        log::warn!("skipping unreadable path: {}", root.display());
        return;
    };

    if stat.is_dir {
        if let Some(parent) = root.parent() {
            ignore_ctx.load_nested(parent);
        }
        ignore_ctx.load_nested(root);
        walk_dir(root, base_dir, ignore_ctx, exclude, entries, summary);
    } else {
        let archive_path = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        push_file(root, &archive_path, &stat, exclude, entries, summary);
    }
}

fn walk_dir(
    dir: &Path,
    base_dir: &Path,
    ignore_ctx: &mut IgnoreContext,
    exclude: Option<&Path>,
    entries: &mut Vec<FileEntry>,
    summary: &mut CollectSummary,
) {
    ignore_ctx.load_nested(dir);

    let children = match read_dir_sorted(dir) {
        Ok(children) => children,
        Err(err) => {
            log::warn!("skipping unreadable directory {}: {err}", dir.display());
            return;
        }
    };

    for child in children {
        if ignore_ctx.is_ignored(&child) {
            log::debug!("ignored: {}", child.display());
            continue;
        }

        let Ok(stat) = file_stat(&child) else {
            log::warn!("skipping unreadable path: {}", child.display());
            continue;
        };

        if stat.is_dir {
            let Some(archive_path) = to_archive_path(&child, base_dir) else {
                continue;
            };
            entries.push(FileEntry {
                source_path: child.clone(),
                archive_path: format!("{archive_path}/"),
                size: 0,
                mtime: stat.mtime,
                is_directory: true,
                precompressed: None,
            });
            walk_dir(&child, base_dir, ignore_ctx, exclude, entries, summary);
        } else {
            let Some(archive_path) = to_archive_path(&child, base_dir) else {
                continue;
            };
            push_file(&child, &archive_path, &stat, exclude, entries, summary);
        }
    }
}

fn push_file(
    path: &Path,
    archive_path: &str,
    stat: &crate::platform::Stat,
    exclude: Option<&Path>,
    entries: &mut Vec<FileEntry>,
    summary: &mut CollectSummary,
) {
    if let Some(exclude) = exclude {
        if let Ok(canonical) = crate::platform::canonicalize(path) {
            if canonical == exclude {
                return;
            }
        }
    }

    summary.total_files += 1;
    summary.total_bytes += stat.size;
    if stat.size >= LARGE_FILE_THRESHOLD {
        summary.large_file_count += 1;
        summary.large_file_bytes += stat.size;
    }

    entries.push(FileEntry {
        source_path: path.to_path_buf(),
        archive_path: archive_path.to_string(),
        size: stat.size,
        mtime: stat.mtime,
        is_directory: false,
        precompressed: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempdir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("zipcraft-collector-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn collects_plain_files() {
        let root = tempdir("plain");
        fs::write(root.join("a.txt"), "x").unwrap();
        fs::write(root.join("b.txt"), "yy").unwrap();

        let mut ctx = IgnoreContext::new(&root);
        ctx.load_initial(None, None);
        let (entries, summary) = collect(&[root.clone()], &root, &mut ctx, None);

        let mut paths: Vec<_> = entries.iter().map(|e| e.archive_path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(summary.total_files, 2);
    }

    #[test]
    fn ignored_directory_subtree_is_skipped() {
        let root = tempdir("ignoredir");
        fs::write(root.join(".zipignore"), "sub/\n").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/x.txt"), "x").unwrap();
        fs::write(root.join("keep.txt"), "x").unwrap();

        let mut ctx = IgnoreContext::new(&root);
        ctx.load_initial(None, None);
        let (entries, _) = collect(&[root.clone()], &root, &mut ctx, None);

        assert!(entries.iter().all(|e| !e.archive_path.starts_with("sub")));
        assert!(entries.iter().any(|e| e.archive_path == "keep.txt"));
    }

    #[test]
    fn archive_path_has_no_dotdot_or_backslash() {
        let root = tempdir("invariant");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/c.txt"), "x").unwrap();

        let mut ctx = IgnoreContext::new(&root);
        ctx.load_initial(None, None);
        let (entries, _) = collect(&[root.clone()], &root, &mut ctx, None);

        for entry in &entries {
            assert!(!entry.archive_path.contains('\\'));
            assert!(!entry.archive_path.contains(".."));
            assert!(!entry.archive_path.starts_with('/'));
            assert!(!entry.archive_path.contains("//"));
        }
    }

    /// Regression test for a relative root (e.g. `.`, the common
    /// `zipcraft out.zip .` invocation): `base_dir` arrives canonical but
    /// the root itself does not, and `to_archive_path`'s `strip_prefix`
    /// silently drops every entry if the two aren't brought into the same
    /// absolute form first.
    #[test]
    fn relative_root_is_canonicalized_before_walking() {
        let root = tempdir("relative-root");
        fs::write(root.join("a.txt"), "x").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), "y").unwrap();

        let original_cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(&root).unwrap();
        let result = std::panic::catch_unwind(|| {
            let mut ctx = IgnoreContext::new(&root);
            ctx.load_initial(None, None);
            let relative_base = PathBuf::from(".");
            collect(
                &[PathBuf::from(".")],
                &relative_base,
                &mut ctx,
                None,
            )
        });
        std::env::set_current_dir(original_cwd).unwrap();
        let (entries, summary) = result.unwrap();

        let mut paths: Vec<_> = entries.iter().map(|e| e.archive_path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
        assert_eq!(summary.total_files, 2);
    }

    #[test]
    fn excludes_the_archive_file_itself() {
        let root = tempdir("selfexclude");
        fs::write(root.join("out.zip"), "placeholder").unwrap();
        fs::write(root.join("a.txt"), "x").unwrap();

        let mut ctx = IgnoreContext::new(&root);
        ctx.load_initial(None, None);
        let archive_path = root.join("out.zip");
        let (entries, _) = collect(&[root.clone()], &root, &mut ctx, Some(&archive_path));

        assert!(entries.iter().all(|e| e.archive_path != "out.zip"));
    }
}
