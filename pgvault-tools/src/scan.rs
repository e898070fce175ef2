//! Cluster data-directory traversal and path attribute probing (spec.md §4.4
//! "Build").
//!
//! Manifest construction walks the PostgreSQL data directory once, recording
//! every path's kind (directory/file/symlink) and ownership attributes. This
//! mirrors the datastore traversal style the teacher uses (`walkdir`,
//! filtered with `filter_entry`), simplified to the exclusive-only case this
//! core needs: a single pass producing raw attribute tuples, with the
//! defaults-omission optimization applied afterwards by the manifest layer
//! itself rather than here.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use walkdir::WalkDir;

/// The PostgreSQL directory/file names that must never be backed up,
/// regardless of user-supplied excludes (spec.md §4.4).
pub const FIXED_EXCLUDES: &[&str] = &[
    "pg_snapshots",
    "pg_stat_tmp",
    "pg_subtrans",
    "pg_notify",
    "pgsql_tmp",
    "postmaster.pid",
    "postmaster.opts",
    "backup_label.old",
    "recovery.conf",
];

/// Attributes recorded for one entry discovered while walking the cluster.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    /// Path relative to the data directory root, using `/` separators.
    pub rel_path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// File size in bytes; meaningless for directories and links.
    pub size: u64,
    /// Modification time as a Unix epoch timestamp.
    pub mtime: i64,
    /// Present only for symlinks.
    pub link_target: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Link,
}

fn is_excluded(name: &str, extra_excludes: &[String]) -> bool {
    FIXED_EXCLUDES.contains(&name) || extra_excludes.iter().any(|e| e == name)
}

/// Walk `root`, skipping the fixed PostgreSQL exclusion list and any
/// caller-supplied `excludes` (matched against each entry's bare file name,
/// same as the fixed list).
///
/// Entries are returned in the order `walkdir` yields them (depth-first,
/// directories before their children), which is the order the manifest
/// builder wants to record paths before the files/links inside them.
pub fn scan_data_directory(
    root: &Path,
    excludes: &[String],
) -> Result<Vec<ScannedEntry>, Error> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        e.file_name()
            .to_str()
            .map(|name| !is_excluded(name, excludes))
            .unwrap_or(true)
    }) {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        let path = entry.path();
        if path == root {
            continue;
        }

        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = entry.metadata().with_context(|| {
            format!("reading metadata for '{}'", path.display())
        })?;

        let kind = if metadata.is_symlink() {
            EntryKind::Link
        } else if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };

        let link_target = if kind == EntryKind::Link {
            Some(fs::read_link(path).with_context(|| {
                format!("reading symlink target for '{}'", path.display())
            })?)
        } else {
            None
        };

        entries.push(ScannedEntry {
            rel_path,
            kind,
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            mtime: metadata.mtime(),
            link_target,
        });
    }

    Ok(entries)
}

/// The most frequently occurring `(mode, uid, gid)` triple among a set of
/// path entries, used as the manifest's per-target defaults so entries that
/// match it can omit the keys entirely (spec.md §4.4).
pub fn most_common_attrs<'a>(
    attrs: impl Iterator<Item = (u32, u32, u32)>,
) -> Option<(u32, u32, u32)> {
    use std::collections::HashMap;
    let mut counts: HashMap<(u32, u32, u32), usize> = HashMap::new();
    for attr in attrs {
        *counts.entry(attr).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(attr, _)| attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgvault-scan-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn walks_and_classifies_entries() {
        let root = tmp("walk");
        std::fs::create_dir_all(root.join("base/1")).unwrap();
        std::fs::write(root.join("base/1/PG_VERSION"), b"15\n").unwrap();
        std::fs::create_dir_all(root.join("pg_stat_tmp")).unwrap();
        std::fs::write(root.join("pg_stat_tmp/skip_me"), b"x").unwrap();

        let entries = scan_data_directory(&root, &[]).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();

        assert!(paths.iter().any(|p| *p == "base"));
        assert!(paths.iter().any(|p| *p == "base/1/PG_VERSION"));
        assert!(!paths.iter().any(|p| p.starts_with("pg_stat_tmp")));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn honors_extra_excludes() {
        let root = tmp("excl");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("keep.txt"), b"a").unwrap();
        std::fs::write(root.join("drop.txt"), b"b").unwrap();

        let entries = scan_data_directory(&root, &["drop.txt".to_string()]).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert!(paths.contains(&"keep.txt"));
        assert!(!paths.contains(&"drop.txt"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn most_common_attrs_picks_majority() {
        let attrs = vec![(0o700, 1000, 1000), (0o700, 1000, 1000), (0o600, 1000, 1000)];
        assert_eq!(most_common_attrs(attrs.into_iter()), Some((0o700, 1000, 1000)));
    }
}
