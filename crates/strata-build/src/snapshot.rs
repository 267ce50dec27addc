//! Content snapshots of directory trees.
//!
//! A [`Snapshot`] records every entry under a root (relative path, kind,
//! mode, content digest or link target). Comparing two snapshots of the same
//! root yields the file mutations a build step performed; hashing one yields
//! a digest that changes iff any byte, mode, or link in the tree changes.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FsError;
use crate::fsutil::{mode_of, relative_to};
use crate::hash::{hash_bytes, hash_file};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File { digest: String },
    Symlink { target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, Entry>,
}

/// Mutations between two snapshots of the same root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Entries added or modified, parents before children.
    pub changed: Vec<PathBuf>,
    /// Entries deleted. Only the top-most path of a deleted subtree is listed.
    pub removed: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

impl Snapshot {
    pub fn capture(root: &Path) -> Result<Self, FsError> {
        Self::capture_filtered(root, |_| true)
    }

    /// Capture entries for which `keep(relative_path)` holds. A rejected
    /// directory prunes its whole subtree.
    pub fn capture_filtered<F>(root: &Path, keep: F) -> Result<Self, FsError>
    where
        F: Fn(&Path) -> bool,
    {
        let mut entries = BTreeMap::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| keep(relative_to(e.path(), root)));

        for entry in walker {
            let entry = entry.map_err(|e| FsError::Walk {
                root: root.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            let relative = relative_to(path, root).to_path_buf();
            let meta = fs::symlink_metadata(path).map_err(|e| FsError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
            let read_err = |e| FsError::Read {
                path: path.to_path_buf(),
                source: e,
            };

            let file_type = meta.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink {
                    target: fs::read_link(path).map_err(read_err)?,
                }
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File {
                    digest: hash_file(path).map_err(read_err)?,
                }
            } else {
                tracing::debug!(path = %path.display(), "ignoring special file in snapshot");
                continue;
            };
            let mode = if file_type.is_symlink() {
                0
            } else {
                mode_of(&meta)
            };
            entries.insert(relative, Entry { kind, mode });
        }

        Ok(Self { entries })
    }

    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    /// Digest over the canonical listing of every entry.
    pub fn digest(&self) -> String {
        let mut listing = Vec::new();
        for (path, entry) in &self.entries {
            let (tag, detail): (&str, &[u8]) = match &entry.kind {
                EntryKind::Dir => ("d", b""),
                EntryKind::File { digest } => ("f", digest.as_bytes()),
                EntryKind::Symlink { target } => ("l", target.as_os_str().as_bytes()),
            };
            listing.extend_from_slice(tag.as_bytes());
            listing.extend_from_slice(format!(" {:o} ", entry.mode).as_bytes());
            listing.extend_from_slice(path.as_os_str().as_bytes());
            listing.push(0);
            listing.extend_from_slice(detail);
            listing.push(b'\n');
        }
        hash_bytes(&listing)
    }

    /// Mutations that turn `self` into `after`.
    pub fn diff(&self, after: &Snapshot) -> SnapshotDiff {
        let changed = after
            .entries
            .iter()
            .filter(|(path, entry)| self.entries.get(*path) != Some(*entry))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed: Vec<PathBuf> = Vec::new();
        for path in self.entries.keys() {
            if after.entries.contains_key(path) {
                continue;
            }
            if removed.last().is_some_and(|top| path.starts_with(top)) {
                continue;
            }
            removed.push(path.clone());
        }

        SnapshotDiff { changed, removed }
    }
}
