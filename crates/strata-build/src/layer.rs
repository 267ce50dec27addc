//! Layers: immutable filesystem deltas identified by a cache key.
//!
//! On disk a layer is a directory holding `layer.json` (this module's
//! [`Layer`]) and `diff/`, a tree of every added or modified entry. Removed
//! paths are listed in the metadata.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FsError;
use crate::fsutil::{apply_dir_modes, place_entry, relative_to, remove_path};
use crate::hash::{hash_fields, is_sha256_hex, short_hash};
use crate::snapshot::{Snapshot, SnapshotDiff};

/// Deterministic layer identifier: SHA-256 over the parent key, the
/// instruction text, and the digests of every input the instruction reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerKey(String);

impl LayerKey {
    pub fn derive(parent: Option<&LayerKey>, instruction: &str, inputs: &[String]) -> Self {
        let parent = parent.map_or("", LayerKey::as_str);
        let fields = [parent, instruction]
            .into_iter()
            .chain(inputs.iter().map(String::as_str));
        Self(hash_fields(fields))
    }

    /// Parse a full hex key, e.g. from a CLI argument or directory name.
    pub fn parse(s: &str) -> Option<Self> {
        is_sha256_hex(s).then(|| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        short_hash(&self.0)
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which build step produced a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Base,
    SystemPackages,
    Dependencies,
    Context,
    Timezone,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Base => "base",
            Self::SystemPackages => "system-packages",
            Self::Dependencies => "dependencies",
            Self::Context => "context",
            Self::Timezone => "timezone",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub key: LayerKey,
    pub parent: Option<LayerKey>,
    pub step: StepKind,
    pub instruction: String,
    /// Paths deleted by this layer, relative to the image root.
    pub removed: Vec<PathBuf>,
    /// Digest of `diff/` plus `removed`; used to detect tampering.
    pub diff_digest: String,
    /// Number of added or modified entries.
    pub entries: usize,
}

/// Digest binding a diff tree and its removal list together.
pub fn diff_digest(diff_tree: &Snapshot, removed: &[PathBuf]) -> String {
    let removed: Vec<String> = removed
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    hash_fields(std::iter::once(diff_tree.digest()).chain(removed))
}

/// Copy every entry `before` → `after` changed from `rootfs` into `diff_dir`.
///
/// Unchanged parent directories are recreated with their current mode so the
/// diff tree can be overlaid directly.
pub fn stage_diff(
    rootfs: &Path,
    before: &Snapshot,
    after: &Snapshot,
    diff_dir: &Path,
) -> Result<SnapshotDiff, FsError> {
    let diff = before.diff(after);
    fs::create_dir_all(diff_dir).map_err(|e| FsError::Write {
        path: diff_dir.to_path_buf(),
        source: e,
    })?;

    let mut dir_modes = Vec::new();
    for relative in &diff.changed {
        let mut ancestors: Vec<&Path> = relative
            .ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .collect();
        ancestors.reverse();
        for ancestor in ancestors {
            let staged = diff_dir.join(ancestor);
            if staged.exists() {
                continue;
            }
            if let Some(mode) = place_entry(&rootfs.join(ancestor), &staged)? {
                dir_modes.push((staged, mode));
            }
        }

        let staged = diff_dir.join(relative);
        if let Some(mode) = place_entry(&rootfs.join(relative), &staged)? {
            dir_modes.push((staged, mode));
        }
    }
    apply_dir_modes(dir_modes)?;

    Ok(diff)
}

/// Overlay a layer onto `rootfs`: removals first, then the diff tree.
pub fn apply_diff(layer: &Layer, diff_dir: &Path, rootfs: &Path) -> Result<(), FsError> {
    for removed in &layer.removed {
        let target = rootfs.join(removed);
        remove_path(&target).map_err(|e| FsError::Write {
            path: target,
            source: e,
        })?;
    }

    let mut dir_modes = Vec::new();
    for entry in walkdir::WalkDir::new(diff_dir)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| FsError::Walk {
            root: diff_dir.to_path_buf(),
            source: e,
        })?;
        let target = rootfs.join(relative_to(entry.path(), diff_dir));
        if let Some(mode) = place_entry(entry.path(), &target)? {
            dir_modes.push((target, mode));
        }
    }
    apply_dir_modes(dir_modes)
}
