use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ContextCopyError, FsError};
use crate::fsutil::{apply_dir_modes, place_entry, relative_to};
use crate::snapshot::Snapshot;

/// Paths never copied into an image, regardless of configured excludes.
const ALWAYS_EXCLUDED: &[&str] = &[".git", ".strata"];

/// The host directory tree copied into the image by the context step.
///
/// Excludes are either path prefixes relative to the root (`docs`,
/// `tests/fixtures`) or `*.ext` file-name suffix patterns (`*.pyc`).
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    exclude: Vec<String>,
}

impl BuildContext {
    pub fn open(root: &Path, exclude: &[String]) -> Result<Self, ContextCopyError> {
        let meta = match std::fs::metadata(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContextCopyError::Missing {
                    path: root.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(ContextCopyError::Access {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
        };
        if !meta.is_dir() {
            return Err(ContextCopyError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
            exclude: exclude.to_vec(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Leave `pattern` out of the copy as well.
    pub fn exclude(&mut self, pattern: impl Into<String>) {
        self.exclude.push(pattern.into());
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        if ALWAYS_EXCLUDED.iter().any(|ex| relative.starts_with(ex)) {
            return true;
        }
        self.exclude.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => relative
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(suffix)),
            None => relative.starts_with(pattern.trim_end_matches('/')),
        })
    }

    /// Snapshot of every included entry.
    pub fn snapshot(&self) -> Result<Snapshot, ContextCopyError> {
        Snapshot::capture_filtered(&self.root, |p| !self.is_excluded(p)).map_err(context_error)
    }

    /// Content digest of the included tree. Any byte, mode, or name change
    /// in an included file changes it.
    pub fn digest(&self) -> Result<String, ContextCopyError> {
        Ok(self.snapshot()?.digest())
    }

    /// Copy every included entry into `dest`, merging with and overwriting
    /// what is already there. Returns the number of entries copied.
    pub fn copy_into(&self, dest: &Path) -> Result<usize, ContextCopyError> {
        std::fs::create_dir_all(dest).map_err(|e| ContextCopyError::Create {
            path: dest.to_path_buf(),
            source: e,
        })?;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !self.is_excluded(relative_to(e.path(), &self.root)));

        let mut dir_modes = Vec::new();
        let mut count = 0;
        for entry in walker {
            let entry = entry.map_err(|e| ContextCopyError::Walk {
                path: self.root.clone(),
                source: e,
            })?;
            let target = dest.join(relative_to(entry.path(), &self.root));
            if let Some(mode) = place_entry(entry.path(), &target).map_err(context_error)? {
                dir_modes.push((target, mode));
            }
            count += 1;
        }
        apply_dir_modes(dir_modes).map_err(context_error)?;

        tracing::debug!(files = count, dest = %dest.display(), "context copied");
        Ok(count)
    }
}

fn context_error(e: FsError) -> ContextCopyError {
    match e {
        FsError::Walk { root, source } => ContextCopyError::Walk { path: root, source },
        FsError::Read { path, source } => ContextCopyError::Hash { path, source },
        FsError::Write { path, source } => ContextCopyError::CopyFile { path, source },
    }
}
