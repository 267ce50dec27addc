//! Filesystem primitives shared by steps, layers, and the launcher.
//!
//! Everything here treats symlinks as entries in their own right and never
//! follows them out of the tree being processed.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FsError;

const MAX_SYMLINK_HOPS: usize = 40;

/// Host path of an image-absolute path inside `rootfs`.
pub fn in_root(rootfs: &Path, image_path: &Path) -> PathBuf {
    let relative: PathBuf = image_path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    rootfs.join(relative)
}

/// `path` relative to `root`. Walk entries always lie under the walked
/// root; any other path comes back unchanged.
pub fn relative_to<'a>(path: &'a Path, root: &Path) -> &'a Path {
    match path.strip_prefix(root) {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Remove a file, symlink, or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Mode bits (permissions plus setuid/setgid/sticky).
pub fn mode_of(meta: &fs::Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

/// Apply directory modes after their contents are written, deepest first, so
/// read-only directories do not block writes into them.
pub fn apply_dir_modes(mut dirs: Vec<(PathBuf, u32)>) -> Result<(), FsError> {
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    for (path, mode) in dirs {
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| FsError::Write { path, source: e })?;
    }
    Ok(())
}

/// Place a single entry from `src` at `dst`, replacing whatever is there.
/// Directories are created (not recursed); their mode is returned so callers
/// can apply it once the tree is complete.
pub fn place_entry(src: &Path, dst: &Path) -> Result<Option<u32>, FsError> {
    let meta = fs::symlink_metadata(src).map_err(|e| FsError::Read {
        path: src.to_path_buf(),
        source: e,
    })?;
    let existing = match fs::symlink_metadata(dst) {
        Ok(m) => Some(m),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            return Err(FsError::Read {
                path: dst.to_path_buf(),
                source: e,
            });
        }
    };
    let write_err = |e| FsError::Write {
        path: dst.to_path_buf(),
        source: e,
    };

    if meta.is_dir() {
        match existing {
            Some(m) if m.is_dir() => {}
            Some(_) => {
                fs::remove_file(dst).map_err(write_err)?;
                fs::create_dir(dst).map_err(write_err)?;
            }
            None => fs::create_dir(dst).map_err(write_err)?,
        }
        return Ok(Some(mode_of(&meta)));
    }

    match existing {
        Some(m) if m.is_dir() => fs::remove_dir_all(dst).map_err(write_err)?,
        Some(_) => fs::remove_file(dst).map_err(write_err)?,
        None => {}
    }

    if meta.file_type().is_symlink() {
        let target = fs::read_link(src).map_err(|e| FsError::Read {
            path: src.to_path_buf(),
            source: e,
        })?;
        symlink(&target, dst).map_err(write_err)?;
    } else if meta.is_file() {
        fs::copy(src, dst).map_err(write_err)?;
    } else {
        tracing::warn!(path = %src.display(), "skipping special file");
    }
    Ok(None)
}

/// Copy the tree under `src` into `dst` (created if missing), merging with
/// existing content. Returns the number of entries placed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, FsError> {
    fs::create_dir_all(dst).map_err(|e| FsError::Write {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let mut dir_modes = Vec::new();
    let mut count = 0;
    for entry in WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| FsError::Walk {
            root: src.to_path_buf(),
            source: e,
        })?;
        let target = dst.join(relative_to(entry.path(), src));
        if let Some(mode) = place_entry(entry.path(), &target)? {
            dir_modes.push((target, mode));
        }
        count += 1;
    }
    apply_dir_modes(dir_modes)?;
    Ok(count)
}

/// Resolve an image-absolute path inside `rootfs`, following symlinks the way
/// the kernel would if `rootfs` were `/`. Returns `None` when a component is
/// missing or the symlink chain is too deep.
pub fn resolve_in_root(rootfs: &Path, image_path: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut pending: Vec<PathBuf> = components_rev(image_path);
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(component) = pending.pop() {
        if component.as_os_str() == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&component);
        let host = rootfs.join(&candidate);
        let meta = match fs::symlink_metadata(&host) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if meta.file_type().is_symlink() {
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Ok(None);
            }
            let target = fs::read_link(&host)?;
            if target.is_absolute() {
                resolved = PathBuf::new();
            }
            pending.extend(components_rev(&target));
        } else {
            resolved = candidate;
        }
    }
    Ok(Some(rootfs.join(resolved)))
}

fn components_rev(path: &Path) -> Vec<PathBuf> {
    let mut parts: Vec<PathBuf> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(PathBuf::from(s)),
            Component::ParentDir => Some(PathBuf::from("..")),
            _ => None,
        })
        .collect();
    parts.reverse();
    parts
}
