//! Start-time resolution of the entry point inside an image.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{FsError, RunError};
use crate::fsutil::{in_root, resolve_in_root};

/// Resolve `program` the way `execvp` would inside `rootfs`: names with a
/// slash are taken as paths (relative to `workdir`), bare names are searched
/// on `path_var`. Returns the host path of the executable.
pub fn resolve_entrypoint(
    rootfs: &Path,
    program: &str,
    path_var: &str,
    workdir: Option<&str>,
) -> Result<PathBuf, RunError> {
    if program.is_empty() {
        return Err(RunError::EntryPointNotFound {
            program: program.to_owned(),
        });
    }

    if program.contains('/') {
        let image_path = if program.starts_with('/') {
            PathBuf::from(program)
        } else {
            match workdir {
                Some(dir) => Path::new(dir).join(program),
                None => Path::new("/").join(program),
            }
        };
        return match lookup(rootfs, &image_path)? {
            Candidate::Executable(host) => Ok(host),
            Candidate::NotExecutable => Err(RunError::EntryPointNotExecutable { path: image_path }),
            Candidate::Missing => Err(RunError::EntryPointNotFound {
                program: program.to_owned(),
            }),
        };
    }

    let mut not_executable = None;
    for dir in path_var.split(':').filter(|d| d.starts_with('/')) {
        let image_path = Path::new(dir).join(program);
        match lookup(rootfs, &image_path)? {
            Candidate::Executable(host) => return Ok(host),
            Candidate::NotExecutable => {
                not_executable.get_or_insert(image_path);
            }
            Candidate::Missing => {}
        }
    }
    match not_executable {
        Some(path) => Err(RunError::EntryPointNotExecutable { path }),
        None => Err(RunError::EntryPointNotFound {
            program: program.to_owned(),
        }),
    }
}

enum Candidate {
    Executable(PathBuf),
    NotExecutable,
    Missing,
}

fn lookup(rootfs: &Path, image_path: &Path) -> Result<Candidate, RunError> {
    let read_err = |e| FsError::Read {
        path: in_root(rootfs, image_path),
        source: e,
    };
    let Some(host) = resolve_in_root(rootfs, image_path).map_err(read_err)? else {
        return Ok(Candidate::Missing);
    };
    let meta = fs::metadata(&host).map_err(read_err)?;
    if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
        Ok(Candidate::Executable(host))
    } else {
        Ok(Candidate::NotExecutable)
    }
}
