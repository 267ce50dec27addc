use std::fmt;
use std::path::PathBuf;

use strata_exec::ExecError;

use crate::layer::LayerKey;

/// Low-level filesystem failure while snapshotting, staging, or applying layers.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("failed to walk {root}")]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Layer cache and image store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed at {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt metadata at {path}")]
    Metadata {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("layer {key} is not in the cache")]
    LayerMissing { key: LayerKey },
    #[error("no image matches {reference:?}")]
    ImageNotFound { reference: String },
    #[error("image prefix {prefix:?} is ambiguous: {}", candidates.join(", "))]
    AmbiguousImage {
        prefix: String,
        candidates: Vec<String>,
    },
    #[error("invalid image tag {tag:?}: tags may only contain letters, digits, '.', '_', '-', ':'")]
    InvalidTag { tag: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PackageInstallError {
    #[error("package index refresh failed (exit {code}): {detail}")]
    IndexRefresh { code: i32, detail: String },
    #[error("package {package:?} not found in the package index")]
    NotFound { package: String },
    #[error("network failure while fetching packages: {detail}")]
    Network { detail: String },
    #[error("package postinstall script failed: {detail}")]
    Script { detail: String },
    #[error("apt-get exited with {code}: {detail}")]
    Failed { code: i32, detail: String },
    #[error("package installation exceeded {secs}s")]
    Timeout { secs: u64 },
    #[error("failed to run the package manager")]
    Exec(#[source] ExecError),
    #[error("failed to clear package index cache")]
    Cleanup(#[source] FsError),
}

#[derive(Debug, thiserror::Error)]
pub enum DependencyInstallError {
    #[error("failed to read dependency manifest {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}: {text:?}")]
    ManifestParse {
        path: PathBuf,
        line: usize,
        text: String,
        reason: &'static str,
    },
    #[error("failed to copy manifest into the image at {path}")]
    ManifestCopy {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("dependency {requirement:?} could not be resolved")]
    Unresolved { requirement: String },
    #[error("native extension build failed: {detail}")]
    Toolchain { detail: String },
    #[error("pip exited with {code}: {detail}")]
    Failed { code: i32, detail: String },
    #[error("dependency installation exceeded {secs}s")]
    Timeout { secs: u64 },
    #[error("failed to run the dependency installer")]
    Exec(#[source] ExecError),
}

#[derive(Debug, thiserror::Error)]
pub enum ContextCopyError {
    #[error("build context {path} does not exist")]
    Missing { path: PathBuf },
    #[error("cannot access build context {path}")]
    Access {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("build context {path} is not a directory")]
    NotADirectory { path: PathBuf },
    #[error("failed to walk build context at {path}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to hash file {path}")]
    Hash {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to move staged context into {path}")]
    Merge {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Fatal build errors. Every variant aborts the current layer; layers sealed
/// before it stay in the cache.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unresolved base image {reference}: {detail}")]
    UnresolvedBaseImage { reference: String, detail: String },

    #[error("system package installation failed: {0}")]
    PackageInstall(#[from] PackageInstallError),

    #[error("dependency installation failed: {0}")]
    DependencyInstall(#[from] DependencyInstallError),

    #[error("context copy failed: {0}")]
    ContextCopy(#[from] ContextCopyError),

    #[error("unknown timezone {id}: no zone database entry at {path}")]
    UnknownTimezone { id: String, path: PathBuf },

    #[error("layer store failure: {0}")]
    Store(#[from] StoreError),

    #[error("filesystem failure: {0}")]
    Filesystem(#[from] FsError),
}

/// Coarse error classification, stable for reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnresolvedBaseImage,
    PackageInstallError,
    DependencyInstallError,
    ContextCopyError,
    UnknownTimezone,
    Internal,
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnresolvedBaseImage { .. } => ErrorKind::UnresolvedBaseImage,
            Self::PackageInstall(_) => ErrorKind::PackageInstallError,
            Self::DependencyInstall(_) => ErrorKind::DependencyInstallError,
            Self::ContextCopy(_) => ErrorKind::ContextCopyError,
            Self::UnknownTimezone { .. } => ErrorKind::UnknownTimezone,
            Self::Store(_) | Self::Filesystem(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnresolvedBaseImage => "UnresolvedBaseImage",
            Self::PackageInstallError => "PackageInstallError",
            Self::DependencyInstallError => "DependencyInstallError",
            Self::ContextCopyError => "ContextCopyError",
            Self::UnknownTimezone => "UnknownTimezone",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Errors raised when starting a container from a sealed image.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("image {image} has no entry point")]
    NoEntryPoint { image: String },

    #[error("entry point {program:?} not found in the image")]
    EntryPointNotFound { program: String },

    #[error("entry point {path} is not an executable file")]
    EntryPointNotExecutable { path: PathBuf },

    #[error("failed to materialize image filesystem: {0}")]
    Filesystem(#[from] FsError),

    #[error("failed to start container")]
    Exec(#[from] ExecError),
}
