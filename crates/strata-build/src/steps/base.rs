use std::fs;
use std::path::{Path, PathBuf};

use strata_core::ImageRef;
use strata_exec::CommandRunner;
use tracing::{debug, info};

use super::Step;
use crate::error::{BuildError, FsError};
use crate::fsutil::{copy_tree, remove_path};
use crate::hash::is_sha256_hex;
use crate::layer::StepKind;
use crate::snapshot::Snapshot;

const ROOTFS_DIR: &str = "rootfs";
const DIGEST_FILE: &str = "digest";

/// Local base image store.
///
/// ```text
/// <store_root>/base/<name>/<tag>/
/// ├── rootfs/   # Root filesystem
/// └── digest    # Pinned content digest of rootfs/
/// ```
///
/// A base directory is treated as immutable once its digest is pinned.
pub struct BaseImageProvider {
    root: PathBuf,
}

impl BaseImageProvider {
    pub fn new(store_root: &Path) -> Self {
        Self {
            root: store_root.join("base"),
        }
    }

    pub fn image_dir(&self, image: &ImageRef) -> PathBuf {
        self.root.join(image.name()).join(image.tag())
    }

    /// Locate and pin a base image. Pinning hashes the whole tree once and
    /// records the digest next to it.
    pub fn resolve(&self, image: &ImageRef) -> Result<BaseImage, BuildError> {
        let dir = self.image_dir(image);
        let rootfs = dir.join(ROOTFS_DIR);
        let unresolved = |detail: String| BuildError::UnresolvedBaseImage {
            reference: image.to_string(),
            detail,
        };
        if !rootfs.is_dir() {
            return Err(unresolved(format!(
                "no root filesystem at {}",
                rootfs.display()
            )));
        }

        let digest_path = dir.join(DIGEST_FILE);
        let digest = if digest_path.is_file() {
            let pinned = fs::read_to_string(&digest_path).map_err(|e| FsError::Read {
                path: digest_path.clone(),
                source: e,
            })?;
            let pinned = pinned.trim().to_owned();
            if !is_sha256_hex(&pinned) {
                return Err(unresolved(format!(
                    "corrupt digest pin at {}",
                    digest_path.display()
                )));
            }
            pinned
        } else {
            info!(image = %image, "pinning base image");
            let digest = Snapshot::capture(&rootfs)?.digest();
            fs::write(&digest_path, &digest).map_err(|e| FsError::Write {
                path: digest_path,
                source: e,
            })?;
            digest
        };

        debug!(image = %image, digest = %crate::hash::short_hash(&digest), "base image resolved");
        Ok(BaseImage {
            reference: image.clone(),
            rootfs,
            digest,
        })
    }

    /// Copy a root filesystem tree into the store under `image`, replacing
    /// any previous import, and pin it.
    pub fn import(&self, image: &ImageRef, source: &Path) -> Result<BaseImage, BuildError> {
        if !source.is_dir() {
            return Err(BuildError::UnresolvedBaseImage {
                reference: image.to_string(),
                detail: format!("{} is not a directory", source.display()),
            });
        }
        let dir = self.image_dir(image);
        remove_path(&dir).map_err(|e| FsError::Write {
            path: dir.clone(),
            source: e,
        })?;
        copy_tree(source, &dir.join(ROOTFS_DIR))?;
        info!(image = %image, source = %source.display(), "base image imported");
        self.resolve(image)
    }

    /// Whether `image` is present in the store.
    pub fn contains(&self, image: &ImageRef) -> bool {
        self.image_dir(image).join(ROOTFS_DIR).is_dir()
    }
}

/// A resolved, pinned base image.
#[derive(Debug, Clone)]
pub struct BaseImage {
    pub reference: ImageRef,
    pub rootfs: PathBuf,
    pub digest: String,
}

impl Step for BaseImage {
    fn kind(&self) -> StepKind {
        StepKind::Base
    }

    fn instruction(&self) -> String {
        format!("FROM {}", self.reference)
    }

    fn inputs(&self) -> Result<Vec<String>, BuildError> {
        Ok(vec![self.digest.clone()])
    }

    async fn apply<R: CommandRunner>(&self, rootfs: &Path, _runner: &R) -> Result<(), BuildError> {
        let copied = copy_tree(&self.rootfs, rootfs)?;
        debug!(entries = copied, "base filesystem copied");
        Ok(())
    }
}
