use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use strata_exec::CommandRunner;
use tracing::info;

use super::Step;
use crate::context::BuildContext;
use crate::error::{BuildError, ContextCopyError, FsError};
use crate::fsutil::{copy_tree, in_root};
use crate::layer::StepKind;
use crate::plan::BuildPlan;

/// Mode of a destination directory created by the copy.
const DEST_MODE: u32 = 0o755;

/// Copies the build context into the application root.
///
/// The tree is staged next to the root filesystem first, so a failing copy
/// never leaves a half-written destination behind.
#[derive(Debug, Clone)]
pub struct ContextCopy {
    root: PathBuf,
    exclude: Vec<String>,
    destination: String,
}

impl ContextCopy {
    pub fn new(root: &Path, exclude: &[String], destination: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            exclude: exclude.to_vec(),
            destination: destination.to_owned(),
        }
    }

    pub fn from_plan(plan: &BuildPlan) -> Self {
        Self::new(&plan.context_root, &plan.exclude, &plan.destination)
    }

    /// Leave `pattern` out of the copy as well.
    pub fn exclude(&mut self, pattern: impl Into<String>) {
        self.exclude.push(pattern.into());
    }

    pub fn context(&self) -> Result<BuildContext, ContextCopyError> {
        BuildContext::open(&self.root, &self.exclude)
    }
}

impl Step for ContextCopy {
    fn kind(&self) -> StepKind {
        StepKind::Context
    }

    fn instruction(&self) -> String {
        format!("COPY . {}", self.destination)
    }

    fn inputs(&self) -> Result<Vec<String>, BuildError> {
        Ok(vec![self.context()?.digest()?])
    }

    async fn apply<R: CommandRunner>(&self, rootfs: &Path, _runner: &R) -> Result<(), BuildError> {
        let context = self.context()?;
        let staging_parent = match rootfs.parent() {
            Some(dir) => dir,
            None => rootfs,
        };
        let staged = tempfile::Builder::new()
            .prefix("context-")
            .tempdir_in(staging_parent)
            .map_err(|e| ContextCopyError::Create {
                path: staging_parent.to_path_buf(),
                source: e,
            })?;
        let count = context.copy_into(staged.path())?;

        let dest = in_root(rootfs, Path::new(&self.destination));
        let merge_err = |e| ContextCopyError::Merge {
            path: dest.clone(),
            source: e,
        };
        if dest.exists() {
            copy_tree(staged.path(), &dest).map_err(|e| match e {
                FsError::Walk { root, source } => ContextCopyError::Walk { path: root, source },
                FsError::Read { source, .. } | FsError::Write { source, .. } => merge_err(source),
            })?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(merge_err)?;
            }
            let staged_path = staged.keep();
            fs::set_permissions(&staged_path, fs::Permissions::from_mode(DEST_MODE))
                .map_err(merge_err)?;
            fs::rename(&staged_path, &dest).map_err(merge_err)?;
        }

        info!(files = count, destination = %self.destination, "context materialized");
        Ok(())
    }
}
