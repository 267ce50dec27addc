use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strata_exec::{CommandOutput, CommandRunner, Invocation};
use tokio::time::Instant;
use tracing::info;

use super::manifest::{decode_manifest, parse_requirements};
use super::{BUILD_PATH, Step, failure_detail, run_until};
use crate::error::{BuildError, DependencyInstallError};
use crate::fsutil::in_root;
use crate::hash::hash_bytes;
use crate::layer::StepKind;
use crate::plan::BuildPlan;

/// Copies the dependency manifest alone into the image and installs it with
/// pip. The layer key depends on the manifest's bytes only, so source edits
/// elsewhere in the context leave it cached.
#[derive(Debug, Clone)]
pub struct Dependencies {
    context_root: PathBuf,
    manifest: PathBuf,
    destination: String,
    timeout: Duration,
}

impl Dependencies {
    pub fn new(context_root: &Path, manifest: &Path, destination: &str, timeout: Duration) -> Self {
        Self {
            context_root: context_root.to_path_buf(),
            manifest: manifest.to_path_buf(),
            destination: destination.to_owned(),
            timeout,
        }
    }

    /// `None` when the plan has no manifest.
    pub fn from_plan(plan: &BuildPlan) -> Option<Self> {
        plan.manifest.as_ref().map(|manifest| {
            Self::new(
                &plan.context_root,
                manifest,
                &plan.destination,
                plan.dependency_timeout,
            )
        })
    }

    /// Host path of the manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.context_root.join(&self.manifest)
    }

    /// Path of the manifest inside the image.
    pub fn image_path(&self) -> String {
        format!(
            "{}/{}",
            self.destination.trim_end_matches('/'),
            self.manifest.display()
        )
    }

    fn read_manifest(&self) -> Result<Vec<u8>, DependencyInstallError> {
        let path = self.manifest_path();
        fs::read(&path).map_err(|e| DependencyInstallError::ManifestRead { path, source: e })
    }
}

impl Step for Dependencies {
    fn kind(&self) -> StepKind {
        StepKind::Dependencies
    }

    fn instruction(&self) -> String {
        let image_path = self.image_path();
        format!(
            "COPY {} {image_path}\nRUN pip install --no-cache-dir -r {image_path}",
            self.manifest.display()
        )
    }

    fn inputs(&self) -> Result<Vec<String>, BuildError> {
        Ok(vec![hash_bytes(&self.read_manifest()?)])
    }

    async fn apply<R: CommandRunner>(&self, rootfs: &Path, runner: &R) -> Result<(), BuildError> {
        let bytes = self.read_manifest()?;
        let manifest_path = self.manifest_path();
        let content = decode_manifest(&manifest_path, &bytes)?;
        let requirements = parse_requirements(&manifest_path, content)?;

        let image_path = self.image_path();
        let target = in_root(rootfs, Path::new(&image_path));
        let copy_err = |e| DependencyInstallError::ManifestCopy {
            path: PathBuf::from(&image_path),
            source: e,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(copy_err)?;
        }
        fs::write(&target, &bytes).map_err(copy_err)?;

        if requirements.is_empty() {
            info!(manifest = %self.manifest.display(), "manifest declares no requirements");
            return Ok(());
        }

        info!(count = requirements.len(), "installing dependencies");
        let invocation = Invocation::new(
            rootfs,
            ["pip", "install", "--no-cache-dir", "-r", image_path.as_str()],
        )
        .env("PATH", BUILD_PATH)
        .env("HOME", "/root")
        .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");

        let deadline = Instant::now() + self.timeout;
        let output = run_until(runner, &invocation, deadline)
            .await
            .map_err(DependencyInstallError::Exec)?
            .ok_or(DependencyInstallError::Timeout {
                secs: self.timeout.as_secs(),
            })?;
        if !output.success() {
            return Err(classify_pip(&output).into());
        }
        Ok(())
    }
}

/// Map a failed `pip install` to the most specific error its output allows.
pub fn classify_pip(output: &CommandOutput) -> DependencyInstallError {
    for line in output.stderr.lines() {
        if let Some(rest) = line.split("No matching distribution found for ").nth(1) {
            return DependencyInstallError::Unresolved {
                requirement: rest.trim().to_owned(),
            };
        }
        if let Some(rest) = line
            .split("Could not find a version that satisfies the requirement ")
            .nth(1)
        {
            let requirement = rest.split_once(" (from").map_or(rest, |(requirement, _)| requirement);
            return DependencyInstallError::Unresolved {
                requirement: requirement.trim().to_owned(),
            };
        }
    }

    let detail = failure_detail(output);
    if output.stderr.contains("ResolutionImpossible") {
        return DependencyInstallError::Unresolved {
            requirement: detail,
        };
    }
    let toolchain_markers = [
        "Failed building wheel for",
        "Failed to build",
        "subprocess-exited-with-error",
        "error: command '",
    ];
    if toolchain_markers.iter().any(|m| output.stderr.contains(m)) {
        return DependencyInstallError::Toolchain { detail };
    }
    DependencyInstallError::Failed {
        code: output.code,
        detail,
    }
}
