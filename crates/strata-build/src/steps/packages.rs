use std::fs;
use std::path::Path;
use std::time::Duration;

use strata_exec::{CommandOutput, CommandRunner, Invocation};
use tokio::time::Instant;
use tracing::info;

use super::{BUILD_PATH, Step, failure_detail, run_until};
use crate::error::{BuildError, FsError, PackageInstallError};
use crate::fsutil::remove_path;
use crate::layer::StepKind;
use crate::plan::BuildPlan;

/// Transient package index, cleared after installation.
pub const APT_LISTS_DIR: &str = "var/lib/apt/lists";

/// Installs OS packages with apt-get.
#[derive(Debug, Clone)]
pub struct SystemPackages {
    packages: Vec<String>,
    refresh_index: bool,
    timeout: Duration,
}

impl SystemPackages {
    pub fn new(packages: Vec<String>, refresh_index: bool, timeout: Duration) -> Self {
        Self {
            packages,
            refresh_index,
            timeout,
        }
    }

    pub fn from_plan(plan: &BuildPlan) -> Self {
        Self::new(plan.packages.clone(), plan.refresh_index, plan.package_timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn invocation<'a>(&self, rootfs: &Path, argv: impl IntoIterator<Item = &'a str>) -> Invocation {
        Invocation::new(rootfs, argv)
            .env("PATH", BUILD_PATH)
            .env("DEBIAN_FRONTEND", "noninteractive")
    }

    fn timeout_error(&self) -> PackageInstallError {
        PackageInstallError::Timeout {
            secs: self.timeout.as_secs(),
        }
    }
}

impl Step for SystemPackages {
    fn kind(&self) -> StepKind {
        StepKind::SystemPackages
    }

    fn instruction(&self) -> String {
        let install = format!(
            "apt-get install -y --no-install-recommends {}",
            self.packages.join(" ")
        );
        let cleanup = format!("rm -rf /{APT_LISTS_DIR}/*");
        if self.refresh_index {
            format!("RUN apt-get update && {install} && {cleanup}")
        } else {
            format!("RUN {install} && {cleanup}")
        }
    }

    fn inputs(&self) -> Result<Vec<String>, BuildError> {
        Ok(Vec::new())
    }

    async fn apply<R: CommandRunner>(&self, rootfs: &Path, runner: &R) -> Result<(), BuildError> {
        let deadline = Instant::now() + self.timeout;

        if self.refresh_index {
            info!("refreshing package index");
            let update = self.invocation(rootfs, ["apt-get", "update"]);
            let output = run_until(runner, &update, deadline)
                .await
                .map_err(PackageInstallError::Exec)?
                .ok_or_else(|| self.timeout_error())?;
            if !output.success() {
                return Err(classify_refresh(&output).into());
            }
        }

        info!(packages = %self.packages.join(" "), "installing system packages");
        let argv = ["apt-get", "install", "-y", "--no-install-recommends"]
            .into_iter()
            .chain(self.packages.iter().map(String::as_str));
        let install = self.invocation(rootfs, argv);
        let output = run_until(runner, &install, deadline)
            .await
            .map_err(PackageInstallError::Exec)?
            .ok_or_else(|| self.timeout_error())?;
        if !output.success() {
            return Err(classify_apt(&output).into());
        }

        clear_index(rootfs).map_err(PackageInstallError::Cleanup)?;
        Ok(())
    }
}

/// Remove the contents of the package index directory, keeping the directory.
fn clear_index(rootfs: &Path) -> Result<(), FsError> {
    let lists = rootfs.join(APT_LISTS_DIR);
    let entries = match fs::read_dir(&lists) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(FsError::Read {
                path: lists,
                source: e,
            });
        }
    };
    for entry in entries {
        let entry = entry.map_err(|e| FsError::Read {
            path: lists.clone(),
            source: e,
        })?;
        let path = entry.path();
        remove_path(&path).map_err(|e| FsError::Write { path, source: e })?;
    }
    Ok(())
}

fn classify_refresh(output: &CommandOutput) -> PackageInstallError {
    let detail = failure_detail(output);
    if is_network_failure(&output.stderr) {
        return PackageInstallError::Network { detail };
    }
    PackageInstallError::IndexRefresh {
        code: output.code,
        detail,
    }
}

/// Map a failed `apt-get install` to the most specific error its output allows.
pub fn classify_apt(output: &CommandOutput) -> PackageInstallError {
    for line in output.stderr.lines() {
        if let Some(package) = line.split("Unable to locate package ").nth(1) {
            return PackageInstallError::NotFound {
                package: package.trim().to_owned(),
            };
        }
        if line.contains("has no installation candidate") {
            if let Some(rest) = line.split("Package '").nth(1) {
                let package = rest.split_once('\'').map_or(rest, |(package, _)| package);
                return PackageInstallError::NotFound {
                    package: package.to_owned(),
                };
            }
        }
    }

    let detail = failure_detail(output);
    if is_network_failure(&output.stderr) {
        return PackageInstallError::Network { detail };
    }
    if output.stderr.contains("post-installation script")
        || output.stderr.contains("Sub-process /usr/bin/dpkg returned an error code")
    {
        return PackageInstallError::Script { detail };
    }
    PackageInstallError::Failed {
        code: output.code,
        detail,
    }
}

fn is_network_failure(stderr: &str) -> bool {
    ["Temporary failure resolving", "Could not resolve", "Failed to fetch", "Connection failed"]
        .iter()
        .any(|needle| stderr.contains(needle))
}
