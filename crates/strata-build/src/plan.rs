//! Build plan: the fully resolved input of one pipeline run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use strata_core::{ImageRef, StrataConfig, TimezoneId};

use crate::image::EnvSet;

const DEFAULT_PACKAGE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(1200);

#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub base: ImageRef,
    /// Installed in order; duplicates are dropped on insertion.
    pub packages: Vec<String>,
    pub refresh_index: bool,
    pub package_timeout: Duration,
    /// Dependency manifest relative to `context_root`.
    pub manifest: Option<PathBuf>,
    pub dependency_timeout: Duration,
    pub context_root: PathBuf,
    /// Absolute destination of the context inside the image.
    pub destination: String,
    /// Extra context paths left out of the image.
    pub exclude: Vec<String>,
    pub env: EnvSet,
    pub timezone: Option<TimezoneId>,
    entrypoint: Option<Vec<String>>,
}

impl BuildPlan {
    /// A plan with no packages, no manifest, no timezone and no entry point.
    pub fn new(base: ImageRef, context_root: &Path) -> Self {
        Self {
            base,
            packages: Vec::new(),
            refresh_index: true,
            package_timeout: DEFAULT_PACKAGE_TIMEOUT,
            manifest: None,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            context_root: context_root.to_path_buf(),
            destination: "/app".to_owned(),
            exclude: Vec::new(),
            env: EnvSet::new(),
            timezone: None,
            entrypoint: None,
        }
    }

    /// Resolve a validated descriptor against the project directory.
    pub fn from_config(config: &StrataConfig, project_dir: &Path) -> strata_core::Result<Self> {
        config.validate()?;

        let mut plan = Self::new(config.base_image()?, &project_dir.join(&config.context.root));
        plan.add_packages(&config.system.packages);
        plan.refresh_index = config.system.refresh_index;
        plan.package_timeout = Duration::from_secs(config.system.timeout_secs);
        plan.manifest = config.manifest_path()?;
        plan.dependency_timeout = Duration::from_secs(config.dependencies.timeout_secs);
        plan.destination = config.context.destination.clone();
        plan.exclude = config.context.exclude.clone();
        for (key, value) in &config.runtime.env {
            plan.env.set(key, value);
        }
        if let Some(tz) = config.timezone()? {
            plan.set_timezone(tz);
        }
        plan.set_entrypoint(config.entrypoint.command.clone());
        Ok(plan)
    }

    pub fn add_packages<I, S>(&mut self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for package in packages {
            let package = package.as_ref().trim();
            if !package.is_empty() && !self.packages.iter().any(|p| p == package) {
                self.packages.push(package.to_owned());
            }
        }
    }

    /// Set the zone and record `TZ` in the image environment.
    pub fn set_timezone(&mut self, tz: TimezoneId) {
        self.env.set("TZ", tz.as_str());
        self.timezone = Some(tz);
    }

    /// Replace the entry point. Only the last one set is used.
    pub fn set_entrypoint(&mut self, command: Vec<String>) {
        if self.entrypoint.is_some() {
            tracing::debug!("replacing previously declared entry point");
        }
        self.entrypoint = Some(command);
    }

    pub fn entrypoint(&self) -> Option<&[String]> {
        self.entrypoint.as_deref()
    }
}
