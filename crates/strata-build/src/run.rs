//! Starting containers from sealed images.

use std::fs;

use strata_exec::{CommandRunner, Invocation};
use tempfile::TempDir;
use tracing::info;

use crate::cache::LayerCache;
use crate::entrypoint::resolve_entrypoint;
use crate::error::{FsError, RunError, StoreError};
use crate::image::SealedImage;
use crate::steps::BUILD_PATH;

/// `PATH` given to the entry point when the image does not set one.
pub const DEFAULT_PATH: &str = BUILD_PATH;

pub struct Launcher<'a, R> {
    cache: &'a LayerCache,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Launcher<'a, R> {
    pub fn new(cache: &'a LayerCache, runner: &'a R) -> Self {
        Self { cache, runner }
    }

    /// Replay the image's layer chain into a fresh workspace. The root
    /// filesystem is `<workspace>/rootfs`; dropping the workspace removes it.
    pub fn materialize(&self, image: &SealedImage) -> Result<TempDir, RunError> {
        let workspace = self.cache.workspace()?;
        let rootfs = workspace.path().join("rootfs");
        fs::create_dir(&rootfs).map_err(|e| FsError::Write {
            path: rootfs.clone(),
            source: e,
        })?;
        for key in &image.layers {
            let layer = self
                .cache
                .get(key)?
                .ok_or_else(|| StoreError::LayerMissing { key: key.clone() })?;
            self.cache.apply(&layer, &rootfs)?;
        }
        Ok(workspace)
    }

    /// Run the entry point as process 1 and return its exit code.
    pub async fn start(&self, image: &SealedImage) -> Result<i32, RunError> {
        let argv = image
            .config
            .entrypoint
            .clone()
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| RunError::NoEntryPoint {
                image: image.short_id().to_owned(),
            })?;

        let workspace = self.materialize(image)?;
        let rootfs = workspace.path().join("rootfs");
        let path_var = match image.config.env.get("PATH") {
            Some(path) => path,
            None => DEFAULT_PATH,
        };
        let workdir = image.config.working_dir.as_deref();
        resolve_entrypoint(&rootfs, &argv[0], path_var, workdir)?;

        let mut invocation = Invocation::new(&rootfs, argv.iter().map(String::as_str));
        if image.config.env.get("PATH").is_none() {
            invocation = invocation.env("PATH", DEFAULT_PATH);
        }
        invocation = invocation.envs(image.config.env.iter());
        if let Some(dir) = workdir {
            invocation = invocation.workdir(dir);
        }

        info!(image = %image.short_id(), argv = ?argv, "starting container");
        let code = self.runner.exec_init(&invocation).await?;
        info!(image = %image.short_id(), code, "container exited");
        Ok(code)
    }
}
