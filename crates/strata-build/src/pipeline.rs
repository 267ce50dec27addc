//! The build pipeline.
//!
//! ```text
//! Pending
//!   → BaseResolved             FROM <image>
//!   → SystemPackagesInstalled  RUN apt-get ...        (skipped if no packages)
//!   → DependenciesInstalled    COPY manifest; RUN pip (skipped if no manifest)
//!   → ContextMaterialized      COPY . <destination>
//!   → RuntimeConfigured        ENV TZ; RUN ln -snf    (skipped if no timezone)
//!   → EntryPointSet
//!   → Sealed                   image recorded in the store
//! ```
//!
//! Any fatal error moves the build to `Failed`. Layers sealed before the
//! failure stay in the cache; no image is recorded, including when the
//! final tag cannot be written.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use strata_exec::CommandRunner;
use tracing::{debug, error, info};

use crate::cache::LayerCache;
use crate::error::{BuildError, ErrorKind, FsError, StoreError};
use crate::image::{ImageConfig, ImageStore, SealedImage, is_valid_tag};
use crate::layer::{Layer, LayerKey, StepKind, diff_digest, stage_diff};
use crate::plan::BuildPlan;
use crate::snapshot::Snapshot;
use crate::steps::{BaseImageProvider, ContextCopy, Dependencies, Step, SystemPackages, Timezone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Pending,
    BaseResolved,
    SystemPackagesInstalled,
    DependenciesInstalled,
    ContextMaterialized,
    RuntimeConfigured,
    EntryPointSet,
    Sealed,
    Failed,
}

impl BuildState {
    /// Successor on the success path.
    pub fn next(self) -> Option<Self> {
        use BuildState::*;
        match self {
            Pending => Some(BaseResolved),
            BaseResolved => Some(SystemPackagesInstalled),
            SystemPackagesInstalled => Some(DependenciesInstalled),
            DependenciesInstalled => Some(ContextMaterialized),
            ContextMaterialized => Some(RuntimeConfigured),
            RuntimeConfigured => Some(EntryPointSet),
            EntryPointSet => Some(Sealed),
            Sealed | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sealed | Self::Failed)
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        match to {
            Self::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::BaseResolved => "BaseResolved",
            Self::SystemPackagesInstalled => "SystemPackagesInstalled",
            Self::DependenciesInstalled => "DependenciesInstalled",
            Self::ContextMaterialized => "ContextMaterialized",
            Self::RuntimeConfigured => "RuntimeConfigured",
            Self::EntryPointSet => "EntryPointSet",
            Self::Sealed => "Sealed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hit => "CACHED",
            Self::Miss => "BUILT",
        })
    }
}

/// One layer-producing step of a build.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: StepKind,
    pub key: LayerKey,
    pub instruction: String,
    pub cache: CacheStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub image: SealedImage,
    pub steps: Vec<StepRecord>,
    /// Every state the build passed through, `Pending` first.
    pub states: Vec<BuildState>,
}

#[derive(Debug, thiserror::Error)]
#[error("build failed in state {state}: {error}")]
pub struct BuildFailure {
    /// State the build was in when the error occurred.
    pub state: BuildState,
    #[source]
    pub error: BuildError,
    /// Steps that completed (and whose layers are cached) before the failure.
    pub completed: Vec<StepRecord>,
    /// Every state the build passed through, ending in `Failed`.
    pub states: Vec<BuildState>,
}

impl BuildFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild every layer, replacing cached ones.
    pub no_cache: bool,
    /// Tag to point at the sealed image.
    pub tag: Option<String>,
}

pub struct Builder<'a, R> {
    cache: &'a LayerCache,
    images: &'a ImageStore,
    bases: &'a BaseImageProvider,
    runner: &'a R,
    options: BuildOptions,
}

/// Mutable state of one build: the working root filesystem and the layer
/// chain produced so far.
struct Chain {
    rootfs: PathBuf,
    layers: Vec<LayerKey>,
    /// Snapshot of `rootfs` if it is known to be current.
    snapshot: Option<Snapshot>,
}

impl Chain {
    fn parent(&self) -> Option<&LayerKey> {
        self.layers.last()
    }
}

struct Progress {
    states: Vec<BuildState>,
    steps: Vec<StepRecord>,
}

impl Progress {
    fn state(&self) -> BuildState {
        match self.states.last() {
            Some(state) => *state,
            None => BuildState::Pending,
        }
    }

    fn advance(&mut self, to: BuildState) {
        debug_assert!(self.state().can_transition_to(to), "{} -> {to}", self.state());
        debug!(from = %self.state(), to = %to, "build state");
        self.states.push(to);
    }
}

impl<'a, R: CommandRunner> Builder<'a, R> {
    pub fn new(
        cache: &'a LayerCache,
        images: &'a ImageStore,
        bases: &'a BaseImageProvider,
        runner: &'a R,
    ) -> Self {
        Self {
            cache,
            images,
            bases,
            runner,
            options: BuildOptions::default(),
        }
    }

    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every step of `plan` in order and seal the result.
    pub async fn build(&self, plan: &BuildPlan) -> Result<BuildReport, BuildFailure> {
        let mut progress = Progress {
            states: vec![BuildState::Pending],
            steps: Vec::new(),
        };
        match self.run(plan, &mut progress).await {
            Ok(image) => {
                info!(image = %image.short_id(), layers = image.layers.len(), "image sealed");
                Ok(BuildReport {
                    image,
                    steps: progress.steps,
                    states: progress.states,
                })
            }
            Err(err) => {
                let state = progress.state();
                progress.advance(BuildState::Failed);
                error!(state = %state, kind = %err.kind(), error = %err, "build failed");
                Err(BuildFailure {
                    state,
                    error: err,
                    completed: progress.steps,
                    states: progress.states,
                })
            }
        }
    }

    async fn run(&self, plan: &BuildPlan, progress: &mut Progress) -> Result<SealedImage, BuildError> {
        if let Some(tag) = &self.options.tag {
            if !is_valid_tag(tag) {
                return Err(StoreError::InvalidTag { tag: tag.clone() }.into());
            }
        }

        let workspace = self.cache.workspace()?;
        let rootfs = workspace.path().join("rootfs");
        fs::create_dir(&rootfs).map_err(|e| FsError::Write {
            path: rootfs.clone(),
            source: e,
        })?;
        let mut chain = Chain {
            rootfs,
            layers: Vec::new(),
            snapshot: Some(Snapshot::default()),
        };

        let base = self.bases.resolve(&plan.base)?;
        progress.steps.push(self.run_step(&mut chain, &base).await?);
        progress.advance(BuildState::BaseResolved);

        let packages = SystemPackages::from_plan(plan);
        if packages.is_empty() {
            info!("no system packages requested; skipping");
        } else {
            progress.steps.push(self.run_step(&mut chain, &packages).await?);
        }
        progress.advance(BuildState::SystemPackagesInstalled);

        match Dependencies::from_plan(plan) {
            Some(dependencies) => {
                progress.steps.push(self.run_step(&mut chain, &dependencies).await?);
            }
            None => info!("no dependency manifest configured; skipping"),
        }
        progress.advance(BuildState::DependenciesInstalled);

        let mut context = ContextCopy::from_plan(plan);
        if let Some(store) = store_in_context(self.cache.root(), &plan.context_root) {
            context.exclude(store.to_string_lossy());
        }
        progress.steps.push(self.run_step(&mut chain, &context).await?);
        progress.advance(BuildState::ContextMaterialized);

        let mut env = plan.env.clone();
        match &plan.timezone {
            Some(tz) => {
                env.set("TZ", tz.as_str());
                let step = Timezone::new(tz.clone());
                progress.steps.push(self.run_step(&mut chain, &step).await?);
            }
            None => info!("no timezone configured; skipping"),
        }
        progress.advance(BuildState::RuntimeConfigured);

        let entrypoint = plan.entrypoint().map(<[String]>::to_vec);
        if entrypoint.is_none() {
            info!("no entry point declared; the image will not be runnable");
        }
        progress.advance(BuildState::EntryPointSet);

        let config = ImageConfig {
            env,
            entrypoint,
            working_dir: Some(plan.destination.clone()),
        };
        let image = SealedImage::seal(&plan.base.to_string(), chain.layers, config);
        self.images.publish(&image, self.options.tag.as_deref())?;
        progress.advance(BuildState::Sealed);
        Ok(image)
    }

    /// Produce or reuse the layer for `step` on top of the chain.
    async fn run_step<S: Step>(&self, chain: &mut Chain, step: &S) -> Result<StepRecord, BuildError> {
        let started = Instant::now();
        let kind = step.kind();
        let instruction = step.instruction();
        let inputs = step.inputs()?;
        let key = LayerKey::derive(chain.parent(), &instruction, &inputs);

        // Held until the layer is applied or published.
        let _producer = self.cache.lock(&key).await;

        if !self.options.no_cache {
            if let Some(layer) = self.cache.lookup(&key)? {
                self.cache.apply(&layer, &chain.rootfs)?;
                chain.snapshot = None;
                chain.layers.push(key.clone());
                info!(step = %kind, key = %key.short(), "CACHED");
                return Ok(StepRecord {
                    step: kind,
                    key,
                    instruction,
                    cache: CacheStatus::Hit,
                    elapsed: started.elapsed(),
                });
            }
        }

        info!(step = %kind, key = %key.short(), "building layer");
        let before = match chain.snapshot.take() {
            Some(snapshot) => snapshot,
            None => Snapshot::capture(&chain.rootfs)?,
        };
        step.apply(&chain.rootfs, self.runner).await?;
        let after = Snapshot::capture(&chain.rootfs)?;

        let staged = self.cache.staging()?;
        let diff_dir = staged.path().join("diff");
        let diff = stage_diff(&chain.rootfs, &before, &after, &diff_dir)?;
        let layer = Layer {
            key: key.clone(),
            parent: chain.parent().cloned(),
            step: kind,
            instruction: instruction.clone(),
            diff_digest: diff_digest(&Snapshot::capture(&diff_dir)?, &diff.removed),
            removed: diff.removed,
            entries: diff.changed.len(),
        };
        self.cache.publish(staged, &layer)?;

        chain.snapshot = Some(after);
        chain.layers.push(key.clone());
        info!(step = %kind, key = %key.short(), entries = layer.entries, "BUILT");
        Ok(StepRecord {
            step: kind,
            key,
            instruction,
            cache: CacheStatus::Miss,
            elapsed: started.elapsed(),
        })
    }
}

/// The store's location relative to the context root, if the store lies
/// inside the context. Both paths are canonicalized first, so a relative
/// context and an absolute store (or a symlinked checkout) still compare.
fn store_in_context(store: &Path, context_root: &Path) -> Option<PathBuf> {
    let (Ok(store), Ok(root)) = (fs::canonicalize(store), fs::canonicalize(context_root)) else {
        return None;
    };
    relative_inside(&store, &root)
}

/// `path` relative to `root`, if it lies strictly inside it.
fn relative_inside(path: &Path, root: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    for expected in root.components() {
        if components.next() != Some(expected) {
            return None;
        }
    }
    let rest: PathBuf = components.collect();
    (!rest.as_os_str().is_empty()).then_some(rest)
}
