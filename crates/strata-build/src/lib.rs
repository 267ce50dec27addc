//! Layered, cache-keyed image builds for strata.
//!
//! # Build pipeline
//!
//! ```text
//! strata build
//!   1. Base        ── FROM <image>            BaseImageProvider::resolve()
//!   2. Packages    ── RUN apt-get install     SystemPackages
//!   3. Deps        ── COPY manifest; RUN pip  Dependencies
//!   4. Context     ── COPY . <destination>    ContextCopy
//!   5. Timezone    ── RUN ln -snf zoneinfo    Timezone
//!   6. Entry point ── recorded in image config
//!   7. Seal        ── ImageStore::save()
//! ```
//!
//! # Layer keys
//!
//! Every layer is keyed by SHA-256 over its parent's key, its instruction
//! text, and digests of the inputs it reads (base rootfs, manifest bytes,
//! context tree). The dependency layer reads only the manifest, so source
//! edits invalidate the context layer and later ones but never the
//! dependency install.
//!
//! # Store layout
//!
//! ```text
//! <store_root>/
//! ├── base/<name>/<tag>/   # Imported base root filesystems
//! ├── layers/<key>/        # Sealed layers (LayerCache)
//! ├── images/<id>.json     # Sealed images (ImageStore)
//! ├── tags/<tag>
//! └── tmp/                 # Build workspaces and staging
//! ```

pub mod cache;
pub mod context;
pub mod dockerfile;
pub mod eject;
pub mod entrypoint;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod image;
pub mod layer;
pub mod pipeline;
pub mod plan;
pub mod run;
pub mod snapshot;
pub mod steps;

pub use cache::LayerCache;
pub use dockerfile::DockerfileGenerator;
pub use error::{BuildError, ErrorKind, RunError, StoreError};
pub use image::{EnvSet, ImageConfig, ImageStore, SealedImage};
pub use layer::{Layer, LayerKey, StepKind};
pub use pipeline::{BuildFailure, BuildOptions, BuildReport, BuildState, Builder, CacheStatus};
pub use plan::BuildPlan;
pub use run::Launcher;
pub use steps::BaseImageProvider;
