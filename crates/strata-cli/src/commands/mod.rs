mod build;
mod cache;
mod doctor;
mod eject;
mod images;
mod import;
mod init;
mod run;

use std::path::{Path, PathBuf};

use strata_build::{BaseImageProvider, BuildPlan, ImageStore, LayerCache};
use strata_core::StrataConfig;

pub use build::build;
pub use cache::{cache_evict, cache_list, cache_prune, cache_verify};
pub use doctor::doctor;
pub use eject::eject;
pub use images::{images, inspect};
pub use import::import;
pub use init::init_project;
pub use run::run;

/// A project directory with its descriptor and store location.
pub(crate) struct Project {
    pub dir: PathBuf,
    pub config: StrataConfig,
    pub store_root: PathBuf,
}

impl Project {
    /// Load the descriptor from `config_path`, or `./strata.toml` (falling
    /// back to defaults) when none is given. Relative paths in the
    /// descriptor resolve against the directory holding it.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let (dir, config) = match config_path {
            Some(path) => {
                let dir = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                (dir, StrataConfig::load_file(path)?)
            }
            None => {
                let dir = PathBuf::from(".");
                let config = StrataConfig::load(&dir)?;
                (dir, config)
            }
        };
        let store_root = config.store_root(&dir);
        Ok(Self {
            dir,
            config,
            store_root,
        })
    }

    pub fn plan(&self) -> anyhow::Result<BuildPlan> {
        Ok(BuildPlan::from_config(&self.config, &self.dir)?)
    }

    pub fn open_store(&self) -> anyhow::Result<Store> {
        Ok(Store {
            cache: LayerCache::open(&self.store_root)?,
            images: ImageStore::open(&self.store_root)?,
            bases: BaseImageProvider::new(&self.store_root),
        })
    }
}

pub(crate) struct Store {
    pub cache: LayerCache,
    pub images: ImageStore,
    pub bases: BaseImageProvider,
}

/// Instruction text on one line, for listings.
pub(crate) fn summary(instruction: &str) -> String {
    instruction.lines().collect::<Vec<_>>().join("; ")
}
