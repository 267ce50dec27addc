use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, ImageRef, TimezoneId};

/// File name of the build descriptor inside a project directory.
pub const CONFIG_FILE: &str = "strata.toml";
/// Environment variable overriding `[store].root`.
pub const STORE_ENV: &str = "STRATA_STORE";

/// strata.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub image: BaseImageConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub dependencies: DependencyConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub entrypoint: EntrypointConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseImageConfig {
    /// Base image repository name
    #[serde(default = "default_image_name")]
    pub name: String,
    /// Base image version tag
    #[serde(default = "default_image_tag")]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// OS packages installed via apt-get, in order
    #[serde(default = "default_system_packages")]
    pub packages: Vec<String>,
    /// Refresh the package index before installing
    #[serde(default = "default_true")]
    pub refresh_index: bool,
    /// Upper bound for the whole package step
    #[serde(default = "default_system_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Dependency manifest, relative to the context root.
    /// An empty string disables the dependency layer.
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Upper bound for the pip install step
    #[serde(default = "default_dependency_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Build context root, relative to the project directory
    #[serde(default = "default_context_root")]
    pub root: String,
    /// Absolute destination of the context inside the image
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Extra paths (relative to the context root) left out of the image
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Zone database identifier. An empty string skips timezone configuration.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Static environment variables recorded in the image.
    /// `TZ` is always overridden by `timezone` when one is set.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrypointConfig {
    /// Command vector run as process 1
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Layer cache and image store location, relative to the project directory
    #[serde(default = "default_store_root")]
    pub root: String,
}

impl Default for BaseImageConfig {
    fn default() -> Self {
        Self {
            name: default_image_name(),
            tag: default_image_tag(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            packages: default_system_packages(),
            refresh_index: true,
            timeout_secs: default_system_timeout(),
        }
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            timeout_secs: default_dependency_timeout(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root: default_context_root(),
            destination: default_destination(),
            exclude: Vec::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for EntrypointConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

impl StrataConfig {
    /// Load from strata.toml in the given directory, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load_file(&config_path)
        } else {
            tracing::debug!(dir = %project_dir.display(), "no strata.toml; using defaults");
            Ok(Self::default())
        }
    }

    /// Load from an explicit descriptor path. The file must exist.
    pub fn load_file(config_path: &Path) -> crate::Result<Self> {
        let content =
            std::fs::read_to_string(config_path).map_err(|e| crate::Error::ConfigLoad {
                path: config_path.to_path_buf(),
                source: e,
            })?;
        toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Check every descriptor field that can be checked without touching
    /// an image filesystem.
    pub fn validate(&self) -> crate::Result<()> {
        self.base_image()?;
        self.timezone()?;
        self.manifest_path()?;

        let dest = &self.context.destination;
        if !dest.starts_with('/') {
            return Err(Error::InvalidDestination {
                path: dest.clone(),
                reason: "destination must be an absolute path",
            });
        }
        if Path::new(dest)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidDestination {
                path: dest.clone(),
                reason: "destination must not contain '..'",
            });
        }

        for name in self.runtime.env.keys() {
            if !is_valid_env_name(name) {
                return Err(Error::InvalidEnvName { name: name.clone() });
            }
        }

        if self.entrypoint.command.is_empty() {
            return Err(Error::EmptyEntrypoint);
        }
        Ok(())
    }

    pub fn base_image(&self) -> crate::Result<ImageRef> {
        ImageRef::new(&self.image.name, &self.image.tag)
    }

    /// Configured timezone, or `None` when timezone configuration is disabled.
    pub fn timezone(&self) -> crate::Result<Option<TimezoneId>> {
        if self.runtime.timezone.is_empty() {
            return Ok(None);
        }
        self.runtime.timezone.parse().map(Some)
    }

    /// Manifest path relative to the context root, or `None` when disabled.
    pub fn manifest_path(&self) -> crate::Result<Option<PathBuf>> {
        let raw = &self.dependencies.manifest;
        if raw.is_empty() {
            return Ok(None);
        }
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            return Err(Error::InvalidManifestPath {
                path: raw.clone(),
                reason: "manifest must be relative to the context root",
            });
        }
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidManifestPath {
                path: raw.clone(),
                reason: "manifest must stay inside the context root",
            });
        }
        Ok(Some(path))
    }

    /// Resolve the store root. `STRATA_STORE` wins over `[store].root`.
    pub fn store_root(&self, project_dir: &Path) -> PathBuf {
        let raw = match std::env::var(STORE_ENV) {
            Ok(value) if !value.is_empty() => value,
            _ => self.store.root.clone(),
        };
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            project_dir.join(path)
        }
    }
}

/// POSIX portable environment variable name.
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_image_name() -> String {
    "python".to_owned()
}

fn default_image_tag() -> String {
    "3.8".to_owned()
}

fn default_system_packages() -> Vec<String> {
    ["build-essential", "default-libmysqlclient-dev", "netcat"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_system_timeout() -> u64 {
    600
}

fn default_manifest() -> String {
    "requirements.txt".to_owned()
}

fn default_dependency_timeout() -> u64 {
    1200
}

fn default_context_root() -> String {
    ".".to_owned()
}

fn default_destination() -> String {
    "/app".to_owned()
}

fn default_timezone() -> String {
    "America/Detroit".to_owned()
}

fn default_command() -> Vec<String> {
    vec!["/app/start.sh".to_owned()]
}

fn default_store_root() -> String {
    ".strata".to_owned()
}
