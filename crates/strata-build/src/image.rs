//! Sealed images and their on-disk store.
//!
//! Layout:
//! ```text
//! <store_root>/
//! ├── images/<id>.json   # SealedImage
//! └── tags/<tag>         # Image id
//! ```
//! Only the pipeline's final transition writes here, so every stored image is
//! runnable.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash::{hash_fields, short_hash};
use crate::layer::LayerKey;

const MIN_PREFIX_LEN: usize = 4;

/// Environment recorded in image metadata. Keys are unique; setting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvSet(Vec<(String, String)>);

impl EnvSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.0.push((key.to_owned(), value.to_owned())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runtime metadata of an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub env: EnvSet,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedImage {
    /// SHA-256 over base, layer chain, and config.
    pub id: String,
    pub base: String,
    /// Layer chain, base first.
    pub layers: Vec<LayerKey>,
    pub config: ImageConfig,
}

impl SealedImage {
    pub fn seal(base: &str, layers: Vec<LayerKey>, config: ImageConfig) -> Self {
        let id = image_id(base, &layers, &config);
        Self {
            id,
            base: base.to_owned(),
            layers,
            config,
        }
    }

    pub fn short_id(&self) -> &str {
        short_hash(&self.id)
    }
}

pub struct ImageStore {
    images: PathBuf,
    tags: PathBuf,
}

impl ImageStore {
    pub fn open(store_root: &Path) -> Result<Self, StoreError> {
        let images = store_root.join("images");
        let tags = store_root.join("tags");
        for dir in [&images, &tags] {
            fs::create_dir_all(dir).map_err(|e| StoreError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(Self { images, tags })
    }

    /// Persist an image. Written to a temporary name and renamed.
    pub fn save(&self, image: &SealedImage) -> Result<(), StoreError> {
        let path = self.record_path(&image.id);
        let tmp = self.images.join(format!(".{}.json.tmp", image.id));
        let json = serde_json::to_vec_pretty(image).map_err(|e| StoreError::Metadata {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&tmp, json).map_err(|e| StoreError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io { path, source: e })
    }

    /// Save `image` and point `tag` at it. When tagging fails, a record this
    /// call created is removed again; a record that was already published by
    /// an earlier build is left alone.
    pub fn publish(&self, image: &SealedImage, tag: Option<&str>) -> Result<(), StoreError> {
        let path = self.record_path(&image.id);
        let existed = path.is_file();
        self.save(image)?;
        let Some(tag) = tag else {
            return Ok(());
        };
        if let Err(e) = self.tag(tag, &image.id) {
            if !existed {
                fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
            }
            return Err(e);
        }
        Ok(())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.images.join(format!("{id}.json"))
    }

    pub fn load(&self, id: &str) -> Result<SealedImage, StoreError> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ImageNotFound {
                    reference: id.to_owned(),
                });
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Metadata { path, source: e })
    }

    /// Point `tag` at an image id, replacing any previous target.
    pub fn tag(&self, tag: &str, id: &str) -> Result<(), StoreError> {
        if !is_valid_tag(tag) {
            return Err(StoreError::InvalidTag {
                tag: tag.to_owned(),
            });
        }
        let path = self.tags.join(tag);
        fs::write(&path, id).map_err(|e| StoreError::Io { path, source: e })
    }

    /// Resolve a tag, full id, or unique id prefix (at least 4 characters).
    pub fn resolve(&self, reference: &str) -> Result<SealedImage, StoreError> {
        if is_valid_tag(reference) {
            let tag_path = self.tags.join(reference);
            if tag_path.is_file() {
                let id = fs::read_to_string(&tag_path).map_err(|e| StoreError::Io {
                    path: tag_path,
                    source: e,
                })?;
                return self.load(id.trim());
            }
        }

        let not_found = || StoreError::ImageNotFound {
            reference: reference.to_owned(),
        };
        if reference.len() < MIN_PREFIX_LEN {
            return Err(not_found());
        }
        let mut candidates: Vec<String> = self
            .ids()?
            .into_iter()
            .filter(|id| id.starts_with(reference))
            .collect();
        match candidates.len() {
            0 => Err(not_found()),
            1 => self.load(&candidates.remove(0)),
            _ => Err(StoreError::AmbiguousImage {
                prefix: reference.to_owned(),
                candidates,
            }),
        }
    }

    pub fn list(&self) -> Result<Vec<SealedImage>, StoreError> {
        self.ids()?.iter().map(|id| self.load(id)).collect()
    }

    /// Tags pointing at each image id.
    pub fn tags_of(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let mut tags = Vec::new();
        for entry in read_dir(&self.tags)? {
            let path = entry.path();
            let target = fs::read_to_string(&path).map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            if target.trim() == id {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Every layer some stored image depends on.
    pub fn referenced_layers(&self) -> Result<HashSet<LayerKey>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .flat_map(|image| image.layers)
            .collect())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = read_dir(&self.images)?
            .into_iter()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json")
                    .filter(|stem| !stem.starts_with('.'))
                    .map(str::to_owned)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Digest over a length-prefixed listing of every field, counts first so
/// adjacent lists cannot be confused.
fn image_id(base: &str, layers: &[LayerKey], config: &ImageConfig) -> String {
    let mut fields: Vec<String> = vec![base.to_owned(), layers.len().to_string()];
    fields.extend(layers.iter().map(|k| k.as_str().to_owned()));
    fields.push(config.env.len().to_string());
    for (key, value) in config.env.iter() {
        fields.push(key.to_owned());
        fields.push(value.to_owned());
    }
    match &config.entrypoint {
        Some(argv) => {
            fields.push(argv.len().to_string());
            fields.extend(argv.iter().cloned());
        }
        None => fields.push("none".to_owned()),
    }
    fields.push(match &config.working_dir {
        Some(dir) => dir.clone(),
        None => String::new(),
    });
    hash_fields(fields)
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    entries
        .map(|entry| {
            entry.map_err(|e| StoreError::Io {
                path: dir.to_path_buf(),
                source: e,
            })
        })
        .collect()
}

/// Tags are plain file names under `tags/`.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
}
