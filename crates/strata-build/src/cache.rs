//! Process-wide layer cache.
//!
//! Layout:
//! ```text
//! <store_root>/
//! ├── layers/<key>/layer.json   # Layer metadata
//! ├── layers/<key>/diff/        # Added or modified entries
//! └── tmp/                      # Staging areas and build workspaces
//! ```
//!
//! Layers are staged under `tmp/` and renamed into `layers/`, so a reader
//! either sees a complete layer or none. Builders producing the same key
//! serialize on [`LayerCache::lock`]; the loser of the race finds the
//! winner's layer on its next [`LayerCache::get`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::fsutil::remove_path;
use crate::layer::{Layer, LayerKey, apply_diff, diff_digest};
use crate::snapshot::Snapshot;

const LAYER_META: &str = "layer.json";
const LAYER_DIFF: &str = "diff";

type LockTable = Mutex<HashMap<LayerKey, Arc<AsyncMutex<()>>>>;

pub struct LayerCache {
    root: PathBuf,
    layers: PathBuf,
    tmp: PathBuf,
    locks: LockTable,
}

/// Producer lock for one layer key, from [`LayerCache::lock`].
///
/// Dropping it releases the key, and removes the key's entry from the lock
/// table once no other builder holds or waits on it.
pub struct LayerLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: LayerKey,
    locks: &'a LockTable,
}

impl Drop for LayerLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_table(self.locks);
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

fn lock_table(locks: &LockTable) -> MutexGuard<'_, HashMap<LayerKey, Arc<AsyncMutex<()>>>> {
    match locks.lock() {
        Ok(table) => table,
        // The table holds no invariant a panicking holder could break.
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl LayerCache {
    /// Open (creating if needed) the cache under `store_root`.
    pub fn open(store_root: &Path) -> Result<Self, StoreError> {
        let layers = store_root.join("layers");
        let tmp = store_root.join("tmp");
        for dir in [&layers, &tmp] {
            fs::create_dir_all(dir).map_err(|e| StoreError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        debug!(root = %store_root.display(), "opened layer cache");
        Ok(Self {
            root: store_root.to_path_buf(),
            layers,
            tmp,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_dir(&self, key: &LayerKey) -> PathBuf {
        self.layers.join(key.as_str())
    }

    pub fn diff_dir(&self, key: &LayerKey) -> PathBuf {
        self.layer_dir(key).join(LAYER_DIFF)
    }

    /// Look up a layer. Entries with unreadable metadata, a mismatched key, or
    /// a missing diff tree are evicted and reported as a miss.
    pub fn get(&self, key: &LayerKey) -> Result<Option<Layer>, StoreError> {
        let meta_path = self.layer_dir(key).join(LAYER_META);
        if !meta_path.exists() {
            return Ok(None);
        }

        let layer = match read_layer(&meta_path) {
            Ok(layer) => layer,
            Err(e) => {
                warn!(key = %key.short(), error = %e, "evicting layer with unreadable metadata");
                self.evict(key)?;
                return Ok(None);
            }
        };
        if layer.key != *key || !self.diff_dir(key).is_dir() {
            warn!(key = %key.short(), "evicting inconsistent layer");
            self.evict(key)?;
            return Ok(None);
        }
        Ok(Some(layer))
    }

    /// Acquire the producer lock for `key`. Held across lookup, production,
    /// and publication of one layer.
    pub async fn lock(&self, key: &LayerKey) -> LayerLock<'_> {
        let mutex = Arc::clone(lock_table(&self.locks).entry(key.clone()).or_default());
        LayerLock {
            guard: Some(mutex.lock_owned().await),
            key: key.clone(),
            locks: &self.locks,
        }
    }

    /// Fresh staging directory for one layer, on the same filesystem as the cache.
    pub fn staging(&self) -> Result<TempDir, StoreError> {
        self.tempdir("layer-")
    }

    /// Scratch workspace for a build or a container root filesystem.
    pub fn workspace(&self) -> Result<TempDir, StoreError> {
        self.tempdir("work-")
    }

    fn tempdir(&self, prefix: &str) -> Result<TempDir, StoreError> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.tmp)
            .map_err(|e| StoreError::Io {
                path: self.tmp.clone(),
                source: e,
            })
    }

    /// Seal a staged layer: write its metadata and rename it into place,
    /// replacing any previous entry for the same key.
    ///
    /// `staged` must contain the layer's `diff/` tree.
    pub fn publish(&self, staged: TempDir, layer: &Layer) -> Result<(), StoreError> {
        let meta_path = staged.path().join(LAYER_META);
        let json = serde_json::to_vec_pretty(layer).map_err(|e| StoreError::Metadata {
            path: meta_path.clone(),
            source: e,
        })?;
        fs::write(&meta_path, json).map_err(|e| StoreError::Io {
            path: meta_path,
            source: e,
        })?;

        let dest = self.layer_dir(&layer.key);
        remove_path(&dest).map_err(|e| StoreError::Io {
            path: dest.clone(),
            source: e,
        })?;

        // On failure `staged` still owns the directory and removes it on drop.
        fs::rename(staged.path(), &dest).map_err(|e| StoreError::Io {
            path: dest.clone(),
            source: e,
        })?;

        info!(key = %layer.key.short(), step = %layer.step, entries = layer.entries, "layer sealed");
        Ok(())
    }

    /// Overlay a cached layer onto `rootfs`.
    pub fn apply(&self, layer: &Layer, rootfs: &Path) -> Result<(), StoreError> {
        apply_diff(layer, &self.diff_dir(&layer.key), rootfs)?;
        Ok(())
    }

    /// Remove a layer. Returns whether anything was removed.
    pub fn evict(&self, key: &LayerKey) -> Result<bool, StoreError> {
        let dir = self.layer_dir(key);
        if !dir.exists() {
            return Ok(false);
        }
        remove_path(&dir).map_err(|e| StoreError::Io {
            path: dir,
            source: e,
        })?;
        info!(key = %key.short(), "layer evicted");
        Ok(true)
    }

    /// Look up a layer and check its content against its recorded digest.
    /// A layer that no longer matches is evicted and reported as a miss.
    pub fn lookup(&self, key: &LayerKey) -> Result<Option<Layer>, StoreError> {
        let Some(layer) = self.get(key)? else {
            return Ok(None);
        };
        if self.content_matches(&layer)? {
            return Ok(Some(layer));
        }
        warn!(key = %key.short(), "layer content does not match its digest; evicting");
        self.evict(key)?;
        Ok(None)
    }

    /// Recompute a layer's diff digest. A mismatching layer is evicted and
    /// `false` returned.
    pub fn verify(&self, key: &LayerKey) -> Result<bool, StoreError> {
        if self.get(key)?.is_none() {
            return Err(StoreError::LayerMissing { key: key.clone() });
        }
        Ok(self.lookup(key)?.is_some())
    }

    fn content_matches(&self, layer: &Layer) -> Result<bool, StoreError> {
        let tree = Snapshot::capture(&self.diff_dir(&layer.key))?;
        Ok(diff_digest(&tree, &layer.removed) == layer.diff_digest)
    }

    /// Every readable layer, ordered by key.
    pub fn list(&self) -> Result<Vec<Layer>, StoreError> {
        let mut layers = Vec::new();
        for key in self.keys()? {
            if let Some(layer) = self.get(&key)? {
                layers.push(layer);
            }
        }
        Ok(layers)
    }

    /// Evict every layer not in `keep`.
    pub fn prune(&self, keep: &HashSet<LayerKey>) -> Result<Vec<LayerKey>, StoreError> {
        let mut evicted = Vec::new();
        for key in self.keys()? {
            if !keep.contains(&key) && self.evict(&key)? {
                evicted.push(key);
            }
        }
        Ok(evicted)
    }

    fn keys(&self) -> Result<Vec<LayerKey>, StoreError> {
        let entries = fs::read_dir(&self.layers).map_err(|e| StoreError::Io {
            path: self.layers.clone(),
            source: e,
        })?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.layers.clone(),
                source: e,
            })?;
            match entry.file_name().to_str().and_then(LayerKey::parse) {
                Some(key) => keys.push(key),
                None => debug!(path = %entry.path().display(), "ignoring foreign entry in layer cache"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn read_layer(path: &Path) -> Result<Layer, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })
}
