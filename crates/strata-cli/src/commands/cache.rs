use std::path::Path;

use strata_build::LayerKey;

use super::{Project, summary};

/// Print one line per cached layer.
pub fn cache_list(config: Option<&Path>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;

    let layers = store.cache.list()?;
    if layers.is_empty() {
        println!("Layer cache is empty.");
        return Ok(());
    }
    println!("{:<14} {:<16} {:>7}  INSTRUCTION", "KEY", "STEP", "ENTRIES");
    for layer in &layers {
        println!(
            "{:<14} {:<16} {:>7}  {}",
            layer.key.short(),
            layer.step.to_string(),
            layer.entries,
            summary(&layer.instruction)
        );
    }
    Ok(())
}

pub fn cache_evict(config: Option<&Path>, key: &str) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;

    let keys: Vec<LayerKey> = store.cache.list()?.into_iter().map(|l| l.key).collect();
    let key = match_key(&keys, key)?;
    store.cache.evict(&key)?;
    println!("Evicted {}", key.short());
    Ok(())
}

/// Verify one layer, or every layer when `key` is `None`.
pub fn cache_verify(config: Option<&Path>, key: Option<&str>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;

    let keys: Vec<LayerKey> = store.cache.list()?.into_iter().map(|l| l.key).collect();
    let targets = match key {
        Some(prefix) => vec![match_key(&keys, prefix)?],
        None => keys,
    };

    let mut evicted = 0;
    for key in &targets {
        if store.cache.verify(key)? {
            println!("OK  {}", key.short());
        } else {
            println!("NG  {} (evicted)", key.short());
            evicted += 1;
        }
    }

    if evicted > 0 {
        anyhow::bail!("{evicted} of {} layer(s) failed verification", targets.len());
    }
    println!("{} layer(s) verified", targets.len());
    Ok(())
}

/// Evict every layer no sealed image depends on.
pub fn cache_prune(config: Option<&Path>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;

    let keep = store.images.referenced_layers()?;
    let evicted = store.cache.prune(&keep)?;
    for key in &evicted {
        println!("Evicted {}", key.short());
    }
    println!("Pruned {} layer(s), {} kept", evicted.len(), keep.len());
    Ok(())
}

/// Resolve a full key or a unique prefix against `keys`.
fn match_key(keys: &[LayerKey], prefix: &str) -> anyhow::Result<LayerKey> {
    if prefix.is_empty() {
        anyhow::bail!("layer key must not be empty");
    }
    let matches: Vec<&LayerKey> = keys
        .iter()
        .filter(|k| k.as_str().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no cached layer matches {prefix:?}"),
        [key] => Ok((*key).clone()),
        _ => anyhow::bail!(
            "layer prefix {prefix:?} is ambiguous ({} matches)",
            matches.len()
        ),
    }
}
