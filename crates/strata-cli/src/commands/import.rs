use std::path::Path;

use strata_build::hash::short_hash;
use strata_core::ImageRef;

use super::Project;

/// Copy an unpacked root filesystem into the base image store.
pub fn import(config: Option<&Path>, reference: &str, rootfs: &Path) -> anyhow::Result<()> {
    let image: ImageRef = reference.parse()?;
    let project = Project::load(config)?;
    let store = project.open_store()?;
    if store.bases.contains(&image) {
        eprintln!("Replacing existing base image {image}");
    }

    let base = store.bases.import(&image, rootfs)?;
    println!("Imported {image} (digest {})", short_hash(&base.digest));
    Ok(())
}
