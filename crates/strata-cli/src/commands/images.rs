use std::path::Path;

use super::{Project, summary};

/// Print one line per sealed image.
pub fn images(config: Option<&Path>) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;

    let images = store.images.list()?;
    if images.is_empty() {
        println!("No images. Run `strata build` first.");
        return Ok(());
    }

    println!("{:<14} {:<16} {:>6}  TAGS", "IMAGE", "BASE", "LAYERS");
    for image in &images {
        let tags = store.images.tags_of(&image.id)?;
        println!(
            "{:<14} {:<16} {:>6}  {}",
            image.short_id(),
            image.base,
            image.layers.len(),
            tags.join(", ")
        );
    }
    Ok(())
}

/// Show an image's layer chain and runtime configuration.
pub fn inspect(config: Option<&Path>, reference: &str, json: bool) -> anyhow::Result<()> {
    let project = Project::load(config)?;
    let store = project.open_store()?;
    let image = store.images.resolve(reference)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&image)?);
        return Ok(());
    }

    println!("Image:       {}", image.id);
    println!("Base:        {}", image.base);
    let tags = store.images.tags_of(&image.id)?;
    if !tags.is_empty() {
        println!("Tags:        {}", tags.join(", "));
    }
    if let Some(dir) = &image.config.working_dir {
        println!("Working dir: {dir}");
    }
    match &image.config.entrypoint {
        Some(argv) => println!("Entry point: {}", serde_json::to_string(argv)?),
        None => println!("Entry point: (none)"),
    }

    if !image.config.env.is_empty() {
        println!();
        println!("Environment:");
        for (key, value) in image.config.env.iter() {
            println!("  {key}={value}");
        }
    }

    println!();
    println!("Layers:");
    for key in &image.layers {
        match store.cache.get(key)? {
            Some(layer) => println!(
                "  {}  {:<16} {}",
                key.short(),
                layer.step.to_string(),
                summary(&layer.instruction)
            ),
            None => println!("  {}  (evicted)", key.short()),
        }
    }
    Ok(())
}
