mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strata", about = "Build and run layered Python service images")]
#[command(version)]
struct Cli {
    /// Build descriptor (default: ./strata.toml, or built-in defaults if absent)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a commented default strata.toml
    Init,
    /// Build and seal an image from the current project
    Build {
        /// Rebuild every layer, ignoring cached ones
        #[arg(long)]
        no_cache: bool,
        /// Tag to point at the sealed image
        #[arg(long, short = 't')]
        tag: Option<String>,
    },
    /// Start a container from an image and wait for it to exit
    Run {
        /// Image tag, id, or id prefix
        image: String,
    },
    /// Show an image's layers, environment, and entry point
    Inspect {
        /// Image tag, id, or id prefix
        image: String,
        /// Print the sealed image record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sealed images
    Images,
    /// Import a root filesystem directory as a base image
    Import {
        /// Base image reference (name:tag)
        reference: String,
        /// Directory holding the unpacked root filesystem
        rootfs: PathBuf,
    },
    /// Eject an equivalent Dockerfile for use with other tools
    Eject,
    /// Manage the layer cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check host tools, store, base image, and zone database
    Doctor,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached layers
    List,
    /// Remove a layer (full key or unique prefix)
    Evict {
        /// Layer key
        key: String,
    },
    /// Check stored layers against their digests, evicting mismatches
    Verify {
        /// Layer key (default: every layer)
        key: Option<String>,
    },
    /// Remove layers no sealed image references
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "failed to load .env");
        }
    }

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::init_project()?,
        Commands::Build { no_cache, tag } => commands::build(config, no_cache, tag).await?,
        Commands::Run { image } => {
            let code = commands::run(config, &image).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Inspect { image, json } => commands::inspect(config, &image, json)?,
        Commands::Images => commands::images(config)?,
        Commands::Import { reference, rootfs } => commands::import(config, &reference, &rootfs)?,
        Commands::Eject => commands::eject(config)?,
        Commands::Cache { action } => match action {
            CacheAction::List => commands::cache_list(config)?,
            CacheAction::Evict { key } => commands::cache_evict(config, &key)?,
            CacheAction::Verify { key } => commands::cache_verify(config, key.as_deref())?,
            CacheAction::Prune => commands::cache_prune(config)?,
        },
        Commands::Doctor => commands::doctor(config).await?,
    }

    Ok(())
}
