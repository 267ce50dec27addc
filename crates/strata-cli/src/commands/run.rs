use std::path::Path;

use strata_build::{Launcher, RunError};
use strata_exec::ChrootRunner;

use super::Project;

/// Exit status when the entry point does not exist in the image.
const EXIT_NOT_FOUND: i32 = 127;
/// Exit status when the entry point exists but cannot be executed.
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Start a container from `reference` and return the exit status to report.
pub async fn run(config: Option<&Path>, reference: &str) -> anyhow::Result<i32> {
    let project = Project::load(config)?;
    let store = project.open_store()?;
    let image = store.images.resolve(reference)?;

    match Launcher::new(&store.cache, &ChrootRunner).start(&image).await {
        Ok(code) => Ok(code),
        Err(e @ RunError::EntryPointNotFound { .. }) => {
            eprintln!("strata: {e}");
            Ok(EXIT_NOT_FOUND)
        }
        Err(e @ RunError::EntryPointNotExecutable { .. }) => {
            eprintln!("strata: {e}");
            Ok(EXIT_NOT_EXECUTABLE)
        }
        Err(e) => Err(e.into()),
    }
}
