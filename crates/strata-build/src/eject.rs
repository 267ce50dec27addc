use std::path::{Path, PathBuf};

/// Directory (relative to the project) that receives ejected files.
pub const EJECT_DIR: &str = ".strata";

/// Write the rendered Dockerfile to `.strata/Dockerfile` so the project can
/// be built with any Dockerfile-compatible tool.
///
/// Refuses to overwrite a previous eject.
pub fn eject(project_dir: &Path, dockerfile_content: &str) -> Result<PathBuf, EjectError> {
    let eject_dir = project_dir.join(EJECT_DIR);
    std::fs::create_dir_all(&eject_dir).map_err(|e| EjectError::CreateDir {
        path: eject_dir.clone(),
        source: e,
    })?;

    let dockerfile_path = ejected_dockerfile(project_dir);
    if dockerfile_path.exists() {
        return Err(EjectError::AlreadyEjected(dockerfile_path));
    }

    std::fs::write(&dockerfile_path, dockerfile_content).map_err(|e| EjectError::Write {
        path: dockerfile_path.clone(),
        source: e,
    })?;

    Ok(dockerfile_path)
}

pub fn ejected_dockerfile(project_dir: &Path) -> PathBuf {
    project_dir.join(EJECT_DIR).join("Dockerfile")
}

/// Check if the project has an ejected Dockerfile.
pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_dockerfile(project_dir).exists()
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Dockerfile already ejected at {0}; edit it directly or delete it to re-eject")]
    AlreadyEjected(PathBuf),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
