use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {program}; is it installed on the host?")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("root filesystem {path} does not exist or is not a directory")]
    MissingRoot { path: PathBuf },

    #[error("refusing to run an empty command vector")]
    EmptyCommand,
}
