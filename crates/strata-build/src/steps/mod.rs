//! The layer-producing build steps.
//!
//! Each step is a function from one root filesystem state to the next, plus
//! the instruction text and input digests that key its layer. The pipeline
//! owns ordering, caching, and snapshotting; steps only mutate `rootfs`.

pub mod base;
pub mod context;
pub mod dependencies;
pub mod manifest;
pub mod packages;
pub mod timezone;

use std::path::Path;

use strata_exec::{CommandOutput, CommandRunner, ExecError, Invocation};
use tokio::time::Instant;

use crate::error::BuildError;
use crate::layer::StepKind;

pub use base::{BaseImage, BaseImageProvider};
pub use context::ContextCopy;
pub use dependencies::Dependencies;
pub use packages::SystemPackages;
pub use timezone::Timezone;

/// `PATH` for commands run during a build.
pub const BUILD_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const DETAIL_LINES: usize = 5;

#[allow(async_fn_in_trait)]
pub trait Step {
    fn kind(&self) -> StepKind;

    /// Dockerfile-style instruction text. Part of the layer key.
    fn instruction(&self) -> String;

    /// Digests of everything besides the parent layer the step reads.
    fn inputs(&self) -> Result<Vec<String>, BuildError>;

    /// Mutate `rootfs` from the parent state into this step's state.
    async fn apply<R: CommandRunner>(&self, rootfs: &Path, runner: &R) -> Result<(), BuildError>;
}

/// Run `invocation`, giving up at `deadline`. `None` means it timed out.
pub(crate) async fn run_until<R: CommandRunner>(
    runner: &R,
    invocation: &Invocation,
    deadline: Instant,
) -> Result<Option<CommandOutput>, ExecError> {
    match tokio::time::timeout_at(deadline, runner.exec(invocation)).await {
        Ok(result) => result.map(Some),
        Err(_elapsed) => Ok(None),
    }
}

/// Last few non-empty lines of stderr (or stdout when stderr is empty).
pub(crate) fn failure_detail(output: &CommandOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(DETAIL_LINES);
    lines[start..].join("; ")
}
