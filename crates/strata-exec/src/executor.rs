use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use crate::error::ExecError;

/// A command to run inside an image root filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub rootfs: PathBuf,
    pub argv: Vec<String>,
    /// Complete environment of the child; the host environment is not inherited.
    pub env: Vec<(String, String)>,
    /// Working directory inside the root filesystem; `/` when unset.
    pub workdir: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(rootfs: &Path, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rootfs: rootfs.to_path_buf(),
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            workdir: None,
        }
    }

    pub fn workdir(mut self, dir: &str) -> Self {
        self.workdir = Some(dir.to_owned());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.env.push((k.to_owned(), v.to_owned()));
        }
        self
    }

    /// First element of the command vector.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; signals are reported as `128 + signal`.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Abstraction over running commands inside a root filesystem, for testability.
///
/// Production code uses [`ChrootRunner`], tests use fakes or mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait CommandRunner: Send + Sync {
    /// Run a command with `invocation.rootfs` as its root directory, capturing output.
    /// Dropping the returned future must stop the command.
    async fn exec(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;

    /// Run a command as process 1 of a fresh PID namespace rooted at
    /// `invocation.rootfs`, with inherited stdio. Returns its exit code.
    async fn exec_init(&self, invocation: &Invocation) -> Result<i32, ExecError>;
}

/// Runs build commands through `chroot(8)` and containers through `unshare(1)`.
///
/// Both require root privileges on the host.
pub struct ChrootRunner;

impl ChrootRunner {
    /// Report the host version of a helper tool (`chroot`, `unshare`).
    pub async fn tool_version(program: &str) -> Result<String, ExecError> {
        let output = tokio::process::Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: program.to_owned(),
                source: e,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .map_or_else(String::new, |line| line.trim().to_owned()))
    }
}

impl CommandRunner for ChrootRunner {
    async fn exec(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        check_invocation(invocation)?;
        tracing::debug!(
            rootfs = %invocation.rootfs.display(),
            argv = ?invocation.argv,
            "chroot exec"
        );

        let output = tokio::process::Command::new("chroot")
            .arg(&invocation.rootfs)
            .args(&invocation.argv)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: "chroot".to_owned(),
                source: e,
            })?;

        Ok(CommandOutput {
            code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn exec_init(&self, invocation: &Invocation) -> Result<i32, ExecError> {
        check_invocation(invocation)?;
        tracing::debug!(
            rootfs = %invocation.rootfs.display(),
            argv = ?invocation.argv,
            "starting container init"
        );

        let mut command = tokio::process::Command::new("unshare");
        command
            .args(["--fork", "--pid", "--kill-child", "--root"])
            .arg(&invocation.rootfs);
        if let Some(dir) = &invocation.workdir {
            command.arg(format!("--wd={dir}"));
        }
        let status = command
            .arg("--")
            .args(&invocation.argv)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| ExecError::Spawn {
                program: "unshare".to_owned(),
                source: e,
            })?;

        Ok(exit_code(status))
    }
}

fn check_invocation(invocation: &Invocation) -> Result<(), ExecError> {
    if invocation.argv.is_empty() {
        return Err(ExecError::EmptyCommand);
    }
    if !invocation.rootfs.is_dir() {
        return Err(ExecError::MissingRoot {
            path: invocation.rootfs.clone(),
        });
    }
    Ok(())
}

/// Map an exit status to a shell-style code: `128 + signal` for killed processes.
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
