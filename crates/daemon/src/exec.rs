//! Running external tools.
//!
//! Everything that spawns a process goes through [`CommandRunner`], so the
//! mounters and the systemd adapter can be driven by a recording fake in
//! tests. Environment entries on an [`ExecSpec`] are passed to that one child
//! only; the driver's own environment is never modified.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// A program, its arguments and the extra environment for one invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Let the child write straight to our stderr instead of capturing it.
    /// Tools that daemonize can otherwise hold the pipe open forever.
    pub inherit_stderr: bool,
}

// env values are credentials
impl fmt::Debug for ExecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("inherit_stderr", &self.inherit_stderr)
            .finish()
    }
}

impl ExecSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn inherit_stderr(mut self) -> Self {
        self.inherit_stderr = true;
        self
    }

    /// `program arg1 arg2 ...`, for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// `Ok(self)` for a zero exit, [`ExecError::Failed`] otherwise.
    pub fn check(self, spec: &ExecSpec) -> Result<Self, ExecError> {
        if self.success() {
            return Ok(self);
        }
        Err(ExecError::Failed {
            command: spec.command_line(),
            status: self
                .status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output: self.combined(),
        })
    }

    fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture the output, whatever the exit status.
    async fn output(&self, spec: &ExecSpec) -> Result<ExecOutput, ExecError>;

    /// Run to completion; a non-zero exit is an error.
    async fn run(&self, spec: &ExecSpec) -> Result<ExecOutput, ExecError> {
        self.output(spec).await?.check(spec)
    }
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn output(&self, spec: &ExecSpec) -> Result<ExecOutput, ExecError> {
        tracing::debug!(command = %spec.command_line(), "running");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if spec.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::piped()
            });

        let output = cmd.output().await.map_err(|source| ExecError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        Ok(ExecOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
