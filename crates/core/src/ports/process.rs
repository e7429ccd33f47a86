//! External process port
//!
//! The key toolchain and the docker CLI are driven through
//! [`ProcessRunner`]. Commands are argument vectors, never shell strings,
//! and always carry a timeout.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default limit for a single external command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors launching or waiting for a process
///
/// A non-zero exit is not an error here; it is reported through
/// [`ProcessOutput::exit_code`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("I/O with '{program}' failed: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
enum Arg {
    Plain(String),
    Secret(SecretString),
}

impl Arg {
    fn expose(&self) -> &str {
        match self {
            Arg::Plain(value) => value,
            Arg::Secret(value) => value.expose_secret(),
        }
    }
}

/// A command line to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<Arg>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// An argument that is masked when the command is displayed
    pub fn secret_arg(mut self, arg: SecretString) -> Self {
        self.args.push(Arg::Secret(arg));
        self
    }

    /// Bytes written to the child's stdin, which is then closed
    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Arguments with secrets exposed, for handing to the OS
    pub fn exposed_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Arg::expose)
    }

    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            match arg {
                Arg::Plain(value) => write!(f, " {value}")?,
                Arg::Secret(_) => f.write_str(" ***")?,
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Stderr if there is any, else the exit status
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr_lossy();
        if !stderr.is_empty() {
            return stderr;
        }
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] on `tokio::process`; the child is killed when its
/// timeout expires
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let program = command.program().to_string();
        tracing::debug!(command = %command, "running external command");

        let mut child = Command::new(command.program())
            .args(command.exposed_args())
            .stdin(if command.stdin_bytes().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin_pipe = child.stdin.take();
        let feed = async {
            if let (Some(mut pipe), Some(bytes)) = (stdin_pipe, command.stdin_bytes()) {
                pipe.write_all(bytes).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let run = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = tokio::time::timeout(command.timeout_duration(), run)
            .await
            .map_err(|_| {
                tracing::warn!(
                    command = %command,
                    timeout = ?command.timeout_duration(),
                    "external command timed out"
                );
                ProcessError::Timeout {
                    program: program.clone(),
                    timeout: command.timeout_duration(),
                }
            })?;

        let output = output.map_err(|source| ProcessError::Io {
            program: program.clone(),
            source,
        })?;
        if let Err(e) = fed {
            // a child that exits without draining stdin closes the pipe early
            tracing::debug!(program = %program, error = %e, "stdin not fully consumed");
        }

        Ok(ProcessOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }
}
