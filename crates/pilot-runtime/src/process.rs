//! Child process handle for one automation program run.
//!
//! The automation program contract is thin: the device identifier is passed
//! as the first positional argument, progress arrives as newline-delimited
//! text on stdout, and exit code 0 means success. Programs must tolerate a
//! termination signal; anything that ignores it is force-killed after the
//! grace period.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Description of an automation program to run on a device.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    /// Path of the executable.
    pub program: PathBuf,
    /// Extra arguments appended after the device identifier.
    pub args: Vec<String>,
}

impl ScriptSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Display name for log lines: the executable's file name.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Handle for one spawned automation program.
#[derive(Debug)]
pub struct ScriptProcess {
    child: Child,
    device: String,
}

impl ScriptProcess {
    /// Spawns the program with the device identifier as its first argument.
    /// Stdout and stderr are piped. A failed spawn creates no handle.
    pub fn spawn(spec: &ScriptSpec, device: &str) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.arg(device)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            device: device.to_string(),
            program: spec.program.display().to_string(),
            source,
        })?;

        debug!(
            target = "pilot.process",
            device = %device,
            pid = child.id(),
            program = %spec.program.display(),
            "spawned automation program"
        );

        Ok(Self {
            child,
            device: device.to_string(),
        })
    }

    /// OS pid, until the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Lazy stream of stdout lines; yields until the process closes its
    /// stdout, normally at exit. The stream can be taken once.
    pub fn stdout_lines(&mut self) -> Option<LinesStream<BufReader<ChildStdout>>> {
        self.child
            .stdout
            .take()
            .map(|out| LinesStream::new(BufReader::new(out).lines()))
    }

    /// Lazy stream of stderr lines, same contract as [`Self::stdout_lines`].
    pub fn stderr_lines(&mut self) -> Option<LinesStream<BufReader<ChildStderr>>> {
        self.child
            .stderr
            .take()
            .map(|err| LinesStream::new(BufReader::new(err).lines()))
    }

    /// Asks the child to stop without waiting for it. On unix this is
    /// SIGTERM so the program can run its own cleanup; elsewhere (or once
    /// the pid is gone) it falls back to a hard kill.
    pub fn request_termination(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }
        let _ = self.child.start_kill();
    }

    /// Terminates with a bounded wait: graceful request first, then a
    /// forced kill once `grace` has elapsed.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        self.request_termination();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                debug!(
                    target = "pilot.process",
                    device = %self.device,
                    grace_ms = grace.as_millis() as u64,
                    "grace period expired, force killing"
                );
                self.child.start_kill()?;
                self.child.wait().await
            }
        }
    }

    /// Waits for the process to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }
}
