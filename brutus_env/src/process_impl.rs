//! External process implementation of Engine using Tokio.

use crate::engine::{Engine, EngineLauncher};
use crate::error::EngineError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// Engine backed by a child process.
///
/// The positional initial-condition arguments are appended after any fixed
/// leading arguments. Snapshot lines are read from the child's stdout; its
/// stderr is inherited. The child is killed if the engine is dropped while it
/// is still running.
pub struct ProcessEngine {
    /// Program to execute
    program: String,

    /// Fixed arguments placed before the initial conditions
    base_args: Vec<String>,

    child: Option<Child>,

    stdout: Option<BufReader<ChildStdout>>,

    /// Bytes of the line currently being read
    pending: Vec<u8>,
}

impl ProcessEngine {
    /// Creates an engine that will run `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            child: None,
            stdout: None,
            pending: Vec::new(),
        }
    }

    /// Sets the fixed leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Process id of the running child, if any.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn start(&mut self, args: &[String]) -> Result<(), EngineError> {
        if self.child.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::spawn(&self.program, e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "engine stdout was not captured",
            ))
        })?;

        debug!(program = %self.program, pid = ?child.id(), args = args.len(), "engine process started");

        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, EngineError> {
        let reader = self.stdout.as_mut().ok_or(EngineError::NotStarted)?;

        // read_until keeps partial bytes in `pending` if this future is
        // dropped, so an interrupted read resumes where it stopped.
        let n = reader.read_until(b'\n', &mut self.pending).await?;

        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        if self.pending.last() != Some(&b'\n') {
            // EOF in the middle of a line
            warn!(
                program = %self.program,
                bytes = self.pending.len(),
                "discarding partial line at end of engine output"
            );
            self.pending.clear();
            return Ok(None);
        }

        let mut line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn signal_end(&mut self) -> Result<bool, EngineError> {
        let child = self.child.as_mut().ok_or(EngineError::NotStarted)?;

        // Nothing is read after the end marker
        self.stdout = None;

        let status = child.wait().await?;
        debug!(program = %self.program, %status, "engine process exited");
        Ok(status.success())
    }

    async fn stop(&mut self) {
        self.stdout = None;
        self.pending.clear();

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    if let Err(e) = child.start_kill() {
                        warn!(program = %self.program, error = %e, "failed to kill engine process");
                    }
                    let _ = child.wait().await;
                    debug!(program = %self.program, "engine process killed");
                }
            }
        }
    }
}

/// Launches a [`ProcessEngine`] per session.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>) -> Self {
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
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&self, _cluster_name: &str) -> Box<dyn Engine> {
        Box::new(ProcessEngine::new(self.program.clone()).with_args(self.args.clone()))
    }
}
