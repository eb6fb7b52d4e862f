//! Scripted engine for deterministic tests.

use crate::engine::Engine;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Engine that replays a fixed list of lines.
///
/// By default the lines are followed by an empty end-marker line, then the
/// channel closes, and the engine reports a normal exit.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    lines: VecDeque<String>,
    end_marker: bool,
    exit_ok: bool,
    stall: bool,
    hang_exit: bool,
    fail_start: bool,
    line_delay: Option<Duration>,
    started: bool,
    probe: EngineProbe,
}

/// Shared view into a [`ScriptedEngine`] after it has been boxed away.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    args: Arc<Mutex<Option<Vec<String>>>>,
    stopped: Arc<AtomicBool>,
}

impl EngineProbe {
    /// Arguments passed to `start`, if it was called.
    pub fn args(&self) -> Option<Vec<String>> {
        self.args.lock().ok().and_then(|a| a.clone())
    }

    /// Whether `stop` has been called.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl ScriptedEngine {
    /// Creates an engine that will emit `lines` in order.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            end_marker: true,
            exit_ok: true,
            stall: false,
            hang_exit: false,
            fail_start: false,
            line_delay: None,
            started: false,
            probe: EngineProbe::default(),
        }
    }

    /// Ends the stream by closing the channel instead of an empty line.
    pub fn without_end_marker(mut self) -> Self {
        self.end_marker = false;
        self
    }

    /// Sets the exit status reported by `signal_end`.
    pub fn with_exit_status(mut self, ok: bool) -> Self {
        self.exit_ok = ok;
        self
    }

    /// Never ends the stream once the lines are exhausted.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Never reports a termination status from `signal_end`.
    pub fn hanging_exit(mut self) -> Self {
        self.hang_exit = true;
        self
    }

    /// Makes `start` fail.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Sleeps before every line.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = Some(delay);
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn start(&mut self, args: &[String]) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        if self.fail_start {
            return Err(EngineError::invalid_payload("scripted start failure"));
        }
        if let Ok(mut slot) = self.probe.args.lock() {
            *slot = Some(args.to_vec());
        }
        self.started = true;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        if let Some(delay) = self.line_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.end_marker {
            self.end_marker = false;
            return Ok(Some(String::new()));
        }
        Ok(None)
    }

    async fn signal_end(&mut self) -> Result<bool, EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        if self.hang_exit {
            std::future::pending::<()>().await;
        }
        Ok(self.exit_ok)
    }

    async fn stop(&mut self) {
        self.probe.stopped.store(true, Ordering::SeqCst);
    }
}
