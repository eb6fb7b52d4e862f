//! Engine session - one engine driving one cluster into one output handler.
//!
//! ```text
//! Created ──start──► Running ──end marker / close──► Completed
//!    │                  │
//!    └──────────────────┴──► Failed (engine error, decode error,
//!                                    abnormal exit, timeout)
//! ```
//!
//! The engine is stopped on every exit path.

use brutus_core::output::{OutputError, OutputHandler, OutputResult};
use brutus_core::protocol::{InitPayload, RunParameters};
use brutus_core::Cluster;
use brutus_env::{Engine, EngineError, SessionId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a session failed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine could not be started or its channel failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The output handler rejected a line or could not finalize
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// The engine ended its stream but did not terminate cleanly
    #[error("Engine terminated abnormally")]
    AbnormalExit,

    /// The session exceeded its time budget
    #[error("Session timed out after {0:?}")]
    Timeout(Duration),

    /// The session task panicked or was cancelled
    #[error("Session task aborted")]
    Aborted,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Outcome of one session, as placed in its result slot.
#[derive(Debug)]
pub struct SessionReport {
    /// Session identifier (log correlation)
    pub session_id: SessionId,

    /// Cluster name
    pub cluster: String,

    /// Terminal state
    pub state: SessionState,

    /// Snapshot lines handed to the output handler
    pub lines: usize,

    /// Wall-clock run time
    pub elapsed: Duration,

    /// Finalized result or failure cause
    pub outcome: Result<OutputResult, SessionError>,
}

impl SessionReport {
    /// Report for a session whose task never returned.
    pub fn aborted(cluster: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            cluster: cluster.into(),
            state: SessionState::Failed,
            lines: 0,
            elapsed: Duration::ZERO,
            outcome: Err(SessionError::Aborted),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&OutputResult> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.outcome.as_ref().err()
    }
}

/// Binds one engine to one cluster and one output handler.
pub struct EngineSession {
    id: SessionId,
    cluster: Cluster,
    params: RunParameters,
    engine: Box<dyn Engine>,
    handler: Box<dyn OutputHandler>,
    timeout: Option<Duration>,
    state: SessionState,
    lines: usize,
}

impl EngineSession {
    /// Creates a session in the `Created` state.
    pub fn new(
        cluster: Cluster,
        params: RunParameters,
        engine: Box<dyn Engine>,
        handler: Box<dyn OutputHandler>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            cluster,
            params,
            engine,
            handler,
            timeout: None,
            state: SessionState::Created,
            lines: 0,
        }
    }

    /// Sets the time budget covering start, streaming and termination.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to a terminal state.
    pub async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        info!(
            "Session {} starting: cluster '{}' ({} stars, t_end={}, dt={})",
            self.id,
            self.cluster.name(),
            self.cluster.len(),
            self.params.duration,
            self.params.time_step
        );

        let outcome = match self.timeout {
            Some(limit) => {
                let deadline = tokio::time::Instant::now() + limit;
                match tokio::time::timeout_at(deadline, self.drive()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SessionError::Timeout(limit)),
                }
            }
            None => self.drive().await,
        };

        // Release on every path
        self.engine.stop().await;

        self.state = match outcome {
            Ok(_) => SessionState::Completed,
            Err(_) => SessionState::Failed,
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => info!(
                "Session {} completed: cluster '{}', {} lines in {:.2?}",
                self.id,
                self.cluster.name(),
                self.lines,
                elapsed
            ),
            Err(e) => warn!(
                "Session {} failed: cluster '{}' after {} lines: {}",
                self.id,
                self.cluster.name(),
                self.lines,
                e
            ),
        }

        SessionReport {
            session_id: self.id,
            cluster: self.cluster.name().to_string(),
            state: self.state,
            lines: self.lines,
            elapsed,
            outcome,
        }
    }

    async fn drive(&mut self) -> Result<OutputResult, SessionError> {
        let payload = InitPayload::encode(&self.cluster, self.params);
        self.engine.start(&payload.to_args()).await?;
        self.state = SessionState::Running;

        while let Some(line) = self.engine.read_line().await? {
            if line.trim().is_empty() {
                debug!("Session {}: end marker received", self.id);
                break;
            }
            // A handler error ends the stream; nothing further is read
            self.handler.receive_output_line(&line)?;
            self.lines += 1;
        }

        if !self.engine.signal_end().await? {
            return Err(SessionError::AbnormalExit);
        }

        self.handler.finalize()?;
        Ok(self.handler.result()?)
    }
}
