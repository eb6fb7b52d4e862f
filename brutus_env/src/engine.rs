//! Engine capability traits.

use crate::error::EngineError;
use async_trait::async_trait;

/// One running integration engine bound to one cluster.
///
/// The engine is a black box: it receives the positional initial-condition
/// arguments once, then emits snapshot lines until it signals the end of its
/// stream with an empty line or by closing the channel.
///
/// # Implementations
///
/// - **External process**: `ProcessEngine` - arguments on the command line,
///   snapshots on stdout
/// - **In process**: the reference engine in `brutus_sim`
/// - **Tests**: `ScriptedEngine` - replays canned lines
///
/// # Line Integrity
///
/// `read_line` only ever yields complete lines. A partial line left dangling
/// when the channel closes is discarded, never returned.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Starts the engine with its positional initial-condition arguments.
    async fn start(&mut self, args: &[String]) -> Result<(), EngineError>;

    /// Waits for the next complete line.
    ///
    /// # Returns
    /// * `Ok(Some(line))` - A line without its terminator (may be empty)
    /// * `Ok(None)` - The channel was closed
    async fn read_line(&mut self) -> Result<Option<String>, EngineError>;

    /// Waits for the engine to terminate after its stream ended.
    ///
    /// Returns `true` when the engine terminated normally.
    async fn signal_end(&mut self) -> Result<bool, EngineError>;

    /// Releases the engine. Safe to call on every exit path, repeatedly.
    async fn stop(&mut self);
}

/// Creates a fresh engine for every session.
pub trait EngineLauncher: Send + Sync + 'static {
    /// Creates an unstarted engine for the named cluster.
    fn launch(&self, cluster_name: &str) -> Box<dyn Engine>;
}

impl<F> EngineLauncher for F
where
    F: Fn(&str) -> Box<dyn Engine> + Send + Sync + 'static,
{
    fn launch(&self, cluster_name: &str) -> Box<dyn Engine> {
        self(cluster_name)
    }
}
