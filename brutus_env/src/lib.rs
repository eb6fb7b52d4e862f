//! Brutus Engine Abstraction Layer
//!
//! This crate hides how an integration engine is actually run, so the
//! orchestrator can drive an external Brutus binary, an in-process engine,
//! or a scripted test double through the same interface.
//!
//! # Core Concept: The Engine Contract
//!
//! Every engine follows the same life cycle:
//! - `start(args)` with the positional initial conditions
//! - `read_line()` until an empty line or channel close
//! - `signal_end()` to collect the termination status
//! - `stop()` on every exit path
//!
//! # Example
//!
//! ```ignore
//! use brutus_env::{Engine, ProcessEngine};
//!
//! let mut engine = ProcessEngine::new("./brutus");
//! engine.start(&args).await?;
//! while let Some(line) = engine.read_line().await? {
//!     if line.is_empty() {
//!         break;
//!     }
//!     handle(line);
//! }
//! let clean = engine.signal_end().await?;
//! engine.stop().await;
//! ```

mod engine;
mod error;
mod process_impl;
pub mod scripted;
mod types;

pub use engine::{Engine, EngineLauncher};
pub use error::EngineError;
pub use process_impl::{ProcessEngine, ProcessLauncher};
pub use scripted::{EngineProbe, ScriptedEngine};
pub use types::SessionId;
