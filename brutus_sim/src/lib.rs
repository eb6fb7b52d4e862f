//! Brutus Cluster Orchestrator
//!
//! Runs one engine session per registered star cluster on a bounded pool of
//! workers, feeding each engine's snapshot stream into that cluster's output
//! handler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Integrator                         │
//! │  registry: [(Cluster, OutputHandler), ...]               │
//! │  Semaphore(workers) + JoinSet                            │
//! │       │                 │                 │              │
//! │  ┌────▼─────┐     ┌─────▼────┐     ┌──────▼───┐          │
//! │  │ Session  │     │ Session  │     │ Session  │   ...    │
//! │  │ engine → │     │ engine → │     │ engine → │          │
//! │  │ handler  │     │ handler  │     │ handler  │          │
//! │  └────┬─────┘     └────┬─────┘     └────┬─────┘          │
//! │       ▼                ▼                ▼                │
//! │    slot 0           slot 1           slot 2              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use brutus_core::TableOutput;
//! use brutus_sim::{scenarios, Integrator};
//!
//! let mut integrator = Integrator::new(0.1).with_workers(2);
//! for cluster in scenarios::n_cluster()? {
//!     integrator.add_cluster(cluster, TableOutput::new());
//! }
//! let reports = integrator.evolve(1.0).await?;
//! ```

pub mod config;
mod integrator;
mod reference;
pub mod scenarios;
mod session;

pub use integrator::{Integrator, IntegratorConfig, IntegratorError};
pub use reference::{ReferenceEngine, ReferenceLauncher};
pub use session::{EngineSession, SessionError, SessionReport, SessionState};
