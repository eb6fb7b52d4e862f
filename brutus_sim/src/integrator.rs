//! Integrator - evolves every registered cluster on a bounded worker pool.
//!
//! Each registration becomes one [`EngineSession`] running as its own tokio
//! task. At most `workers` sessions hold a permit at once. Reports are written
//! into slots addressed by registration index, so the returned order never
//! depends on completion order.

use crate::reference::ReferenceLauncher;
use crate::session::{EngineSession, SessionReport};

use brutus_core::output::OutputHandler;
use brutus_core::protocol::{RunParameters, DEFAULT_TOLERANCE, DEFAULT_WORD_LENGTH};
use brutus_core::Cluster;
use brutus_env::EngineLauncher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Rejected `evolve` arguments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegratorError {
    #[error("Duration must be positive and finite, got {0}")]
    InvalidDuration(f64),

    #[error("Time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),

    #[error("Worker count must be at least 1")]
    InvalidWorkers,
}

/// Integrator settings shared by every session of one `evolve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorConfig {
    /// Engine output step
    pub time_step: f64,

    /// Bulirsch-Stoer tolerance passed to the engine
    pub bulirsch_stoer_tolerance: f64,

    /// Numeric precision hint passed to the engine
    pub word_length: u32,

    /// Maximum concurrent sessions
    pub workers: usize,

    /// Per-session time budget
    pub session_timeout: Option<Duration>,
}

impl IntegratorConfig {
    pub fn new(time_step: f64) -> Self {
        Self {
            time_step,
            bulirsch_stoer_tolerance: DEFAULT_TOLERANCE,
            word_length: DEFAULT_WORD_LENGTH,
            workers: 1,
            session_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), IntegratorError> {
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(IntegratorError::InvalidTimeStep(self.time_step));
        }
        if self.workers == 0 {
            return Err(IntegratorError::InvalidWorkers);
        }
        Ok(())
    }

    /// Engine parameters for a run of `duration`.
    pub fn run_parameters(&self, duration: f64) -> RunParameters {
        RunParameters::new(duration, self.time_step)
            .with_tolerance(self.bulirsch_stoer_tolerance)
            .with_word_length(self.word_length)
    }
}

struct Registration {
    cluster: Cluster,
    handler: Box<dyn OutputHandler>,
}

/// Registry of (cluster, output handler) pairs plus the worker pool settings.
pub struct Integrator {
    config: IntegratorConfig,
    launcher: Arc<dyn EngineLauncher>,
    registry: Vec<Registration>,
}

impl Integrator {
    /// Creates an integrator driving the in-process reference engine.
    pub fn new(time_step: f64) -> Self {
        Self {
            config: IntegratorConfig::new(time_step),
            launcher: Arc::new(ReferenceLauncher::default()),
            registry: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: IntegratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.config.bulirsch_stoer_tolerance = tolerance;
        self
    }

    pub fn with_word_length(mut self, word_length: u32) -> Self {
        self.config.word_length = word_length;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Replaces the engine factory used for every session.
    pub fn with_launcher<L: EngineLauncher>(mut self, launcher: L) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Registers a cluster with its output handler.
    ///
    /// The same cluster may be registered more than once; each registration
    /// gets its own session and result slot.
    pub fn add_cluster<H>(&mut self, cluster: Cluster, handler: H)
    where
        H: OutputHandler + 'static,
    {
        debug!(
            "Registered cluster '{}' ({} stars) at slot {}",
            cluster.name(),
            cluster.len(),
            self.registry.len()
        );
        self.registry.push(Registration {
            cluster,
            handler: Box::new(handler),
        });
    }

    /// Registered clusters in registration order.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> + '_ {
        self.registry.iter().map(|r| &r.cluster)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Evolves every registered cluster to `duration`.
    ///
    /// Returns one report per registration, in registration order. A failed
    /// session only fails its own slot. The registry is drained: handlers are
    /// consumed by their sessions.
    pub async fn evolve(&mut self, duration: f64) -> Result<Vec<SessionReport>, IntegratorError> {
        if !(duration > 0.0 && duration.is_finite()) {
            return Err(IntegratorError::InvalidDuration(duration));
        }
        self.config.validate()?;

        let registrations = std::mem::take(&mut self.registry);
        let names: Vec<String> = registrations
            .iter()
            .map(|r| r.cluster.name().to_string())
            .collect();
        let params = self.config.run_parameters(duration);
        let started = Instant::now();

        info!(
            "Evolving {} cluster(s) to t={} (dt={}, workers={})",
            names.len(),
            duration,
            self.config.time_step,
            self.config.workers
        );

        let permits = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        for (index, registration) in registrations.into_iter().enumerate() {
            let engine = self.launcher.launch(registration.cluster.name());
            let session = EngineSession::new(
                registration.cluster,
                params,
                engine,
                registration.handler,
            )
            .with_timeout(self.config.session_timeout);
            let permits = Arc::clone(&permits);
            let name = names[index].clone();

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, SessionReport::aborted(name)),
                };
                (index, session.run().await)
            });
        }

        let mut slots: Vec<Option<SessionReport>> = names.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => error!("Session task did not complete: {}", e),
            }
        }

        let reports: Vec<SessionReport> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| slot.unwrap_or_else(|| SessionReport::aborted(name)))
            .collect();

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(
            "Evolve finished in {:.2?}: {} completed, {} failed",
            started.elapsed(),
            reports.len() - failed,
            failed
        );

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionError, SessionState};
    use async_trait::async_trait;
    use brutus_core::output::{OutputError, RawOutput, TableOutput};
    use brutus_core::protocol::InitPayload;
    use brutus_core::table::{position_column, TIME, TOTAL_ENERGY};
    use brutus_core::Star;
    use brutus_env::{Engine, EngineError, ScriptedEngine};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LINE: &str = "0,1,0,0,0,0,1,1,1,2,3,3,3";

    fn cluster(name: &str) -> Cluster {
        Cluster::new(
            name,
            vec![
                Star::new(0, &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0], 1.0).unwrap(),
                Star::new(1, &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], 1.0).unwrap(),
            ],
        )
        .unwrap()
    }

    fn scripted(engines: HashMap<String, ScriptedEngine>) -> impl EngineLauncher {
        move |name: &str| -> Box<dyn Engine> { Box::new(engines[name].clone()) }
    }

    #[test]
    fn test_defaults() {
        let integrator = Integrator::new(0.1);
        let config = integrator.config();
        assert_eq!(config.time_step, 0.1);
        assert_eq!(config.bulirsch_stoer_tolerance, 1e-11);
        assert_eq!(config.word_length, 128);
        assert_eq!(config.workers, 1);
        assert_eq!(config.session_timeout, None);
        assert!(integrator.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(IntegratorConfig::new(0.1).validate().is_ok());
        assert_eq!(
            IntegratorConfig::new(0.0).validate(),
            Err(IntegratorError::InvalidTimeStep(0.0))
        );
        let mut config = IntegratorConfig::new(0.1);
        config.workers = 0;
        assert_eq!(config.validate(), Err(IntegratorError::InvalidWorkers));
    }

    #[tokio::test]
    async fn test_evolve_with_reference_engine() {
        let mut integrator = Integrator::new(0.2);
        integrator.add_cluster(cluster("pair"), TableOutput::new());

        let reports = integrator.evolve(1.0).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, SessionState::Completed);
        assert_eq!(reports[0].lines, 6);

        let table = reports[0].result().unwrap().as_table().unwrap();
        assert_eq!(table.len(), 6);
        assert!(table.has_column(TIME));
        assert!(table.has_column(TOTAL_ENERGY));
        assert!(table.has_column(&position_column(1)));
        assert_eq!(table.get(5, TIME).and_then(|c| c.as_f64()), Some(1.0));
    }

    #[tokio::test]
    async fn test_same_cluster_registered_twice() {
        let mut integrator = Integrator::new(0.5);
        integrator.add_cluster(cluster("twin"), RawOutput::new());
        integrator.add_cluster(cluster("twin"), TableOutput::new());
        assert_eq!(integrator.len(), 2);

        let reports = integrator.evolve(1.0).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].result().unwrap().as_raw().unwrap().len(), 3);
        assert_eq!(reports[1].result().unwrap().as_table().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_results_follow_registration_order() {
        // First registered finishes last
        let delays = [("a", 30), ("b", 15), ("c", 1)];
        let engines = delays
            .iter()
            .map(|(name, ms)| {
                let lines: Vec<String> = (0..3).map(|i| format!("{name}-{i}")).collect();
                let engine = ScriptedEngine::new(lines).with_line_delay(Duration::from_millis(*ms));
                (name.to_string(), engine)
            })
            .collect();

        let mut integrator = Integrator::new(0.1)
            .with_workers(2)
            .with_launcher(scripted(engines));
        for (name, _) in delays {
            integrator.add_cluster(cluster(name), RawOutput::new());
        }

        let reports = integrator.evolve(1.0).await.unwrap();
        assert_eq!(reports.len(), 3);
        for (report, (name, _)) in reports.iter().zip(delays) {
            assert_eq!(report.cluster, name);
            let lines = report.result().unwrap().as_raw().unwrap();
            assert_eq!(lines[0], format!("{name}-0"));
            assert_eq!(lines.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_decode_failure_is_isolated() {
        let broken = ScriptedEngine::new([LINE, "not,a,frame"]);
        let broken_probe = broken.probe();
        let engines = HashMap::from([
            ("broken".to_string(), broken),
            ("healthy".to_string(), ScriptedEngine::new([LINE, LINE])),
        ]);

        let mut integrator = Integrator::new(0.1)
            .with_workers(2)
            .with_launcher(scripted(engines));
        integrator.add_cluster(cluster("broken"), TableOutput::new());
        integrator.add_cluster(cluster("healthy"), TableOutput::new());

        let reports = integrator.evolve(1.0).await.unwrap();
        assert!(matches!(
            reports[0].error(),
            Some(SessionError::Output(OutputError::Decode(_)))
        ));
        assert!(broken_probe.stopped());
        assert_eq!(reports[1].result().unwrap().as_table().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_session_times_out() {
        let engines = HashMap::from([
            ("stuck".to_string(), ScriptedEngine::new([LINE]).stalling()),
            ("fine".to_string(), ScriptedEngine::new([LINE])),
        ]);

        let mut integrator = Integrator::new(0.1)
            .with_workers(2)
            .with_timeout(Some(Duration::from_millis(50)))
            .with_launcher(scripted(engines));
        integrator.add_cluster(cluster("stuck"), RawOutput::new());
        integrator.add_cluster(cluster("fine"), RawOutput::new());

        let reports = integrator.evolve(1.0).await.unwrap();
        assert!(matches!(reports[0].error(), Some(SessionError::Timeout(_))));
        assert!(reports[1].is_success());
    }

    #[tokio::test]
    async fn test_timeout_applies_to_reference_engine() {
        let busy = crate::scenarios::random_cluster("busy", 3, 40).unwrap();

        let mut integrator = Integrator::new(0.001)
            .with_workers(2)
            .with_timeout(Some(Duration::from_millis(50)));
        integrator.add_cluster(busy, RawOutput::new());
        integrator.add_cluster(cluster("pair"), RawOutput::new());

        let started = Instant::now();
        let reports = integrator.evolve(5.0).await.unwrap();

        assert!(matches!(reports[0].error(), Some(SessionError::Timeout(_))));
        assert!(reports[0].lines < 5001);
        assert!(started.elapsed() < Duration::from_secs(5));
        // The cheap sibling still makes progress on the same runtime
        assert!(reports[1].lines > 0);
    }

    #[tokio::test]
    async fn test_engine_failures_fill_their_slots() {
        let engines = HashMap::from([
            ("crash".to_string(), ScriptedEngine::new([LINE]).with_exit_status(false)),
            ("refuse".to_string(), ScriptedEngine::new([LINE]).failing_start()),
        ]);

        let mut integrator = Integrator::new(0.1).with_launcher(scripted(engines));
        integrator.add_cluster(cluster("crash"), RawOutput::new());
        integrator.add_cluster(cluster("refuse"), RawOutput::new());

        let reports = integrator.evolve(1.0).await.unwrap();
        assert!(matches!(reports[0].error(), Some(SessionError::AbnormalExit)));
        assert!(matches!(
            reports[1].error(),
            Some(SessionError::Engine(EngineError::InvalidPayload(_)))
        ));
    }

    #[tokio::test]
    async fn test_evolve_drains_registry() {
        let mut integrator = Integrator::new(0.5);
        integrator.add_cluster(cluster("once"), RawOutput::new());

        assert_eq!(integrator.evolve(1.0).await.unwrap().len(), 1);
        assert!(integrator.is_empty());
        assert!(integrator.evolve(1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let mut integrator = Integrator::new(0.1);
        integrator.add_cluster(cluster("kept"), RawOutput::new());

        assert_eq!(
            integrator.evolve(0.0).await.unwrap_err(),
            IntegratorError::InvalidDuration(0.0)
        );
        assert!(integrator.evolve(f64::NAN).await.is_err());

        let mut integrator = integrator.with_workers(0);
        assert_eq!(
            integrator.evolve(1.0).await.unwrap_err(),
            IntegratorError::InvalidWorkers
        );
        // Rejected calls leave the registry untouched
        assert_eq!(integrator.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_receives_configured_parameters() {
        let engine = ScriptedEngine::new(Vec::<String>::new());
        let probe = engine.probe();
        let engines = HashMap::from([("solo".to_string(), engine)]);

        let mut integrator = Integrator::new(0.25)
            .with_tolerance(1e-9)
            .with_word_length(64)
            .with_launcher(scripted(engines));
        integrator.add_cluster(cluster("solo"), RawOutput::new());
        integrator.evolve(2.0).await.unwrap();

        let params = RunParameters::new(2.0, 0.25)
            .with_tolerance(1e-9)
            .with_word_length(64);
        let expected = InitPayload::encode(&cluster("solo"), params).to_args();
        assert_eq!(probe.args(), Some(expected));
    }

    /// Tracks how many engines are between `start` and `stop`.
    struct CountingEngine {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        done: bool,
    }

    #[async_trait]
    impl Engine for CountingEngine {
        async fn start(&mut self, _args: &[String]) -> Result<(), EngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(())
        }

        async fn read_line(&mut self) -> Result<Option<String>, EngineError> {
            if self.done {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.done = true;
            Ok(Some(LINE.to_string()))
        }

        async fn signal_end(&mut self) -> Result<bool, EngineError> {
            Ok(true)
        }

        async fn stop(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn peak_concurrency(workers: usize, clusters: usize) -> usize {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let launcher = {
            let (active, peak) = (active.clone(), peak.clone());
            move |_: &str| -> Box<dyn Engine> {
                Box::new(CountingEngine {
                    active: active.clone(),
                    peak: peak.clone(),
                    done: false,
                })
            }
        };

        let mut integrator = Integrator::new(0.1)
            .with_workers(workers)
            .with_launcher(launcher);
        for i in 0..clusters {
            integrator.add_cluster(cluster(&format!("c{i}")), RawOutput::new());
        }

        let reports = integrator.evolve(1.0).await.unwrap();
        assert!(reports.iter().all(|r| r.is_success()));
        assert_eq!(active.load(Ordering::SeqCst), 0);
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        assert_eq!(peak_concurrency(1, 3).await, 1);
        assert_eq!(peak_concurrency(2, 5).await, 2);
    }
}
