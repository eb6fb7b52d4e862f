//! In-process reference engine.
//!
//! Honours the engine contract of the Brutus native library without its
//! arbitrary-precision Bulirsch-Stoer integrator:
//! - one frame at t=0, then one frame per `time_step`, the last step clamped
//!   to `duration`
//! - output times rounded to 1e-10 so accumulated steps land on `duration`
//! - an empty line after the final frame
//!
//! Bodies are advanced with a fixed-step kick-drift-kick leapfrog (G = 1).
//! Tolerance and word length are accepted and ignored.

use brutus_core::protocol::{encode_frame, Frame, InitPayload, StarReading, DEFAULT_DELIMITER};
use brutus_env::{Engine, EngineError, EngineLauncher};
use async_trait::async_trait;
use nalgebra::Vector3;
use tracing::debug;

/// Output times are rounded to this many steps per unit time.
const TIME_PRECISION: f64 = 1e10;

/// Leapfrog sub-steps per output step.
const SUBSTEPS: u32 = 16;

#[derive(Debug, Clone)]
struct Body {
    identifier: u64,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    mass: f64,
}

impl From<&StarReading> for Body {
    fn from(star: &StarReading) -> Self {
        Self {
            identifier: star.identifier,
            position: Vector3::from(star.position),
            velocity: Vector3::from(star.velocity),
            mass: star.mass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Stepping,
    Closed,
}

#[derive(Debug)]
struct Run {
    bodies: Vec<Body>,
    time: f64,
    duration: f64,
    time_step: f64,
    phase: Phase,
}

/// Reference engine running inside the orchestrator process.
#[derive(Debug)]
pub struct ReferenceEngine {
    delimiter: char,
    run: Option<Run>,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            run: None,
        }
    }

    /// Sets the field separator of emitted lines.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl Run {
    fn from_payload(payload: &InitPayload) -> Self {
        Self {
            bodies: payload.stars.iter().map(Body::from).collect(),
            time: 0.0,
            duration: payload.params.duration,
            time_step: payload.params.time_step,
            phase: Phase::Initial,
        }
    }

    fn advance(&mut self) {
        let mut next = self.time + self.time_step;
        if next >= self.duration {
            next = self.duration;
        }
        next = (next * TIME_PRECISION).round() / TIME_PRECISION;

        let h = (next - self.time) / SUBSTEPS as f64;
        for _ in 0..SUBSTEPS {
            leapfrog(&mut self.bodies, h);
        }
        self.time = next;
    }

    fn frame(&self) -> Frame {
        let kinetic = kinetic_energy(&self.bodies);
        let potential = potential_energy(&self.bodies);

        Frame {
            time: self.time,
            star_count: self.bodies.len(),
            stars: self
                .bodies
                .iter()
                .map(|b| StarReading {
                    identifier: b.identifier,
                    position: b.position.into(),
                    velocity: b.velocity.into(),
                    mass: b.mass,
                })
                .collect(),
            total_energy: kinetic + potential,
            kinetic_energy: kinetic,
            potential_energy: potential,
        }
    }
}

/// Gravitational accelerations; coincident pairs exert no force.
fn accelerations(bodies: &[Body]) -> Vec<Vector3<f64>> {
    let mut acc = vec![Vector3::zeros(); bodies.len()];
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let d = bodies[j].position - bodies[i].position;
            let r2 = d.norm_squared();
            if r2 == 0.0 {
                continue;
            }
            let inv_r3 = 1.0 / (r2 * r2.sqrt());
            acc[i] += d * (bodies[j].mass * inv_r3);
            acc[j] -= d * (bodies[i].mass * inv_r3);
        }
    }
    acc
}

fn leapfrog(bodies: &mut [Body], h: f64) {
    let acc = accelerations(bodies);
    for (body, a) in bodies.iter_mut().zip(&acc) {
        body.velocity += a * (0.5 * h);
        body.position += body.velocity * h;
    }
    let acc = accelerations(bodies);
    for (body, a) in bodies.iter_mut().zip(&acc) {
        body.velocity += a * (0.5 * h);
    }
}

fn kinetic_energy(bodies: &[Body]) -> f64 {
    bodies
        .iter()
        .map(|b| 0.5 * b.mass * b.velocity.norm_squared())
        .sum()
}

fn potential_energy(bodies: &[Body]) -> f64 {
    let mut energy = 0.0;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let r = (bodies[j].position - bodies[i].position).norm();
            if r > 0.0 {
                energy -= bodies[i].mass * bodies[j].mass / r;
            }
        }
    }
    energy
}

#[async_trait]
impl Engine for ReferenceEngine {
    async fn start(&mut self, args: &[String]) -> Result<(), EngineError> {
        if self.run.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let payload =
            InitPayload::from_args(args).map_err(|e| EngineError::invalid_payload(e.to_string()))?;
        let params = payload.params;

        if !(params.duration.is_finite() && params.duration > 0.0) {
            return Err(EngineError::invalid_payload(format!(
                "duration must be positive, got {}",
                params.duration
            )));
        }
        if !(params.time_step.is_finite() && params.time_step > 0.0) {
            return Err(EngineError::invalid_payload(format!(
                "time step must be positive, got {}",
                params.time_step
            )));
        }
        // Smaller steps round to zero progress at the output time resolution
        if params.time_step < 1.0 / TIME_PRECISION {
            return Err(EngineError::invalid_payload(format!(
                "time step {} is below the output time resolution {}",
                params.time_step,
                1.0 / TIME_PRECISION
            )));
        }

        debug!(
            "Reference engine: {} stars, t_end={}, dt={} (tolerance={}, word_length={} ignored)",
            payload.star_count(),
            params.duration,
            params.time_step,
            params.tolerance,
            params.word_length
        );

        self.run = Some(Run::from_payload(&payload));
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, EngineError> {
        // One scheduling point per frame, so deadlines and sibling sessions
        // are polled between frames
        tokio::task::yield_now().await;

        let delimiter = self.delimiter;
        let run = self.run.as_mut().ok_or(EngineError::NotStarted)?;

        let step = match run.phase {
            Phase::Initial => {
                run.phase = Phase::Stepping;
                false
            }
            Phase::Stepping if run.time < run.duration => true,
            Phase::Stepping => {
                // End marker
                run.phase = Phase::Closed;
                return Ok(Some(String::new()));
            }
            Phase::Closed => return Ok(None),
        };
        if !step {
            return Ok(Some(encode_frame(&run.frame(), delimiter)));
        }

        // Integrate off the async workers. If this future is dropped the run
        // is gone and the engine reads as stopped.
        let mut stepping = self.run.take().ok_or(EngineError::NotStarted)?;
        let (stepping, line) = tokio::task::spawn_blocking(move || {
            stepping.advance();
            let line = encode_frame(&stepping.frame(), delimiter);
            (stepping, line)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        self.run = Some(stepping);
        Ok(Some(line))
    }

    async fn signal_end(&mut self) -> Result<bool, EngineError> {
        match &self.run {
            Some(_) => Ok(true),
            None => Err(EngineError::NotStarted),
        }
    }

    async fn stop(&mut self) {
        self.run = None;
    }
}

/// Launches a [`ReferenceEngine`] per session.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceLauncher {
    delimiter: char,
}

impl Default for ReferenceLauncher {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl ReferenceLauncher {
    pub fn with_delimiter(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl EngineLauncher for ReferenceLauncher {
    fn launch(&self, _cluster_name: &str) -> Box<dyn Engine> {
        Box::new(ReferenceEngine::new().with_delimiter(self.delimiter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use brutus_core::protocol::{decode_line, RunParameters};
    use brutus_core::{Cluster, Star};
    use std::time::Duration;

    fn args(cluster: &Cluster, duration: f64, time_step: f64) -> Vec<String> {
        InitPayload::encode(cluster, RunParameters::new(duration, time_step)).to_args()
    }

    fn three_stars() -> Cluster {
        Cluster::new(
            "test",
            vec![
                Star::new(0, &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0], 1.0).unwrap(),
                Star::new(1, &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], 1.0).unwrap(),
                Star::new(2, &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], 1.0).unwrap(),
            ],
        )
        .unwrap()
    }

    async fn collect(engine: &mut ReferenceEngine) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(line) = engine.read_line().await.unwrap() {
            if line.is_empty() {
                break;
            }
            frames.push(decode_line(&line, DEFAULT_DELIMITER).unwrap());
        }
        assert_eq!(engine.read_line().await.unwrap(), None);
        frames
    }

    #[tokio::test]
    async fn test_reference_engine_step_schedule() {
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&three_stars(), 1.0, 0.2)).await.unwrap();

        let frames = collect(&mut engine).await;
        let times: Vec<f64> = frames.iter().map(|f| f.time).collect();
        assert_eq!(times, vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
        assert!(engine.signal_end().await.unwrap());
    }

    #[tokio::test]
    async fn test_reference_engine_clamps_last_step() {
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&three_stars(), 1.0, 0.3)).await.unwrap();

        let frames = collect(&mut engine).await;
        let times: Vec<f64> = frames.iter().map(|f| f.time).collect();
        assert_eq!(times, vec![0.0, 0.3, 0.6, 0.9, 1.0]);
    }

    #[tokio::test]
    async fn test_reference_engine_first_frame_is_initial_state() {
        let cluster = three_stars();
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&cluster, 1.0, 0.5)).await.unwrap();

        let frames = collect(&mut engine).await;
        for star in cluster.stars() {
            let reading = frames[0].star(star.identifier()).unwrap();
            assert_eq!(reading.position, star.position());
            assert_eq!(reading.velocity, star.velocity());
            assert_eq!(reading.mass, star.mass());
        }
    }

    #[tokio::test]
    async fn test_reference_engine_free_particle() {
        let cluster = Cluster::new(
            "single",
            vec![Star::new(4, &[1.0, 2.0, 3.0], &[0.5, -1.0, 0.0], 2.0).unwrap()],
        )
        .unwrap();
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&cluster, 2.0, 1.0)).await.unwrap();

        let last = collect(&mut engine).await.pop().unwrap();
        let star = last.star(4).unwrap();
        assert_relative_eq!(star.position[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(star.position[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(star.position[2], 3.0, epsilon = 1e-12);
        assert_relative_eq!(last.kinetic_energy, 1.25, epsilon = 1e-12);
        assert_eq!(last.potential_energy, 0.0);
    }

    #[tokio::test]
    async fn test_reference_engine_conserves_energy() {
        // Equal-mass binary on a circular orbit: E = -0.5
        let v = 0.5f64.sqrt();
        let cluster = Cluster::new(
            "binary",
            vec![
                Star::new(0, &[-0.5, 0.0, 0.0], &[0.0, -v, 0.0], 1.0).unwrap(),
                Star::new(1, &[0.5, 0.0, 0.0], &[0.0, v, 0.0], 1.0).unwrap(),
            ],
        )
        .unwrap();
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&cluster, 1.0, 0.1)).await.unwrap();

        let frames = collect(&mut engine).await;
        assert_eq!(frames.len(), 11);
        for frame in &frames {
            assert_relative_eq!(frame.total_energy, -0.5, max_relative = 1e-4);
        }
    }

    #[tokio::test]
    async fn test_reference_engine_rejects_bad_payload() {
        let mut engine = ReferenceEngine::new();
        let err = engine.start(&["1".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));

        let err = engine.start(&args(&three_stars(), 1.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_reference_engine_rejects_step_below_time_resolution() {
        let mut engine = ReferenceEngine::new();
        let err = engine.start(&args(&three_stars(), 1.0, 1e-11)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
        assert!(matches!(engine.read_line().await, Err(EngineError::NotStarted)));

        engine.start(&args(&three_stars(), 1e-9, 1e-10)).await.unwrap();
        assert_eq!(collect(&mut engine).await.len(), 11);
    }

    #[tokio::test]
    async fn test_reference_engine_can_be_interrupted() {
        let cluster = crate::scenarios::random_cluster("busy", 1, 40).unwrap();
        let mut engine = ReferenceEngine::new();
        engine.start(&args(&cluster, 5.0, 0.001)).await.unwrap();

        let mut frames = 0;
        let drained = tokio::time::timeout(Duration::from_millis(50), async {
            while let Some(line) = engine.read_line().await.unwrap() {
                if line.is_empty() {
                    break;
                }
                frames += 1;
            }
        })
        .await;

        assert!(drained.is_err());
        assert!(frames < 5001);
    }

    #[tokio::test]
    async fn test_reference_engine_lifecycle_errors() {
        let mut engine = ReferenceEngine::new();
        assert!(matches!(engine.read_line().await, Err(EngineError::NotStarted)));

        engine.start(&args(&three_stars(), 1.0, 0.5)).await.unwrap();
        assert!(matches!(
            engine.start(&args(&three_stars(), 1.0, 0.5)).await,
            Err(EngineError::AlreadyStarted)
        ));

        engine.stop().await;
        assert!(matches!(engine.read_line().await, Err(EngineError::NotStarted)));
    }

    #[tokio::test]
    async fn test_reference_engine_space_delimiter() {
        let mut engine = ReferenceEngine::new().with_delimiter(' ');
        engine.start(&args(&three_stars(), 0.5, 0.5)).await.unwrap();

        let line = engine.read_line().await.unwrap().unwrap();
        let frame = decode_line(&line, ' ').unwrap();
        assert_eq!(frame.star_count, 3);
    }
}
