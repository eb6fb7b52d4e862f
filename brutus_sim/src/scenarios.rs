//! Demo clusters for the simulator binary.

use brutus_core::{Cluster, Star, ValidationError};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Spread of the random velocity components.
const RANDOM_VELOCITY_SIGMA: f64 = 0.1;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Three unit masses on the coordinate axes
    ThreeBody,

    /// Five unit masses in a cross
    NBody,

    /// Three identical three-body clusters evolved side by side
    NCluster,

    /// Seeded random cluster
    Random,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ThreeBody,
            ScenarioId::NBody,
            ScenarioId::NCluster,
            ScenarioId::Random,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ThreeBody => "three_body",
            ScenarioId::NBody => "n_body",
            ScenarioId::NCluster => "n_cluster",
            ScenarioId::Random => "random",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ThreeBody => "3 stars, one cluster",
            ScenarioId::NBody => "5 stars, one cluster",
            ScenarioId::NCluster => "3 clusters of 3 stars",
            ScenarioId::Random => "N seeded random stars, one cluster",
        }
    }

    /// Builds the clusters of this scenario. `seed` and `stars` only apply
    /// to [`ScenarioId::Random`].
    pub fn clusters(&self, seed: u64, stars: usize) -> Result<Vec<Cluster>, ValidationError> {
        match self {
            ScenarioId::ThreeBody => Ok(vec![three_body()?]),
            ScenarioId::NBody => Ok(vec![n_body()?]),
            ScenarioId::NCluster => n_cluster(),
            ScenarioId::Random => Ok(vec![random_cluster("random", seed, stars)?]),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "three_body" | "threebody" | "3body" => Ok(ScenarioId::ThreeBody),
            "n_body" | "nbody" => Ok(ScenarioId::NBody),
            "n_cluster" | "ncluster" => Ok(ScenarioId::NCluster),
            "random" => Ok(ScenarioId::Random),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

fn star(identifier: u64, position: [f64; 3], velocity: [f64; 3]) -> Result<Star, ValidationError> {
    Star::new(identifier, &position, &velocity, 1.0)
}

fn triple(name: &str) -> Result<Cluster, ValidationError> {
    Cluster::new(
        name,
        vec![
            star(0, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0])?,
            star(1, [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])?,
            star(2, [0.0, 1.0, 0.0], [0.0, 0.0, 1.0])?,
        ],
    )
}

pub fn three_body() -> Result<Cluster, ValidationError> {
    triple("example_cluster")
}

pub fn n_body() -> Result<Cluster, ValidationError> {
    Cluster::new(
        "n_body",
        vec![
            star(0, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0])?,
            star(1, [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])?,
            star(2, [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0])?,
            star(3, [0.0, -1.0, 0.0], [0.0, -1.0, 0.0])?,
            star(4, [-1.0, 0.0, 0.0], [1.0, 1.0, 0.0])?,
        ],
    )
}

pub fn n_cluster() -> Result<Vec<Cluster>, ValidationError> {
    (1..=3).map(|i| triple(&format!("cluster_{i}"))).collect()
}

/// Unit-mass stars placed uniformly in [-1, 1]^3 with small Gaussian
/// velocities. Identical seeds give identical clusters.
pub fn random_cluster(name: &str, seed: u64, stars: usize) -> Result<Cluster, ValidationError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let stars = (0..stars as u64)
        .map(|identifier| {
            let position: [f64; 3] = std::array::from_fn(|_| rng.gen_range(-1.0..=1.0));
            let v: [f64; 3] =
                std::array::from_fn(|_| RANDOM_VELOCITY_SIGMA * rng.sample::<f64, _>(StandardNormal));
            star(identifier, position, v)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Cluster::new(name, stars)
}
