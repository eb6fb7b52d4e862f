//! Star and Cluster value types.
//!
//! Both types validate on construction and are immutable afterwards. A
//! [`Cluster`] describes the t=0 configuration handed to an engine; the
//! orchestration layer never evolves it in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while constructing entities.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Position does not have exactly 3 components
    #[error("Position must be a 3D vector, got {0} components")]
    InvalidPosition(usize),

    /// Velocity does not have exactly 3 components
    #[error("Velocity must be a 3D vector, got {0} components")]
    InvalidVelocity(usize),

    /// Mass is zero, negative or NaN
    #[error("Mass must be positive, got {0}")]
    NonPositiveMass(f64),

    /// Two stars of one cluster share an identifier
    #[error("Star identifiers must be different for all stars in cluster (duplicate {0})")]
    DuplicateIdentifier(u64),
}

/// A single star at simulation start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StarFields")]
pub struct Star {
    identifier: u64,
    position: [f64; 3],
    velocity: [f64; 3],
    mass: f64,
}

/// Unvalidated wire shape of a [`Star`].
#[derive(Deserialize)]
struct StarFields {
    identifier: u64,
    position: Vec<f64>,
    velocity: Vec<f64>,
    mass: f64,
}

impl TryFrom<StarFields> for Star {
    type Error = ValidationError;

    fn try_from(fields: StarFields) -> Result<Self, Self::Error> {
        Star::new(fields.identifier, &fields.position, &fields.velocity, fields.mass)
    }
}

impl Star {
    /// Creates a star, checking vector lengths and mass.
    pub fn new(
        identifier: u64,
        position: &[f64],
        velocity: &[f64],
        mass: f64,
    ) -> Result<Self, ValidationError> {
        let position: [f64; 3] = position
            .try_into()
            .map_err(|_| ValidationError::InvalidPosition(position.len()))?;
        let velocity: [f64; 3] = velocity
            .try_into()
            .map_err(|_| ValidationError::InvalidVelocity(velocity.len()))?;

        // Written this way round so NaN is rejected too
        if !(mass > 0.0) {
            return Err(ValidationError::NonPositiveMass(mass));
        }

        Ok(Self {
            identifier,
            position,
            velocity,
            mass,
        })
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    pub fn velocity(&self) -> [f64; 3] {
        self.velocity
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }
}

/// A named group of stars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClusterFields")]
pub struct Cluster {
    name: String,
    stars: Vec<Star>,
}

#[derive(Deserialize)]
struct ClusterFields {
    name: String,
    #[serde(default)]
    stars: Vec<Star>,
}

impl TryFrom<ClusterFields> for Cluster {
    type Error = ValidationError;

    fn try_from(fields: ClusterFields) -> Result<Self, Self::Error> {
        Cluster::new(fields.name, fields.stars)
    }
}

impl Cluster {
    /// Creates a cluster, rejecting duplicate star identifiers.
    pub fn new(name: impl Into<String>, stars: Vec<Star>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(stars.len());
        for star in &stars {
            if !seen.insert(star.identifier) {
                return Err(ValidationError::DuplicateIdentifier(star.identifier));
            }
        }

        Ok(Self {
            name: name.into(),
            stars,
        })
    }

    /// Label used for log lines and output file names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stars in their original order.
    pub fn stars(&self) -> &[Star] {
        &self.stars
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_creation() {
        let star = Star::new(0, &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0], 1.0).unwrap();

        assert_eq!(star.identifier(), 0);
        assert_eq!(star.position(), [0.0, 0.0, 0.0]);
        assert_eq!(star.velocity(), [0.0, 0.0, 0.0]);
        assert_eq!(star.mass(), 1.0);
    }

    #[test]
    fn test_star_invalid_position() {
        let err = Star::new(0, &[0.0, 0.0], &[0.0, 0.0, 0.0], 1.0).unwrap_err();
        assert_eq!(err, ValidationError::InvalidPosition(2));
    }

    #[test]
    fn test_star_invalid_velocity() {
        let err = Star::new(0, &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0, 0.0], 1.0).unwrap_err();
        assert_eq!(err, ValidationError::InvalidVelocity(4));
    }

    #[test]
    fn test_star_invalid_mass() {
        assert!(Star::new(0, &[0.0; 3], &[0.0; 3], 0.0).is_err());
        assert!(Star::new(0, &[0.0; 3], &[0.0; 3], -1.0).is_err());
        assert!(Star::new(0, &[0.0; 3], &[0.0; 3], f64::NAN).is_err());
    }

    #[test]
    fn test_cluster_multiple_stars() {
        let star1 = Star::new(0, &[0.0; 3], &[0.0; 3], 1.0).unwrap();
        let star2 = Star::new(1, &[1.0; 3], &[1.0; 3], 1.0).unwrap();
        let cluster = Cluster::new("test_cluster", vec![star1.clone(), star2.clone()]).unwrap();

        assert_eq!(cluster.name(), "test_cluster");
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster.stars()[0], star1);
        assert_eq!(cluster.stars()[1], star2);
    }

    #[test]
    fn test_cluster_stars_with_same_identifier() {
        let star1 = Star::new(0, &[0.0; 3], &[0.0; 3], 1.0).unwrap();
        let star2 = Star::new(0, &[1.0; 3], &[1.0; 3], 1.0).unwrap();

        let err = Cluster::new("test_cluster", vec![star1, star2]).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateIdentifier(0));
    }

    #[test]
    fn test_empty_cluster_is_allowed() {
        let cluster = Cluster::new("empty", Vec::new()).unwrap();
        assert!(cluster.is_empty());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok = r#"{"identifier": 3, "position": [1, 2, 3], "velocity": [0, 0, 0], "mass": 2.5}"#;
        let star: Star = serde_json::from_str(ok).unwrap();
        assert_eq!(star.identifier(), 3);
        assert_eq!(star.position(), [1.0, 2.0, 3.0]);

        let bad = r#"{"identifier": 3, "position": [1, 2], "velocity": [0, 0, 0], "mass": 2.5}"#;
        assert!(serde_json::from_str::<Star>(bad).is_err());

        let dup = r#"{"name": "c", "stars": [
            {"identifier": 0, "position": [0, 0, 0], "velocity": [0, 0, 0], "mass": 1},
            {"identifier": 0, "position": [1, 0, 0], "velocity": [0, 0, 0], "mass": 1}
        ]}"#;
        assert!(serde_json::from_str::<Cluster>(dup).is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_star_round_trips(
            id in any::<u64>(),
            pos in prop::array::uniform3(-1e6f64..1e6),
            vel in prop::array::uniform3(-1e3f64..1e3),
            mass in 1e-9f64..1e9,
        ) {
            let star = Star::new(id, &pos, &vel, mass).unwrap();
            prop_assert_eq!(star.identifier(), id);
            prop_assert_eq!(star.position(), pos);
            prop_assert_eq!(star.velocity(), vel);
            prop_assert_eq!(star.mass(), mass);
        }

        #[test]
        fn prop_wrong_length_vectors_fail(len in 0usize..8, mass in 1e-3f64..1e3) {
            prop_assume!(len != 3);
            let v = vec![0.0; len];
            prop_assert!(Star::new(0, &v, &[0.0; 3], mass).is_err());
            prop_assert!(Star::new(0, &[0.0; 3], &v, mass).is_err());
        }

        #[test]
        fn prop_non_positive_mass_fails(mass in -1e9f64..=0.0) {
            prop_assert!(Star::new(0, &[0.0; 3], &[0.0; 3], mass).is_err());
        }

        #[test]
        fn prop_distinct_identifiers_build(ids in prop::collection::hash_set(any::<u64>(), 0..20)) {
            let stars: Vec<Star> = ids
                .iter()
                .map(|&id| Star::new(id, &[0.0; 3], &[0.0; 3], 1.0).unwrap())
                .collect();
            let n = stars.len();
            let cluster = Cluster::new("p", stars).unwrap();
            prop_assert_eq!(cluster.len(), n);
        }
    }
}
