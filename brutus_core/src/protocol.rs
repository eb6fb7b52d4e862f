//! Snapshot protocol codec.
//!
//! Translates between structured cluster data and the engine's positional,
//! line-oriented text format.
//!
//! # Request (engine arguments)
//!
//! ```text
//! duration, time_step, tolerance, word_length, star_count,
//!     {identifier, pos_x, pos_y, pos_z, vel_x, vel_y, vel_z, mass} × star_count
//! ```
//!
//! # Snapshot line (one per emitted step)
//!
//! ```text
//! time, star_count,
//!     {identifier, pos_x, pos_y, pos_z, vel_x, vel_y, vel_z, mass} × star_count,
//!     total_energy, kinetic_energy, potential_energy
//! ```
//!
//! Everything here is pure: no buffering, no state between lines.

use crate::entity::{Cluster, Star};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// Field separator used by the Brutus native library.
pub const DEFAULT_DELIMITER: char = ',';

/// Default Bulirsch-Stoer tolerance passed to the engine.
pub const DEFAULT_TOLERANCE: f64 = 1e-11;

/// Default word length (mantissa bits) passed to the engine.
pub const DEFAULT_WORD_LENGTH: u32 = 128;

/// Fields per star block: identifier, 3 position, 3 velocity, mass.
pub const STAR_FIELDS: usize = 8;

const FRAME_HEADER_FIELDS: usize = 2;
const ENERGY_FIELDS: usize = 3;
const REQUEST_HEADER_FIELDS: usize = 5;

/// Errors raised while decoding snapshot lines or engine arguments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Line was empty or whitespace only
    #[error("Empty snapshot line")]
    EmptyLine,

    /// Field count does not match the layout announced by star_count
    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    /// A floating-point field failed to parse
    #[error("Field {index} is not a number: {value:?}")]
    InvalidNumber { index: usize, value: String },

    /// An identifier/count field is not a non-negative integer
    #[error("Field {index} is not a non-negative integer: {value:?}")]
    InvalidInteger { index: usize, value: String },
}

/// Run-wide parameters sent to every engine ahead of the star data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Total simulated time
    pub duration: f64,

    /// Output step size
    pub time_step: f64,

    /// Bulirsch-Stoer tolerance
    pub tolerance: f64,

    /// Numeric precision hint in bits
    pub word_length: u32,
}

impl RunParameters {
    /// Creates parameters with the default tolerance and word length.
    pub fn new(duration: f64, time_step: f64) -> Self {
        Self {
            duration,
            time_step,
            tolerance: DEFAULT_TOLERANCE,
            word_length: DEFAULT_WORD_LENGTH,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_word_length(mut self, word_length: u32) -> Self {
        self.word_length = word_length;
        self
    }
}

/// State of one star as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarReading {
    pub identifier: u64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub mass: f64,
}

impl From<&Star> for StarReading {
    fn from(star: &Star) -> Self {
        Self {
            identifier: star.identifier(),
            position: star.position(),
            velocity: star.velocity(),
            mass: star.mass(),
        }
    }
}

/// Initial conditions for one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InitPayload {
    pub params: RunParameters,
    pub stars: Vec<StarReading>,
}

impl InitPayload {
    /// Builds the payload for a cluster, keeping its star order.
    pub fn encode(cluster: &Cluster, params: RunParameters) -> Self {
        Self {
            params,
            stars: cluster.stars().iter().map(StarReading::from).collect(),
        }
    }

    pub fn star_count(&self) -> usize {
        self.stars.len()
    }

    /// Renders the positional argument list expected by the engine.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(REQUEST_HEADER_FIELDS + STAR_FIELDS * self.stars.len());
        args.push(self.params.duration.to_string());
        args.push(self.params.time_step.to_string());
        args.push(self.params.tolerance.to_string());
        args.push(self.params.word_length.to_string());
        args.push(self.stars.len().to_string());

        for star in &self.stars {
            args.push(star.identifier.to_string());
            args.extend(star.position.iter().map(f64::to_string));
            args.extend(star.velocity.iter().map(f64::to_string));
            args.push(star.mass.to_string());
        }

        args
    }

    /// Parses a positional argument list back into a payload.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ProtocolError> {
        let raw: Vec<&str> = args.iter().map(|a| a.as_ref().trim()).collect();
        let fields = Fields(&raw);

        if raw.len() < REQUEST_HEADER_FIELDS {
            return Err(ProtocolError::FieldCount {
                expected: REQUEST_HEADER_FIELDS,
                found: raw.len(),
            });
        }

        let params = RunParameters {
            duration: fields.float(0)?,
            time_step: fields.float(1)?,
            tolerance: fields.float(2)?,
            word_length: u32::try_from(fields.integer(3)?).map_err(|_| {
                ProtocolError::InvalidInteger {
                    index: 3,
                    value: raw[3].to_string(),
                }
            })?,
        };

        let star_count = fields.count(4)?;
        let expected = expected_len(REQUEST_HEADER_FIELDS, star_count, 0);
        if raw.len() != expected {
            return Err(ProtocolError::FieldCount {
                expected,
                found: raw.len(),
            });
        }

        let stars = (0..star_count)
            .map(|i| fields.star(REQUEST_HEADER_FIELDS + i * STAR_FIELDS))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { params, stars })
    }
}

/// One decoded snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub time: f64,
    pub star_count: usize,
    pub stars: Vec<StarReading>,
    pub total_energy: f64,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
}

impl Frame {
    /// Looks a star up by identifier rather than by position in the line.
    pub fn star(&self, identifier: u64) -> Option<&StarReading> {
        self.stars.iter().find(|s| s.identifier == identifier)
    }
}

/// Decodes one snapshot line.
///
/// Surrounding whitespace and a single leading/trailing delimiter are
/// ignored, and every field is trimmed. A whitespace delimiter splits on runs
/// of whitespace. `star_count` decides how many star blocks are read; exactly
/// three energy fields must follow them.
pub fn decode_line(line: &str, delimiter: char) -> Result<Frame, ProtocolError> {
    let raw = split_fields(line, delimiter);
    if raw.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    if raw.len() < FRAME_HEADER_FIELDS {
        return Err(ProtocolError::FieldCount {
            expected: FRAME_HEADER_FIELDS + ENERGY_FIELDS,
            found: raw.len(),
        });
    }

    let fields = Fields(&raw);
    let time = fields.float(0)?;
    let star_count = fields.count(1)?;

    let expected = expected_len(FRAME_HEADER_FIELDS, star_count, ENERGY_FIELDS);
    if raw.len() != expected {
        return Err(ProtocolError::FieldCount {
            expected,
            found: raw.len(),
        });
    }

    let stars = (0..star_count)
        .map(|i| fields.star(FRAME_HEADER_FIELDS + i * STAR_FIELDS))
        .collect::<Result<Vec<_>, _>>()?;

    let energy_base = expected - ENERGY_FIELDS;
    Ok(Frame {
        time,
        star_count,
        stars,
        total_energy: fields.float(energy_base)?,
        kinetic_energy: fields.float(energy_base + 1)?,
        potential_energy: fields.float(energy_base + 2)?,
    })
}

/// Renders a frame as a snapshot line.
pub fn encode_frame(frame: &Frame, delimiter: char) -> String {
    let mut out = String::new();
    let mut push = |value: &dyn std::fmt::Display| {
        if !out.is_empty() {
            out.push(delimiter);
        }
        let _ = write!(out, "{value}");
    };

    push(&frame.time);
    push(&frame.stars.len());
    for star in &frame.stars {
        push(&star.identifier);
        for v in star.position.iter().chain(star.velocity.iter()) {
            push(v);
        }
        push(&star.mass);
    }
    push(&frame.total_energy);
    push(&frame.kinetic_energy);
    push(&frame.potential_energy);

    out
}

fn split_fields(line: &str, delimiter: char) -> Vec<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if delimiter.is_whitespace() {
        return trimmed.split_whitespace().collect();
    }

    let trimmed = trimmed.strip_prefix(delimiter).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(delimiter).unwrap_or(trimmed);
    trimmed.split(delimiter).map(str::trim).collect()
}

/// Saturates on absurd star counts so the length check fails cleanly.
fn expected_len(header: usize, star_count: usize, trailer: usize) -> usize {
    star_count
        .checked_mul(STAR_FIELDS)
        .and_then(|n| n.checked_add(header + trailer))
        .unwrap_or(usize::MAX)
}

/// Positional accessor over already-split fields.
struct Fields<'a>(&'a [&'a str]);

impl Fields<'_> {
    fn raw(&self, index: usize) -> &str {
        self.0.get(index).copied().unwrap_or_default()
    }

    fn float(&self, index: usize) -> Result<f64, ProtocolError> {
        let value = self.raw(index);
        value.parse::<f64>().map_err(|_| ProtocolError::InvalidNumber {
            index,
            value: value.to_string(),
        })
    }

    /// Accepts `7` as well as integral float text such as `7.000000`.
    fn integer(&self, index: usize) -> Result<u64, ProtocolError> {
        let value = self.raw(index);
        if let Ok(n) = value.parse::<u64>() {
            return Ok(n);
        }
        match value.parse::<f64>() {
            Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
            _ => Err(ProtocolError::InvalidInteger {
                index,
                value: value.to_string(),
            }),
        }
    }

    fn count(&self, index: usize) -> Result<usize, ProtocolError> {
        let n = self.integer(index)?;
        usize::try_from(n).map_err(|_| ProtocolError::InvalidInteger {
            index,
            value: self.raw(index).to_string(),
        })
    }

    fn star(&self, base: usize) -> Result<StarReading, ProtocolError> {
        Ok(StarReading {
            identifier: self.integer(base)?,
            position: [
                self.float(base + 1)?,
                self.float(base + 2)?,
                self.float(base + 3)?,
            ],
            velocity: [
                self.float(base + 4)?,
                self.float(base + 5)?,
                self.float(base + 6)?,
            ],
            mass: self.float(base + 7)?,
        })
    }
}
