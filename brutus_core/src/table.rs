//! Column-keyed snapshot table.
//!
//! Column names:
//! - `time`, `star_count`
//! - `total_energy`, `kinetic_energy`, `potential_energy`
//! - `star_<id>_pos`, `star_<id>_vel`, `star_<id>_mass` for every star seen

use crate::protocol::Frame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const TIME: &str = "time";
pub const STAR_COUNT: &str = "star_count";
pub const TOTAL_ENERGY: &str = "total_energy";
pub const KINETIC_ENERGY: &str = "kinetic_energy";
pub const POTENTIAL_ENERGY: &str = "potential_energy";

pub fn position_column(identifier: u64) -> String {
    format!("star_{identifier}_pos")
}

pub fn velocity_column(identifier: u64) -> String {
    format!("star_{identifier}_vel")
}

pub fn mass_column(identifier: u64) -> String {
    format!("star_{identifier}_mass")
}

/// A single table value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Count(u64),
    Float(f64),
    Vector([f64; 3]),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Count(n) => Some(*n as f64),
            Cell::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<[f64; 3]> {
        match self {
            Cell::Vector(v) => Some(*v),
            _ => None,
        }
    }
}

/// One row in column order.
pub type Row = Vec<(String, Cell)>;

/// Flattens a frame into a row.
pub fn frame_row(frame: &Frame) -> Row {
    let mut row = Vec::with_capacity(5 + 3 * frame.stars.len());
    row.push((TIME.to_string(), Cell::Float(frame.time)));
    row.push((STAR_COUNT.to_string(), Cell::Count(frame.star_count as u64)));
    row.push((TOTAL_ENERGY.to_string(), Cell::Float(frame.total_energy)));
    row.push((KINETIC_ENERGY.to_string(), Cell::Float(frame.kinetic_energy)));
    row.push((POTENTIAL_ENERGY.to_string(), Cell::Float(frame.potential_energy)));

    for star in &frame.stars {
        row.push((position_column(star.identifier), Cell::Vector(star.position)));
        row.push((velocity_column(star.identifier), Cell::Vector(star.velocity)));
        row.push((mass_column(star.identifier), Cell::Float(star.mass)));
    }

    row
}

/// Materialized snapshot rows.
///
/// Columns appear in order of first appearance; a row that lacks a column
/// (a star missing from that frame) simply has no value for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTable {
    columns: Vec<String>,
    rows: Vec<BTreeMap<String, Cell>>,
}

impl FrameTable {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut materialized = Vec::with_capacity(rows.len());

        for row in rows {
            let mut cells = BTreeMap::new();
            for (name, cell) in row {
                if seen.insert(name.clone()) {
                    columns.push(name.clone());
                }
                cells.insert(name, cell);
            }
            materialized.push(cells);
        }

        Self {
            columns,
            rows: materialized,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[BTreeMap<String, Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    /// All values of one column, `None` where a row lacks it.
    pub fn column(&self, name: &str) -> Vec<Option<&Cell>> {
        self.rows.iter().map(|cells| cells.get(name)).collect()
    }
}
