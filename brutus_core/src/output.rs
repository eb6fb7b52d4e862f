//! Output handlers.
//!
//! An engine session pushes every snapshot line it reads into exactly one
//! [`OutputHandler`]. Handlers keep arrival order and never drop or merge
//! lines. The lifecycle is the same for every variant:
//!
//! ```text
//! receive_output_line* ──► finalize ──► result*
//! ```
//!
//! - `result()` before `finalize()` fails with [`OutputError::NotFinalized`]
//! - `receive_output_line()` or `finalize()` after `finalize()` fails with
//!   [`OutputError::AlreadyFinalized`]
//! - `result()` may be called repeatedly once finalized and returns equal
//!   values each time

use crate::entity::Cluster;
use crate::protocol::{decode_line, ProtocolError, DEFAULT_DELIMITER};
use crate::table::{frame_row, FrameTable, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by output handlers.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("No output data available. Make sure to call finalize before retrieving the results")]
    NotFinalized,

    #[error("Output handler already finalized")]
    AlreadyFinalized,

    /// Line could not be decoded; fatal for the owning session
    #[error("Decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// Cluster name cannot be used as a file name
    #[error("Cluster name {0:?} is not a valid output file name")]
    InvalidFileName(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Finalized result of one handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OutputResult {
    /// Untouched snapshot lines
    Raw(Vec<String>),

    /// Decoded snapshot table
    Table(FrameTable),

    /// Side effect only (file written)
    Empty,
}

impl OutputResult {
    pub fn as_raw(&self) -> Option<&[String]> {
        match self {
            OutputResult::Raw(lines) => Some(lines),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&FrameTable> {
        match self {
            OutputResult::Table(table) => Some(table),
            _ => None,
        }
    }
}

/// Consumer of one session's snapshot stream.
pub trait OutputHandler: Send {
    /// Accepts the next line in engine emission order.
    fn receive_output_line(&mut self, line: &str) -> Result<(), OutputError>;

    /// Called once after the last line.
    fn finalize(&mut self) -> Result<(), OutputError>;

    /// Returns the finalized result.
    fn result(&self) -> Result<OutputResult, OutputError>;
}

impl<H: OutputHandler + ?Sized> OutputHandler for Box<H> {
    fn receive_output_line(&mut self, line: &str) -> Result<(), OutputError> {
        (**self).receive_output_line(line)
    }

    fn finalize(&mut self) -> Result<(), OutputError> {
        (**self).finalize()
    }

    fn result(&self) -> Result<OutputResult, OutputError> {
        (**self).result()
    }
}

/// Shared open/finalized bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
struct Lifecycle {
    finalized: bool,
}

impl Lifecycle {
    fn ensure_open(&self) -> Result<(), OutputError> {
        if self.finalized {
            return Err(OutputError::AlreadyFinalized);
        }
        Ok(())
    }

    fn ensure_finalized(&self) -> Result<(), OutputError> {
        if !self.finalized {
            return Err(OutputError::NotFinalized);
        }
        Ok(())
    }
}

/// Keeps the raw lines.
#[derive(Debug, Default, Clone)]
pub struct RawOutput {
    lines: Vec<String>,
    lifecycle: Lifecycle,
}

impl RawOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl OutputHandler for RawOutput {
    fn receive_output_line(&mut self, line: &str) -> Result<(), OutputError> {
        self.lifecycle.ensure_open()?;
        self.lines.push(line.to_string());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), OutputError> {
        self.lifecycle.ensure_open()?;
        self.lifecycle.finalized = true;
        Ok(())
    }

    fn result(&self) -> Result<OutputResult, OutputError> {
        self.lifecycle.ensure_finalized()?;
        Ok(OutputResult::Raw(self.lines.clone()))
    }
}

/// Decodes every line into a table row.
#[derive(Debug, Clone)]
pub struct TableOutput {
    delimiter: char,
    rows: Vec<Row>,
    table: Option<FrameTable>,
}

impl Default for TableOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl TableOutput {
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            rows: Vec::new(),
            table: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Rows decoded so far, in receipt order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

impl OutputHandler for TableOutput {
    fn receive_output_line(&mut self, line: &str) -> Result<(), OutputError> {
        if self.table.is_some() {
            return Err(OutputError::AlreadyFinalized);
        }
        let frame = decode_line(line, self.delimiter)?;
        self.rows.push(frame_row(&frame));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), OutputError> {
        if self.table.is_some() {
            return Err(OutputError::AlreadyFinalized);
        }
        self.table = Some(FrameTable::from_rows(self.rows.clone()));
        Ok(())
    }

    fn result(&self) -> Result<OutputResult, OutputError> {
        self.table
            .clone()
            .map(OutputResult::Table)
            .ok_or(OutputError::NotFinalized)
    }
}

/// Buffers raw lines and writes them to `<directory>/<cluster name>` on
/// finalize.
#[derive(Debug, Clone)]
pub struct FileOutput {
    path: PathBuf,
    lines: Vec<String>,
    lifecycle: Lifecycle,
}

impl FileOutput {
    /// Fails with [`OutputError::InvalidFileName`] unless the cluster name is
    /// a single path component inside `output_directory`.
    pub fn new(cluster: &Cluster, output_directory: impl AsRef<Path>) -> Result<Self, OutputError> {
        let name = cluster.name();
        if !is_plain_file_name(name) {
            return Err(OutputError::InvalidFileName(name.to_string()));
        }
        Ok(Self {
            path: output_directory.as_ref().join(name),
            lines: Vec::new(),
            lifecycle: Lifecycle::default(),
        })
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffered lines; still available after finalize.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn io_error(&self, source: std::io::Error) -> OutputError {
        OutputError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

impl OutputHandler for FileOutput {
    fn receive_output_line(&mut self, line: &str) -> Result<(), OutputError> {
        self.lifecycle.ensure_open()?;
        self.lines.push(line.to_string());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), OutputError> {
        self.lifecycle.ensure_open()?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, self.lines.join("\n")).map_err(|e| self.io_error(e))?;

        self.lifecycle.finalized = true;
        Ok(())
    }

    fn result(&self) -> Result<OutputResult, OutputError> {
        self.lifecycle.ensure_finalized()?;
        Ok(OutputResult::Empty)
    }
}
