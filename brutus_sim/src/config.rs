//! Cluster definition files and output handler selection.

use brutus_core::output::{FileOutput, OutputError, OutputHandler, RawOutput, TableOutput};
use brutus_core::protocol::DEFAULT_DELIMITER;
use brutus_core::Cluster;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON, or a star or cluster that fails validation
    #[error("Invalid cluster file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("File output requires an output directory")]
    MissingOutputDirectory,

    #[error("Output handler error: {0}")]
    Output(#[from] OutputError),
}

/// Top-level shape of a cluster definition file.
///
/// ```json
/// {"clusters": [{"name": "pair", "stars": [
///     {"identifier": 0, "position": [0, 0, 0], "velocity": [0, 0, 0], "mass": 1}
/// ]}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFile {
    pub clusters: Vec<Cluster>,
}

pub fn parse_clusters(json: &str) -> Result<Vec<Cluster>, ConfigError> {
    let file: ClusterFile = serde_json::from_str(json)?;
    Ok(file.clusters)
}

pub fn load_clusters(path: impl AsRef<Path>) -> Result<Vec<Cluster>, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_clusters(&json)
}

/// Output handler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Raw,
    Table,
    File,
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(OutputKind::Raw),
            "table" | "pandas" => Ok(OutputKind::Table),
            "file" => Ok(OutputKind::File),
            _ => Err(format!("Unknown output kind: {}", s)),
        }
    }
}

/// Builds one fresh output handler per registered cluster.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub kind: OutputKind,
    pub delimiter: char,
    pub output_directory: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::Table,
            delimiter: DEFAULT_DELIMITER,
            output_directory: None,
        }
    }
}

impl OutputConfig {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    pub fn build(&self, cluster: &Cluster) -> Result<Box<dyn OutputHandler>, ConfigError> {
        Ok(match self.kind {
            OutputKind::Raw => Box::new(RawOutput::new()),
            OutputKind::Table => Box::new(TableOutput::new().with_delimiter(self.delimiter)),
            OutputKind::File => {
                let dir = self
                    .output_directory
                    .as_ref()
                    .ok_or(ConfigError::MissingOutputDirectory)?;
                Box::new(FileOutput::new(cluster, dir)?)
            }
        })
    }
}
