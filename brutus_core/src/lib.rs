//! Brutus Core - star clusters, the snapshot protocol and output handlers
//!
//! This library holds everything about a Brutus run that does not involve
//! an engine process:
//! 1. **Entities**: validated, immutable `Star` / `Cluster` initial conditions
//! 2. **Protocol**: positional engine arguments and snapshot line decoding
//! 3. **Output**: pluggable per-cluster accumulators (raw, table, file)

pub mod entity;
pub mod output;
pub mod protocol;
pub mod table;

// Re-export key types for convenience
pub use entity::{Cluster, Star, ValidationError};
pub use output::{FileOutput, OutputError, OutputHandler, OutputResult, RawOutput, TableOutput};
pub use protocol::{
    decode_line, encode_frame, Frame, InitPayload, ProtocolError, RunParameters, StarReading,
    DEFAULT_DELIMITER,
};
pub use table::{Cell, FrameTable};
