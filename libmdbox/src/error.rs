use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum BoxError {
    #[error("Event with coordinates {coordinates:?} lies outside of the extents of box {box_id}")]
    OutOfRange { box_id: u64, coordinates: Vec<f64> },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid box splitting configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to decode message buffer: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Message carries {0} dimensions; expected {1}")]
    DimensionMismatch(u32, u32),
    #[error("Message has bad magic number {0:#x}")]
    BadMagic(u32),
    #[error("Box layout contains unknown node kind {0}")]
    BadNodeKind(u8),
    #[error("Message has {0} trailing bytes after decoding")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("Rank {0} is not part of a communicator of size {1}")]
    InvalidRank(usize, usize),
    #[error("Could not reach rank {0}; the peer has shut down")]
    PeerUnreachable(usize),
    #[error("Timed out after {secs}s waiting for tag {tag} from rank {source_rank}")]
    Timeout {
        source_rank: usize,
        tag: u32,
        secs: u64,
    },
    #[error("Message from rank {source_rank} had size {received}; expected {expected}")]
    SizeMismatch {
        source_rank: usize,
        expected: usize,
        received: usize,
    },
    #[error("Received a malformed message: {0}")]
    Malformed(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("Shared box layout describes {expected} boxes ({expected_leaves} leaves) but {found} boxes ({found_leaves} leaves) were built")]
    BoxCountMismatch {
        expected: usize,
        expected_leaves: usize,
        found: usize,
        found_leaves: usize,
    },
    #[error("Shared box layout disagrees with the local box structure at box {0}")]
    StructureMismatch(u64),
    #[error("Box {0} is not part of the shared box layout")]
    UnknownBox(u64),
    #[error("Rank {rank} received events for box {box_id}, which it does not own")]
    NotOwned { rank: usize, box_id: u64 },
}

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("Coordinate array has {0} columns; expected {1}")]
    BadDimensions(usize, usize),
    #[error("Coordinate array has {0} rows but {1} signal and {2} error values were given")]
    LengthMismatch(usize, usize, usize),
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("Builder failed due to box error: {0}")]
    BoxError(#[from] BoxError),
    #[error("Builder failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Builder failed due to communication error: {0}")]
    CommunicationError(#[from] CommunicationError),
    #[error("Builder failed due to partition error: {0}")]
    PartitionError(#[from] PartitionError),
    #[error("Builder failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Builder error on worker {0}: {1}")]
    BuilderError(usize, BuilderError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to EventSource error: {0}")]
    EventSourceError(#[from] EventSourceError),
    #[error("Processor failed because worker {0} panicked")]
    WorkerPanic(usize),
}

impl From<CodecError> for BuilderError {
    fn from(value: CodecError) -> Self {
        Self::CommunicationError(CommunicationError::Malformed(value))
    }
}
