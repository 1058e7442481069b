use thiserror::Error;

use crate::buffer::BufferType;

/// Errors of device, buffer, geometry and scene operations.
/// All of them are raised by the call that violates the precondition, nothing is applied partially.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Device initialization failed: {0}")]
    InitializationError(String),

    #[error("Invalid layout: {0}")]
    InvalidLayoutError(String),

    #[error("Index {index} out of range for {len} items")]
    IndexError { index: usize, len: usize },

    #[error("Geometry can't be committed without a {0:?} buffer")]
    IncompleteGeometryError(BufferType),

    #[error("{0} must be committed first")]
    NotCommittedError(&'static str),

    #[error("{0} used after release")]
    UseAfterRelease(&'static str),

    #[error("Failed to spawn a worker thread: {0}")]
    WorkerSpawnError(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
