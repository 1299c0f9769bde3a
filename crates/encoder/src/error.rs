//! Encoder-specific error types.
//!
//! These errors cover the encoder crate's internal operations beyond the
//! common `EncodeError` defined in `hwenc-common`. They carry more granular
//! information about runtime loading and buffer misuse, and convert into
//! the shared taxonomy at the crate boundary.

use hwenc_common::EncodeError;
use thiserror::Error;

/// Errors that can occur when loading the NVENC runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NvencLoadError {
    #[error("NVENC library not found: {0}")]
    LibraryNotFound(String),

    #[error("Required symbol not found: {0}")]
    SymbolNotFound(String),
}

/// Errors specific to NVENC resource and bitstream buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Failed to create output bitstream buffer: {0}")]
    OutputCreationFailed(String),

    #[error("Output bitstream buffer already exists; release it first")]
    AlreadyCreated,

    #[error("Output bitstream buffer has not been created")]
    NotCreated,

    #[error("Resource bridge is not bound to an encoder session")]
    NotBound,

    #[error("Failed to register external resource: {0}")]
    RegisterFailed(String),

    #[error("Resource {0} is not registered")]
    NotRegistered(String),

    #[error("Failed to lock bitstream: {0}")]
    LockFailed(String),

    #[error("Bitstream buffer is already locked")]
    AlreadyLocked,

    #[error("Bitstream buffer is not locked")]
    NotLocked,

    #[error("Failed to map input resource: {0}")]
    MapFailed(String),

    #[error("Resource {0} is already mapped")]
    AlreadyMapped(String),

    #[error("Failed to unmap input resource: {0}")]
    UnmapFailed(String),
}

/// Errors from writing an elementary stream.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<NvencLoadError> for EncodeError {
    fn from(err: NvencLoadError) -> Self {
        EncodeError::Load(err.to_string())
    }
}

impl From<BufferError> for EncodeError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::OutputCreationFailed(_)
            | BufferError::AlreadyCreated
            | BufferError::NotCreated
            | BufferError::LockFailed(_)
            | BufferError::AlreadyLocked
            | BufferError::NotLocked => EncodeError::Bitstream(err.to_string()),
            BufferError::NotBound
            | BufferError::RegisterFailed(_)
            | BufferError::NotRegistered(_)
            | BufferError::MapFailed(_)
            | BufferError::AlreadyMapped(_)
            | BufferError::UnmapFailed(_) => EncodeError::ResourceBridge(err.to_string()),
        }
    }
}
