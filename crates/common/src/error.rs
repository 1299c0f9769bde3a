//! Central error types for the encoder stack (thiserror-based).

use thiserror::Error;

use crate::codec::VideoCodec;
use crate::color::PixelFormat;

/// GPU backend and interop errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("No GPU backend available: {0}")]
    NoBackend(String),

    #[error("GPU device initialization failed: {0}")]
    DeviceInit(String),

    #[error("Invalid device handle for {api}")]
    InvalidDevice { api: String },

    #[error("Interop {operation} failed: {reason}")]
    Interop { operation: String, reason: String },

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),
}

/// Hardware encoder errors.
///
/// Every fallible encoder operation reports one of these. A submission that
/// simply needs more input is not an error and never shows up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Encoder runtime unavailable: {0}")]
    Load(String),

    #[error("Encoder device error: {0}")]
    Device(String),

    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Vendor call failed: {0}")]
    VendorCall(String),

    #[error("Resource bridge error: {0}")]
    ResourceBridge(String),

    #[error("Bitstream error: {0}")]
    Bitstream(String),

    #[error("Unsupported codec for HW encode: {0:?}")]
    UnsupportedCodec(VideoCodec),

    #[error("Unsupported input format for HW encode: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("Invalid encoder configuration: {0}")]
    InvalidConfig(String),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

/// Convenience Result type for encoder operations.
pub type EncodeResult<T> = Result<T, EncodeError>;
