//! Shared types, traits, and errors for the hardware encoder stack.
//!
//! This crate is the foundation that the GPU interop and encoder crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `TimeCode` and `ResourceId` newtypes
//! - **GPU handles**: `GpuDeviceRef`, `TextureRef`, `GraphicsApi`, `GpuFence`
//! - **Errors**: `EncodeError`, `GpuError` (thiserror-based)
//! - **Config**: `EncoderConfig`, `LayerConfig`, `RuntimeOverrides`

pub mod codec;
pub mod color;
pub mod config;
pub mod error;
pub mod gpu_traits;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::VideoCodec;
pub use color::PixelFormat;
pub use config::{
    EncoderConfig, LayerConfig, MultipassMode, PrependPolicy, RateControlMode, RuntimeOverrides,
};
pub use error::{EncodeError, EncodeResult, GpuError};
pub use gpu_traits::{EncodedPacket, GpuDeviceRef, GpuFence, GraphicsApi, TextureRef};
pub use types::{ResourceId, TimeCode};
