//! `hwenc-encoder` -- NVENC hardware encoding of GPU-resident frames.
//!
//! The NVENC runtime is loaded dynamically at runtime, allowing graceful
//! fallback on systems without supported hardware.
//!
//! # Architecture
//!
//! - [`nvenc`] -- runtime loading, parameter mapping, the session state
//!   machine and the output bitstream buffer
//! - [`bridge`] -- registering caller textures with the session, directly
//!   (D3D11) or through a D3D11-on-12 interop device (D3D12)
//! - [`annexb`] -- in-band codec configuration
//! - [`caps`] -- cached hardware capability probing
//! - [`pipeline`] -- per-frame sequencing under one lock
//! - [`context`] -- owns the loader and probe; creates sessions and pipelines
//! - [`sink`] -- raw elementary stream output
//!
//! # Encode Pipeline
//!
//! ```text
//! TextureRef (D3D11 / D3D12, NV12 / P010 / BGRA)
//!   --> GpuFence::wait
//!     --> ResourceBridge register + map
//!       --> NvEncEncodePicture
//!         --> Lock bitstream output buffer
//!           --> EncodedPacket (+ parameter sets per PrependPolicy)
//!             --> ElementaryStreamWriter
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hwenc_encoder::{EncodeFrame, EncoderContext};
//! use hwenc_common::EncoderConfig;
//!
//! let context = EncoderContext::for_host();
//! if !context.is_available() {
//!     return Ok(());
//! }
//! let pipeline = context.new_pipeline(EncoderConfig::default())?;
//! for (texture, pts) in frames {
//!     if let Some(packet) = pipeline.encode(&EncodeFrame::new(device, texture, pts))? {
//!         writer.write_packet(&packet)?;
//!     }
//! }
//! pipeline.finalize();
//! ```

pub mod annexb;
pub mod bridge;
pub mod caps;
pub mod context;
pub mod error;
pub mod nvenc;
pub mod pipeline;
pub mod sink;

pub use annexb::AnnexBPackager;
pub use bridge::{MappedFrame, MappedInput, ResourceBridge};
pub use caps::{CapabilityProbe, CodecFeatures, CombinationSupport, ProbeResult, StageFailures};
pub use context::EncoderContext;
pub use error::{BufferError, NvencLoadError, SinkError};
pub use pipeline::{EncodeFrame, NvencPipeline, PipelineStats};
pub use sink::ElementaryStreamWriter;
