//! GPU handle types and the fence abstraction shared by the encoder and the
//! interop backends.
//!
//! The encoder never creates or owns the caller's devices and textures. It
//! receives borrowed raw handles tagged with the API they belong to, and
//! picks a submission strategy from that tag at runtime.

use std::ffi::c_void;
use std::fmt;

use crate::color::PixelFormat;
use crate::error::GpuError;
use crate::types::{ResourceId, TimeCode};

/// Graphics API a device or texture belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    D3D11,
    D3D12,
    Vulkan,
    Cuda,
    Unknown,
}

impl GraphicsApi {
    pub fn name(self) -> &'static str {
        match self {
            Self::D3D11 => "Direct3D 11",
            Self::D3D12 => "Direct3D 12",
            Self::Vulkan => "Vulkan",
            Self::Cuda => "CUDA",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Borrowed native device handle (`ID3D11Device*`, `ID3D12Device*`, `CUcontext`, ...).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct GpuDeviceRef {
    pub api: GraphicsApi,
    pub raw: *mut c_void,
}

// SAFETY: GpuDeviceRef is an opaque borrowed handle. The encoder only hands it
// back to driver entry points which are free-threaded for device objects; the
// owner guarantees the device outlives every session created against it.
unsafe impl Send for GpuDeviceRef {}
unsafe impl Sync for GpuDeviceRef {}

impl GpuDeviceRef {
    pub fn new(api: GraphicsApi, raw: *mut c_void) -> Self {
        Self { api, raw }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }
}

impl fmt::Debug for GpuDeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDeviceRef")
            .field("api", &self.api)
            .field("raw", &format_args!("{:p}", self.raw))
            .finish()
    }
}

/// Borrowed 2D texture handle plus its owner-issued identity.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TextureRef {
    pub id: ResourceId,
    pub raw: *mut c_void,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

// SAFETY: see GpuDeviceRef. The texture is only touched through the driver on
// the thread holding the pipeline lock.
unsafe impl Send for TextureRef {}
unsafe impl Sync for TextureRef {}

impl TextureRef {
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }
}

impl fmt::Debug for TextureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureRef")
            .field("id", &self.id)
            .field("raw", &format_args!("{:p}", self.raw))
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("format", &self.format)
            .finish()
    }
}

/// GPU-side completion signal for the work that produced a frame.
pub trait GpuFence: Send + Sync {
    /// Block until the producing work has finished.
    fn wait(&self) -> Result<(), GpuError>;
}

/// An encoded video packet output by the encoder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub timestamp: TimeCode,
    pub is_keyframe: bool,
}

impl EncodedPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
