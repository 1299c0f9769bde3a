//! Cross-API interop seam.
//!
//! The encoder only speaks the older D3D11 resource model. Frames produced
//! under D3D12 are bridged through an interop device that wraps each D3D12
//! resource as a D3D11 one. This module defines that seam as traits so the
//! encoder can be driven by the real D3D11-on-12 backend on Windows and by
//! in-process fakes everywhere else.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use hwenc_common::{GpuDeviceRef, GpuError, TextureRef};

/// Owned reference to an object created by an [`InteropDevice`].
///
/// The handle carries one reference count; it must be given back through
/// [`InteropDevice::destroy`] to be released.
#[derive(PartialEq, Eq, Hash)]
pub struct InteropHandle(NonNull<c_void>);

// SAFETY: the handle is an opaque COM-style pointer with its own reference.
// It is only dereferenced by the interop device that created it, and that
// device is always used behind the encoder's per-session lock.
unsafe impl Send for InteropHandle {}

impl InteropHandle {
    /// Take ownership of a raw reference. Returns `None` for null.
    pub fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Give up ownership without releasing.
    pub fn into_raw(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for InteropHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InteropHandle({:p})", self.0)
    }
}

/// A bridging device that exposes resources of a newer API to an
/// encoder bound to an older API's device.
pub trait InteropDevice: Send {
    /// The older-API device the encoder session must be opened against.
    fn encoder_device(&self) -> GpuDeviceRef;

    /// Wrap a source texture as an older-API resource in the
    /// video-encode-read state.
    fn wrap_resource(&mut self, source: &TextureRef) -> Result<InteropHandle, GpuError>;

    /// Query the 2D texture interface of a wrapped resource.
    fn texture_view(&mut self, wrapped: &InteropHandle) -> Result<InteropHandle, GpuError>;

    /// Hand the wrapped resource to the older API for the duration of one frame.
    fn acquire(&mut self, wrapped: &InteropHandle) -> Result<(), GpuError>;

    /// Give the wrapped resource back to the newer API.
    fn release(&mut self, wrapped: &InteropHandle) -> Result<(), GpuError>;

    /// Submit pending work on the bridging context.
    fn flush(&mut self);

    /// Release a handle returned by `wrap_resource` or `texture_view`.
    fn destroy(&mut self, handle: InteropHandle);

    /// Tear down the bridging device. Idempotent.
    fn shutdown(&mut self);
}

/// Creates interop devices for a caller's source device.
pub trait InteropFactory: Send + Sync {
    fn create(&self, source: &GpuDeviceRef) -> Result<Box<dyn InteropDevice>, GpuError>;
}

/// Short-lived device used only for capability probing. Dropping it
/// releases the device.
pub trait ProbeDevice: Send {
    fn device(&self) -> GpuDeviceRef;
}

/// Display adapter identification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub driver_version: String,
}

/// Supplies throwaway devices and adapter identification to the probe.
pub trait DeviceProvider: Send + Sync {
    fn create_probe_device(&self) -> Result<Box<dyn ProbeDevice>, GpuError>;

    fn adapter_info(&self) -> Option<AdapterInfo>;
}

/// Stand-in used on platforms without a D3D backend. Every operation fails
/// with [`GpuError::Unsupported`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsupportedPlatform;

const UNSUPPORTED_REASON: &str = "Direct3D interop requires Windows";

impl InteropFactory for UnsupportedPlatform {
    fn create(&self, _source: &GpuDeviceRef) -> Result<Box<dyn InteropDevice>, GpuError> {
        Err(GpuError::Unsupported(UNSUPPORTED_REASON.into()))
    }
}

impl DeviceProvider for UnsupportedPlatform {
    fn create_probe_device(&self) -> Result<Box<dyn ProbeDevice>, GpuError> {
        Err(GpuError::Unsupported(UNSUPPORTED_REASON.into()))
    }

    fn adapter_info(&self) -> Option<AdapterInfo> {
        None
    }
}
