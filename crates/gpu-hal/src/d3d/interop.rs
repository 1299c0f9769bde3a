//! D3D11-on-12 interop device.
//!
//! Wraps D3D12 resources as D3D11 resources so they can be registered with
//! an encoder bound to a D3D11 device. Each frame the wrapped resource is
//! acquired before encoding and released afterwards; the release is followed
//! by a flush of the immediate context so the D3D12 queue sees the
//! transition.

use std::ffi::c_void;

use tracing::{debug, info, warn};
use windows::core::{IUnknown, Interface};
use windows::Win32::Graphics::Direct3D::{
    D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
};
use windows::Win32::Graphics::Direct3D11on12::{
    D3D11On12CreateDevice, ID3D11On12Device, D3D11_RESOURCE_FLAGS,
};
use windows::Win32::Graphics::Direct3D12::{
    ID3D12CommandQueue, ID3D12Device, ID3D12Resource, D3D12_COMMAND_LIST_TYPE_DIRECT,
    D3D12_COMMAND_QUEUE_DESC, D3D12_RESOURCE_STATE_VIDEO_ENCODE_READ,
};

use hwenc_common::{GpuDeviceRef, GpuError, GraphicsApi, TextureRef};

use super::error::D3dError;
use crate::interop::{InteropDevice, InteropFactory, InteropHandle};

const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 2] = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];

/// Creates [`D3D11On12Interop`] devices for D3D12 source devices.
#[derive(Clone, Copy, Debug, Default)]
pub struct D3D11On12Factory;

impl InteropFactory for D3D11On12Factory {
    fn create(&self, source: &GpuDeviceRef) -> Result<Box<dyn InteropDevice>, GpuError> {
        if source.api != GraphicsApi::D3D12 {
            return Err(GpuError::InvalidDevice {
                api: source.api.to_string(),
            });
        }
        Ok(Box::new(D3D11On12Interop::new(source)?))
    }
}

/// Bridging device owning the command queue, the D3D11-on-12 device and its
/// immediate context.
///
/// Fields are `Option` so that [`shutdown`](InteropDevice::shutdown) can
/// release them in a fixed order: on12 device, context, D3D11 device, queue,
/// then the D3D12 device reference.
pub struct D3D11On12Interop {
    on12: Option<ID3D11On12Device>,
    context: Option<ID3D11DeviceContext>,
    device11: Option<ID3D11Device>,
    queue: Option<ID3D12CommandQueue>,
    device12: Option<ID3D12Device>,
}

// SAFETY: the D3D11-on-12 objects are only used by the encoder pipeline that
// owns this interop device, and every call is made while that pipeline's
// mutex is held, so there is never concurrent access from two threads.
unsafe impl Send for D3D11On12Interop {}

impl D3D11On12Interop {
    /// Create the command queue and the D3D11-on-12 device for `source`.
    pub fn new(source: &GpuDeviceRef) -> Result<Self, D3dError> {
        // SAFETY: `source.raw` is a live ID3D12Device* owned by the caller.
        // The borrowed reference is cloned (AddRef) before the borrow ends.
        let device12 = unsafe { ID3D12Device::from_raw_borrowed(&source.raw) }
            .ok_or(D3dError::NullHandle {
                interface: "ID3D12Device",
            })?
            .clone();

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        // SAFETY: device12 is a valid device and queue_desc outlives the call.
        let queue: ID3D12CommandQueue = unsafe { device12.CreateCommandQueue(&queue_desc) }
            .map_err(D3dError::call("ID3D12Device::CreateCommandQueue"))?;

        let device_unknown: IUnknown = device12
            .cast()
            .map_err(D3dError::call("ID3D12Device as IUnknown"))?;
        let queue_unknown: IUnknown = queue
            .cast()
            .map_err(D3dError::call("ID3D12CommandQueue as IUnknown"))?;

        let mut device11: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        // SAFETY: all interface arguments are valid for the duration of the
        // call and the out-params point at live locals.
        unsafe {
            D3D11On12CreateDevice(
                &device_unknown,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT.0 as u32,
                Some(&FEATURE_LEVELS),
                Some(&[Some(queue_unknown)]),
                0,
                Some(&mut device11),
                Some(&mut context),
                None,
            )
        }
        .map_err(D3dError::call("D3D11On12CreateDevice"))?;

        let device11 = device11.ok_or(D3dError::NullHandle {
            interface: "ID3D11Device",
        })?;
        let context = context.ok_or(D3dError::NullHandle {
            interface: "ID3D11DeviceContext",
        })?;
        let on12: ID3D11On12Device = device11
            .cast()
            .map_err(D3dError::call("ID3D11Device as ID3D11On12Device"))?;

        info!("D3D11On12 interop device created");

        Ok(Self {
            on12: Some(on12),
            context: Some(context),
            device11: Some(device11),
            queue: Some(queue),
            device12: Some(device12),
        })
    }

    fn on12(&self) -> Result<&ID3D11On12Device, D3dError> {
        self.on12.as_ref().ok_or(D3dError::ShutDown)
    }

    fn wrapped_resource(handle: &InteropHandle) -> Result<ID3D11Resource, D3dError> {
        let raw = handle.as_ptr();
        // SAFETY: the handle was produced by `wrap_resource` and still holds
        // its reference; the borrow is cloned before it ends.
        unsafe { ID3D11Resource::from_raw_borrowed(&raw) }
            .cloned()
            .ok_or(D3dError::NullHandle {
                interface: "ID3D11Resource",
            })
    }
}

impl InteropDevice for D3D11On12Interop {
    fn encoder_device(&self) -> GpuDeviceRef {
        let raw = self
            .device11
            .as_ref()
            .map_or(std::ptr::null_mut(), |d| d.as_raw());
        GpuDeviceRef::new(GraphicsApi::D3D11, raw)
    }

    fn wrap_resource(&mut self, source: &TextureRef) -> Result<InteropHandle, GpuError> {
        let on12 = self.on12()?;
        // SAFETY: `source.raw` is a live ID3D12Resource* owned by the caller.
        let resource12 = unsafe { ID3D12Resource::from_raw_borrowed(&source.raw) }
            .ok_or(D3dError::NullHandle {
                interface: "ID3D12Resource",
            })?;
        let resource_unknown: IUnknown = resource12
            .cast()
            .map_err(D3dError::call("ID3D12Resource as IUnknown"))?;

        let flags = D3D11_RESOURCE_FLAGS::default();
        // SAFETY: resource_unknown and flags are valid for the duration of
        // the call.
        let wrapped: ID3D11Resource = unsafe {
            on12.CreateWrappedResource(
                &resource_unknown,
                &flags,
                D3D12_RESOURCE_STATE_VIDEO_ENCODE_READ,
                D3D12_RESOURCE_STATE_VIDEO_ENCODE_READ,
            )
        }
        .map_err(D3dError::call("ID3D11On12Device::CreateWrappedResource"))?;

        debug!(resource = %source.id, "Wrapped D3D12 resource for D3D11");
        InteropHandle::from_raw(wrapped.into_raw()).ok_or_else(|| {
            D3dError::NullHandle {
                interface: "ID3D11Resource",
            }
            .into()
        })
    }

    fn texture_view(&mut self, wrapped: &InteropHandle) -> Result<InteropHandle, GpuError> {
        let resource = Self::wrapped_resource(wrapped)?;
        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(D3dError::call("ID3D11Resource as ID3D11Texture2D"))?;
        InteropHandle::from_raw(texture.into_raw()).ok_or_else(|| {
            D3dError::NullHandle {
                interface: "ID3D11Texture2D",
            }
            .into()
        })
    }

    fn acquire(&mut self, wrapped: &InteropHandle) -> Result<(), GpuError> {
        let resource = Self::wrapped_resource(wrapped)?;
        let on12 = self.on12()?;
        // SAFETY: the resource was created by this on12 device.
        unsafe { on12.AcquireWrappedResources(&[Some(resource)]) };
        Ok(())
    }

    fn release(&mut self, wrapped: &InteropHandle) -> Result<(), GpuError> {
        let resource = Self::wrapped_resource(wrapped)?;
        let on12 = self.on12()?;
        // SAFETY: the resource was created by this on12 device and is
        // currently acquired.
        unsafe { on12.ReleaseWrappedResources(&[Some(resource)]) };
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(context) = &self.context {
            // SAFETY: the immediate context is alive while `self.context` is Some.
            unsafe { context.Flush() };
        }
    }

    fn destroy(&mut self, handle: InteropHandle) {
        let raw: *mut c_void = handle.into_raw();
        // SAFETY: the handle owns exactly one reference, which from_raw takes
        // over and releases on drop.
        drop(unsafe { IUnknown::from_raw(raw) });
    }

    fn shutdown(&mut self) {
        if self.on12.is_none() && self.device12.is_none() {
            return;
        }
        self.flush();
        self.on12 = None;
        self.context = None;
        self.device11 = None;
        self.queue = None;
        self.device12 = None;
        info!("D3D11On12 interop device shut down");
    }
}

impl Drop for D3D11On12Interop {
    fn drop(&mut self) {
        if self.on12.is_some() {
            warn!("D3D11On12 interop device dropped without shutdown");
        }
        self.shutdown();
    }
}
