//! D3D11 probe devices and DXGI adapter identification.

use tracing::debug;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter1, IDXGIDevice, IDXGIFactory1};

use hwenc_common::{GpuDeviceRef, GpuError, GraphicsApi};

use super::error::D3dError;
use crate::interop::{AdapterInfo, DeviceProvider, ProbeDevice};

const NVIDIA_VENDOR_ID: u32 = 0x10DE;

/// Throwaway D3D11 hardware device.
pub struct D3D11ProbeDevice {
    device: ID3D11Device,
    _context: ID3D11DeviceContext,
}

// SAFETY: the probe device is created, used and dropped by the thread
// running the capability probe; it is never shared.
unsafe impl Send for D3D11ProbeDevice {}

impl D3D11ProbeDevice {
    pub fn new() -> Result<Self, D3dError> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        // SAFETY: out-params point at live locals.
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(D3dError::call("D3D11CreateDevice"))?;

        Ok(Self {
            device: device.ok_or(D3dError::NullHandle {
                interface: "ID3D11Device",
            })?,
            _context: context.ok_or(D3dError::NullHandle {
                interface: "ID3D11DeviceContext",
            })?,
        })
    }
}

impl ProbeDevice for D3D11ProbeDevice {
    fn device(&self) -> GpuDeviceRef {
        GpuDeviceRef::new(GraphicsApi::D3D11, self.device.as_raw())
    }
}

/// [`DeviceProvider`] backed by D3D11 hardware devices and DXGI.
#[derive(Clone, Copy, Debug, Default)]
pub struct D3D11DeviceProvider;

impl DeviceProvider for D3D11DeviceProvider {
    fn create_probe_device(&self) -> Result<Box<dyn ProbeDevice>, GpuError> {
        Ok(Box::new(D3D11ProbeDevice::new()?))
    }

    fn adapter_info(&self) -> Option<AdapterInfo> {
        match query_adapter_info() {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(error = %e, "Adapter query failed");
                None
            }
        }
    }
}

/// Name and UMD driver version of the first NVIDIA adapter, falling back to
/// adapter 0.
pub fn query_adapter_info() -> Result<AdapterInfo, D3dError> {
    // SAFETY: plain factory creation with no borrowed arguments.
    let factory: IDXGIFactory1 =
        unsafe { CreateDXGIFactory1() }.map_err(D3dError::call("CreateDXGIFactory1"))?;

    let mut first: Option<IDXGIAdapter1> = None;
    let mut chosen: Option<IDXGIAdapter1> = None;
    for index in 0.. {
        // SAFETY: EnumAdapters1 returns DXGI_ERROR_NOT_FOUND past the end,
        // which terminates the loop.
        let Ok(adapter) = (unsafe { factory.EnumAdapters1(index) }) else {
            break;
        };
        // SAFETY: adapter is a live interface.
        let desc = unsafe { adapter.GetDesc1() }.map_err(D3dError::call("GetDesc1"))?;
        if desc.VendorId == NVIDIA_VENDOR_ID {
            chosen = Some(adapter);
            break;
        }
        if first.is_none() {
            first = Some(adapter);
        }
    }
    let adapter = chosen.or(first).ok_or(D3dError::NoAdapter)?;

    // SAFETY: adapter is a live interface.
    let desc = unsafe { adapter.GetDesc1() }.map_err(D3dError::call("GetDesc1"))?;
    let name_len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    let name = String::from_utf16_lossy(&desc.Description[..name_len]);

    // SAFETY: IDXGIDevice::IID is a static GUID.
    let driver_version = match unsafe { adapter.CheckInterfaceSupport(&IDXGIDevice::IID) } {
        Ok(umd) => format_driver_version(umd),
        Err(_) => String::new(),
    };

    Ok(AdapterInfo {
        name,
        driver_version,
    })
}

/// Render a packed UMD version (`a.b.c.d`, 16 bits each).
pub fn format_driver_version(umd: i64) -> String {
    let v = umd as u64;
    format!(
        "{}.{}.{}.{}",
        (v >> 48) & 0xFFFF,
        (v >> 32) & 0xFFFF,
        (v >> 16) & 0xFFFF,
        v & 0xFFFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_version_unpacks_words() {
        let packed = (32i64 << 48) | (0i64 << 32) | (15i64 << 16) | 6094;
        assert_eq!(format_driver_version(packed), "32.0.15.6094");
    }

    #[test]
    #[ignore] // Requires a D3D11 capable GPU
    fn create_probe_device() {
        let device = D3D11ProbeDevice::new().expect("D3D11 device");
        assert!(!device.device().is_null());
    }
}
