//! Runtime selection of the frame submission strategy.

use std::sync::Arc;

use hwenc_common::GraphicsApi;

use crate::interop::{DeviceProvider, InteropFactory};

/// How frames from a given device reach the encoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BridgeKind {
    /// The encoder registers the caller's textures directly.
    Direct,
    /// Textures are wrapped through an interop device first.
    CrossApi,
    /// No zero-copy path exists for this device.
    Unavailable,
}

/// Pick the bridge for a device API.
pub fn select_bridge_kind(api: GraphicsApi) -> BridgeKind {
    match api {
        GraphicsApi::D3D11 => BridgeKind::Direct,
        GraphicsApi::D3D12 => BridgeKind::CrossApi,
        GraphicsApi::Vulkan | GraphicsApi::Cuda | GraphicsApi::Unknown => BridgeKind::Unavailable,
    }
}

pub fn describe_bridge_kind(kind: BridgeKind) -> &'static str {
    match kind {
        BridgeKind::Direct => "Direct (D3D11 textures registered as-is)",
        BridgeKind::CrossApi => "Cross-API (D3D12 textures wrapped via D3D11On12)",
        BridgeKind::Unavailable => "Unavailable (no zero-copy submission path)",
    }
}

/// Interop factory for the host platform.
pub fn default_interop_factory() -> Arc<dyn InteropFactory> {
    #[cfg(windows)]
    {
        Arc::new(crate::d3d::D3D11On12Factory)
    }
    #[cfg(not(windows))]
    {
        Arc::new(crate::interop::UnsupportedPlatform)
    }
}

/// Probe-device provider for the host platform.
pub fn default_device_provider() -> Arc<dyn DeviceProvider> {
    #[cfg(windows)]
    {
        Arc::new(crate::d3d::D3D11DeviceProvider)
    }
    #[cfg(not(windows))]
    {
        Arc::new(crate::interop::UnsupportedPlatform)
    }
}
