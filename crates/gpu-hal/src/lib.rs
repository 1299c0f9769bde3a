//! GPU interop layer for the hardware encoder.
//!
//! Defines the seams the encoder uses to reach caller devices
//! (`InteropFactory`, `InteropDevice`, `DeviceProvider`), the runtime bridge
//! selection, and the Direct3D implementation of those seams on Windows.

#[cfg(windows)]
pub mod d3d;

pub mod interop;
pub mod select;

pub use interop::{
    AdapterInfo, DeviceProvider, InteropDevice, InteropFactory, InteropHandle, ProbeDevice,
    UnsupportedPlatform,
};
pub use select::{
    default_device_provider, default_interop_factory, describe_bridge_kind, select_bridge_kind,
    BridgeKind,
};
