//! Getting caller textures in front of the encoder.
//!
//! The strategy is picked at runtime from the caller device's API (see
//! [`hwenc_gpu_hal::select_bridge_kind`]):
//!
//! - [`DirectBridge`]: D3D11 textures are registered with NVENC as-is.
//! - [`CrossApiBridge`]: D3D12 textures are wrapped through a D3D11-on-12
//!   interop device and registered through an inner `DirectBridge`.
//! - `Unavailable`: every operation fails with `EncodeError::ResourceBridge`.

pub mod cache;
pub mod cross_api;
pub mod direct;

use std::ffi::c_void;
use std::sync::Arc;

use tracing::warn;

use hwenc_common::{EncodeError, EncodeResult, GpuDeviceRef, GraphicsApi, ResourceId, TextureRef};
use hwenc_gpu_hal::{select_bridge_kind, BridgeKind, InteropFactory};

use crate::nvenc::session::SessionBinding;

pub use cache::{WrappedEntry, WrappedResourceCache};
pub use cross_api::CrossApiBridge;
pub use direct::{DirectBridge, MappedInput};

/// Frame submission strategy for one encoder session.
#[derive(Debug)]
pub enum ResourceBridge {
    Direct(DirectBridge),
    CrossApi(CrossApiBridge),
    Unavailable(GraphicsApi),
}

impl ResourceBridge {
    /// Pick the bridge for `device`'s API.
    pub fn for_device(device: &GpuDeviceRef, interop: Arc<dyn InteropFactory>) -> Self {
        match select_bridge_kind(device.api) {
            BridgeKind::Direct => Self::Direct(DirectBridge::new()),
            BridgeKind::CrossApi => Self::CrossApi(CrossApiBridge::new(interop)),
            BridgeKind::Unavailable => Self::Unavailable(device.api),
        }
    }

    pub fn kind(&self) -> BridgeKind {
        match self {
            Self::Direct(_) => BridgeKind::Direct,
            Self::CrossApi(_) => BridgeKind::CrossApi,
            Self::Unavailable(_) => BridgeKind::Unavailable,
        }
    }

    fn unavailable(api: GraphicsApi) -> EncodeError {
        EncodeError::ResourceBridge(format!("no submission path for {api} devices"))
    }

    /// Return the device the encoder session must be opened against.
    ///
    /// Direct bridges hand back `source`; the cross-API bridge creates its
    /// interop device here.
    pub fn prepare(&mut self, source: &GpuDeviceRef) -> EncodeResult<GpuDeviceRef> {
        match self {
            Self::Direct(_) => Ok(*source),
            Self::CrossApi(bridge) => bridge.initialise(source),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    /// Bind to the session opened on the device returned by
    /// [`prepare`](Self::prepare).
    pub fn bind_session(&mut self, device: &GpuDeviceRef, binding: SessionBinding) -> EncodeResult<()> {
        match self {
            Self::Direct(bridge) => {
                bridge.initialise(*device, binding);
                Ok(())
            }
            Self::CrossApi(bridge) => bridge.bind_session(binding),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    /// Register `texture` with the encoder and return the handle that was
    /// registered (the texture itself, or its wrapped view).
    pub fn register(&mut self, texture: &TextureRef) -> EncodeResult<*mut c_void> {
        match self {
            Self::Direct(bridge) => {
                bridge.register(texture)?;
                Ok(texture.raw)
            }
            Self::CrossApi(bridge) => bridge.register(texture),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    pub fn unregister(&mut self, id: ResourceId) -> EncodeResult<()> {
        match self {
            Self::Direct(bridge) => bridge.unregister(id).map_err(EncodeError::from),
            Self::CrossApi(bridge) => bridge.unregister(id),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    /// Map `texture` as encoder input. It must have been registered.
    pub fn map(&mut self, texture: &TextureRef) -> EncodeResult<MappedInput> {
        match self {
            Self::Direct(bridge) => bridge.map(texture.id).map_err(EncodeError::from),
            Self::CrossApi(bridge) => bridge.map(texture),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    pub fn unmap(&mut self, mapped: MappedInput) -> EncodeResult<()> {
        match self {
            Self::Direct(bridge) => bridge.unmap(mapped).map_err(EncodeError::from),
            Self::CrossApi(bridge) => bridge.unmap(mapped),
            Self::Unavailable(api) => Err(Self::unavailable(*api)),
        }
    }

    /// Map `texture` and return a guard that unmaps on drop.
    pub fn map_scoped(&mut self, texture: &TextureRef) -> EncodeResult<MappedFrame<'_>> {
        let mapped = self.map(texture)?;
        Ok(MappedFrame {
            bridge: self,
            mapped: Some(mapped),
        })
    }

    pub fn shutdown(&mut self) {
        match self {
            Self::Direct(bridge) => bridge.shutdown(),
            Self::CrossApi(bridge) => bridge.shutdown(),
            Self::Unavailable(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// MappedFrame
// ---------------------------------------------------------------------------

/// A mapped input that is unmapped when dropped.
pub struct MappedFrame<'a> {
    bridge: &'a mut ResourceBridge,
    mapped: Option<MappedInput>,
}

impl MappedFrame<'_> {
    /// The mapped input. Present until the guard is dropped or unmapped.
    pub fn input(&self) -> Option<&MappedInput> {
        self.mapped.as_ref()
    }

    /// Unmap now and report the outcome instead of logging it on drop.
    pub fn unmap(mut self) -> EncodeResult<()> {
        match self.mapped.take() {
            Some(mapped) => self.bridge.unmap(mapped),
            None => Ok(()),
        }
    }
}

impl Drop for MappedFrame<'_> {
    fn drop(&mut self) {
        if let Some(mapped) = self.mapped.take() {
            let id = mapped.id;
            if let Err(e) = self.bridge.unmap(mapped) {
                warn!(%id, error = %e, "Failed to unmap input frame");
            }
        }
    }
}
