//! Cross-API resource bridge.
//!
//! The encoder session is opened on the interop device's older-API (D3D11)
//! device. Each newer-API (D3D12) source texture is wrapped once, its 2D
//! texture view is registered with an inner [`DirectBridge`], and the
//! wrapper is acquired/released around every frame:
//!
//! ```text
//! map(texture)
//!   ensure wrapped    -> wrap_resource + texture_view + inner.register (first time only)
//!   acquire           -> interop.acquire(wrapped)
//!   inner.map         -> mapped input for the picture
//! unmap(mapped)
//!   inner.unmap
//!   release + flush   -> interop.release(wrapped), interop.flush()
//! ```
//!
//! `unregister` and `shutdown` keep the same order for a frame still in
//! flight: the encoder mapping goes first, then the wrapper is released.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, info, warn};

use hwenc_common::{EncodeError, EncodeResult, GpuDeviceRef, ResourceId, TextureRef};
use hwenc_gpu_hal::{InteropDevice, InteropFactory};

use super::cache::{WrappedEntry, WrappedResourceCache};
use super::direct::{DirectBridge, MappedInput};
use crate::nvenc::session::SessionBinding;

fn bridge_error(context: &str, err: impl std::fmt::Display) -> EncodeError {
    EncodeError::ResourceBridge(format!("{context}: {err}"))
}

/// Bridges textures of a D3D12 device into a D3D11-bound encoder session.
pub struct CrossApiBridge {
    factory: Arc<dyn InteropFactory>,
    source: Option<GpuDeviceRef>,
    interop: Option<Box<dyn InteropDevice>>,
    inner: DirectBridge,
    cache: WrappedResourceCache,
    acquired: HashSet<ResourceId>,
}

impl std::fmt::Debug for CrossApiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossApiBridge")
            .field("initialised", &self.interop.is_some())
            .field("cached", &self.cache.len())
            .field("acquired", &self.acquired.len())
            .field("inner", &self.inner)
            .finish()
    }
}

impl CrossApiBridge {
    pub fn new(factory: Arc<dyn InteropFactory>) -> Self {
        Self {
            factory,
            source: None,
            interop: None,
            inner: DirectBridge::new(),
            cache: WrappedResourceCache::new(),
            acquired: HashSet::new(),
        }
    }

    /// Create the interop device for `source` and return the device the
    /// encoder session must be opened against. Idempotent.
    pub fn initialise(&mut self, source: &GpuDeviceRef) -> EncodeResult<GpuDeviceRef> {
        if let Some(interop) = &self.interop {
            return Ok(interop.encoder_device());
        }
        if source.is_null() {
            return Err(EncodeError::Device(
                "no source device was provided".to_string(),
            ));
        }

        let interop = self.factory.create(source)?;
        let encoder_device = interop.encoder_device();
        info!(
            source = %source.api,
            encoder = %encoder_device.api,
            "Cross-API interop device created"
        );
        self.interop = Some(interop);
        self.source = Some(*source);
        Ok(encoder_device)
    }

    /// Bind the inner direct bridge to the session opened on the interop
    /// device.
    pub fn bind_session(&mut self, binding: SessionBinding) -> EncodeResult<()> {
        let interop = self.interop_ref()?;
        let device = interop.encoder_device();
        self.inner.initialise(device, binding);
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.interop.is_some()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn interop_ref(&self) -> EncodeResult<&dyn InteropDevice> {
        self.interop.as_deref().ok_or_else(|| {
            EncodeError::ResourceBridge("cross-API bridge is not initialised".to_string())
        })
    }

    fn interop_mut(&mut self) -> EncodeResult<&mut Box<dyn InteropDevice>> {
        self.interop.as_mut().ok_or_else(|| {
            EncodeError::ResourceBridge("cross-API bridge is not initialised".to_string())
        })
    }

    /// Wrap, view and register `texture` unless it is cached already.
    fn ensure_wrapped(&mut self, texture: &TextureRef) -> EncodeResult<()> {
        if self.cache.contains(texture.id) {
            return Ok(());
        }
        if !self.inner.is_bound() {
            return Err(EncodeError::ResourceBridge(
                "cross-API bridge is not bound to an encoder session".to_string(),
            ));
        }

        let interop = self.interop_mut()?;
        let wrapped = interop
            .wrap_resource(texture)
            .map_err(|e| bridge_error("failed to wrap resource", e))?;
        let view = match interop.texture_view(&wrapped) {
            Ok(view) => view,
            Err(e) => {
                interop.destroy(wrapped);
                return Err(bridge_error("failed to query wrapped texture view", e));
            }
        };

        let view_texture = TextureRef {
            raw: view.as_ptr(),
            ..*texture
        };
        if let Err(e) = self.inner.register(&view_texture) {
            let interop = self.interop_mut()?;
            interop.destroy(view);
            interop.destroy(wrapped);
            return Err(e.into());
        }

        debug!(id = %texture.id, "Wrapped resource for cross-API encode");
        self.cache.insert(WrappedEntry {
            id: texture.id,
            source: texture.raw,
            wrapped,
            view,
        });
        Ok(())
    }

    /// Ensure `texture` is wrapped and registered, and return the texture
    /// view handed to the encoder. Does not acquire.
    pub fn register(&mut self, texture: &TextureRef) -> EncodeResult<*mut c_void> {
        self.ensure_wrapped(texture)?;
        self.view_of(texture.id)
    }

    fn view_of(&self, id: ResourceId) -> EncodeResult<*mut c_void> {
        self.cache
            .get(id)
            .map(|entry| entry.view.as_ptr())
            .ok_or_else(|| EncodeError::ResourceBridge(format!("{id} is not registered")))
    }

    /// Wrap on first use, then acquire the wrapped resource for this frame.
    /// Returns the cached texture view.
    pub fn acquire_wrapped(&mut self, texture: &TextureRef) -> EncodeResult<*mut c_void> {
        self.ensure_wrapped(texture)?;
        if self.acquired.contains(&texture.id) {
            return Err(EncodeError::ResourceBridge(format!(
                "{} is already acquired",
                texture.id
            )));
        }

        let Some(entry) = self.cache.get(texture.id) else {
            return Err(EncodeError::ResourceBridge(format!(
                "{} is not registered",
                texture.id
            )));
        };
        let interop = self.interop.as_mut().ok_or_else(|| {
            EncodeError::ResourceBridge("cross-API bridge is not initialised".to_string())
        })?;
        interop
            .acquire(&entry.wrapped)
            .map_err(|e| bridge_error("failed to acquire wrapped resource", e))?;

        self.acquired.insert(texture.id);
        Ok(entry.view.as_ptr())
    }

    /// Hand the wrapped resource back to the source API and flush.
    pub fn release_wrapped(&mut self, id: ResourceId) -> EncodeResult<()> {
        if !self.acquired.remove(&id) {
            return Ok(());
        }
        let Some(entry) = self.cache.get(id) else {
            return Ok(());
        };
        let interop = self.interop.as_mut().ok_or_else(|| {
            EncodeError::ResourceBridge("cross-API bridge is not initialised".to_string())
        })?;
        let released = interop
            .release(&entry.wrapped)
            .map_err(|e| bridge_error("failed to release wrapped resource", e));
        interop.flush();
        released
    }

    /// Drop the cache entry for `id` and destroy its wrapper. A later
    /// register wraps the resource again.
    pub fn unregister(&mut self, id: ResourceId) -> EncodeResult<()> {
        if !self.cache.contains(id) {
            return Err(EncodeError::ResourceBridge(format!("{id} is not registered")));
        }
        self.end_frame(id);
        let inner_result = self.inner.unregister(id);

        if let Some(entry) = self.cache.remove(id) {
            if let Some(interop) = self.interop.as_mut() {
                interop.destroy(entry.view);
                interop.destroy(entry.wrapped);
            }
        }
        inner_result.map_err(EncodeError::from)
    }

    /// Unmap `id` from the encoder, then hand its wrapper back to the source
    /// API. NVENC must not hold a mapping while the wrapper is released.
    fn end_frame(&mut self, id: ResourceId) {
        if let Err(e) = self.inner.unmap_id(id) {
            warn!(%id, error = %e, "Failed to unmap wrapped resource");
        }
        if let Err(e) = self.release_wrapped(id) {
            warn!(%id, error = %e, "Failed to release wrapped resource");
        }
    }

    /// Ensure, acquire and map `texture`. The acquire is undone if the map
    /// fails.
    pub fn map(&mut self, texture: &TextureRef) -> EncodeResult<MappedInput> {
        self.acquire_wrapped(texture)?;
        match self.inner.map(texture.id) {
            Ok(mapped) => Ok(mapped),
            Err(e) => {
                if let Err(release) = self.release_wrapped(texture.id) {
                    warn!(id = %texture.id, error = %release, "Failed to release after map failure");
                }
                Err(e.into())
            }
        }
    }

    pub fn unmap(&mut self, mapped: MappedInput) -> EncodeResult<()> {
        let id = mapped.id;
        let unmapped = self.inner.unmap(mapped).map_err(EncodeError::from);
        let released = self.release_wrapped(id);
        unmapped.and(released)
    }

    /// Tear everything down. Idempotent.
    pub fn shutdown(&mut self) {
        let acquired: Vec<ResourceId> = self.acquired.iter().copied().collect();
        for id in acquired {
            self.end_frame(id);
        }

        let entries = self.cache.drain();
        for entry in &entries {
            if self.inner.is_registered(entry.id) {
                if let Err(e) = self.inner.unregister(entry.id) {
                    warn!(id = %entry.id, error = %e, "Failed to unregister wrapped resource");
                }
            }
        }

        self.inner.shutdown();

        // Entries only exist while the interop device does.
        if let Some(mut interop) = self.interop.take() {
            for entry in entries {
                interop.destroy(entry.view);
                interop.destroy(entry.wrapped);
            }
            interop.flush();
            interop.shutdown();
            drop(interop);
            info!("Cross-API interop device released");
        }
        self.source = None;
    }
}

impl Drop for CrossApiBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
