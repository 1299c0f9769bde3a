//! Direct resource bridge: textures of the encoder's own device are
//! registered with NVENC as-is.
//!
//! # Lifecycle per texture
//!
//! ```text
//! 1. register(texture)   -> NvEncRegisterResource (DIRECTX)
//! 2. map(id)             -> NvEncMapInputResource, mapped handle
//! 3. encode              -> mapped handle is the picture's input buffer
//! 4. unmap(mapped)       -> NvEncUnmapInputResource
//! 5. unregister(id)      -> NvEncUnregisterResource
//! ```
//!
//! Registrations persist across frames; only the mapping is per frame.

use std::collections::HashMap;
use std::ffi::c_void;

use tracing::{debug, warn};

use hwenc_common::{GpuDeviceRef, ResourceId, TextureRef};

use crate::error::BufferError;
use crate::nvenc::ffi::{
    check_nvenc_status, NvEncBufferFormat, NvEncInputResourceType, NvEncMapInputResource,
    NvEncRegisterResource, NV_ENC_INPUT_IMAGE,
};
use crate::nvenc::params::pixel_format_to_nvenc;
use crate::nvenc::session::SessionBinding;

// ---------------------------------------------------------------------------
// Registered / mapped resources
// ---------------------------------------------------------------------------

/// A texture registered with the encoder.
#[derive(Debug)]
struct Registration {
    handle: *mut c_void,
    resource: *mut c_void,
    width: u32,
    height: u32,
    format: NvEncBufferFormat,
}

/// A mapped input resource ready to be used as encoder input.
///
/// Must be handed back to the bridge's `unmap` once the encode completed.
#[derive(Debug, PartialEq, Eq)]
pub struct MappedInput {
    pub id: ResourceId,
    /// Mapped resource handle; goes into the picture's `input_buffer`.
    pub handle: *mut c_void,
    pub width: u32,
    pub height: u32,
    /// Format reported by the driver for the mapping.
    pub format: NvEncBufferFormat,
}

// SAFETY: MappedInput contains an opaque NVENC handle that is only passed
// back to the NVENC runtime.
unsafe impl Send for MappedInput {}

// ---------------------------------------------------------------------------
// DirectBridge
// ---------------------------------------------------------------------------

/// Registers and maps textures of the device the session was opened on.
#[derive(Default)]
pub struct DirectBridge {
    device: Option<GpuDeviceRef>,
    binding: Option<SessionBinding>,
    registrations: HashMap<ResourceId, Registration>,
    mapped: HashMap<ResourceId, *mut c_void>,
}

// SAFETY: all raw pointers are NVENC handles or borrowed texture pointers
// that are only passed back to the runtime, under the pipeline lock.
unsafe impl Send for DirectBridge {}

impl std::fmt::Debug for DirectBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectBridge")
            .field("bound", &self.binding.is_some())
            .field("registered", &self.registrations.len())
            .field("mapped", &self.mapped.len())
            .finish()
    }
}

impl DirectBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `device` and the session opened on it. Idempotent.
    pub fn initialise(&mut self, device: GpuDeviceRef, binding: SessionBinding) {
        if self.binding.is_some() {
            return;
        }
        debug!(api = %device.api, "Direct resource bridge bound");
        self.device = Some(device);
        self.binding = Some(binding);
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn device(&self) -> Option<GpuDeviceRef> {
        self.device
    }

    pub fn is_registered(&self, id: ResourceId) -> bool {
        self.registrations.contains_key(&id)
    }

    pub fn is_mapped(&self, id: ResourceId) -> bool {
        self.mapped.contains_key(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    fn binding(&self) -> Result<&SessionBinding, BufferError> {
        self.binding.as_ref().ok_or(BufferError::NotBound)
    }

    /// Register `texture` with the encoder. Already-registered identities
    /// are left untouched.
    pub fn register(&mut self, texture: &TextureRef) -> Result<(), BufferError> {
        if self.registrations.contains_key(&texture.id) {
            return Ok(());
        }
        if texture.is_null() {
            return Err(BufferError::RegisterFailed(format!(
                "texture {} has a null handle",
                texture.id
            )));
        }
        let binding = self.binding()?;
        let format = pixel_format_to_nvenc(texture.format);

        let mut params = NvEncRegisterResource {
            resource_type: NvEncInputResourceType::Directx,
            width: texture.width,
            height: texture.height,
            resource_to_register: texture.raw,
            buffer_format: format,
            buffer_usage: NV_ENC_INPUT_IMAGE,
            ..NvEncRegisterResource::default()
        };

        // SAFETY: the encoder handle is open and `texture.raw` is a live
        // texture of the session's device. NVENC writes the registered
        // handle to params.registered_resource.
        let status =
            unsafe { (binding.library.api.nvEncRegisterResource)(binding.encoder, &mut params) };
        check_nvenc_status(status, "NvEncRegisterResource").map_err(BufferError::RegisterFailed)?;

        if params.registered_resource.is_null() {
            return Err(BufferError::RegisterFailed(
                "NvEncRegisterResource returned a null handle".to_string(),
            ));
        }

        debug!(
            id = %texture.id,
            width = texture.width,
            height = texture.height,
            format = texture.format.short_name(),
            "Registered texture with NVENC"
        );
        self.registrations.insert(
            texture.id,
            Registration {
                handle: params.registered_resource,
                resource: texture.raw,
                width: texture.width,
                height: texture.height,
                format,
            },
        );
        Ok(())
    }

    /// Unregister `id`, unmapping it first if a mapping is outstanding.
    pub fn unregister(&mut self, id: ResourceId) -> Result<(), BufferError> {
        if !self.registrations.contains_key(&id) {
            return Err(BufferError::NotRegistered(id.to_string()));
        }
        if let Some(mapped) = self.mapped.remove(&id) {
            self.unmap_handle(id, mapped)?;
        }
        let Some(registration) = self.registrations.remove(&id) else {
            return Err(BufferError::NotRegistered(id.to_string()));
        };
        let binding = self.binding()?;

        // SAFETY: the handle came from NvEncRegisterResource on this encoder
        // and is not mapped.
        let status = unsafe {
            (binding.library.api.nvEncUnregisterResource)(binding.encoder, registration.handle)
        };
        check_nvenc_status(status, "NvEncUnregisterResource")
            .map_err(BufferError::RegisterFailed)?;

        debug!(%id, resource = ?registration.resource, "Unregistered texture");
        Ok(())
    }

    /// Map a registered resource for use as encoder input.
    pub fn map(&mut self, id: ResourceId) -> Result<MappedInput, BufferError> {
        if self.mapped.contains_key(&id) {
            return Err(BufferError::AlreadyMapped(id.to_string()));
        }
        let registration = self
            .registrations
            .get(&id)
            .ok_or_else(|| BufferError::NotRegistered(id.to_string()))?;
        let binding = self.binding()?;

        let mut params = NvEncMapInputResource {
            registered_resource: registration.handle,
            ..NvEncMapInputResource::default()
        };

        // SAFETY: the encoder is open and registered_resource is a valid
        // handle from NvEncRegisterResource. NVENC writes the mapped handle
        // and format to the output fields.
        let status =
            unsafe { (binding.library.api.nvEncMapInputResource)(binding.encoder, &mut params) };
        check_nvenc_status(status, "NvEncMapInputResource").map_err(BufferError::MapFailed)?;

        let format = match params.mapped_buffer_fmt {
            NvEncBufferFormat::Undefined => registration.format,
            other => other,
        };
        let mapped = MappedInput {
            id,
            handle: params.mapped_resource,
            width: registration.width,
            height: registration.height,
            format,
        };
        self.mapped.insert(id, mapped.handle);
        Ok(mapped)
    }

    /// Release a mapping returned by [`map`](Self::map).
    pub fn unmap(&mut self, mapped: MappedInput) -> Result<(), BufferError> {
        let Some(handle) = self.mapped.remove(&mapped.id) else {
            return Err(BufferError::UnmapFailed(format!("{} is not mapped", mapped.id)));
        };
        self.unmap_handle(mapped.id, handle)
    }

    /// Unmap `id` if it has an outstanding mapping. Returns whether one was
    /// released.
    pub fn unmap_id(&mut self, id: ResourceId) -> Result<bool, BufferError> {
        match self.mapped.remove(&id) {
            Some(handle) => self.unmap_handle(id, handle).map(|()| true),
            None => Ok(false),
        }
    }

    fn unmap_handle(&self, id: ResourceId, handle: *mut c_void) -> Result<(), BufferError> {
        let binding = self.binding()?;
        // SAFETY: the handle came from NvEncMapInputResource on this encoder.
        let status = unsafe { (binding.library.api.nvEncUnmapInputResource)(binding.encoder, handle) };
        check_nvenc_status(status, "NvEncUnmapInputResource").map_err(|reason| {
            BufferError::UnmapFailed(format!("{id}: {reason}"))
        })
    }

    /// Unmap and unregister everything, then unbind.
    pub fn shutdown(&mut self) {
        if self.binding.is_none() {
            self.registrations.clear();
            self.mapped.clear();
            self.device = None;
            return;
        }

        let mapped: Vec<(ResourceId, *mut c_void)> = self.mapped.drain().collect();
        for (id, handle) in mapped {
            if let Err(e) = self.unmap_handle(id, handle) {
                warn!(%id, error = %e, "Failed to unmap input during bridge shutdown");
            }
        }

        let ids: Vec<ResourceId> = self.registrations.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.unregister(id) {
                warn!(%id, error = %e, "Failed to unregister texture during bridge shutdown");
            }
        }

        self.binding = None;
        self.device = None;
        debug!("Direct resource bridge shut down");
    }
}

impl Drop for DirectBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
