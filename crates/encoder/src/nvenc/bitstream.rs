//! NVENC output bitstream buffer.
//!
//! One output buffer per session, reused for every frame:
//!
//! ```text
//! 1. create(binding)        -> NvEncCreateBitstreamBuffer
//! 2. encode_picture(...)    -> output written into the buffer
//! 3. lock()                 -> NvEncLockBitstream, data pointer + size
//! 4. extract_packet()       -> copy into an EncodedPacket
//! 5. unlock()               -> NvEncUnlockBitstream
//! 6. release()              -> NvEncDestroyBitstreamBuffer
//! ```

use std::ffi::c_void;

use tracing::{debug, warn};

use hwenc_common::{EncodedPacket, TimeCode};

use super::ffi::{
    check_nvenc_status, NvEncCreateBitstreamBuffer, NvEncLockBitstream, NvEncPicType,
};
use super::session::SessionBinding;
use crate::error::BufferError;

#[derive(Copy, Clone, Debug)]
struct LockedOutput {
    data: *const u8,
    size: usize,
    picture_type: NvEncPicType,
    timestamp: u64,
}

/// A single NVENC output bitstream buffer.
///
/// Dropping the buffer unlocks and destroys it.
#[derive(Default)]
pub struct BitstreamBuffer {
    binding: Option<SessionBinding>,
    handle: Option<std::ptr::NonNull<c_void>>,
    locked: Option<LockedOutput>,
}

// SAFETY: the buffer handle and the locked data pointer are owned by the
// NVENC session in `binding`; both are only touched through this struct,
// which is driven by one thread at a time.
unsafe impl Send for BitstreamBuffer {}

impl std::fmt::Debug for BitstreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstreamBuffer")
            .field("created", &self.handle.is_some())
            .field("locked", &self.locked.is_some())
            .finish()
    }
}

impl BitstreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Raw handle to pass as `output_bitstream` in the picture params.
    pub fn handle(&self) -> Option<*mut c_void> {
        self.handle.map(std::ptr::NonNull::as_ptr)
    }

    /// Allocate the output buffer for `binding`'s session.
    ///
    /// Fails if a buffer already exists; release it first.
    pub fn create(&mut self, binding: &SessionBinding) -> Result<(), BufferError> {
        if self.handle.is_some() {
            return Err(BufferError::AlreadyCreated);
        }

        let mut params = NvEncCreateBitstreamBuffer::default();
        // SAFETY: the binding's encoder handle is open and `params` is a
        // versioned struct that outlives the call. NVENC writes the buffer
        // handle to params.bitstream_buffer.
        let status =
            unsafe { (binding.library.api.nvEncCreateBitstreamBuffer)(binding.encoder, &mut params) };
        check_nvenc_status(status, "NvEncCreateBitstreamBuffer")
            .map_err(BufferError::OutputCreationFailed)?;

        let handle = std::ptr::NonNull::new(params.bitstream_buffer).ok_or_else(|| {
            BufferError::OutputCreationFailed(
                "NvEncCreateBitstreamBuffer returned a null buffer".to_string(),
            )
        })?;

        self.handle = Some(handle);
        self.binding = Some(binding.clone());
        debug!("Created NVENC output bitstream buffer");
        Ok(())
    }

    /// Lock the buffer and return the encoded bytes.
    ///
    /// A second lock fails with `AlreadyLocked` and leaves the first lock in
    /// place.
    pub fn lock(&mut self) -> Result<&[u8], BufferError> {
        if self.locked.is_some() {
            return Err(BufferError::AlreadyLocked);
        }
        let (Some(binding), Some(handle)) = (&self.binding, self.handle) else {
            return Err(BufferError::NotCreated);
        };

        let mut params = NvEncLockBitstream {
            output_bitstream: handle.as_ptr(),
            ..NvEncLockBitstream::default()
        };
        // SAFETY: the encoder and buffer handles are valid; NVENC fills the
        // output fields of `params`. The data pointer stays valid until
        // NvEncUnlockBitstream.
        let status = unsafe { (binding.library.api.nvEncLockBitstream)(binding.encoder, &mut params) };
        check_nvenc_status(status, "NvEncLockBitstream").map_err(BufferError::LockFailed)?;

        let locked = LockedOutput {
            data: params.bitstream_buffer_ptr as *const u8,
            size: params.bitstream_size_in_bytes as usize,
            picture_type: NvEncPicType::from_raw(params.picture_type),
            timestamp: params.output_time_stamp,
        };
        self.locked = Some(locked);
        Ok(self.locked.as_ref().map_or(&[][..], locked_bytes))
    }

    /// Unlock the buffer. No-op when not locked.
    pub fn unlock(&mut self) {
        if self.locked.take().is_none() {
            return;
        }
        let (Some(binding), Some(handle)) = (&self.binding, self.handle) else {
            return;
        };
        // SAFETY: the buffer was locked by `lock` on this encoder.
        let status = unsafe { (binding.library.api.nvEncUnlockBitstream)(binding.encoder, handle.as_ptr()) };
        if let Err(reason) = check_nvenc_status(status, "NvEncUnlockBitstream") {
            warn!(%reason, "Failed to unlock NVENC bitstream buffer");
        }
    }

    /// Copy the locked payload into a packet.
    ///
    /// The keyframe flag comes from the reported picture type (IDR or I).
    pub fn extract_packet(&self) -> Result<EncodedPacket, BufferError> {
        let locked = self.locked.as_ref().ok_or(BufferError::NotLocked)?;
        Ok(EncodedPacket {
            data: locked_bytes(locked).to_vec(),
            timestamp: TimeCode::from_micros(locked.timestamp),
            is_keyframe: locked.picture_type.is_keyframe(),
        })
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn lock_scoped(&mut self) -> Result<BitstreamLock<'_>, BufferError> {
        self.lock()?;
        Ok(BitstreamLock { buffer: self })
    }

    /// Unlock and destroy the buffer.
    pub fn release(&mut self) {
        self.unlock();
        let binding = self.binding.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(binding) = binding {
            // SAFETY: the buffer was created on this encoder and is unlocked.
            let status = unsafe {
                (binding.library.api.nvEncDestroyBitstreamBuffer)(binding.encoder, handle.as_ptr())
            };
            if let Err(reason) = check_nvenc_status(status, "NvEncDestroyBitstreamBuffer") {
                warn!(%reason, "Failed to destroy NVENC output buffer");
            }
        }
        debug!("NVENC output bitstream buffer released");
    }
}

fn locked_bytes(locked: &LockedOutput) -> &[u8] {
    if locked.data.is_null() || locked.size == 0 {
        return &[];
    }
    // SAFETY: data/size were reported by NvEncLockBitstream and remain valid
    // until the buffer is unlocked, which requires `&mut` access to the
    // owning BitstreamBuffer.
    unsafe { std::slice::from_raw_parts(locked.data, locked.size) }
}

impl Drop for BitstreamBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// BitstreamLock
// ---------------------------------------------------------------------------

/// Scoped lock on a [`BitstreamBuffer`]; unlocks on drop.
pub struct BitstreamLock<'a> {
    buffer: &'a mut BitstreamBuffer,
}

impl BitstreamLock<'_> {
    /// The locked payload.
    pub fn data(&self) -> &[u8] {
        self.buffer.locked.as_ref().map_or(&[][..], locked_bytes)
    }

    pub fn is_keyframe(&self) -> bool {
        self.buffer
            .locked
            .as_ref()
            .is_some_and(|l| l.picture_type.is_keyframe())
    }

    pub fn extract_packet(&self) -> Result<EncodedPacket, BufferError> {
        self.buffer.extract_packet()
    }
}

impl Drop for BitstreamLock<'_> {
    fn drop(&mut self) {
        self.buffer.unlock();
    }
}
