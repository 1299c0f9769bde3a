//! Per-frame encode sequencing.
//!
//! [`NvencPipeline`] ties the session, the resource bridge, the bitstream
//! buffer and the Annex B packager together. Everything runs under one
//! per-pipeline lock:
//!
//! ```text
//! encode(frame)
//!   fence.wait()
//!   first frame only: bridge.prepare -> session.open -> session.initialize
//!                     -> bridge.bind_session -> bitstream.create -> sequence params
//!   bridge.register -> bridge.map
//!   session.encode_picture
//!   bitstream.lock -> extract_packet -> unlock
//!   prepend codec config (per PrependPolicy)
//!   bridge.unmap
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use hwenc_common::{
    EncodeError, EncodeResult, EncodedPacket, EncoderConfig, GpuDeviceRef, GpuFence, LayerConfig,
    PrependPolicy, TextureRef, TimeCode,
};
use hwenc_gpu_hal::{BridgeKind, InteropFactory};

use crate::annexb::AnnexBPackager;
use crate::bridge::ResourceBridge;
use crate::nvenc::bitstream::BitstreamBuffer;
use crate::nvenc::ffi::{NvEncPicParams, NV_ENC_PIC_FLAG_FORCEIDR, NV_ENC_PIC_STRUCT_FRAME};
use crate::nvenc::loader::RuntimeLoader;
use crate::nvenc::params::{codec_to_guid, EncodeParameters, ParameterMapper};
use crate::nvenc::session::{EncodeStatus, EncoderSession, SessionState};

// ---------------------------------------------------------------------------
// Frame input
// ---------------------------------------------------------------------------

/// One frame to encode.
pub struct EncodeFrame<'a> {
    /// Device that produced `texture`.
    pub device: GpuDeviceRef,
    pub texture: TextureRef,
    pub timestamp: TimeCode,
    /// Request an IDR for this frame.
    pub force_keyframe: bool,
    /// Signalled when the producing GPU work has finished.
    pub fence: Option<&'a dyn GpuFence>,
}

impl<'a> EncodeFrame<'a> {
    pub fn new(device: GpuDeviceRef, texture: TextureRef, timestamp: TimeCode) -> Self {
        Self {
            device,
            texture,
            timestamp,
            force_keyframe: false,
            fence: None,
        }
    }

    pub fn with_fence(mut self, fence: &'a dyn GpuFence) -> Self {
        self.fence = Some(fence);
        self
    }

    pub fn keyframe(mut self) -> Self {
        self.force_keyframe = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters for one pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to the encoder.
    pub frames_submitted: u64,
    /// Packets returned to the caller.
    pub packets_emitted: u64,
    pub keyframes: u64,
    /// Submissions that produced no output yet.
    pub pending_submissions: u64,
    /// Payload bytes returned, codec config included.
    pub bytes_emitted: u64,
    pub reconfigurations: u64,
}

// ---------------------------------------------------------------------------
// NvencPipeline
// ---------------------------------------------------------------------------

struct PipelineInner {
    config: EncoderConfig,
    session: EncoderSession,
    bridge: Option<ResourceBridge>,
    bitstream: BitstreamBuffer,
    annexb: AnnexBPackager,
    source_device: Option<GpuDeviceRef>,
    prepend_pending: bool,
    frame_index: u32,
    stats: PipelineStats,
}

/// Encoder pipeline for one output stream.
///
/// The session opens lazily on the first frame, against the frame's device.
/// Dropping the pipeline finalizes it.
pub struct NvencPipeline {
    interop: Arc<dyn InteropFactory>,
    inner: Mutex<PipelineInner>,
}

impl std::fmt::Debug for NvencPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NvencPipeline")
            .field("codec", &inner.config.codec)
            .field("format", &inner.config.format)
            .field("state", &inner.session.state())
            .field("stats", &inner.stats)
            .finish()
    }
}

impl NvencPipeline {
    pub fn new(
        loader: Arc<RuntimeLoader>,
        interop: Arc<dyn InteropFactory>,
        config: EncoderConfig,
    ) -> EncodeResult<Self> {
        codec_to_guid(config.codec)?;

        info!(
            codec = config.codec.display_name(),
            format = config.format.short_name(),
            width = config.layer.width,
            height = config.layer.height,
            policy = ?config.prepend_policy,
            "Encoder pipeline created"
        );

        Ok(Self {
            interop,
            inner: Mutex::new(PipelineInner {
                config,
                session: EncoderSession::new(loader),
                bridge: None,
                bitstream: BitstreamBuffer::new(),
                annexb: AnnexBPackager::new(),
                source_device: None,
                prepend_pending: false,
                frame_index: 0,
                stats: PipelineStats::default(),
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    pub fn config(&self) -> EncoderConfig {
        self.inner.lock().config.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.lock().stats.clone()
    }

    /// Parameters the session is running with, once initialised.
    pub fn parameters(&self) -> Option<EncodeParameters> {
        let inner = self.inner.lock();
        inner
            .session
            .is_initialized()
            .then(|| inner.session.parameters().clone())
    }

    pub fn bridge_kind(&self) -> Option<BridgeKind> {
        self.inner.lock().bridge.as_ref().map(ResourceBridge::kind)
    }

    /// Cached codec configuration (parameter sets).
    pub fn codec_config(&self) -> Vec<u8> {
        self.inner.lock().annexb.codec_config().to_vec()
    }

    /// Encode one frame.
    ///
    /// Returns `Ok(None)` when the encoder buffered the frame without
    /// producing output.
    pub fn encode(&self, frame: &EncodeFrame<'_>) -> EncodeResult<Option<EncodedPacket>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(fence) = frame.fence {
            fence.wait()?;
        }

        let texture = &frame.texture;
        if texture.is_null() {
            return Err(EncodeError::ResourceBridge(format!(
                "texture {} has a null handle",
                texture.id
            )));
        }
        if texture.format != inner.config.format {
            return Err(EncodeError::InvalidConfig(format!(
                "texture {} is {} but the pipeline encodes {}",
                texture.id,
                texture.format.short_name(),
                inner.config.format.short_name()
            )));
        }

        if !inner.session.is_initialized() {
            if let Err(e) = inner.start(&frame.device, texture, &self.interop) {
                inner.teardown();
                return Err(e);
            }
        } else if inner.source_device.is_some_and(|d| d != frame.device) {
            return Err(EncodeError::Device(
                "frame device differs from the device the session was opened for".to_string(),
            ));
        }

        let output = inner.bitstream.handle().ok_or_else(|| {
            EncodeError::Bitstream("output bitstream buffer has not been created".to_string())
        })?;
        let bridge = inner.bridge.as_mut().ok_or_else(|| {
            EncodeError::ResourceBridge("no resource bridge is bound".to_string())
        })?;

        bridge.register(texture)?;
        let mapped = bridge.map_scoped(texture)?;
        let Some(input) = mapped.input() else {
            return Err(EncodeError::ResourceBridge(format!(
                "{} was not mapped",
                texture.id
            )));
        };

        let mut pic = NvEncPicParams {
            input_width: input.width,
            input_height: input.height,
            input_buffer: input.handle,
            output_bitstream: output,
            buffer_fmt: input.format,
            picture_struct: NV_ENC_PIC_STRUCT_FRAME,
            frame_idx: inner.frame_index,
            input_time_stamp: frame.timestamp.as_micros(),
            ..NvEncPicParams::default()
        };
        if frame.force_keyframe {
            pic.encode_pic_flags |= NV_ENC_PIC_FLAG_FORCEIDR;
        }

        let status = inner.session.encode_picture(&mut pic)?;
        inner.frame_index = inner.frame_index.wrapping_add(1);
        inner.stats.frames_submitted += 1;

        if status == EncodeStatus::NeedMoreInput {
            drop(mapped);
            inner.stats.pending_submissions += 1;
            debug!(id = %texture.id, "Encoder needs more input");
            return Ok(None);
        }

        let mut packet = {
            let lock = inner.bitstream.lock_scoped()?;
            lock.extract_packet()?
        };
        if let Err(e) = mapped.unmap() {
            warn!(id = %texture.id, error = %e, "Failed to unmap input after encode");
        }

        let prepend = inner.prepend_pending
            || (inner.config.prepend_policy == PrependPolicy::EveryKeyframe && packet.is_keyframe);
        if prepend && inner.annexb.has_codec_config() {
            packet.data = inner.annexb.prepend_to(&packet.data);
        }
        inner.prepend_pending = false;

        inner.stats.packets_emitted += 1;
        inner.stats.bytes_emitted += packet.data.len() as u64;
        if packet.is_keyframe {
            inner.stats.keyframes += 1;
        }

        debug!(
            id = %texture.id,
            size = packet.data.len(),
            keyframe = packet.is_keyframe,
            pts_us = packet.timestamp.as_micros(),
            "Encoded frame"
        );
        Ok(Some(packet))
    }

    /// Apply a new layer configuration.
    ///
    /// A running session is reconfigured in place (forcing an IDR); before
    /// the first frame the layer is simply stored. On failure the previous
    /// layer stays in effect.
    pub fn reconfigure(&self, layer: LayerConfig) -> EncodeResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.session.is_initialized() {
            inner.config.layer = layer;
            return Ok(());
        }

        let current = inner.session.parameters().clone();
        let mut params =
            ParameterMapper::from_layer_config(&layer, inner.config.codec, inner.config.format);
        if params.width == 0 || params.height == 0 {
            params.width = current.width;
            params.height = current.height;
        }

        inner.session.reconfigure(&params)?;
        inner.config.layer = layer;
        inner.refresh_codec_config();
        inner.stats.reconfigurations += 1;
        Ok(())
    }

    /// Tear the pipeline down: flush, release the bitstream buffer, shut
    /// down the bridge, destroy the session, drop the codec config.
    /// Idempotent; the next frame starts a fresh session.
    pub fn finalize(&self) {
        self.inner.lock().teardown();
    }
}

impl PipelineInner {
    fn start(
        &mut self,
        device: &GpuDeviceRef,
        texture: &TextureRef,
        interop: &Arc<dyn InteropFactory>,
    ) -> EncodeResult<()> {
        let bridge = self
            .bridge
            .get_or_insert_with(|| ResourceBridge::for_device(device, Arc::clone(interop)));
        let encoder_device = bridge.prepare(device)?;

        self.session.open(self.config.codec, &encoder_device)?;

        let mut params =
            ParameterMapper::from_layer_config(&self.config.layer, self.config.codec, self.config.format);
        if params.width == 0 || params.height == 0 {
            params.width = texture.width;
            params.height = texture.height;
        }
        self.session.initialize(&params)?;

        let binding = self.session.binding().ok_or(EncodeError::InvalidState {
            operation: "bind",
            state: self.session.state().name(),
        })?;
        bridge.bind_session(&encoder_device, binding.clone())?;
        self.bitstream.create(&binding)?;

        let kind = bridge.kind();
        self.source_device = Some(*device);
        self.frame_index = 0;
        self.refresh_codec_config();

        info!(
            bridge = ?kind,
            width = params.width,
            height = params.height,
            "Encoder pipeline started"
        );
        Ok(())
    }

    fn refresh_codec_config(&mut self) {
        match self.session.sequence_params() {
            Ok(bytes) => self.annexb.set_codec_config(&bytes),
            Err(e) => {
                warn!(error = %e, "Codec configuration unavailable");
                self.annexb.reset();
            }
        }
        self.prepend_pending = true;
    }

    fn teardown(&mut self) {
        let was_running = self.session.is_open();

        self.session.flush();
        self.bitstream.release();
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        self.session.destroy();
        self.annexb.reset();

        self.source_device = None;
        self.prepend_pending = false;

        if was_running {
            info!(
                frames = self.stats.frames_submitted,
                packets = self.stats.packets_emitted,
                "Encoder pipeline finalized"
            );
        }
    }
}

impl Drop for NvencPipeline {
    fn drop(&mut self) {
        self.inner.get_mut().teardown();
    }
}
