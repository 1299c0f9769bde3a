//! NVENC encoder session lifecycle.
//!
//! [`EncoderSession`] owns the vendor encoder handle and walks it through
//! `Closed -> Open -> Initialized`. Collaborators that need the handle (the
//! resource bridge and the bitstream buffer) get a [`SessionBinding`], which
//! exposes the handle and function table but none of the lifecycle calls.

use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use hwenc_common::{EncodeError, EncodeResult, GpuDeviceRef, GraphicsApi, VideoCodec};

use super::ffi::{
    check_nvenc_status, NvEncBufferFormat, NvEncCapsParam, NvEncConfig, NvEncDeviceType,
    NvEncInitializeParams, NvEncOpenEncodeSessionExParams, NvEncPicParams, NvEncPresetConfig,
    NvEncReconfigureParams, NvEncSequenceParamPayload, NvEncodeApiFunctionList, NvGuid,
    NvencStatus, NV_ENC_CAPS_HEIGHT_MAX, NV_ENC_CAPS_NUM_MAX_BFRAMES,
    NV_ENC_CAPS_SUPPORT_10BIT_ENCODE, NV_ENC_CAPS_SUPPORT_LOOKAHEAD,
    NV_ENC_CAPS_SUPPORT_TEMPORAL_AQ, NV_ENC_CAPS_SUPPORT_YUV444_ENCODE, NV_ENC_CAPS_WIDTH_MAX,
    NV_ENC_ERR_NEED_MORE_INPUT, NV_ENC_PRESET_P4_GUID, NV_ENC_SUCCESS,
    NV_ENC_TUNING_INFO_LOW_LATENCY, NV_MAX_SEQ_HDR_LEN, RECONFIGURE_FORCE_IDR,
    RECONFIGURE_RESET_ENCODER,
};
use super::loader::{NvencLibrary, RuntimeLoader};
use super::params::{
    apply_dimensions, apply_rate_control, build_encode_config, build_init_params, codec_to_guid,
    validate_parameters, EncodeParameters, ParameterMapper,
};
use crate::caps::CodecFeatures;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of an [`EncoderSession`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
    Initialized,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Initialized => "initialized",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a successful picture submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodeStatus {
    /// Output for this picture is ready in the bitstream buffer.
    Ready,
    /// The encoder buffered the picture; no output yet.
    NeedMoreInput,
}

/// Encoder handle and function table shared with the bridge and bitstream
/// buffer.
#[derive(Clone)]
pub struct SessionBinding {
    pub encoder: *mut c_void,
    pub library: Arc<NvencLibrary>,
    pub buffer_format: NvEncBufferFormat,
}

// SAFETY: the encoder handle is an opaque token that is only passed back to
// the NVENC runtime, and every use happens under the owning pipeline's lock.
unsafe impl Send for SessionBinding {}
unsafe impl Sync for SessionBinding {}

impl std::fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinding")
            .field("encoder", &format_args!("{:p}", self.encoder))
            .field("buffer_format", &self.buffer_format)
            .finish()
    }
}

/// Map a non-success status to `EncodeError::VendorCall`.
pub(crate) fn vendor_call(status: NvencStatus, function_name: &str) -> EncodeResult<()> {
    check_nvenc_status(status, function_name).map_err(EncodeError::VendorCall)
}

fn device_type_for(api: GraphicsApi) -> EncodeResult<NvEncDeviceType> {
    match api {
        GraphicsApi::D3D11 => Ok(NvEncDeviceType::Directx),
        GraphicsApi::Cuda => Ok(NvEncDeviceType::Cuda),
        other => Err(EncodeError::Device(format!(
            "{other} devices cannot be bound to an encoder session"
        ))),
    }
}

// ---------------------------------------------------------------------------
// EncoderSession
// ---------------------------------------------------------------------------

/// One NVENC encoder session.
///
/// # Resource Management (RAII)
///
/// Dropping the session destroys the encoder handle. The init params hold a
/// raw pointer into `encode_config`, so both live in boxes with stable
/// addresses for as long as the session is initialized.
pub struct EncoderSession {
    loader: Arc<RuntimeLoader>,
    library: Option<Arc<NvencLibrary>>,
    encoder: *mut c_void,
    state: SessionState,
    params: EncodeParameters,
    encode_config: Box<NvEncConfig>,
    init_params: Box<NvEncInitializeParams>,
}

// SAFETY: the encoder handle is only used through the NVENC runtime, and the
// session is driven by one thread at a time (it is Send but not Sync).
unsafe impl Send for EncoderSession {}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("state", &self.state)
            .field("codec", &self.params.codec)
            .field("width", &self.params.width)
            .field("height", &self.params.height)
            .finish()
    }
}

impl EncoderSession {
    pub fn new(loader: Arc<RuntimeLoader>) -> Self {
        Self {
            loader,
            library: None,
            encoder: std::ptr::null_mut(),
            state: SessionState::Closed,
            params: EncodeParameters::default(),
            encode_config: Box::default(),
            init_params: Box::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Parameters of the last successful initialize/reconfigure.
    pub fn parameters(&self) -> &EncodeParameters {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Initialized
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> EncodeResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncodeError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// The codec is fixed by `open`; the codec-specific config union is laid
    /// out for it.
    fn check_codec(&self, params: &EncodeParameters) -> EncodeResult<()> {
        if params.codec == self.params.codec {
            return Ok(());
        }
        Err(EncodeError::InvalidConfig(format!(
            "session was opened for {} but parameters are for {}",
            self.params.codec.display_name(),
            params.codec.display_name()
        )))
    }

    fn library(&self, operation: &'static str) -> EncodeResult<&NvencLibrary> {
        match (&self.library, self.encoder.is_null()) {
            (Some(lib), false) => Ok(lib),
            _ => Err(EncodeError::InvalidState {
                operation,
                state: self.state.name(),
            }),
        }
    }

    /// Open a session for `codec` bound to `device`.
    ///
    /// Loads the runtime if needed, creates the API instance and opens the
    /// session. Calling this on an open session is a no-op.
    pub fn open(&mut self, codec: VideoCodec, device: &GpuDeviceRef) -> EncodeResult<()> {
        if self.state != SessionState::Closed {
            return Ok(());
        }

        if device.is_null() {
            error!(codec = codec.display_name(), "No encoder device was provided");
            return Err(EncodeError::Device(
                "no encoder device was provided".to_string(),
            ));
        }
        codec_to_guid(codec)?;
        let device_type = device_type_for(device.api)?;

        let library = self.loader.load().map_err(|e| {
            warn!(codec = codec.display_name(), error = %e, "NVENC runtime is unavailable");
            EncodeError::from(e)
        })?;

        let mut function_list = NvEncodeApiFunctionList::default();
        // SAFETY: function_list is a correctly versioned, zeroed table that
        // outlives the call.
        let status = unsafe { (library.api.nvEncodeAPICreateInstance)(&mut function_list) };
        vendor_call(status, "NvEncodeAPICreateInstance")?;

        let mut open_params = NvEncOpenEncodeSessionExParams {
            device_type,
            device: device.raw,
            ..NvEncOpenEncodeSessionExParams::default()
        };
        let mut encoder: *mut c_void = std::ptr::null_mut();

        // SAFETY: open_params is initialized and `device.raw` is a live device
        // of the declared type. NVENC writes the handle to `encoder`.
        let status =
            unsafe { (library.api.nvEncOpenEncodeSessionEx)(&mut open_params, &mut encoder) };
        vendor_call(status, "NvEncOpenEncodeSessionEx")?;
        if encoder.is_null() {
            return Err(EncodeError::VendorCall(
                "NvEncOpenEncodeSessionEx returned a null encoder".to_string(),
            ));
        }

        self.encoder = encoder;
        self.library = Some(library);
        self.params.codec = codec;
        self.state = SessionState::Open;

        info!(
            codec = codec.display_name(),
            api = %device.api,
            "NVENC session opened"
        );
        Ok(())
    }

    /// Configure the open session.
    ///
    /// Starts from the P4 preset with low-latency tuning and overlays the
    /// parameters (see [`build_encode_config`]).
    pub fn initialize(&mut self, params: &EncodeParameters) -> EncodeResult<()> {
        self.require("initialize", &[SessionState::Open])?;
        self.check_codec(params)?;
        validate_parameters(params)?;

        let lib = self.library("initialize")?;
        let codec_guid: NvGuid = codec_to_guid(params.codec)?;

        let mut preset = NvEncPresetConfig::default();
        // SAFETY: the encoder handle is open and `preset` is a versioned
        // struct that outlives the call.
        let status = unsafe {
            (lib.api.nvEncGetEncodePresetConfigEx)(
                self.encoder,
                codec_guid,
                NV_ENC_PRESET_P4_GUID,
                NV_ENC_TUNING_INFO_LOW_LATENCY,
                &mut preset,
            )
        };
        vendor_call(status, "NvEncGetEncodePresetConfigEx")?;

        let mut encode_config = Box::new(build_encode_config(&preset.preset_cfg, params));
        let mut init_params = Box::new(build_init_params(params)?);
        init_params.encode_config = &mut *encode_config;

        // SAFETY: the handle is open; init_params and the config it points to
        // are boxed and alive for the duration of the call.
        let status = unsafe { (lib.api.nvEncInitializeEncoder)(self.encoder, &mut *init_params) };
        vendor_call(status, "NvEncInitializeEncoder")?;

        self.encode_config = encode_config;
        self.init_params = init_params;
        self.params = params.clone();
        self.state = SessionState::Initialized;

        info!(
            codec = params.codec.display_name(),
            width = params.width,
            height = params.height,
            fps = params.framerate,
            "NVENC session initialised"
        );
        debug!(params = %ParameterMapper::to_debug_string(params), "NVENC parameters");
        Ok(())
    }

    /// Apply new rate control / size settings to the running session.
    ///
    /// Always forces an IDR and resets the encoder. On failure the previous
    /// configuration stays in effect.
    pub fn reconfigure(&mut self, params: &EncodeParameters) -> EncodeResult<()> {
        self.require("reconfigure", &[SessionState::Initialized])?;
        self.check_codec(params)?;
        validate_parameters(params)?;
        let lib = self.library("reconfigure")?;

        let mut new_config = Box::new(*self.encode_config);
        apply_rate_control(&mut new_config, params);

        let mut reconfigure = NvEncReconfigureParams {
            re_init_encode_params: *self.init_params,
            flags: RECONFIGURE_RESET_ENCODER | RECONFIGURE_FORCE_IDR,
            ..NvEncReconfigureParams::default()
        };
        apply_dimensions(&mut reconfigure.re_init_encode_params, params);
        reconfigure.re_init_encode_params.encode_config = &mut *new_config;

        // SAFETY: the handle is initialized; reconfigure and the boxed config
        // it points to outlive the call.
        let status = unsafe { (lib.api.nvEncReconfigureEncoder)(self.encoder, &mut reconfigure) };
        vendor_call(status, "NvEncReconfigureEncoder")?;

        self.encode_config = new_config;
        *self.init_params = reconfigure.re_init_encode_params;
        self.init_params.encode_config = &mut *self.encode_config;
        self.params = params.clone();

        info!(
            width = params.width,
            height = params.height,
            target_bitrate = params.target_bitrate,
            max_bitrate = params.max_bitrate,
            "NVENC session reconfigured"
        );
        debug!(params = %ParameterMapper::to_debug_string(params), "NVENC parameters");
        Ok(())
    }

    /// Ask the driver to drain queued work. Best effort: failures are logged.
    pub fn flush(&mut self) {
        if self.state != SessionState::Initialized {
            return;
        }
        let Ok(lib) = self.library("flush") else {
            return;
        };
        // SAFETY: the handle is initialized; a null event selects synchronous
        // flushing.
        let status = unsafe { (lib.api.nvEncFlushEncoderQueue)(self.encoder, std::ptr::null_mut()) };
        if status != NV_ENC_SUCCESS && status != NV_ENC_ERR_NEED_MORE_INPUT {
            if let Err(reason) = check_nvenc_status(status, "NvEncFlushEncoderQueue") {
                warn!(%reason, "NVENC flush failed");
            }
        }
    }

    /// Destroy the encoder handle and return to `Closed`. Idempotent.
    pub fn destroy(&mut self) {
        let was_open = self.state != SessionState::Closed;

        if !self.encoder.is_null() {
            if let Some(lib) = &self.library {
                // SAFETY: the handle came from NvEncOpenEncodeSessionEx and has
                // not been destroyed yet.
                let status = unsafe { (lib.api.nvEncDestroyEncoder)(self.encoder) };
                if let Err(reason) = check_nvenc_status(status, "NvEncDestroyEncoder") {
                    error!(%reason, "Failed to destroy NVENC encoder session");
                }
            }
        }

        self.encoder = std::ptr::null_mut();
        self.library = None;
        self.state = SessionState::Closed;
        self.params = EncodeParameters::default();
        *self.encode_config = NvEncConfig::default();
        *self.init_params = NvEncInitializeParams::default();

        if was_open {
            info!("NVENC session destroyed");
        }
    }

    /// Current SPS/PPS (and VPS for HEVC) as produced by the driver.
    pub fn sequence_params(&self) -> EncodeResult<Vec<u8>> {
        self.require("sequence_params", &[SessionState::Initialized])?;
        let lib = self.library("sequence_params")?;

        let mut buffer = vec![0u8; NV_MAX_SEQ_HDR_LEN];
        let mut written: u32 = 0;
        let mut payload = NvEncSequenceParamPayload {
            in_buffer_size: buffer.len() as u32,
            spspps_buffer: buffer.as_mut_ptr().cast(),
            out_spspps_payload_size: &mut written,
            ..NvEncSequenceParamPayload::default()
        };

        // SAFETY: the handle is initialized; `buffer` and `written` outlive
        // the call and in_buffer_size matches the buffer length.
        let status = unsafe { (lib.api.nvEncGetSequenceParams)(self.encoder, &mut payload) };
        vendor_call(status, "NvEncGetSequenceParams")?;

        if written == 0 {
            return Err(EncodeError::VendorCall(
                "NvEncGetSequenceParams returned an empty payload".to_string(),
            ));
        }
        buffer.truncate((written as usize).min(NV_MAX_SEQ_HDR_LEN));
        Ok(buffer)
    }

    /// Submit one picture. "Need more input" is reported as a status, not an
    /// error.
    pub fn encode_picture(&mut self, pic: &mut NvEncPicParams) -> EncodeResult<EncodeStatus> {
        self.require("encode_picture", &[SessionState::Initialized])?;
        let lib = self.library("encode_picture")?;

        // SAFETY: the handle is initialized. The caller keeps the mapped input
        // and the output bitstream referenced by `pic` alive for the call.
        let status = unsafe { (lib.api.nvEncEncodePicture)(self.encoder, pic) };
        match status {
            NV_ENC_SUCCESS => Ok(EncodeStatus::Ready),
            NV_ENC_ERR_NEED_MORE_INPUT => Ok(EncodeStatus::NeedMoreInput),
            other => vendor_call(other, "NvEncEncodePicture").map(|()| EncodeStatus::Ready),
        }
    }

    /// Query hardware limits and feature support for `codec`.
    ///
    /// Individual capability queries that fail read as "unsupported".
    pub fn query_codec_features(&self, codec: VideoCodec) -> EncodeResult<CodecFeatures> {
        self.require(
            "query_codec_features",
            &[SessionState::Open, SessionState::Initialized],
        )?;
        let lib = self.library("query_codec_features")?;
        let codec_guid = codec_to_guid(codec)?;

        let query = |cap: u32| -> i32 {
            let mut param = NvEncCapsParam::new(cap);
            let mut value: i32 = 0;
            // SAFETY: the handle is open; param and value outlive the call.
            let status = unsafe {
                (lib.api.nvEncGetEncodeCaps)(self.encoder, codec_guid, &mut param, &mut value)
            };
            if let Err(reason) = check_nvenc_status(status, "NvEncGetEncodeCaps") {
                debug!(cap, %reason, "Capability query failed");
                return 0;
            }
            value
        };

        Ok(CodecFeatures {
            max_width: query(NV_ENC_CAPS_WIDTH_MAX).max(0) as u32,
            max_height: query(NV_ENC_CAPS_HEIGHT_MAX).max(0) as u32,
            supports_b_frames: query(NV_ENC_CAPS_NUM_MAX_BFRAMES) > 0,
            supports_lookahead: query(NV_ENC_CAPS_SUPPORT_LOOKAHEAD) != 0,
            supports_adaptive_quantization: query(NV_ENC_CAPS_SUPPORT_TEMPORAL_AQ) != 0,
            supports_10bit: query(NV_ENC_CAPS_SUPPORT_10BIT_ENCODE) != 0,
            supports_yuv444: query(NV_ENC_CAPS_SUPPORT_YUV444_ENCODE) != 0,
        })
    }

    /// Handle and function table for collaborators, once a session is open.
    pub fn binding(&self) -> Option<SessionBinding> {
        let library = self.library.as_ref()?;
        if self.encoder.is_null() {
            return None;
        }
        Some(SessionBinding {
            encoder: self.encoder,
            library: Arc::clone(library),
            buffer_format: self.init_params.buffer_format,
        })
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
