//! NVENC parameter builders.
//!
//! Maps the caller-facing [`LayerConfig`] from `hwenc-common` to the
//! session-level [`EncodeParameters`] snapshot, and that snapshot to NVENC
//! GUIDs, rate control settings and initialization structs. Everything here
//! is pure: the same input always produces the same output.

use hwenc_common::config::{LayerConfig, MultipassMode, RateControlMode};
use hwenc_common::{EncodeError, PixelFormat, VideoCodec};

use super::ffi::{
    NvEncBufferFormat, NvEncConfig, NvEncInitializeParams, NvEncMultiPass, NvEncRcMode, NvGuid,
    H264_IDR_PERIOD_WORD, HEVC_IDR_PERIOD_WORD, NVENC_INFINITE_GOPLENGTH,
    NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID, NV_ENC_H264_PROFILE_HIGH_GUID,
    NV_ENC_HEVC_PROFILE_MAIN_GUID, NV_ENC_MV_PRECISION_QUARTER_PEL,
    NV_ENC_PARAMS_FRAME_FIELD_MODE_FRAME, NV_ENC_PRESET_P4_GUID, NV_ENC_TUNING_INFO_LOW_LATENCY,
    RC_ENABLE_AQ, RC_ENABLE_INITIAL_RC_QP, RC_ENABLE_LOOKAHEAD, RC_ENABLE_TEMPORAL_AQ,
};

/// Frame rate assumed when the layer does not cap it.
pub const DEFAULT_FRAMERATE: u32 = 60;

/// Largest frame size accepted before the driver is asked.
pub const MAX_DIMENSION: u32 = 8192;

// ---------------------------------------------------------------------------
// EncodeParameters
// ---------------------------------------------------------------------------

/// Session-level encode parameters.
///
/// An immutable snapshot: the session replaces it wholesale on initialize and
/// reconfigure. A `gop_length` of 0 means "infinite GOP".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeParameters {
    pub codec: VideoCodec,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub target_bitrate: u32,
    pub max_bitrate: u32,
    pub min_qp: i32,
    pub max_qp: i32,
    pub rate_control: RateControlMode,
    pub multipass: MultipassMode,
    pub gop_length: u32,
    pub enable_lookahead: bool,
    pub enable_aq: bool,
}

impl Default for EncodeParameters {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            format: PixelFormat::Nv12,
            width: 0,
            height: 0,
            framerate: 0,
            target_bitrate: 0,
            max_bitrate: 0,
            min_qp: -1,
            max_qp: -1,
            rate_control: RateControlMode::Cbr,
            multipass: MultipassMode::Full,
            gop_length: 0,
            enable_lookahead: false,
            enable_aq: false,
        }
    }
}

/// Pure mapping from layer config to [`EncodeParameters`].
pub struct ParameterMapper;

impl ParameterMapper {
    /// Derive session parameters from a layer config.
    ///
    /// - framerate: `max_framerate`, or 60 when uncapped;
    /// - adaptive quantization: on unless constant-QP;
    /// - lookahead: on unless multipass is disabled;
    /// - GOP: one keyframe per second at the capped rate, infinite when uncapped.
    ///
    /// The buffer format is taken as given. It must match the textures the
    /// caller submits, so it is never guessed from the codec.
    pub fn from_layer_config(
        layer: &LayerConfig,
        codec: VideoCodec,
        format: PixelFormat,
    ) -> EncodeParameters {
        EncodeParameters {
            codec,
            format,
            width: layer.width,
            height: layer.height,
            framerate: if layer.max_framerate == 0 {
                DEFAULT_FRAMERATE
            } else {
                layer.max_framerate
            },
            target_bitrate: layer.target_bitrate,
            max_bitrate: layer.max_bitrate,
            min_qp: layer.min_qp,
            max_qp: layer.max_qp,
            rate_control: layer.rate_control,
            multipass: layer.multipass,
            gop_length: layer.max_framerate,
            enable_lookahead: layer.multipass != MultipassMode::Disabled,
            enable_aq: layer.rate_control != RateControlMode::ConstQp,
        }
    }

    /// One-line rendering used in session logs.
    pub fn to_debug_string(params: &EncodeParameters) -> String {
        format!(
            "Codec={} Format={} {}x{} {} fps Bitrate={}/{} QP=[{},{}] RC={} MP={} AQ={} LA={} GOP={}",
            params.codec.short_name(),
            params.format.short_name(),
            params.width,
            params.height,
            params.framerate,
            params.target_bitrate,
            params.max_bitrate,
            params.min_qp,
            params.max_qp,
            rate_control_to_nvenc(params.rate_control) as u32,
            multipass_to_nvenc(params.multipass) as u32,
            on_off(params.enable_aq),
            on_off(params.enable_lookahead),
            params.gop_length,
        )
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

// ---------------------------------------------------------------------------
// Enum / GUID mapping
// ---------------------------------------------------------------------------

/// Map a `VideoCodec` to the corresponding NVENC codec GUID.
///
/// Only H.264 and HEVC are mapped; AV1 is rejected.
pub fn codec_to_guid(codec: VideoCodec) -> Result<NvGuid, EncodeError> {
    match codec {
        VideoCodec::H264 => Ok(NV_ENC_CODEC_H264_GUID),
        VideoCodec::H265 => Ok(NV_ENC_CODEC_HEVC_GUID),
        VideoCodec::Av1 => Err(EncodeError::UnsupportedCodec(codec)),
    }
}

/// Fixed profile per codec: H.264 High, HEVC Main.
pub fn profile_guid(codec: VideoCodec) -> NvGuid {
    match codec {
        VideoCodec::H265 => NV_ENC_HEVC_PROFILE_MAIN_GUID,
        _ => NV_ENC_H264_PROFILE_HIGH_GUID,
    }
}

/// Map a `PixelFormat` to an NVENC buffer format.
pub fn pixel_format_to_nvenc(format: PixelFormat) -> NvEncBufferFormat {
    match format {
        PixelFormat::Nv12 => NvEncBufferFormat::Nv12,
        PixelFormat::P010 => NvEncBufferFormat::Yuv420_10bit,
        PixelFormat::Bgra8 => NvEncBufferFormat::Argb,
    }
}

pub fn rate_control_to_nvenc(mode: RateControlMode) -> NvEncRcMode {
    match mode {
        RateControlMode::ConstQp => NvEncRcMode::ConstQp,
        RateControlMode::Vbr => NvEncRcMode::Vbr,
        RateControlMode::Cbr => NvEncRcMode::Cbr,
    }
}

pub fn multipass_to_nvenc(mode: MultipassMode) -> NvEncMultiPass {
    match mode {
        MultipassMode::Disabled => NvEncMultiPass::Disabled,
        MultipassMode::Quarter => NvEncMultiPass::TwoPassQuarterResolution,
        MultipassMode::Full => NvEncMultiPass::TwoPassFullResolution,
    }
}

/// Translate the GOP sentinel: 0 becomes `NVENC_INFINITE_GOPLENGTH`.
pub fn effective_gop_length(gop_length: u32) -> u32 {
    if gop_length == 0 {
        NVENC_INFINITE_GOPLENGTH
    } else {
        gop_length
    }
}

// ---------------------------------------------------------------------------
// Config builders
// ---------------------------------------------------------------------------

/// Overlay the rate-control related fields onto `config`.
///
/// Shared by initialize and reconfigure: rate control mode, bitrates,
/// lookahead, AQ / temporal AQ, multipass, the GOP and the matching IDR
/// period.
pub fn apply_rate_control(config: &mut NvEncConfig, params: &EncodeParameters) {
    let rc = &mut config.rc_params;
    rc.rate_control_mode = rate_control_to_nvenc(params.rate_control);
    rc.average_bitrate = params.target_bitrate;
    rc.max_bitrate = params.max_bitrate;
    rc.set_flag(RC_ENABLE_LOOKAHEAD, params.enable_lookahead);
    rc.set_flag(RC_ENABLE_AQ, params.enable_aq);
    rc.set_flag(RC_ENABLE_TEMPORAL_AQ, params.enable_aq);
    rc.multi_pass = multipass_to_nvenc(params.multipass);
    config.gop_length = effective_gop_length(params.gop_length);
    set_idr_period(config, params.codec, config.gop_length);
}

/// Build the full encoder config from the driver's preset config.
///
/// On top of [`apply_rate_control`] this sets the initial QP (max bound for
/// inter P/B, min bound for intra), progressive frame mode, quarter-pel
/// motion vectors, no B-frames and the codec profile.
pub fn build_encode_config(preset: &NvEncConfig, params: &EncodeParameters) -> NvEncConfig {
    let mut config = *preset;
    apply_rate_control(&mut config, params);

    let rc = &mut config.rc_params;
    rc.set_flag(
        RC_ENABLE_INITIAL_RC_QP,
        params.max_qp >= 0 || params.min_qp >= 0,
    );
    if params.max_qp >= 0 {
        rc.const_qp.qp_inter_b = params.max_qp as u32;
        rc.const_qp.qp_inter_p = params.max_qp as u32;
    }
    if params.min_qp >= 0 {
        rc.const_qp.qp_intra = params.min_qp as u32;
    }

    config.frame_interval_p = 1;
    config.frame_field_mode = NV_ENC_PARAMS_FRAME_FIELD_MODE_FRAME;
    config.mv_precision = NV_ENC_MV_PRECISION_QUARTER_PEL;
    config.profile_guid = profile_guid(params.codec);
    config
}

fn set_idr_period(config: &mut NvEncConfig, codec: VideoCodec, period: u32) {
    let word = match codec {
        VideoCodec::H265 => HEVC_IDR_PERIOD_WORD,
        _ => H264_IDR_PERIOD_WORD,
    };
    config.encode_codec_config[word] = period;
}

/// Build NVENC initialization parameters.
///
/// `encode_config` is left null; the caller points it at a config with a
/// stable address right before the driver call.
pub fn build_init_params(params: &EncodeParameters) -> Result<NvEncInitializeParams, EncodeError> {
    let encode_guid = codec_to_guid(params.codec)?;
    let mut init = NvEncInitializeParams {
        encode_guid,
        preset_guid: NV_ENC_PRESET_P4_GUID,
        tuning_info: NV_ENC_TUNING_INFO_LOW_LATENCY,
        frame_rate_num: if params.framerate == 0 {
            DEFAULT_FRAMERATE
        } else {
            params.framerate
        },
        frame_rate_den: 1,
        enable_ptd: 1,
        enable_encode_async: 0,
        buffer_format: pixel_format_to_nvenc(params.format),
        ..NvEncInitializeParams::default()
    };
    apply_dimensions(&mut init, params);
    Ok(init)
}

/// Set encode size, display aspect ratio and max encode size.
pub fn apply_dimensions(init: &mut NvEncInitializeParams, params: &EncodeParameters) {
    init.encode_width = params.width;
    init.encode_height = params.height;
    init.dar_width = params.width;
    init.dar_height = params.height;
    init.max_encode_width = params.width;
    init.max_encode_height = params.height;
}

/// Validate parameters before anything is sent to the driver.
pub fn validate_parameters(params: &EncodeParameters) -> Result<(), EncodeError> {
    codec_to_guid(params.codec)?;

    if params.width == 0 || params.height == 0 {
        return Err(EncodeError::InvalidConfig(
            "Resolution width and height must be > 0".to_string(),
        ));
    }

    if params.width > MAX_DIMENSION || params.height > MAX_DIMENSION {
        return Err(EncodeError::InvalidConfig(format!(
            "Resolution {}x{} exceeds maximum {MAX_DIMENSION}x{MAX_DIMENSION}",
            params.width, params.height
        )));
    }

    if params.rate_control == RateControlMode::Vbr
        && params.max_bitrate != 0
        && params.target_bitrate > params.max_bitrate
    {
        return Err(EncodeError::InvalidConfig(format!(
            "VBR target bitrate ({}) exceeds max bitrate ({})",
            params.target_bitrate, params.max_bitrate
        )));
    }

    if params.min_qp > 51 || params.max_qp > 51 {
        return Err(EncodeError::InvalidConfig(format!(
            "QP bounds [{}, {}] exceed maximum of 51",
            params.min_qp, params.max_qp
        )));
    }

    if params.min_qp >= 0 && params.max_qp >= 0 && params.min_qp > params.max_qp {
        return Err(EncodeError::InvalidConfig(format!(
            "QP min {} is greater than QP max {}",
            params.min_qp, params.max_qp
        )));
    }

    Ok(())
}
