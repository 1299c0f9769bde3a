//! Raw FFI bindings for NVIDIA's NVENC (nvEncodeAPI) library.
//!
//! These bindings are resolved dynamically at runtime by the
//! [`RuntimeLoader`](super::loader::RuntimeLoader). They cover the API
//! surface needed for H.264 and HEVC encoding from D3D11 textures.
//!
//! Reference: NVIDIA Video Codec SDK 12.2 -- `nvEncodeAPI.h`.

use std::borrow::Cow;
use std::ffi::c_void;

// ---------------------------------------------------------------------------
// NVENC status codes
// ---------------------------------------------------------------------------

/// NVENC API return type.
pub type NvencStatus = i32;

/// Success return code.
pub const NV_ENC_SUCCESS: NvencStatus = 0;

/// Error: no encode capable device.
pub const NV_ENC_ERR_NO_ENCODE_DEVICE: NvencStatus = 1;

/// Error: device does not support encoding.
pub const NV_ENC_ERR_UNSUPPORTED_DEVICE: NvencStatus = 2;

/// Error: invalid pointer.
pub const NV_ENC_ERR_INVALID_PTR: NvencStatus = 6;

/// Error: invalid parameter.
pub const NV_ENC_ERR_INVALID_PARAM: NvencStatus = 8;

/// Error: API called in the wrong sequence.
pub const NV_ENC_ERR_INVALID_CALL: NvencStatus = 9;

/// Error: out of memory.
pub const NV_ENC_ERR_OUT_OF_MEMORY: NvencStatus = 10;

/// Error: encoder not initialized.
pub const NV_ENC_ERR_ENCODER_NOT_INITIALIZED: NvencStatus = 11;

/// Error: a parameter is not supported by this device.
pub const NV_ENC_ERR_UNSUPPORTED_PARAM: NvencStatus = 12;

/// Error: lock busy, retry.
pub const NV_ENC_ERR_LOCK_BUSY: NvencStatus = 13;

/// Not an error: the encoder buffered the picture and needs more input
/// before it emits output.
pub const NV_ENC_ERR_NEED_MORE_INPUT: NvencStatus = 17;

/// Error: generic failure.
pub const NV_ENC_ERR_GENERIC: NvencStatus = 20;

// ---------------------------------------------------------------------------
// NVENC API version
// ---------------------------------------------------------------------------

/// NVENC API major version we target (Video Codec SDK 12.x).
pub const NVENCAPI_MAJOR_VERSION: u32 = 12;

/// NVENC API minor version.
pub const NVENCAPI_MINOR_VERSION: u32 = 2;

/// Packed API version passed when opening a session.
pub const NVENCAPI_VERSION: u32 = NVENCAPI_MAJOR_VERSION | (NVENCAPI_MINOR_VERSION << 24);

/// `NVENCAPI_STRUCT_VERSION(ver)`: API version, struct revision in bits
/// 16..20 and the `0x7` marker in bits 28..31.
pub const fn nvenc_struct_version(struct_ver: u32) -> u32 {
    NVENCAPI_VERSION | (struct_ver << 16) | (0x7 << 28)
}

/// Struct version for the structs the SDK additionally tags with bit 31.
pub const fn nvenc_struct_version_ext(struct_ver: u32) -> u32 {
    nvenc_struct_version(struct_ver) | (1 << 31)
}

/// Sentinel GOP length meaning "no periodic keyframes".
pub const NVENC_INFINITE_GOPLENGTH: u32 = 0xFFFF_FFFF;

/// Maximum size of the SPS/PPS/VPS payload returned by `NvEncGetSequenceParams`.
pub const NV_MAX_SEQ_HDR_LEN: usize = 512 * 2;

// ---------------------------------------------------------------------------
// GUIDs
// ---------------------------------------------------------------------------

/// GUID structure matching NVENC's `GUID` type (Windows-compatible layout).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NvGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Codec GUID: H.264.
pub const NV_ENC_CODEC_H264_GUID: NvGuid = NvGuid {
    data1: 0x6BC8_2762,
    data2: 0x4E63,
    data3: 0x4CA4,
    data4: [0xAA, 0x85, 0x1E, 0x50, 0xF3, 0x21, 0xF6, 0xBF],
};

/// Codec GUID: H.265/HEVC.
pub const NV_ENC_CODEC_HEVC_GUID: NvGuid = NvGuid {
    data1: 0x790C_DC88,
    data2: 0x4522,
    data3: 0x4D7B,
    data4: [0x94, 0x25, 0xBD, 0xA9, 0x97, 0x5F, 0x76, 0x03],
};

/// Preset GUID: P4 (balanced). Every session uses this preset and varies
/// only the tuning info.
pub const NV_ENC_PRESET_P4_GUID: NvGuid = NvGuid {
    data1: 0x90A7_B826,
    data2: 0xDF06,
    data3: 0x4862,
    data4: [0xB9, 0xD2, 0xCD, 0x6D, 0x73, 0xA0, 0x86, 0x81],
};

/// Profile GUID: H.264 High.
pub const NV_ENC_H264_PROFILE_HIGH_GUID: NvGuid = NvGuid {
    data1: 0xE7CB_C309,
    data2: 0x4F7A,
    data3: 0x4B89,
    data4: [0xAF, 0x2A, 0xD5, 0x37, 0xC9, 0x2B, 0xE3, 0x10],
};

/// Profile GUID: HEVC Main.
pub const NV_ENC_HEVC_PROFILE_MAIN_GUID: NvGuid = NvGuid {
    data1: 0xB514_C39A,
    data2: 0xB55B,
    data3: 0x40FA,
    data4: [0x87, 0x8F, 0xF1, 0x25, 0x3B, 0x4D, 0xFD, 0xEC],
};

// -- Tuning info --

/// Tuning info for high quality.
pub const NV_ENC_TUNING_INFO_HIGH_QUALITY: u32 = 1;
/// Tuning info for low latency.
pub const NV_ENC_TUNING_INFO_LOW_LATENCY: u32 = 2;
/// Tuning info for ultra low latency.
pub const NV_ENC_TUNING_INFO_ULTRA_LOW_LATENCY: u32 = 3;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Input buffer format. Matches `NV_ENC_BUFFER_FORMAT`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NvEncBufferFormat {
    /// Undefined format.
    #[default]
    Undefined = 0x0000_0000,
    /// Semi-planar YUV 4:2:0, 8-bit (NV12).
    Nv12 = 0x0000_0001,
    /// Semi-planar YUV 4:2:0, 10-bit in 16-bit words (P010).
    Yuv420_10bit = 0x0001_0000,
    /// Interleaved 8-bit ARGB word order, i.e. `DXGI_FORMAT_B8G8R8A8` in memory.
    Argb = 0x0100_0000,
}

/// Picture type. Matches `NV_ENC_PIC_TYPE`.
///
/// The driver reports this as a plain `u32`; use [`NvEncPicType::from_raw`]
/// to convert.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncPicType {
    P = 0,
    B = 1,
    I = 2,
    Idr = 3,
    Bi = 4,
    Skipped = 5,
    IntraRefresh = 6,
    NonrefP = 7,
    Unknown = 0xFF,
}

impl NvEncPicType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Idr,
            4 => Self::Bi,
            5 => Self::Skipped,
            6 => Self::IntraRefresh,
            7 => Self::NonrefP,
            _ => Self::Unknown,
        }
    }

    /// IDR and I pictures start a decodable sequence.
    pub fn is_keyframe(self) -> bool {
        matches!(self, Self::Idr | Self::I)
    }
}

/// Device type for `NvEncOpenEncodeSessionEx`. Matches `NV_ENC_DEVICE_TYPE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncDeviceType {
    Directx = 0,
    Cuda = 1,
    Opengl = 2,
}

/// Resource type for registering external resources. Matches `NV_ENC_INPUT_RESOURCE_TYPE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncInputResourceType {
    /// D3D9/D3D11 texture.
    Directx = 0,
    /// CUDA device pointer.
    CudaDeviceptr = 1,
    /// CUDA array.
    CudaArray = 2,
    /// OpenGL texture.
    OpenglTex = 3,
}

/// Rate control mode. Matches `NV_ENC_PARAMS_RC_MODE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncRcMode {
    /// Constant QP.
    ConstQp = 0x0,
    /// Variable bitrate.
    Vbr = 0x1,
    /// Constant bitrate.
    Cbr = 0x2,
}

/// Multi-pass mode. Matches `NV_ENC_MULTI_PASS`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncMultiPass {
    Disabled = 0x0,
    TwoPassQuarterResolution = 0x1,
    TwoPassFullResolution = 0x2,
}

/// `NV_ENC_PARAMS_FRAME_FIELD_MODE_FRAME`.
pub const NV_ENC_PARAMS_FRAME_FIELD_MODE_FRAME: u32 = 0x01;
/// `NV_ENC_MV_PRECISION_QUARTER_PEL`.
pub const NV_ENC_MV_PRECISION_QUARTER_PEL: u32 = 0x03;
/// `NV_ENC_PIC_STRUCT_FRAME`.
pub const NV_ENC_PIC_STRUCT_FRAME: u32 = 0x01;
/// `NV_ENC_BUFFER_USAGE_INPUT_IMAGE`.
pub const NV_ENC_INPUT_IMAGE: u32 = 0x0;

// -- Per-picture flags (NvEncPicParams::encode_pic_flags) --

/// Encode the current picture as an intra picture.
pub const NV_ENC_PIC_FLAG_FORCEINTRA: u32 = 0x1;
/// Encode the current picture as an IDR picture.
pub const NV_ENC_PIC_FLAG_FORCEIDR: u32 = 0x2;
/// Write the sequence and picture headers in front of this picture.
pub const NV_ENC_PIC_FLAG_OUTPUT_SPSPPS: u32 = 0x4;
/// End of stream: drain the encoder.
pub const NV_ENC_PIC_FLAG_EOS: u32 = 0x8;

// -- Capability identifiers (NV_ENC_CAPS) --

pub const NV_ENC_CAPS_NUM_MAX_BFRAMES: u32 = 0;
pub const NV_ENC_CAPS_WIDTH_MAX: u32 = 16;
pub const NV_ENC_CAPS_HEIGHT_MAX: u32 = 17;
pub const NV_ENC_CAPS_SUPPORT_YUV444_ENCODE: u32 = 33;
pub const NV_ENC_CAPS_SUPPORT_LOOKAHEAD: u32 = 37;
pub const NV_ENC_CAPS_SUPPORT_TEMPORAL_AQ: u32 = 38;
pub const NV_ENC_CAPS_SUPPORT_10BIT_ENCODE: u32 = 39;

// ---------------------------------------------------------------------------
// Session structs
// ---------------------------------------------------------------------------

/// API function table filled by `NvEncodeAPICreateInstance`.
/// Matches the size of `NV_ENCODE_API_FUNCTION_LIST`.
#[repr(C)]
pub struct NvEncodeApiFunctionList {
    /// Struct version.
    pub version: u32,
    /// Reserved.
    pub reserved: u32,
    /// Function slots, filled by the driver.
    pub functions: [*mut c_void; 320],
}

impl Default for NvEncodeApiFunctionList {
    fn default() -> Self {
        Self {
            version: nvenc_struct_version(2),
            reserved: 0,
            functions: [std::ptr::null_mut(); 320],
        }
    }
}

/// Open encode session parameters. Matches `NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS`.
#[repr(C)]
pub struct NvEncOpenEncodeSessionExParams {
    /// Struct version (use `nvenc_struct_version`).
    pub version: u32,
    /// Device type the `device` handle belongs to.
    pub device_type: NvEncDeviceType,
    /// Device handle (`ID3D11Device*` for DirectX).
    pub device: *mut c_void,
    /// Reserved.
    pub reserved: *mut c_void,
    /// API version the client is compiled against.
    pub api_version: u32,
    /// Reserved.
    pub reserved1: [u32; 253],
    /// Reserved.
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: NvEncOpenEncodeSessionExParams is a POD struct with raw pointers
// that are only read by the NVENC API during session creation.
unsafe impl Send for NvEncOpenEncodeSessionExParams {}

impl Default for NvEncOpenEncodeSessionExParams {
    fn default() -> Self {
        // SAFETY: All-zeros is a valid default state for this POD struct
        // (device_type 0 is DirectX). Pointer fields become null.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s.api_version = NVENCAPI_VERSION;
        s
    }
}

/// Rate control QP triple. Matches `NV_ENC_QP`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NvEncQp {
    pub qp_inter_p: u32,
    pub qp_inter_b: u32,
    pub qp_intra: u32,
}

// -- NV_ENC_RC_PARAMS bitfield positions --

pub const RC_ENABLE_MIN_QP: u32 = 1 << 0;
pub const RC_ENABLE_MAX_QP: u32 = 1 << 1;
pub const RC_ENABLE_INITIAL_RC_QP: u32 = 1 << 2;
pub const RC_ENABLE_AQ: u32 = 1 << 3;
pub const RC_ENABLE_LOOKAHEAD: u32 = 1 << 5;
pub const RC_ENABLE_TEMPORAL_AQ: u32 = 1 << 8;

/// Rate control parameters. Matches `NV_ENC_RC_PARAMS`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NvEncRcParams {
    /// Struct version.
    pub version: u32,
    /// Rate control mode.
    pub rate_control_mode: NvEncRcMode,
    /// Constant QP (QP mode only).
    pub const_qp: NvEncQp,
    /// Average bitrate (bits/sec).
    pub average_bitrate: u32,
    /// Maximum bitrate (bits/sec, for VBR).
    pub max_bitrate: u32,
    /// VBV buffer size.
    pub vbv_buffer_size: u32,
    /// VBV initial delay.
    pub vbv_initial_delay: u32,
    /// `enableMinQP`, `enableMaxQP`, `enableInitialRCQP`, `enableAQ`,
    /// `enableLookahead`, `enableTemporalAQ`, ... (see `RC_ENABLE_*`).
    pub flags: u32,
    pub min_qp: NvEncQp,
    pub max_qp: NvEncQp,
    pub initial_rc_qp: NvEncQp,
    pub temporal_layer_idx_mask: u32,
    pub temporal_layer_qp: [u8; 8],
    pub target_quality: u8,
    pub target_quality_lsb: u8,
    pub lookahead_depth: u16,
    pub low_delay_key_frame_scale: u8,
    pub y_dc_qp_index_offset: i8,
    pub u_dc_qp_index_offset: i8,
    pub v_dc_qp_index_offset: i8,
    pub qp_map_mode: u32,
    pub multi_pass: NvEncMultiPass,
    pub alpha_layer_bitrate_ratio: u32,
    pub cb_qp_index_offset: i8,
    pub cr_qp_index_offset: i8,
    pub reserved2: u16,
    pub lookahead_level: u32,
    pub reserved: [u32; 3],
}

impl NvEncRcParams {
    pub fn set_flag(&mut self, flag: u32, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

impl Default for NvEncRcParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct (ConstQp and
        // Disabled are the zero discriminants).
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Encoder configuration. Matches `NV_ENC_CONFIG`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NvEncConfig {
    /// Struct version.
    pub version: u32,
    /// Profile GUID.
    pub profile_guid: NvGuid,
    /// GOP length (frames between keyframes, `NVENC_INFINITE_GOPLENGTH` = never).
    pub gop_length: u32,
    /// Distance between anchor frames; 1 means no B-frames.
    pub frame_interval_p: i32,
    pub mono_chrome_encoding: u32,
    pub frame_field_mode: u32,
    pub mv_precision: u32,
    /// Rate control parameters.
    pub rc_params: NvEncRcParams,
    /// Codec-specific config (`NV_ENC_CODEC_CONFIG` union, raw words).
    pub encode_codec_config: [u32; 320],
    /// Reserved.
    pub reserved: [u32; 278],
    /// Reserved.
    pub reserved2: [*mut c_void; 64],
}

/// Word index of `idrPeriod` inside `NV_ENC_CONFIG_H264`.
pub const H264_IDR_PERIOD_WORD: usize = 2;
/// Word index of `idrPeriod` inside `NV_ENC_CONFIG_HEVC`.
pub const HEVC_IDR_PERIOD_WORD: usize = 5;

// SAFETY: NvEncConfig is a POD struct; its reserved pointers are always null.
unsafe impl Send for NvEncConfig {}

impl Default for NvEncConfig {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(9);
        s.rc_params.version = nvenc_struct_version(1);
        s
    }
}

/// Preset config query. Matches `NV_ENC_PRESET_CONFIG`.
#[repr(C)]
pub struct NvEncPresetConfig {
    /// Struct version.
    pub version: u32,
    /// Reserved.
    pub reserved: u32,
    /// [out] Preset config.
    pub preset_cfg: NvEncConfig,
    /// Reserved.
    pub reserved1: [u32; 256],
    /// Reserved.
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: NvEncPresetConfig is a POD struct.
unsafe impl Send for NvEncPresetConfig {}

impl Default for NvEncPresetConfig {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(5);
        s.preset_cfg = NvEncConfig::default();
        s
    }
}

/// Encode initialization parameters. Matches `NV_ENC_INITIALIZE_PARAMS`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NvEncInitializeParams {
    /// Struct version.
    pub version: u32,
    /// Codec GUID (H264 or HEVC).
    pub encode_guid: NvGuid,
    /// Preset GUID.
    pub preset_guid: NvGuid,
    pub encode_width: u32,
    pub encode_height: u32,
    /// Display aspect ratio X.
    pub dar_width: u32,
    /// Display aspect ratio Y.
    pub dar_height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    /// Asynchronous mode; always 0 here.
    pub enable_encode_async: u32,
    /// Let the encoder decide picture types.
    pub enable_ptd: u32,
    /// `reportSliceOffsets`, `enableSubFrameWrite`, ... bitfield.
    pub flags: u32,
    pub priv_data_size: u32,
    pub reserved: u32,
    pub priv_data: *mut c_void,
    /// Codec configuration; must stay valid for the duration of the call.
    pub encode_config: *mut NvEncConfig,
    /// Maximum width for dynamic resolution change.
    pub max_encode_width: u32,
    /// Maximum height for dynamic resolution change.
    pub max_encode_height: u32,
    /// `NVENC_EXTERNAL_ME_HINT_COUNTS_PER_BLOCKTYPE[2]`.
    pub max_me_hint_counts_per_block: [u32; 8],
    pub tuning_info: u32,
    pub buffer_format: NvEncBufferFormat,
    pub num_state_buffers: u32,
    pub output_stats_level: u32,
    /// Reserved.
    pub reserved1: [u32; 284],
    /// Reserved.
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: NvEncInitializeParams is a POD struct. The encode_config pointer
// is only dereferenced during NvEncInitializeEncoder / NvEncReconfigureEncoder.
unsafe impl Send for NvEncInitializeParams {}

impl Default for NvEncInitializeParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(7);
        s.enable_ptd = 1; // Let NVENC decide picture types
        s
    }
}

// -- NV_ENC_RECONFIGURE_PARAMS bitfield positions --

pub const RECONFIGURE_RESET_ENCODER: u32 = 1 << 0;
pub const RECONFIGURE_FORCE_IDR: u32 = 1 << 1;

/// Reconfiguration parameters. Matches `NV_ENC_RECONFIGURE_PARAMS`.
#[repr(C)]
pub struct NvEncReconfigureParams {
    /// Struct version.
    pub version: u32,
    /// Reserved.
    pub reserved: u32,
    /// Full replacement init params.
    pub re_init_encode_params: NvEncInitializeParams,
    /// `resetEncoder` / `forceIDR` bitfield (see `RECONFIGURE_*`).
    pub flags: u32,
    /// Reserved.
    pub reserved2: u32,
}

// SAFETY: see NvEncInitializeParams.
unsafe impl Send for NvEncReconfigureParams {}

impl Default for NvEncReconfigureParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(2);
        s.re_init_encode_params = NvEncInitializeParams::default();
        s
    }
}

/// Capability query. Matches `NV_ENC_CAPS_PARAM`.
#[repr(C)]
pub struct NvEncCapsParam {
    pub version: u32,
    /// One of the `NV_ENC_CAPS_*` identifiers.
    pub caps_to_query: u32,
    pub reserved: [u32; 62],
}

impl NvEncCapsParam {
    pub fn new(caps_to_query: u32) -> Self {
        Self {
            version: nvenc_struct_version(1),
            caps_to_query,
            reserved: [0; 62],
        }
    }
}

/// Sequence header query. Matches `NV_ENC_SEQUENCE_PARAM_PAYLOAD`.
#[repr(C)]
pub struct NvEncSequenceParamPayload {
    pub version: u32,
    /// Size of `spspps_buffer` in bytes.
    pub in_buffer_size: u32,
    pub sps_id: u32,
    pub pps_id: u32,
    /// Caller-owned output buffer.
    pub spspps_buffer: *mut c_void,
    /// [out] Number of bytes written to `spspps_buffer`.
    pub out_spspps_payload_size: *mut u32,
    pub reserved: [u32; 250],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncSequenceParamPayload {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

// ---------------------------------------------------------------------------
// Per-frame encode params
// ---------------------------------------------------------------------------

/// Picture encode parameters. Matches `NV_ENC_PIC_PARAMS`.
#[repr(C)]
pub struct NvEncPicParams {
    /// Struct version.
    pub version: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub input_pitch: u32,
    /// `NV_ENC_PIC_FLAG_*` bits.
    pub encode_pic_flags: u32,
    pub frame_idx: u32,
    /// Input timestamp, passed through to the output untouched.
    pub input_time_stamp: u64,
    pub input_duration: u64,
    /// Mapped input handle.
    pub input_buffer: *mut c_void,
    /// Output bitstream buffer handle.
    pub output_bitstream: *mut c_void,
    /// Completion event (async mode).
    pub completion_event: *mut c_void,
    pub buffer_fmt: NvEncBufferFormat,
    /// Picture struct (frame / field).
    pub picture_struct: u32,
    /// Picture type; only honoured when PTD is disabled.
    pub picture_type: u32,
    /// Codec-specific per-picture params (`NV_ENC_CODEC_PIC_PARAMS` union).
    pub codec_pic_params: [u32; 256],
    pub me_hint_counts_per_block: [u32; 8],
    pub me_external_hints: *mut c_void,
    pub reserved2: [u32; 7],
    pub reserved5: [*mut c_void; 2],
    pub qp_delta_map: *mut i8,
    pub qp_delta_map_size: u32,
    pub reserved_bit_fields: u32,
    pub me_hint_ref_pic_dist: [u16; 2],
    pub reserved4: u32,
    pub alpha_buffer: *mut c_void,
    pub me_external_sb_hints: *mut c_void,
    pub me_sb_hints_count: u32,
    pub state_buffer_idx: u32,
    pub output_recon_buffer: *mut c_void,
    pub reserved3: [u32; 284],
    pub reserved6: [*mut c_void; 57],
}

// SAFETY: NvEncPicParams is a POD struct with raw pointers that are only
// valid during NvEncEncodePicture. Callers keep the backing resources
// mapped for the duration of the call.
unsafe impl Send for NvEncPicParams {}

impl Default for NvEncPicParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(7);
        s
    }
}

// ---------------------------------------------------------------------------
// Bitstream buffers
// ---------------------------------------------------------------------------

/// Create bitstream buffer params. Matches `NV_ENC_CREATE_BITSTREAM_BUFFER`.
#[repr(C)]
pub struct NvEncCreateBitstreamBuffer {
    /// Struct version.
    pub version: u32,
    /// Deprecated size hint.
    pub size: u32,
    /// Deprecated memory heap.
    pub memory_heap: u32,
    /// Reserved.
    pub reserved: u32,
    /// [out] Bitstream buffer handle.
    pub bitstream_buffer: *mut c_void,
    /// Reserved.
    pub bitstream_buffer_ptr: *mut c_void,
    /// Reserved.
    pub reserved1: [u32; 58],
    /// Reserved.
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: NvEncCreateBitstreamBuffer is a POD struct.
unsafe impl Send for NvEncCreateBitstreamBuffer {}

impl Default for NvEncCreateBitstreamBuffer {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Lock bitstream parameters. Matches `NV_ENC_LOCK_BITSTREAM`.
#[repr(C)]
pub struct NvEncLockBitstream {
    /// Struct version.
    pub version: u32,
    /// `doNotWait`, `ltrFrame`, `getRCStats` bitfield.
    pub flags: u32,
    /// Output bitstream buffer handle to lock.
    pub output_bitstream: *mut c_void,
    /// [out] Slice offsets array.
    pub slice_offsets: *mut u32,
    /// [out] Frame index.
    pub frame_idx: u32,
    /// [out] HW encode status.
    pub hw_encode_status: u32,
    /// [out] Number of slices.
    pub num_slices: u32,
    /// [out] Bitstream size in bytes.
    pub bitstream_size_in_bytes: u32,
    /// [out] Output timestamp.
    pub output_time_stamp: u64,
    /// [out] Output duration.
    pub output_duration: u64,
    /// [out] Pointer to bitstream data.
    pub bitstream_buffer_ptr: *mut c_void,
    /// [out] Picture type (`NV_ENC_PIC_TYPE`).
    pub picture_type: u32,
    /// [out] Picture struct.
    pub picture_struct: u32,
    pub frame_avg_qp: u32,
    pub frame_satd: u32,
    pub ltr_frame_idx: u32,
    pub ltr_frame_bitmap: u32,
    pub temporal_id: u32,
    pub intra_mb_count: u32,
    pub inter_mb_count: u32,
    pub average_mvx: i32,
    pub average_mvy: i32,
    pub alpha_layer_size_in_bytes: u32,
    pub output_stats_ptr_size: u32,
    pub reserved: u32,
    pub output_stats_ptr: *mut c_void,
    pub frame_idx_display: u32,
    pub reserved1: [u32; 219],
    pub reserved2: [*mut c_void; 63],
    pub reserved_internal: [u32; 8],
}

// SAFETY: NvEncLockBitstream is a POD struct.
unsafe impl Send for NvEncLockBitstream {}

impl Default for NvEncLockBitstream {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version_ext(2);
        s
    }
}

// ---------------------------------------------------------------------------
// Input buffers (encoder-owned surfaces)
// ---------------------------------------------------------------------------

/// Create input buffer params. Matches `NV_ENC_CREATE_INPUT_BUFFER`.
#[repr(C)]
pub struct NvEncCreateInputBuffer {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub memory_heap: u32,
    pub buffer_fmt: NvEncBufferFormat,
    pub reserved: u32,
    /// [out] Input buffer handle.
    pub input_buffer: *mut c_void,
    pub system_memory_buffer: *mut c_void,
    pub reserved1: [u32; 57],
    pub reserved2: [*mut c_void; 63],
}

/// Lock input buffer params. Matches `NV_ENC_LOCK_INPUT_BUFFER`.
#[repr(C)]
pub struct NvEncLockInputBuffer {
    pub version: u32,
    pub flags: u32,
    pub input_buffer: *mut c_void,
    /// [out] CPU pointer to the surface.
    pub buffer_data_ptr: *mut c_void,
    /// [out] Row pitch in bytes.
    pub pitch: u32,
    pub reserved1: [u32; 251],
    pub reserved2: [*mut c_void; 64],
}

// ---------------------------------------------------------------------------
// External resources
// ---------------------------------------------------------------------------

/// Register external resource. Matches `NV_ENC_REGISTER_RESOURCE`.
#[repr(C)]
pub struct NvEncRegisterResource {
    /// Struct version.
    pub version: u32,
    /// Resource type.
    pub resource_type: NvEncInputResourceType,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    /// Sub-resource index (DX only).
    pub sub_resource_index: u32,
    /// Pointer to the external resource.
    pub resource_to_register: *mut c_void,
    /// [out] Registered resource handle.
    pub registered_resource: *mut c_void,
    pub buffer_format: NvEncBufferFormat,
    /// Buffer usage: `NV_ENC_INPUT_IMAGE`.
    pub buffer_usage: u32,
    pub input_fence_point: *mut c_void,
    pub chroma_offset: [u32; 2],
    pub reserved1: [u32; 245],
    pub reserved2: [*mut c_void; 61],
}

// SAFETY: NvEncRegisterResource is a POD struct.
unsafe impl Send for NvEncRegisterResource {}

impl Default for NvEncRegisterResource {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(5);
        s
    }
}

/// Map input resource. Matches `NV_ENC_MAP_INPUT_RESOURCE`.
#[repr(C)]
pub struct NvEncMapInputResource {
    /// Struct version.
    pub version: u32,
    /// Sub-resource index.
    pub sub_resource_index: u32,
    /// Input resource (reserved).
    pub input_resource: *mut c_void,
    /// Registered resource handle.
    pub registered_resource: *mut c_void,
    /// [out] Mapped resource handle (used as input_buffer in PicParams).
    pub mapped_resource: *mut c_void,
    /// [out] Mapped buffer format.
    pub mapped_buffer_fmt: NvEncBufferFormat,
    /// Reserved.
    pub reserved1: [u32; 251],
    /// Reserved.
    pub reserved2: [*mut c_void; 63],
}

// SAFETY: NvEncMapInputResource is a POD struct.
unsafe impl Send for NvEncMapInputResource {}

impl Default for NvEncMapInputResource {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(4);
        s
    }
}

// ---------------------------------------------------------------------------
// Function pointer table
// ---------------------------------------------------------------------------

/// Names of the required runtime exports, in table order.
pub const NVENC_EXPORTS: [&str; 24] = [
    "NvEncodeAPICreateInstance",
    "NvEncOpenEncodeSessionEx",
    "NvEncInitializeEncoder",
    "NvEncReconfigureEncoder",
    "NvEncEncodePicture",
    "NvEncDestroyEncoder",
    "NvEncFlushEncoderQueue",
    "NvEncGetEncodeCaps",
    "NvEncGetEncodePresetGUIDs",
    "NvEncGetEncodeProfileGUIDs",
    "NvEncGetEncodePresetConfigEx",
    "NvEncCreateInputBuffer",
    "NvEncDestroyInputBuffer",
    "NvEncCreateBitstreamBuffer",
    "NvEncDestroyBitstreamBuffer",
    "NvEncRegisterResource",
    "NvEncUnregisterResource",
    "NvEncMapInputResource",
    "NvEncUnmapInputResource",
    "NvEncLockInputBuffer",
    "NvEncUnlockInputBuffer",
    "NvEncLockBitstream",
    "NvEncUnlockBitstream",
    "NvEncGetSequenceParams",
];

/// Number of entries in [`NVENC_EXPORTS`].
pub const NVENC_EXPORT_COUNT: usize = NVENC_EXPORTS.len();

/// NVENC API function pointer table.
///
/// Field order follows [`NVENC_EXPORTS`]; signatures match `nvEncodeAPI.h`.
#[allow(non_snake_case)]
#[derive(Clone, Copy)]
pub struct NvencFunctionList {
    pub nvEncodeAPICreateInstance:
        unsafe extern "C" fn(function_list: *mut NvEncodeApiFunctionList) -> NvencStatus,

    pub nvEncOpenEncodeSessionEx: unsafe extern "C" fn(
        params: *mut NvEncOpenEncodeSessionExParams,
        encoder: *mut *mut c_void,
    ) -> NvencStatus,

    pub nvEncInitializeEncoder:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncInitializeParams) -> NvencStatus,

    pub nvEncReconfigureEncoder: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncReconfigureParams,
    ) -> NvencStatus,

    pub nvEncEncodePicture:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncPicParams) -> NvencStatus,

    pub nvEncDestroyEncoder: unsafe extern "C" fn(encoder: *mut c_void) -> NvencStatus,

    pub nvEncFlushEncoderQueue:
        unsafe extern "C" fn(encoder: *mut c_void, event: *mut c_void) -> NvencStatus,

    pub nvEncGetEncodeCaps: unsafe extern "C" fn(
        encoder: *mut c_void,
        encode_guid: NvGuid,
        caps_param: *mut NvEncCapsParam,
        caps_val: *mut i32,
    ) -> NvencStatus,

    pub nvEncGetEncodePresetGUIDs: unsafe extern "C" fn(
        encoder: *mut c_void,
        encode_guid: NvGuid,
        preset_guids: *mut NvGuid,
        guid_array_size: u32,
        preset_guid_count: *mut u32,
    ) -> NvencStatus,

    pub nvEncGetEncodeProfileGUIDs: unsafe extern "C" fn(
        encoder: *mut c_void,
        encode_guid: NvGuid,
        profile_guids: *mut NvGuid,
        guid_array_size: u32,
        profile_guid_count: *mut u32,
    ) -> NvencStatus,

    pub nvEncGetEncodePresetConfigEx: unsafe extern "C" fn(
        encoder: *mut c_void,
        encode_guid: NvGuid,
        preset_guid: NvGuid,
        tuning_info: u32,
        preset_config: *mut NvEncPresetConfig,
    ) -> NvencStatus,

    pub nvEncCreateInputBuffer: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncCreateInputBuffer,
    ) -> NvencStatus,

    pub nvEncDestroyInputBuffer:
        unsafe extern "C" fn(encoder: *mut c_void, input_buffer: *mut c_void) -> NvencStatus,

    pub nvEncCreateBitstreamBuffer: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncCreateBitstreamBuffer,
    ) -> NvencStatus,

    pub nvEncDestroyBitstreamBuffer:
        unsafe extern "C" fn(encoder: *mut c_void, bitstream_buffer: *mut c_void) -> NvencStatus,

    pub nvEncRegisterResource: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncRegisterResource,
    ) -> NvencStatus,

    pub nvEncUnregisterResource:
        unsafe extern "C" fn(encoder: *mut c_void, registered_resource: *mut c_void) -> NvencStatus,

    pub nvEncMapInputResource: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncMapInputResource,
    ) -> NvencStatus,

    pub nvEncUnmapInputResource:
        unsafe extern "C" fn(encoder: *mut c_void, mapped_resource: *mut c_void) -> NvencStatus,

    pub nvEncLockInputBuffer: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncLockInputBuffer,
    ) -> NvencStatus,

    pub nvEncUnlockInputBuffer:
        unsafe extern "C" fn(encoder: *mut c_void, input_buffer: *mut c_void) -> NvencStatus,

    pub nvEncLockBitstream:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncLockBitstream) -> NvencStatus,

    pub nvEncUnlockBitstream:
        unsafe extern "C" fn(encoder: *mut c_void, output_bitstream: *mut c_void) -> NvencStatus,

    pub nvEncGetSequenceParams: unsafe extern "C" fn(
        encoder: *mut c_void,
        payload: *mut NvEncSequenceParamPayload,
    ) -> NvencStatus,
}

// SAFETY: NvencFunctionList holds plain function pointers into the NVENC
// runtime. The module they point into is kept mapped by the owning
// NvencLibrary, and the driver entry points are thread-safe.
unsafe impl Send for NvencFunctionList {}
unsafe impl Sync for NvencFunctionList {}

impl std::fmt::Debug for NvencFunctionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvencFunctionList")
            .field("exports", &NVENC_EXPORT_COUNT)
            .finish()
    }
}

/// Reinterpret a resolved export address as a typed function pointer.
///
/// # Safety
///
/// `ptr` must be the address of a function whose ABI matches `F`.
unsafe fn cast_export<F: Copy>(ptr: *const c_void) -> F {
    debug_assert_eq!(
        std::mem::size_of::<F>(),
        std::mem::size_of::<*const c_void>()
    );
    // SAFETY: F is a function pointer type of pointer size; the caller
    // guarantees the signature matches.
    unsafe { std::mem::transmute_copy(&ptr) }
}

impl NvencFunctionList {
    /// Build the table from resolved export addresses.
    ///
    /// # Safety
    ///
    /// Every entry of `exports` must be the non-null address of the export
    /// named at the same index of [`NVENC_EXPORTS`], with the signature
    /// declared in `nvEncodeAPI.h`.
    pub unsafe fn from_exports(exports: &[*const c_void; NVENC_EXPORT_COUNT]) -> Self {
        // SAFETY: forwarded from the caller's contract, index by index.
        unsafe {
            Self {
                nvEncodeAPICreateInstance: cast_export(exports[0]),
                nvEncOpenEncodeSessionEx: cast_export(exports[1]),
                nvEncInitializeEncoder: cast_export(exports[2]),
                nvEncReconfigureEncoder: cast_export(exports[3]),
                nvEncEncodePicture: cast_export(exports[4]),
                nvEncDestroyEncoder: cast_export(exports[5]),
                nvEncFlushEncoderQueue: cast_export(exports[6]),
                nvEncGetEncodeCaps: cast_export(exports[7]),
                nvEncGetEncodePresetGUIDs: cast_export(exports[8]),
                nvEncGetEncodeProfileGUIDs: cast_export(exports[9]),
                nvEncGetEncodePresetConfigEx: cast_export(exports[10]),
                nvEncCreateInputBuffer: cast_export(exports[11]),
                nvEncDestroyInputBuffer: cast_export(exports[12]),
                nvEncCreateBitstreamBuffer: cast_export(exports[13]),
                nvEncDestroyBitstreamBuffer: cast_export(exports[14]),
                nvEncRegisterResource: cast_export(exports[15]),
                nvEncUnregisterResource: cast_export(exports[16]),
                nvEncMapInputResource: cast_export(exports[17]),
                nvEncUnmapInputResource: cast_export(exports[18]),
                nvEncLockInputBuffer: cast_export(exports[19]),
                nvEncUnlockInputBuffer: cast_export(exports[20]),
                nvEncLockBitstream: cast_export(exports[21]),
                nvEncUnlockBitstream: cast_export(exports[22]),
                nvEncGetSequenceParams: cast_export(exports[23]),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helper: Check NvencStatus and convert to Result
// ---------------------------------------------------------------------------

/// Convert an `NvencStatus` to a Result, mapping non-zero values to an error string.
pub fn check_nvenc_status(status: NvencStatus, function_name: &str) -> Result<(), String> {
    if status == NV_ENC_SUCCESS {
        Ok(())
    } else {
        Err(format!(
            "{function_name} failed with NVENC status code {status} ({})",
            nvenc_status_name(status)
        ))
    }
}

/// Get a human-readable name for an NVENC status code.
pub fn nvenc_status_name(status: NvencStatus) -> Cow<'static, str> {
    let name = match status {
        0 => "NV_ENC_SUCCESS",
        1 => "NV_ENC_ERR_NO_ENCODE_DEVICE",
        2 => "NV_ENC_ERR_UNSUPPORTED_DEVICE",
        3 => "NV_ENC_ERR_INVALID_ENCODERDEVICE",
        4 => "NV_ENC_ERR_INVALID_DEVICE",
        5 => "NV_ENC_ERR_DEVICE_NOT_EXIST",
        6 => "NV_ENC_ERR_INVALID_PTR",
        7 => "NV_ENC_ERR_INVALID_EVENT",
        8 => "NV_ENC_ERR_INVALID_PARAM",
        9 => "NV_ENC_ERR_INVALID_CALL",
        10 => "NV_ENC_ERR_OUT_OF_MEMORY",
        11 => "NV_ENC_ERR_ENCODER_NOT_INITIALIZED",
        12 => "NV_ENC_ERR_UNSUPPORTED_PARAM",
        13 => "NV_ENC_ERR_LOCK_BUSY",
        14 => "NV_ENC_ERR_NOT_ENOUGH_BUFFER",
        15 => "NV_ENC_ERR_INVALID_VERSION",
        16 => "NV_ENC_ERR_MAP_FAILED",
        17 => "NV_ENC_ERR_NEED_MORE_INPUT",
        18 => "NV_ENC_ERR_ENCODER_BUSY",
        19 => "NV_ENC_ERR_EVENT_NOT_REGISTERD",
        20 => "NV_ENC_ERR_GENERIC",
        21 => "NV_ENC_ERR_INCOMPATIBLE_CLIENT_KEY",
        22 => "NV_ENC_ERR_UNIMPLEMENTED",
        23 => "NV_ENC_ERR_RESOURCE_REGISTER_FAILED",
        24 => "NV_ENC_ERR_RESOURCE_NOT_REGISTERED",
        25 => "NV_ENC_ERR_RESOURCE_NOT_MAPPED",
        26 => "NV_ENC_ERR_NEED_MORE_OUTPUT",
        other => return Cow::Owned(format!("NVENC_STATUS_{other}")),
    };
    Cow::Borrowed(name)
}
