//! Hardware capability probing.
//!
//! The probe answers "can this machine encode, and what?" by actually
//! driving throwaway sessions: load the runtime, then for each
//! codec/format combination open a session on a scratch device, initialise
//! it at a tiny size and allocate a bitstream buffer. The result is cached
//! until [`CapabilityProbe::invalidate`] is called.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hwenc_common::{MultipassMode, PixelFormat, RateControlMode, VideoCodec};
use hwenc_gpu_hal::DeviceProvider;

use crate::error::NvencLoadError;
use crate::nvenc::bitstream::BitstreamBuffer;
use crate::nvenc::loader::RuntimeLoader;
use crate::nvenc::params::EncodeParameters;
use crate::nvenc::session::EncoderSession;

pub const RUNTIME_LOAD_FAILED: &str = "Unable to load nvEncodeAPI runtime.";
pub const EXPORTS_UNRESOLVED: &str = "Failed to resolve NVENC exports.";
pub const SESSION_OPEN_FAILED: &str = "Unable to open NVENC session for probe.";
pub const SESSION_INIT_FAILED: &str = "Failed to initialise NVENC session during probe.";
pub const BITSTREAM_ALLOC_FAILED: &str = "Failed to allocate NVENC bitstream during probe.";

/// Combinations probed, baseline first.
pub const PROBE_COMBINATIONS: [(VideoCodec, PixelFormat); 4] = [
    (VideoCodec::H264, PixelFormat::Nv12),
    (VideoCodec::H264, PixelFormat::Bgra8),
    (VideoCodec::H265, PixelFormat::Nv12),
    (VideoCodec::H265, PixelFormat::P010),
];

// ---------------------------------------------------------------------------
// CodecFeatures
// ---------------------------------------------------------------------------

/// Per-codec hardware limits as reported by `NvEncGetEncodeCaps`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecFeatures {
    pub max_width: u32,
    pub max_height: u32,
    pub supports_b_frames: bool,
    pub supports_lookahead: bool,
    pub supports_adaptive_quantization: bool,
    pub supports_10bit: bool,
    pub supports_yuv444: bool,
}

impl CodecFeatures {
    pub fn to_debug_string(&self) -> String {
        format!(
            "10bit={} BFrames={} YUV444={} Lookahead={} AQ={} MaxResolution={}x{}",
            yes_no(self.supports_10bit),
            yes_no(self.supports_b_frames),
            yes_no(self.supports_yuv444),
            yes_no(self.supports_lookahead),
            yes_no(self.supports_adaptive_quantization),
            self.max_width,
            self.max_height,
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

// ---------------------------------------------------------------------------
// ProbeResult
// ---------------------------------------------------------------------------

/// Outcome of probing one codec/format combination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationSupport {
    pub codec: VideoCodec,
    pub format: PixelFormat,
    pub supported: bool,
    /// Why the combination failed; `None` when supported.
    pub reason: Option<String>,
}

/// Failure reason of each probe stage. `None` means the stage passed or
/// never ran.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailures {
    /// Runtime module could not be opened.
    pub dll: Option<String>,
    /// Runtime opened but an export is missing.
    pub api: Option<String>,
    /// Baseline H.264/NV12 session failed.
    pub session: Option<String>,
    /// HEVC (H.265/NV12) session failed.
    pub codec: Option<String>,
    pub nv12: Option<String>,
    pub p010: Option<String>,
    pub bgra: Option<String>,
}

impl StageFailures {
    /// Stage slot a failed combination is reported under.
    fn slot(&mut self, codec: VideoCodec, format: PixelFormat) -> Option<&mut Option<String>> {
        match (codec, format) {
            (VideoCodec::H264, PixelFormat::Nv12) => Some(&mut self.session),
            (VideoCodec::H264, PixelFormat::Bgra8) => Some(&mut self.bgra),
            (VideoCodec::H265, PixelFormat::Nv12) => Some(&mut self.codec),
            (VideoCodec::H265, PixelFormat::P010) => Some(&mut self.p010),
            _ => None,
        }
    }

    /// `(stage, reason)` for every failed stage, in probe order.
    pub fn failed(&self) -> Vec<(&'static str, &str)> {
        [
            ("dll", &self.dll),
            ("api", &self.api),
            ("session", &self.session),
            ("nv12", &self.nv12),
            ("bgra", &self.bgra),
            ("codec", &self.codec),
            ("p010", &self.p010),
        ]
        .into_iter()
        .filter_map(|(stage, reason)| reason.as_deref().map(|r| (stage, r)))
        .collect()
    }
}

/// Cached capability report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// The runtime module could be opened.
    pub dll_present: bool,
    /// Every required export resolved.
    pub apis_ready: bool,
    /// The baseline combination (H.264/NV12) went through a full probe.
    pub session_openable: bool,
    pub hardware_available: bool,
    pub h264: bool,
    pub hevc: bool,
    pub nv12: bool,
    pub bgra: bool,
    pub p010: bool,
    pub combinations: Vec<CombinationSupport>,
    /// First stage that failed, if the probe stopped early.
    pub failure_reason: Option<String>,
    pub stage_failures: StageFailures,
    pub adapter_name: Option<String>,
    pub driver_version: Option<String>,
    /// Codec features read on the baseline session.
    pub baseline_features: Option<CodecFeatures>,
}

impl ProbeResult {
    pub fn supports(&self, codec: VideoCodec, format: PixelFormat) -> bool {
        self.combinations
            .iter()
            .any(|c| c.codec == codec && c.format == format && c.supported)
    }

    fn record(&mut self, support: CombinationSupport) {
        if support.supported {
            match support.codec {
                VideoCodec::H264 => self.h264 = true,
                VideoCodec::H265 => self.hevc = true,
                VideoCodec::Av1 => {}
            }
            match support.format {
                PixelFormat::Nv12 => self.nv12 = true,
                PixelFormat::Bgra8 => self.bgra = true,
                PixelFormat::P010 => self.p010 = true,
            }
        } else if let Some(reason) = &support.reason {
            if support.codec == VideoCodec::H264 && support.format == PixelFormat::Nv12 {
                self.stage_failures.nv12 = Some(reason.clone());
            }
            if let Some(slot) = self.stage_failures.slot(support.codec, support.format) {
                *slot = Some(reason.clone());
            }
        }
        self.combinations.push(support);
    }
}

/// Parameters of the throwaway probe sessions.
pub fn probe_parameters(codec: VideoCodec, format: PixelFormat) -> EncodeParameters {
    EncodeParameters {
        codec,
        format,
        width: 256,
        height: 144,
        framerate: 60,
        target_bitrate: 5_000_000,
        max_bitrate: 10_000_000,
        rate_control: RateControlMode::Cbr,
        multipass: MultipassMode::Disabled,
        gop_length: 60,
        enable_lookahead: false,
        enable_aq: true,
        ..EncodeParameters::default()
    }
}

// ---------------------------------------------------------------------------
// CapabilityProbe
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProbeCache {
    valid: bool,
    result: ProbeResult,
}

/// Probes and caches hardware encode support.
///
/// The cache mutex is independent of every session lock. It is held for the
/// duration of a probe so concurrent callers wait for one result instead of
/// probing twice.
pub struct CapabilityProbe {
    loader: Arc<RuntimeLoader>,
    devices: Arc<dyn DeviceProvider>,
    cache: Mutex<ProbeCache>,
    runs: AtomicU64,
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("cached", &self.cache.lock().valid)
            .field("runs", &self.probe_runs())
            .finish()
    }
}

impl CapabilityProbe {
    pub fn new(loader: Arc<RuntimeLoader>, devices: Arc<dyn DeviceProvider>) -> Self {
        Self {
            loader,
            devices,
            cache: Mutex::new(ProbeCache::default()),
            runs: AtomicU64::new(0),
        }
    }

    /// Cached result, probing first if the cache is empty or invalidated.
    pub fn query_capabilities(&self) -> ProbeResult {
        let mut cache = self.cache.lock();
        if !cache.valid {
            cache.result = self.run_probe();
            cache.valid = true;
        }
        cache.result.clone()
    }

    pub fn is_available(&self) -> bool {
        self.query_capabilities().hardware_available
    }

    /// Drop the cached result. The next query probes again.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        if cache.valid {
            debug!("Capability cache invalidated");
        }
        cache.valid = false;
    }

    /// Number of times the probe sequence has executed.
    pub fn probe_runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    fn run_probe(&self) -> ProbeResult {
        self.runs.fetch_add(1, Ordering::Relaxed);

        let mut result = ProbeResult::default();
        if let Some(adapter) = self.devices.adapter_info() {
            result.adapter_name = Some(adapter.name);
            result.driver_version = Some(adapter.driver_version);
        }

        match self.loader.load() {
            Ok(_) => {
                result.dll_present = true;
                result.apis_ready = true;
            }
            Err(NvencLoadError::LibraryNotFound(detail)) => {
                warn!(%detail, "Capability probe: runtime not found");
                result.failure_reason = Some(RUNTIME_LOAD_FAILED.to_string());
                result.stage_failures.dll = result.failure_reason.clone();
                return result;
            }
            Err(NvencLoadError::SymbolNotFound(symbol)) => {
                warn!(%symbol, "Capability probe: runtime exports incomplete");
                result.dll_present = true;
                result.failure_reason = Some(EXPORTS_UNRESOLVED.to_string());
                result.stage_failures.api = result.failure_reason.clone();
                return result;
            }
        }

        for (index, (codec, format)) in PROBE_COMBINATIONS.into_iter().enumerate() {
            let baseline = index == 0;
            let outcome = self.probe_combination(codec, format, baseline);
            let support = match outcome {
                Ok(features) => {
                    if baseline {
                        result.session_openable = true;
                        result.baseline_features = features;
                    }
                    CombinationSupport {
                        codec,
                        format,
                        supported: true,
                        reason: None,
                    }
                }
                Err(reason) => {
                    debug!(
                        codec = codec.short_name(),
                        format = format.short_name(),
                        %reason,
                        "Combination not supported"
                    );
                    CombinationSupport {
                        codec,
                        format,
                        supported: false,
                        reason: Some(reason),
                    }
                }
            };
            let failed_reason = support.reason.clone();
            result.record(support);

            if baseline && !result.session_openable {
                result.failure_reason = failed_reason;
                break;
            }
        }

        result.hardware_available = result.dll_present && result.apis_ready && result.session_openable;
        info!(
            available = result.hardware_available,
            h264 = result.h264,
            hevc = result.hevc,
            adapter = result.adapter_name.as_deref().unwrap_or("unknown"),
            "NVENC capability probe finished"
        );
        result
    }

    /// Full open/initialise/allocate cycle on a scratch device. Returns the
    /// codec features when `read_features` is set.
    fn probe_combination(
        &self,
        codec: VideoCodec,
        format: PixelFormat,
        read_features: bool,
    ) -> Result<Option<CodecFeatures>, String> {
        let device = self
            .devices
            .create_probe_device()
            .map_err(|e| format!("Failed to create probing device ({e})."))?;

        let mut session = EncoderSession::new(Arc::clone(&self.loader));
        session
            .open(codec, &device.device())
            .map_err(|e| {
                debug!(error = %e, "Probe session open failed");
                SESSION_OPEN_FAILED.to_string()
            })?;

        let features = if read_features {
            session.query_codec_features(codec).ok()
        } else {
            None
        };

        session
            .initialize(&probe_parameters(codec, format))
            .map_err(|e| {
                debug!(error = %e, "Probe session initialise failed");
                SESSION_INIT_FAILED.to_string()
            })?;

        let binding = session
            .binding()
            .ok_or_else(|| BITSTREAM_ALLOC_FAILED.to_string())?;
        let mut bitstream = BitstreamBuffer::new();
        let allocated = bitstream.create(&binding);
        bitstream.release();
        session.destroy();
        drop(device);

        allocated.map_err(|e| {
            debug!(error = %e, "Probe bitstream allocation failed");
            BITSTREAM_ALLOC_FAILED.to_string()
        })?;
        Ok(features)
    }
}
