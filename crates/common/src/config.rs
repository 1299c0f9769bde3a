//! Configuration structs for the encoder layer and the runtime loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::color::PixelFormat;

/// Environment variable naming a directory to search for the encoder runtime.
pub const MODULE_DIR_ENV: &str = "NVENC_MODULE_DIR";
/// Environment variable naming the encoder runtime library itself.
pub const LIBRARY_PATH_ENV: &str = "NVENC_LIBRARY_PATH";

/// Rate-control mode exposed to callers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateControlMode {
    /// Constant QP; bitrate fields are ignored and adaptive quantization is off.
    ConstQp,
    /// Variable bitrate bounded by the max bitrate.
    Vbr,
    /// Constant bitrate.
    #[default]
    Cbr,
}

/// Multi-pass encoding mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultipassMode {
    Disabled,
    /// Two-pass with the first pass at quarter resolution.
    Quarter,
    /// Two-pass at full resolution.
    #[default]
    Full,
}

/// Caller-facing encode settings for one output layer.
///
/// A zero `width`/`height` means "take the size of the first submitted
/// texture". A zero `max_framerate` means 60 fps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub width: u32,
    pub height: u32,
    pub max_framerate: u32,
    /// Target bitrate in bits/sec.
    pub target_bitrate: u32,
    /// Peak bitrate in bits/sec.
    pub max_bitrate: u32,
    /// Lowest QP the rate control may choose, or -1 for the preset default.
    pub min_qp: i32,
    /// Highest QP the rate control may choose, or -1 for the preset default.
    pub max_qp: i32,
    pub rate_control: RateControlMode,
    pub multipass: MultipassMode,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            max_framerate: 0,
            target_bitrate: 0,
            max_bitrate: 0,
            min_qp: -1,
            max_qp: -1,
            rate_control: RateControlMode::default(),
            multipass: MultipassMode::default(),
        }
    }
}

/// When the cached codec configuration (SPS/PPS/VPS) is written in-band.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrependPolicy {
    /// Only in front of the first packet after each (re)configuration.
    #[default]
    FirstPacketOnly,
    /// In front of every keyframe, so a receiver can join at any IDR.
    EveryKeyframe,
}

/// Full encoder pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub format: PixelFormat,
    pub layer: LayerConfig,
    pub prepend_policy: PrependPolicy,
}

/// Where to look for the vendor encoder runtime.
///
/// Both fields are optional. `library_path` wins over `module_dir` when both
/// are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOverrides {
    /// Directory containing the runtime library.
    pub module_dir: Option<PathBuf>,
    /// Full path to the runtime library.
    pub library_path: Option<PathBuf>,
}

impl RuntimeOverrides {
    /// Read overrides from `NVENC_MODULE_DIR` / `NVENC_LIBRARY_PATH`.
    /// Empty values are treated as unset.
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            module_dir: read(MODULE_DIR_ENV),
            library_path: read(LIBRARY_PATH_ENV),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.module_dir.is_none() && self.library_path.is_none()
    }

    /// Resolved module directory. A path that points at a file is replaced by
    /// its parent directory.
    pub fn resolved_module_dir(&self) -> Option<PathBuf> {
        let dir = self.module_dir.as_deref()?;
        if dir.is_file() {
            dir.parent().map(Path::to_path_buf)
        } else {
            Some(dir.to_path_buf())
        }
    }

    /// Resolved library path. A path that points at a directory gets
    /// `library_name` appended.
    pub fn resolved_library_path(&self, library_name: &str) -> Option<PathBuf> {
        let path = self.library_path.as_deref()?;
        if path.is_dir() {
            Some(path.join(library_name))
        } else {
            Some(path.to_path_buf())
        }
    }
}
