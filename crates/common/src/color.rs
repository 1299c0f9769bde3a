//! Pixel formats accepted by the hardware encoder.

use serde::{Deserialize, Serialize};

/// Pixel format of an encoder input surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// NV12: Y plane + interleaved UV at half resolution.
    #[default]
    Nv12,
    /// P010: 10-bit NV12 variant (HDR content).
    P010,
    /// BGRA8, the swap-chain native ordering on D3D.
    Bgra8,
}

impl PixelFormat {
    /// Short name used in compact parameter dumps.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::P010 => "P010",
            Self::Bgra8 => "BGRA",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}
