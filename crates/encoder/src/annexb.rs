//! In-band codec configuration for Annex B elementary streams.
//!
//! NVENC emits Annex B start-code framed NAL units. The parameter sets
//! (SPS/PPS, plus VPS for HEVC) are fetched once per (re)configuration and
//! written in front of packets according to the pipeline's
//! [`PrependPolicy`](hwenc_common::PrependPolicy).

/// Cache of the current codec configuration payload.
#[derive(Clone, Debug, Default)]
pub struct AnnexBPackager {
    config: Vec<u8>,
}

impl AnnexBPackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached payload with a copy of `bytes`.
    pub fn set_codec_config(&mut self, bytes: &[u8]) {
        self.config.clear();
        self.config.extend_from_slice(bytes);
    }

    /// Cached payload; empty when nothing has been set.
    pub fn codec_config(&self) -> &[u8] {
        &self.config
    }

    pub fn has_codec_config(&self) -> bool {
        !self.config.is_empty()
    }

    pub fn reset(&mut self) {
        self.config.clear();
    }

    /// Cached payload followed by `payload`.
    pub fn prepend_to(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.config.len() + payload.len());
        out.extend_from_slice(&self.config);
        out.extend_from_slice(payload);
        out
    }
}
