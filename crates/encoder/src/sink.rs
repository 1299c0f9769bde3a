//! Raw elementary stream output.
//!
//! Packets are written back to back with no container framing. The codec
//! configuration is already in-band (see [`crate::annexb`]), so the result
//! plays directly as a `.h264` / `.h265` file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use hwenc_common::{EncodedPacket, VideoCodec};

use crate::error::SinkError;

/// Appends encoded packets to a writer.
pub struct ElementaryStreamWriter<W: Write> {
    writer: W,
    packets: u64,
    bytes: u64,
    keyframes: u64,
}

impl ElementaryStreamWriter<BufWriter<File>> {
    /// Create `path` for writing.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|e| {
            SinkError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create output file {}: {e}", path.display()),
            ))
        })?;
        debug!(path = %path.display(), "Elementary stream output created");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ElementaryStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            packets: 0,
            bytes: 0,
            keyframes: 0,
        }
    }

    /// Conventional file name for a stream of `codec`, e.g. `capture.h264`.
    pub fn file_name(stem: &str, codec: VideoCodec) -> String {
        format!("{stem}.{}", codec.elementary_stream_extension())
    }

    pub fn write_packet(&mut self, packet: &EncodedPacket) -> Result<(), SinkError> {
        self.writer.write_all(&packet.data)?;
        self.packets += 1;
        self.bytes += packet.data.len() as u64;
        if packet.is_keyframe {
            self.keyframes += 1;
        }
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, SinkError> {
        self.writer.flush()?;
        info!(
            packets = self.packets,
            keyframes = self.keyframes,
            bytes = self.bytes,
            "Elementary stream finished"
        );
        Ok(self.writer)
    }
}
