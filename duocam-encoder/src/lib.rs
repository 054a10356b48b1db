//! Interface seam for the hardware video encoder.
//!
//! The encoder itself is a vendor codec wrapped elsewhere; the capture core
//! only consumes it as an opaque encode step downstream of frame
//! publication. It may fail or time out, and on failure it must not have
//! corrupted the caller's buffers; the interface guarantees that by taking
//! the frame by shared reference.

use duocam_types::{Frame, FrameFormat};

pub type Result<T> = std::result::Result<T, EncodeError>;

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("encoder expects NV12 input, got {0}")]
    UnsupportedFormat(FrameFormat),
    #[error("encode timed out")]
    Timeout,
    #[error("encoder failed: {0}")]
    Backend(String),
}

/// One hardware (or software) video encoder instance.
///
/// `target_bitrate_bps` is a hard upper bound enforced by the hardware.
pub trait VideoEncoder: Send {
    /// Encode one NV12 frame into a bitstream chunk.
    fn encode(&mut self, frame: &Frame, target_bitrate_bps: u32) -> Result<Vec<u8>>;
}
