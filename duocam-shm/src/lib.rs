//! Lock-free publication of frames and detection results across process
//! boundaries.
//!
//! Exactly one process writes a given structure; any number of reader
//! processes map the same region concurrently. There are no locks and no
//! blocking in either direction. Writers commit the payload to memory before
//! advancing the associated counter, and readers treat the counter as a hint
//! to re-validate: read the payload, re-read the counter, retry on mismatch.
//! Staleness (observing an older-but-complete record) is acceptable; tearing
//! is not.

use duocam_types::MAX_DETECTIONS;

mod detections;
mod ring;
mod segment;

pub use detections::{
    DetectionSlotLayout, DetectionSlotReader, DetectionSlotWriter, LatestDetections,
};
pub use ring::{FrameRingLayout, FrameRingReader, FrameRingWriter};
pub use segment::{ShmSafe, ShmSegment};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid shared memory object name {0:?}")]
    BadName(String),
    #[error("creating shared memory object failed: {source}")]
    Create { source: std::io::Error },
    #[error("opening shared memory object failed: {source}")]
    Open { source: std::io::Error },
    #[error("sizing shared memory object failed: {source}")]
    Resize { source: std::io::Error },
    #[error("mapping shared memory failed: {source}")]
    Map { source: std::io::Error },
    #[error("shared memory object too small: {actual} bytes, need {expected}")]
    TooSmall { expected: usize, actual: usize },
    #[error("frame data size {len} exceeds slot capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },
    #[error("{0} detections exceed capacity {MAX_DETECTIONS}")]
    TooManyDetections(usize),
    #[error("ring buffer has never been written")]
    NeverWritten,
}

fn _test_error_is_send() {
    // Compile-time test to ensure Error implements Send trait.
    fn implements<T: Send>() {}
    implements::<Error>();
}
