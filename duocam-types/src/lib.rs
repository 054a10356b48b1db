//! Fixed-layout value types shared between the capture process and its
//! readers.
//!
//! Everything in this crate is `#[repr(C)]` with bounded in-place buffers so
//! the values can live in a shared memory region verbatim. The field order,
//! buffer capacities and alignment are part of the cross-process contract:
//! every producer and consumer mapping the same region must be built against
//! the same version of these constants.

use serde::{Deserialize, Serialize};

/// Largest supported frame width in pixels.
pub const MAX_FRAME_WIDTH: usize = 1920;
/// Largest supported frame height in pixels.
pub const MAX_FRAME_HEIGHT: usize = 1080;
/// Capacity of the in-place pixel buffer of a [Frame].
///
/// Sized for the largest supported frame: RGB at maximum resolution.
pub const FRAME_DATA_CAPACITY: usize = MAX_FRAME_WIDTH * MAX_FRAME_HEIGHT * 3;
/// Number of frame slots in the shared ring buffer.
pub const RING_BUFFER_SIZE: usize = 8;
/// Maximum number of detections in one published batch.
pub const MAX_DETECTIONS: usize = 32;
/// Capacity of a detection class label, in bytes.
pub const MAX_LABEL_LEN: usize = 32;
/// Capacity of the human-readable switch reason, in bytes.
pub const MAX_REASON_LEN: usize = 96;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("frame data size {len} exceeds buffer capacity {capacity}")]
    DataTooLarge { len: usize, capacity: usize },
    #[error("unknown camera id {0}")]
    UnknownCameraId(u32),
    #[error("unknown frame format {0}")]
    UnknownFrameFormat(u32),
}

/// Which physical camera a frame or brightness sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CameraId {
    Day = 0,
    Night = 1,
}

impl CameraId {
    /// Index into per-camera arrays.
    #[inline]
    pub fn index(&self) -> usize {
        *self as u32 as usize
    }

    /// The other camera of the pair.
    pub fn other(&self) -> CameraId {
        match self {
            CameraId::Day => CameraId::Night,
            CameraId::Night => CameraId::Day,
        }
    }
}

impl TryFrom<u32> for CameraId {
    type Error = Error;
    fn try_from(orig: u32) -> Result<Self> {
        match orig {
            0 => Ok(CameraId::Day),
            1 => Ok(CameraId::Night),
            other => Err(Error::UnknownCameraId(other)),
        }
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraId::Day => write!(f, "day"),
            CameraId::Night => write!(f, "night"),
        }
    }
}

/// Pixel format of a captured frame.
///
/// `Jpeg` is discriminant zero so that an all-zero [Frame] is a valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum FrameFormat {
    Jpeg = 0,
    Nv12 = 1,
    Rgb = 2,
}

impl TryFrom<u32> for FrameFormat {
    type Error = Error;
    fn try_from(orig: u32) -> Result<Self> {
        match orig {
            0 => Ok(FrameFormat::Jpeg),
            1 => Ok(FrameFormat::Nv12),
            2 => Ok(FrameFormat::Rgb),
            other => Err(Error::UnknownFrameFormat(other)),
        }
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFormat::Jpeg => write!(f, "JPEG"),
            FrameFormat::Nv12 => write!(f, "NV12"),
            FrameFormat::Rgb => write!(f, "RGB"),
        }
    }
}

/// One captured image with its metadata and an in-place pixel buffer.
///
/// `frame_number` is a per-camera monotonic sequence assigned by the
/// capturer: unique within one camera's stream, not globally unique across
/// cameras. `timestamp_ns` is capture time on the monotonic clock.
///
/// Invariant: `data_size <= FRAME_DATA_CAPACITY`, enforced by [Frame::set_data].
#[repr(C)]
pub struct Frame {
    pub frame_number: u64,
    pub timestamp_ns: u64,
    pub camera_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub data_size: u32,
    _pad: u32,
    pub data: [u8; FRAME_DATA_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<Frame>() == 40 + FRAME_DATA_CAPACITY);
const _: () = assert!(std::mem::align_of::<Frame>() == 8);

impl Frame {
    /// Allocate a zeroed frame on the heap.
    ///
    /// A `Frame` is several megabytes and must never be constructed on the
    /// stack. All-zero is a valid value: every field is a plain integer and
    /// format discriminant zero is [FrameFormat::Jpeg].
    pub fn boxed() -> Box<Frame> {
        let layout = std::alloc::Layout::new::<Frame>();
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Frame;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// The bytes actually used by this frame.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.data_size as usize]
    }

    /// Copy `bytes` into the in-place buffer, rejecting oversize payloads
    /// without mutating any state.
    pub fn set_data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > FRAME_DATA_CAPACITY {
            return Err(Error::DataTooLarge {
                len: bytes.len(),
                capacity: FRAME_DATA_CAPACITY,
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.data_size = bytes.len() as u32;
        Ok(())
    }

    /// Deep-copy `other` into `self`, including pixel bytes.
    pub fn copy_from(&mut self, other: &Frame) {
        // Whole-struct copy through pointers; going through a by-value
        // temporary would put megabytes on the stack.
        unsafe {
            std::ptr::copy_nonoverlapping(other as *const Frame, self as *mut Frame, 1);
        }
    }

    pub fn camera(&self) -> Result<CameraId> {
        CameraId::try_from(self.camera_id)
    }

    pub fn frame_format(&self) -> Result<FrameFormat> {
        FrameFormat::try_from(self.format)
    }
}

impl PartialEq for Frame {
    /// Equality over metadata and the used portion of the pixel buffer.
    fn eq(&self, other: &Frame) -> bool {
        self.frame_number == other.frame_number
            && self.timestamp_ns == other.timestamp_ns
            && self.camera_id == other.camera_id
            && self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.data_size == other.data_size
            && self.payload() == other.payload()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_number", &self.frame_number)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("camera_id", &self.camera_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("data_size", &self.data_size)
            .finish()
    }
}

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected object with a bounded in-place class label.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Detection {
    pub label: [u8; MAX_LABEL_LEN],
    pub label_len: u32,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

const _: () = assert!(std::mem::size_of::<Detection>() == MAX_LABEL_LEN + 8 + 16);

impl Detection {
    pub fn new(label: &str, confidence: f32, bbox: BoundingBox) -> Detection {
        let mut det = Detection {
            label: [0u8; MAX_LABEL_LEN],
            label_len: 0,
            confidence,
            bbox,
        };
        det.set_label(label);
        det
    }

    /// Store `label`, truncating at capacity on a UTF-8 boundary.
    pub fn set_label(&mut self, label: &str) {
        let truncated = truncate_utf8(label, MAX_LABEL_LEN);
        self.label = [0u8; MAX_LABEL_LEN];
        self.label[..truncated.len()].copy_from_slice(truncated.as_bytes());
        self.label_len = truncated.len() as u32;
    }

    pub fn label(&self) -> &str {
        // label_len always marks a UTF-8 boundary of bytes we wrote ourselves,
        // but a hostile shared region could hold anything.
        std::str::from_utf8(&self.label[..self.label_len as usize]).unwrap_or("")
    }
}

impl PartialEq for Detection {
    fn eq(&self, other: &Detection) -> bool {
        self.label() == other.label()
            && self.confidence == other.confidence
            && self.bbox == other.bbox
    }
}

/// Truncate `s` to at most `max_len` bytes on a character boundary.
pub fn truncate_utf8(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_stable() {
        assert_eq!(std::mem::size_of::<Frame>(), 40 + FRAME_DATA_CAPACITY);
        assert_eq!(std::mem::align_of::<Frame>(), 8);
        assert_eq!(std::mem::size_of::<Detection>(), 56);
    }

    #[test]
    fn zeroed_frame_is_valid() {
        let frame = Frame::boxed();
        assert_eq!(frame.data_size, 0);
        assert_eq!(frame.camera().unwrap(), CameraId::Day);
        assert_eq!(frame.frame_format().unwrap(), FrameFormat::Jpeg);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn set_data_rejects_oversize_without_mutation() {
        let mut frame = Frame::boxed();
        frame.set_data(&[1, 2, 3]).unwrap();
        let big = vec![0u8; FRAME_DATA_CAPACITY + 1];
        assert_eq!(
            frame.set_data(&big),
            Err(Error::DataTooLarge {
                len: FRAME_DATA_CAPACITY + 1,
                capacity: FRAME_DATA_CAPACITY
            })
        );
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[test]
    fn frame_copy_is_deep() {
        let mut a = Frame::boxed();
        a.frame_number = 7;
        a.camera_id = CameraId::Night as u32;
        a.set_data(b"pixels").unwrap();
        let mut b = Frame::boxed();
        b.copy_from(&a);
        assert_eq!(*a, *b);
        // mutating the copy does not touch the original
        b.data[0] = b'q';
        assert_eq!(a.payload(), b"pixels");
    }

    #[test]
    fn frame_eq_ignores_unused_tail() {
        let mut a = Frame::boxed();
        a.set_data(b"same").unwrap();
        let mut b = Frame::boxed();
        b.set_data(b"same").unwrap();
        b.data[100] = 0xff; // past data_size
        assert_eq!(*a, *b);
    }

    #[test]
    fn label_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_LABEL_LEN); // 2 bytes per char
        let det = Detection::new(
            &long,
            0.5,
            BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            },
        );
        assert!(det.label_len as usize <= MAX_LABEL_LEN);
        assert_eq!(det.label(), "é".repeat(MAX_LABEL_LEN / 2));
    }

    #[test]
    fn camera_id_round_trip() {
        for id in [CameraId::Day, CameraId::Night] {
            assert_eq!(CameraId::try_from(id as u32).unwrap(), id);
        }
        assert!(CameraId::try_from(2).is_err());
        assert_eq!(CameraId::Day.other(), CameraId::Night);
    }
}
