//! Single-slot versioned publication of the most recent detection batch.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use duocam_types::{Detection, MAX_DETECTIONS};

use crate::segment::{ShmSafe, ShmSegment};
use crate::{Error, Result};

#[repr(C)]
struct DetectionPayload {
    frame_number: u64,
    count: u32,
    _pad: u32,
    detections: [Detection; MAX_DETECTIONS],
}

/// The in-memory layout of the shared detection slot.
///
/// `version` is 0 until the first successful write, then increments by
/// exactly one per write and never resets while the region is alive. The
/// payload is fully written before the version advances.
#[repr(C)]
pub struct DetectionSlotLayout {
    version: AtomicU64,
    payload: UnsafeCell<DetectionPayload>,
}

unsafe impl ShmSafe for DetectionSlotLayout {}
// Concurrent access is mediated entirely by the version protocol below.
unsafe impl Sync for DetectionSlotLayout {}

/// A consistent snapshot observed by [DetectionSlotLayout::read].
#[derive(Debug, Clone, PartialEq)]
pub struct LatestDetections {
    /// Version counter at the time of the read (>= 1).
    pub version: u64,
    /// The frame these detections refer to.
    pub frame_number: u64,
    pub detections: Vec<Detection>,
}

impl DetectionSlotLayout {
    /// Allocate a zeroed slot on the heap, for single-process use and tests.
    pub fn boxed_zeroed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Publish a new batch. More than [MAX_DETECTIONS] entries is an error
    /// (not silent truncation) and changes no state.
    ///
    /// At most one writer may call this at a time; the cross-process case is
    /// enforced by [DetectionSlotWriter] taking `&mut self`.
    pub fn write(&self, frame_number: u64, detections: &[Detection]) -> Result<()> {
        if detections.len() > MAX_DETECTIONS {
            return Err(Error::TooManyDetections(detections.len()));
        }
        let payload = self.payload.get();
        unsafe {
            (*payload).frame_number = frame_number;
            (*payload).count = detections.len() as u32;
            std::ptr::copy_nonoverlapping(
                detections.as_ptr(),
                (*payload).detections.as_mut_ptr(),
                detections.len(),
            );
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read the current batch, or `None` if nothing was ever published.
    ///
    /// Reads the version before and after copying the payload and retries on
    /// mismatch. With a single writer this converges after at most one
    /// in-flight write, so the optimistic retry has no starvation risk.
    pub fn read(&self) -> Option<LatestDetections> {
        loop {
            let before = self.version.load(Ordering::SeqCst);
            if before == 0 {
                return None;
            }
            let snapshot: DetectionPayload = unsafe { std::ptr::read(self.payload.get()) };
            let after = self.version.load(Ordering::SeqCst);
            if before != after {
                continue;
            }
            let count = (snapshot.count as usize).min(MAX_DETECTIONS);
            return Some(LatestDetections {
                version: after,
                frame_number: snapshot.frame_number,
                detections: snapshot.detections[..count].to_vec(),
            });
        }
    }
}

/// Writer handle over a shared detection slot.
pub struct DetectionSlotWriter {
    seg: ShmSegment<DetectionSlotLayout>,
}

impl DetectionSlotWriter {
    pub fn create(name: &str) -> Result<Self> {
        Ok(Self {
            seg: ShmSegment::create(name)?,
        })
    }

    pub fn write(&mut self, frame_number: u64, detections: &[Detection]) -> Result<()> {
        self.seg.get().write(frame_number, detections)
    }

    pub fn version(&self) -> u64 {
        self.seg.get().version()
    }
}

/// Reader handle over a shared detection slot created elsewhere.
pub struct DetectionSlotReader {
    seg: ShmSegment<DetectionSlotLayout>,
}

impl DetectionSlotReader {
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            seg: ShmSegment::open(name)?,
        })
    }

    pub fn read(&self) -> Option<LatestDetections> {
        self.seg.get().read()
    }

    pub fn version(&self) -> u64 {
        self.seg.get().version()
    }
}
