//! Append-only ring of frames: one writer process, any number of readers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use duocam_types::{Frame, FRAME_DATA_CAPACITY, RING_BUFFER_SIZE};

use crate::segment::{ShmSafe, ShmSegment};
use crate::{Error, Result};

/// Bytes of [Frame] before the pixel buffer. Checked against the real layout
/// by the size assertion in duocam-types.
const FRAME_HEADER_SIZE: usize = std::mem::size_of::<Frame>() - FRAME_DATA_CAPACITY;

/// The in-memory layout of the shared frame ring.
///
/// `write_index` increases by exactly one per completed write and never
/// wraps arithmetically; the physical slot of write `i` is
/// `i % RING_BUFFER_SIZE`. The most recently completed write is always slot
/// `(write_index - 1) % RING_BUFFER_SIZE`, visible to readers as soon as the
/// increment is.
#[repr(C)]
pub struct FrameRingLayout {
    write_index: AtomicU64,
    frames: [UnsafeCell<Frame>; RING_BUFFER_SIZE],
}

unsafe impl ShmSafe for FrameRingLayout {}
// Concurrent access is mediated entirely by the write_index protocol below.
unsafe impl Sync for FrameRingLayout {}

impl FrameRingLayout {
    /// Allocate a zeroed ring on the heap, for single-process use and tests.
    /// Cross-process instances live in a [ShmSegment] instead.
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

    /// Current value of the write counter, for diagnostics and tests.
    #[inline]
    pub fn write_index(&self) -> u64 {
        self.write_index.load(Ordering::SeqCst)
    }

    /// Copy `frame` into the next slot, then advance the write counter.
    ///
    /// The payload copy is fully committed to memory before the counter
    /// increment becomes visible to readers. Fails without mutating any
    /// state if the frame claims more data than a slot holds.
    ///
    /// At most one writer may call this at a time; the cross-process case is
    /// enforced by [FrameRingWriter] taking `&mut self`.
    pub fn write(&self, frame: &Frame) -> Result<()> {
        let len = frame.data_size as usize;
        if len > FRAME_DATA_CAPACITY {
            return Err(Error::FrameTooLarge {
                len,
                capacity: FRAME_DATA_CAPACITY,
            });
        }
        let idx = self.write_index.load(Ordering::SeqCst);
        let slot = self.frames[(idx % RING_BUFFER_SIZE as u64) as usize].get();
        unsafe {
            // Header plus used payload only. The unused tail keeps whatever
            // the previous occupant left there; data_size bounds what readers
            // may look at.
            std::ptr::copy_nonoverlapping(
                frame as *const Frame as *const u8,
                slot as *mut u8,
                FRAME_HEADER_SIZE,
            );
            std::ptr::copy_nonoverlapping(
                frame.data.as_ptr(),
                std::ptr::addr_of_mut!((*slot).data) as *mut u8,
                len,
            );
        }
        self.write_index.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Copy the most recently completed frame into `out` and return its
    /// sequence index.
    ///
    /// Fails only if no write has ever occurred. The copy is validated
    /// against the write counter: it can only tear if the writer wrapped all
    /// the way around into the slot being copied, and exactly that case
    /// retries. Observing an older-but-complete frame is fine; observing a
    /// torn one is not.
    pub fn read_latest(&self, out: &mut Frame) -> Result<u64> {
        loop {
            let idx = self.write_index.load(Ordering::SeqCst);
            if idx == 0 {
                return Err(Error::NeverWritten);
            }
            let latest = idx - 1;
            let slot = self.frames[(latest % RING_BUFFER_SIZE as u64) as usize].get();
            unsafe {
                std::ptr::copy_nonoverlapping(
                    slot as *const u8,
                    out as *mut Frame as *mut u8,
                    FRAME_HEADER_SIZE,
                );
                // A concurrently torn header could claim any data_size; the
                // clamp keeps the copy in bounds and the re-check below
                // rejects the result.
                let len = (out.data_size as usize).min(FRAME_DATA_CAPACITY);
                std::ptr::copy_nonoverlapping(
                    std::ptr::addr_of!((*slot).data) as *const u8,
                    out.data.as_mut_ptr(),
                    len,
                );
            }
            let idx_after = self.write_index.load(Ordering::SeqCst);
            if idx_after < latest + RING_BUFFER_SIZE as u64 {
                // Keep the invariant data_size <= capacity even if the region
                // was corrupted by a foreign writer.
                out.data_size = out.data_size.min(FRAME_DATA_CAPACITY as u32);
                return Ok(latest);
            }
        }
    }
}

/// Writer handle over a shared frame ring. Create one per producer process.
pub struct FrameRingWriter {
    seg: ShmSegment<FrameRingLayout>,
}

impl FrameRingWriter {
    pub fn create(name: &str) -> Result<Self> {
        Ok(Self {
            seg: ShmSegment::create(name)?,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        self.seg.get().write(frame)
    }

    pub fn write_index(&self) -> u64 {
        self.seg.get().write_index()
    }
}

/// Reader handle over a shared frame ring created elsewhere.
pub struct FrameRingReader {
    seg: ShmSegment<FrameRingLayout>,
}

impl FrameRingReader {
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            seg: ShmSegment::open(name)?,
        })
    }

    pub fn read_latest(&self, out: &mut Frame) -> Result<u64> {
        self.seg.get().read_latest(out)
    }

    pub fn write_index(&self) -> u64 {
        self.seg.get().write_index()
    }
}
