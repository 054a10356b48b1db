//! Double-buffered staging of outgoing frames.

use duocam_types::Frame;
use tracing::debug;

use crate::{Error, Result};

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    /// The downstream consumer (ring buffer writer, encoder, ...) failed.
    /// Never retried here: re-publishing a stale frame is never correct.
    #[error("downstream publish failed: {0}")]
    Downstream(String),
}

/// Caller-supplied publication capability.
///
/// Invoked synchronously; it may block (e.g. while writing to a shared ring
/// or encoding) and it may fail. A failure is reported to the caller but
/// never alters switch decisions. Callers needing bounded latency enforce
/// timeouts inside their implementation.
pub trait FramePublisher {
    fn publish(&mut self, frame: &Frame) -> std::result::Result<(), PublishError>;
}

impl<F> FramePublisher for F
where
    F: FnMut(&Frame) -> std::result::Result<(), PublishError>,
{
    fn publish(&mut self, frame: &Frame) -> std::result::Result<(), PublishError> {
        self(frame)
    }
}

/// Two staging frame slots preventing a reader from ever observing a frame
/// that is still being written.
///
/// Outgoing frames are copied into the slot *not* currently exposed, and
/// only then does `active_slot` flip. The publisher therefore always sees a
/// fully-written frame, even if the source capture buffer is reused by
/// hardware concurrently with the copy.
pub struct FrameDoubleBuffer {
    slots: [Box<Frame>; 2],
    active_slot: usize,
    /// Whether `active_slot` holds a frame published since the last switch.
    valid: bool,
    warmup_remaining: u32,
}

impl Default for FrameDoubleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDoubleBuffer {
    pub fn new() -> Self {
        Self {
            slots: [Frame::boxed(), Frame::boxed()],
            active_slot: 0,
            valid: false,
            warmup_remaining: 0,
        }
    }

    /// Arm warmup gating after a camera switch and invalidate the currently
    /// publishable slot, so the next published frame counts as the first
    /// post-switch frame.
    pub fn reset_for_switch(&mut self, warmup_frames: u32) {
        self.warmup_remaining = warmup_frames;
        self.valid = false;
    }

    /// Stage `frame` and hand it to `publisher`.
    ///
    /// A missing publisher is a contract error and mutates nothing. While
    /// warmup frames remain, the frame is intentionally dropped (success,
    /// publisher not invoked) so the freshly-selected sensor can settle.
    pub fn publish(
        &mut self,
        frame: &Frame,
        publisher: Option<&mut dyn FramePublisher>,
    ) -> Result<()> {
        let Some(publisher) = publisher else {
            return Err(Error::NoPublisher);
        };
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            debug!(
                "dropped warmup frame {} ({} more to drop)",
                frame.frame_number, self.warmup_remaining
            );
            return Ok(());
        }
        let inactive = 1 - self.active_slot;
        self.slots[inactive].copy_from(frame);
        self.active_slot = inactive;
        self.valid = true;
        publisher.publish(&self.slots[self.active_slot])?;
        Ok(())
    }

    /// The frame currently exposed to readers, if any was published since
    /// the last switch.
    pub fn active_frame(&self) -> Option<&Frame> {
        if self.valid {
            Some(&self.slots[self.active_slot])
        } else {
            None
        }
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    pub fn warmup_remaining(&self) -> u32 {
        self.warmup_remaining
    }
}
