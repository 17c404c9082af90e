//! Frames in flight.
//!
//! [`FramePipeline`] owns one fence per frame slot. Starting a frame waits
//! for the fence of the slot it is about to reuse, which is the only point
//! the CPU blocks on the GPU during steady-state rendering:
//!
//! ```text
//! Frame 0: [record] [submit] ───────────────────────────────────────────►
//!                            [GPU frame 0] ─────────────────────────────►
//!
//! Frame 1:           [record] [submit] ─────────────────────────────────►
//!                                      [GPU frame 1] ───────────────────►
//!
//! Frame 2:                    [wait F0] [record] [submit] ──────────────►
//!                                                [GPU frame 2] ─────────►
//! ```
//!
//! Per-slot resources (staging buffers, sync points) may only be touched
//! after [`begin_frame`](FramePipeline::begin_frame) returned their slot.
//!
//! # Graceful Shutdown
//!
//! Call [`FramePipeline::wait_idle`] before destroying frame resources, and
//! before recreating the swapchain.
//!
//! # Choosing Frames in Flight
//!
//! | Count | Behavior |
//! |-------|----------|
//! | 1 | CPU waits for GPU every frame. |
//! | 2 | CPU records frame N+1 while GPU renders N. |

use crate::scheduler::{Fence, FrameSlot};

/// Manages multiple frames in flight for CPU-GPU parallelism.
///
/// ```text
/// frames_in_flight = 2
///
/// Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
/// Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
/// ```
///
/// `FramePipeline` is **not thread-safe**. It should be owned by the thread
/// that drives the frame loop.
#[derive(Debug)]
pub struct FramePipeline {
    /// Fences for each frame slot. `None` if slot hasn't been used yet.
    frame_fences: Vec<Option<Fence>>,

    /// Slot of the frame being recorded.
    current_slot: FrameSlot,

    /// Total frames started.
    frame_count: u64,
}

impl FramePipeline {
    /// Create a new frame pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(frames_in_flight: u32) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            frame_fences: (0..frames_in_flight).map(|_| None).collect(),
            current_slot: FrameSlot::first(frames_in_flight),
            frame_count: 0,
        }
    }

    /// Begin a new frame and return its slot.
    ///
    /// Blocks until the GPU finished the previous frame recorded in the slot.
    pub fn begin_frame(&mut self) -> FrameSlot {
        if let Some(fence) = &self.frame_fences[self.current_slot.index() as usize] {
            fence.wait();
        }

        self.frame_count += 1;

        log::trace!(
            "Begin frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
        self.current_slot
    }

    /// End the current frame.
    ///
    /// Records the frame fence for the slot and advances to the next slot.
    pub fn end_frame(&mut self, fence: Fence) {
        log::trace!(
            "End frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );

        self.frame_fences[self.current_slot.index() as usize] = Some(fence);
        self.current_slot = self.current_slot.next();
    }

    /// Give up on the current frame without advancing the slot.
    ///
    /// Used when acquisition fails; the slot's previous fence already
    /// signaled, so the next `begin_frame` returns the same slot at once.
    pub fn abandon_frame(&mut self) {
        log::trace!(
            "Abandon frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
    }

    /// Wait for all in-flight GPU work to complete.
    pub fn wait_idle(&self) {
        log::trace!("Waiting for GPU idle ({} slots)", self.frame_fences.len());

        for (i, fence) in self.frame_fences.iter().enumerate() {
            if let Some(f) = fence {
                log::trace!("Waiting for slot {}...", i);
                f.wait();
            }
        }

        log::trace!("GPU idle");
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(&self) -> u32 {
        self.frame_fences.len() as u32
    }

    /// Slot of the frame being recorded (or the next one).
    pub fn current_slot(&self) -> FrameSlot {
        self.current_slot
    }

    /// Total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Check if a frame slot is ready (non-blocking).
    pub fn is_slot_ready(&self, slot: FrameSlot) -> bool {
        assert!(
            (slot.index() as usize) < self.frame_fences.len(),
            "Invalid slot index"
        );

        match &self.frame_fences[slot.index() as usize] {
            Some(fence) => fence.is_signaled(),
            None => true,
        }
    }

    /// Check if all frame slots are ready (non-blocking).
    pub fn is_idle(&self) -> bool {
        self.frame_fences
            .iter()
            .all(|f| f.as_ref().is_none_or(|fence| fence.is_signaled()))
    }
}

impl Default for FramePipeline {
    /// Creates a pipeline with 2 frames in flight.
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signaled() -> Fence {
        Fence::new_signaled()
    }

    #[test]
    fn test_new() {
        let pipeline = FramePipeline::new(2);
        assert_eq!(pipeline.frames_in_flight(), 2);
        assert_eq!(pipeline.current_slot(), FrameSlot::first(2));
        assert_eq!(pipeline.frame_count(), 0);
    }

    #[test]
    #[should_panic(expected = "frames_in_flight must be at least 1")]
    fn test_zero_frames_panics() {
        FramePipeline::new(0);
    }

    #[test]
    fn test_end_frame_advances_slot() {
        let mut pipeline = FramePipeline::new(2);
        assert_eq!(pipeline.begin_frame().index(), 0);
        pipeline.end_frame(signaled());
        assert_eq!(pipeline.begin_frame().index(), 1);
        pipeline.end_frame(signaled());
        assert_eq!(pipeline.begin_frame().index(), 0);
        assert_eq!(pipeline.frame_count(), 3);
    }

    #[test]
    fn test_abandon_keeps_slot() {
        let mut pipeline = FramePipeline::new(2);
        let slot = pipeline.begin_frame();
        pipeline.abandon_frame();
        assert_eq!(pipeline.begin_frame(), slot);
    }

    #[test]
    fn test_single_frame_in_flight_reuses_slot() {
        let mut pipeline = FramePipeline::new(1);
        for _ in 0..3 {
            assert_eq!(pipeline.begin_frame().index(), 0);
            pipeline.end_frame(signaled());
        }
    }

    #[test]
    fn test_slot_not_ready_until_fence_signals() {
        let mut pipeline = FramePipeline::new(2);
        let slot = pipeline.begin_frame();
        let fence = Fence::new_unsignaled();
        pipeline.end_frame(fence.clone());
        assert!(!pipeline.is_slot_ready(slot));
        assert!(!pipeline.is_idle());

        fence.signal();
        assert!(pipeline.is_slot_ready(slot));
        pipeline.wait_idle();
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_begin_frame_waits_on_other_thread_signal() {
        let mut pipeline = FramePipeline::new(1);
        pipeline.begin_frame();
        let fence = Fence::new_unsignaled();
        pipeline.end_frame(fence.clone());

        let signaler = std::thread::spawn(move || fence.signal());
        pipeline.begin_frame();
        signaler.join().unwrap();
        assert!(pipeline.is_idle());
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_is_slot_ready_invalid() {
        let pipeline = FramePipeline::new(2);
        pipeline.is_slot_ready(FrameSlot::new(2, 3));
    }
}
