//! GPU synchronization primitives.
//!
//! - [`FrameSlot`] - which generation of per-frame resources is in use
//! - [`SyncPointPool`] - cross-stage and cross-domain signals, replicated per
//!   frame slot (and per swapchain image for "render finished")
//! - [`Fence`] - CPU-GPU signal for frame completion

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::graph::StageId;

/// Index of the per-frame resource generation currently in use.
///
/// A `FrameSlot` carries its modulus so slot arithmetic is never recomputed
/// ad hoc from a raw frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot {
    index: u32,
    modulus: u32,
}

impl FrameSlot {
    /// Create a slot.
    ///
    /// # Panics
    ///
    /// Panics if `modulus` is zero or `index >= modulus`.
    pub fn new(index: u32, modulus: u32) -> Self {
        assert!(modulus > 0, "frame slot modulus must be at least 1");
        assert!(index < modulus, "frame slot index out of range");
        Self { index, modulus }
    }

    /// Slot 0 of a pipeline with `modulus` frames in flight.
    pub fn first(modulus: u32) -> Self {
        Self::new(0, modulus)
    }

    /// The following slot, wrapping around.
    pub fn next(self) -> Self {
        Self {
            index: (self.index + 1) % self.modulus,
            modulus: self.modulus,
        }
    }

    /// Slot index (0 to modulus - 1).
    pub fn index(self) -> u32 {
        self.index
    }

    /// Number of frames in flight.
    pub fn modulus(self) -> u32 {
        self.modulus
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.modulus)
    }
}

/// Identity of a sync point within one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPointKey {
    /// Signaled when a stage's submission completes.
    StageDone(StageId),
    /// Signaled by the presentation engine when the acquired image is ready.
    ImageAvailable,
    /// Signaled by composition; presentation waits on it. Replicated per
    /// swapchain image rather than per frame slot.
    RenderFinished,
}

impl fmt::Display for SyncPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageDone(stage) => write!(f, "{}_done", stage.name()),
            Self::ImageAvailable => write!(f, "image_available"),
            Self::RenderFinished => write!(f, "render_finished"),
        }
    }
}

/// A resolved sync point as handed to backends.
///
/// `generation` advances every time the point is reset after being signaled,
/// so a backend can detect a point signaled twice without a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPointRef {
    /// Which point.
    pub key: SyncPointKey,
    /// Frame slot index, or swapchain image index for `RenderFinished`.
    pub index: u32,
    /// Reset generation.
    pub generation: u64,
}

impl fmt::Display for SyncPointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]#{}", self.key, self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct SyncPoint {
    generation: u64,
    signaled: bool,
    waiters: u32,
}

impl SyncPoint {
    fn new() -> Self {
        Self {
            generation: 0,
            signaled: false,
            waiters: 0,
        }
    }

    fn reset(&mut self) {
        if self.signaled {
            self.generation += 1;
        }
        self.signaled = false;
        self.waiters = 0;
    }
}

#[derive(Debug, Clone)]
struct SlotPoints {
    stage_done: Vec<SyncPoint>,
    image_available: SyncPoint,
}

impl SlotPoints {
    fn new() -> Self {
        Self {
            stage_done: (0..StageId::COUNT).map(|_| SyncPoint::new()).collect(),
            image_available: SyncPoint::new(),
        }
    }
}

/// Sync points for every frame slot and swapchain image.
///
/// Each point has at most one signaler and any number of waiters between
/// resets. Signaling twice, or waiting on a point nobody signaled, is a
/// programming error and panics.
#[derive(Debug, Clone)]
pub struct SyncPointPool {
    slots: Vec<SlotPoints>,
    render_finished: Vec<SyncPoint>,
}

impl SyncPointPool {
    /// Create a pool for `frames_in_flight` slots and `image_count` images.
    pub fn new(frames_in_flight: u32, image_count: u32) -> Self {
        Self {
            slots: (0..frames_in_flight).map(|_| SlotPoints::new()).collect(),
            render_finished: (0..image_count).map(|_| SyncPoint::new()).collect(),
        }
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> u32 {
        self.render_finished.len() as u32
    }

    /// Reset every point of a slot. Call only after the slot's fence signaled.
    pub fn reset_slot(&mut self, slot: FrameSlot) {
        let points = &mut self.slots[slot.index() as usize];
        points.stage_done.iter_mut().for_each(SyncPoint::reset);
        points.image_available.reset();
        log::trace!("Reset sync points of slot {}", slot);
    }

    /// Reset the "render finished" point of an image. Call only after the
    /// image was re-acquired (its previous presentation completed).
    pub fn reset_image(&mut self, image: u32) {
        self.render_finished[image as usize].reset();
    }

    fn point_mut(&mut self, key: SyncPointKey, slot: FrameSlot, image: u32) -> (&mut SyncPoint, u32) {
        assert!(
            (slot.index() as usize) < self.slots.len(),
            "Invalid frame slot {slot}"
        );
        match key {
            SyncPointKey::StageDone(stage) => (
                &mut self.slots[slot.index() as usize].stage_done[stage.index()],
                slot.index(),
            ),
            SyncPointKey::ImageAvailable => (
                &mut self.slots[slot.index() as usize].image_available,
                slot.index(),
            ),
            SyncPointKey::RenderFinished => {
                assert!(
                    (image as usize) < self.render_finished.len(),
                    "Invalid swapchain image {image}"
                );
                (&mut self.render_finished[image as usize], image)
            }
        }
    }

    /// Mark a point signaled by the submission being recorded.
    ///
    /// # Panics
    ///
    /// Panics if the point is already signaled in its current generation.
    pub fn signal(&mut self, key: SyncPointKey, slot: FrameSlot, image: u32) -> SyncPointRef {
        let (point, index) = self.point_mut(key, slot, image);
        assert!(
            !point.signaled,
            "SyncPoint {key}[{index}] signaled twice without reset"
        );
        point.signaled = true;
        SyncPointRef {
            key,
            index,
            generation: point.generation,
        }
    }

    /// Register a wait on a point.
    ///
    /// # Panics
    ///
    /// Panics if no submission signaled the point in its current generation.
    pub fn wait(&mut self, key: SyncPointKey, slot: FrameSlot, image: u32) -> SyncPointRef {
        let (point, index) = self.point_mut(key, slot, image);
        assert!(
            point.signaled,
            "SyncPoint {key}[{index}] waited on but never signaled"
        );
        point.waiters += 1;
        SyncPointRef {
            key,
            index,
            generation: point.generation,
        }
    }

    /// Whether a point is currently signaled.
    pub fn is_signaled(&self, key: SyncPointKey, slot: FrameSlot, image: u32) -> bool {
        let point = match key {
            SyncPointKey::StageDone(stage) => {
                &self.slots[slot.index() as usize].stage_done[stage.index()]
            }
            SyncPointKey::ImageAvailable => &self.slots[slot.index() as usize].image_available,
            SyncPointKey::RenderFinished => &self.render_finished[image as usize],
        };
        point.signaled
    }

    /// Number of waits registered on a point since its last reset.
    pub fn waiter_count(&self, key: SyncPointKey, slot: FrameSlot, image: u32) -> u32 {
        match key {
            SyncPointKey::StageDone(stage) => {
                self.slots[slot.index() as usize].stage_done[stage.index()].waiters
            }
            SyncPointKey::ImageAvailable => self.slots[slot.index() as usize].image_available.waiters,
            SyncPointKey::RenderFinished => self.render_finished[image as usize].waiters,
        }
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// The frame's final submission carries a fence; the host waits on it
/// before reusing the frame slot's command streams, staging memory and sync
/// points.
#[derive(Debug)]
pub struct Fence {
    signaled: Arc<AtomicBool>,
}

impl Fence {
    /// Create a new fence in the unsignaled state.
    pub fn new_unsignaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a new fence in the signaled state.
    pub fn new_signaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if self.signaled.load(Ordering::Acquire) {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Wait for the fence to be signaled (blocking).
    pub fn wait(&self) {
        while !self.signaled.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }

    /// Signal the fence. Called by backends once the fenced work completed.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

impl Clone for Fence {
    fn clone(&self) -> Self {
        Self {
            signaled: Arc::clone(&self.signaled),
        }
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new_unsignaled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_slot_wraps() {
        let slot = FrameSlot::first(2);
        assert_eq!(slot.index(), 0);
        assert_eq!(slot.next().index(), 1);
        assert_eq!(slot.next().next(), slot);
    }

    #[test]
    #[should_panic(expected = "frame slot index out of range")]
    fn test_frame_slot_out_of_range() {
        FrameSlot::new(2, 2);
    }

    #[test]
    fn test_signal_then_wait() {
        let mut pool = SyncPointPool::new(2, 3);
        let slot = FrameSlot::first(2);
        let key = SyncPointKey::StageDone(StageId::GBufferFill);

        let signaled = pool.signal(key, slot, 0);
        let waited = pool.wait(key, slot, 0);
        pool.wait(key, slot, 0);

        assert_eq!(signaled, waited);
        assert_eq!(pool.waiter_count(key, slot, 0), 2);
    }

    #[test]
    #[should_panic(expected = "signaled twice without reset")]
    fn test_double_signal_panics() {
        let mut pool = SyncPointPool::new(1, 1);
        let slot = FrameSlot::first(1);
        pool.signal(SyncPointKey::ImageAvailable, slot, 0);
        pool.signal(SyncPointKey::ImageAvailable, slot, 0);
    }

    #[test]
    #[should_panic(expected = "never signaled")]
    fn test_wait_unsignaled_panics() {
        let mut pool = SyncPointPool::new(1, 1);
        pool.wait(
            SyncPointKey::StageDone(StageId::LightCull),
            FrameSlot::first(1),
            0,
        );
    }

    #[test]
    fn test_reset_advances_generation() {
        let mut pool = SyncPointPool::new(2, 2);
        let slot = FrameSlot::new(1, 2);
        let key = SyncPointKey::StageDone(StageId::LightSort);

        let first = pool.signal(key, slot, 0);
        pool.reset_slot(slot);
        assert!(!pool.is_signaled(key, slot, 0));
        let second = pool.signal(key, slot, 0);

        assert_eq!(second.generation, first.generation + 1);
    }

    #[test]
    fn test_slots_are_independent() {
        let mut pool = SyncPointPool::new(2, 2);
        let key = SyncPointKey::ImageAvailable;
        pool.signal(key, FrameSlot::new(0, 2), 0);
        assert!(!pool.is_signaled(key, FrameSlot::new(1, 2), 0));
    }

    #[test]
    fn test_render_finished_is_per_image() {
        let mut pool = SyncPointPool::new(2, 3);
        let slot = FrameSlot::first(2);
        let a = pool.signal(SyncPointKey::RenderFinished, slot, 0);
        let b = pool.signal(SyncPointKey::RenderFinished, slot, 2);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 2);

        pool.reset_slot(slot);
        assert!(pool.is_signaled(SyncPointKey::RenderFinished, slot, 0));
        pool.reset_image(0);
        assert!(!pool.is_signaled(SyncPointKey::RenderFinished, slot, 0));
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let fence = Fence::new_unsignaled();

        let fence_clone = fence.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            fence_clone.signal();
        });

        fence.wait();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_fence_clone_shares_state() {
        let fence1 = Fence::new_unsignaled();
        let fence2 = fence1.clone();
        assert_eq!(fence2.status(), FenceStatus::Unsignaled);

        fence1.signal();
        assert!(fence2.is_signaled());
        assert!(Fence::new_signaled().is_signaled());
    }
}
