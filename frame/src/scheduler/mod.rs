//! Frame scheduling and per-stage submission.
//!
//! A [`FrameSchedule`] turns the recorded command streams of one frame into
//! queue submissions. Every submission names the sync points it waits on and
//! the ones it signals, resolved against the frame's [`SyncPointPool`]:
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | Frames in flight, fence waits |
//! | **Schedule** | [`FrameSchedule`] | Per-stage submissions (this module) |
//! | Graph | [`FrameStageGraph`](crate::graph::FrameStageGraph) | Stage order and waits |
//! | Stream | [`CommandStream`] | Commands of one stage |
//!
//! Waits are resolved before signals, so a submission can never wait on a
//! point it signals itself. Waiting on a point nothing signaled yet panics:
//! the graph's topological order guarantees the producer is submitted first.
//!
//! # Example
//!
//! ```ignore
//! let mut schedule = FrameSchedule::new(slot, image);
//! for stage in graph.stages() {
//!     let stream = streams.take(stage.id());
//!     if stage.id() == StageId::Composition {
//!         schedule.present(&mut pool, stage, stream);
//!     } else {
//!         schedule.submit(&mut pool, stage, stream);
//!     }
//! }
//! let fence = schedule.take_fence();
//! ```

mod sync;

pub use sync::{Fence, FenceStatus, FrameSlot, SyncPointKey, SyncPointPool, SyncPointRef};

use crate::command::{CommandStream, PipelineStages};
use crate::domain::ExecutionDomain;
use crate::graph::{Stage, StageId};

/// One queue submission: a stage's commands plus its sync points.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Commands to execute.
    pub stream: CommandStream,
    /// Sync points to wait on, with the pipeline stage the wait blocks.
    pub waits: Vec<(SyncPointRef, PipelineStages)>,
    /// Sync points signaled on completion.
    pub signals: Vec<SyncPointRef>,
    /// Fence signaled on completion, set on the final submission.
    pub fence: Option<Fence>,
}

impl Submission {
    /// Stage the submission belongs to.
    pub fn stage(&self) -> StageId {
        self.stream.stage()
    }

    /// Domain the submission executes on.
    pub fn domain(&self) -> ExecutionDomain {
        self.stream.domain()
    }
}

/// Per-frame submission list.
///
/// Submissions are queued in stage order and drained by the driver in
/// batches, one per frame phase.
#[derive(Debug)]
pub struct FrameSchedule {
    slot: FrameSlot,
    image: u32,
    submitted: Vec<StageId>,
    pending: Vec<Submission>,
    fence: Option<Fence>,
}

impl FrameSchedule {
    /// Create an empty schedule for a frame slot and acquired image.
    pub fn new(slot: FrameSlot, image: u32) -> Self {
        Self {
            slot,
            image,
            submitted: Vec::new(),
            pending: Vec::new(),
            fence: None,
        }
    }

    /// Frame slot of the schedule.
    pub fn slot(&self) -> FrameSlot {
        self.slot
    }

    /// Swapchain image the frame renders into.
    pub fn image(&self) -> u32 {
        self.image
    }

    /// Queue a stage's stream for submission.
    ///
    /// # Panics
    ///
    /// Panics if the stream was recorded for a different stage or domain,
    /// if the schedule was already presented, or if a waited sync point was
    /// never signaled.
    pub fn submit(&mut self, pool: &mut SyncPointPool, stage: &Stage, stream: CommandStream) {
        assert!(
            self.fence.is_none(),
            "submit() called after present() on this schedule"
        );
        let submission = self.resolve(pool, stage, stream);
        log::trace!(
            "Submitted stage '{}' on {} (waiting for {} sync points, signaling {})",
            stage.id(),
            stage.domain(),
            submission.waits.len(),
            submission.signals.len()
        );
        self.submitted.push(stage.id());
        self.pending.push(submission);
    }

    /// Queue the final stage of the frame and attach the frame fence.
    ///
    /// # Panics
    ///
    /// Panics if `present` has already been called on this schedule, plus
    /// the conditions of [`submit`](Self::submit).
    pub fn present(&mut self, pool: &mut SyncPointPool, stage: &Stage, stream: CommandStream) {
        assert!(
            self.fence.is_none(),
            "present() has already been called on this schedule"
        );
        let fence = Fence::new_unsignaled();
        let mut submission = self.resolve(pool, stage, stream);
        submission.fence = Some(fence.clone());
        log::trace!(
            "Submitted present stage '{}' on {} (waiting for {} sync points)",
            stage.id(),
            stage.domain(),
            submission.waits.len()
        );
        self.submitted.push(stage.id());
        self.pending.push(submission);
        self.fence = Some(fence);
    }

    fn resolve(&self, pool: &mut SyncPointPool, stage: &Stage, stream: CommandStream) -> Submission {
        assert_eq!(
            stream.stage(),
            stage.id(),
            "Stream recorded for '{}' submitted as '{}'",
            stream.stage(),
            stage.id()
        );
        assert_eq!(
            stream.domain(),
            stage.domain(),
            "Stream for '{}' recorded on the wrong domain",
            stage.id()
        );
        let waits = stage
            .waits()
            .iter()
            .map(|wait| (pool.wait(wait.key, self.slot, self.image), wait.at))
            .collect();
        let signals = stage
            .signals()
            .iter()
            .map(|&key| pool.signal(key, self.slot, self.image))
            .collect();
        Submission {
            stream,
            waits,
            signals,
            fence: None,
        }
    }

    /// Remove and return the submissions queued since the last drain.
    pub fn drain(&mut self) -> Vec<Submission> {
        std::mem::take(&mut self.pending)
    }

    /// Number of stages submitted so far.
    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    /// Check if the schedule has been presented.
    pub fn is_presented(&self) -> bool {
        self.fence.is_some()
    }

    /// Names of all submitted stages in submission order.
    pub fn submitted_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.submitted.iter().map(|id| id.name())
    }

    /// Extract the frame fence.
    ///
    /// # Panics
    ///
    /// Panics if `present()` was not called.
    pub fn take_fence(&mut self) -> Fence {
        match self.fence.take() {
            Some(fence) => fence,
            None => panic!("present() must be called before end_frame()"),
        }
    }
}
