//! GPU backend abstraction layer.
//!
//! The frame core records backend-agnostic [`CommandStream`](crate::command::CommandStream)s
//! and hands them to a [`FrameBackend`] as [`Submission`]s. Backends own
//! every native object: swapchain, queues, semaphores behind sync points,
//! buffers and programs.
//!
//! # Available Backends
//!
//! - [`DummyBackend`]: executes streams on the CPU and validates sync
//!   points, queue ownership and resource accesses. Used by tests and the
//!   `frame-sim` binary.
//! - `vulkan::VulkanBackend` (feature `vulkan-backend`): encodes streams
//!   into Vulkan command buffers through `ash`, with queue family ownership
//!   transfers, timeline semaphores behind sync points and gpu-allocator
//!   memory.

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::{
    DummyBackend, DummyHandle, IndirectDispatchRecord, SubmissionRecord, SurfaceEvent,
    ValidationReport,
};

use crate::command::Binding;
use crate::config::PresentMode;
use crate::domain::DomainMap;
use crate::error::FrameError;
use crate::program::{ProgramHandle, ProgramId};
use crate::resource::{Extent2d, ResourceArena, ResourceId};
use crate::scheduler::{Submission, SyncPointRef};

/// Swapchain properties after (re)creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// Image extent.
    pub extent: Extent2d,
    /// Number of swapchain images.
    pub image_count: u32,
}

/// Operations the frame driver needs from a GPU backend.
///
/// Errors follow [`FrameError`]: `SurfaceOutdated` is recoverable by
/// recreating the swapchain, everything else is fatal.
pub trait FrameBackend {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Queues the backend resolved for the two execution domains.
    fn domain_map(&self) -> DomainMap;

    /// Create (or recreate) every resource of the arena. Called while idle.
    fn create_resources(&mut self, arena: &ResourceArena) -> Result<(), FrameError>;

    /// Build a program from its shader identifier and interface bindings.
    fn create_program(
        &mut self,
        id: ProgramId,
        bindings: &'static [Binding],
    ) -> Result<ProgramHandle, FrameError>;

    /// Recreate the swapchain. Called while idle, with a non-zero extent.
    fn recreate_swapchain(
        &mut self,
        extent: Extent2d,
        present_mode: PresentMode,
    ) -> Result<SwapchainInfo, FrameError>;

    /// Current surface extent. Zero while the window is minimized.
    fn surface_extent(&self) -> Extent2d;

    /// Block until the windowing system reports an event and return the
    /// surface extent afterwards.
    fn wait_surface_events(&mut self) -> Extent2d;

    /// Write light data into a host-visible staging buffer.
    fn write_staging(&mut self, staging: ResourceId, data: &[u8]) -> Result<(), FrameError>;

    /// Acquire the next swapchain image, signaling `signal` once it is ready.
    fn acquire_image(&mut self, signal: SyncPointRef) -> Result<u32, FrameError>;

    /// Submit one stage's commands to the queue of its domain.
    fn submit(&mut self, submission: Submission) -> Result<(), FrameError>;

    /// Present `image` once `wait` is signaled.
    fn present(&mut self, image: u32, wait: SyncPointRef) -> Result<(), FrameError>;

    /// Wait until every queue is idle.
    fn wait_idle(&mut self) -> Result<(), FrameError>;
}
