//! # RedLilium Frame
//!
//! Frame-execution core of the RedLilium clustered/tiled deferred renderer.
//!
//! ## Overview
//!
//! Every frame the core decides which GPU work runs, in what order, on which
//! execution domain (the graphics queue or an asynchronous compute queue),
//! and how ownership of shared buffers moves between the two:
//!
//! - [`FrameStageGraph`] - Fixed stage graph per [`CullingMethod`]
//! - [`OwnershipTracker`] - Release/acquire transfers between domains
//! - [`DoubleBuffer`] - Sort output selector shared across frames
//! - [`cluster`] - Sparse cluster page allocation and compaction
//! - [`FrameDriver`] - Acquire, submit, present and recreate loop
//! - [`FrameBackend`] - Trait for GPU backends, with a validating
//!   [`DummyBackend`] for tests
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_frame::{DummyBackend, Extent2d, FrameConfig, FrameDriver, RendererSettings};
//!
//! let backend = DummyBackend::new(Extent2d::new(1920, 1080));
//! let config = FrameConfig::default();
//! let mut driver = FrameDriver::new(backend, RendererSettings::default(), config)?;
//! driver.run_frame(&config, &scene)?;
//! driver.wait_idle()?;
//! ```

pub mod backend;
pub mod bvh;
pub mod cluster;
pub mod command;
pub mod config;
pub mod domain;
pub mod double_buffer;
pub mod driver;
pub mod error;
pub mod graph;
pub mod light;
pub mod ownership;
pub mod pipeline;
pub mod profiling;
pub mod program;
pub mod recorder;
pub mod resource;
pub mod resources;
pub mod scene;
pub mod scheduler;
pub mod sort;

// Re-export main types for convenience
pub use backend::{DummyBackend, FrameBackend, SurfaceEvent, ValidationReport};
pub use config::{CullingMethod, DebugView, FrameConfig, PresentMode, RendererSettings};
pub use domain::{DomainMap, ExecutionDomain, QueueRef, QueueTopology};
pub use double_buffer::{BufferSet, DoubleBuffer};
pub use driver::{DriverState, FrameDriver, FrameOutcome, FrameStats};
pub use error::FrameError;
pub use graph::{FramePhase, FrameStageGraph, GraphError, StageId};
pub use light::{LightRecord, MAX_LIGHTS};
pub use ownership::OwnershipTracker;
pub use resource::{Extent2d, ResourceId};
pub use scene::{CameraPose, GeometryPart, SceneInput};
pub use scheduler::{FrameSlot, SyncPointKey, SyncPointPool};

/// Frame core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the frame core.
///
/// Only logs the version; call it once after the logger is set up.
pub fn init() {
    log::info!("RedLilium Frame v{} initialized", VERSION);
}
