//! Frame core error types.

use thiserror::Error;

use crate::graph::GraphError;

/// Errors that can occur while driving frames.
///
/// Only [`SurfaceOutdated`](FrameError::SurfaceOutdated) is recovered from
/// inside the frame loop (it triggers a full swapchain recreation). Every
/// other variant is propagated to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The surface is outdated and needs to be reconfigured.
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated by the caller.
    #[error("surface lost, needs recreation")]
    SurfaceLost,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// No queue family / feature combination can run the frame graph.
    #[error("no suitable queue: {0}")]
    NoSuitableQueue(String),
    /// The frame configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Failed to create a GPU resource or program.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// The stage graph failed validation.
    #[error("stage graph invalid: {0}")]
    Graph(#[from] GraphError),
    /// An internal backend error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FrameError {
    /// Whether the frame loop recovers from this error by recreating the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceOutdated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = FrameError::NoSuitableQueue("no compute family".to_string());
        assert_eq!(err.to_string(), "no suitable queue: no compute family");
    }

    #[test]
    fn test_only_outdated_is_recoverable() {
        assert!(FrameError::SurfaceOutdated.is_recoverable());
        assert!(!FrameError::SurfaceLost.is_recoverable());
        assert!(!FrameError::DeviceLost.is_recoverable());
        assert!(!FrameError::Internal("boom".into()).is_recoverable());
    }

    #[test]
    fn test_graph_error_converts() {
        let err: FrameError = GraphError::CyclicDependency.into();
        assert!(matches!(err, FrameError::Graph(GraphError::CyclicDependency)));
    }
}
