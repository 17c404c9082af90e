//! Stage definitions for the frame stage graph.

use std::fmt;

use crate::command::{AccessFlags, PipelineStages};
use crate::config::CullingMethod;
use crate::domain::ExecutionDomain;
use crate::program::ProgramId;
use crate::scheduler::SyncPointKey;

/// Every stage a frame can contain.
///
/// Which stages exist depends on the culling method; see
/// [`FrameStageGraph::build`](super::FrameStageGraph::build).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    /// Returns buffers the primary domain consumed last frame to the async
    /// domain at the start of the frame.
    Handoff,
    /// Geometry pass writing the G-buffer.
    GBufferFill,
    /// Copy of the frame's staging area into device-local light storage.
    LightCopy,
    /// Bitonic sort of lights by Morton key.
    LightSort,
    /// Bottom-up BVH over the sorted lights.
    BvhBuild,
    /// Flag, allocate, store and compact depth clusters.
    ClusterPageBuild,
    /// Rebuild of the screen-space tile grid.
    TiledCull,
    /// Indirect light culling against the compacted cluster list.
    LightCull,
    /// Deferred composition into the swapchain image.
    Composition,
}

impl StageId {
    /// Number of stages.
    pub const COUNT: usize = 9;

    /// All stages, in index order.
    pub const ALL: [StageId; Self::COUNT] = [
        Self::Handoff,
        Self::GBufferFill,
        Self::LightCopy,
        Self::LightSort,
        Self::BvhBuild,
        Self::ClusterPageBuild,
        Self::TiledCull,
        Self::LightCull,
        Self::Composition,
    ];

    /// Dense index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Debug name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::GBufferFill => "gbuffer_fill",
            Self::LightCopy => "light_copy",
            Self::LightSort => "light_sort",
            Self::BvhBuild => "bvh_build",
            Self::ClusterPageBuild => "cluster_page_build",
            Self::TiledCull => "tiled_cull",
            Self::LightCull => "light_cull",
            Self::Composition => "composition",
        }
    }

    /// Programs the stage records with under `method`.
    pub fn programs(self, method: CullingMethod) -> &'static [ProgramId] {
        match self {
            Self::Handoff | Self::LightCopy => &[],
            Self::GBufferFill => &[ProgramId::GBufferFill],
            Self::LightSort => &[ProgramId::LightSortBlock, ProgramId::LightSortMerge],
            Self::BvhBuild => &[ProgramId::BvhBuild],
            Self::ClusterPageBuild => &[
                ProgramId::ClusterFlag,
                ProgramId::ClusterAlloc,
                ProgramId::ClusterStore,
                ProgramId::ClusterCompact,
            ],
            Self::TiledCull => &[ProgramId::TiledCull],
            Self::LightCull => &[ProgramId::LightCull],
            Self::Composition => match method {
                CullingMethod::None => &[ProgramId::CompositionUnculled, ProgramId::DebugView],
                CullingMethod::Tiled => &[ProgramId::CompositionTiled, ProgramId::DebugView],
                CullingMethod::Clustered => {
                    &[ProgramId::CompositionClustered, ProgramId::DebugView]
                }
            },
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver state in which a stage is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FramePhase {
    /// Submitted right after image acquisition.
    GBuffer,
    /// The mode-dependent culling graph.
    Culling,
    /// Final composition carrying the frame fence.
    Composition,
}

impl FramePhase {
    /// All phases in submission order.
    pub const ALL: [FramePhase; 3] = [Self::GBuffer, Self::Culling, Self::Composition];
}

/// Logical shared buffers moved between domains by the stage graph.
///
/// The frame resources expand each into concrete resource handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedBuffer {
    /// Device-local light list filled from staging.
    LightBuffer,
    /// The sorted light output most recently written: the double buffer's
    /// read set at the time the handoff is recorded.
    SortedLights,
    /// BVH node storage.
    BvhNodes,
}

/// A wait on a sync point before a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageWait {
    /// Waited sync point.
    pub key: SyncPointKey,
    /// Earliest pipeline point that needs the data.
    pub at: PipelineStages,
}

impl StageWait {
    /// Stage whose completion is waited on, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self.key {
            SyncPointKey::StageDone(stage) => Some(stage),
            _ => None,
        }
    }
}

/// Ownership handoff recorded at the end of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    /// Transferred buffers.
    pub buffer: SharedBuffer,
    /// Receiving stage. Must wait on the releasing stage.
    pub to: StageId,
    /// Last access before the transfer.
    pub before: AccessFlags,
    /// First access after the transfer.
    pub after: AccessFlags,
}

/// A node of the frame stage graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    id: StageId,
    domain: ExecutionDomain,
    phase: FramePhase,
    waits: Vec<StageWait>,
    signals: Vec<SyncPointKey>,
    handoffs: Vec<Handoff>,
}

impl Stage {
    /// Create a stage that signals its own completion.
    pub fn new(id: StageId, domain: ExecutionDomain, phase: FramePhase) -> Self {
        Self {
            id,
            domain,
            phase,
            waits: Vec::new(),
            signals: vec![SyncPointKey::StageDone(id)],
            handoffs: Vec::new(),
        }
    }

    /// Wait for another stage's completion at pipeline point `at`.
    pub fn after(mut self, stage: StageId, at: PipelineStages) -> Self {
        self.waits.push(StageWait {
            key: SyncPointKey::StageDone(stage),
            at,
        });
        self
    }

    /// Wait for an external sync point at pipeline point `at`.
    pub fn wait_on(mut self, key: SyncPointKey, at: PipelineStages) -> Self {
        self.waits.push(StageWait { key, at });
        self
    }

    /// Signal an additional sync point.
    pub fn signal(mut self, key: SyncPointKey) -> Self {
        self.signals.push(key);
        self
    }

    /// Hand `buffer` over to stage `to` at the end of this stage.
    pub fn hand_off(
        mut self,
        buffer: SharedBuffer,
        to: StageId,
        before: AccessFlags,
        after: AccessFlags,
    ) -> Self {
        self.handoffs.push(Handoff {
            buffer,
            to,
            before,
            after,
        });
        self
    }

    /// Stage identifier.
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Execution domain.
    pub fn domain(&self) -> ExecutionDomain {
        self.domain
    }

    /// Submission phase.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Waits, in declaration order.
    pub fn waits(&self) -> &[StageWait] {
        &self.waits
    }

    /// Signaled sync points.
    pub fn signals(&self) -> &[SyncPointKey] {
        &self.signals
    }

    /// Handoffs released at the end of the stage.
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Stages this one waits on.
    pub fn dependencies(&self) -> impl Iterator<Item = StageId> + '_ {
        self.waits.iter().filter_map(StageWait::stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids_dense() {
        for (i, id) in StageId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_stage_builder() {
        let stage = Stage::new(StageId::LightCull, ExecutionDomain::Primary, FramePhase::Culling)
            .after(StageId::BvhBuild, PipelineStages::COMPUTE_SHADER)
            .wait_on(
                SyncPointKey::ImageAvailable,
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            );

        assert_eq!(stage.signals(), &[SyncPointKey::StageDone(StageId::LightCull)]);
        assert_eq!(
            stage.dependencies().collect::<Vec<_>>(),
            vec![StageId::BvhBuild]
        );
        assert_eq!(stage.waits().len(), 2);
    }

    #[test]
    fn test_composition_programs_follow_method() {
        assert_eq!(
            StageId::Composition.programs(CullingMethod::Tiled)[0],
            ProgramId::CompositionTiled
        );
        assert!(StageId::LightCopy.programs(CullingMethod::Clustered).is_empty());
    }
}
