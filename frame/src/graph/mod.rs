//! Frame stage graph.
//!
//! The stage graph is the fixed list of GPU work items for one culling
//! method, with wait/signal edges between them. It is built once per
//! method and rebuilt whenever the method changes, the surface is resized,
//! or shaders are reloaded.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | Frames in flight |
//! | Schedule | [`FrameSchedule`](crate::scheduler::FrameSchedule) | Per-frame submission and sync points |
//! | **Graph** | [`FrameStageGraph`] | Stage dependencies (this module) |
//! | Stage | [`Stage`] | One submission on one domain |
//!
//! # Graphs
//!
//! ```text
//! None:       GBufferFill ──────────────────────────────────────────────▶ Composition
//!
//! Tiled:      Handoff ─▶ LightCopy ─▶ TiledCull ─▶ Composition
//!             GBufferFill ──────────────┴──────────────┘
//!
//! Clustered:  LightCopy ─▶ LightSort ─▶ BvhBuild ─▶ LightCull ─▶ Composition
//!             Handoff ──────────────────────┘
//!                                                       ▲             ▲
//!             GBufferFill ─▶ ClusterPageBuild ──────────┴─────────────┘
//! ```
//!
//! In the clustered graph the sort scratch keys never leave the async
//! domain. Only the sorted light output and the BVH nodes cross to the
//! primary domain, and `Handoff` returns last frame's output to `BvhBuild`.
//! `LightSort` writes the output instance the previous frame did not
//! consume, so it never waits on primary work.
//!
//! Every edge carries the pipeline point at which the wait applies, always
//! the earliest point that reads the data. Stages on the async domain are
//! `LightCopy`, `LightSort` and `BvhBuild`; everything else runs on the
//! primary domain.

mod stage;

pub use stage::{FramePhase, Handoff, SharedBuffer, Stage, StageId, StageWait};

use std::collections::VecDeque;

use thiserror::Error;

use crate::command::{AccessFlags, PipelineStages};
use crate::config::CullingMethod;
use crate::domain::ExecutionDomain;
use crate::program::ProgramId;
use crate::scheduler::SyncPointKey;

/// Errors that can occur while building a stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The graph contains a cycle.
    #[error("stage graph contains cyclic dependency")]
    CyclicDependency,
    /// A stage appears twice.
    #[error("stage '{0}' added twice")]
    DuplicateStage(StageId),
    /// A wait or handoff names a stage that is not in the graph.
    #[error("stage '{0}' references missing stage '{1}'")]
    MissingStage(StageId, StageId),
    /// A handoff target does not wait on the releasing stage.
    #[error("handoff from '{0}' to '{1}' is not ordered by a wait")]
    UnorderedHandoff(StageId, StageId),
    /// A stage waits on a stage submitted in a later phase.
    #[error("stage '{0}' waits on '{1}' from a later phase")]
    PhaseOrder(StageId, StageId),
    /// The graph has no composition stage.
    #[error("stage graph has no composition stage")]
    MissingComposition,
    /// A stage's completion is not covered by the frame fence.
    #[error("stage '{0}' is not an ancestor of composition")]
    Unreachable(StageId),
}

/// Validated stage graph for one culling method.
#[derive(Debug, Clone)]
pub struct FrameStageGraph {
    method: CullingMethod,
    /// Stages in topological (submission) order.
    stages: Vec<Stage>,
    /// Position of each stage in `stages`.
    lookup: [Option<usize>; StageId::COUNT],
}

impl FrameStageGraph {
    /// Build the fixed stage graph of a culling method.
    pub fn build(method: CullingMethod) -> Result<Self, GraphError> {
        use ExecutionDomain::{Async, Primary};
        use FramePhase::{Composition, Culling, GBuffer};
        use PipelineStages as P;

        let gbuffer = Stage::new(StageId::GBufferFill, Primary, GBuffer);
        let composition = Stage::new(StageId::Composition, Primary, Composition)
            .after(StageId::GBufferFill, P::FRAGMENT_SHADER)
            .wait_on(SyncPointKey::ImageAvailable, P::COLOR_ATTACHMENT_OUTPUT)
            .signal(SyncPointKey::RenderFinished);

        let stages = match method {
            CullingMethod::None => vec![gbuffer, composition],
            CullingMethod::Tiled => vec![
                Stage::new(StageId::Handoff, Primary, GBuffer).hand_off(
                    SharedBuffer::LightBuffer,
                    StageId::LightCopy,
                    AccessFlags::SHADER_READ,
                    AccessFlags::TRANSFER_WRITE,
                ),
                gbuffer,
                Stage::new(StageId::LightCopy, Async, Culling)
                    .after(StageId::Handoff, P::TRANSFER)
                    .hand_off(
                        SharedBuffer::LightBuffer,
                        StageId::TiledCull,
                        AccessFlags::TRANSFER_WRITE,
                        AccessFlags::SHADER_READ,
                    ),
                Stage::new(StageId::TiledCull, Primary, Culling)
                    .after(StageId::GBufferFill, P::COMPUTE_SHADER)
                    .after(StageId::LightCopy, P::COMPUTE_SHADER),
                composition.after(StageId::TiledCull, P::FRAGMENT_SHADER),
            ],
            CullingMethod::Clustered => vec![
                Stage::new(StageId::Handoff, Primary, GBuffer)
                    .hand_off(
                        SharedBuffer::SortedLights,
                        StageId::BvhBuild,
                        AccessFlags::SHADER_READ,
                        AccessFlags::SHADER_WRITE,
                    )
                    .hand_off(
                        SharedBuffer::BvhNodes,
                        StageId::BvhBuild,
                        AccessFlags::SHADER_READ,
                        AccessFlags::SHADER_WRITE,
                    ),
                gbuffer,
                Stage::new(StageId::LightCopy, Async, Culling),
                Stage::new(StageId::LightSort, Async, Culling)
                    .after(StageId::LightCopy, P::COMPUTE_SHADER),
                Stage::new(StageId::BvhBuild, Async, Culling)
                    .after(StageId::LightSort, P::COMPUTE_SHADER)
                    .after(StageId::Handoff, P::COMPUTE_SHADER)
                    .hand_off(
                        SharedBuffer::SortedLights,
                        StageId::LightCull,
                        AccessFlags::SHADER_READ_WRITE,
                        AccessFlags::SHADER_READ,
                    )
                    .hand_off(
                        SharedBuffer::BvhNodes,
                        StageId::LightCull,
                        AccessFlags::SHADER_WRITE,
                        AccessFlags::SHADER_READ,
                    ),
                Stage::new(StageId::ClusterPageBuild, Primary, Culling)
                    .after(StageId::GBufferFill, P::COMPUTE_SHADER),
                Stage::new(StageId::LightCull, Primary, Culling)
                    .after(StageId::BvhBuild, P::COMPUTE_SHADER)
                    .after(StageId::ClusterPageBuild, P::DRAW_INDIRECT),
                composition
                    .after(StageId::LightCull, P::FRAGMENT_SHADER)
                    .after(StageId::ClusterPageBuild, P::FRAGMENT_SHADER),
            ],
        };

        let graph = Self::from_stages(method, stages)?;
        log::debug!(
            "Built {} stage graph: {}",
            method,
            graph
                .stages
                .iter()
                .map(|s| s.id().name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(graph)
    }

    /// Validate `stages` and order them topologically.
    ///
    /// Ties are broken by declaration order, so stages without mutual
    /// dependencies are submitted in the order they were declared.
    pub fn from_stages(method: CullingMethod, stages: Vec<Stage>) -> Result<Self, GraphError> {
        let mut position = [None; StageId::COUNT];
        for (i, stage) in stages.iter().enumerate() {
            if position[stage.id().index()].replace(i).is_some() {
                return Err(GraphError::DuplicateStage(stage.id()));
            }
        }

        for stage in &stages {
            for dependency in stage.dependencies() {
                let Some(index) = position[dependency.index()] else {
                    return Err(GraphError::MissingStage(stage.id(), dependency));
                };
                if stages[index].phase() > stage.phase() {
                    return Err(GraphError::PhaseOrder(stage.id(), dependency));
                }
            }
            for handoff in stage.handoffs() {
                let Some(index) = position[handoff.to.index()] else {
                    return Err(GraphError::MissingStage(stage.id(), handoff.to));
                };
                if !stages[index].dependencies().any(|d| d == stage.id()) {
                    return Err(GraphError::UnorderedHandoff(stage.id(), handoff.to));
                }
            }
        }

        // Kahn's algorithm over (dependency -> dependent) edges.
        let mut in_degree: Vec<usize> = stages.iter().map(|s| s.dependencies().count()).collect();
        let mut ready: VecDeque<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(stages.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            let id = stages[i].id();
            for (j, dependent) in stages.iter().enumerate() {
                let edges = dependent.dependencies().filter(|&d| d == id).count();
                if edges > 0 {
                    in_degree[j] -= edges;
                    if in_degree[j] == 0 {
                        ready.push_back(j);
                    }
                }
            }
        }
        if order.len() != stages.len() {
            return Err(GraphError::CyclicDependency);
        }

        let Some(root) = position[StageId::Composition.index()] else {
            return Err(GraphError::MissingComposition);
        };
        let mut reaches_root = vec![false; stages.len()];
        reaches_root[root] = true;
        for &i in order.iter().rev() {
            if reaches_root[i] {
                for dependency in stages[i].dependencies() {
                    if let Some(d) = position[dependency.index()] {
                        reaches_root[d] = true;
                    }
                }
            }
        }
        if let Some(i) = reaches_root.iter().position(|&r| !r) {
            return Err(GraphError::Unreachable(stages[i].id()));
        }

        let mut slots: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
        let stages: Vec<Stage> = order.iter().filter_map(|&i| slots[i].take()).collect();
        let mut lookup = [None; StageId::COUNT];
        for (i, stage) in stages.iter().enumerate() {
            lookup[stage.id().index()] = Some(i);
        }

        Ok(Self {
            method,
            stages,
            lookup,
        })
    }

    /// Culling method the graph implements.
    pub fn method(&self) -> CullingMethod {
        self.method
    }

    /// Stages in submission order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Look up a stage.
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.lookup[id.index()].map(|i| &self.stages[i])
    }

    /// Whether the graph contains a stage.
    pub fn contains(&self, id: StageId) -> bool {
        self.lookup[id.index()].is_some()
    }

    /// Stages submitted in `phase`, in submission order.
    pub fn phase_stages(&self, phase: FramePhase) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |s| s.phase() == phase)
    }

    /// Stages running on `domain`, in submission order.
    pub fn domain_stages(&self, domain: ExecutionDomain) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |s| s.domain() == domain)
    }

    /// Every program the graph records with, without duplicates.
    pub fn programs(&self) -> Vec<ProgramId> {
        let mut programs: Vec<ProgramId> = self
            .stages
            .iter()
            .flat_map(|s| s.id().programs(self.method).iter().copied())
            .collect();
        programs.sort_by_key(|p| p.index());
        programs.dedup();
        programs
    }

    /// Whether any stage runs on the async domain.
    pub fn uses_async(&self) -> bool {
        self.domain_stages(ExecutionDomain::Async).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(graph: &FrameStageGraph) -> Vec<StageId> {
        graph.stages().iter().map(Stage::id).collect()
    }

    #[test]
    fn test_none_graph() {
        let graph = FrameStageGraph::build(CullingMethod::None).unwrap();
        assert_eq!(order(&graph), vec![StageId::GBufferFill, StageId::Composition]);
        assert!(!graph.uses_async());
        assert_eq!(
            graph.programs(),
            vec![ProgramId::GBufferFill, ProgramId::CompositionUnculled, ProgramId::DebugView]
        );
    }

    #[test]
    fn test_tiled_graph_order() {
        let graph = FrameStageGraph::build(CullingMethod::Tiled).unwrap();
        assert_eq!(
            order(&graph),
            vec![
                StageId::Handoff,
                StageId::GBufferFill,
                StageId::LightCopy,
                StageId::TiledCull,
                StageId::Composition,
            ]
        );
        let cull = graph.stage(StageId::TiledCull).unwrap();
        assert!(
            cull.waits()
                .iter()
                .all(|w| w.at == PipelineStages::COMPUTE_SHADER)
        );
    }

    #[test]
    fn test_clustered_graph_domains() {
        let graph = FrameStageGraph::build(CullingMethod::Clustered).unwrap();
        let async_stages: Vec<_> = graph
            .domain_stages(ExecutionDomain::Async)
            .map(Stage::id)
            .collect();
        assert_eq!(
            async_stages,
            vec![StageId::LightCopy, StageId::LightSort, StageId::BvhBuild]
        );

        let cull = graph.stage(StageId::LightCull).unwrap();
        let indirect = cull
            .waits()
            .iter()
            .find(|w| w.stage() == Some(StageId::ClusterPageBuild))
            .unwrap();
        assert_eq!(indirect.at, PipelineStages::DRAW_INDIRECT);
        assert!(!graph.contains(StageId::TiledCull));
    }

    #[test]
    fn test_light_sort_depends_only_on_async_stages() {
        let graph = FrameStageGraph::build(CullingMethod::Clustered).unwrap();
        let sort = graph.stage(StageId::LightSort).unwrap();
        assert_eq!(sort.dependencies().collect::<Vec<_>>(), vec![StageId::LightCopy]);
        assert!(graph.stage(StageId::LightCopy).unwrap().waits().is_empty());

        // Buffers coming back from the primary domain land in the BVH build.
        let handoff = graph.stage(StageId::Handoff).unwrap();
        assert!(handoff.handoffs().iter().all(|h| h.to == StageId::BvhBuild));
        assert_eq!(
            handoff.handoffs().iter().map(|h| h.buffer).collect::<Vec<_>>(),
            vec![SharedBuffer::SortedLights, SharedBuffer::BvhNodes]
        );
    }

    #[test]
    fn test_phases_are_monotonic_in_order() {
        for method in CullingMethod::ALL {
            let graph = FrameStageGraph::build(method).unwrap();
            let phases: Vec<_> = graph.stages().iter().map(Stage::phase).collect();
            assert!(phases.windows(2).all(|w| w[0] <= w[1]), "{method}");
            assert_eq!(graph.stages().last().map(Stage::id), Some(StageId::Composition));
        }
    }

    #[test]
    fn test_composition_signals_render_finished() {
        let graph = FrameStageGraph::build(CullingMethod::Clustered).unwrap();
        let composition = graph.stage(StageId::Composition).unwrap();
        assert!(composition.signals().contains(&SyncPointKey::RenderFinished));
        assert!(
            composition
                .waits()
                .iter()
                .any(|w| w.key == SyncPointKey::ImageAvailable)
        );
    }

    #[test]
    fn test_cycle_detected() {
        let stages = vec![
            Stage::new(StageId::LightSort, ExecutionDomain::Async, FramePhase::Culling)
                .after(StageId::BvhBuild, PipelineStages::COMPUTE_SHADER),
            Stage::new(StageId::BvhBuild, ExecutionDomain::Async, FramePhase::Culling)
                .after(StageId::LightSort, PipelineStages::COMPUTE_SHADER),
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition)
                .after(StageId::BvhBuild, PipelineStages::FRAGMENT_SHADER),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::Clustered, stages).unwrap_err(),
            GraphError::CyclicDependency
        );
    }

    #[test]
    fn test_unordered_handoff_rejected() {
        let stages = vec![
            Stage::new(StageId::LightCopy, ExecutionDomain::Async, FramePhase::Culling).hand_off(
                SharedBuffer::LightBuffer,
                StageId::Composition,
                AccessFlags::TRANSFER_WRITE,
                AccessFlags::SHADER_READ,
            ),
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::None, stages).unwrap_err(),
            GraphError::UnorderedHandoff(StageId::LightCopy, StageId::Composition)
        );
    }

    #[test]
    fn test_missing_and_unreachable_stages() {
        let missing = vec![
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition)
                .after(StageId::LightCull, PipelineStages::FRAGMENT_SHADER),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::None, missing).unwrap_err(),
            GraphError::MissingStage(StageId::Composition, StageId::LightCull)
        );

        let dangling = vec![
            Stage::new(StageId::GBufferFill, ExecutionDomain::Primary, FramePhase::GBuffer),
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::None, dangling).unwrap_err(),
            GraphError::Unreachable(StageId::GBufferFill)
        );
    }

    #[test]
    fn test_phase_order_enforced() {
        let stages = vec![
            Stage::new(StageId::TiledCull, ExecutionDomain::Primary, FramePhase::Culling),
            Stage::new(StageId::GBufferFill, ExecutionDomain::Primary, FramePhase::GBuffer)
                .after(StageId::TiledCull, PipelineStages::COMPUTE_SHADER),
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition)
                .after(StageId::GBufferFill, PipelineStages::FRAGMENT_SHADER),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::Tiled, stages).unwrap_err(),
            GraphError::PhaseOrder(StageId::GBufferFill, StageId::TiledCull)
        );
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let stages = vec![
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition),
            Stage::new(StageId::Composition, ExecutionDomain::Primary, FramePhase::Composition),
        ];
        assert_eq!(
            FrameStageGraph::from_stages(CullingMethod::None, stages).unwrap_err(),
            GraphError::DuplicateStage(StageId::Composition)
        );
    }
}
