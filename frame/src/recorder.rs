//! Per-frame command recording.
//!
//! [`FrameRecorder`] walks the stage graph in topological order and records
//! one [`CommandStream`] per stage. While recording it:
//!
//! - prepends pending ownership seeds to the first stream of each domain,
//! - checks every access against the [`OwnershipTracker`],
//! - records the release/acquire pairs of each stage's handoffs, and
//! - toggles the sort double buffer once per sort phase.
//!
//! Recording is pure CPU work; nothing here talks to a backend.

use crate::bvh::{self, BvhPush};
use crate::cluster::ClusterCounters;
use crate::command::{
    AccessFlags, Binding, BufferCopyRegion, Command, CommandStream, RenderTarget,
    ResourceBinding,
};
use crate::config::{CullingMethod, DebugView, FrameConfig, RendererSettings};
use crate::domain::ExecutionDomain;
use crate::double_buffer::DoubleBuffer;
use crate::graph::{FrameStageGraph, StageId};
use crate::light::{LightBounds, LightRecord};
use crate::ownership::{OwnershipTracker, Transfer};
use crate::program::{ProgramId, ProgramRegistry};
use crate::resources::FrameResources;
use crate::scene::{CameraPush, SceneInput};
use crate::scheduler::{FrameSlot, SyncPointKey};
use crate::sort::{SortPhase, SortPlan};

/// Push constants of the tiled culling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct TilePush {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_size: u32,
    pub light_count: u32,
}

/// Push constants of the light culling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct LightCullPush {
    pub cluster: crate::cluster::ClusterPush,
    pub light_count: u32,
    pub root_node: u32,
    pub subgroup_size: u32,
    pub _pad: u32,
}

/// Push constants of the composition and debug view passes.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CompositionPush {
    pub camera: CameraPush,
    pub light_count: u32,
    pub debug_channel: u32,
    pub tiles_x: u32,
    pub tile_size: u32,
}

/// Streams of one frame, indexed by stage.
#[derive(Debug, Clone)]
pub struct StageStreams {
    streams: Vec<Option<CommandStream>>,
}

impl StageStreams {
    /// Empty streams for every stage of `graph`.
    pub fn new(graph: &FrameStageGraph) -> Self {
        let mut streams: Vec<Option<CommandStream>> = vec![None; StageId::COUNT];
        for stage in graph.stages() {
            streams[stage.id().index()] = Some(CommandStream::new(stage.id(), stage.domain()));
        }
        Self { streams }
    }

    /// Stream of a stage.
    ///
    /// # Panics
    ///
    /// Panics if the stage is not part of the graph or was already taken.
    pub fn get(&self, id: StageId) -> &CommandStream {
        match &self.streams[id.index()] {
            Some(stream) => stream,
            None => panic!("Invalid stage stream '{id}'"),
        }
    }

    /// Mutable stream of a stage.
    pub fn get_mut(&mut self, id: StageId) -> &mut CommandStream {
        match &mut self.streams[id.index()] {
            Some(stream) => stream,
            None => panic!("Invalid stage stream '{id}'"),
        }
    }

    /// Mutable streams of two different stages.
    pub fn pair_mut(&mut self, a: StageId, b: StageId) -> (&mut CommandStream, &mut CommandStream) {
        assert_ne!(a, b, "Stage '{a}' cannot hand off to itself");
        let (i, j) = (a.index(), b.index());
        let (first, second) = if i < j {
            let (left, right) = self.streams.split_at_mut(j);
            (&mut left[i], &mut right[0])
        } else {
            let (left, right) = self.streams.split_at_mut(i);
            (&mut right[0], &mut left[j])
        };
        match (first, second) {
            (Some(first), Some(second)) => (first, second),
            _ => panic!("Invalid stage stream pair '{a}' -> '{b}'"),
        }
    }

    /// Remove a stage's stream for submission.
    pub fn take(&mut self, id: StageId) -> CommandStream {
        match self.streams[id.index()].take() {
            Some(stream) => stream,
            None => panic!("Invalid stage stream '{id}'"),
        }
    }

    /// Streams still held, in stage index order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandStream> {
        self.streams.iter().flatten()
    }
}

/// Everything needed to record one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecorder<'a> {
    pub graph: &'a FrameStageGraph,
    pub resources: &'a FrameResources,
    pub programs: &'a ProgramRegistry,
    pub settings: &'a RendererSettings,
    pub config: &'a FrameConfig,
    pub scene: &'a SceneInput,
    pub slot: FrameSlot,
    pub image: u32,
}

impl FrameRecorder<'_> {
    /// Record every stage of the graph.
    ///
    /// # Panics
    ///
    /// Panics if a stage accesses a resource its domain does not own, which
    /// means the graph's handoffs do not match the resource usage.
    pub fn record(
        &self,
        ownership: &mut OwnershipTracker,
        double_buffer: &mut DoubleBuffer,
    ) -> StageStreams {
        crate::profile_scope!("record_frame");
        let mut streams = StageStreams::new(self.graph);
        let mut seeded = [false; 2];

        for stage in self.graph.stages() {
            let id = stage.id();
            let domain = stage.domain();
            ownership.begin_stage(id);

            let stream = streams.get_mut(id);
            if !seeded[domain.index()] {
                for seed in ownership.take_seeds(domain) {
                    stream.push(seed);
                }
                seeded[domain.index()] = true;
            }

            let start = stream.len();
            self.record_stage(id, stream, ownership, double_buffer);
            let accesses: Vec<_> = stream.commands()[start..]
                .iter()
                .flat_map(Command::accesses)
                .collect();
            for (resource, access) in accesses {
                if !self.resources.arena().get(resource).host_visible {
                    ownership.access(resource, domain, access);
                }
            }

            for handoff in stage.handoffs() {
                let to = self.stage_domain(handoff.to);
                let (release, acquire) = streams.pair_mut(id, handoff.to);
                let resource = self.resources.shared(handoff.buffer, double_buffer.read_set());
                ownership.transfer(
                    Transfer {
                        resource,
                        range: self.resources.whole(resource),
                        from: domain,
                        to,
                        before: handoff.before,
                        after: handoff.after,
                        sync: SyncPointKey::StageDone(id),
                        slot: self.slot,
                    },
                    release,
                    acquire,
                );
            }

            log::trace!(
                "Recorded stage '{}' on {}: {} commands",
                id,
                domain,
                streams.get(id).len()
            );
        }
        streams
    }

    fn stage_domain(&self, id: StageId) -> ExecutionDomain {
        match self.graph.stage(id) {
            Some(stage) => stage.domain(),
            None => panic!("Handoff to stage '{id}' outside the graph"),
        }
    }

    fn lights(&self) -> &[LightRecord] {
        self.scene.active_lights(self.config.light_count)
    }

    fn light_count(&self) -> u32 {
        self.lights().len() as u32
    }

    fn record_stage(
        &self,
        id: StageId,
        stream: &mut CommandStream,
        ownership: &mut OwnershipTracker,
        double_buffer: &mut DoubleBuffer,
    ) {
        match id {
            StageId::Handoff => {}
            StageId::GBufferFill => self.record_gbuffer(stream),
            StageId::LightCopy => self.record_light_copy(stream, ownership),
            StageId::LightSort => self.record_sort(stream, double_buffer),
            StageId::BvhBuild => self.record_bvh(stream, double_buffer),
            StageId::ClusterPageBuild => self.record_cluster_pages(stream),
            StageId::TiledCull => self.record_tiled_cull(stream),
            StageId::LightCull => self.record_light_cull(stream, double_buffer),
            StageId::Composition => self.record_composition(stream, ownership, double_buffer),
        }
    }

    fn record_gbuffer(&self, stream: &mut CommandStream) {
        let gbuffer = self.resources.gbuffer();
        let program = self.programs.get(ProgramId::GBufferFill);
        let push = bytemuck::bytes_of(&self.scene.camera_push()).to_vec();

        stream.push(Command::BeginRendering {
            color: vec![
                RenderTarget::Resource(gbuffer.albedo),
                RenderTarget::Resource(gbuffer.normal),
                RenderTarget::Resource(gbuffer.specular),
            ],
            depth: Some(gbuffer.depth),
        });
        for part in &self.scene.parts {
            stream.push(Command::DrawIndexed {
                program,
                first_index: part.index_range.start,
                index_count: part.index_count(),
                vertex_offset: part.vertex_range.start as i32,
                material_key: part.material_key,
                bindings: vec![ResourceBinding::new(
                    Binding::Geometry,
                    self.resources.geometry(),
                    AccessFlags::INDEX_READ | AccessFlags::VERTEX_ATTRIBUTE_READ,
                )],
                push: push.clone(),
            });
        }
        stream.push(Command::EndRendering);
    }

    /// Copy this slot's staging lights into the device-local light buffer.
    fn record_upload(&self, stream: &mut CommandStream, ownership: &mut OwnershipTracker) -> bool {
        let count = self.light_count();
        if count == 0 {
            return false;
        }
        let staging = self.resources.staging(self.slot);
        stream.push(Command::CopyBuffer {
            src: staging,
            dst: self.resources.light_buffer(),
            region: BufferCopyRegion::whole(count as u64 * LightRecord::SIZE),
        });
        ownership.host_read(staging, self.slot);
        true
    }

    fn record_light_copy(&self, stream: &mut CommandStream, ownership: &mut OwnershipTracker) {
        self.record_upload(stream, ownership);
    }

    fn record_sort(&self, stream: &mut CommandStream, double_buffer: &mut DoubleBuffer) {
        let sort = self.resources.sort();
        let lights = self.resources.light_buffer();
        let plan = SortPlan::new(self.light_count());
        let bounds = LightBounds::of(self.lights());
        if double_buffer.align_for(plan.phases().len()) {
            log::trace!("Sort realigned to write the {} output", double_buffer.read_set());
        }

        for (i, &phase) in plan.phases().iter().enumerate() {
            let write = sort.set(double_buffer.current_write_set());
            let read = sort.set(double_buffer.read_set());
            let bindings = match phase {
                SortPhase::Block => vec![
                    ResourceBinding::new(Binding::Lights, lights, AccessFlags::SHADER_READ),
                    ResourceBinding::new(Binding::SortTarget, write.keys, AccessFlags::SHADER_WRITE),
                ],
                SortPhase::Merge { .. } => vec![
                    ResourceBinding::new(Binding::SortSource, read.keys, AccessFlags::SHADER_READ),
                    ResourceBinding::new(Binding::SortTarget, write.keys, AccessFlags::SHADER_WRITE),
                ],
                SortPhase::Gather => vec![
                    ResourceBinding::new(Binding::SortSource, read.keys, AccessFlags::SHADER_READ),
                    ResourceBinding::new(Binding::Lights, lights, AccessFlags::SHADER_READ),
                    ResourceBinding::new(Binding::SortTarget, write.keys, AccessFlags::SHADER_WRITE),
                    ResourceBinding::new(
                        Binding::SortedLights,
                        write.output,
                        AccessFlags::SHADER_WRITE,
                    ),
                ],
            };
            if i > 0 {
                stream.memory_barrier(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);
            }
            stream.push(Command::Dispatch {
                program: self.programs.get(phase.program()),
                groups: phase.groups(plan.count(), plan.padded()),
                bindings,
                push: bytemuck::bytes_of(&plan.push(phase, &bounds)).to_vec(),
            });
            double_buffer.toggle();
        }
    }

    fn record_bvh(&self, stream: &mut CommandStream, double_buffer: &DoubleBuffer) {
        let sort = self.resources.sort();
        let sorted = sort.set(double_buffer.read_set()).output;
        let subgroup_size = self.settings.subgroup_size;

        for (i, level) in bvh::plan_levels(self.light_count(), subgroup_size)
            .iter()
            .enumerate()
        {
            if i > 0 {
                stream.memory_barrier(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);
            }
            stream.push(Command::Dispatch {
                program: self.programs.get(ProgramId::BvhBuild),
                groups: [level.output_count(subgroup_size).max(1), 1, 1],
                bindings: vec![
                    ResourceBinding::new(Binding::SortedLights, sorted, AccessFlags::SHADER_READ),
                    ResourceBinding::new(
                        Binding::BvhNodes,
                        sort.bvh_nodes,
                        AccessFlags::SHADER_READ_WRITE,
                    ),
                ],
                push: bytemuck::bytes_of(&BvhPush::new(level, subgroup_size)).to_vec(),
            });
        }
    }

    fn record_cluster_pages(&self, stream: &mut CommandStream) {
        let cluster = self.resources.cluster();
        let layout = cluster.layout;
        let depth = self.resources.gbuffer().depth;
        let push = bytemuck::bytes_of(&layout.push()).to_vec();

        for resource in [cluster.page_table, cluster.page_pool, cluster.unique_clusters] {
            stream.push(Command::FillBuffer {
                resource,
                range: self.resources.whole(resource),
                value: 0,
            });
        }
        stream.push(Command::UpdateBuffer {
            resource: cluster.counters,
            offset: 0,
            data: ClusterCounters::seeded_words(),
        });
        stream.memory_barrier(AccessFlags::TRANSFER_WRITE, AccessFlags::SHADER_READ_WRITE);

        stream.push(Command::Dispatch {
            program: self.programs.get(ProgramId::ClusterFlag),
            groups: layout.flag_groups(self.resources.extent()),
            bindings: vec![
                ResourceBinding::new(Binding::Depth, depth, AccessFlags::SHADER_READ),
                ResourceBinding::new(Binding::PageTable, cluster.page_table, AccessFlags::SHADER_WRITE),
            ],
            push: push.clone(),
        });
        stream.memory_barrier(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ_WRITE);

        stream.push(Command::Dispatch {
            program: self.programs.get(ProgramId::ClusterAlloc),
            groups: layout.key_groups(),
            bindings: vec![
                ResourceBinding::new(
                    Binding::PageTable,
                    cluster.page_table,
                    AccessFlags::SHADER_READ_WRITE,
                ),
                ResourceBinding::new(
                    Binding::ClusterCounters,
                    cluster.counters,
                    AccessFlags::SHADER_READ_WRITE,
                ),
            ],
            push: push.clone(),
        });
        stream.memory_barrier(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);

        stream.push(Command::Dispatch {
            program: self.programs.get(ProgramId::ClusterStore),
            groups: layout.key_groups(),
            bindings: vec![
                ResourceBinding::new(Binding::PageTable, cluster.page_table, AccessFlags::SHADER_READ),
                ResourceBinding::new(Binding::PagePool, cluster.page_pool, AccessFlags::SHADER_WRITE),
            ],
            push: push.clone(),
        });
        stream.memory_barrier(
            AccessFlags::SHADER_WRITE,
            AccessFlags::SHADER_READ | AccessFlags::INDIRECT_COMMAND_READ,
        );

        stream.push(Command::DispatchIndirect {
            program: self.programs.get(ProgramId::ClusterCompact),
            args: cluster.counters,
            offset: ClusterCounters::COMPACT_ARGS_OFFSET,
            bindings: vec![
                ResourceBinding::new(Binding::PagePool, cluster.page_pool, AccessFlags::SHADER_READ),
                ResourceBinding::new(
                    Binding::UniqueClusters,
                    cluster.unique_clusters,
                    AccessFlags::SHADER_WRITE,
                ),
                ResourceBinding::new(
                    Binding::ClusterCounters,
                    cluster.counters,
                    AccessFlags::SHADER_READ_WRITE,
                ),
            ],
            push,
        });
    }

    fn record_light_cull(&self, stream: &mut CommandStream, double_buffer: &DoubleBuffer) {
        let cluster = self.resources.cluster();
        let sort = self.resources.sort();
        let set = sort.set(double_buffer.read_set());
        let subgroup_size = self.settings.subgroup_size;
        let levels = bvh::plan_levels(self.light_count(), subgroup_size);
        let push = LightCullPush {
            cluster: cluster.layout.push(),
            light_count: self.light_count(),
            root_node: bvh::node_count(&levels, subgroup_size).saturating_sub(1),
            subgroup_size,
            _pad: 0,
        };

        stream.push(Command::DispatchIndirect {
            program: self.programs.get(ProgramId::LightCull),
            args: cluster.counters,
            offset: ClusterCounters::CULL_ARGS_OFFSET,
            bindings: vec![
                ResourceBinding::new(
                    Binding::UniqueClusters,
                    cluster.unique_clusters,
                    AccessFlags::SHADER_READ,
                ),
                ResourceBinding::new(Binding::SortedLights, set.output, AccessFlags::SHADER_READ),
                ResourceBinding::new(Binding::BvhNodes, sort.bvh_nodes, AccessFlags::SHADER_READ),
                ResourceBinding::new(
                    Binding::PagePool,
                    cluster.page_pool,
                    AccessFlags::SHADER_READ_WRITE,
                ),
            ],
            push: bytemuck::bytes_of(&push).to_vec(),
        });
    }

    fn record_tiled_cull(&self, stream: &mut CommandStream) {
        let tiled = self.resources.tiled();
        let push = TilePush {
            tiles_x: tiled.grid.tiles_x,
            tiles_y: tiled.grid.tiles_y,
            tile_size: tiled.grid.tile_size,
            light_count: self.light_count(),
        };

        stream.push(Command::FillBuffer {
            resource: tiled.tile_lights,
            range: self.resources.whole(tiled.tile_lights),
            value: 0,
        });
        stream.memory_barrier(AccessFlags::TRANSFER_WRITE, AccessFlags::SHADER_READ_WRITE);
        stream.push(Command::Dispatch {
            program: self.programs.get(ProgramId::TiledCull),
            groups: [tiled.grid.tiles_x, tiled.grid.tiles_y, 1],
            bindings: vec![
                ResourceBinding::new(
                    Binding::Depth,
                    self.resources.gbuffer().depth,
                    AccessFlags::SHADER_READ,
                ),
                ResourceBinding::new(
                    Binding::Lights,
                    self.resources.light_buffer(),
                    AccessFlags::SHADER_READ,
                ),
                ResourceBinding::new(
                    Binding::TileLights,
                    tiled.tile_lights,
                    AccessFlags::SHADER_READ_WRITE,
                ),
            ],
            push: bytemuck::bytes_of(&push).to_vec(),
        });
    }

    fn record_composition(
        &self,
        stream: &mut CommandStream,
        ownership: &mut OwnershipTracker,
        double_buffer: &DoubleBuffer,
    ) {
        let method = self.graph.method();
        if method == CullingMethod::None && self.record_upload(stream, ownership) {
            stream.memory_barrier(AccessFlags::TRANSFER_WRITE, AccessFlags::SHADER_READ);
        }

        let gbuffer = self.resources.gbuffer();
        let read = |binding, resource| ResourceBinding::new(binding, resource, AccessFlags::SHADER_READ);
        let mut bindings = vec![
            read(Binding::Albedo, gbuffer.albedo),
            read(Binding::Normal, gbuffer.normal),
            read(Binding::Specular, gbuffer.specular),
            read(Binding::Depth, gbuffer.depth),
        ];
        let (tiles_x, tile_size) = match method {
            CullingMethod::Tiled => {
                let grid = self.resources.tiled().grid;
                (grid.tiles_x, grid.tile_size)
            }
            CullingMethod::None | CullingMethod::Clustered => (0, self.config.tile_size),
        };

        let program = if self.config.debug_view == DebugView::Disabled {
            match method {
                CullingMethod::None => {
                    bindings.push(read(Binding::Lights, self.resources.light_buffer()));
                    ProgramId::CompositionUnculled
                }
                CullingMethod::Tiled => {
                    bindings.push(read(Binding::Lights, self.resources.light_buffer()));
                    bindings.push(read(Binding::TileLights, self.resources.tiled().tile_lights));
                    ProgramId::CompositionTiled
                }
                CullingMethod::Clustered => {
                    let cluster = self.resources.cluster();
                    let set = self.resources.sort().set(double_buffer.read_set());
                    bindings.push(read(Binding::SortedLights, set.output));
                    bindings.push(read(Binding::PageTable, cluster.page_table));
                    bindings.push(read(Binding::PagePool, cluster.page_pool));
                    ProgramId::CompositionClustered
                }
            }
        } else {
            ProgramId::DebugView
        };

        let push = CompositionPush {
            camera: self.scene.camera_push(),
            light_count: self.light_count(),
            debug_channel: self.config.debug_view.channel(),
            tiles_x,
            tile_size,
        };

        stream.push(Command::BeginRendering {
            color: vec![RenderTarget::Swapchain(self.image)],
            depth: None,
        });
        stream.push(Command::Draw {
            program: self.programs.get(program),
            vertex_count: 3,
            bindings,
            push: bytemuck::bytes_of(&push).to_vec(),
        });
        if self.scene.overlay_draws > 0 {
            stream.push(Command::OverlayDraws {
                count: self.scene.overlay_draws,
            });
        }
        stream.push(Command::EndRendering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BarrierKind;
    use crate::domain::{DomainMap, QueueRef};
    use crate::program::ProgramHandle;
    use crate::resource::Extent2d;
    use crate::scene::GeometryPart;
    use crate::scheduler::FrameSlot;

    struct Fixture {
        graph: FrameStageGraph,
        resources: FrameResources,
        programs: ProgramRegistry,
        settings: RendererSettings,
        config: FrameConfig,
        scene: SceneInput,
        ownership: OwnershipTracker,
        double_buffer: DoubleBuffer,
    }

    impl Fixture {
        fn new(config: FrameConfig, domains: DomainMap) -> Self {
            let settings = RendererSettings::default();
            let graph = FrameStageGraph::build(config.culling).unwrap();
            let resources = FrameResources::build(&settings, &config, Extent2d::new(1280, 720));
            let programs =
                ProgramRegistry::build(&graph.programs(), |id, _| Ok(ProgramHandle(id.index() as u64)))
                    .unwrap();
            let mut ownership = OwnershipTracker::new(domains);
            let double_buffer = DoubleBuffer::new();
            resources.seed(&mut ownership, &double_buffer);
            let scene = SceneInput {
                parts: vec![GeometryPart {
                    vertex_range: 0..4,
                    index_range: 0..6,
                    ..Default::default()
                }],
                world_scale: 1.0,
                lights: (0..config.light_count)
                    .map(|i| LightRecord::new([i as f32, 0.0, -(i as f32)], 1.0, [1.0; 3]))
                    .collect(),
                ..Default::default()
            };
            Self {
                graph,
                resources,
                programs,
                settings,
                config,
                scene,
                ownership,
                double_buffer,
            }
        }

        fn record(&mut self, slot: FrameSlot) -> StageStreams {
            let recorder = FrameRecorder {
                graph: &self.graph,
                resources: &self.resources,
                programs: &self.programs,
                settings: &self.settings,
                config: &self.config,
                scene: &self.scene,
                slot,
                image: 0,
            };
            let streams = recorder.record(&mut self.ownership, &mut self.double_buffer);
            self.ownership.retire_slot(slot);
            streams
        }
    }

    fn two_families() -> DomainMap {
        DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(1, 0))
    }

    #[test]
    fn test_clustered_acquires_match_releases() {
        let mut fixture = Fixture::new(
            FrameConfig::default().with_culling(CullingMethod::Clustered),
            two_families(),
        );
        let slot = FrameSlot::first(2);
        for _ in 0..3 {
            let streams = fixture.record(slot);
            let releases: Vec<_> = streams
                .iter()
                .flat_map(|s| s.buffer_barriers(BarrierKind::Release))
                .collect();
            let acquires: Vec<_> = streams
                .iter()
                .flat_map(|s| s.buffer_barriers(BarrierKind::Acquire))
                .collect();
            assert_eq!(releases.len(), acquires.len());
            assert!(!releases.is_empty());
            for acquire in acquires {
                assert!(releases.iter().any(|r| r.matches(acquire)));
            }
        }
    }

    #[test]
    fn test_single_family_uses_memory_barriers() {
        let mut fixture = Fixture::new(
            FrameConfig::default().with_culling(CullingMethod::Tiled),
            DomainMap::default(),
        );
        let streams = fixture.record(FrameSlot::first(2));
        assert_eq!(
            streams
                .iter()
                .flat_map(|s| s.buffer_barriers(BarrierKind::Release))
                .count(),
            0
        );
        assert_eq!(
            streams
                .get(StageId::LightCopy)
                .buffer_barriers(BarrierKind::Memory)
                .count(),
            1
        );
    }

    #[test]
    fn test_sort_toggles_once_per_phase() {
        let mut fixture = Fixture::new(
            FrameConfig::default()
                .with_culling(CullingMethod::Clustered)
                .with_light_count(1000),
            two_families(),
        );
        let streams = fixture.record(FrameSlot::first(2));
        let plan = SortPlan::new(1000);
        assert_eq!(plan.phases().len(), 5);
        assert_eq!(streams.get(StageId::LightSort).dispatch_count(), 5);
        assert_eq!(fixture.double_buffer.toggle_count(), 5);
    }

    #[test]
    fn test_cluster_build_dispatch_sequence() {
        let mut fixture = Fixture::new(FrameConfig::default(), two_families());
        let streams = fixture.record(FrameSlot::first(2));
        let pages = streams.get(StageId::ClusterPageBuild);
        let indirect: Vec<_> = pages
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::DispatchIndirect { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(indirect, vec![ClusterCounters::COMPACT_ARGS_OFFSET]);
        assert_eq!(pages.dispatch_count(), 4);

        let cull = streams.get(StageId::LightCull);
        assert!(cull.commands().iter().any(|c| matches!(
            c,
            Command::DispatchIndirect { offset, .. } if *offset == ClusterCounters::CULL_ARGS_OFFSET
        )));
    }

    #[test]
    fn test_zero_lights_skip_upload() {
        let mut fixture = Fixture::new(
            FrameConfig::default()
                .with_culling(CullingMethod::None)
                .with_light_count(0),
            DomainMap::default(),
        );
        let streams = fixture.record(FrameSlot::first(2));
        assert!(!streams
            .get(StageId::Composition)
            .commands()
            .iter()
            .any(|c| matches!(c, Command::CopyBuffer { .. })));
    }

    #[test]
    fn test_debug_view_replaces_composition_program() {
        let mut fixture = Fixture::new(
            FrameConfig::default().with_debug_view(DebugView::Normal),
            two_families(),
        );
        let streams = fixture.record(FrameSlot::first(2));
        let draw = streams
            .get(StageId::Composition)
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::Draw { program, push, .. } => Some((program.id, push.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(draw.0, ProgramId::DebugView);
        let push: CompositionPush = bytemuck::pod_read_unaligned(&draw.1);
        assert_eq!(push.debug_channel, DebugView::Normal.channel());
    }

    #[test]
    fn test_overlay_draws_recorded_inside_composition() {
        let mut fixture = Fixture::new(FrameConfig::default(), two_families());
        fixture.scene.overlay_draws = 7;
        let streams = fixture.record(FrameSlot::first(2));
        let commands = streams.get(StageId::Composition).commands();
        let overlay = commands
            .iter()
            .position(|c| matches!(c, Command::OverlayDraws { count: 7 }))
            .unwrap();
        assert!(matches!(commands[overlay + 1], Command::EndRendering));
    }

    #[test]
    #[should_panic(expected = "cannot hand off to itself")]
    fn test_pair_mut_same_stage_panics() {
        let graph = FrameStageGraph::build(CullingMethod::Tiled).unwrap();
        let mut streams = StageStreams::new(&graph);
        streams.pair_mut(StageId::Handoff, StageId::Handoff);
    }
}
