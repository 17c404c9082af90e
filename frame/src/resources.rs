//! Frame resource layout.
//!
//! [`FrameResources`] describes every buffer and image the frame graph
//! touches for one culling method and surface extent. Resources that only
//! one method uses are allocated only for that method, and everything is
//! rebuilt with the graph on resize or method change.
//!
//! | Resource | Methods | Initial owner |
//! |----------|---------|---------------|
//! | staging (per slot) | all | host |
//! | light buffer | all | primary, async when clustered |
//! | G-buffer, geometry | all | primary |
//! | sort keys (x2) | clustered | async |
//! | sorted lights (x2) | clustered | read set primary, write set async |
//! | BVH nodes | clustered | primary |
//! | page table, page pool, unique list, counters | clustered | primary |
//! | tile light lists | tiled | primary |

use crate::bvh::{self, BvhNode};
use crate::cluster::{ClusterCounters, ClusterGrid, ClusterLayout, TileGrid};
use crate::command::BufferRange;
use crate::config::{CullingMethod, FrameConfig, RendererSettings};
use crate::domain::ExecutionDomain;
use crate::double_buffer::{BufferSet, DoubleBuffer};
use crate::graph::SharedBuffer;
use crate::light::{LightRecord, MAX_LIGHTS};
use crate::ownership::OwnershipTracker;
use crate::resource::{Extent2d, ImageFormat, ResourceArena, ResourceDesc, ResourceId};
use crate::scheduler::FrameSlot;
use crate::sort;

/// Light indices stored per tile, after the count word.
pub const MAX_LIGHTS_PER_TILE: u32 = 256;

/// Geometry-pass outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBuffer {
    pub albedo: ResourceId,
    pub normal: ResourceId,
    pub specular: ResourceId,
    pub depth: ResourceId,
}

impl GBuffer {
    /// All attachments.
    pub fn all(&self) -> [ResourceId; 4] {
        [self.albedo, self.normal, self.specular, self.depth]
    }
}

/// One instance of the double-buffered sort output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSet {
    /// Sort entries; after the gather the low words are the light index
    /// indirection list.
    pub keys: ResourceId,
    /// Lights in sorted order.
    pub output: ResourceId,
}

/// Resources of the sort and BVH passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortResources {
    pub sets: [LightSet; 2],
    pub bvh_nodes: ResourceId,
}

impl SortResources {
    /// The instance selected by `set`.
    pub fn set(&self, set: BufferSet) -> LightSet {
        self.sets[set.index()]
    }
}

/// Resources of the cluster passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterResources {
    pub layout: ClusterLayout,
    pub page_table: ResourceId,
    pub page_pool: ResourceId,
    pub unique_clusters: ResourceId,
    pub counters: ResourceId,
}

/// Resources of the tiled culling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiledResources {
    pub grid: TileGrid,
    pub tile_lights: ResourceId,
}

/// All resources of one frame graph.
#[derive(Debug, Clone)]
pub struct FrameResources {
    arena: ResourceArena,
    method: CullingMethod,
    extent: Extent2d,
    staging: Vec<ResourceId>,
    light_buffer: ResourceId,
    geometry: ResourceId,
    gbuffer: GBuffer,
    sort: Option<SortResources>,
    cluster: Option<ClusterResources>,
    tiled: Option<TiledResources>,
}

impl FrameResources {
    /// Lay out the resources for `config.culling` at `extent`.
    pub fn build(settings: &RendererSettings, config: &FrameConfig, extent: Extent2d) -> Self {
        let mut arena = ResourceArena::new();
        let light_bytes = MAX_LIGHTS as u64 * LightRecord::SIZE;

        let staging = (0..settings.frames_in_flight)
            .map(|_| arena.add(ResourceDesc::staging("light_staging", light_bytes)))
            .collect();
        let light_buffer = arena.add(ResourceDesc::buffer("lights", light_bytes));
        let geometry = arena.add(ResourceDesc::buffer("geometry", settings.geometry_capacity));
        let gbuffer = GBuffer {
            albedo: arena.add(ResourceDesc::image("gbuffer_albedo", extent, ImageFormat::Rgba8Unorm)),
            normal: arena.add(ResourceDesc::image("gbuffer_normal", extent, ImageFormat::Rgba16Float)),
            specular: arena.add(ResourceDesc::image(
                "gbuffer_specular",
                extent,
                ImageFormat::Rgba8Unorm,
            )),
            depth: arena.add(ResourceDesc::image("gbuffer_depth", extent, ImageFormat::Depth32Float)),
        };

        let tiles = TileGrid::new(extent, config.tile_size);
        let (sort, cluster, tiled) = match config.culling {
            CullingMethod::None => (None, None, None),
            CullingMethod::Tiled => {
                let tile_lights = arena.add(ResourceDesc::buffer(
                    "tile_lights",
                    tiles.count() as u64 * (1 + MAX_LIGHTS_PER_TILE) as u64 * 4,
                ));
                (
                    None,
                    None,
                    Some(TiledResources {
                        grid: tiles,
                        tile_lights,
                    }),
                )
            }
            CullingMethod::Clustered => {
                let key_bytes = sort::padded_count(MAX_LIGHTS) as u64 * 8;
                let mut set = |keys, output| LightSet {
                    keys: arena.add(ResourceDesc::buffer(keys, key_bytes)),
                    output: arena.add(ResourceDesc::buffer(output, light_bytes)),
                };
                let sets = [
                    set("sort_keys_front", "sorted_lights_front"),
                    set("sort_keys_back", "sorted_lights_back"),
                ];
                let bvh_nodes = arena.add(ResourceDesc::buffer(
                    "bvh_nodes",
                    bvh::max_nodes(MAX_LIGHTS, settings.subgroup_size) as u64 * BvhNode::SIZE,
                ));

                let layout = ClusterLayout::new(
                    ClusterGrid::new(tiles, settings.depth_slices),
                    settings.page_capacity,
                    settings.page_size,
                );
                settings.warn_on_saturation(layout.grid.key_space());
                let cluster = ClusterResources {
                    layout,
                    page_table: arena.add(ResourceDesc::buffer(
                        "cluster_page_table",
                        layout.page_table_bytes(),
                    )),
                    page_pool: arena.add(ResourceDesc::buffer(
                        "cluster_page_pool",
                        layout.page_pool_bytes(),
                    )),
                    unique_clusters: arena.add(ResourceDesc::buffer(
                        "cluster_unique",
                        layout.unique_list_bytes(),
                    )),
                    counters: arena.add(ResourceDesc::buffer(
                        "cluster_counters",
                        ClusterCounters::SIZE,
                    )),
                };
                (Some(SortResources { sets, bvh_nodes }), Some(cluster), None)
            }
        };

        log::debug!(
            "Frame resources for {} at {}x{}: {} resources, {} bytes",
            config.culling,
            extent.width,
            extent.height,
            arena.len(),
            arena.total_bytes()
        );

        Self {
            arena,
            method: config.culling,
            extent,
            staging,
            light_buffer,
            geometry,
            gbuffer,
            sort,
            cluster,
            tiled,
        }
    }

    /// Descriptors of every resource.
    pub fn arena(&self) -> &ResourceArena {
        &self.arena
    }

    /// Culling method the layout was built for.
    pub fn method(&self) -> CullingMethod {
        self.method
    }

    /// Surface extent of the screen-sized resources.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Host-visible light staging buffer of a frame slot.
    pub fn staging(&self, slot: FrameSlot) -> ResourceId {
        self.staging[slot.index() as usize]
    }

    /// Device-local light list.
    pub fn light_buffer(&self) -> ResourceId {
        self.light_buffer
    }

    /// Scene vertex and index data.
    pub fn geometry(&self) -> ResourceId {
        self.geometry
    }

    /// G-buffer attachments.
    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    /// Sort and BVH resources.
    ///
    /// # Panics
    ///
    /// Panics unless built for clustered culling.
    pub fn sort(&self) -> &SortResources {
        match &self.sort {
            Some(sort) => sort,
            None => panic!("Sort resources requested for {} culling", self.method),
        }
    }

    /// Cluster resources.
    ///
    /// # Panics
    ///
    /// Panics unless built for clustered culling.
    pub fn cluster(&self) -> &ClusterResources {
        match &self.cluster {
            Some(cluster) => cluster,
            None => panic!("Cluster resources requested for {} culling", self.method),
        }
    }

    /// Tiled culling resources.
    ///
    /// # Panics
    ///
    /// Panics unless built for tiled culling.
    pub fn tiled(&self) -> &TiledResources {
        match &self.tiled {
            Some(tiled) => tiled,
            None => panic!("Tiled resources requested for {} culling", self.method),
        }
    }

    /// Concrete resource behind a logical shared buffer, with `read_set`
    /// the double buffer's read set when the handoff is recorded.
    pub fn shared(&self, buffer: SharedBuffer, read_set: BufferSet) -> ResourceId {
        match buffer {
            SharedBuffer::LightBuffer => self.light_buffer,
            SharedBuffer::SortedLights => self.sort().set(read_set).output,
            SharedBuffer::BvhNodes => self.sort().bvh_nodes,
        }
    }

    /// Whole-resource range of a buffer.
    pub fn whole(&self, id: ResourceId) -> BufferRange {
        BufferRange::whole(self.arena.get(id).size())
    }

    /// Establish the initial owner of every device-local resource.
    ///
    /// The sorted output the first `Handoff` returns (the read set of
    /// `double_buffer`) starts on the primary domain with the BVH nodes.
    /// Sort keys and the other output start on the async domain.
    pub fn seed(&self, tracker: &mut OwnershipTracker, double_buffer: &DoubleBuffer) {
        use ExecutionDomain::{Async, Primary};

        for id in self.gbuffer.all() {
            tracker.seed(id, Primary);
        }
        tracker.seed(self.geometry, Primary);

        let light_owner = match self.method {
            CullingMethod::Clustered => Async,
            CullingMethod::None | CullingMethod::Tiled => Primary,
        };
        tracker.seed(self.light_buffer, light_owner);

        if let Some(sort) = &self.sort {
            for set in &sort.sets {
                tracker.seed(set.keys, Async);
            }
            let returned = double_buffer.read_set();
            tracker.seed(sort.set(returned).output, Primary);
            tracker.seed(sort.set(returned.other()).output, Async);
            tracker.seed(sort.bvh_nodes, Primary);
        }
        if let Some(cluster) = &self.cluster {
            for id in [
                cluster.page_table,
                cluster.page_pool,
                cluster.unique_clusters,
                cluster.counters,
            ] {
                tracker.seed(id, Primary);
            }
        }
        if let Some(tiled) = &self.tiled {
            tracker.seed(tiled.tile_lights, Primary);
        }
    }
}
