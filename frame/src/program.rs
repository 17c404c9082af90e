//! GPU programs used by the frame stages.
//!
//! Program construction is a black box owned by the backend: given a
//! [`ProgramId`] (shader identifier) and its fixed interface bindings, the
//! backend returns an opaque [`ProgramHandle`]. The [`ProgramRegistry`] holds
//! one handle per program in an enum-indexed array, filled when the stage
//! graph is (re)built.

use crate::command::Binding;
use crate::error::FrameError;

/// Every program the frame core dispatches or draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramId {
    /// G-buffer geometry pass.
    GBufferFill,
    /// Bitonic sort of 128-element blocks.
    LightSortBlock,
    /// Bitonic merge of two sorted runs.
    LightSortMerge,
    /// One BVH level reduction.
    BvhBuild,
    /// Flag clusters touched by visible depth samples.
    ClusterFlag,
    /// Allocate pages for flagged clusters.
    ClusterAlloc,
    /// Store cluster keys into page headers.
    ClusterStore,
    /// Compact allocated pages into the unique cluster list.
    ClusterCompact,
    /// Cull lights against the compacted clusters.
    LightCull,
    /// Rebuild the per-tile light grid.
    TiledCull,
    /// Deferred composition over the full light list.
    CompositionUnculled,
    /// Deferred composition reading the tile grid.
    CompositionTiled,
    /// Deferred composition reading cluster pages.
    CompositionClustered,
    /// G-buffer visualisation.
    DebugView,
}

impl ProgramId {
    /// Number of programs.
    pub const COUNT: usize = 14;

    /// All programs, in index order.
    pub const ALL: [ProgramId; Self::COUNT] = [
        Self::GBufferFill,
        Self::LightSortBlock,
        Self::LightSortMerge,
        Self::BvhBuild,
        Self::ClusterFlag,
        Self::ClusterAlloc,
        Self::ClusterStore,
        Self::ClusterCompact,
        Self::LightCull,
        Self::TiledCull,
        Self::CompositionUnculled,
        Self::CompositionTiled,
        Self::CompositionClustered,
        Self::DebugView,
    ];

    /// Dense index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Shader identifier handed to the backend.
    pub fn shader(self) -> &'static str {
        match self {
            Self::GBufferFill => "gbuffer_fill",
            Self::LightSortBlock => "light_sort_block",
            Self::LightSortMerge => "light_sort_merge",
            Self::BvhBuild => "bvh_build",
            Self::ClusterFlag => "cluster_flag",
            Self::ClusterAlloc => "cluster_alloc",
            Self::ClusterStore => "cluster_store",
            Self::ClusterCompact => "cluster_compact",
            Self::LightCull => "light_cull",
            Self::TiledCull => "tiled_cull",
            Self::CompositionUnculled => "composition_unculled",
            Self::CompositionTiled => "composition_tiled",
            Self::CompositionClustered => "composition_clustered",
            Self::DebugView => "debug_view",
        }
    }

    /// Whether the program is a compute pipeline rather than a draw.
    pub fn is_compute(self) -> bool {
        !matches!(
            self,
            Self::GBufferFill
                | Self::CompositionUnculled
                | Self::CompositionTiled
                | Self::CompositionClustered
                | Self::DebugView
        )
    }

    /// Fixed interface bindings of the program.
    pub fn bindings(self) -> &'static [Binding] {
        use Binding::*;
        match self {
            Self::GBufferFill => &[Geometry],
            Self::LightSortBlock => &[Lights, SortTarget],
            Self::LightSortMerge => &[SortSource, SortTarget, Lights, SortedLights],
            Self::BvhBuild => &[SortedLights, BvhNodes],
            Self::ClusterFlag => &[Depth, PageTable],
            Self::ClusterAlloc => &[PageTable, ClusterCounters],
            Self::ClusterStore => &[PageTable, PagePool],
            Self::ClusterCompact => &[PagePool, UniqueClusters, ClusterCounters],
            Self::LightCull => &[UniqueClusters, SortedLights, BvhNodes, PagePool],
            Self::TiledCull => &[Depth, Lights, TileLights],
            Self::CompositionUnculled => &[Albedo, Normal, Specular, Depth, Lights],
            Self::CompositionTiled => &[Albedo, Normal, Specular, Depth, Lights, TileLights],
            Self::CompositionClustered => &[
                Albedo,
                Normal,
                Specular,
                Depth,
                SortedLights,
                PageTable,
                PagePool,
            ],
            Self::DebugView => &[Albedo, Normal, Specular, Depth],
        }
    }
}

/// Opaque backend program handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

impl ProgramHandle {
    /// Placeholder for programs not created by a backend.
    pub const NULL: ProgramHandle = ProgramHandle(u64::MAX);
}

/// A program reference as recorded into command streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramRef {
    /// Which program.
    pub id: ProgramId,
    /// Backend handle.
    pub handle: ProgramHandle,
}

impl ProgramRef {
    /// A reference with no backend handle (tests and tooling).
    pub fn unresolved(id: ProgramId) -> Self {
        Self {
            id,
            handle: ProgramHandle::NULL,
        }
    }
}

/// Enum-indexed program handles.
#[derive(Debug, Clone)]
pub struct ProgramRegistry {
    handles: [Option<ProgramHandle>; ProgramId::COUNT],
}

impl ProgramRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handles: [None; ProgramId::COUNT],
        }
    }

    /// Create every program in `ids` through `create`.
    pub fn build<F>(ids: &[ProgramId], mut create: F) -> Result<Self, FrameError>
    where
        F: FnMut(ProgramId, &'static [Binding]) -> Result<ProgramHandle, FrameError>,
    {
        let mut registry = Self::new();
        for &id in ids {
            let handle = create(id, id.bindings())?;
            log::trace!("Program '{}' -> {:?}", id.shader(), handle);
            registry.handles[id.index()] = Some(handle);
        }
        Ok(registry)
    }

    /// Resolve a program.
    ///
    /// # Panics
    ///
    /// Panics if the program was not created for the active stage graph.
    pub fn get(&self, id: ProgramId) -> ProgramRef {
        let handle = self.handles[id.index()]
            .unwrap_or_else(|| panic!("Program '{}' not built for this graph", id.shader()));
        ProgramRef { id, handle }
    }

    /// Whether a program is available.
    pub fn contains(&self, id: ProgramId) -> bool {
        self.handles[id.index()].is_some()
    }

    /// Number of created programs.
    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    /// Whether no program was created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_indices_dense() {
        for (i, id) in ProgramId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
            assert!(!id.bindings().is_empty());
        }
    }

    #[test]
    fn test_compute_programs() {
        assert!(ProgramId::ClusterCompact.is_compute());
        assert!(ProgramId::TiledCull.is_compute());
        assert!(!ProgramId::GBufferFill.is_compute());
        assert!(!ProgramId::DebugView.is_compute());
        assert_eq!(ProgramId::ALL.iter().filter(|id| id.is_compute()).count(), 9);
    }

    #[test]
    fn test_registry_build_and_get() {
        let registry = ProgramRegistry::build(
            &[ProgramId::GBufferFill, ProgramId::CompositionUnculled],
            |id, _| Ok(ProgramHandle(id.index() as u64 + 100)),
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(ProgramId::GBufferFill));
        assert!(!registry.contains(ProgramId::LightCull));
        assert_eq!(
            registry.get(ProgramId::CompositionUnculled).handle,
            ProgramHandle(110)
        );
    }

    #[test]
    fn test_registry_build_propagates_error() {
        let result = ProgramRegistry::build(&[ProgramId::LightCull], |_, _| {
            Err(FrameError::ResourceCreationFailed("bad shader".into()))
        });
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "not built for this graph")]
    fn test_registry_missing_program_panics() {
        ProgramRegistry::new().get(ProgramId::BvhBuild);
    }
}
