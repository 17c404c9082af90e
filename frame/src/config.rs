//! Frame and renderer configuration.
//!
//! Two layers of configuration reach the frame core:
//!
//! - [`RendererSettings`] are fixed at startup (frames in flight, queue
//!   topology, cluster pool sizing).
//! - [`FrameConfig`] is a per-frame snapshot of the UI toggles. The driver
//!   compares consecutive snapshots to decide whether the stage graph must
//!   be rebuilt or the swapchain recreated.
//!
//! # Example
//!
//! ```ignore
//! let config = FrameConfig::default()
//!     .with_culling(CullingMethod::Tiled)
//!     .with_tile_size(16)
//!     .with_light_count(4096);
//! config.validate()?;
//! ```

use std::fmt;

use crate::cluster::{ClusterGrid, TileGrid};
use crate::domain::QueueTopology;
use crate::error::FrameError;
use crate::light::MAX_LIGHTS;

/// Light culling strategy. Each method has its own stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullingMethod {
    /// Composition iterates the full, unsorted light list.
    None,
    /// Screen-space tile grid rebuilt every frame.
    Tiled,
    /// Sorted lights, BVH and sparse depth clusters.
    #[default]
    Clustered,
}

impl CullingMethod {
    /// All methods.
    pub const ALL: [CullingMethod; 3] = [Self::None, Self::Tiled, Self::Clustered];
}

impl fmt::Display for CullingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tiled => write!(f, "tiled"),
            Self::Clustered => write!(f, "clustered"),
        }
    }
}

/// G-buffer channel shown instead of the lit image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugView {
    /// Normal lit output.
    #[default]
    Disabled,
    /// Surface albedo.
    Albedo,
    /// World-space normal.
    Normal,
    /// Specular intensity.
    Specular,
    /// Reconstructed world position.
    Position,
    /// Linearized depth.
    Depth,
}

impl DebugView {
    /// Channel selector pushed to the debug view program.
    pub fn channel(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Albedo => 1,
            Self::Normal => 2,
            Self::Specular => 3,
            Self::Position => 4,
            Self::Depth => 5,
        }
    }
}

/// Swapchain presentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// Vertical sync, never tears.
    #[default]
    Fifo,
    /// Low latency without tearing, replaces queued images.
    Mailbox,
    /// No synchronization, may tear.
    Immediate,
}

/// Per-frame snapshot of the UI-controlled settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Culling strategy.
    pub culling: CullingMethod,
    /// Tile edge in pixels, shared by the tile grid and cluster keys.
    pub tile_size: u32,
    /// Number of lights uploaded this frame.
    pub light_count: u32,
    /// G-buffer visualisation.
    pub debug_view: DebugView,
    /// Wait for vertical blank when presenting.
    pub vsync: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            culling: CullingMethod::default(),
            tile_size: 32,
            light_count: 1024,
            debug_view: DebugView::Disabled,
            vsync: true,
        }
    }
}

impl FrameConfig {
    /// Set the culling method.
    pub fn with_culling(mut self, culling: CullingMethod) -> Self {
        self.culling = culling;
        self
    }

    /// Set the tile size.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Set the light count.
    pub fn with_light_count(mut self, light_count: u32) -> Self {
        self.light_count = light_count;
        self
    }

    /// Set the debug view.
    pub fn with_debug_view(mut self, debug_view: DebugView) -> Self {
        self.debug_view = debug_view;
        self
    }

    /// Enable or disable vertical sync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Check the snapshot for values the frame core cannot handle.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.tile_size == 0 {
            return Err(FrameError::InvalidConfig("tile size must be non-zero".into()));
        }
        if self.light_count > MAX_LIGHTS {
            return Err(FrameError::InvalidConfig(format!(
                "light count {} exceeds the maximum of {}",
                self.light_count, MAX_LIGHTS
            )));
        }
        if !self.tile_size.is_power_of_two() {
            log::warn!(
                "Tile size {} is not a power of two; tile shaders assume it is",
                self.tile_size
            );
        }
        Ok(())
    }

    /// Presentation mode implied by the vsync toggle.
    pub fn present_mode(&self) -> PresentMode {
        if self.vsync {
            PresentMode::Fifo
        } else {
            PresentMode::Mailbox
        }
    }

    /// Whether switching from `self` to `next` invalidates the stage graph
    /// and its size-dependent resources.
    pub fn requires_rebuild(&self, next: &FrameConfig) -> bool {
        self.culling != next.culling || self.tile_size != next.tile_size
    }

    /// Whether switching from `self` to `next` needs a new swapchain.
    pub fn requires_swapchain_recreate(&self, next: &FrameConfig) -> bool {
        self.present_mode() != next.present_mode()
    }
}

/// Startup settings of the frame core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererSettings {
    /// Frames recorded ahead of the GPU (1 or 2).
    pub frames_in_flight: u32,
    /// How execution domains map onto hardware queues.
    pub topology: QueueTopology,
    /// Hardware sub-group width used by the BVH reduction.
    pub subgroup_size: u32,
    /// Depth slices of the cluster key space.
    pub depth_slices: u32,
    /// Pages in the cluster page pool (excluding the null page).
    pub page_capacity: u32,
    /// Light indices per cluster page.
    pub page_size: u32,
    /// Bytes reserved for scene vertex and index data.
    pub geometry_capacity: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            topology: QueueTopology::default(),
            subgroup_size: 32,
            depth_slices: 32,
            page_capacity: 16384,
            page_size: 32,
            geometry_capacity: 64 * 1024 * 1024,
        }
    }
}

impl RendererSettings {
    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames_in_flight: u32) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    /// Set the queue topology.
    pub fn with_topology(mut self, topology: QueueTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cluster page pool capacity.
    pub fn with_page_capacity(mut self, page_capacity: u32) -> Self {
        self.page_capacity = page_capacity;
        self
    }

    /// Set the number of cluster depth slices.
    pub fn with_depth_slices(mut self, depth_slices: u32) -> Self {
        self.depth_slices = depth_slices;
        self
    }

    /// Check the settings.
    pub fn validate(&self) -> Result<(), FrameError> {
        if !(1..=2).contains(&self.frames_in_flight) {
            return Err(FrameError::InvalidConfig(format!(
                "frames in flight must be 1 or 2, got {}",
                self.frames_in_flight
            )));
        }
        if self.subgroup_size < 2 || !self.subgroup_size.is_power_of_two() {
            return Err(FrameError::InvalidConfig(format!(
                "subgroup size must be a power of two of at least 2, got {}",
                self.subgroup_size
            )));
        }
        if self.depth_slices == 0 || self.page_capacity == 0 || self.page_size == 0 {
            return Err(FrameError::InvalidConfig(
                "cluster depth slices, page capacity and page size must be non-zero".into(),
            ));
        }
        // Page pool words are addressed with 32-bit indices.
        let pool_words = self
            .page_capacity
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(self.page_size.checked_add(1)?));
        if pool_words.is_none() {
            return Err(FrameError::InvalidConfig(format!(
                "cluster page pool of {} pages of {} lights overflows 32-bit addressing",
                self.page_capacity, self.page_size
            )));
        }
        Ok(())
    }

    /// Cluster grid over `tiles`, rejecting key spaces that do not fit in
    /// 32 bits.
    pub fn cluster_grid(&self, tiles: TileGrid) -> Result<ClusterGrid, FrameError> {
        let grid = ClusterGrid::new(tiles, self.depth_slices);
        match grid.checked_key_space() {
            Some(_) => Ok(grid),
            None => Err(FrameError::InvalidConfig(format!(
                "cluster key space of {}x{} tiles and {} depth slices overflows 32 bits",
                tiles.tiles_x, tiles.tiles_y, self.depth_slices
            ))),
        }
    }

    /// Warn when the page pool can saturate for a cluster key space.
    ///
    /// Saturation is legal (excess clusters see no lights) but usually means
    /// the pool is undersized for the surface.
    pub fn warn_on_saturation(&self, key_space: u32) -> bool {
        let saturates = self.page_capacity < key_space;
        if saturates {
            log::warn!(
                "Cluster page pool ({} pages) is smaller than the key space ({} clusters); \
                 dense scenes will drop lights",
                self.page_capacity,
                key_space
            );
        }
        saturates
    }
}
