//! Sparse depth-cluster structure.
//!
//! Clusters are screen-space tiles subdivided into depth slices. Only
//! clusters touched by visible depth samples get storage:
//!
//! - the **page table** maps every cluster key to a page index, 0 meaning
//!   "no page" (page 0 is the reserved null page);
//! - the **page pool** holds a fixed number of pages, each a header (the
//!   owning cluster key) followed by `page_size` light indices;
//! - the **unique cluster list** is the compacted list of allocated cluster
//!   keys, its length written by the GPU and consumed by an indirect
//!   dispatch.
//!
//! Every frame runs four dispatches over a zeroed structure:
//!
//! 1. **flag**: mark the page table entry of each touched cluster;
//! 2. **alloc**: bump-allocate a page for each flagged entry. The page
//!    counter is seeded to 1 and doubles as the x workgroup count of the
//!    compact dispatch, so compaction always runs at least one workgroup.
//!    When the pool is exhausted the entry keeps the null page and the
//!    overflow counter increments;
//! 3. **store**: write each allocated cluster's key into its page header;
//! 4. **compact**: append the header of every allocated page to the unique
//!    list and write the light-cull dispatch arguments.
//!
//! The passes are plain functions over buffer words so a CPU backend can
//! run them in place. [`ClusterState`] owns a zeroed structure and runs
//! all four.

use crate::resource::Extent2d;

/// Page table value of a flagged cluster that has no page yet.
pub const FLAGGED: u32 = 1 << 31;

/// Threads per workgroup of the flag pass, per dimension.
pub const FLAG_WORKGROUP_SIZE: u32 = 8;

/// Threads per workgroup of the alloc and store passes.
pub const KEY_WORKGROUP_SIZE: u32 = 64;

/// Screen-space tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileGrid {
    /// Tiles along x.
    pub tiles_x: u32,
    /// Tiles along y.
    pub tiles_y: u32,
    /// Tile edge in pixels.
    pub tile_size: u32,
}

impl TileGrid {
    /// Tile grid covering `extent` with tiles of `tile_size` pixels.
    pub fn new(extent: Extent2d, tile_size: u32) -> Self {
        Self {
            tiles_x: extent.width.div_ceil(tile_size),
            tiles_y: extent.height.div_ceil(tile_size),
            tile_size,
        }
    }

    /// Number of tiles.
    pub fn count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Tile containing a pixel.
    pub fn tile_of(&self, x: u32, y: u32) -> (u32, u32) {
        (
            (x / self.tile_size).min(self.tiles_x.saturating_sub(1)),
            (y / self.tile_size).min(self.tiles_y.saturating_sub(1)),
        )
    }
}

/// Tile grid extended with depth slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterGrid {
    /// Screen tiles.
    pub tiles: TileGrid,
    /// Depth slices per tile.
    pub depth_slices: u32,
}

impl ClusterGrid {
    /// Create a cluster grid.
    pub fn new(tiles: TileGrid, depth_slices: u32) -> Self {
        Self {
            tiles,
            depth_slices,
        }
    }

    /// Number of cluster keys.
    ///
    /// Grids built from validated settings never overflow; see
    /// [`ClusterGrid::checked_key_space`].
    pub fn key_space(&self) -> u32 {
        self.tiles.count() * self.depth_slices
    }

    /// Number of cluster keys, or `None` when it does not fit in 32 bits.
    pub fn checked_key_space(&self) -> Option<u32> {
        self.tiles
            .tiles_x
            .checked_mul(self.tiles.tiles_y)?
            .checked_mul(self.depth_slices)
    }

    /// Key of a cluster.
    pub fn key(&self, tile_x: u32, tile_y: u32, slice: u32) -> u32 {
        (slice * self.tiles.tiles_y + tile_y) * self.tiles.tiles_x + tile_x
    }

    /// Depth slice of a normalized depth in `[0, 1]`.
    pub fn slice_of(&self, depth: f32) -> u32 {
        ((depth.clamp(0.0, 1.0) * self.depth_slices as f32) as u32).min(self.depth_slices - 1)
    }

    /// Key of the cluster containing a depth sample.
    pub fn key_of_sample(&self, x: u32, y: u32, depth: f32) -> u32 {
        let (tx, ty) = self.tiles.tile_of(x, y);
        self.key(tx, ty, self.slice_of(depth))
    }
}

/// Counters and indirect arguments written by the alloc and compact passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ClusterCounters {
    /// Compact dispatch arguments; `x` is the page counter.
    pub compact_dispatch: [u32; 3],
    /// Light-cull dispatch arguments; `x` is the unique cluster count.
    pub cull_dispatch: [u32; 3],
    /// Clusters appended to the unique list.
    pub unique_count: u32,
    /// Flagged clusters that found the pool exhausted.
    pub overflow: u32,
}

static_assertions::assert_eq_size!(ClusterCounters, [u8; 32]);

impl ClusterCounters {
    /// Byte offset of the compact dispatch arguments.
    pub const COMPACT_ARGS_OFFSET: u64 = 0;
    /// Byte offset of the light-cull dispatch arguments.
    pub const CULL_ARGS_OFFSET: u64 = 12;
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<ClusterCounters>() as u64;

    /// Counters as written before the flag pass: page counter at 1, every
    /// y and z workgroup count at 1.
    pub fn seeded() -> Self {
        Self {
            compact_dispatch: [1, 1, 1],
            cull_dispatch: [0, 1, 1],
            unique_count: 0,
            overflow: 0,
        }
    }

    /// Seeded counters as 32-bit words for a buffer update.
    pub fn seeded_words() -> Vec<u32> {
        bytemuck::cast::<Self, [u32; 8]>(Self::seeded()).to_vec()
    }
}

/// Buffer sizes of the cluster structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    /// Cluster grid.
    pub grid: ClusterGrid,
    /// Allocatable pages, excluding the null page.
    pub page_capacity: u32,
    /// Light indices per page.
    pub page_size: u32,
}

impl ClusterLayout {
    /// Create a layout.
    pub fn new(grid: ClusterGrid, page_capacity: u32, page_size: u32) -> Self {
        Self {
            grid,
            page_capacity,
            page_size,
        }
    }

    /// Words per page: header plus light indices.
    pub fn page_stride(&self) -> u32 {
        1 + self.page_size
    }

    /// Page table size in bytes.
    pub fn page_table_bytes(&self) -> u64 {
        self.grid.key_space() as u64 * 4
    }

    /// Page pool size in bytes, including the null page.
    pub fn page_pool_bytes(&self) -> u64 {
        (self.page_capacity as u64 + 1) * self.page_stride() as u64 * 4
    }

    /// Unique cluster list size in bytes.
    pub fn unique_list_bytes(&self) -> u64 {
        self.page_capacity as u64 * 4
    }

    /// Workgroups of the flag pass for a depth image of `extent`.
    pub fn flag_groups(&self, extent: Extent2d) -> [u32; 3] {
        [
            extent.width.div_ceil(FLAG_WORKGROUP_SIZE),
            extent.height.div_ceil(FLAG_WORKGROUP_SIZE),
            1,
        ]
    }

    /// Workgroups of the alloc and store passes.
    pub fn key_groups(&self) -> [u32; 3] {
        [self.grid.key_space().div_ceil(KEY_WORKGROUP_SIZE).max(1), 1, 1]
    }

    /// Push constants shared by the cluster passes.
    pub fn push(&self) -> ClusterPush {
        ClusterPush {
            tiles_x: self.grid.tiles.tiles_x,
            tiles_y: self.grid.tiles.tiles_y,
            tile_size: self.grid.tiles.tile_size,
            depth_slices: self.grid.depth_slices,
            key_space: self.grid.key_space(),
            page_capacity: self.page_capacity,
            page_size: self.page_size,
            _pad: 0,
        }
    }
}

/// Push constants of the cluster passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ClusterPush {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_size: u32,
    pub depth_slices: u32,
    pub key_space: u32,
    pub page_capacity: u32,
    pub page_size: u32,
    pub _pad: u32,
}

impl ClusterPush {
    /// Layout the push constants describe.
    pub fn layout(&self) -> ClusterLayout {
        let tiles = TileGrid {
            tiles_x: self.tiles_x,
            tiles_y: self.tiles_y,
            tile_size: self.tile_size,
        };
        ClusterLayout::new(
            ClusterGrid::new(tiles, self.depth_slices),
            self.page_capacity,
            self.page_size,
        )
    }
}

/// Flag pass: mark the page table entry of every touched cluster.
///
/// Keys outside the table are ignored.
pub fn flag_clusters(page_table: &mut [u32], keys: impl IntoIterator<Item = u32>) {
    for key in keys {
        if let Some(entry) = page_table.get_mut(key as usize) {
            *entry = FLAGGED;
        }
    }
}

/// Alloc pass: give every flagged entry the next free page.
///
/// The page counter is `compact_dispatch[0]`. Once it passes
/// `page_capacity` the entry falls back to the null page and `overflow`
/// counts it.
pub fn alloc_pages(page_table: &mut [u32], counters: &mut ClusterCounters, page_capacity: u32) {
    for entry in page_table.iter_mut().filter(|entry| **entry == FLAGGED) {
        let page = counters.compact_dispatch[0];
        if page <= page_capacity {
            counters.compact_dispatch[0] += 1;
            *entry = page;
        } else {
            *entry = 0;
            counters.overflow += 1;
        }
    }
}

/// Store pass: write each allocated cluster's key into its page header.
pub fn store_headers(page_table: &[u32], page_pool: &mut [u32], page_stride: u32) {
    for (key, &page) in page_table.iter().enumerate() {
        if page == 0 {
            continue;
        }
        if let Some(header) = page_pool.get_mut(page as usize * page_stride as usize) {
            *header = key as u32;
        }
    }
}

/// Compact pass, one workgroup per page slot including the null page.
///
/// Appends the header of every allocated page to `unique` and writes the
/// light-cull dispatch arguments.
pub fn compact_pages(
    page_pool: &[u32],
    page_stride: u32,
    unique: &mut [u32],
    counters: &mut ClusterCounters,
) {
    let [groups, _, _] = counters.compact_dispatch;
    for page in 1..groups {
        let Some(&header) = page_pool.get(page as usize * page_stride as usize) else {
            break;
        };
        let Some(slot) = unique.get_mut(counters.unique_count as usize) else {
            break;
        };
        *slot = header;
        counters.unique_count += 1;
    }
    counters.cull_dispatch = [counters.unique_count, 1, 1];
}

/// CPU emulation of one frame of the cluster passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    layout: ClusterLayout,
    page_table: Vec<u32>,
    page_pool: Vec<u32>,
    unique: Vec<u32>,
    counters: ClusterCounters,
}

impl ClusterState {
    /// Zeroed structure with seeded counters.
    pub fn new(layout: ClusterLayout) -> Self {
        let pool_words = (layout.page_capacity as usize + 1) * layout.page_stride() as usize;
        Self {
            layout,
            page_table: vec![0; layout.grid.key_space() as usize],
            page_pool: vec![0; pool_words],
            unique: vec![0; layout.page_capacity as usize],
            counters: ClusterCounters::seeded(),
        }
    }

    /// Flag pass.
    pub fn flag(&mut self, keys: impl IntoIterator<Item = u32>) {
        flag_clusters(&mut self.page_table, keys);
    }

    /// Alloc pass.
    pub fn alloc(&mut self) {
        alloc_pages(&mut self.page_table, &mut self.counters, self.layout.page_capacity);
    }

    /// Store pass.
    pub fn store(&mut self) {
        store_headers(&self.page_table, &mut self.page_pool, self.layout.page_stride());
    }

    /// Compact pass.
    pub fn compact(&mut self) {
        compact_pages(
            &self.page_pool,
            self.layout.page_stride(),
            &mut self.unique,
            &mut self.counters,
        );
    }

    /// Run all four passes over the clusters touched by `keys`.
    pub fn run(layout: ClusterLayout, keys: impl IntoIterator<Item = u32>) -> Self {
        let mut state = Self::new(layout);
        state.flag(keys);
        state.alloc();
        state.store();
        state.compact();
        state
    }

    /// Counters after the last pass.
    pub fn counters(&self) -> ClusterCounters {
        self.counters
    }

    /// Page assigned to a cluster (0 when none).
    pub fn page_of(&self, key: u32) -> u32 {
        self.page_table[key as usize]
    }

    /// Header word of a page.
    pub fn header_of(&self, page: u32) -> u32 {
        self.page_pool[page as usize * self.layout.page_stride() as usize]
    }

    /// Compacted cluster keys.
    pub fn unique_clusters(&self) -> &[u32] {
        &self.unique[..self.counters.unique_count as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1920, 1080, 32, 60, 34)]
    #[case(1280, 720, 16, 80, 45)]
    #[case(1, 1, 32, 1, 1)]
    #[case(33, 64, 32, 2, 2)]
    fn test_tile_grid(
        #[case] width: u32,
        #[case] height: u32,
        #[case] tile: u32,
        #[case] tiles_x: u32,
        #[case] tiles_y: u32,
    ) {
        let grid = TileGrid::new(Extent2d::new(width, height), tile);
        assert_eq!((grid.tiles_x, grid.tiles_y), (tiles_x, tiles_y));
    }

    fn layout(capacity: u32) -> ClusterLayout {
        let tiles = TileGrid::new(Extent2d::new(128, 64), 32);
        ClusterLayout::new(ClusterGrid::new(tiles, 4), capacity, 16)
    }

    #[test]
    fn test_keys_are_dense() {
        let grid = layout(8).grid;
        assert_eq!(grid.key_space(), 4 * 2 * 4);
        assert_eq!(grid.key(0, 0, 0), 0);
        assert_eq!(grid.key(3, 1, 3), grid.key_space() - 1);
        assert_eq!(grid.key_of_sample(127, 63, 1.0), grid.key_space() - 1);
    }

    #[test]
    fn test_no_flagged_clusters_still_dispatches_once() {
        let state = ClusterState::run(layout(8), []);
        let counters = state.counters();
        assert_eq!(counters.compact_dispatch, [1, 1, 1]);
        assert_eq!(counters.cull_dispatch, [0, 1, 1]);
        assert!(state.unique_clusters().is_empty());
    }

    #[test]
    fn test_flagged_clusters_compacted() {
        let state = ClusterState::run(layout(8), [5, 2, 9, 5]);
        assert_eq!(state.counters().compact_dispatch[0], 4);
        assert_eq!(state.counters().cull_dispatch, [3, 1, 1]);

        let mut unique = state.unique_clusters().to_vec();
        unique.sort_unstable();
        assert_eq!(unique, vec![2, 5, 9]);
        assert_ne!(state.page_of(2), 0);
        assert_eq!(state.page_of(3), 0);
    }

    #[test]
    fn test_pool_exhaustion_saturates() {
        let state = ClusterState::run(layout(2), [1, 2, 3, 4]);
        let counters = state.counters();
        assert_eq!(counters.unique_count, 2);
        assert_eq!(counters.overflow, 2);
        assert_eq!(counters.compact_dispatch[0], 3);
        // Saturated clusters keep the null page.
        assert_eq!(state.page_of(3), 0);
        assert_eq!(state.page_of(4), 0);
    }

    #[test]
    fn test_out_of_range_keys_ignored() {
        let state = ClusterState::run(layout(8), [3, 32, u32::MAX]);
        assert_eq!(state.counters().unique_count, 1);
        assert_eq!(state.unique_clusters(), &[3]);
    }

    #[test]
    fn test_headers_land_at_page_stride() {
        let state = ClusterState::run(layout(8), [7]);
        let page = state.page_of(7);
        assert_eq!(page, 1);
        assert_eq!(state.header_of(page), 7);
    }

    #[test]
    fn test_push_round_trips_layout() {
        let layout = layout(8);
        assert_eq!(layout.push().layout(), layout);
    }

    #[rstest]
    #[case(TileGrid { tiles_x: 60, tiles_y: 34, tile_size: 32 }, 32, Some(60 * 34 * 32))]
    #[case(TileGrid { tiles_x: 65536, tiles_y: 65536, tile_size: 1 }, 1, None)]
    #[case(TileGrid { tiles_x: 4096, tiles_y: 4096, tile_size: 1 }, 256, None)]
    #[case(TileGrid { tiles_x: 4096, tiles_y: 4096, tile_size: 1 }, 255, Some(4096 * 4096 * 255))]
    fn test_checked_key_space(
        #[case] tiles: TileGrid,
        #[case] depth_slices: u32,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(ClusterGrid::new(tiles, depth_slices).checked_key_space(), expected);
    }

    #[test]
    fn test_layout_sizes() {
        let layout = layout(8);
        assert_eq!(layout.page_table_bytes(), 32 * 4);
        assert_eq!(layout.page_pool_bytes(), 9 * 17 * 4);
        assert_eq!(layout.key_groups(), [1, 1, 1]);
        assert_eq!(ClusterCounters::seeded_words(), vec![1, 1, 1, 0, 1, 1, 0, 0]);
    }
}
