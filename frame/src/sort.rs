//! GPU light sort planning and CPU emulation.
//!
//! Lights are sorted by a 64-bit key: the 30-bit Morton code of the
//! quantized position in the high word and the light's original index in
//! the low word, so keys are unique and the order is deterministic.
//!
//! The sort runs in phases, each one dispatch:
//!
//! 1. **Block**: compute keys, pad to a power of two (at least one block)
//!    with [`SORT_SENTINEL`], and bitonic-sort every [`SORT_BLOCK_SIZE`]
//!    block independently.
//! 2. **Merge**: for each doubling block size `S` up to the padded count,
//!    merge pairs of sorted `S/2` runs with one flip step followed by
//!    half-cleaner steps.
//! 3. **Gather**: copy the sorted keys into the output set and write the
//!    light records in sorted order.
//!
//! Each phase reads the set written by the previous phase and writes the
//! other one (see [`DoubleBuffer`](crate::double_buffer::DoubleBuffer)).
//! The functions here perform exactly the same steps on the CPU; the dummy
//! backend uses them to execute recorded sort dispatches.

use crate::light::{LightBounds, LightRecord};
use crate::program::ProgramId;

/// Elements sorted by one workgroup in the block phase.
pub const SORT_BLOCK_SIZE: u32 = 128;

/// Padding key. Sorts after every real key.
pub const SORT_SENTINEL: u64 = u64::MAX;

/// Threads per workgroup of the gather phase.
pub const GATHER_WORKGROUP_SIZE: u32 = 64;

/// Number of keys the sort operates on for `count` lights.
pub fn padded_count(count: u32) -> u32 {
    count.max(1).next_power_of_two().max(SORT_BLOCK_SIZE)
}

/// Spread the low 10 bits of `v` so two zero bits separate each bit.
fn expand_bits(v: u32) -> u32 {
    let mut v = v & 0x3ff;
    v = (v | (v << 16)) & 0x0300_00ff;
    v = (v | (v << 8)) & 0x0300_f00f;
    v = (v | (v << 4)) & 0x030c_30c3;
    v = (v | (v << 2)) & 0x0924_9249;
    v
}

/// 30-bit Morton code of a position inside `bounds`.
pub fn morton30(position: [f32; 3], bounds_min: [f32; 3], inv_extent: f32) -> u32 {
    let quantize = |axis: usize| {
        let t = (position[axis] - bounds_min[axis]) * inv_extent;
        (t * 1023.0).clamp(0.0, 1023.0) as u32
    };
    (expand_bits(quantize(0)) << 2) | (expand_bits(quantize(1)) << 1) | expand_bits(quantize(2))
}

/// Sort key of light `index`.
pub fn sort_key(morton: u32, index: u32) -> u64 {
    ((morton as u64) << 32) | index as u64
}

/// Original light index stored in a key.
pub fn key_index(key: u64) -> u32 {
    key as u32
}

/// One dispatch of the sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    /// Key computation and per-block bitonic sort.
    Block,
    /// Merge of sorted runs into runs of `block_size`.
    Merge {
        /// Size of the merged runs.
        block_size: u32,
    },
    /// Sorted record output.
    Gather,
}

impl SortPhase {
    /// Program executing the phase.
    pub fn program(self) -> ProgramId {
        match self {
            Self::Block => ProgramId::LightSortBlock,
            Self::Merge { .. } | Self::Gather => ProgramId::LightSortMerge,
        }
    }

    /// Workgroup counts of the phase's dispatch.
    pub fn groups(self, count: u32, padded: u32) -> [u32; 3] {
        match self {
            Self::Block | Self::Merge { .. } => [padded / SORT_BLOCK_SIZE, 1, 1],
            Self::Gather => [count.max(1).div_ceil(GATHER_WORKGROUP_SIZE), 1, 1],
        }
    }

    fn code(self) -> (u32, u32) {
        match self {
            Self::Block => (0, SORT_BLOCK_SIZE),
            Self::Merge { block_size } => (1, block_size),
            Self::Gather => (2, 0),
        }
    }

    /// Decode a phase from its push constants.
    pub fn from_push(push: &SortPush) -> Option<Self> {
        match push.phase {
            0 => Some(Self::Block),
            1 => Some(Self::Merge {
                block_size: push.block_size,
            }),
            2 => Some(Self::Gather),
            _ => None,
        }
    }
}

/// Push constants of every sort dispatch.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SortPush {
    pub phase: u32,
    pub block_size: u32,
    pub count: u32,
    pub padded: u32,
    pub bounds_min: [f32; 3],
    pub inv_extent: f32,
}

static_assertions::assert_eq_size!(SortPush, [u8; 32]);

/// Phase sequence for one frame's light count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPlan {
    count: u32,
    padded: u32,
    phases: Vec<SortPhase>,
}

impl SortPlan {
    /// Plan the sort of `count` lights.
    pub fn new(count: u32) -> Self {
        let padded = padded_count(count);
        let mut phases = vec![SortPhase::Block];
        let mut block_size = SORT_BLOCK_SIZE * 2;
        while block_size <= padded {
            phases.push(SortPhase::Merge { block_size });
            block_size *= 2;
        }
        phases.push(SortPhase::Gather);
        Self {
            count,
            padded,
            phases,
        }
    }

    /// Number of real lights.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Number of keys including padding.
    pub fn padded(&self) -> u32 {
        self.padded
    }

    /// Phases in dispatch order.
    pub fn phases(&self) -> &[SortPhase] {
        &self.phases
    }

    /// Number of merge phases.
    pub fn merge_count(&self) -> usize {
        self.phases.len() - 2
    }

    /// Push constants of a phase.
    pub fn push(&self, phase: SortPhase, bounds: &LightBounds) -> SortPush {
        let (code, block_size) = phase.code();
        SortPush {
            phase: code,
            block_size,
            count: self.count,
            padded: self.padded,
            bounds_min: bounds.min,
            inv_extent: 1.0 / bounds.extent(),
        }
    }
}

/// Keys of `lights`, padded with sentinels to `padded` entries.
pub fn compute_keys(lights: &[LightRecord], padded: u32, push: &SortPush) -> Vec<u64> {
    let mut keys = vec![SORT_SENTINEL; padded as usize];
    for (i, light) in lights.iter().enumerate().take(push.count as usize) {
        keys[i] = sort_key(
            morton30(light.position, push.bounds_min, push.inv_extent),
            i as u32,
        );
    }
    keys
}

/// Bitonic sort of every `SORT_BLOCK_SIZE` block, ascending.
pub fn sort_blocks(keys: &mut [u64]) {
    let block = SORT_BLOCK_SIZE as usize;
    for chunk in keys.chunks_mut(block) {
        let mut k = 2;
        while k <= chunk.len() {
            let mut j = k / 2;
            while j > 0 {
                for i in 0..chunk.len() {
                    let partner = i ^ j;
                    if partner > i {
                        let ascending = i & k == 0;
                        if (chunk[i] > chunk[partner]) == ascending {
                            chunk.swap(i, partner);
                        }
                    }
                }
                j /= 2;
            }
            k *= 2;
        }
    }
}

/// Merge sorted runs of `block_size / 2` into sorted runs of `block_size`.
pub fn merge_blocks(keys: &mut [u64], block_size: u32) {
    let size = block_size as usize;
    for chunk in keys.chunks_mut(size) {
        // Flip: compare mirrored pairs so both halves become bitonic.
        for i in 0..size / 2 {
            let partner = size - 1 - i;
            if chunk[i] > chunk[partner] {
                chunk.swap(i, partner);
            }
        }
        let mut j = size / 4;
        while j > 0 {
            for i in 0..size {
                if i & j == 0 && chunk[i] > chunk[i + j] {
                    chunk.swap(i, i + j);
                }
            }
            j /= 2;
        }
    }
}

/// Sorted records for the first `count` keys.
pub fn gather(keys: &[u64], lights: &[LightRecord], count: u32) -> Vec<LightRecord> {
    keys.iter()
        .take(count as usize)
        .map(|&key| lights[key_index(key) as usize])
        .collect()
}

/// Run every phase of `plan` on the CPU. Returns the sorted keys (with
/// padding) and the sorted records.
pub fn emulate(plan: &SortPlan, lights: &[LightRecord]) -> (Vec<u64>, Vec<LightRecord>) {
    let bounds = LightBounds::of(&lights[..plan.count() as usize]);
    let mut keys = Vec::new();
    let mut sorted = Vec::new();
    for &phase in plan.phases() {
        let push = plan.push(phase, &bounds);
        match phase {
            SortPhase::Block => {
                keys = compute_keys(lights, plan.padded(), &push);
                sort_blocks(&mut keys);
            }
            SortPhase::Merge { block_size } => merge_blocks(&mut keys, block_size),
            SortPhase::Gather => sorted = gather(&keys, lights, plan.count()),
        }
    }
    (keys, sorted)
}
