//! Barrier batching for Vulkan.
//!
//! Consecutive barrier commands of a stream, plus the image layout
//! transitions the next work command needs, are collected into one
//! [`BarrierBatch`] and submitted as a single pipeline barrier. Ownership
//! transfers between queue families carry the family indices of both
//! domains; same-family transfers and intra-stream dependencies use
//! `VK_QUEUE_FAMILY_IGNORED`.

use ash::vk;

use super::conversion::{convert_access_flags, convert_pipeline_stages, layout_stage_access};
use crate::command::{BarrierKind, BufferBarrier, MemoryBarrier};
use crate::domain::DomainMap;

/// A batch of buffer, image and memory barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    buffer_barriers: Vec<vk::BufferMemoryBarrier<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier<'static>>,
    memory_barriers: Vec<vk::MemoryBarrier<'static>>,
    /// Source pipeline stage mask (union of all barriers).
    src_stage_mask: vk::PipelineStageFlags,
    /// Destination pipeline stage mask (union of all barriers).
    dst_stage_mask: vk::PipelineStageFlags,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one half of an ownership transfer, or a same-family transfer.
    pub fn add_buffer_barrier(&mut self, barrier: &BufferBarrier, buffer: vk::Buffer, map: &DomainMap) {
        let (src_family, dst_family) = match barrier.kind {
            BarrierKind::Release | BarrierKind::Acquire => {
                (map.family(barrier.src_domain), map.family(barrier.dst_domain))
            }
            BarrierKind::Memory => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        };
        // The release half makes writes available, the acquire half visible.
        let src_access = match barrier.kind {
            BarrierKind::Acquire => vk::AccessFlags::empty(),
            _ => convert_access_flags(barrier.src_access),
        };
        let dst_access = match barrier.kind {
            BarrierKind::Release => vk::AccessFlags::empty(),
            _ => convert_access_flags(barrier.dst_access),
        };

        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .src_queue_family_index(src_family)
                .dst_queue_family_index(dst_family)
                .buffer(buffer)
                .offset(barrier.range.offset)
                .size(barrier.range.size),
        );
        self.src_stage_mask |= convert_pipeline_stages(barrier.src_stages());
        self.dst_stage_mask |= convert_pipeline_stages(barrier.dst_stages());
    }

    /// Add a global memory dependency.
    pub fn add_memory_barrier(&mut self, barrier: &MemoryBarrier) {
        self.memory_barriers.push(
            vk::MemoryBarrier::default()
                .src_access_mask(convert_access_flags(barrier.src_access))
                .dst_access_mask(convert_access_flags(barrier.dst_access)),
        );
        self.src_stage_mask |= convert_pipeline_stages(barrier.src_stages);
        self.dst_stage_mask |= convert_pipeline_stages(barrier.dst_stages);
    }

    /// Add an image layout transition.
    ///
    /// Transitions out of `UNDEFINED` discard the image contents.
    pub fn add_image_transition(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_stages, src_access) = layout_stage_access(old_layout);
        let (dst_stages, dst_access) = layout_stage_access(new_layout);
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                }),
        );
        self.src_stage_mask |= src_stages;
        self.dst_stage_mask |= dst_stages;
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty()
            && self.image_barriers.is_empty()
            && self.memory_barriers.is_empty()
    }

    /// Get the number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len() + self.memory_barriers.len()
    }

    /// Buffer barriers collected so far.
    pub fn buffer_barriers(&self) -> &[vk::BufferMemoryBarrier<'static>] {
        &self.buffer_barriers
    }

    /// Image transitions collected so far.
    pub fn image_barriers(&self) -> &[vk::ImageMemoryBarrier<'static>] {
        &self.image_barriers
    }

    /// Combined source and destination stage masks.
    pub fn stage_masks(&self) -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
        (self.src_stage_mask, self.dst_stage_mask)
    }

    /// Submit all barriers in a single pipeline barrier command.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage_mask,
                self.dst_stage_mask,
                vk::DependencyFlags::empty(),
                &self.memory_barriers,
                &self.buffer_barriers,
                &self.image_barriers,
            );
        }
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.buffer_barriers.clear();
        self.image_barriers.clear();
        self.memory_barriers.clear();
        self.src_stage_mask = vk::PipelineStageFlags::empty();
        self.dst_stage_mask = vk::PipelineStageFlags::empty();
    }
}
