//! Command stream encoding.
//!
//! Encoding runs in two steps. [`plan_stream`] walks a
//! [`CommandStream`] without touching the device: it batches barrier
//! commands, inserts the image layout transitions each work command needs
//! and resolves ownership seeds. [`StreamEncoder::record`] then replays the
//! plan into a command buffer.
//!
//! An ownership seed emits no Vulkan command. Every frame buffer is created
//! with `VK_SHARING_MODE_EXCLUSIVE`, so the first queue family that uses a
//! buffer with undefined contents takes ownership of it without a transfer.
//! Seeds of images additionally reset the tracked layout to `UNDEFINED`.

use std::collections::HashMap;

use ash::vk;

use super::PipelineFactory;
use super::barriers::BarrierBatch;
use super::conversion::{descriptor_type, image_layout_for};
use crate::command::{Binding, Command, CommandStream, RenderTarget, ResourceBinding};
use crate::domain::DomainMap;
use crate::error::FrameError;
use crate::program::{ProgramId, ProgramRef};
use crate::resource::ResourceId;

/// Push constant bytes every program layout reserves.
pub const PUSH_CONSTANT_BYTES: u32 = 128;

/// Largest inline update `vkCmdUpdateBuffer` accepts.
const MAX_INLINE_UPDATE: usize = 65536;

/// Native handles of an image the encoder renders to or samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
    pub extent: vk::Extent2D,
}

/// Lookup of the native objects behind frame resources.
pub trait NativeResources {
    /// Buffer behind a resource, if it is a buffer.
    fn buffer(&self, id: ResourceId) -> Option<vk::Buffer>;

    /// Image behind a resource, if it is an image.
    fn image(&self, id: ResourceId) -> Option<NativeImage>;

    /// Swapchain image by index.
    fn swapchain_image(&self, index: u32) -> Option<NativeImage>;
}

/// Pipeline objects of a built program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeProgram {
    pub id: ProgramId,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
}

impl NativeProgram {
    /// Bind point of the pipeline.
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        if self.id.is_compute() {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        }
    }

    /// Shader stages that see descriptors and push constants.
    pub fn shader_stages(&self) -> vk::ShaderStageFlags {
        if self.id.is_compute() {
            vk::ShaderStageFlags::COMPUTE
        } else {
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        }
    }
}

/// Current layout of every frame image.
///
/// Images never leave the primary domain, so submission order on one queue
/// is execution order and the tracked layout carries across streams.
#[derive(Debug, Default)]
pub struct ImageLayouts {
    layouts: HashMap<ResourceId, vk::ImageLayout>,
}

impl ImageLayouts {
    /// Create an empty tracker; every image starts `UNDEFINED`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked layout of an image.
    pub fn get(&self, id: ResourceId) -> vk::ImageLayout {
        self.layouts
            .get(&id)
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    fn set(&mut self, id: ResourceId, layout: vk::ImageLayout) {
        self.layouts.insert(id, layout);
    }

    /// Forget the contents of an image.
    pub fn discard(&mut self, id: ResourceId) {
        self.layouts.remove(&id);
    }

    /// Forget every image (after resources are recreated).
    pub fn clear(&mut self) {
        self.layouts.clear();
    }
}

/// One step of an encoded stream.
#[derive(Debug)]
pub enum EncodeStep {
    /// A pipeline barrier.
    Barriers(BarrierBatch),
    /// The work command at this index of the stream.
    Command(usize),
}

/// Device-free translation of one stream.
#[derive(Debug, Default)]
pub struct StreamPlan {
    steps: Vec<EncodeStep>,
    seeded: Vec<ResourceId>,
}

impl StreamPlan {
    /// Steps in recording order.
    pub fn steps(&self) -> &[EncodeStep] {
        &self.steps
    }

    /// Resources whose first owner this stream establishes.
    pub fn seeded(&self) -> &[ResourceId] {
        &self.seeded
    }

    /// Number of pipeline barriers the plan records.
    pub fn barrier_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, EncodeStep::Barriers(_)))
            .count()
    }
}

fn missing(what: &str, id: impl std::fmt::Display) -> FrameError {
    FrameError::Internal(format!("no native {what} for {id}"))
}

/// Translate the synchronization of a stream and order it around the work.
///
/// Barrier commands and seeds between two work commands end up in a single
/// batch, together with the layout transitions of the following command.
/// Swapchain images rendered by the stream are transitioned for
/// presentation after the last command.
pub fn plan_stream(
    stream: &CommandStream,
    map: &DomainMap,
    natives: &dyn NativeResources,
    layouts: &mut ImageLayouts,
) -> Result<StreamPlan, FrameError> {
    let mut plan = StreamPlan::default();
    let mut batch = BarrierBatch::new();
    let mut presented = Vec::new();

    for (index, command) in stream.commands().iter().enumerate() {
        match command {
            Command::BufferBarrier(barrier) => {
                let buffer = natives
                    .buffer(barrier.resource)
                    .ok_or_else(|| missing("buffer", barrier.resource))?;
                batch.add_buffer_barrier(barrier, buffer, map);
            }
            Command::MemoryBarrier(barrier) => batch.add_memory_barrier(barrier),
            Command::SeedOwnership { resource } => {
                layouts.discard(*resource);
                plan.seeded.push(*resource);
            }
            work => {
                for (resource, access) in work.accesses() {
                    let Some(image) = natives.image(resource) else {
                        continue;
                    };
                    let old = layouts.get(resource);
                    let new = image_layout_for(access);
                    if old != new {
                        batch.add_image_transition(image.image, image.aspect, old, new);
                        layouts.set(resource, new);
                    }
                }
                if let Command::BeginRendering { color, .. } = work {
                    for target in color {
                        if let RenderTarget::Swapchain(image_index) = target {
                            let image = natives
                                .swapchain_image(*image_index)
                                .ok_or_else(|| missing("swapchain image", image_index))?;
                            batch.add_image_transition(
                                image.image,
                                image.aspect,
                                vk::ImageLayout::UNDEFINED,
                                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                            );
                            presented.push(image);
                        }
                    }
                }
                if !batch.is_empty() {
                    plan.steps
                        .push(EncodeStep::Barriers(std::mem::take(&mut batch)));
                }
                plan.steps.push(EncodeStep::Command(index));
            }
        }
    }

    for image in presented {
        batch.add_image_transition(
            image.image,
            image.aspect,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
    }
    if !batch.is_empty() {
        plan.steps.push(EncodeStep::Barriers(batch));
    }
    Ok(plan)
}

enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Records planned streams into command buffers.
pub struct StreamEncoder<'a> {
    pub device: &'a ash::Device,
    pub push_descriptor: &'a ash::khr::push_descriptor::Device,
    pub dynamic_rendering: &'a ash::khr::dynamic_rendering::Device,
    pub natives: &'a dyn NativeResources,
    pub programs: &'a [NativeProgram],
    pub pipelines: &'a dyn PipelineFactory,
}

impl StreamEncoder<'_> {
    /// Record `plan` for `stream` into a command buffer in the recording state.
    pub fn record(
        &self,
        cmd: vk::CommandBuffer,
        stream: &CommandStream,
        plan: &StreamPlan,
    ) -> Result<(), FrameError> {
        for step in plan.steps() {
            match step {
                EncodeStep::Barriers(batch) => batch.submit(self.device, cmd),
                EncodeStep::Command(index) => {
                    let command = stream.commands().get(*index).ok_or_else(|| {
                        FrameError::Internal(format!(
                            "{}: plan refers to command {index} of {}",
                            stream.stage(),
                            stream.len()
                        ))
                    })?;
                    self.encode_command(cmd, command)?;
                }
            }
        }
        Ok(())
    }

    fn buffer(&self, id: ResourceId) -> Result<vk::Buffer, FrameError> {
        self.natives.buffer(id).ok_or_else(|| missing("buffer", id))
    }

    fn encode_command(&self, cmd: vk::CommandBuffer, command: &Command) -> Result<(), FrameError> {
        match command {
            Command::FillBuffer {
                resource,
                range,
                value,
            } => unsafe {
                self.device
                    .cmd_fill_buffer(cmd, self.buffer(*resource)?, range.offset, range.size, *value);
            },
            Command::UpdateBuffer {
                resource,
                offset,
                data,
            } => {
                let buffer = self.buffer(*resource)?;
                let bytes: &[u8] = bytemuck::cast_slice(data);
                for (chunk_index, chunk) in bytes.chunks(MAX_INLINE_UPDATE).enumerate() {
                    let chunk_offset = offset + (chunk_index * MAX_INLINE_UPDATE) as u64;
                    unsafe {
                        self.device
                            .cmd_update_buffer(cmd, buffer, chunk_offset, chunk);
                    }
                }
            }
            Command::CopyBuffer { src, dst, region } => {
                let copy = vk::BufferCopy {
                    src_offset: region.src_offset,
                    dst_offset: region.dst_offset,
                    size: region.size,
                };
                unsafe {
                    self.device
                        .cmd_copy_buffer(cmd, self.buffer(*src)?, self.buffer(*dst)?, &[copy]);
                }
            }
            Command::Dispatch {
                program,
                groups,
                bindings,
                push,
            } => {
                self.bind(cmd, *program, bindings, push)?;
                unsafe {
                    self.device
                        .cmd_dispatch(cmd, groups[0], groups[1], groups[2]);
                }
            }
            Command::DispatchIndirect {
                program,
                args,
                offset,
                bindings,
                push,
            } => {
                self.bind(cmd, *program, bindings, push)?;
                unsafe {
                    self.device
                        .cmd_dispatch_indirect(cmd, self.buffer(*args)?, *offset);
                }
            }
            Command::BeginRendering { color, depth } => self.begin_rendering(cmd, color, *depth)?,
            Command::DrawIndexed {
                program,
                first_index,
                index_count,
                vertex_offset,
                material_key,
                bindings,
                push,
            } => {
                let native = self.bind(cmd, *program, bindings, push)?;
                let geometry = bindings
                    .iter()
                    .find(|b| b.binding == Binding::Geometry)
                    .ok_or_else(|| {
                        FrameError::Internal(format!("{:?} draw without geometry", program.id))
                    })?;
                self.pipelines
                    .bind_material(self.device, cmd, native.layout, *material_key);
                unsafe {
                    self.device.cmd_bind_index_buffer(
                        cmd,
                        self.buffer(geometry.resource)?,
                        0,
                        vk::IndexType::UINT32,
                    );
                    self.device.cmd_draw_indexed(
                        cmd,
                        *index_count,
                        1,
                        *first_index,
                        *vertex_offset,
                        0,
                    );
                }
            }
            Command::Draw {
                program,
                vertex_count,
                bindings,
                push,
            } => {
                self.bind(cmd, *program, bindings, push)?;
                unsafe {
                    self.device.cmd_draw(cmd, *vertex_count, 1, 0, 0);
                }
            }
            Command::OverlayDraws { count } => {
                self.pipelines.encode_overlay(self.device, cmd, *count);
            }
            Command::EndRendering => unsafe {
                self.dynamic_rendering.cmd_end_rendering(cmd);
            },
            // Resolved by plan_stream.
            Command::SeedOwnership { .. } | Command::BufferBarrier(_) | Command::MemoryBarrier(_) => {}
        }
        Ok(())
    }

    /// Bind the pipeline, push descriptors and push constants of a program.
    fn bind(
        &self,
        cmd: vk::CommandBuffer,
        program: ProgramRef,
        bindings: &[ResourceBinding],
        push: &[u8],
    ) -> Result<&NativeProgram, FrameError> {
        let native = self
            .programs
            .get(program.handle.0 as usize)
            .filter(|native| native.id == program.id)
            .ok_or_else(|| FrameError::Internal(format!("{:?} has no pipeline", program.id)))?;
        let bind_point = native.bind_point();
        let slots = program.id.bindings();

        let mut infos = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let slot = slots
                .iter()
                .position(|b| *b == binding.binding)
                .ok_or_else(|| {
                    FrameError::Internal(format!(
                        "{:?} has no {:?} slot",
                        program.id, binding.binding
                    ))
                })?;
            let info = match self.natives.image(binding.resource) {
                Some(image) => DescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: image.view,
                    image_layout: image_layout_for(binding.access),
                }),
                None => DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: self.buffer(binding.resource)?,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                }),
            };
            infos.push((slot as u32, binding.binding, info));
        }
        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(slot, binding, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_binding(*slot)
                    .descriptor_type(descriptor_type(*binding));
                match info {
                    DescriptorInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    DescriptorInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        if push.len() > PUSH_CONSTANT_BYTES as usize {
            return Err(FrameError::Internal(format!(
                "{:?} pushes {} bytes, layout reserves {}",
                program.id,
                push.len(),
                PUSH_CONSTANT_BYTES
            )));
        }

        unsafe {
            self.device.cmd_bind_pipeline(cmd, bind_point, native.pipeline);
            if !writes.is_empty() {
                self.push_descriptor
                    .cmd_push_descriptor_set(cmd, bind_point, native.layout, 0, &writes);
            }
            if !push.is_empty() {
                self.device
                    .cmd_push_constants(cmd, native.layout, native.shader_stages(), 0, push);
            }
        }
        Ok(native)
    }

    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        color: &[RenderTarget],
        depth: Option<ResourceId>,
    ) -> Result<(), FrameError> {
        let targets = color
            .iter()
            .map(|target| match target {
                RenderTarget::Swapchain(index) => self
                    .natives
                    .swapchain_image(*index)
                    .ok_or_else(|| missing("swapchain image", index)),
                RenderTarget::Resource(id) => {
                    self.natives.image(*id).ok_or_else(|| missing("image", id))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let depth_target = depth
            .map(|id| self.natives.image(id).ok_or_else(|| missing("image", id)))
            .transpose()?;

        let extent = targets
            .first()
            .or(depth_target.as_ref())
            .map(|image| image.extent)
            .ok_or_else(|| FrameError::Internal("rendering scope without targets".into()))?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = targets
            .iter()
            .map(|image| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 1.0],
                        },
                    })
            })
            .collect();
        let depth_attachment = depth_target.map(|image| {
            vk::RenderingAttachmentInfo::default()
                .image_view(image.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(ref depth) = depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.dynamic_rendering
                .cmd_begin_rendering(cmd, &rendering_info);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AccessFlags, BarrierKind, BufferBarrier, BufferRange};
    use crate::domain::{ExecutionDomain, QueueRef};
    use crate::graph::StageId;
    use crate::resource::{ResourceArena, ResourceDesc};
    use crate::scheduler::{FrameSlot, SyncPointKey};
    use ash::vk::Handle;

    /// Buffers get handle `index + 1`, images `index + 100`.
    struct FakeResources {
        images: Vec<ResourceId>,
        swapchain: u32,
    }

    impl FakeResources {
        fn native_image(raw: u64, aspect: vk::ImageAspectFlags) -> NativeImage {
            NativeImage {
                image: vk::Image::from_raw(raw),
                view: vk::ImageView::from_raw(raw),
                aspect,
                extent: vk::Extent2D {
                    width: 64,
                    height: 64,
                },
            }
        }
    }

    impl NativeResources for FakeResources {
        fn buffer(&self, id: ResourceId) -> Option<vk::Buffer> {
            (!self.images.contains(&id)).then(|| vk::Buffer::from_raw(id.index() as u64 + 1))
        }

        fn image(&self, id: ResourceId) -> Option<NativeImage> {
            self.images
                .contains(&id)
                .then(|| Self::native_image(id.index() as u64 + 100, vk::ImageAspectFlags::COLOR))
        }

        fn swapchain_image(&self, index: u32) -> Option<NativeImage> {
            (index < self.swapchain)
                .then(|| Self::native_image(1000 + index as u64, vk::ImageAspectFlags::COLOR))
        }
    }

    struct Fixture {
        natives: FakeResources,
        buffers: Vec<ResourceId>,
        image: ResourceId,
        map: DomainMap,
    }

    fn fixture() -> Fixture {
        let mut arena = ResourceArena::new();
        let buffers = vec![
            arena.add(ResourceDesc::buffer("page_table", 256)),
            arena.add(ResourceDesc::buffer("page_pool", 256)),
            arena.add(ResourceDesc::buffer("counters", 32)),
        ];
        let image = arena.add(ResourceDesc::image(
            "albedo",
            crate::resource::Extent2d::new(64, 64),
            crate::resource::ImageFormat::Rgba8Unorm,
        ));
        Fixture {
            natives: FakeResources {
                images: vec![image],
                swapchain: 2,
            },
            buffers,
            image,
            map: DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(2, 0)),
        }
    }

    fn acquire(resource: ResourceId) -> Command {
        Command::BufferBarrier(BufferBarrier {
            kind: BarrierKind::Acquire,
            resource,
            range: BufferRange::whole(256),
            src_domain: ExecutionDomain::Async,
            dst_domain: ExecutionDomain::Primary,
            src_access: AccessFlags::SHADER_WRITE,
            dst_access: AccessFlags::SHADER_READ,
            sync: SyncPointKey::StageDone(StageId::BvhBuild),
            slot: FrameSlot::first(2),
        })
    }

    fn dispatch(bindings: Vec<ResourceBinding>) -> Command {
        Command::Dispatch {
            program: ProgramRef::unresolved(ProgramId::ClusterFlag),
            groups: [1, 1, 1],
            bindings,
            push: Vec::new(),
        }
    }

    fn batch_sizes(plan: &StreamPlan) -> Vec<Option<usize>> {
        plan.steps()
            .iter()
            .map(|step| match step {
                EncodeStep::Barriers(batch) => Some(batch.len()),
                EncodeStep::Command(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_seeds_do_not_split_barrier_batches() {
        let f = fixture();
        let mut stream = CommandStream::new(StageId::LightCull, ExecutionDomain::Primary);
        stream.push(acquire(f.buffers[0]));
        stream.push(Command::SeedOwnership {
            resource: f.buffers[2],
        });
        stream.push(acquire(f.buffers[1]));
        stream.push(dispatch(vec![ResourceBinding::new(
            Binding::PageTable,
            f.buffers[0],
            AccessFlags::SHADER_READ,
        )]));

        let plan = plan_stream(&stream, &f.map, &f.natives, &mut ImageLayouts::new()).unwrap();
        assert_eq!(batch_sizes(&plan), vec![Some(2), None]);
        assert_eq!(plan.seeded(), &[f.buffers[2]]);
        assert!(matches!(plan.steps()[1], EncodeStep::Command(3)));

        let EncodeStep::Barriers(batch) = &plan.steps()[0] else {
            panic!("expected a barrier batch first");
        };
        assert!(batch.buffer_barriers().iter().all(|b| b.src_queue_family_index == 2));
    }

    #[test]
    fn test_memory_barrier_and_release_batches() {
        let f = fixture();
        let mut stream = CommandStream::new(StageId::LightSort, ExecutionDomain::Primary);
        stream.push(dispatch(Vec::new()));
        stream.memory_barrier(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ);
        stream.push(dispatch(Vec::new()));
        stream.push(acquire(f.buffers[1]));

        let plan = plan_stream(&stream, &f.map, &f.natives, &mut ImageLayouts::new()).unwrap();
        assert_eq!(batch_sizes(&plan), vec![None, Some(1), None, Some(1)]);
        assert_eq!(plan.barrier_count(), 2);
    }

    #[test]
    fn test_image_layout_carries_across_streams() {
        let f = fixture();
        let mut layouts = ImageLayouts::new();

        let mut fill = CommandStream::new(StageId::GBufferFill, ExecutionDomain::Primary);
        fill.push(Command::BeginRendering {
            color: vec![RenderTarget::Resource(f.image)],
            depth: None,
        });
        fill.push(Command::EndRendering);
        let plan = plan_stream(&fill, &f.map, &f.natives, &mut layouts).unwrap();
        assert_eq!(batch_sizes(&plan), vec![Some(1), None, None]);
        assert_eq!(layouts.get(f.image), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let read = || dispatch(vec![ResourceBinding::new(
            Binding::Albedo,
            f.image,
            AccessFlags::SHADER_READ,
        )]);
        let mut compose = CommandStream::new(StageId::Composition, ExecutionDomain::Primary);
        compose.push(read());
        compose.push(read());
        let plan = plan_stream(&compose, &f.map, &f.natives, &mut layouts).unwrap();
        // Only the first read transitions.
        assert_eq!(batch_sizes(&plan), vec![Some(1), None, None]);
        let EncodeStep::Barriers(batch) = &plan.steps()[0] else {
            panic!("expected a transition");
        };
        assert_eq!(
            batch.image_barriers()[0].old_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(layouts.get(f.image), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_seeded_image_restarts_from_undefined() {
        let f = fixture();
        let mut layouts = ImageLayouts::new();
        layouts.set(f.image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let mut stream = CommandStream::new(StageId::GBufferFill, ExecutionDomain::Primary);
        stream.push(Command::SeedOwnership { resource: f.image });
        stream.push(Command::BeginRendering {
            color: vec![RenderTarget::Resource(f.image)],
            depth: None,
        });

        let plan = plan_stream(&stream, &f.map, &f.natives, &mut layouts).unwrap();
        let EncodeStep::Barriers(batch) = &plan.steps()[0] else {
            panic!("expected a transition");
        };
        assert_eq!(batch.image_barriers()[0].old_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_swapchain_target_is_made_presentable() {
        let f = fixture();
        let mut stream = CommandStream::new(StageId::Composition, ExecutionDomain::Primary);
        stream.push(Command::BeginRendering {
            color: vec![RenderTarget::Swapchain(1)],
            depth: None,
        });
        stream.push(Command::OverlayDraws { count: 3 });
        stream.push(Command::EndRendering);

        let plan = plan_stream(&stream, &f.map, &f.natives, &mut ImageLayouts::new()).unwrap();
        assert_eq!(batch_sizes(&plan), vec![Some(1), None, None, None, Some(1)]);
        let Some(EncodeStep::Barriers(last)) = plan.steps().last() else {
            panic!("expected a trailing transition");
        };
        let present = &last.image_barriers()[0];
        assert_eq!(present.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(present.image, vk::Image::from_raw(1001));
    }

    #[test]
    fn test_unknown_swapchain_image_is_error() {
        let f = fixture();
        let mut stream = CommandStream::new(StageId::Composition, ExecutionDomain::Primary);
        stream.push(Command::BeginRendering {
            color: vec![RenderTarget::Swapchain(5)],
            depth: None,
        });
        let err = plan_stream(&stream, &f.map, &f.natives, &mut ImageLayouts::new()).unwrap_err();
        assert!(matches!(err, FrameError::Internal(_)));
    }

    #[test]
    fn test_program_bind_points() {
        let native = |id| NativeProgram {
            id,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layout: vk::DescriptorSetLayout::null(),
        };
        assert_eq!(
            native(ProgramId::LightCull).bind_point(),
            vk::PipelineBindPoint::COMPUTE
        );
        assert_eq!(
            native(ProgramId::CompositionClustered).shader_stages(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }
}
