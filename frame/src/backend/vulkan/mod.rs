//! Vulkan backend (ash).
//!
//! [`VulkanBackend`] runs the frame on a Vulkan 1.3 device with
//! `VK_KHR_push_descriptor`:
//!
//! - [`select_queue_families`] resolves the [`DomainMap`] from the device's
//!   queue families,
//! - [`encoder`] turns each submitted stream into a command buffer, with
//!   ownership transfers as queue family barriers and G-buffer layout
//!   transitions tracked across streams,
//! - [`sync`] backs sync points with semaphores and frame fences with a
//!   waiter thread,
//! - [`allocator`] places frame resources through gpu-allocator.
//!
//! Instance and device creation, the surface and swapchain, and shader
//! loading stay with the application that owns the window. It plugs them in
//! through [`VulkanPresenter`] and [`PipelineFactory`]. The device must be
//! created with the queues [`select_queue_families`] picks for the same
//! topology.

pub mod allocator;
pub mod barriers;
pub mod conversion;
pub mod encoder;
mod queues;
pub mod sync;

pub use barriers::BarrierBatch;
pub use encoder::{NativeImage, NativeProgram, NativeResources, StreamPlan, plan_stream};
pub use queues::select_queue_families;

use ash::vk;
use gpu_allocator::vulkan::Allocator;

use self::allocator::{NativeResource, create_allocator, create_swapchain_view};
use self::conversion::{
    choose_present_mode, convert_pipeline_stages, convert_result, descriptor_type,
};
use self::encoder::{ImageLayouts, PUSH_CONSTANT_BYTES, StreamEncoder};
use self::sync::{DomainCommands, InFlight, SyncSemaphores};
use super::{FrameBackend, SwapchainInfo};
use crate::command::{Binding, CommandStream};
use crate::config::PresentMode;
use crate::domain::{DomainMap, ExecutionDomain, QueueTopology};
use crate::error::FrameError;
use crate::program::{ProgramHandle, ProgramId};
use crate::resource::{Extent2d, ResourceArena, ResourceId};
use crate::scheduler::{Submission, SyncPointRef};

/// Handles of a device created by the application.
#[derive(Clone)]
pub struct VulkanDevice {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
}

/// Swapchain images after (re)creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentImages {
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: Extent2d,
}

/// Surface and swapchain operations of the window that owns the device.
///
/// Errors use the frame error kinds: an out-of-date swapchain is reported
/// as [`FrameError::SurfaceOutdated`].
pub trait VulkanPresenter {
    /// Current surface extent. Zero while minimized.
    fn surface_extent(&self) -> Extent2d;

    /// Block until the windowing system reports an event.
    fn wait_surface_events(&mut self) -> Extent2d;

    /// Present modes the surface supports.
    fn present_modes(&self) -> Vec<vk::PresentModeKHR>;

    /// Recreate the swapchain. Called while the device is idle.
    fn recreate_swapchain(
        &mut self,
        extent: Extent2d,
        present_mode: vk::PresentModeKHR,
    ) -> Result<PresentImages, FrameError>;

    /// Acquire the next image, signaling the binary semaphore `signal`.
    fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<u32, FrameError>;

    /// Queue `image` for presentation on `queue` once `wait` is signaled.
    fn present(
        &mut self,
        queue: vk::Queue,
        image: u32,
        wait: vk::Semaphore,
    ) -> Result<(), FrameError>;
}

/// Pipeline construction for the frame programs.
///
/// The backend owns descriptor set and pipeline layouts: one push
/// descriptor set with a slot per program binding, in binding order, and
/// [`PUSH_CONSTANT_BYTES`] of push constants.
pub trait PipelineFactory {
    /// Build the pipeline of a program against `layout`.
    fn create_pipeline(
        &mut self,
        device: &ash::Device,
        id: ProgramId,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline, FrameError>;

    /// Bind the material descriptors of a geometry part.
    fn bind_material(
        &self,
        _device: &ash::Device,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _material_key: u32,
    ) {
    }

    /// Record the UI overlay draws merged into composition.
    fn encode_overlay(&self, _device: &ash::Device, _cmd: vk::CommandBuffer, _count: u32) {}
}

struct ResourceView<'a> {
    resources: &'a [NativeResource],
    swapchain: &'a [NativeImage],
}

impl NativeResources for ResourceView<'_> {
    fn buffer(&self, id: ResourceId) -> Option<vk::Buffer> {
        self.resources.get(id.index()).and_then(NativeResource::buffer)
    }

    fn image(&self, id: ResourceId) -> Option<NativeImage> {
        self.resources.get(id.index()).and_then(NativeResource::image)
    }

    fn swapchain_image(&self, index: u32) -> Option<NativeImage> {
        self.swapchain.get(index as usize).copied()
    }
}

/// Frame backend on a Vulkan device.
pub struct VulkanBackend {
    device: ash::Device,
    push_descriptor: ash::khr::push_descriptor::Device,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    allocator: Allocator,
    domains: DomainMap,
    queues: [vk::Queue; 2],
    command_pools: [vk::CommandPool; 2],
    resources: Vec<NativeResource>,
    layouts: ImageLayouts,
    programs: Vec<NativeProgram>,
    semaphores: SyncSemaphores,
    swapchain: Vec<NativeImage>,
    presenter: Box<dyn VulkanPresenter>,
    pipelines: Box<dyn PipelineFactory>,
    /// Submitted command buffers not yet covered by a fence.
    unfenced: DomainCommands,
    in_flight: Vec<InFlight>,
}

fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, FrameError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| convert_result(e, "Failed to create command pool"))
}

fn destroy_program(device: &ash::Device, program: NativeProgram) {
    unsafe {
        device.destroy_pipeline(program.pipeline, None);
        device.destroy_pipeline_layout(program.layout, None);
        device.destroy_descriptor_set_layout(program.set_layout, None);
    }
}

impl VulkanBackend {
    /// Set up the backend on an application-created device.
    pub fn new(
        vulkan: VulkanDevice,
        topology: QueueTopology,
        presenter: Box<dyn VulkanPresenter>,
        pipelines: Box<dyn PipelineFactory>,
    ) -> Result<Self, FrameError> {
        let VulkanDevice {
            instance,
            physical_device,
            device,
        } = vulkan;

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let domains = select_queue_families(&families, topology)?;
        let queues = ExecutionDomain::ALL.map(|domain| {
            let queue = domains.queue(domain);
            unsafe { device.get_device_queue(queue.family, queue.index) }
        });

        let primary_pool = create_command_pool(&device, domains.family(ExecutionDomain::Primary))?;
        let async_pool = match create_command_pool(&device, domains.family(ExecutionDomain::Async))
        {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_command_pool(primary_pool, None) };
                return Err(e);
            }
        };
        let command_pools = [primary_pool, async_pool];

        let allocator = match create_allocator(&instance, physical_device, device.clone()) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    for pool in command_pools {
                        device.destroy_command_pool(pool, None);
                    }
                }
                return Err(e);
            }
        };

        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);
        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&instance, &device);

        log::info!(
            "Vulkan backend ready: primary family {}, async family {} ({:?})",
            domains.family(ExecutionDomain::Primary),
            domains.family(ExecutionDomain::Async),
            domains.topology()
        );

        Ok(Self {
            device,
            push_descriptor,
            dynamic_rendering,
            allocator,
            domains,
            queues,
            command_pools,
            resources: Vec::new(),
            layouts: ImageLayouts::new(),
            programs: Vec::new(),
            semaphores: SyncSemaphores::new(),
            swapchain: Vec::new(),
            presenter,
            pipelines,
            unfenced: Vec::new(),
            in_flight: Vec::new(),
        })
    }

    fn allocate_command_buffer(
        &self,
        domain: ExecutionDomain,
    ) -> Result<vk::CommandBuffer, FrameError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pools[domain.index()])
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| convert_result(e, "Failed to allocate command buffer"))?
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::Internal("no command buffer allocated".into()))
    }

    fn free_command_buffers(&self, commands: DomainCommands) {
        for (domain, cmd) in commands {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pools[domain.index()], &[cmd]);
            }
        }
    }

    fn retire(&self, in_flight: InFlight) {
        let (fence, commands) = in_flight.retire();
        unsafe { self.device.destroy_fence(fence, None) };
        self.free_command_buffers(commands);
    }

    /// Release the command buffers of fenced submissions the GPU finished.
    fn retire_finished(&mut self) {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(InFlight::is_finished);
        self.in_flight = pending;
        for in_flight in finished {
            self.retire(in_flight);
        }
    }

    /// Release every submission. The device must be idle.
    fn retire_all(&mut self) {
        for in_flight in std::mem::take(&mut self.in_flight) {
            self.retire(in_flight);
        }
        let unfenced = std::mem::take(&mut self.unfenced);
        self.free_command_buffers(unfenced);
    }

    fn destroy_resources(&mut self) {
        for resource in self.resources.drain(..) {
            resource.destroy(&self.device, &mut self.allocator);
        }
        self.layouts.clear();
    }

    fn destroy_swapchain_views(&mut self) {
        for image in self.swapchain.drain(..) {
            unsafe { self.device.destroy_image_view(image.view, None) };
        }
    }

    /// Semaphores and values behind sync points.
    fn resolve<'p>(
        &mut self,
        points: impl Iterator<Item = &'p SyncPointRef>,
    ) -> Result<(Vec<vk::Semaphore>, Vec<u64>), FrameError> {
        let pairs = points
            .map(|point| self.semaphores.get(&self.device, point))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs.into_iter().unzip())
    }

    /// Fence for the final submission of a frame, or a null handle.
    fn create_fence(&self, fenced: bool) -> Result<vk::Fence, FrameError> {
        if !fenced {
            return Ok(vk::Fence::null());
        }
        unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| convert_result(e, "Failed to create fence"))
    }

    /// Record a stream into a fresh command buffer.
    fn record(&mut self, stream: &CommandStream) -> Result<vk::CommandBuffer, FrameError> {
        let view = ResourceView {
            resources: &self.resources,
            swapchain: &self.swapchain,
        };
        let plan = plan_stream(stream, &self.domains, &view, &mut self.layouts)?;
        for resource in plan.seeded() {
            log::trace!(
                "{}: {} first used on family {}",
                stream.stage(),
                resource,
                self.domains.family(stream.domain())
            );
        }

        let cmd = self.allocate_command_buffer(stream.domain())?;
        let encoder = StreamEncoder {
            device: &self.device,
            push_descriptor: &self.push_descriptor,
            dynamic_rendering: &self.dynamic_rendering,
            natives: &view,
            programs: &self.programs,
            pipelines: self.pipelines.as_ref(),
        };
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let recorded = unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| convert_result(e, "Failed to begin command buffer"))
            .and_then(|()| encoder.record(cmd, stream, &plan))
            .and_then(|()| {
                unsafe { self.device.end_command_buffer(cmd) }
                    .map_err(|e| convert_result(e, "Failed to end command buffer"))
            });
        match recorded {
            Ok(()) => Ok(cmd),
            Err(e) => {
                self.free_command_buffers(vec![(stream.domain(), cmd)]);
                Err(e)
            }
        }
    }
}

impl FrameBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn domain_map(&self) -> DomainMap {
        self.domains
    }

    fn create_resources(&mut self, arena: &ResourceArena) -> Result<(), FrameError> {
        self.destroy_resources();
        for (id, desc) in arena.iter() {
            debug_assert_eq!(id.index(), self.resources.len());
            let resource = NativeResource::create(&self.device, &mut self.allocator, desc)?;
            self.resources.push(resource);
        }
        log::info!(
            "Created {} frame resources ({} bytes)",
            arena.len(),
            arena.total_bytes()
        );
        Ok(())
    }

    fn create_program(
        &mut self,
        id: ProgramId,
        bindings: &'static [Binding],
    ) -> Result<ProgramHandle, FrameError> {
        let stages = if id.is_compute() {
            vk::ShaderStageFlags::COMPUTE
        } else {
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        };
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .enumerate()
            .map(|(slot, binding)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot as u32)
                    .descriptor_type(descriptor_type(*binding))
                    .descriptor_count(1)
                    .stage_flags(stages)
            })
            .collect();
        let set_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&layout_bindings);
        let set_layout = unsafe { self.device.create_descriptor_set_layout(&set_info, None) }
            .map_err(|e| convert_result(e, "Failed to create descriptor set layout"))?;

        let set_layouts = [set_layout];
        let push_ranges = [vk::PushConstantRange {
            stage_flags: stages,
            offset: 0,
            size: PUSH_CONSTANT_BYTES,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = match unsafe { self.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { self.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(convert_result(e, "Failed to create pipeline layout"));
            }
        };

        let pipeline = match self.pipelines.create_pipeline(&self.device, id, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    self.device.destroy_pipeline_layout(layout, None);
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(e);
            }
        };

        let program = NativeProgram {
            id,
            pipeline,
            layout,
            set_layout,
        };
        let index = match self.programs.iter().position(|p| p.id == id) {
            Some(index) => {
                let old = std::mem::replace(&mut self.programs[index], program);
                destroy_program(&self.device, old);
                index
            }
            None => {
                self.programs.push(program);
                self.programs.len() - 1
            }
        };
        log::debug!("Created program '{}' ({} bindings)", id.shader(), bindings.len());
        Ok(ProgramHandle(index as u64))
    }

    fn recreate_swapchain(
        &mut self,
        extent: Extent2d,
        present_mode: PresentMode,
    ) -> Result<SwapchainInfo, FrameError> {
        let mode = choose_present_mode(present_mode, &self.presenter.present_modes());
        let images = self.presenter.recreate_swapchain(extent, mode)?;

        self.destroy_swapchain_views();
        for image in &images.images {
            let view = create_swapchain_view(&self.device, *image, images.format, images.extent)?;
            self.swapchain.push(view);
        }
        log::info!(
            "Swapchain recreated: {}x{}, {} images, {:?}",
            images.extent.width,
            images.extent.height,
            self.swapchain.len(),
            mode
        );
        Ok(SwapchainInfo {
            extent: images.extent,
            image_count: self.swapchain.len() as u32,
        })
    }

    fn surface_extent(&self) -> Extent2d {
        self.presenter.surface_extent()
    }

    fn wait_surface_events(&mut self) -> Extent2d {
        self.presenter.wait_surface_events()
    }

    fn write_staging(&mut self, staging: ResourceId, data: &[u8]) -> Result<(), FrameError> {
        let mapped = self
            .resources
            .get_mut(staging.index())
            .and_then(NativeResource::mapped_mut)
            .ok_or_else(|| FrameError::Internal(format!("{staging} is not a mapped buffer")))?;
        let target = mapped.get_mut(..data.len()).ok_or_else(|| {
            FrameError::Internal(format!(
                "{} bytes do not fit staging buffer {staging}",
                data.len()
            ))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn acquire_image(&mut self, signal: SyncPointRef) -> Result<u32, FrameError> {
        let (semaphore, _) = self.semaphores.get(&self.device, &signal)?;
        self.presenter.acquire_image(semaphore)
    }

    fn submit(&mut self, submission: Submission) -> Result<(), FrameError> {
        self.retire_finished();

        let Submission {
            stream,
            waits,
            signals,
            fence,
        } = submission;
        let domain = stream.domain();
        let cmd = self.record(&stream)?;

        let prepared = self
            .resolve(waits.iter().map(|(point, _)| point))
            .and_then(|waited| Ok((waited, self.resolve(signals.iter())?)))
            .and_then(|semaphores| Ok((semaphores, self.create_fence(fence.is_some())?)));
        let (((wait_semaphores, wait_values), (signal_semaphores, signal_values)), vk_fence) =
            match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.free_command_buffers(vec![(domain, cmd)]);
                    return Err(e);
                }
            };
        let wait_stages: Vec<vk::PipelineStageFlags> = waits
            .iter()
            .map(|(_, stages)| convert_pipeline_stages(*stages))
            .collect();

        let command_buffers = [cmd];
        let mut timeline = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline);

        let submitted = unsafe {
            self.device
                .queue_submit(self.queues[domain.index()], &[submit_info], vk_fence)
        };
        if let Err(e) = submitted {
            unsafe { self.device.destroy_fence(vk_fence, None) };
            self.free_command_buffers(vec![(domain, cmd)]);
            return Err(convert_result(e, "Failed to submit command buffer"));
        }
        self.unfenced.push((domain, cmd));

        if let Some(frame_fence) = fence {
            let commands = std::mem::take(&mut self.unfenced);
            self.in_flight
                .push(InFlight::spawn(&self.device, vk_fence, frame_fence, commands)?);
        }

        log::trace!(
            "Submitted '{}' on {} ({} waits, {} signals)",
            stream.stage(),
            domain,
            wait_semaphores.len(),
            signal_semaphores.len()
        );
        Ok(())
    }

    fn present(&mut self, image: u32, wait: SyncPointRef) -> Result<(), FrameError> {
        let (semaphore, _) = self.semaphores.get(&self.device, &wait)?;
        let queue = self.queues[ExecutionDomain::Primary.index()];
        self.presenter.present(queue, image, semaphore)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert_result(e, "Failed to wait for idle"))?;
        self.retire_all();
        // Sync points are recreated by the caller after an idle wait.
        self.semaphores.destroy_all(&self.device);
        log::trace!("Vulkan backend idle");
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Failed to wait for idle on drop: {:?}", e);
        }
        self.retire_all();
        self.semaphores.destroy_all(&self.device);
        self.destroy_swapchain_views();
        for program in std::mem::take(&mut self.programs) {
            destroy_program(&self.device, program);
        }
        self.destroy_resources();
        unsafe {
            for pool in self.command_pools {
                self.device.destroy_command_pool(pool, None);
            }
        }
    }
}
