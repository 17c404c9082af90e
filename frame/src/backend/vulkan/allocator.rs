//! GPU memory for frame resources, allocated through gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use super::conversion::{buffer_usage, convert_image_format, image_aspect, image_usage};
use super::encoder::NativeImage;
use crate::error::FrameError;
use crate::resource::{Extent2d, ImageFormat, ResourceDesc, ResourceKind};

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, FrameError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        FrameError::ResourceCreationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Memory location of a resource.
///
/// Staging buffers are written by the host every frame; everything else
/// stays in device-local memory.
pub fn memory_location(desc: &ResourceDesc) -> MemoryLocation {
    if desc.host_visible {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// A frame resource backed by device memory.
#[derive(Debug)]
pub enum NativeResource {
    Buffer {
        buffer: vk::Buffer,
        allocation: Allocation,
    },
    Image {
        native: NativeImage,
        allocation: Allocation,
    },
}

impl NativeResource {
    /// Create the buffer or image a descriptor asks for.
    pub fn create(
        device: &ash::Device,
        allocator: &mut Allocator,
        desc: &ResourceDesc,
    ) -> Result<Self, FrameError> {
        match desc.kind {
            ResourceKind::Buffer { size } => create_buffer(device, allocator, desc, size),
            ResourceKind::Image { extent, format } => {
                create_image(device, allocator, desc, extent, format)
            }
        }
    }

    /// The buffer, if this is one.
    pub fn buffer(&self) -> Option<vk::Buffer> {
        match self {
            Self::Buffer { buffer, .. } => Some(*buffer),
            Self::Image { .. } => None,
        }
    }

    /// The image, if this is one.
    pub fn image(&self) -> Option<NativeImage> {
        match self {
            Self::Image { native, .. } => Some(*native),
            Self::Buffer { .. } => None,
        }
    }

    /// Host mapping of a staging buffer.
    pub fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Buffer { allocation, .. } => allocation.mapped_slice_mut(),
            Self::Image { .. } => None,
        }
    }

    /// Destroy the native objects and return the memory. The device must be idle.
    pub fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        let allocation = match self {
            Self::Buffer { buffer, allocation } => {
                unsafe { device.destroy_buffer(buffer, None) };
                allocation
            }
            Self::Image { native, allocation } => {
                unsafe {
                    device.destroy_image_view(native.view, None);
                    device.destroy_image(native.image, None);
                }
                allocation
            }
        };
        if let Err(e) = allocator.free(allocation) {
            log::error!("Failed to free resource memory: {}", e);
        }
    }
}

fn allocate(
    allocator: &mut Allocator,
    desc: &ResourceDesc,
    requirements: vk::MemoryRequirements,
    linear: bool,
) -> Result<Allocation, FrameError> {
    allocator
        .allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: memory_location(desc),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!(
                "Failed to allocate memory for {}: {}",
                desc.name, e
            ))
        })
}

fn create_buffer(
    device: &ash::Device,
    allocator: &mut Allocator,
    desc: &ResourceDesc,
    size: u64,
) -> Result<NativeResource, FrameError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size.max(4))
        .usage(buffer_usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| {
        FrameError::ResourceCreationFailed(format!("Failed to create buffer {}: {:?}", desc.name, e))
    })?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = match allocate(allocator, desc, requirements, true) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    if let Err(e) =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        unsafe { device.destroy_buffer(buffer, None) };
        let _ = allocator.free(allocation);
        return Err(FrameError::ResourceCreationFailed(format!(
            "Failed to bind buffer memory for {}: {:?}",
            desc.name, e
        )));
    }

    log::trace!("Created buffer {} ({} bytes)", desc.name, size);
    Ok(NativeResource::Buffer { buffer, allocation })
}

fn create_image(
    device: &ash::Device,
    allocator: &mut Allocator,
    desc: &ResourceDesc,
    extent: Extent2d,
    format: ImageFormat,
) -> Result<NativeResource, FrameError> {
    let vk_format = convert_image_format(format);
    let aspect = image_aspect(format);
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk_format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(image_usage(format))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.create_image(&image_info, None) }.map_err(|e| {
        FrameError::ResourceCreationFailed(format!("Failed to create image {}: {:?}", desc.name, e))
    })?;
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = match allocate(allocator, desc, requirements, false) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let bound =
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
    let view = bound.and_then(|()| {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { device.create_image_view(&view_info, None) }
    });
    let view = match view {
        Ok(view) => view,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            let _ = allocator.free(allocation);
            return Err(FrameError::ResourceCreationFailed(format!(
                "Failed to set up image {}: {:?}",
                desc.name, e
            )));
        }
    };

    log::trace!(
        "Created image {} ({}x{} {:?})",
        desc.name,
        extent.width,
        extent.height,
        format
    );
    Ok(NativeResource::Image {
        native: NativeImage {
            image,
            view,
            aspect,
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        },
        allocation,
    })
}

/// Create a view of a swapchain image.
pub fn create_swapchain_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    extent: Extent2d,
) -> Result<NativeImage, FrameError> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    let view = unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
        FrameError::ResourceCreationFailed(format!("Failed to create swapchain view: {:?}", e))
    })?;
    Ok(NativeImage {
        image,
        view,
        aspect: vk::ImageAspectFlags::COLOR,
        extent: vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_is_host_visible() {
        assert_eq!(
            memory_location(&ResourceDesc::staging("staging", 64)),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(&ResourceDesc::buffer("page_pool", 64)),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            memory_location(&ResourceDesc::image(
                "depth",
                Extent2d::new(8, 8),
                ImageFormat::Depth32Float
            )),
            MemoryLocation::GpuOnly
        );
    }
}
