//! Type conversions between frame core types and Vulkan types.

use ash::vk;

use crate::command::{AccessFlags, Binding, PipelineStages};
use crate::config::PresentMode;
use crate::error::FrameError;
use crate::resource::ImageFormat;

/// Convert access flags to Vulkan access flags.
pub fn convert_access_flags(access: AccessFlags) -> vk::AccessFlags {
    const TABLE: [(AccessFlags, vk::AccessFlags); 11] = [
        (AccessFlags::INDIRECT_COMMAND_READ, vk::AccessFlags::INDIRECT_COMMAND_READ),
        (AccessFlags::INDEX_READ, vk::AccessFlags::INDEX_READ),
        (AccessFlags::VERTEX_ATTRIBUTE_READ, vk::AccessFlags::VERTEX_ATTRIBUTE_READ),
        (AccessFlags::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
        (AccessFlags::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (AccessFlags::COLOR_ATTACHMENT_WRITE, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        (
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (AccessFlags::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
        (AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
        (AccessFlags::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
    ];

    let mut result = vk::AccessFlags::empty();
    for (flag, vk_flag) in TABLE {
        if access.contains(flag) {
            result |= vk_flag;
        }
    }
    result
}

/// Convert pipeline stages to Vulkan pipeline stage flags.
pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    const TABLE: [(PipelineStages, vk::PipelineStageFlags); 11] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (
            PipelineStages::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStages::HOST, vk::PipelineStageFlags::HOST),
    ];

    let mut result = vk::PipelineStageFlags::empty();
    for (flag, vk_flag) in TABLE {
        if stages.contains(flag) {
            result |= vk_flag;
        }
    }

    // Vulkan rejects an empty stage mask
    if result.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        result
    }
}

/// Convert an image format to a Vulkan format.
pub fn convert_image_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

/// Aspect mask of an image format.
pub fn image_aspect(format: ImageFormat) -> vk::ImageAspectFlags {
    match format {
        ImageFormat::Depth32Float => vk::ImageAspectFlags::DEPTH,
        ImageFormat::Rgba8Unorm | ImageFormat::Rgba16Float => vk::ImageAspectFlags::COLOR,
    }
}

/// Convert a present mode to a Vulkan present mode.
pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Pick a present mode the surface supports.
///
/// FIFO is always available, so it is the fallback for every request.
pub fn choose_present_mode(
    requested: PresentMode,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    let wanted = convert_present_mode(requested);
    if available.contains(&wanted) {
        wanted
    } else {
        log::warn!(
            "Present mode {:?} unavailable, falling back to FIFO",
            requested
        );
        vk::PresentModeKHR::FIFO
    }
}

/// Usage flags of every device buffer.
///
/// Frame buffers are storage buffers that also serve as copy endpoints,
/// indirect argument sources and the geometry index buffer.
pub fn buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::TRANSFER_SRC
        | vk::BufferUsageFlags::TRANSFER_DST
        | vk::BufferUsageFlags::INDIRECT_BUFFER
        | vk::BufferUsageFlags::INDEX_BUFFER
}

/// Usage flags of a G-buffer image.
pub fn image_usage(format: ImageFormat) -> vk::ImageUsageFlags {
    let attachment = match format {
        ImageFormat::Depth32Float => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ImageFormat::Rgba8Unorm | ImageFormat::Rgba16Float => {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        }
    };
    attachment | vk::ImageUsageFlags::SAMPLED
}

/// Descriptor type of a program interface slot.
pub fn descriptor_type(binding: Binding) -> vk::DescriptorType {
    match binding {
        Binding::Depth | Binding::Albedo | Binding::Normal | Binding::Specular => {
            vk::DescriptorType::SAMPLED_IMAGE
        }
        _ => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// Layout an image must be in for an access.
pub fn image_layout_for(access: AccessFlags) -> vk::ImageLayout {
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if access.contains(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if access.is_write() {
        vk::ImageLayout::GENERAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// Stages and accesses that use an image in a layout.
///
/// Used as the source half of a transition out of the layout and as the
/// destination half of a transition into it.
pub fn layout_stage_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
    }
}

/// Map a failed Vulkan call onto the frame error kinds.
pub fn convert_result(result: vk::Result, context: &str) -> FrameError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
            FrameError::SurfaceOutdated
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            FrameError::ResourceCreationFailed(format!("{context}: {result:?}"))
        }
        other => FrameError::Internal(format!("{context}: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_access_flags() {
        assert_eq!(
            convert_access_flags(AccessFlags::SHADER_READ_WRITE),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        );
        assert_eq!(
            convert_access_flags(AccessFlags::empty()),
            vk::AccessFlags::empty()
        );
    }

    #[test]
    fn test_empty_stages_become_top_of_pipe() {
        assert_eq!(
            convert_pipeline_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_pipeline_stages(PipelineStages::COMPUTE_SHADER | PipelineStages::TRANSFER),
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER
        );
    }

    #[test]
    fn test_image_format() {
        assert_eq!(
            convert_image_format(ImageFormat::Depth32Float),
            vk::Format::D32_SFLOAT
        );
        assert_eq!(
            image_aspect(ImageFormat::Rgba16Float),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_present_mode_fallback() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(PresentMode::Mailbox, &available),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(PresentMode::Immediate, &available),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[rstest]
    #[case(AccessFlags::COLOR_ATTACHMENT_WRITE, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
    #[case(
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    )]
    #[case(AccessFlags::SHADER_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]
    #[case(AccessFlags::SHADER_READ_WRITE, vk::ImageLayout::GENERAL)]
    fn test_image_layout_for_access(#[case] access: AccessFlags, #[case] layout: vk::ImageLayout) {
        assert_eq!(image_layout_for(access), layout);
    }

    #[test]
    fn test_undefined_layout_has_no_access() {
        assert_eq!(
            layout_stage_access(vk::ImageLayout::UNDEFINED),
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        );
        let (stages, access) = layout_stage_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_descriptor_types() {
        assert_eq!(
            descriptor_type(Binding::Depth),
            vk::DescriptorType::SAMPLED_IMAGE
        );
        assert_eq!(
            descriptor_type(Binding::PagePool),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert!(image_usage(ImageFormat::Depth32Float)
            .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[rstest]
    #[case(vk::Result::ERROR_OUT_OF_DATE_KHR, FrameError::SurfaceOutdated)]
    #[case(vk::Result::ERROR_SURFACE_LOST_KHR, FrameError::SurfaceLost)]
    #[case(vk::Result::ERROR_DEVICE_LOST, FrameError::DeviceLost)]
    fn test_result_conversion(#[case] result: vk::Result, #[case] expected: FrameError) {
        assert_eq!(convert_result(result, "submit"), expected);
    }

    #[test]
    fn test_unknown_result_is_internal() {
        let err = convert_result(vk::Result::ERROR_INITIALIZATION_FAILED, "create pool");
        assert!(matches!(err, FrameError::Internal(msg) if msg.starts_with("create pool")));
    }
}
