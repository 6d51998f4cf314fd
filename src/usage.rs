//! Usage types and the access/stage/layout derivation tables.
use crate::handle::{ResourceClass, ResourceId};
use ash::vk;

/// The closed set of ways a command can use a resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UsageType {
    VertexRead,
    FragmentRead,
    ConstantBuffer,
    SampledTexture,
    StorageRead,
    StorageWrite,
    ColorAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilRead,
    DepthStencilWrite,
    TransferSource,
    TransferDestination,
    Indirect,
    IndexBuffer,
    VertexBuffer,
    Present,
}

impl UsageType {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            UsageType::StorageWrite
                | UsageType::ColorAttachmentWrite
                | UsageType::DepthStencilWrite
                | UsageType::TransferDestination
        )
    }
}

/// A single resource use at one command index, with the shader stages it is visible to.
///
/// `resource_class` carries the resource's actual kind (buffer vs. texture), since several usage
/// types (`StorageRead`/`StorageWrite`, `TransferSource`/`TransferDestination`) apply equally to
/// either and so cannot be told apart by usage type alone — barrier classification must branch on
/// this field, never on whether the usage's preferred layout happens to be `UNDEFINED`.
#[derive(Copy, Clone, Debug)]
pub struct UsageRecord {
    pub resource: ResourceId,
    pub resource_class: ResourceClass,
    pub command_index: u64,
    pub usage: UsageType,
    pub stages: vk::PipelineStageFlags,
}

/// The derived (access mask, pipeline-stage mask, preferred image layout) for a usage.
/// `stages` is the usage's own declared shader-stage mask for stage-dependent usage types
/// (sampled/storage reads, constant buffers); it is ignored otherwise.
pub fn derive_access(
    usage: UsageType,
    stages: vk::PipelineStageFlags,
    is_depth_or_stencil: bool,
) -> (vk::AccessFlags, vk::PipelineStageFlags, vk::ImageLayout) {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    match usage {
        UsageType::VertexRead => (A::VERTEX_ATTRIBUTE_READ, S::VERTEX_INPUT, L::UNDEFINED),
        UsageType::IndexBuffer => (A::INDEX_READ, S::VERTEX_INPUT, L::UNDEFINED),
        UsageType::VertexBuffer => (A::VERTEX_ATTRIBUTE_READ, S::VERTEX_INPUT, L::UNDEFINED),
        UsageType::Indirect => (A::INDIRECT_COMMAND_READ, S::DRAW_INDIRECT, L::UNDEFINED),
        UsageType::FragmentRead => (A::SHADER_READ, S::FRAGMENT_SHADER, L::SHADER_READ_ONLY_OPTIMAL),
        UsageType::ConstantBuffer => (A::UNIFORM_READ, stages, L::UNDEFINED),
        UsageType::SampledTexture => (A::SHADER_READ, stages, L::SHADER_READ_ONLY_OPTIMAL),
        UsageType::StorageRead => (A::SHADER_READ, stages, L::GENERAL),
        UsageType::StorageWrite => (A::SHADER_WRITE, stages, L::GENERAL),
        UsageType::ColorAttachmentRead => {
            (A::COLOR_ATTACHMENT_READ, S::COLOR_ATTACHMENT_OUTPUT, L::COLOR_ATTACHMENT_OPTIMAL)
        }
        UsageType::ColorAttachmentWrite => {
            (A::COLOR_ATTACHMENT_WRITE, S::COLOR_ATTACHMENT_OUTPUT, L::COLOR_ATTACHMENT_OPTIMAL)
        }
        UsageType::DepthStencilRead => {
            let _ = is_depth_or_stencil;
            let stage = S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS;
            (A::DEPTH_STENCIL_ATTACHMENT_READ, stage, L::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        }
        UsageType::DepthStencilWrite => {
            let stage = S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS;
            (A::DEPTH_STENCIL_ATTACHMENT_WRITE, stage, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        }
        UsageType::TransferSource => (A::TRANSFER_READ, S::TRANSFER, L::TRANSFER_SRC_OPTIMAL),
        UsageType::TransferDestination => (A::TRANSFER_WRITE, S::TRANSFER, L::TRANSFER_DST_OPTIMAL),
        UsageType::Present => (A::empty(), S::BOTTOM_OF_PIPE, L::PRESENT_SRC_KHR),
    }
}

pub fn is_read_access(mask: vk::AccessFlags) -> bool {
    mask.intersects(
        vk::AccessFlags::INDIRECT_COMMAND_READ
            | vk::AccessFlags::INDEX_READ
            | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
            | vk::AccessFlags::UNIFORM_READ
            | vk::AccessFlags::INPUT_ATTACHMENT_READ
            | vk::AccessFlags::SHADER_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::TRANSFER_READ
            | vk::AccessFlags::HOST_READ
            | vk::AccessFlags::MEMORY_READ,
    )
}

pub fn is_write_access(mask: vk::AccessFlags) -> bool {
    mask.intersects(
        vk::AccessFlags::SHADER_WRITE
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags::TRANSFER_WRITE
            | vk::AccessFlags::HOST_WRITE
            | vk::AccessFlags::MEMORY_WRITE,
    )
}

pub fn is_depth_and_stencil_format(fmt: vk::Format) -> bool {
    matches!(
        fmt,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_depth_only_format(fmt: vk::Format) -> bool {
    matches!(fmt, vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT)
}

pub fn is_stencil_only_format(fmt: vk::Format) -> bool {
    matches!(fmt, vk::Format::S8_UINT)
}

pub fn format_aspect_mask(fmt: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_only_format(fmt) {
        vk::ImageAspectFlags::DEPTH
    } else if is_stencil_only_format(fmt) {
        vk::ImageAspectFlags::STENCIL
    } else if is_depth_and_stencil_format(fmt) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_attachment_write_derives_expected_triple() {
        let (access, stage, layout) =
            derive_access(UsageType::ColorAttachmentWrite, vk::PipelineStageFlags::empty(), false);
        assert_eq!(access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn sampled_texture_uses_declared_stage_mask() {
        let (access, stage, layout) = derive_access(
            UsageType::SampledTexture,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            false,
        );
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
        assert_eq!(stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn present_usage_targets_present_src_layout() {
        let (_, stage, layout) = derive_access(UsageType::Present, vk::PipelineStageFlags::empty(), false);
        assert_eq!(stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn storage_usages_use_general_layout() {
        let (_, _, read_layout) =
            derive_access(UsageType::StorageRead, vk::PipelineStageFlags::COMPUTE_SHADER, false);
        let (_, _, write_layout) =
            derive_access(UsageType::StorageWrite, vk::PipelineStageFlags::COMPUTE_SHADER, false);
        assert_eq!(read_layout, vk::ImageLayout::GENERAL);
        assert_eq!(write_layout, vk::ImageLayout::GENERAL);
    }
}
