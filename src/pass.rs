//! Passes, encoders and the closed command opcode set.
use crate::handle::ResourceId;
use ash::vk;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassKind {
    Draw,
    Compute,
    Blit,
    External,
    Cpu,
}

/// A render-target descriptor attached to a draw pass, used to decide render-pass-internal
/// synchronization vs. encoder-global barriers.
#[derive(Clone, Debug, Default)]
pub struct RenderTargetDescriptor {
    pub color_attachments: Vec<ResourceId>,
    pub depth_stencil_attachment: Option<ResourceId>,
    pub subpass_count: u32,
}

#[derive(Clone, Debug)]
pub struct PassRecord {
    pub id: u32,
    pub kind: PassKind,
    /// Inclusive command index range `[first, last]` belonging to this pass.
    pub command_range: (u64, u64),
    pub render_target: Option<RenderTargetDescriptor>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncoderKind {
    Draw,
    Compute,
    Blit,
}

/// A contiguous group of passes submitted in one Vulkan command buffer of a single queue kind.
#[derive(Clone, Debug)]
pub struct EncoderInfo {
    pub index: usize,
    pub kind: EncoderKind,
    /// Inclusive range of pass indices contained in this encoder.
    pub pass_range: (usize, usize),
    /// Inclusive range of command indices contained in this encoder.
    pub command_range: (u64, u64),
    pub render_target: Option<RenderTargetDescriptor>,
    pub command_buffer_index: usize,
}

/// The closed set of opcodes a frame graph may emit.
#[derive(Clone, Debug)]
pub enum Command {
    InsertDebugSignpost(String),
    SetLabel(String),
    PushDebugGroup(String),
    PopDebugGroup,
    CopyBufferToTexture { src: ResourceId, dst: ResourceId },
    CopyBufferToBuffer { src: ResourceId, dst: ResourceId },
    CopyTextureToBuffer { src: ResourceId, dst: ResourceId },
    CopyTextureToTexture { src: ResourceId, dst: ResourceId },
    FillBuffer { dst: ResourceId, offset: u64, size: u64, value: u32 },
    GenerateMipmaps { texture: ResourceId, mip_levels: u32 },
    SetArgumentBuffer { argument_buffer: ResourceId },
    SetBytes,
    SetBufferOffset { buffer: ResourceId, offset: u64 },
    SetBuffer { buffer: ResourceId },
    SetTexture { texture: ResourceId },
    SetSamplerState,
    SetPipelineDescriptor { compute: bool },
    DispatchThreads { x: u32, y: u32, z: u32 },
    DispatchThreadgroups { x: u32, y: u32, z: u32 },
    DispatchThreadgroupsIndirect { indirect_buffer: ResourceId },
    Draw,
    DrawIndexed,
    DrawIndirect { indirect_buffer: ResourceId },
    SynchronizeTexture(ResourceId),
    SynchronizeBuffer(ResourceId),
}

impl Command {
    /// Opcodes the backend deliberately does not implement: reaching one indicates a bug upstream.
    pub fn is_fatally_unimplemented(&self) -> bool {
        matches!(self, Command::SynchronizeTexture(_) | Command::SynchronizeBuffer(_))
    }
}

pub fn get_vk_sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => panic!("unsupported number of samples"),
    }
}
