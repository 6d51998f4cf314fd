//! Descriptors and backing resources.
use ash::vk;
use std::collections::BTreeMap;

/// Where a resource's memory comes from. Flat allocation only, no heap
/// sub-allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageMode {
    /// Device-local memory, not host visible.
    Private,
    /// Host-visible, coherent memory (the Vulkan backend's stand-in for "managed storage").
    Managed,
    /// Host-visible, host-coherent memory mapped for the lifetime of the resource.
    Shared,
}

impl StorageMode {
    pub fn memory_location(&self) -> gpu_allocator::MemoryLocation {
        match self {
            StorageMode::Private => gpu_allocator::MemoryLocation::GpuOnly,
            StorageMode::Managed => gpu_allocator::MemoryLocation::CpuToGpu,
            StorageMode::Shared => gpu_allocator::MemoryLocation::CpuToGpu,
        }
    }
}

/// Creation-time parameters for an image resource.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ImageDescriptor {
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: u32,
    pub storage_mode: StorageMode,
}

impl ImageDescriptor {
    /// Fit predicate for the pool allocator: images match only when every field is
    /// exactly equal. Image aliasing across slightly different descriptors is rare and usually
    /// wrong, so the pool never tries to be clever here.
    pub fn matches(&self, other: &ImageDescriptor) -> bool {
        self.extent == other.extent
            && self.mip_levels == other.mip_levels
            && self.array_layers == other.array_layers
            && self.format == other.format
            && self.usage == other.usage
            && self.samples == other.samples
            && self.storage_mode == other.storage_mode
    }
}

/// Creation-time parameters for a buffer resource.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferDescriptor {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub storage_mode: StorageMode,
}

impl BufferDescriptor {
    /// Fit predicate for the pool allocator: a pooled buffer fits a request when its
    /// usage is a superset, storage mode matches, and it is large enough. Buffer oversizing is
    /// safe, unlike image aliasing, so this is deliberately permissive.
    pub fn fits(&self, requested: &BufferDescriptor) -> bool {
        self.usage.contains(requested.usage)
            && self.storage_mode == requested.storage_mode
            && self.size >= requested.size
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Descriptor {
    Image(ImageDescriptor),
    Buffer(BufferDescriptor),
}

/// Tracks, per command index, the Vulkan image layout a texture is in.
///
/// Invariant: for every command index there is exactly one well-defined layout; the map
/// only ever gains entries at the command index a transition-bearing barrier was inserted for.
#[derive(Clone, Debug, Default)]
pub struct LayoutMap {
    transitions: BTreeMap<u64, vk::ImageLayout>,
}

impl LayoutMap {
    pub fn new(initial: vk::ImageLayout) -> Self {
        let mut transitions = BTreeMap::new();
        transitions.insert(0, initial);
        LayoutMap { transitions }
    }

    /// The layout in effect at `command_index` (the layout set by the most recent transition at
    /// or before that index).
    pub fn layout_at(&self, command_index: u64) -> vk::ImageLayout {
        self.transitions
            .range(..=command_index)
            .next_back()
            .map(|(_, &l)| l)
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    /// Records a transition effective from `command_index` onward.
    pub fn transition(&mut self, command_index: u64, new_layout: vk::ImageLayout) {
        self.transitions.insert(command_index, new_layout);
    }
}

/// A materialized Vulkan image or buffer plus its allocation.
pub enum BackingResource {
    Image {
        handle: vk::Image,
        allocation: Option<gpu_allocator::vulkan::Allocation>,
        layout_map: LayoutMap,
        descriptor: ImageDescriptor,
        /// Resources bound to a swapchain own no allocation and report their layout through the
        /// swapchain's own tracking instead.
        external_memory: bool,
    },
    Buffer {
        handle: vk::Buffer,
        allocation: Option<gpu_allocator::vulkan::Allocation>,
        descriptor: BufferDescriptor,
    },
}

impl BackingResource {
    pub fn descriptor(&self) -> Descriptor {
        match self {
            BackingResource::Image { descriptor, .. } => Descriptor::Image(*descriptor),
            BackingResource::Buffer { descriptor, .. } => Descriptor::Buffer(*descriptor),
        }
    }
}
