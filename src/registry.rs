//! Resource registry.
//!
//! Two sub-registries share the handle space minted by [`crate::handle`]: a persistent one
//! guarded by a reader-writer lock (resources created once, disposed explicitly or at teardown),
//! and a transient one rebuilt every frame from the [pool allocator](crate::pool).
use crate::{
    handle::ResourceId,
    pool::PoolAllocator,
    resource::{BackingResource, Descriptor},
};
use parking_lot::RwLock;
use slotmap::SecondaryMap;
use std::collections::HashMap;
use tracing::trace;

/// Persistent resources: created on first `allocate`, destroyed on explicit `dispose` or backend
/// teardown. The map is behind a reader-writer lock so concurrent `lookup`s never block.
#[derive(Default)]
pub struct PersistentRegistry {
    resources: RwLock<HashMap<ResourceId, BackingResource>>,
}

impl PersistentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materializes a resource for `id`. Returns `false` if creation failed (out-of-memory);
    /// this is a resource-creation failure, not an error — the caller decides what to do.
    pub fn allocate(&self, id: ResourceId, backing: Option<BackingResource>) -> bool {
        match backing {
            Some(b) => {
                self.resources.write().insert(id, b);
                true
            }
            None => false,
        }
    }

    pub fn dispose(&self, id: ResourceId) -> Option<BackingResource> {
        self.resources.write().remove(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.read().contains_key(&id)
    }

    pub fn with_lookup<R>(&self, id: ResourceId, f: impl FnOnce(Option<&BackingResource>) -> R) -> R {
        let guard = self.resources.read();
        f(guard.get(&id))
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

/// Per-frame-slot transient resource registry, backed by the [`PoolAllocator`].
///
/// `lookup` returning `None` is only an error at encode time (e.g. a swapchain acquire failed
/// before `begin`); during compilation a missing entry simply means the encoder must skip the
/// pass that would have used it.
pub struct TransientRegistry {
    current: SecondaryMap<ResourceId, BackingResource>,
    frame_index: u64,
}

impl Default for TransientRegistry {
    fn default() -> Self {
        TransientRegistry {
            current: SecondaryMap::new(),
            frame_index: 0,
        }
    }
}

impl TransientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, frame_index: u64) {
        debug_assert!(self.current.is_empty(), "end() must be called before the next begin()");
        self.frame_index = frame_index;
        trace!(frame_index, "transient registry begin");
    }

    /// Allocates a transient resource through the pool, recording it under `id` for the
    /// remainder of the frame.
    pub fn allocate(&mut self, id: ResourceId, descriptor: Descriptor, pool: &mut PoolAllocator) {
        let backing = pool.collect(descriptor);
        self.current.insert(id, backing);
    }

    pub fn lookup(&self, id: ResourceId) -> Option<&BackingResource> {
        self.current.get(id)
    }

    pub fn lookup_mut(&mut self, id: ResourceId) -> Option<&mut BackingResource> {
        self.current.get_mut(id)
    }

    /// Returns every transient backing to the pool, clearing the frame-local map.
    pub fn end(&mut self, pool: &mut PoolAllocator) {
        for (_, backing) in self.current.drain() {
            pool.deposit(backing);
        }
        trace!(frame_index = self.frame_index, "transient registry end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolAllocator;
    use crate::resource::{ImageDescriptor, StorageMode};
    use ash::vk;
    use slotmap::SlotMap;

    fn image_desc() -> ImageDescriptor {
        ImageDescriptor {
            extent: vk::Extent3D { width: 4, height: 4, depth: 1 },
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            samples: 1,
            storage_mode: StorageMode::Private,
        }
    }

    #[test]
    fn persistent_materialise_then_dispose_is_a_roundtrip() {
        let reg = PersistentRegistry::new();
        let mut keys: SlotMap<ResourceId, ()> = SlotMap::with_key();
        let id = keys.insert(());
        assert_eq!(reg.len(), 0);
        assert!(!reg.contains(id));

        let backing = BackingResource::Image {
            handle: vk::Image::null(),
            allocation: None,
            layout_map: crate::resource::LayoutMap::new(vk::ImageLayout::UNDEFINED),
            descriptor: image_desc(),
            external_memory: true,
        };
        assert!(reg.allocate(id, Some(backing)));
        assert!(reg.contains(id));
        assert!(reg.dispose(id).is_some());
        assert!(!reg.contains(id));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn persistent_allocate_false_on_creation_failure() {
        let reg = PersistentRegistry::new();
        let mut keys: SlotMap<ResourceId, ()> = SlotMap::with_key();
        let id = keys.insert(());
        assert!(!reg.allocate(id, None));
        assert!(!reg.contains(id));
    }

    #[test]
    fn transient_lookup_missing_returns_none_not_error() {
        let reg = TransientRegistry::new();
        let mut keys: SlotMap<ResourceId, ()> = SlotMap::with_key();
        let id = keys.insert(());
        assert!(reg.lookup(id).is_none());
    }

    #[test]
    fn transient_begin_allocate_end_returns_to_pool() {
        let mut pool = PoolAllocator::new(2);
        let mut reg = TransientRegistry::new();
        let mut keys: SlotMap<ResourceId, ()> = SlotMap::with_key();
        let id = keys.insert(());

        reg.begin(0);
        reg.allocate(id, Descriptor::Image(image_desc()), &mut pool);
        assert!(reg.lookup(id).is_some());
        reg.end(&mut pool);
        assert!(reg.lookup(id).is_none());
        assert_eq!(pool.slot_len(0), 1);
    }
}
