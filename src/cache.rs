//! State caches: pipelines, vertex-input state and specialization info, memoized by structural
//! key so repeated reflection calls for the same descriptor never re-create a Vulkan object.
use ash::vk;
use parking_lot::RwLock;
use std::{collections::HashMap, hash::Hash, sync::Arc};
use tracing::trace;

/// A generic structural-equality cache: readers never block readers, writers serialize, and a
/// miss only ever happens once per distinct key for the lifetime of the backend.
pub struct StructuralCache<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
    label: &'static str,
}

impl<K: Eq + Hash + Clone, V> StructuralCache<K, V> {
    pub fn new(label: &'static str) -> Self {
        StructuralCache { entries: RwLock::new(HashMap::new()), label }
    }

    /// Returns the cached value for `key`, creating it via `create` on a miss. `create` may be
    /// expensive (a `vkCreate*Pipelines` call); it only runs while holding the write lock, so two
    /// racing misses for the same key never both construct the underlying object.
    pub fn get_or_create(&self, key: K, create: impl FnOnce(&K) -> V) -> Arc<V> {
        if let Some(v) = self.entries.read().get(&key) {
            return v.clone();
        }
        let mut guard = self.entries.write();
        if let Some(v) = guard.get(&key) {
            return v.clone();
        }
        trace!(cache = self.label, "cache miss");
        let value = Arc::new(create(&key));
        guard.insert(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPipelineKey {
    pub descriptor_hash: u64,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub descriptor_hash: u64,
    pub layout: vk::PipelineLayout,
    pub threads_per_threadgroup: (u32, u32, u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputKey {
    pub descriptor_hash: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpecializationKey {
    pub constant_indices: Vec<u32>,
    pub constant_values: Vec<u32>,
}

/// The backend's full set of state caches. `pipeline_cache` is the shared `VkPipelineCache` every
/// `vkCreate*Pipelines` call is warmed from; it is destroyed once, at backend teardown.
pub struct StateCaches {
    pub render_pipelines: StructuralCache<RenderPipelineKey, vk::Pipeline>,
    pub compute_pipelines: StructuralCache<ComputePipelineKey, vk::Pipeline>,
    pub vertex_inputs: StructuralCache<VertexInputKey, vk::PipelineVertexInputStateCreateInfo>,
    pub specializations: StructuralCache<SpecializationKey, vk::SpecializationInfo>,
    pub pipeline_cache: vk::PipelineCache,
}

impl StateCaches {
    pub fn new(pipeline_cache: vk::PipelineCache) -> Self {
        StateCaches {
            render_pipelines: StructuralCache::new("render_pipelines"),
            compute_pipelines: StructuralCache::new("compute_pipelines"),
            vertex_inputs: StructuralCache::new("vertex_inputs"),
            specializations: StructuralCache::new("specializations"),
            pipeline_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn repeated_lookup_with_same_key_creates_once() {
        let cache: StructuralCache<u32, u32> = StructuralCache::new("test");
        let creations = AtomicUsize::new(0);
        for _ in 0..5 {
            cache.get_or_create(1, |_| {
                creations.fetch_add(1, Ordering::SeqCst);
                42
            });
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_keys_create_distinct_entries() {
        let cache: StructuralCache<u32, u32> = StructuralCache::new("test");
        cache.get_or_create(1, |_| 10);
        cache.get_or_create(2, |_| 20);
        assert_eq!(cache.len(), 2);
    }
}
