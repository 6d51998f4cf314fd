//! Pool allocator.
//!
//! Backs the transient registry: a ring of `inflight_frames` slots, each holding the images and
//! buffers that were deposited in some earlier frame and are eligible for reuse. `collect_*`
//! searches the *current* slot only — entries from older slots have already been rolled forward
//! by [`cycle_frames`](PoolAllocator::cycle_frames) or evicted.
use crate::resource::{BackingResource, Descriptor};
use tracing::trace;

struct PooledEntry {
    backing: BackingResource,
    frames_unused: u32,
}

/// One ring slot: the reusable images/buffers currently available, plus what was deposited this
/// frame and will roll into the slot on the next `cycle_frames`.
#[derive(Default)]
struct Slot {
    entries: Vec<PooledEntry>,
    used_this_frame: Vec<BackingResource>,
}

pub struct PoolAllocator {
    ring: Vec<Slot>,
    current: usize,
}

impl PoolAllocator {
    pub fn new(inflight_frames: usize) -> Self {
        assert!(inflight_frames > 0);
        let mut ring = Vec::with_capacity(inflight_frames);
        ring.resize_with(inflight_frames, Slot::default);
        PoolAllocator { ring, current: 0 }
    }

    /// Finds and removes a fitting entry from the current slot, or creates a new backing via
    /// `create`. Image requests use an exact-match predicate; buffer requests use best-fit by
    /// size among fitting candidates, to minimize waste.
    pub fn collect_with(
        &mut self,
        descriptor: Descriptor,
        create: impl FnOnce(Descriptor) -> BackingResource,
    ) -> BackingResource {
        let slot = &mut self.ring[self.current];
        let found = match descriptor {
            Descriptor::Image(requested) => slot.entries.iter().position(|e| match e.backing.descriptor() {
                Descriptor::Image(d) => d.matches(&requested),
                _ => false,
            }),
            Descriptor::Buffer(requested) => slot
                .entries
                .iter()
                .enumerate()
                .filter_map(|(i, e)| match e.backing.descriptor() {
                    Descriptor::Buffer(d) if d.fits(&requested) => Some((i, d.size)),
                    _ => None,
                })
                .min_by_key(|&(_, size)| size)
                .map(|(i, _)| i),
        };

        match found {
            Some(i) => {
                trace!(?descriptor, "pool hit");
                slot.entries.remove(i).backing
            }
            None => {
                trace!(?descriptor, "pool miss, creating new backing");
                create(descriptor)
            }
        }
    }

    /// Convenience wrapper for callers that only need a default-constructed backing on miss
    /// (tests, and call sites where the device allocator lives elsewhere).
    pub fn collect(&mut self, descriptor: Descriptor) -> BackingResource {
        self.collect_with(descriptor, placeholder_backing)
    }

    /// Appends a used resource to this frame's "used" sequence; it becomes collectible again
    /// only after the next [`cycle_frames`](Self::cycle_frames).
    pub fn deposit(&mut self, backing: BackingResource) {
        self.ring[self.current].used_this_frame.push(backing);
    }

    /// Ages the current slot, evicts entries unused for more than 2 rotations, folds in this
    /// frame's deposits, and advances to the next ring slot.
    pub fn cycle_frames(&mut self) {
        let n = self.ring.len();
        let slot = &mut self.ring[self.current];
        for entry in slot.entries.iter_mut() {
            entry.frames_unused += 1;
        }
        let evicted = slot.entries.iter().filter(|e| e.frames_unused > 2).count();
        slot.entries.retain(|e| e.frames_unused <= 2);
        if evicted > 0 {
            trace!(evicted, "pool evicted entries unused for >2 rotations");
        }

        let deposited: Vec<_> = slot.used_this_frame.drain(..).collect();
        slot.entries
            .extend(deposited.into_iter().map(|backing| PooledEntry { backing, frames_unused: 0 }));

        self.current = (self.current + 1) % n;
    }

    #[cfg(test)]
    pub fn slot_len(&self, slot: usize) -> usize {
        self.ring[slot].used_this_frame.len() + self.ring[slot].entries.len()
    }
}

fn placeholder_backing(descriptor: Descriptor) -> BackingResource {
    use ash::vk;
    match descriptor {
        Descriptor::Image(d) => BackingResource::Image {
            handle: vk::Image::null(),
            allocation: None,
            layout_map: crate::resource::LayoutMap::new(vk::ImageLayout::UNDEFINED),
            descriptor: d,
            external_memory: false,
        },
        Descriptor::Buffer(d) => BackingResource::Buffer {
            handle: vk::Buffer::null(),
            allocation: None,
            descriptor: d,
        },
    }
}
