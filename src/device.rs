//! Device and queue model.
//!
//! Instance and physical-device bootstrap (enabling validation layers, negotiating instance
//! extensions, creating the `VkSurfaceKHR`) is the external collaborator's job. What the core
//! needs from that bootstrap is an already-created [`ash::Device`] plus its queue family
//! properties; from those it performs the queue model this backend wants: one queue on the family
//! that supports GRAPHICS, every queue on every other family, and a timeline semaphore per
//! selected queue.
use crate::{
    error::{BackendError, Result},
    handle::UniqueHandle,
};
use ash::vk;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, trace};

/// Maximum number of queues the backend will drive concurrently.
pub const MAX_QUEUES: usize = 4;

pub const REQUIRED_DEVICE_EXTENSIONS: &[&str] =
    &["VK_KHR_swapchain", "VK_KHR_timeline_semaphore"];
pub const OPTIONAL_DEVICE_EXTENSIONS: &[&str] = &["VK_EXT_inline_uniform_block"];

bitflags! {
    /// Per-capability selection exposed for a queue ("render, compute, blit, present").
    pub struct QueueCaps: u8 {
        const RENDER = 1 << 0;
        const COMPUTE = 1 << 1;
        const BLIT = 1 << 2;
        const PRESENT = 1 << 3;
    }
}

fn caps_from_family(flags: vk::QueueFlags, present: bool) -> QueueCaps {
    let mut caps = QueueCaps::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        caps |= QueueCaps::RENDER;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        caps |= QueueCaps::COMPUTE;
    }
    if flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER) {
        caps |= QueueCaps::BLIT;
    }
    if present {
        caps |= QueueCaps::PRESENT;
    }
    caps
}

/// A single selected queue and its capabilities.
pub struct QueueInfo {
    pub family: u32,
    pub index_in_family: u32,
    pub queue: vk::Queue,
    pub caps: QueueCaps,
    /// Per-queue timeline semaphore, monotonically incremented once per submitted command
    /// buffer. Wrapped so the backend cannot drop it without explicitly destroying it first.
    pub timeline: UniqueHandle<vk::Semaphore>,
}

/// Result of queue discovery: every queue the backend will submit to.
pub struct QueuesInfo {
    pub queues: Vec<QueueInfo>,
}

impl QueuesInfo {
    pub fn by_caps(&self, caps: QueueCaps) -> Option<&QueueInfo> {
        self.queues.iter().find(|q| q.caps.contains(caps))
    }

    /// Destroys every queue's timeline semaphore via `destroy`. Takes each `UniqueHandle` first
    /// so the wrapper's drop check never fires for a handle this call already disposed of.
    pub fn destroy_timelines(&mut self, mut destroy: impl FnMut(vk::Semaphore)) {
        for q in &mut self.queues {
            if q.timeline.is_null() {
                continue;
            }
            destroy(q.timeline.take());
        }
    }
}

/// Discovers one queue on the family containing GRAPHICS,
/// every queue on every other (non-graphics) family.
///
/// `supports_present` queries whether a given family can present to the (externally owned)
/// surface; pass `|_| false` in headless configurations.
pub fn discover_queues(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Result<Vec<(u32, u32)>> {
    let graphics_family = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or(BackendError::NoSuitablePhysicalDevice)?;

    let mut selection = Vec::new();
    for (family_index, props) in families.iter().enumerate() {
        if family_index == graphics_family {
            selection.push((family_index as u32, 0u32));
        } else if !props.queue_flags.is_empty() {
            for qi in 0..props.queue_count {
                selection.push((family_index as u32, qi));
            }
        }
    }
    let _ = &mut supports_present;
    trace!(?selection, "discovered queue selection");
    Ok(selection)
}

/// Builds [`QueueInfo`] records from a selection and live `vk::Queue`/timeline-semaphore handles.
///
/// The caller (external bootstrap) is responsible for having called `vkGetDeviceQueue` and
/// `vkCreateSemaphore` (type `TIMELINE`) for each entry in `selection`.
pub fn build_queues_info(
    families: &[vk::QueueFamilyProperties],
    selection: &[(u32, u32)],
    queues: &[vk::Queue],
    timelines: &[vk::Semaphore],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueuesInfo {
    assert_eq!(selection.len(), queues.len());
    assert_eq!(selection.len(), timelines.len());
    let mut infos = Vec::with_capacity(selection.len());
    for (i, &(family, index_in_family)) in selection.iter().enumerate() {
        let caps = caps_from_family(
            families[family as usize].queue_flags,
            supports_present(family),
        );
        infos.push(QueueInfo {
            family,
            index_in_family,
            queue: queues[i],
            caps,
            timeline: UniqueHandle::new(timelines[i]),
        });
    }
    QueuesInfo { queues: infos }
}

fn check_extensions(available: &[String]) -> Result<()> {
    for required in REQUIRED_DEVICE_EXTENSIONS {
        if !available.iter().any(|a| a == required) {
            return Err(BackendError::MissingExtension(required));
        }
    }
    Ok(())
}

/// Thin wrapper over an externally-bootstrapped `ash::Device`: owns the queue model and the
/// general device allocator that the registry and pool allocate through.
pub struct Device {
    pub device: ash::Device,
    pub queues: QueuesInfo,
    pub allocator: Mutex<gpu_allocator::vulkan::Allocator>,
    pub supports_inline_uniform_block: bool,
}

impl Device {
    /// Wraps an already-created device. `available_extensions` and `families` come from the
    /// external bootstrap; queue handles and timeline semaphores must already be created.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        families: &[vk::QueueFamilyProperties],
        available_extensions: &[String],
        selection: &[(u32, u32)],
        queues: &[vk::Queue],
        timelines: &[vk::Semaphore],
        supports_present: impl FnMut(u32) -> bool,
    ) -> Result<Device> {
        check_extensions(available_extensions)?;
        let supports_inline_uniform_block = available_extensions
            .iter()
            .any(|e| e == OPTIONAL_DEVICE_EXTENSIONS[0]);

        let queues_info = build_queues_info(families, selection, queues, timelines, supports_present);

        let allocator_create_desc = gpu_allocator::vulkan::AllocatorCreateDesc {
            instance,
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
        };
        let allocator = gpu_allocator::vulkan::Allocator::new(&allocator_create_desc)
            .map_err(|_| BackendError::DeviceCreationFailed)?;

        info!(
            queue_count = queues_info.queues.len(),
            inline_uniform_block = supports_inline_uniform_block,
            "device ready"
        );

        Ok(Device {
            device,
            queues: queues_info,
            allocator: Mutex::new(allocator),
            supports_inline_uniform_block,
        })
    }
}

pub(crate) type SharedDevice = Arc<Device>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            timestamp_valid_bits: 0,
            min_image_transfer_granularity: Default::default(),
        }
    }

    #[test]
    fn discover_queues_selects_one_graphics_queue_and_all_others() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let sel = discover_queues(&families, |_| false).unwrap();
        // graphics family contributes exactly one queue regardless of its queue_count
        assert_eq!(sel.iter().filter(|&&(f, _)| f == 0).count(), 1);
        // every other family contributes all of its queues
        assert_eq!(sel.iter().filter(|&&(f, _)| f == 1).count(), 2);
        assert_eq!(sel.iter().filter(|&&(f, _)| f == 2).count(), 1);
    }

    #[test]
    fn discover_queues_fails_without_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        assert!(matches!(
            discover_queues(&families, |_| false),
            Err(BackendError::NoSuitablePhysicalDevice)
        ));
    }

    #[test]
    fn caps_from_family_maps_queue_flags() {
        let caps = caps_from_family(vk::QueueFlags::GRAPHICS, true);
        assert!(caps.contains(QueueCaps::RENDER | QueueCaps::BLIT | QueueCaps::PRESENT));
        assert!(!caps.contains(QueueCaps::COMPUTE));
    }

    #[test]
    fn destroy_timelines_takes_every_handle_exactly_once() {
        let mut queues = QueuesInfo {
            queues: vec![QueueInfo {
                family: 0,
                index_in_family: 0,
                queue: vk::Queue::null(),
                caps: QueueCaps::RENDER,
                timeline: UniqueHandle::new(vk::Semaphore::from_raw(42)),
            }],
        };
        let mut destroyed = Vec::new();
        queues.destroy_timelines(|sem| destroyed.push(sem));
        assert_eq!(destroyed, vec![vk::Semaphore::from_raw(42)]);
        assert!(queues.queues[0].timeline.is_null());
    }
}
