//! A Vulkan backend for a frame-graph rendering abstraction: compiles a linear list of draw,
//! compute and blit passes annotated with per-resource usages into correctly synchronized
//! command buffers, and submits them across one or more device queues.
//!
//! The public surface is deliberately narrow: [`Backend::execute_frame_graph`] is the only entry
//! point that does real work; everything else manages resource lifetimes around it.
pub mod cache;
pub mod dependency;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod pass;
pub mod pool;
pub mod registry;
pub mod resource;
pub mod serial;
pub mod submission;
pub mod usage;

pub use device::MAX_QUEUES;
pub use error::{BackendError, Result};
pub use handle::{ResourceClass, ResourceFlags, ResourceHandle, ResourceId};

use crate::{
    dependency::{analyze, expand_generate_mipmaps, CompactedResourceCommand},
    device::{Device, QueueCaps, SharedDevice},
    dispatcher::{dispatch_encoder, EncoderSink},
    pass::{Command, EncoderInfo, PassRecord},
    pool::PoolAllocator,
    registry::{PersistentRegistry, TransientRegistry},
    resource::{BackingResource, Descriptor},
    serial::SubmissionNumber,
    submission::{CompletionTracker, SubmissionPlan, SwapchainPresent, TimelineWait},
    usage::UsageRecord,
};
use parking_lot::RwLock;
use slotmap::SlotMap;
use std::sync::Arc;
use tracing::{info, trace_span};

/// Mints [`ResourceHandle`]s and tracks their flags (in particular `INITIALISED`) independently
/// of whichever registry actually backs the resource.
#[derive(Default)]
struct HandleTable {
    handles: RwLock<SlotMap<ResourceId, ResourceHandle>>,
}

impl HandleTable {
    fn create(&self, class: ResourceClass, flags: ResourceFlags) -> ResourceHandle {
        let mut handles = self.handles.write();
        let id = handles.insert_with_key(|id| ResourceHandle::new(id, class, flags));
        *handles.get(id).expect("just inserted")
    }

    fn mark_initialised(&self, id: ResourceId) {
        if let Some(h) = self.handles.write().get_mut(id) {
            h.mark_initialised();
        }
    }
}

/// One compiled, ready-to-dispatch frame.
pub struct CompiledFrame {
    pub encoders: Vec<EncoderInfo>,
    pub commands: Vec<(u64, Command)>,
    pub resource_stream: Vec<CompactedResourceCommand>,
}

/// One queue's share of a frame's submission: the serial it signals, the cross-encoder timeline
/// waits it must wait on, and whatever swapchains it presents.
pub struct FrameSubmission {
    pub queue_index: usize,
    pub submission: SubmissionNumber,
    pub cross_encoder_waits: Vec<TimelineWait>,
    pub swapchains: Vec<SwapchainPresent>,
}

/// Ties together the device, the two resource registries, the transient pool and the state
/// caches into the one object the frame-graph collaborator drives through
/// [`execute_frame_graph`](Backend::execute_frame_graph).
pub struct Backend {
    device: SharedDevice,
    persistent: PersistentRegistry,
    transient: TransientRegistry,
    pool: PoolAllocator,
    caches: cache::StateCaches,
    completion: Arc<CompletionTracker>,
    handles: HandleTable,
    frame_index: u64,
}

impl Backend {
    pub fn new(device: Device, inflight_frames: usize, pipeline_cache: ash::vk::PipelineCache) -> Backend {
        Backend {
            device: Arc::new(device),
            persistent: PersistentRegistry::new(),
            transient: TransientRegistry::new(),
            pool: PoolAllocator::new(inflight_frames),
            caches: cache::StateCaches::new(pipeline_cache),
            completion: CompletionTracker::new(),
            handles: HandleTable::default(),
            frame_index: 0,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn caches(&self) -> &cache::StateCaches {
        &self.caches
    }

    pub fn create_texture_handle(&self, flags: ResourceFlags) -> ResourceHandle {
        self.handles.create(ResourceClass::Texture, flags)
    }

    pub fn create_buffer_handle(&self, flags: ResourceFlags) -> ResourceHandle {
        self.handles.create(ResourceClass::Buffer, flags)
    }

    /// Binds `handle` to a swapchain image; subsequent materialise calls for this handle are
    /// no-ops since the backing image is externally owned.
    pub fn register_window_texture(&self, handle: ResourceHandle, image: ash::vk::Image, format: ash::vk::Format, extent: ash::vk::Extent2D) {
        debug_assert!(handle.is_window_handle(), "register_window_texture requires a WINDOW_HANDLE-flagged handle");
        let descriptor = resource::ImageDescriptor {
            extent: ash::vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
            mip_levels: 1,
            array_layers: 1,
            format,
            usage: ash::vk::ImageUsageFlags::COLOR_ATTACHMENT,
            samples: 1,
            storage_mode: resource::StorageMode::Private,
        };
        let backing = BackingResource::Image {
            handle: image,
            allocation: None,
            layout_map: resource::LayoutMap::new(ash::vk::ImageLayout::UNDEFINED),
            descriptor,
            external_memory: true,
        };
        self.persistent.allocate(handle.id(), Some(backing));
        self.handles.mark_initialised(handle.id());
    }

    /// Materializes a persistent texture. Returns `false` on allocation failure; the caller
    /// decides whether that is recoverable.
    pub fn materialise_persistent_texture(&self, handle: ResourceHandle, descriptor: resource::ImageDescriptor) -> bool {
        let allocated = self.device.allocator.lock().allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
            name: "persistent_texture",
            requirements: ash::vk::MemoryRequirements::default(),
            location: descriptor.storage_mode.memory_location(),
            linear: false,
            allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
        });
        let ok = match allocated {
            Ok(allocation) => {
                let backing = BackingResource::Image {
                    handle: ash::vk::Image::null(),
                    allocation: Some(allocation),
                    layout_map: resource::LayoutMap::new(ash::vk::ImageLayout::UNDEFINED),
                    descriptor,
                    external_memory: false,
                };
                self.persistent.allocate(handle.id(), Some(backing))
            }
            Err(_) => self.persistent.allocate(handle.id(), None),
        };
        if ok {
            self.handles.mark_initialised(handle.id());
        }
        ok
    }

    pub fn materialise_persistent_buffer(&self, handle: ResourceHandle, descriptor: resource::BufferDescriptor) -> bool {
        let allocated = self.device.allocator.lock().allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
            name: "persistent_buffer",
            requirements: ash::vk::MemoryRequirements::default(),
            location: descriptor.storage_mode.memory_location(),
            linear: true,
            allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
        });
        let ok = match allocated {
            Ok(allocation) => {
                let backing = BackingResource::Buffer { handle: ash::vk::Buffer::null(), allocation: Some(allocation), descriptor };
                self.persistent.allocate(handle.id(), Some(backing))
            }
            Err(_) => self.persistent.allocate(handle.id(), None),
        };
        if ok {
            self.handles.mark_initialised(handle.id());
        }
        ok
    }

    pub fn dispose_texture(&self, handle: ResourceHandle) -> bool {
        self.persistent.dispose(handle.id()).is_some()
    }

    pub fn dispose_buffer(&self, handle: ResourceHandle) -> bool {
        self.persistent.dispose(handle.id()).is_some()
    }

    /// Mapped pointer into a `Shared`/`Managed` buffer's host-visible allocation, or `None` if
    /// the buffer is not host-visible or not found.
    pub fn buffer_contents(&self, handle: ResourceHandle) -> Option<*mut u8> {
        self.persistent.with_lookup(handle.id(), |backing| match backing {
            Some(BackingResource::Buffer { allocation: Some(alloc), .. }) => alloc.mapped_ptr().map(|p| p.as_ptr() as *mut u8),
            _ => None,
        })
    }

    /// Flushes a modified byte range of a `Managed`-storage buffer back to the device. Managed
    /// storage on this backend is always host-coherent, so there is nothing to flush; this exists
    /// only to keep the call shape of the external interface.
    pub fn buffer_did_modify_range(&self, _handle: ResourceHandle, _offset: u64, _len: u64) {}

    /// Compiles one frame: allocates transient resources, runs the dependency analyzer over the
    /// supplied usages, and expands any `generateMipmaps` commands. Returns the encoder/command
    /// stream the caller dispatches via [`dispatcher::dispatch_encoder`].
    pub fn compile_frame(
        &mut self,
        passes: &[PassRecord],
        encoders: Vec<EncoderInfo>,
        commands: Vec<(u64, Command)>,
        usages: &[UsageRecord],
        transient_descriptors: &[(ResourceId, Descriptor)],
    ) -> CompiledFrame {
        let _span = trace_span!("compile_frame", frame = self.frame_index, passes = passes.len()).entered();

        self.transient.begin(self.frame_index);
        for &(id, descriptor) in transient_descriptors {
            self.transient.allocate(id, descriptor, &mut self.pool);
        }

        let queue_of_encoder = |encoder_index: usize| -> usize {
            encoders.get(encoder_index).map(|e| self.device.queues.by_caps(caps_for(e.kind)).map(|q| q.index_in_family as usize).unwrap_or(0)).unwrap_or(0)
        };
        let mut resource_stream = analyze(&encoders, usages, queue_of_encoder);

        for &(index, ref command) in &commands {
            if let Command::GenerateMipmaps { texture, mip_levels } = command {
                resource_stream.extend(expand_generate_mipmaps(*texture, *mip_levels, index));
            }
        }
        resource_stream.sort_by_key(|c| c.anchor());

        info!(frame = self.frame_index, encoders = encoders.len(), "frame compiled");
        CompiledFrame { encoders, commands, resource_stream }
    }

    /// Returns every transient resource to the pool and advances the frame counter. Call once
    /// dispatch and submission for this frame have been recorded.
    pub fn end_frame(&mut self) {
        self.transient.end(&mut self.pool);
        self.pool.cycle_frames();
        self.frame_index += 1;
    }

    pub fn completion_tracker(&self) -> Arc<CompletionTracker> {
        self.completion.clone()
    }

    /// Builds the wait/signal lists for submitting `queue_index`'s command buffer.
    pub fn submission_plan(
        &self,
        queue_index: usize,
        submission: serial::SubmissionNumber,
        cross_encoder_waits: &[submission::TimelineWait],
        swapchains: &[submission::SwapchainPresent],
    ) -> Option<submission::SubmissionPlan> {
        let queue = self.device.queues.queues.get(queue_index)?;
        Some(submission::build_submission_plan(submission, queue.timeline.get(), cross_encoder_waits, swapchains))
    }

    /// The only core entry point: compiles the frame, dispatches every encoder through its
    /// caller-supplied sink (`sinks[i]` records `frame.encoders[i]`), builds each queue's
    /// submission plan, and arranges for `completion` to run exactly once, after every
    /// submission's timeline value has been observed to retire. Returns immediately with the
    /// submission plans; actually submitting them (`vkQueueSubmit`) is the caller's job.
    ///
    /// An empty `submissions` list still invokes `completion`, synchronously, before returning:
    /// there is nothing left to wait on.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_frame_graph(
        &mut self,
        passes: &[PassRecord],
        encoders: Vec<EncoderInfo>,
        commands: Vec<(u64, Command)>,
        usages: &[UsageRecord],
        transient_descriptors: &[(ResourceId, Descriptor)],
        sinks: &mut [&mut dyn EncoderSink],
        submissions: &[FrameSubmission],
        completion: Box<dyn FnOnce() + Send>,
    ) -> Result<Vec<SubmissionPlan>> {
        let frame = self.compile_frame(passes, encoders, commands, usages, transient_descriptors);

        let mut cursor = 0usize;
        for (encoder, sink) in frame.encoders.iter().zip(sinks.iter_mut()) {
            dispatch_encoder(encoder, &frame.commands, &frame.resource_stream, &mut cursor, *sink)?;
        }

        let mut plans = Vec::with_capacity(submissions.len());
        let mut retirements = Vec::with_capacity(submissions.len());
        for s in submissions {
            let plan = self
                .submission_plan(s.queue_index, s.submission, &s.cross_encoder_waits, &s.swapchains)
                .ok_or(BackendError::UnsupportedOperation("submission targets an unknown queue index"))?;
            if let Some((_, value)) = plan.timeline_signal {
                retirements.push((s.queue_index, value));
            }
            plans.push(plan);
        }
        submission::register_frame_completion(&self.completion, &retirements, completion);

        self.end_frame();
        Ok(plans)
    }

    /// Looks up (or creates, via `create`) the graphics pipeline for `key`. Delegates to the
    /// render-pipeline state cache; the actual `vkCreateGraphicsPipelines` call — which needs
    /// shader modules from the reflection/shader-library collaborator — is supplied by `create`.
    pub fn render_pipeline_reflection(
        &self,
        key: cache::RenderPipelineKey,
        create: impl FnOnce(&cache::RenderPipelineKey) -> ash::vk::Pipeline,
    ) -> Arc<ash::vk::Pipeline> {
        self.caches.render_pipelines.get_or_create(key, create)
    }

    /// Looks up (or creates) the compute pipeline for `key`. See [`Backend::render_pipeline_reflection`].
    pub fn compute_pipeline_reflection(
        &self,
        key: cache::ComputePipelineKey,
        create: impl FnOnce(&cache::ComputePipelineKey) -> ash::vk::Pipeline,
    ) -> Arc<ash::vk::Pipeline> {
        self.caches.compute_pipelines.get_or_create(key, create)
    }
}

fn caps_for(kind: pass::EncoderKind) -> QueueCaps {
    match kind {
        pass::EncoderKind::Draw => QueueCaps::RENDER,
        pass::EncoderKind::Compute => QueueCaps::COMPUTE,
        pass::EncoderKind::Blit => QueueCaps::BLIT,
    }
}
