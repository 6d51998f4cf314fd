use ash::vk;
use ash::vk::Handle;
use slotmap::SlotMap;
use vkgraph::dependency::{analyze, expand_generate_mipmaps, CompactedResourceCommand};
use vkgraph::dispatcher::{dispatch_encoder, EncoderSink};
use vkgraph::error::Result;
use vkgraph::handle::{ResourceClass, ResourceId};
use vkgraph::pass::{Command, EncoderInfo, EncoderKind};
use vkgraph::pool::PoolAllocator;
use vkgraph::resource::{BackingResource, Descriptor, ImageDescriptor, LayoutMap, StorageMode};
use vkgraph::submission::{build_submission_plan, SwapchainPresent};
use vkgraph::usage::{UsageRecord, UsageType};

struct Fixture {
    resources: SlotMap<ResourceId, ()>,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture { resources: SlotMap::with_key() }
    }

    fn resource(&mut self) -> ResourceId {
        self.resources.insert(())
    }
}

fn encoder(index: usize, kind: EncoderKind, command_range: (u64, u64)) -> EncoderInfo {
    EncoderInfo {
        index,
        kind,
        pass_range: (index, index),
        command_range,
        render_target: None,
        command_buffer_index: index,
    }
}

#[derive(Default)]
struct RecordingSink {
    order: Vec<String>,
}

impl EncoderSink for RecordingSink {
    fn resource_command(&mut self, command: &CompactedResourceCommand) -> Result<()> {
        self.order.push(format!("{:?}@{}", command, command.anchor()));
        Ok(())
    }
    fn frame_command(&mut self, command: &Command) -> Result<()> {
        self.order.push(format!("{:?}", command));
        Ok(())
    }
}

/// Scenario 1: a compute encoder writes a buffer a draw encoder then reads as a constant buffer.
/// The analyzer must emit exactly one signal/wait pair, and dispatching both encoders must
/// interleave the wait ahead of the draw command that depends on it.
#[test]
fn compute_then_draw_constant_buffer_dependency() {
    let mut fixture = Fixture::new();
    let buffer = fixture.resource();

    let encoders = vec![encoder(0, EncoderKind::Compute, (0, 0)), encoder(1, EncoderKind::Draw, (1, 1))];
    let commands = vec![(0, Command::DispatchThreads { x: 8, y: 8, z: 1 }), (1, Command::Draw)];
    let usages = vec![
        UsageRecord {
            resource: buffer,
            resource_class: ResourceClass::Buffer,
            command_index: 0,
            usage: UsageType::StorageWrite,
            stages: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        UsageRecord {
            resource: buffer,
            resource_class: ResourceClass::Buffer,
            command_index: 1,
            usage: UsageType::ConstantBuffer,
            stages: vk::PipelineStageFlags::VERTEX_SHADER,
        },
    ];

    let stream = analyze(&encoders, &usages, |_| 0);
    assert_eq!(stream.iter().filter(|c| matches!(c, CompactedResourceCommand::SignalEvent { .. })).count(), 1);
    assert_eq!(stream.iter().filter(|c| matches!(c, CompactedResourceCommand::WaitForEvents { .. })).count(), 1);

    let mut sink = RecordingSink::default();
    let mut cursor = 0;
    dispatch_encoder(&encoders[0], &commands, &stream, &mut cursor, &mut sink).unwrap();
    dispatch_encoder(&encoders[1], &commands, &stream, &mut cursor, &mut sink).unwrap();

    let wait_pos = sink.order.iter().position(|s| s.starts_with("WaitForEvents")).expect("wait recorded");
    let draw_pos = sink.order.iter().position(|s| s == "Draw").expect("draw recorded");
    assert!(wait_pos < draw_pos, "wait must be drained before the command that depends on it");
}

/// Scenario 2: a render pass writes a color attachment; a later sampling pass must receive an
/// image barrier from `COLOR_ATTACHMENT_OPTIMAL` to `SHADER_READ_ONLY_OPTIMAL`.
#[test]
fn render_then_sample_image_layout_transition() {
    let mut fixture = Fixture::new();
    let texture = fixture.resource();

    let encoders = vec![encoder(0, EncoderKind::Draw, (0, 0)), encoder(1, EncoderKind::Draw, (1, 1))];
    let usages = vec![
        UsageRecord {
            resource: texture,
            resource_class: ResourceClass::Texture,
            command_index: 0,
            usage: UsageType::ColorAttachmentWrite,
            stages: vk::PipelineStageFlags::empty(),
        },
        UsageRecord {
            resource: texture,
            resource_class: ResourceClass::Texture,
            command_index: 1,
            usage: UsageType::SampledTexture,
            stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
    ];

    let stream = analyze(&encoders, &usages, |_| 0);
    let waits: Vec<_> = stream.iter().filter_map(|c| match c {
        CompactedResourceCommand::WaitForEvents { image_barriers, .. } => Some(image_barriers),
        _ => None,
    }).collect();
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].len(), 1);
    assert_eq!(waits[0][0].old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(waits[0][0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

/// Scenario 3: generating 4 mip levels produces a 3-step barrier/blit/barrier chain (levels 1..4)
/// ending in `SHADER_READ_ONLY_OPTIMAL`, with every intermediate level left in `TRANSFER_SRC_OPTIMAL`.
#[test]
fn four_level_mipmap_chain_progresses_through_transfer_layouts() {
    let mut fixture = Fixture::new();
    let texture = fixture.resource();

    let barriers = expand_generate_mipmaps(texture, 4, 10);
    assert_eq!(barriers.len(), 6);

    let final_layouts: Vec<vk::ImageLayout> = barriers
        .iter()
        .filter_map(|c| match c {
            CompactedResourceCommand::PipelineBarrier { image_barriers, .. } if image_barriers[0].dst_access == vk::AccessFlags::SHADER_READ || image_barriers[0].new_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
                Some(image_barriers[0].new_layout)
            }
            _ => None,
        })
        .collect();
    // one "downsample done" transition per level: levels 1,2 land in TRANSFER_SRC_OPTIMAL, level 3 in SHADER_READ_ONLY_OPTIMAL
    assert_eq!(final_layouts, vec![
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ]);
}

/// Scenario 4: two draw encoders touching disjoint resources produce no cross-encoder
/// synchronization at all, so both dispatch cleanly with nothing but their own frame commands.
#[test]
fn independent_passes_need_no_shared_submission_wait() {
    let mut fixture = Fixture::new();
    let a = fixture.resource();
    let b = fixture.resource();

    let encoders = vec![encoder(0, EncoderKind::Draw, (0, 0)), encoder(1, EncoderKind::Draw, (1, 1))];
    let commands = vec![(0, Command::Draw), (1, Command::Draw)];
    let usages = vec![
        UsageRecord {
            resource: a,
            resource_class: ResourceClass::Texture,
            command_index: 0,
            usage: UsageType::ColorAttachmentWrite,
            stages: vk::PipelineStageFlags::empty(),
        },
        UsageRecord {
            resource: b,
            resource_class: ResourceClass::Texture,
            command_index: 1,
            usage: UsageType::ColorAttachmentWrite,
            stages: vk::PipelineStageFlags::empty(),
        },
    ];
    let stream = analyze(&encoders, &usages, |_| 0);
    assert!(stream.is_empty());

    let mut sink = RecordingSink::default();
    let mut cursor = 0;
    dispatch_encoder(&encoders[0], &commands, &stream, &mut cursor, &mut sink).unwrap();
    dispatch_encoder(&encoders[1], &commands, &stream, &mut cursor, &mut sink).unwrap();
    assert_eq!(sink.order, vec!["Draw", "Draw"]);
}

/// Scenario 5: a submission that presents a swapchain carries the acquire semaphore as a binary
/// wait and the present semaphore as a binary signal, alongside its own timeline signal.
#[test]
fn swapchain_present_carries_acquire_and_present_semaphores() {
    let mut fixture = Fixture::new();
    let swapchain_image = fixture.resource();

    let acquire = vk::Semaphore::from_raw(11);
    let present = vk::Semaphore::from_raw(22);
    let timeline = vk::Semaphore::from_raw(33);
    let submission = vkgraph::serial::SubmissionNumber::new(0, 1);

    let plan = build_submission_plan(
        submission,
        timeline,
        &[],
        &[SwapchainPresent { resource: swapchain_image, acquire_semaphore: acquire, present_semaphore: present }],
    );

    assert_eq!(plan.binary_wait_semaphores, vec![acquire]);
    assert_eq!(plan.binary_signal_semaphores, vec![present]);
    assert_eq!(plan.timeline_signal, Some((timeline, 1)));
}

/// Scenario 6: a transient image deposited into the pool becomes collectible again, by the exact
/// same handle, once the ring has rotated back to the slot it was deposited into.
#[test]
fn pool_reuse_returns_the_exact_same_backing() {
    let mut pool = PoolAllocator::new(3);
    let marker = vk::Image::from_raw(0xfeed_f00d);
    let descriptor = Descriptor::Image(ImageDescriptor {
        extent: vk::Extent3D { width: 512, height: 512, depth: 1 },
        mip_levels: 1,
        array_layers: 1,
        format: vk::Format::R8G8B8A8_UNORM,
        usage: vk::ImageUsageFlags::SAMPLED,
        samples: 1,
        storage_mode: StorageMode::Private,
    });

    let backing = pool.collect_with(descriptor, |d| match d {
        Descriptor::Image(d) => BackingResource::Image {
            handle: marker,
            allocation: None,
            layout_map: LayoutMap::new(vk::ImageLayout::UNDEFINED),
            descriptor: d,
            external_memory: false,
        },
        _ => unreachable!(),
    });
    pool.deposit(backing);

    for _ in 0..3 {
        pool.cycle_frames();
    }

    match pool.collect(descriptor) {
        BackingResource::Image { handle, .. } => assert_eq!(handle, marker),
        _ => panic!("expected image"),
    }
}
