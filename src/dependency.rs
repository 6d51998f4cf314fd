//! The resource-usage dependency analyzer.
//!
//! Input: the passes, their encoder groupings, and the per-command usage stream. Output: a
//! sorted sequence of [`CompactedResourceCommand`]s (the barriers/events the dispatcher must
//! interleave with command encoding) plus, where a usage transition happens inside one render
//! pass, subpass dependencies attached to the pass's [`RenderTargetDescriptor`].
use crate::{
    handle::{ResourceClass, ResourceId},
    pass::EncoderInfo,
    usage::{derive_access, UsageRecord},
};
use ash::vk;
use fixedbitset::FixedBitSet;
use std::collections::HashMap;
use tracing::trace_span;

/// One synchronization primitive, anchored at a command index and ordered before/after it.
#[derive(Clone, Debug)]
pub enum CompactedResourceCommand {
    SignalEvent {
        anchor: u64,
        queue: usize,
        after_stages: vk::PipelineStageFlags,
    },
    WaitForEvents {
        anchor: u64,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        image_barriers: Vec<ImageBarrier>,
        buffer_barriers: Vec<BufferBarrier>,
    },
    PipelineBarrier {
        anchor: u64,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        dep_flags: vk::DependencyFlags,
        image_barriers: Vec<ImageBarrier>,
        buffer_barriers: Vec<BufferBarrier>,
    },
}

impl CompactedResourceCommand {
    pub fn anchor(&self) -> u64 {
        match self {
            CompactedResourceCommand::SignalEvent { anchor, .. } => *anchor,
            CompactedResourceCommand::WaitForEvents { anchor, .. } => *anchor,
            CompactedResourceCommand::PipelineBarrier { anchor, .. } => *anchor,
        }
    }

    /// Whether this entry must be drained before (`true`) or after (`false`) executing the
    /// command at its anchor index.
    pub fn order_before(&self) -> bool {
        !matches!(self, CompactedResourceCommand::SignalEvent { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ImageBarrier {
    pub resource: ResourceId,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

#[derive(Clone, Debug)]
pub struct BufferBarrier {
    pub resource: ResourceId,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// One recorded dependency between a producing and a consuming encoder over a shared resource.
#[derive(Clone, Debug)]
struct DependencyEdge {
    resource: ResourceId,
    is_image: bool,
    producer: UsageRecord,
    consumer: UsageRecord,
}

/// Lower-triangular matrix D[i,j] over encoder indices: D[i,j] records, for each resource
/// shared between encoders i and j, the dependency edges. `j < i` may be non-empty; `j >= i` is
/// always empty (passes execute in submission order, so a later encoder can only depend on an
/// earlier one).
#[derive(Default)]
pub struct DependencyTable {
    edges: HashMap<(usize, usize), Vec<DependencyEdge>>,
}

impl DependencyTable {
    fn add(&mut self, consumer_encoder: usize, producer_encoder: usize, edge: DependencyEdge) {
        assert!(
            producer_encoder < consumer_encoder,
            "D[i,j] requires j < i: producer must precede consumer"
        );
        self.edges.entry((consumer_encoder, producer_encoder)).or_default().push(edge);
    }

    fn get(&self, consumer_encoder: usize, producer_encoder: usize) -> Option<&[DependencyEdge]> {
        self.edges.get(&(consumer_encoder, producer_encoder)).map(Vec::as_slice)
    }

    fn direct_producers(&self, consumer_encoder: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.keys().filter(move |&&(i, _)| i == consumer_encoder).map(|&(_, j)| j)
    }
}

/// Which encoder index first/last touches a resource, found by a single pass over all usages.
fn which_encoder(encoders: &[EncoderInfo], command_index: u64) -> usize {
    encoders
        .iter()
        .position(|e| command_index >= e.command_range.0 && command_index <= e.command_range.1)
        .expect("command index must fall inside exactly one encoder")
}

/// Builds the dependency table by walking, for each resource, its usages in command-index order
/// and recording an edge whenever a later (consuming) usage in a different, later encoder
/// follows an earlier (producing) usage that it has a true data dependency on (a write involved
/// on either side).
fn build_dependency_table(encoders: &[EncoderInfo], usages: &[UsageRecord]) -> DependencyTable {
    let mut by_resource: HashMap<ResourceId, Vec<UsageRecord>> = HashMap::new();
    for &u in usages {
        by_resource.entry(u.resource).or_default().push(u);
    }

    let mut table = DependencyTable::default();
    for (resource, mut recs) in by_resource {
        recs.sort_by_key(|u| u.command_index);
        for window in recs.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if !(prev.usage.is_write() || next.usage.is_write()) {
                continue; // read-after-read needs no synchronization
            }
            let prev_enc = which_encoder(encoders, prev.command_index);
            let next_enc = which_encoder(encoders, next.command_index);
            if prev_enc == next_enc {
                continue; // handled by the intra-encoder pass
            }
            debug_assert_eq!(
                prev.resource_class, next.resource_class,
                "the same resource id must carry one resource class across all its usages"
            );
            let is_image = next.resource_class == ResourceClass::Texture;
            table.add(
                next_enc,
                prev_enc,
                DependencyEdge { resource, is_image, producer: prev, consumer: next },
            );
        }
    }
    table
}

/// Computes, for each encoder, the set of encoders reachable from it by following direct
/// dependency edges (D[consumer, producer] with producer < consumer). Used for the transitive
/// reduction: an edge `producer -> consumer` is redundant if some other direct producer
/// of `consumer` can already reach `producer`.
fn compute_reachability(n: usize, table: &DependencyTable) -> Vec<FixedBitSet> {
    let mut direct: Vec<FixedBitSet> = (0..n).map(|_| FixedBitSet::with_capacity(n)).collect();
    for (consumer, row) in direct.iter_mut().enumerate() {
        for producer in table.direct_producers(consumer) {
            row.insert(producer);
        }
    }
    // Floyd–Warshall style transitive closure over a DAG ordered by encoder index: producer < consumer always,
    // so a single forward pass suffices.
    let mut reach = direct.clone();
    for consumer in 0..n {
        let producers: Vec<usize> = direct[consumer].ones().collect();
        for p in producers {
            let reachable_from_p = reach[p].clone();
            reach[consumer].union_with(&reachable_from_p);
        }
    }
    reach
}

/// Cross-encoder events: after transitive reduction, each surviving producer→consumer
/// edge contributes exactly one `SignalEvent` at the producer and one `WaitForEvents` at the
/// consumer.
fn emit_cross_encoder_events(
    encoders: &[EncoderInfo],
    table: &DependencyTable,
    queue_of_encoder: &dyn Fn(usize) -> usize,
) -> Vec<CompactedResourceCommand> {
    let n = encoders.len();
    let reach = compute_reachability(n, table);

    // An edge (consumer, producer) is redundant if some other direct producer `mid` of consumer
    // (mid != producer) can reach `producer` itself — i.e. producer -> mid -> consumer already
    // covers it.
    let mut kept: HashMap<(usize, usize), Vec<&DependencyEdge>> = HashMap::new();
    for consumer in 0..n {
        let producers: Vec<usize> = table.direct_producers(consumer).collect();
        for &producer in &producers {
            let redundant = producers.iter().any(|&mid| mid != producer && reach[mid].contains(producer));
            if !redundant {
                if let Some(edges) = table.get(consumer, producer) {
                    kept.entry((consumer, producer)).or_default().extend(edges.iter());
                }
            }
        }
    }

    let mut out = Vec::new();
    // group by producer to merge stage masks and pick the single latest signal anchor
    let mut per_producer: HashMap<usize, (u64, vk::PipelineStageFlags)> = HashMap::new();
    for (&(_, producer), edges) in &kept {
        let entry = per_producer.entry(producer).or_insert((0, vk::PipelineStageFlags::empty()));
        for e in edges.iter() {
            let (_, stage, _) = derive_access(e.producer.usage, e.producer.stages, false);
            entry.0 = entry.0.max(e.producer.command_index);
            entry.1 |= stage;
        }
    }
    for (&producer, &(anchor, stages)) in &per_producer {
        out.push(CompactedResourceCommand::SignalEvent {
            anchor,
            queue: queue_of_encoder(producer),
            after_stages: stages,
        });
    }

    for (&(_consumer, _producer), edges) in &kept {
        let anchor = edges.iter().map(|e| e.consumer.command_index).min().unwrap();
        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        for e in edges.iter() {
            let (src_access, src_stage, old_layout) = derive_access(e.producer.usage, e.producer.stages, false);
            let (dst_access, dst_stage, new_layout) = derive_access(e.consumer.usage, e.consumer.stages, false);
            src_stages |= src_stage;
            dst_stages |= dst_stage;
            if e.is_image {
                image_barriers.push(ImageBarrier {
                    resource: e.resource,
                    src_access,
                    dst_access,
                    old_layout,
                    new_layout,
                });
            } else {
                buffer_barriers.push(BufferBarrier { resource: e.resource, src_access, dst_access });
            }
        }
        debug_assert!(!src_stages.is_empty() && !dst_stages.is_empty());
        out.push(CompactedResourceCommand::WaitForEvents {
            anchor,
            src_stages,
            dst_stages,
            image_barriers,
            buffer_barriers,
        });
    }

    out
}

/// Intra-encoder barriers: usage transitions on a resource within a single encoder are
/// batched into as few `PipelineBarrier`s as possible, pushed as late as the earliest consumer
/// that needs them (`last_index`).
fn emit_intra_encoder_barriers(
    encoders: &[EncoderInfo],
    usages: &[UsageRecord],
) -> Vec<CompactedResourceCommand> {
    let mut by_resource: HashMap<ResourceId, Vec<UsageRecord>> = HashMap::new();
    for &u in usages {
        by_resource.entry(u.resource).or_default().push(u);
    }

    struct PendingBatch {
        last_index: u64,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        image_barriers: Vec<ImageBarrier>,
        buffer_barriers: Vec<BufferBarrier>,
    }

    let mut out = Vec::new();
    for (_resource, mut recs) in by_resource {
        recs.sort_by_key(|u| u.command_index);
        let mut pending: Option<PendingBatch> = None;

        let flush = |pending: &mut Option<PendingBatch>, out: &mut Vec<CompactedResourceCommand>| {
            if let Some(b) = pending.take() {
                out.push(CompactedResourceCommand::PipelineBarrier {
                    anchor: b.last_index,
                    src_stages: b.src_stages,
                    dst_stages: b.dst_stages,
                    dep_flags: vk::DependencyFlags::empty(),
                    image_barriers: b.image_barriers,
                    buffer_barriers: b.buffer_barriers,
                });
            }
        };

        for window in recs.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if !(prev.usage.is_write() || next.usage.is_write()) {
                continue;
            }
            let prev_enc = which_encoder(encoders, prev.command_index);
            let next_enc = which_encoder(encoders, next.command_index);
            if prev_enc != next_enc {
                continue; // handled cross-encoder
            }
            if let Some(b) = &pending {
                if next.command_index > b.last_index {
                    flush(&mut pending, &mut out);
                }
            }
            let (src_access, src_stage, old_layout) = derive_access(prev.usage, prev.stages, false);
            let (dst_access, dst_stage, new_layout) = derive_access(next.usage, next.stages, false);
            debug_assert_eq!(
                prev.resource_class, next.resource_class,
                "the same resource id must carry one resource class across all its usages"
            );
            let is_image = next.resource_class == ResourceClass::Texture;

            let entry = pending.get_or_insert_with(|| PendingBatch {
                last_index: next.command_index,
                src_stages: vk::PipelineStageFlags::empty(),
                dst_stages: vk::PipelineStageFlags::empty(),
                image_barriers: Vec::new(),
                buffer_barriers: Vec::new(),
            });
            entry.last_index = entry.last_index.min(next.command_index);
            entry.src_stages |= src_stage;
            entry.dst_stages |= dst_stage;
            if is_image {
                entry.image_barriers.push(ImageBarrier {
                    resource: next.resource,
                    src_access,
                    dst_access,
                    old_layout,
                    new_layout,
                });
            } else {
                entry.buffer_barriers.push(BufferBarrier { resource: next.resource, src_access, dst_access });
            }
        }
        flush(&mut pending, &mut out);
    }
    out
}

/// Expands a `generateMipmaps(texture)` command into the blit chain of barrier, blit, barrier steps for each mip level.
/// `N == 1` is a documented no-op boundary: there is nothing to downsample.
pub fn expand_generate_mipmaps(texture: ResourceId, mip_levels: u32, base_command_index: u64) -> Vec<CompactedResourceCommand> {
    if mip_levels <= 1 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for level in 1..mip_levels {
        let anchor = base_command_index + level as u64;
        out.push(CompactedResourceCommand::PipelineBarrier {
            anchor,
            src_stages: vk::PipelineStageFlags::TRANSFER,
            dst_stages: vk::PipelineStageFlags::TRANSFER,
            dep_flags: vk::DependencyFlags::empty(),
            image_barriers: vec![ImageBarrier {
                resource: texture,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            }],
            buffer_barriers: vec![],
        });
        let final_layout = if level == mip_levels - 1 {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        };
        out.push(CompactedResourceCommand::PipelineBarrier {
            anchor,
            src_stages: vk::PipelineStageFlags::TRANSFER,
            dst_stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dep_flags: vk::DependencyFlags::empty(),
            image_barriers: vec![ImageBarrier {
                resource: texture,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: final_layout,
            }],
            buffer_barriers: vec![],
        });
    }
    out
}

/// Runs the full analysis: returns a command-index-sorted stream of compacted resource
/// commands.
pub fn analyze(
    encoders: &[EncoderInfo],
    usages: &[UsageRecord],
    queue_of_encoder: impl Fn(usize) -> usize,
) -> Vec<CompactedResourceCommand> {
    let _span = trace_span!("dependency_analyzer", encoders = encoders.len(), usages = usages.len()).entered();

    let table = build_dependency_table(encoders, usages);
    let mut stream = emit_cross_encoder_events(encoders, &table, &queue_of_encoder);
    stream.extend(emit_intra_encoder_barriers(encoders, usages));
    stream.sort_by_key(|c| c.anchor());
    stream
}
