//! Submission & sync engine.
//!
//! Builds the wait/signal lists for one queue's submission: timeline-semaphore waits derived
//! from cross-encoder events, binary-semaphore waits/signals for swapchains acquired/presented
//! by that submission, and a single timeline signal carrying this submission's serial.
use crate::{handle::ResourceId, serial::SubmissionNumber};
use ash::vk;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{trace, trace_span};

#[derive(Clone, Debug)]
pub struct TimelineWait {
    pub semaphore: vk::Semaphore,
    pub value: u64,
    pub dst_stage_mask: vk::PipelineStageFlags,
}

#[derive(Clone, Debug)]
pub struct SwapchainPresent {
    pub resource: ResourceId,
    pub acquire_semaphore: vk::Semaphore,
    pub present_semaphore: vk::Semaphore,
}

/// Everything one `vkQueueSubmit` needs beyond the command buffers themselves.
#[derive(Clone, Debug, Default)]
pub struct SubmissionPlan {
    pub timeline_waits: Vec<TimelineWait>,
    pub binary_wait_semaphores: Vec<vk::Semaphore>,
    pub binary_wait_stage_masks: Vec<vk::PipelineStageFlags>,
    pub timeline_signal: Option<(vk::Semaphore, u64)>,
    pub binary_signal_semaphores: Vec<vk::Semaphore>,
}

/// Combines cross-encoder timeline waits with swapchain acquire/present binary semaphores into
/// one plan. `submission` is the serial this command buffer will signal on completion.
pub fn build_submission_plan(
    submission: SubmissionNumber,
    timeline_semaphore: vk::Semaphore,
    cross_encoder_waits: &[TimelineWait],
    swapchains: &[SwapchainPresent],
) -> SubmissionPlan {
    let mut plan = SubmissionPlan {
        timeline_waits: cross_encoder_waits.to_vec(),
        timeline_signal: Some((timeline_semaphore, submission.serial())),
        ..Default::default()
    };
    for sc in swapchains {
        plan.binary_wait_semaphores.push(sc.acquire_semaphore);
        plan.binary_wait_stage_masks.push(vk::PipelineStageFlags::ALL_GRAPHICS);
        plan.binary_signal_semaphores.push(sc.present_semaphore);
    }
    plan
}

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Tracks in-flight submissions and guarantees each completion callback runs exactly once, after
/// its queue's timeline semaphore reaches the submitted value.
#[derive(Default)]
pub struct CompletionTracker {
    pending: Mutex<HashMap<(usize, u64), CompletionCallback>>,
}

impl CompletionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a callback to run once `queue`'s timeline reaches `value`.
    pub fn register(&self, queue: usize, value: u64, callback: CompletionCallback) {
        self.pending.lock().insert((queue, value), callback);
    }

    /// Called by the semaphore-signal task once it has observed `queue`'s timeline reach
    /// `observed_value`. Fires (and removes) every pending callback with value `<= observed_value`
    /// so a single poll can resolve several backlogged submissions at once; each callback is
    /// invoked at most once since it is removed from the map before running.
    pub fn notify_timeline_value(&self, queue: usize, observed_value: u64) {
        let due: Vec<((usize, u64), CompletionCallback)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<(usize, u64)> = pending
                .keys()
                .copied()
                .filter(|&(q, v)| q == queue && v <= observed_value)
                .collect();
            keys.into_iter().filter_map(|k| pending.remove(&k).map(|cb| (k, cb))).collect()
        };
        let _span = trace_span!("completion_callbacks", queue, observed_value, count = due.len()).entered();
        for ((q, v), callback) in due {
            trace!(queue = q, value = v, "firing completion callback");
            callback();
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Registers `completion` to run exactly once, after every `(queue, value)` pair in
/// `submissions` has retired. A frame that schedules no submissions at all still gets its
/// completion callback, fired immediately since there is nothing left to wait on.
pub fn register_frame_completion(tracker: &CompletionTracker, submissions: &[(usize, u64)], completion: Box<dyn FnOnce() + Send>) {
    if submissions.is_empty() {
        completion();
        return;
    }
    let completion = Arc::new(Mutex::new(Some(completion)));
    let remaining = Arc::new(AtomicUsize::new(submissions.len()));
    for &(queue, value) in submissions {
        let completion = completion.clone();
        let remaining = remaining.clone();
        tracker.register(
            queue,
            value,
            Box::new(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if let Some(cb) = completion.lock().take() {
                        cb();
                    }
                }
            }),
        );
    }
}
