//! Command-encoder dispatcher.
//!
//! Walks one encoder's command range, interleaving the compacted resource commands the
//! dependency analyzer produced with the frame-graph's own opcodes. The actual Vulkan calls for
//! each opcode are delegated to an injected [`EncoderSink`] — the per-call recorder wrappers
//! belong to the caller, not to this crate.
use crate::{
    dependency::CompactedResourceCommand,
    error::{BackendError, Result},
    pass::{Command, EncoderInfo},
};
use tracing::{error, trace_span};

/// One method per opcode family a draw/compute/blit encoder can receive. Implementors own the
/// live Vulkan command buffer; this trait only describes what must happen, not how.
pub trait EncoderSink {
    fn resource_command(&mut self, command: &CompactedResourceCommand) -> Result<()>;
    fn frame_command(&mut self, command: &Command) -> Result<()>;
}

/// Runs one encoder's command stream through `sink`.
///
/// For each command index `c` in the encoder's inclusive range: drain pending "before" resource
/// commands anchored at or before `c`, execute the frame-graph command at `c`, then drain pending
/// "after" resource commands anchored exactly at `c`. Fatally-unimplemented opcodes abort the
/// encoder immediately; the dispatcher never falls back to a default behavior.
///
/// `cursor` walks the whole frame's `resource_stream` (which is sorted by anchor across every
/// encoder, not just this one) and must be threaded, unmodified between calls, through every
/// encoder dispatched for the same frame in encoder order: entries this encoder doesn't own (a
/// `SignalEvent` belonging to an earlier producer, say) still have to be skipped in place rather
/// than restarting the scan, or a later encoder's own wait would never be reached.
pub fn dispatch_encoder(
    encoder: &EncoderInfo,
    commands: &[(u64, Command)],
    resource_stream: &[CompactedResourceCommand],
    cursor: &mut usize,
    sink: &mut dyn EncoderSink,
) -> Result<()> {
    let _span = trace_span!("dispatch_encoder", encoder = encoder.index, kind = ?encoder.kind).entered();

    let (lo, hi) = encoder.command_range;

    let drain_before = |cursor: &mut usize, upto: u64, sink: &mut dyn EncoderSink| -> Result<()> {
        while *cursor < resource_stream.len() {
            let cmd = &resource_stream[*cursor];
            if cmd.anchor() > upto || !cmd.order_before() {
                break;
            }
            sink.resource_command(cmd)?;
            *cursor += 1;
        }
        Ok(())
    };

    for &(index, ref command) in commands.iter().filter(|(i, _)| *i >= lo && *i <= hi) {
        drain_before(cursor, index, sink)?;

        if command.is_fatally_unimplemented() {
            error!(?command, index, "encoder reached a fatally unimplemented opcode");
            return Err(BackendError::UnsupportedOperation("synchronize opcode reached the dispatcher"));
        }
        sink.frame_command(command)?;

        // drain "after" entries anchored exactly here
        while *cursor < resource_stream.len() {
            let cmd = &resource_stream[*cursor];
            if cmd.anchor() != index || cmd.order_before() {
                break;
            }
            sink.resource_command(cmd)?;
            *cursor += 1;
        }
    }

    // any remaining "before" entries anchored within [lo, hi] but after the last frame command
    drain_before(cursor, hi, sink)?;
    Ok(())
}
