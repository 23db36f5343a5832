//! Command latches: edge-triggered triggers carried inside the parameter
//! surface.
//!
//! A latch is an ordinary integer parameter with trigger semantics layered on
//! top. A remote writer arms it by writing the [`FIRE`] sentinel; the poll
//! loop detects the armed latch in its per-tick snapshot, dispatches the
//! associated action sequence and then rewrites the latch to [`IDLE`]. The
//! reset is unconditional, so a latch can never replay a command after a
//! failed or interrupted dispatch.
//!
//! Several latches armed in the same snapshot are all dispatched within that
//! tick, one after another, in the order the controller declares them. Writes
//! that land while a dispatch is running are only observed by the next
//! snapshot, which is what coalesces a re-arm during dispatch into the reset.

use crate::parameter::Snapshot;

/// Sentinel a remote writer stores to arm a latch.
///
/// Deliberately far away from 0/1 so an accidental boolean-style write does
/// not trigger hardware.
pub const FIRE: i64 = 1111;

/// Resting latch value, restored by the loop after every dispatch.
pub const IDLE: i64 = 0;

/// Whether `latch` is armed in this snapshot.
///
/// Only the exact [`FIRE`] sentinel arms a latch; any other value, including
/// a truthy 1, reads as idle.
pub fn is_fired(snapshot: &Snapshot, latch: &str) -> bool {
    snapshot.int(latch) == FIRE
}

/// The armed latches of one snapshot, in declared dispatch order.
///
/// `order` is the controller's latch list; the result preserves its order so
/// the loop's sequential dispatch is deterministic when several latches were
/// armed between two ticks.
pub fn fired(order: &[&'static str], snapshot: &Snapshot) -> Vec<&'static str> {
    order
        .iter()
        .copied()
        .filter(|latch| is_fired(snapshot, latch))
        .collect()
}
