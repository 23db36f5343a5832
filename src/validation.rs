//! Per-tick constraint enforcement.
//!
//! Runs at the top of every poll tick, after the snapshot is taken and
//! before any latch is dispatched. Each declared parameter is checked
//! against its constraint; a violating value is replaced with the declared
//! fallback in both the live store and the working snapshot. Correcting the
//! store is what makes the substitution externally visible: a remote reader
//! sees its rejected write for at most one poll interval.
//!
//! Corrections are substitutions, not clamps. A `motor.speed` of 7 against
//! the range `[0, 3]` becomes the fallback 0, not 3, so a wildly wrong write
//! lands the device in its declared safe value instead of at a range edge.
//!
//! Latches and free-text parameters carry no constraint and pass through
//! untouched; a correction is never an error, only a warning in the log.

use crate::parameter::{ParamStore, Snapshot};

/// Enforce every declared constraint against one tick's snapshot.
///
/// Violations are replaced with the declared fallback in `store` (visible to
/// remote readers) and in `snapshot` (what the tick dispatches from), so a
/// malformed external write can never reach hardware. Returns the number of
/// corrected parameters.
pub fn enforce(store: &ParamStore, snapshot: &mut Snapshot) -> usize {
    let mut corrected = 0;
    for spec in store.specs() {
        let rejected = match snapshot.get(spec.name()) {
            Some(value) if !spec.constraint().permits(value) => value.clone(),
            _ => continue,
        };
        let fallback = spec.fallback().clone();
        tracing::warn!(
            parameter = spec.name(),
            %rejected,
            %fallback,
            "constraint violated, substituting fallback"
        );
        if let Err(err) = store.set_internal(spec.name(), fallback.clone()) {
            // Only reachable if a catalog declares a fallback of the wrong
            // kind; the snapshot correction below still protects dispatch.
            tracing::error!(parameter = spec.name(), %err, "fallback write failed");
        }
        snapshot.put(spec.name(), fallback);
        corrected += 1;
    }
    corrected
}
