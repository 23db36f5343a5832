//! The poll loop: the single owner of dispatch.
//!
//! One loop per daemon. Each cycle sleeps for the poll interval, snapshots
//! the parameter store, lets [`validation`] correct the snapshot, scans the
//! controller's latches and dispatches every armed one strictly in order.
//! After each dispatch the latch is rewritten to idle no matter how the
//! dispatch ended, so commands are one-shot by construction.
//!
//! The loop is a two-state machine. It starts in `Running` and moves to the
//! terminal `ShuttingDown` when the cancellation channel flips: between
//! ticks through the sleep `select!`, or mid-dispatch when a timed hold
//! observes the channel and the sequencer surfaces
//! [`KitError::Cancelled`](crate::error::KitError::Cancelled). Either way
//! the controller's safe-state sequence then runs exactly once, best
//! effort, and the loop returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::command;
use crate::device::Controller;
use crate::error::KitError;
use crate::parameter::{ParamStore, Value};
use crate::sequence::Sequencer;
use crate::validation;

/// Default spacing between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    ShuttingDown,
}

/// The per-daemon poll loop.
pub struct PollLoop {
    store: Arc<ParamStore>,
    controller: Arc<dyn Controller>,
    sequencer: Sequencer,
    interval: Duration,
    cancel: watch::Receiver<bool>,
}

impl PollLoop {
    /// Wire a loop over one device's store, controller and sequencer.
    pub fn new(
        store: Arc<ParamStore>,
        controller: Arc<dyn Controller>,
        sequencer: Sequencer,
        interval: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            controller,
            sequencer,
            interval,
            cancel,
        }
    }

    /// Run until cancelled, then run the safe-state shutdown and return.
    pub async fn run(self) {
        tracing::info!(
            device = self.controller.name(),
            interval_ms = self.interval.as_millis() as u64,
            "poll loop running"
        );
        loop {
            if *self.cancel.borrow() {
                break;
            }
            let mut cancel = self.cancel.clone();
            tokio::select! {
                () = sleep(self.interval) => {}
                _ = cancel.changed() => {
                    tracing::debug!("cancellation observed between ticks");
                    break;
                }
            }
            if self.tick().await == LoopState::ShuttingDown {
                break;
            }
        }
        tracing::info!(device = self.controller.name(), "poll loop shutting down");
        self.shutdown().await;
    }

    /// One poll cycle: snapshot, validate, scan, dispatch.
    async fn tick(&self) -> LoopState {
        let mut snapshot = self.store.snapshot();
        let corrected = validation::enforce(&self.store, &mut snapshot);
        if corrected > 0 {
            tracing::debug!(corrected, "snapshot corrected before dispatch");
        }

        for latch in command::fired(self.controller.latch_order(), &snapshot) {
            let Some(sequence) = self.controller.sequence_for(latch, &snapshot) else {
                tracing::error!(latch, "armed latch has no action sequence");
                self.reset_latch(latch);
                continue;
            };
            tracing::debug!(latch, sequence = sequence.label(), "dispatching");
            let outcome = self.sequencer.run(&sequence).await;
            // One-shot: idle again whether the dispatch succeeded, failed
            // or was cancelled.
            self.reset_latch(latch);
            match outcome {
                Ok(()) => {
                    tracing::info!(sequence = sequence.label(), "dispatch complete");
                }
                Err(KitError::Cancelled { .. }) => {
                    tracing::warn!(
                        sequence = sequence.label(),
                        "dispatch interrupted by shutdown"
                    );
                    return LoopState::ShuttingDown;
                }
                Err(err) => {
                    tracing::error!(sequence = sequence.label(), %err, "dispatch failed");
                }
            }
        }
        LoopState::Running
    }

    fn reset_latch(&self, latch: &str) {
        if let Err(err) = self
            .store
            .set_internal(latch, Value::Int(command::IDLE))
        {
            tracing::error!(latch, %err, "latch reset failed");
        }
    }

    async fn shutdown(&self) {
        let sequence = self.controller.shutdown_sequence();
        if sequence.steps().is_empty() {
            tracing::info!(device = self.controller.name(), "no safe-state steps declared");
            return;
        }
        let failures = self.sequencer.run_shutdown(&sequence).await;
        if failures == 0 {
            tracing::info!(sequence = sequence.label(), "safe state reached");
        } else {
            tracing::warn!(
                sequence = sequence.label(),
                failures,
                "safe state reached with failed steps"
            );
        }
    }
}
