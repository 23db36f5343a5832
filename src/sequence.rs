//! Action sequences and the sequencer that executes them.
//!
//! A fired command latch maps to an [`ActionSequence`]: an ordered list of
//! [`Op`] steps plus a cleanup tail. Operations are plain data rather than
//! closures, so controllers can build them from a snapshot and tests can
//! inspect exactly what a command would do before any hardware is touched.
//!
//! The [`Sequencer`] owns execution policy:
//!
//! - steps run strictly in order, one at a time;
//! - the first failed step aborts the sequence, runs the cleanup tail and
//!   surfaces [`KitError::Dispatch`];
//! - a timed hold watches the shutdown channel and aborts into the cleanup
//!   tail with [`KitError::Cancelled`] when the daemon is stopping;
//! - the cleanup tail itself is best effort, every step is attempted even
//!   if an earlier one fails;
//! - shutdown sequences run through [`Sequencer::run_shutdown`], which never
//!   gives up early and bounds every step with a timeout.
//!
//! Non-hold operations are short and always run to completion, even with a
//! cancellation pending; only holds are interruptible.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::error::{AppResult, KitError};
use crate::hardware::BoardIo;
use crate::parameter::{ParamSink, Value};

/// Allowance for a single step of a shutdown sequence.
pub const SHUTDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Op
// =============================================================================

/// One primitive step of an action sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Program a register with a fixed value.
    WriteRegister {
        /// Register address.
        addr: u32,
        /// Value to write.
        value: u32,
    },
    /// Read-modify-write: clear the bits in `mask`, then set `bits`.
    UpdateRegister {
        /// Register address.
        addr: u32,
        /// Bits cleared before the update.
        mask: u32,
        /// Bits set after clearing.
        bits: u32,
    },
    /// Drive a GPIO line to a level.
    SetLine {
        /// GPIO chip name.
        chip: &'static str,
        /// Line offset on the chip.
        line: u32,
        /// Target level, 0 or 1.
        level: u8,
    },
    /// Ensure a PWM channel is exported.
    PwmExport {
        /// PWM chip name.
        chip: &'static str,
        /// Channel index on the chip.
        index: u32,
    },
    /// Program the PWM period.
    PwmPeriod {
        /// PWM chip name.
        chip: &'static str,
        /// Channel index on the chip.
        index: u32,
        /// Period in nanoseconds.
        ns: u64,
    },
    /// Program the PWM duty cycle.
    PwmDutyCycle {
        /// PWM chip name.
        chip: &'static str,
        /// Channel index on the chip.
        index: u32,
        /// Duty cycle in nanoseconds.
        ns: u64,
    },
    /// Switch the PWM output on or off.
    PwmEnable {
        /// PWM chip name.
        chip: &'static str,
        /// Channel index on the chip.
        index: u32,
        /// Output state.
        on: bool,
    },
    /// Wait in place while hardware does its work. Interruptible by
    /// shutdown.
    Hold {
        /// How long to wait.
        duration: Duration,
    },
    /// Run an external program to completion.
    Run {
        /// Program name.
        program: &'static str,
        /// Arguments, already rendered.
        args: Vec<String>,
    },
    /// Start an external program detached.
    Spawn {
        /// Program name.
        program: &'static str,
        /// Arguments, already rendered.
        args: Vec<String>,
    },
    /// Kill every process with this executable name; no match is success.
    KillByName {
        /// Executable name.
        process: &'static str,
    },
    /// Push one value to the upstream parameter sink.
    Push {
        /// Upstream parameter name.
        name: &'static str,
        /// Value to push.
        value: Value,
    },
}

// =============================================================================
// ActionSequence
// =============================================================================

/// The steps a fired latch executes, plus a cleanup tail.
///
/// The cleanup tail runs when a step fails or a hold is cancelled, never
/// after a fully successful run. Tails are expected to hold only idempotent
/// de-energizing steps, so running them after an arbitrary prefix of the
/// sequence is always safe.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSequence {
    label: &'static str,
    steps: Vec<Op>,
    cleanup: Vec<Op>,
}

impl ActionSequence {
    /// Empty sequence with a label used in logs and dispatch errors.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            steps: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// Append one step.
    #[must_use]
    pub fn step(mut self, op: Op) -> Self {
        self.steps.push(op);
        self
    }

    /// Append several steps.
    #[must_use]
    pub fn with_steps(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.steps.extend(ops);
        self
    }

    /// Append one cleanup-tail step.
    #[must_use]
    pub fn finally(mut self, op: Op) -> Self {
        self.cleanup.push(op);
        self
    }

    /// Append several cleanup-tail steps.
    #[must_use]
    pub fn with_cleanup(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.cleanup.extend(ops);
        self
    }

    /// Label used in logs and dispatch errors.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The ordered steps.
    pub fn steps(&self) -> &[Op] {
        &self.steps
    }

    /// The cleanup tail.
    pub fn cleanup(&self) -> &[Op] {
        &self.cleanup
    }
}

// =============================================================================
// Sequencer
// =============================================================================

enum StepError {
    Failed(anyhow::Error),
    Cancelled,
}

/// Executes action sequences against a board.
///
/// Holds the board I/O handle, the optional upstream parameter sink (only
/// the proxy daemon attaches one) and the shutdown channel that makes timed
/// holds interruptible.
pub struct Sequencer {
    io: Arc<dyn BoardIo>,
    upstream: Option<Arc<dyn ParamSink>>,
    cancel: watch::Receiver<bool>,
}

impl Sequencer {
    /// Sequencer without an upstream sink; pushes will fail.
    pub fn new(io: Arc<dyn BoardIo>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            io,
            upstream: None,
            cancel,
        }
    }

    /// Attach the upstream sink [`Op::Push`] steps write to.
    #[must_use]
    pub fn with_upstream(mut self, upstream: Arc<dyn ParamSink>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Run a sequence to completion.
    ///
    /// On the first failed step the cleanup tail runs and the call returns
    /// [`KitError::Dispatch`]; a hold interrupted by shutdown runs the tail
    /// and returns [`KitError::Cancelled`].
    pub async fn run(&self, sequence: &ActionSequence) -> AppResult<()> {
        for (position, op) in sequence.steps().iter().enumerate() {
            match self.apply(op).await {
                Ok(()) => {}
                Err(StepError::Failed(source)) => {
                    tracing::error!(
                        sequence = sequence.label(),
                        position,
                        ?op,
                        %source,
                        "step failed, running cleanup tail"
                    );
                    self.run_cleanup(sequence).await;
                    return Err(KitError::Dispatch {
                        label: sequence.label(),
                        source,
                    });
                }
                Err(StepError::Cancelled) => {
                    tracing::warn!(
                        sequence = sequence.label(),
                        position,
                        "hold cancelled by shutdown, running cleanup tail"
                    );
                    self.run_cleanup(sequence).await;
                    return Err(KitError::Cancelled {
                        label: sequence.label(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run a shutdown sequence, best effort.
    ///
    /// Every step is attempted regardless of earlier failures, and each one
    /// is bounded by [`SHUTDOWN_STEP_TIMEOUT`] so a wedged tool cannot hang
    /// the exit path. Returns the number of failed or timed-out steps.
    pub async fn run_shutdown(&self, sequence: &ActionSequence) -> usize {
        let mut failures = 0;
        for op in sequence.steps() {
            match timeout(SHUTDOWN_STEP_TIMEOUT, self.apply(op)).await {
                Ok(Ok(())) => {}
                Ok(Err(StepError::Failed(err))) => {
                    failures += 1;
                    tracing::warn!(
                        sequence = sequence.label(),
                        ?op,
                        %err,
                        "shutdown step failed, continuing"
                    );
                }
                Ok(Err(StepError::Cancelled)) => {
                    failures += 1;
                    tracing::warn!(
                        sequence = sequence.label(),
                        ?op,
                        "shutdown step interrupted, continuing"
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(
                        sequence = sequence.label(),
                        ?op,
                        "shutdown step timed out, continuing"
                    );
                }
            }
        }
        failures
    }

    async fn run_cleanup(&self, sequence: &ActionSequence) {
        for op in sequence.cleanup() {
            match self.apply(op).await {
                Ok(()) => {}
                Err(StepError::Failed(err)) => {
                    tracing::warn!(
                        sequence = sequence.label(),
                        ?op,
                        %err,
                        "cleanup step failed, continuing"
                    );
                }
                Err(StepError::Cancelled) => {
                    tracing::warn!(
                        sequence = sequence.label(),
                        ?op,
                        "cleanup hold interrupted, continuing"
                    );
                }
            }
        }
    }

    async fn apply(&self, op: &Op) -> Result<(), StepError> {
        let result = match op {
            Op::WriteRegister { addr, value } => self.io.write_register(*addr, *value).await,
            Op::UpdateRegister { addr, mask, bits } => match self.io.read_register(*addr).await {
                Ok(current) => {
                    self.io
                        .write_register(*addr, (current & !mask) | bits)
                        .await
                }
                Err(err) => Err(err),
            },
            Op::SetLine { chip, line, level } => self.io.set_line(chip, *line, *level).await,
            Op::PwmExport { chip, index } => self.io.pwm_export(chip, *index).await,
            Op::PwmPeriod { chip, index, ns } => self.io.pwm_period(chip, *index, *ns).await,
            Op::PwmDutyCycle { chip, index, ns } => {
                self.io.pwm_duty_cycle(chip, *index, *ns).await
            }
            Op::PwmEnable { chip, index, on } => self.io.pwm_enable(chip, *index, *on).await,
            Op::Hold { duration } => return self.hold(*duration).await,
            Op::Run { program, args } => self.io.run(program, args).await,
            Op::Spawn { program, args } => self.io.spawn(program, args).await,
            Op::KillByName { process } => self.io.kill_by_name(process).await,
            Op::Push { name, value } => match &self.upstream {
                Some(sink) => sink.push(name, value.clone()).await,
                None => Err(anyhow::anyhow!("no upstream parameter sink attached")),
            },
        };
        result.map_err(StepError::Failed)
    }

    async fn hold(&self, duration: Duration) -> Result<(), StepError> {
        let mut cancel = self.cancel.clone();
        if *cancel.borrow() {
            return Err(StepError::Cancelled);
        }
        tokio::select! {
            () = sleep(duration) => Ok(()),
            // A closed channel means the daemon wiring is gone; treat it
            // like shutdown rather than holding hardware energized.
            _ = cancel.changed() => Err(StepError::Cancelled),
        }
    }
}
