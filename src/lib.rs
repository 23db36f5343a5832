//! # kitctl Core Library
//!
//! This crate is the core of the `kitctl` evaluation-kit control daemons. A
//! daemon exposes one device as a flat surface of named parameters, and a
//! single poll loop turns writes to that surface into hardware action: each
//! tick snapshots the parameters, corrects constraint violations, scans the
//! command latches and dispatches the armed ones in a fixed order. The
//! binary (`main.rs`) only parses a subcommand and wires these pieces
//! together.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`parameter`**: The declared parameter surface. `ParamSpec`
//!   declarations, the lock-per-slot `ParamStore`, per-tick `Snapshot`s and
//!   the `ParamSink` seam the proxy pushes through.
//! - **`validation`**: Per-tick constraint enforcement; out-of-constraint
//!   values are replaced with their declared fallback.
//! - **`command`**: Latch sentinels and the armed-latch scan.
//! - **`sequence`**: Action sequences as data (`Op`), plus the `Sequencer`
//!   that executes them with cleanup tails, cancellable holds and the
//!   best-effort shutdown runner.
//! - **`hardware`**: The `BoardIo` capability trait with its shell-tool
//!   implementation and a recording mock.
//! - **`device`**: One `Controller` per daemon: the motor, the camera and
//!   the relay proxy, each owning its catalog and sequences.
//! - **`poll`**: The `PollLoop` state machine that owns dispatch.
//! - **`endpoint`**: The null TCP endpoint holding the daemon's port until
//!   a protocol adapter is attached.
//! - **`error`**: The `KitError` taxonomy shared across the crate.
//! - **`logging`**: `tracing` subscriber setup for the daemons.

pub mod command;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod parameter;
pub mod poll;
pub mod sequence;
pub mod validation;
