//! Board I/O layer.
//!
//! Everything a dispatch does to the outside world goes through the
//! [`BoardIo`] trait: memory-mapped register access, GPIO lines, the PWM
//! sysfs channel and external process control. [`ShellIo`] is the production
//! implementation backed by the board's stock command-line tools;
//! [`MockIo`] records every operation for tests and the `--mock` flag.

pub mod board;
pub mod mock;
pub mod shell;

pub use board::BoardIo;
pub use mock::MockIo;
pub use shell::ShellIo;
