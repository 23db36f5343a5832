//! The board I/O capability trait.

use anyhow::Result;
use async_trait::async_trait;

/// Primitive operations a dispatch performs against the board.
///
/// Action sequences never touch the operating system directly; every step
/// bottoms out in one of these calls. That keeps the sequences testable (the
/// recording mock implements the same trait) and keeps the shell-tool
/// plumbing in one place.
///
/// # Contract
///
/// * Every method either performs its effect or returns an error. No
///   implementation may silently drop an operation.
/// * `kill_by_name` treats "no such process" as success; stopping something
///   that is already stopped is not a fault.
/// * `pwm_export` is idempotent: exporting an already-exported channel
///   succeeds without touching the export file again.
#[async_trait]
pub trait BoardIo: Send + Sync {
    /// Read a 32-bit value from a memory-mapped register.
    async fn read_register(&self, addr: u32) -> Result<u32>;

    /// Write a 32-bit value to a memory-mapped register.
    async fn write_register(&self, addr: u32, value: u32) -> Result<()>;

    /// Drive a GPIO line on `chip` to `level` (0 or 1).
    async fn set_line(&self, chip: &str, line: u32, level: u8) -> Result<()>;

    /// Ensure PWM channel `index` on `chip` is exported via sysfs.
    async fn pwm_export(&self, chip: &str, index: u32) -> Result<()>;

    /// Program the PWM period in nanoseconds.
    async fn pwm_period(&self, chip: &str, index: u32, ns: u64) -> Result<()>;

    /// Program the PWM duty cycle in nanoseconds.
    async fn pwm_duty_cycle(&self, chip: &str, index: u32, ns: u64) -> Result<()>;

    /// Switch the PWM output on or off.
    async fn pwm_enable(&self, chip: &str, index: u32, on: bool) -> Result<()>;

    /// Run an external program to completion. A non-zero exit is an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<()>;

    /// Start an external program detached; the caller never waits on it.
    async fn spawn(&self, program: &str, args: &[String]) -> Result<()>;

    /// Terminate every process with the given executable name.
    async fn kill_by_name(&self, process: &str) -> Result<()>;

    /// Whether a device or sysfs path is present. Used by startup probes.
    async fn path_exists(&self, path: &str) -> bool;
}
