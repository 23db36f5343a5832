//! Recording mock for the board I/O layer.
//!
//! Stands in for [`ShellIo`](super::ShellIo) in tests and under the
//! `--mock` flag, so every daemon can run end-to-end on a development
//! machine with no evaluation board attached.
//!
//! # Capabilities
//!
//! - Records every operation as a readable description, in execution order
//! - Injects failures into operations matching a substring
//! - Simulates the register file, so read-modify-write steps compose
//! - Reports configured paths as absent, for probe failure tests

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::board::BoardIo;

/// Board I/O that records instead of touching hardware.
///
/// # Example
///
/// ```rust
/// use kitctl::hardware::{BoardIo, MockIo};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let io = MockIo::new();
/// io.write_register(0x2000_2214, 0xE0).await?;
///
/// assert_eq!(io.register(0x2000_2214), Some(0xE0));
/// assert_eq!(io.operations().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockIo {
    operations: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    registers: Mutex<HashMap<u32, u32>>,
    missing_paths: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockIo {
    /// Fresh mock with empty recordings and an all-zero register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded operation, in execution order.
    ///
    /// Failed operations are recorded too, so a test can assert that an
    /// attempt happened before its injected failure.
    pub fn operations(&self) -> Vec<String> {
        lock(&self.operations).clone()
    }

    /// Recorded operations whose description contains `needle`.
    pub fn operations_matching(&self, needle: &str) -> Vec<String> {
        lock(&self.operations)
            .iter()
            .filter(|op| op.contains(needle))
            .cloned()
            .collect()
    }

    /// Fail every subsequent operation whose description contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        lock(&self.failures).push(needle.to_string());
    }

    /// Report `path` as absent to [`BoardIo::path_exists`].
    pub fn remove_path(&self, path: &str) {
        lock(&self.missing_paths).push(path.to_string());
    }

    /// Seed the simulated register file.
    pub fn set_register(&self, addr: u32, value: u32) {
        lock(&self.registers).insert(addr, value);
    }

    /// Simulated register contents, if anything was ever written there.
    pub fn register(&self, addr: u32) -> Option<u32> {
        lock(&self.registers).get(&addr).copied()
    }

    fn record(&self, description: String) -> Result<()> {
        let inject = lock(&self.failures)
            .iter()
            .any(|needle| description.contains(needle.as_str()));
        lock(&self.operations).push(description.clone());
        if inject {
            bail!("injected failure for '{description}'");
        }
        Ok(())
    }
}

#[async_trait]
impl BoardIo for MockIo {
    async fn read_register(&self, addr: u32) -> Result<u32> {
        self.record(format!("read register {addr:#010x}"))?;
        Ok(lock(&self.registers).get(&addr).copied().unwrap_or(0))
    }

    async fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        self.record(format!("write register {addr:#010x} = {value:#x}"))?;
        lock(&self.registers).insert(addr, value);
        Ok(())
    }

    async fn set_line(&self, chip: &str, line: u32, level: u8) -> Result<()> {
        self.record(format!("gpio {chip} {line} = {level}"))
    }

    async fn pwm_export(&self, chip: &str, index: u32) -> Result<()> {
        self.record(format!("pwm {chip}/pwm{index} export"))
    }

    async fn pwm_period(&self, chip: &str, index: u32, ns: u64) -> Result<()> {
        self.record(format!("pwm {chip}/pwm{index} period {ns}"))
    }

    async fn pwm_duty_cycle(&self, chip: &str, index: u32, ns: u64) -> Result<()> {
        self.record(format!("pwm {chip}/pwm{index} duty_cycle {ns}"))
    }

    async fn pwm_enable(&self, chip: &str, index: u32, on: bool) -> Result<()> {
        self.record(format!("pwm {chip}/pwm{index} enable {}", u8::from(on)))
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<()> {
        self.record(format!("run {program} {}", args.join(" ")))
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<()> {
        self.record(format!("spawn {program} {}", args.join(" ")))
    }

    async fn kill_by_name(&self, process: &str) -> Result<()> {
        self.record(format!("kill {process}"))
    }

    async fn path_exists(&self, path: &str) -> bool {
        // Probes are recorded but can never fail.
        lock(&self.operations).push(format!("probe {path}"));
        !lock(&self.missing_paths).iter().any(|p| p == path)
    }
}
