//! Production board I/O backed by the board's stock command-line tools.
//!
//! The evaluation image ships the usual embedded toolbox instead of a kernel
//! driver stack: `devmem2` for memory-mapped registers, `gpioset` for GPIO
//! lines, the PWM class tree under sysfs and `pkill` for process control.
//! [`ShellIo`] wraps those tools behind [`BoardIo`] so action sequences stay
//! free of command-line plumbing.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use super::board::BoardIo;

/// Board I/O that shells out to the stock tools.
pub struct ShellIo {
    pwm_root: PathBuf,
}

impl ShellIo {
    /// Driver against the real board paths.
    pub fn new() -> Self {
        Self {
            pwm_root: PathBuf::from("/sys/class/pwm"),
        }
    }

    /// Driver with the PWM class tree relocated, for tests against a
    /// scratch directory.
    pub fn with_pwm_root(root: impl Into<PathBuf>) -> Self {
        Self {
            pwm_root: root.into(),
        }
    }

    fn channel_dir(&self, chip: &str, index: u32) -> PathBuf {
        self.pwm_root.join(chip).join(format!("pwm{index}"))
    }

    async fn write_pwm_attr(&self, chip: &str, index: u32, attr: &str, value: &str) -> Result<()> {
        let path = self.channel_dir(chip, index).join(attr);
        fs::write(&path, format!("{value}\n"))
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl Default for ShellIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoardIo for ShellIo {
    async fn read_register(&self, addr: u32) -> Result<u32> {
        let address = format!("{addr:#010x}");
        let output = Command::new("devmem2")
            .arg(&address)
            .output()
            .await
            .context("failed to start devmem2")?;
        if !output.status.success() {
            bail!("devmem2 read of {address} exited with {}", output.status);
        }
        parse_devmem_value(&String::from_utf8_lossy(&output.stdout))
    }

    async fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        self.run(
            "devmem2",
            &[
                format!("{addr:#010x}"),
                "w".to_string(),
                format!("{value:#x}"),
            ],
        )
        .await
    }

    async fn set_line(&self, chip: &str, line: u32, level: u8) -> Result<()> {
        self.run("gpioset", &[chip.to_string(), format!("{line}={level}")])
            .await
    }

    async fn pwm_export(&self, chip: &str, index: u32) -> Result<()> {
        if fs::try_exists(self.channel_dir(chip, index))
            .await
            .unwrap_or(false)
        {
            return Ok(());
        }
        let export = self.pwm_root.join(chip).join("export");
        fs::write(&export, format!("{index}\n"))
            .await
            .with_context(|| format!("failed to export pwm{index} via {}", export.display()))
    }

    async fn pwm_period(&self, chip: &str, index: u32, ns: u64) -> Result<()> {
        self.write_pwm_attr(chip, index, "period", &ns.to_string())
            .await
    }

    async fn pwm_duty_cycle(&self, chip: &str, index: u32, ns: u64) -> Result<()> {
        self.write_pwm_attr(chip, index, "duty_cycle", &ns.to_string())
            .await
    }

    async fn pwm_enable(&self, chip: &str, index: u32, on: bool) -> Result<()> {
        self.write_pwm_attr(chip, index, "enable", if on { "1" } else { "0" })
            .await
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<()> {
        tracing::debug!(target: "kitctl::shell", program, ?args, "run");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to start {program}"))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} exited with {}: {}", output.status, stderr.trim());
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<()> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        tracing::debug!(target: "kitctl::shell", program, pid = child.id(), "spawned detached");
        // Not awaited; the runtime reaps the child when it exits.
        drop(child);
        Ok(())
    }

    async fn kill_by_name(&self, process: &str) -> Result<()> {
        let status = Command::new("pkill")
            .arg("-x")
            .arg(process)
            .status()
            .await
            .context("failed to start pkill")?;
        // pkill exits 1 when nothing matched, which is success here.
        match status.code() {
            Some(0 | 1) => Ok(()),
            _ => bail!("pkill {process} exited with {status}"),
        }
    }

    async fn path_exists(&self, path: &str) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Extract the value token from `devmem2` output.
///
/// The tool prints its mapping chatter first and ends with a line like
/// `Read at address  0x20002214 (0xb6f8e214): 0xE0`; the value is the sixth
/// whitespace-separated token of that last line.
fn parse_devmem_value(output: &str) -> Result<u32> {
    let line = output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .context("empty devmem2 output")?;
    let token = line
        .split_whitespace()
        .nth(5)
        .with_context(|| format!("unexpected devmem2 output line: '{line}'"))?;
    let digits = token.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).with_context(|| format!("bad devmem2 value token '{token}'"))
}
