//! Device controllers: parameter catalogs and hardware semantics.
//!
//! A controller owns everything device-specific: which parameters exist,
//! which of them are command latches and in what order they dispatch, which
//! device paths must be present at startup, and how a fired latch maps to an
//! [`ActionSequence`]. The poll loop and sequencer stay generic; adding a
//! device means implementing [`Controller`] and nothing else.

use async_trait::async_trait;

use crate::error::{AppResult, KitError};
use crate::hardware::BoardIo;
use crate::parameter::{ParamSpec, Snapshot};
use crate::sequence::ActionSequence;

pub mod camera;
pub mod motor;
pub mod proxy;

pub use camera::CameraController;
pub use motor::MotorController;
pub use proxy::ProxyController;

/// One controlled device behind a daemon.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Short device name used in logs and the startup banner.
    fn name(&self) -> &'static str;

    /// The full parameter catalog, in declaration order.
    fn specs(&self) -> Vec<ParamSpec>;

    /// Latch names in dispatch order.
    ///
    /// When several latches are armed in the same snapshot they run in this
    /// order, so state-changing commands can be declared ahead of the ones
    /// that depend on them.
    fn latch_order(&self) -> &'static [&'static str];

    /// Device and sysfs paths that must exist before the loop starts.
    fn required_paths(&self) -> &'static [&'static str] {
        &[]
    }

    /// Startup probe. The default checks [`required_paths`] and fails with
    /// [`KitError::HardwareUnavailable`] naming the first missing one.
    ///
    /// [`required_paths`]: Controller::required_paths
    async fn probe(&self, io: &dyn BoardIo) -> AppResult<()> {
        for path in self.required_paths() {
            if !io.path_exists(path).await {
                return Err(KitError::HardwareUnavailable((*path).to_string()));
            }
        }
        Ok(())
    }

    /// The action sequence for a fired latch, built from the validated
    /// snapshot. `None` for a name outside [`latch_order`].
    ///
    /// [`latch_order`]: Controller::latch_order
    fn sequence_for(&self, latch: &str, snapshot: &Snapshot) -> Option<ActionSequence>;

    /// The fixed safe-state sequence the loop runs exactly once on exit.
    fn shutdown_sequence(&self) -> ActionSequence;
}
