//! Relay controller mirroring the camera surface to an upstream sink.
//!
//! The proxy daemon exposes the exact camera catalog but owns no hardware.
//! A fired latch batches the relevant local values to the upstream
//! [`ParamSink`](crate::parameter::ParamSink) and then arms the matching
//! upstream latch, always values first: by the time the remote camera
//! daemon's own poll tick sees the fire, the parameters it will dispatch
//! from are already in place.

use crate::command;
use crate::parameter::{ParamSpec, Snapshot, Value};
use crate::sequence::{ActionSequence, Op};

use super::camera;
use super::Controller;

const LATCH_ORDER: &[&str] = &["stream.start", "stream.stop", "camera.update"];

/// Values relayed ahead of an upstream `camera.update` fire.
const UPDATE_BATCH: &[&str] = &[
    "camera.quality",
    "camera.brightness",
    "camera.contrast",
    "camera.red_gain",
    "camera.green_gain",
    "camera.blue_gain",
    "camera.h_res",
    "camera.v_res",
];

/// Controller for the relay daemon (`kitctl proxy`).
pub struct ProxyController;

impl ProxyController {
    /// Controller relaying the camera surface.
    pub fn new() -> Self {
        Self
    }

    fn push_int(snapshot: &Snapshot, name: &'static str) -> Op {
        Op::Push {
            name,
            value: Value::Int(snapshot.int(name)),
        }
    }

    fn push_fire(latch: &'static str) -> Op {
        Op::Push {
            name: latch,
            value: Value::Int(command::FIRE),
        }
    }

    fn start_sequence(snapshot: &Snapshot) -> ActionSequence {
        ActionSequence::new("relay stream start")
            .step(Op::Push {
                name: "stream.ip",
                value: Value::Text(snapshot.text("stream.ip")),
            })
            .step(Self::push_fire("stream.start"))
    }

    fn stop_sequence() -> ActionSequence {
        ActionSequence::new("relay stream stop").step(Self::push_fire("stream.stop"))
    }

    fn update_sequence(snapshot: &Snapshot) -> ActionSequence {
        ActionSequence::new("relay camera update")
            .with_steps(
                UPDATE_BATCH
                    .iter()
                    .map(|name| Self::push_int(snapshot, name)),
            )
            .step(Self::push_fire("camera.update"))
    }
}

impl Default for ProxyController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for ProxyController {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn specs(&self) -> Vec<ParamSpec> {
        camera::catalog()
    }

    fn latch_order(&self) -> &'static [&'static str] {
        LATCH_ORDER
    }

    fn sequence_for(&self, latch: &str, snapshot: &Snapshot) -> Option<ActionSequence> {
        match latch {
            "stream.start" => Some(Self::start_sequence(snapshot)),
            "stream.stop" => Some(Self::stop_sequence()),
            "camera.update" => Some(Self::update_sequence(snapshot)),
            _ => None,
        }
    }

    /// Nothing to de-energize; the remote daemon owns the hardware.
    fn shutdown_sequence(&self) -> ActionSequence {
        ActionSequence::new("relay shutdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParamStore;

    #[test]
    fn start_relays_the_address_before_the_fire() {
        let store = ParamStore::new(camera::catalog()).unwrap();
        store
            .set("stream.ip", Value::Text("172.16.0.9".into()))
            .unwrap();

        let sequence = ProxyController::start_sequence(&store.snapshot());
        assert_eq!(
            sequence.steps(),
            &[
                Op::Push {
                    name: "stream.ip",
                    value: Value::Text("172.16.0.9".into())
                },
                Op::Push {
                    name: "stream.start",
                    value: Value::Int(command::FIRE)
                },
            ]
        );
    }

    #[test]
    fn stop_relays_only_the_fire() {
        let sequence = ProxyController::stop_sequence();
        assert_eq!(
            sequence.steps(),
            &[Op::Push {
                name: "stream.stop",
                value: Value::Int(command::FIRE)
            }]
        );
    }

    #[test]
    fn update_relays_the_whole_batch_then_fires() {
        let store = ParamStore::new(camera::catalog()).unwrap();
        store.set("camera.contrast", Value::Int(200)).unwrap();

        let sequence = ProxyController::update_sequence(&store.snapshot());
        let steps = sequence.steps();
        assert_eq!(steps.len(), UPDATE_BATCH.len() + 1);

        for (step, name) in steps.iter().zip(UPDATE_BATCH) {
            assert!(
                matches!(step, Op::Push { name: pushed, .. } if pushed == name),
                "unexpected step {step:?}"
            );
        }
        assert_eq!(
            steps[2],
            Op::Push {
                name: "camera.contrast",
                value: Value::Int(200)
            }
        );
        assert_eq!(steps.last().unwrap(), &ProxyController::push_fire("camera.update"));
    }

    #[test]
    fn the_proxy_surface_mirrors_the_camera_catalog() {
        let proxy = ProxyController::new();
        let camera = super::super::CameraController::new();
        let proxy_names: Vec<_> = proxy.specs().iter().map(|s| s.name()).collect();
        let camera_names: Vec<_> = camera.specs().iter().map(|s| s.name()).collect();
        assert_eq!(proxy_names, camera_names);
    }

    #[test]
    fn shutdown_is_empty() {
        let proxy = ProxyController::new();
        assert!(proxy.shutdown_sequence().steps().is_empty());
        assert!(proxy.shutdown_sequence().cleanup().is_empty());
    }
}
