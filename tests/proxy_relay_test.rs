//! Integration tests for the relay daemon's upstream pushes.
//!
//! The proxy controller owns no hardware; everything it does is visible as
//! an ordered series of pushes into its upstream sink. These tests run a
//! real loop task over a recording sink and assert on that series.

use async_trait::async_trait;
use kitctl::command;
use kitctl::device::{Controller, ProxyController};
use kitctl::hardware::{BoardIo, MockIo};
use kitctl::parameter::{ParamSink, ParamStore, Value};
use kitctl::poll::PollLoop;
use kitctl::sequence::Sequencer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Upstream sink that records pushes in order and can inject failures.
#[derive(Default)]
struct RecordingSink {
    pushes: Mutex<Vec<(String, Value)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn pushes(&self) -> Vec<(String, Value)> {
        self.pushes.lock().expect("sink lock").clone()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ParamSink for RecordingSink {
    async fn push(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.pushes
            .lock()
            .expect("sink lock")
            .push((name.to_string(), value));
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("injected upstream failure for '{name}'");
        }
        Ok(())
    }
}

/// Helper harness: one relay loop pushing into the given sink.
struct Rig {
    store: Arc<ParamStore>,
    io: Arc<MockIo>,
    _cancel: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

/// Helper to spawn a relay poll loop with a short test interval.
fn spawn_rig(upstream: Arc<dyn ParamSink>) -> Rig {
    let controller: Arc<dyn Controller> = Arc::new(ProxyController::new());
    let store = Arc::new(ParamStore::new(controller.specs()).expect("catalog is well formed"));
    let io = Arc::new(MockIo::new());
    let (cancel, cancel_rx) = watch::channel(false);
    let sequencer =
        Sequencer::new(Arc::clone(&io) as Arc<dyn BoardIo>, cancel_rx.clone()).with_upstream(upstream);
    let poll = PollLoop::new(
        Arc::clone(&store),
        controller,
        sequencer,
        Duration::from_millis(10),
        cancel_rx,
    );
    let task = tokio::spawn(poll.run());
    Rig {
        store,
        io,
        _cancel: cancel,
        _task: task,
    }
}

fn fire(store: &ParamStore, latch: &str) {
    store
        .set(latch, Value::Int(command::FIRE))
        .expect("latch is declared");
}

/// Helper: wait until the named parameter reads the expected integer.
async fn wait_for_int(store: &ParamStore, name: &str, expected: i64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if store.get(name).expect("parameter is declared") == Value::Int(expected) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {name} = {expected}"
        );
        sleep(Duration::from_millis(2)).await;
    }
}

fn entry(name: &str, value: i64) -> (String, Value) {
    (name.to_string(), Value::Int(value))
}

/// Test that a stream start pushes the destination address before the
/// upstream latch is armed.
#[tokio::test]
async fn test_stream_start_pushes_the_address_before_the_fire() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());

    rig.store
        .set("stream.ip", Value::Text("10.0.0.9".to_string()))
        .expect("write accepted");
    fire(&rig.store, "stream.start");
    wait_for_int(&rig.store, "stream.start", command::IDLE).await;

    assert_eq!(
        sink.pushes(),
        vec![
            ("stream.ip".to_string(), Value::Text("10.0.0.9".to_string())),
            entry("stream.start", command::FIRE),
        ]
    );
}

/// Test that a camera update relays the full batch, in catalog order,
/// before the upstream latch fires.
#[tokio::test]
async fn test_camera_update_batches_every_value_then_fires() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());

    rig.store
        .set("camera.quality", Value::Int(42))
        .expect("write accepted");
    fire(&rig.store, "camera.update");
    wait_for_int(&rig.store, "camera.update", command::IDLE).await;

    assert_eq!(
        sink.pushes(),
        vec![
            entry("camera.quality", 42),
            entry("camera.brightness", 137),
            entry("camera.contrast", 154),
            entry("camera.red_gain", 122),
            entry("camera.green_gain", 102),
            entry("camera.blue_gain", 138),
            entry("camera.h_res", 1280),
            entry("camera.v_res", 720),
            entry("camera.update", command::FIRE),
        ]
    );
}

/// Test that a stream stop relays nothing but the fire itself.
#[tokio::test]
async fn test_stream_stop_fires_the_remote_latch_only() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());

    fire(&rig.store, "stream.stop");
    wait_for_int(&rig.store, "stream.stop", command::IDLE).await;

    assert_eq!(sink.pushes(), vec![entry("stream.stop", command::FIRE)]);
}

/// Test that the relay validates locally: a rejected write is corrected
/// before it is pushed upstream.
#[tokio::test]
async fn test_corrected_values_are_relayed_not_raw() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());

    rig.store
        .set("camera.quality", Value::Int(999))
        .expect("write accepted");
    fire(&rig.store, "camera.update");
    wait_for_int(&rig.store, "camera.update", command::IDLE).await;

    assert_eq!(
        rig.store.get("camera.quality").expect("declared"),
        Value::Int(30)
    );
    assert_eq!(sink.pushes()[0], entry("camera.quality", 30));
}

/// Test that a failing upstream still resets the local latch and leaves
/// the loop serving later commands.
#[tokio::test]
async fn test_failed_push_still_resets_the_latch() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());
    sink.set_failing(true);

    fire(&rig.store, "camera.update");
    wait_for_int(&rig.store, "camera.update", command::IDLE).await;

    // The batch aborted on its first push.
    assert_eq!(sink.pushes().len(), 1);

    sink.set_failing(false);
    fire(&rig.store, "stream.stop");
    wait_for_int(&rig.store, "stream.stop", command::IDLE).await;

    assert_eq!(
        sink.pushes().last().expect("push recorded"),
        &entry("stream.stop", command::FIRE)
    );
}

/// Test that the relay never touches board hardware.
#[tokio::test]
async fn test_relay_touches_no_hardware() {
    let sink = Arc::new(RecordingSink::default());
    let rig = spawn_rig(sink.clone());

    fire(&rig.store, "stream.start");
    fire(&rig.store, "camera.update");
    wait_for_int(&rig.store, "camera.update", command::IDLE).await;

    assert!(rig.io.operations().is_empty());
}

/// Test the relay end-to-end into a live parameter store standing in for
/// the remote daemon.
#[tokio::test]
async fn test_relay_lands_in_a_live_parameter_store() {
    let upstream = Arc::new(
        ParamStore::new(ProxyController::new().specs()).expect("catalog is well formed"),
    );
    let rig = spawn_rig(upstream.clone() as Arc<dyn ParamSink>);

    rig.store
        .set("stream.ip", Value::Text("10.1.2.3".to_string()))
        .expect("write accepted");
    rig.store
        .set("camera.quality", Value::Int(42))
        .expect("write accepted");
    fire(&rig.store, "stream.start");
    fire(&rig.store, "camera.update");
    wait_for_int(&rig.store, "camera.update", command::IDLE).await;

    // Values landed and the remote latches are armed for the remote tick.
    assert_eq!(
        upstream.get("stream.ip").expect("declared"),
        Value::Text("10.1.2.3".to_string())
    );
    assert_eq!(
        upstream.get("stream.start").expect("declared"),
        Value::Int(command::FIRE)
    );
    assert_eq!(
        upstream.get("camera.quality").expect("declared"),
        Value::Int(42)
    );
    assert_eq!(
        upstream.get("camera.update").expect("declared"),
        Value::Int(command::FIRE)
    );
}
