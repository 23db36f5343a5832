//! Integration tests for graceful shutdown behavior.
//!
//! Every test spawns a real loop task, flips the cancellation channel and
//! joins the task, then inspects the recorded operations for the
//! controller's safe-state sequence.

use kitctl::command;
use kitctl::device::{CameraController, Controller, MotorController, ProxyController};
use kitctl::hardware::{BoardIo, MockIo};
use kitctl::parameter::{NullSink, ParamSink, ParamStore, Value};
use kitctl::poll::PollLoop;
use kitctl::sequence::Sequencer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Helper harness: one daemon loop running against the recording mock.
struct Rig {
    store: Arc<ParamStore>,
    io: Arc<MockIo>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Helper to spawn a poll loop with a short test interval.
fn spawn_rig(controller: Arc<dyn Controller>, upstream: Option<Arc<dyn ParamSink>>) -> Rig {
    let store = Arc::new(ParamStore::new(controller.specs()).expect("catalog is well formed"));
    let io = Arc::new(MockIo::new());
    let (cancel, cancel_rx) = watch::channel(false);
    let mut sequencer = Sequencer::new(Arc::clone(&io) as Arc<dyn BoardIo>, cancel_rx.clone());
    if let Some(sink) = upstream {
        sequencer = sequencer.with_upstream(sink);
    }
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
        cancel,
        task,
    }
}

/// Helper: cancel the loop and join it within a bounded time.
async fn cancel_and_join(cancel: &watch::Sender<bool>, task: JoinHandle<()>) {
    cancel.send(true).expect("loop is listening");
    timeout(Duration::from_secs(2), task)
        .await
        .expect("shutdown finished in time")
        .expect("loop task did not panic");
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

/// Helper: wait until the mock has recorded an operation containing `needle`.
async fn wait_for_op(io: &MockIo, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if !io.operations_matching(needle).is_empty() {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for an operation matching '{needle}'"
        );
        sleep(Duration::from_millis(2)).await;
    }
}

/// Test that cancellation runs the motor safe-state sequence, in order,
/// exactly once.
#[tokio::test]
async fn test_shutdown_runs_the_safe_state_sequence_once() {
    let rig = spawn_rig(Arc::new(MotorController::new()), None);

    cancel_and_join(&rig.cancel, rig.task).await;

    assert_eq!(
        rig.io.operations(),
        vec![
            "run i2cset -y 0 0x70 0x3 0xff",
            "run i2cset -y 0 0x70 0x1 0xff",
            "read register 0x20002214",
            "write register 0x20002214 = 0xd0",
        ]
    );
}

/// Test that flipping the cancellation channel repeatedly still runs the
/// safe-state sequence only once.
#[tokio::test]
async fn test_repeated_cancel_signals_are_safe() {
    let rig = spawn_rig(Arc::new(MotorController::new()), None);

    rig.cancel.send(true).expect("loop is listening");
    rig.cancel.send(true).expect("loop is listening");
    cancel_and_join(&rig.cancel, rig.task).await;

    assert_eq!(rig.io.operations_matching("0x1 0xff").len(), 1);
    assert_eq!(rig.io.operations_matching("= 0xd0").len(), 1);
}

/// Test that a failing safe-state step does not stop the later steps.
#[tokio::test]
async fn test_shutdown_continues_past_failing_steps() {
    let rig = spawn_rig(Arc::new(MotorController::new()), None);
    rig.io.fail_on("i2cset");

    cancel_and_join(&rig.cancel, rig.task).await;

    // Both expander writes were attempted and the chip select still dropped.
    assert_eq!(rig.io.operations_matching("i2cset").len(), 2);
    assert_eq!(rig.io.operations_matching("= 0xd0").len(), 1);
}

/// Test that cancelling mid-hold aborts the run, executes its cleanup
/// tail, resets the latch and then reaches the safe state.
#[tokio::test]
async fn test_mid_hold_cancellation_cleans_up_then_reaches_safe_state() {
    let rig = spawn_rig(Arc::new(MotorController::new()), None);

    // Speed 3 at 800 steps holds the clock for 800 ms.
    rig.store
        .set("motor.steps", Value::Int(800))
        .expect("write accepted");
    rig.store
        .set("motor.start", Value::Int(command::FIRE))
        .expect("write accepted");
    wait_for_op(&rig.io, "enable 1").await;

    cancel_and_join(&rig.cancel, rig.task).await;

    assert_eq!(
        rig.store.get("motor.start").expect("declared"),
        Value::Int(command::IDLE)
    );

    let ops = rig.io.operations();
    let cleanup_pos = ops
        .iter()
        .position(|op| op.contains("enable 0"))
        .expect("cleanup ran");
    let safe_state_pos = ops
        .iter()
        .position(|op| op.contains("0x1 0xff"))
        .expect("safe state ran");
    assert!(
        cleanup_pos < safe_state_pos,
        "safe state before cleanup: {ops:?}"
    );

    // Ports went back to inputs twice: cleanup tail, then safe state.
    assert_eq!(rig.io.operations_matching("enable 0").len(), 1);
    assert_eq!(rig.io.operations_matching("0x3 0xff").len(), 2);
}

/// Test that shutdown after ordinary successful dispatches still runs.
#[tokio::test]
async fn test_shutdown_after_successful_dispatches() {
    let rig = spawn_rig(Arc::new(CameraController::new()), None);

    rig.store
        .set("stream.stop", Value::Int(command::FIRE))
        .expect("write accepted");
    wait_for_int(&rig.store, "stream.stop", command::IDLE).await;

    cancel_and_join(&rig.cancel, rig.task).await;

    // Once for the command, once for the safe state.
    assert_eq!(rig.io.operations_matching("kill ffmpeg").len(), 2);
}

/// Test that the camera safe state stops the stream even when nothing was
/// ever dispatched.
#[tokio::test]
async fn test_camera_shutdown_stops_the_stream() {
    let rig = spawn_rig(Arc::new(CameraController::new()), None);

    cancel_and_join(&rig.cancel, rig.task).await;

    assert_eq!(
        rig.io.operations(),
        vec![
            "run v4l2-ctl -d /dev/video0 --set-ctrl=gain_automatic=0",
            "kill ffmpeg",
        ]
    );
}

/// Test that the relay daemon declares no safe-state hardware steps.
#[tokio::test]
async fn test_proxy_shutdown_has_no_hardware_steps() {
    let rig = spawn_rig(Arc::new(ProxyController::new()), Some(Arc::new(NullSink)));

    cancel_and_join(&rig.cancel, rig.task).await;

    assert!(rig.io.operations().is_empty());
}
