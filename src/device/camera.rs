//! Camera and RTP-streaming controller.
//!
//! The sensor is a V4L2 device; image controls go through `v4l2-ctl`, the
//! stream is an `ffmpeg` RTP push started detached, and the two resolution
//! registers live in the FPGA fabric. Stopping is idempotent by
//! construction: the stop steps disable auto gain and kill the streamer by
//! name, and both succeed when there is nothing to stop. `stream.start`
//! runs those same stop steps first, so firing start twice restarts the
//! stream instead of stacking a second `ffmpeg`.

use crate::parameter::{ParamSpec, Snapshot};
use crate::sequence::{ActionSequence, Op};

use super::Controller;

const VIDEO_DEVICE: &str = "/dev/video0";
const SENSOR_SUBDEV: &str = "/dev/v4l-subdev0";
const H_RES_REGISTER: u32 = 0x4000_1078;
const V_RES_REGISTER: u32 = 0x4000_107C;
const RTP_PORT: u16 = 10_000;
const SDP_FILE: &str = "video.sdp";
const STREAMER: &str = "ffmpeg";

/// Sensor blanking programmed after the streamer is up.
const VERTICAL_BLANKING: i64 = 1170;

const LATCH_ORDER: &[&str] = &["stream.start", "stream.stop", "camera.update"];

const REQUIRED_PATHS: &[&str] = &[VIDEO_DEVICE, SENSOR_SUBDEV];

/// Controller for the camera daemon (`kitctl camera`).
pub struct CameraController;

/// The camera parameter catalog.
///
/// Shared with the proxy, which mirrors this surface name for name.
pub(super) fn catalog() -> Vec<ParamSpec> {
    vec![
        ParamSpec::latch("stream.start"),
        ParamSpec::latch("stream.stop"),
        ParamSpec::latch("camera.update"),
        ParamSpec::text("stream.ip", "192.168.1.1"),
        ParamSpec::int("camera.quality", 30).with_range(25, 50),
        ParamSpec::int("camera.brightness", 137).with_range(0, 255),
        ParamSpec::int("camera.contrast", 154).with_range(0, 255),
        ParamSpec::int("camera.red_gain", 122).with_range(0, 255),
        ParamSpec::int("camera.green_gain", 102).with_range(0, 255),
        ParamSpec::int("camera.blue_gain", 138).with_range(0, 255),
        ParamSpec::int("camera.h_res", 1280).with_choices(&[432, 640, 960, 1280, 1920]),
        ParamSpec::int("camera.v_res", 720).with_choices(&[240, 480, 544, 720, 1072]),
    ]
}

impl CameraController {
    /// Controller for the board's V4L2 camera.
    pub fn new() -> Self {
        Self
    }

    fn v4l2_set(device: &str, controls: &[(&str, i64)]) -> Op {
        let mut args = vec!["-d".to_string(), device.to_string()];
        args.extend(
            controls
                .iter()
                .map(|(name, value)| format!("--set-ctrl={name}={value}")),
        );
        Op::Run {
            program: "v4l2-ctl",
            args,
        }
    }

    /// Disable auto gain and kill the streamer. Safe to run at any time.
    fn stop_steps() -> Vec<Op> {
        vec![
            Self::v4l2_set(VIDEO_DEVICE, &[("gain_automatic", 0)]),
            Op::KillByName { process: STREAMER },
        ]
    }

    /// Restart the RTP stream towards the snapshot's destination address.
    fn start_sequence(&self, snapshot: &Snapshot) -> ActionSequence {
        let ip = snapshot.text("stream.ip");
        ActionSequence::new("stream start")
            .with_steps(Self::stop_steps())
            .step(Op::Spawn {
                program: STREAMER,
                args: vec![
                    "-i".to_string(),
                    VIDEO_DEVICE.to_string(),
                    "-c:v".to_string(),
                    "copy".to_string(),
                    "-f".to_string(),
                    "rtp".to_string(),
                    "-sdp_file".to_string(),
                    SDP_FILE.to_string(),
                    format!("rtp://{ip}:{RTP_PORT}"),
                ],
            })
            .step(Self::v4l2_set(VIDEO_DEVICE, &[("gain_automatic", 1)]))
            .step(Self::v4l2_set(
                SENSOR_SUBDEV,
                &[("vertical_blanking", VERTICAL_BLANKING)],
            ))
            .with_cleanup(Self::stop_steps())
    }

    fn stop_sequence() -> ActionSequence {
        ActionSequence::new("stream stop").with_steps(Self::stop_steps())
    }

    /// Apply every image control in one `v4l2-ctl` call, then program the
    /// two resolution registers.
    fn update_sequence(&self, snapshot: &Snapshot) -> ActionSequence {
        ActionSequence::new("camera update")
            .step(Self::v4l2_set(
                VIDEO_DEVICE,
                &[
                    ("quality_factor", snapshot.int("camera.quality")),
                    ("brightness", snapshot.int("camera.brightness")),
                    ("contrast", snapshot.int("camera.contrast")),
                    ("gain_red", snapshot.int("camera.red_gain")),
                    ("gain_green", snapshot.int("camera.green_gain")),
                    ("gain_blue", snapshot.int("camera.blue_gain")),
                ],
            ))
            .step(Op::WriteRegister {
                addr: H_RES_REGISTER,
                value: snapshot.int("camera.h_res") as u32,
            })
            .step(Op::WriteRegister {
                addr: V_RES_REGISTER,
                value: snapshot.int("camera.v_res") as u32,
            })
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for CameraController {
    fn name(&self) -> &'static str {
        "camera"
    }

    fn specs(&self) -> Vec<ParamSpec> {
        catalog()
    }

    fn latch_order(&self) -> &'static [&'static str] {
        LATCH_ORDER
    }

    fn required_paths(&self) -> &'static [&'static str] {
        REQUIRED_PATHS
    }

    fn sequence_for(&self, latch: &str, snapshot: &Snapshot) -> Option<ActionSequence> {
        match latch {
            "stream.start" => Some(self.start_sequence(snapshot)),
            "stream.stop" => Some(Self::stop_sequence()),
            "camera.update" => Some(self.update_sequence(snapshot)),
            _ => None,
        }
    }

    /// A daemon exit must not leave an orphaned streamer pushing packets.
    fn shutdown_sequence(&self) -> ActionSequence {
        ActionSequence::new("camera shutdown").with_steps(Self::stop_steps())
    }
}
