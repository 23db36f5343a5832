//! Stepper-motor controller.
//!
//! The motor hangs off three board resources: a chip-select nibble in a
//! memory-mapped system register, an I2C expander carrying the step-divisor
//! and port-direction registers, and a GPIO pair for direction and reset.
//! Stepping itself is clocked by a PWM channel that is switched on for a
//! computed hold and off again.
//!
//! How long the PWM stays up comes from the [`SpeedTable`]: a plain data
//! lookup keyed by (speed, step count) so a board variant with different
//! gearing ships a different table instead of different code.

use std::time::Duration;

use once_cell::sync::Lazy;

use crate::parameter::{ParamSpec, Snapshot};
use crate::sequence::{ActionSequence, Op};

use super::Controller;

// =============================================================================
// Hardware map
// =============================================================================

/// System register holding the motor chip-select nibble.
const CS_REGISTER: u32 = 0x2000_2214;
const CS_MASK: u32 = 0xF0;
const CS_ENABLE: u32 = 0xE0;
const CS_DISABLE: u32 = 0xD0;

const GPIO_CHIP: &str = "gpiochip0";
const DIRECTION_LINE: u32 = 20;
const RESET_LINE: u32 = 21;

const PWM_CHIP: &str = "pwmchip0";
const PWM_INDEX: u32 = 0;
const PWM_PERIOD_NS: u64 = 1_000_000;
const PWM_DUTY_NS: u64 = 500_000;

const I2C_BUS: &str = "0";
const EXPANDER_ADDR: &str = "0x70";
const SPEED_REGISTER: &str = "0x1";
const PORT_DIR_REGISTER: &str = "0x3";
const PORTS_OUTPUT: &str = "0xf9";
const PORTS_INPUT: &str = "0xff";

const DIVISOR_FULL: &str = "0xfd";
const DIVISOR_HALF: &str = "0xfb";
const DIVISOR_QUARTER: &str = "0xff";
const DIVISOR_STANDBY: &str = "0xf9";

const LATCH_ORDER: &[&str] = &[
    "motor.update",
    "motor.start",
    "motor.stop",
    "motor.enable",
    "motor.disable",
    "motor.reset",
];

const REQUIRED_PATHS: &[&str] = &["/dev/gpiochip0", "/dev/i2c-0", "/sys/class/pwm/pwmchip0"];

// =============================================================================
// SpeedTable
// =============================================================================

/// Hold-duration lookup for a stepping run.
///
/// Rows are `(speed, steps, hold)`. A speed with no row at all produces no
/// hold: the motor is put in standby instead of stepped. A known speed with
/// an unknown step count falls back to the table's default hold.
#[derive(Debug, Clone)]
pub struct SpeedTable {
    rows: Vec<(i64, i64, Duration)>,
    default_hold: Duration,
}

impl SpeedTable {
    /// Table from explicit rows and a default hold for unmatched step
    /// counts.
    pub fn new(rows: Vec<(i64, i64, Duration)>, default_hold: Duration) -> Self {
        Self { rows, default_hold }
    }

    /// Hold duration for one stepping run, or `None` when this speed is not
    /// a stepping speed.
    pub fn hold_for(&self, speed: i64, steps: i64) -> Option<Duration> {
        let mut speed_known = false;
        for &(row_speed, row_steps, hold) in &self.rows {
            if row_speed == speed {
                speed_known = true;
                if row_steps == steps {
                    return Some(hold);
                }
            }
        }
        speed_known.then_some(self.default_hold)
    }
}

/// Timing for the shipped board: full rate doubles the step frequency of
/// half rate, which doubles quarter rate.
pub static STANDARD_TABLE: Lazy<SpeedTable> = Lazy::new(|| {
    let ms = Duration::from_millis;
    SpeedTable::new(
        vec![
            (1, 200, ms(50)),
            (1, 400, ms(100)),
            (1, 800, ms(200)),
            (2, 200, ms(100)),
            (2, 400, ms(200)),
            (2, 800, ms(400)),
            (3, 200, ms(200)),
            (3, 400, ms(400)),
            (3, 800, ms(800)),
        ],
        ms(100),
    )
});

// =============================================================================
// MotorController
// =============================================================================

/// Controller for the stepper daemon (`kitctl motor`).
pub struct MotorController {
    table: SpeedTable,
}

impl MotorController {
    /// Controller with the shipped board's timing.
    pub fn new() -> Self {
        Self {
            table: STANDARD_TABLE.clone(),
        }
    }

    /// Controller with replacement timing, for board variants and tests.
    pub fn with_table(table: SpeedTable) -> Self {
        Self { table }
    }

    fn i2c_write(register: &'static str, value: &'static str) -> Op {
        Op::Run {
            program: "i2cset",
            args: vec![
                "-y".to_string(),
                I2C_BUS.to_string(),
                EXPANDER_ADDR.to_string(),
                register.to_string(),
                value.to_string(),
            ],
        }
    }

    fn divisor_for(speed: i64) -> &'static str {
        match speed {
            1 => DIVISOR_FULL,
            2 => DIVISOR_HALF,
            3 => DIVISOR_QUARTER,
            _ => DIVISOR_STANDBY,
        }
    }

    fn cs_enable() -> Op {
        Op::UpdateRegister {
            addr: CS_REGISTER,
            mask: CS_MASK,
            bits: CS_ENABLE,
        }
    }

    fn cs_disable() -> Op {
        Op::UpdateRegister {
            addr: CS_REGISTER,
            mask: CS_MASK,
            bits: CS_DISABLE,
        }
    }

    fn reset_low() -> Op {
        Op::SetLine {
            chip: GPIO_CHIP,
            line: RESET_LINE,
            level: 0,
        }
    }

    /// Reprogram the step divisor and the direction line from the snapshot.
    fn update_sequence(&self, snapshot: &Snapshot) -> ActionSequence {
        let speed = snapshot.int("motor.speed");
        let direction = snapshot.int("motor.direction");
        ActionSequence::new("motor update")
            .step(Self::i2c_write(SPEED_REGISTER, Self::divisor_for(speed)))
            .step(Op::SetLine {
                chip: GPIO_CHIP,
                line: DIRECTION_LINE,
                level: direction as u8,
            })
    }

    /// Energize, clock one stepping run, de-energize.
    ///
    /// A speed without table rows is standby: the divisor is parked and
    /// nothing is clocked, so a corrected or deliberate speed 0 never moves
    /// the motor.
    fn start_sequence(&self, snapshot: &Snapshot) -> ActionSequence {
        let speed = snapshot.int("motor.speed");
        let steps = snapshot.int("motor.steps");
        let Some(hold) = self.table.hold_for(speed, steps) else {
            return ActionSequence::new("motor start (standby)")
                .step(Self::i2c_write(SPEED_REGISTER, DIVISOR_STANDBY));
        };
        ActionSequence::new("motor start")
            .step(Op::PwmExport {
                chip: PWM_CHIP,
                index: PWM_INDEX,
            })
            .step(Self::reset_low())
            .step(Self::i2c_write(PORT_DIR_REGISTER, PORTS_OUTPUT))
            .step(Self::cs_enable())
            .step(Op::PwmPeriod {
                chip: PWM_CHIP,
                index: PWM_INDEX,
                ns: PWM_PERIOD_NS,
            })
            .step(Op::PwmDutyCycle {
                chip: PWM_CHIP,
                index: PWM_INDEX,
                ns: PWM_DUTY_NS,
            })
            .step(Op::PwmEnable {
                chip: PWM_CHIP,
                index: PWM_INDEX,
                on: true,
            })
            .step(Op::Hold { duration: hold })
            .step(Op::PwmEnable {
                chip: PWM_CHIP,
                index: PWM_INDEX,
                on: false,
            })
            .step(Self::cs_disable())
            .step(Self::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT))
            .finally(Op::PwmEnable {
                chip: PWM_CHIP,
                index: PWM_INDEX,
                on: false,
            })
            .finally(Self::cs_disable())
            .finally(Self::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT))
    }

    fn stop_sequence() -> ActionSequence {
        ActionSequence::new("motor stop")
            .step(Self::reset_low())
            .step(Self::cs_disable())
    }

    fn enable_sequence() -> ActionSequence {
        // A half-applied enable must not leave the chip select ambiguous.
        ActionSequence::new("motor enable")
            .step(Self::cs_enable())
            .finally(Self::cs_disable())
    }

    fn disable_sequence() -> ActionSequence {
        ActionSequence::new("motor disable").step(Self::cs_disable())
    }

    fn reset_sequence() -> ActionSequence {
        ActionSequence::new("motor reset")
            .step(Self::reset_low())
            .step(Self::cs_disable())
    }
}

impl Default for MotorController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for MotorController {
    fn name(&self) -> &'static str {
        "motor"
    }

    fn specs(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::latch("motor.update"),
            ParamSpec::latch("motor.start"),
            ParamSpec::latch("motor.stop"),
            ParamSpec::latch("motor.enable"),
            ParamSpec::latch("motor.disable"),
            ParamSpec::latch("motor.reset"),
            ParamSpec::int("motor.direction", 0).with_range(0, 1),
            ParamSpec::int("motor.steps", 200).with_choices(&[200, 400, 800]),
            ParamSpec::int("motor.speed", 3).with_range(0, 3).with_fallback(0),
        ]
    }

    fn latch_order(&self) -> &'static [&'static str] {
        LATCH_ORDER
    }

    fn required_paths(&self) -> &'static [&'static str] {
        REQUIRED_PATHS
    }

    fn sequence_for(&self, latch: &str, snapshot: &Snapshot) -> Option<ActionSequence> {
        match latch {
            "motor.update" => Some(self.update_sequence(snapshot)),
            "motor.start" => Some(self.start_sequence(snapshot)),
            "motor.stop" => Some(Self::stop_sequence()),
            "motor.enable" => Some(Self::enable_sequence()),
            "motor.disable" => Some(Self::disable_sequence()),
            "motor.reset" => Some(Self::reset_sequence()),
            _ => None,
        }
    }

    /// Ports back to inputs, divisor parked at the power-on default,
    /// chip select off.
    fn shutdown_sequence(&self) -> ActionSequence {
        ActionSequence::new("motor shutdown")
            .step(Self::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT))
            .step(Self::i2c_write(SPEED_REGISTER, DIVISOR_QUARTER))
            .step(Self::cs_disable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{ParamStore, Value};

    fn snapshot_with(pairs: &[(&str, i64)]) -> Snapshot {
        let store = ParamStore::new(MotorController::new().specs()).unwrap();
        for (name, value) in pairs {
            store.set(name, Value::Int(*value)).unwrap();
        }
        store.snapshot()
    }

    #[test]
    fn standard_table_matches_the_board_timing() {
        let ms = Duration::from_millis;
        assert_eq!(STANDARD_TABLE.hold_for(1, 200), Some(ms(50)));
        assert_eq!(STANDARD_TABLE.hold_for(2, 400), Some(ms(200)));
        assert_eq!(STANDARD_TABLE.hold_for(3, 800), Some(ms(800)));
    }

    #[test]
    fn standby_speeds_have_no_hold() {
        assert_eq!(STANDARD_TABLE.hold_for(0, 200), None);
        assert_eq!(STANDARD_TABLE.hold_for(4, 200), None);
        assert_eq!(STANDARD_TABLE.hold_for(-1, 800), None);
    }

    #[test]
    fn unknown_step_count_falls_back_to_the_default_hold() {
        assert_eq!(
            STANDARD_TABLE.hold_for(1, 999),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn replacement_table_changes_the_timing() {
        let table = SpeedTable::new(
            vec![(1, 200, Duration::from_millis(5))],
            Duration::from_millis(1),
        );
        let motor = MotorController::with_table(table);
        let snapshot = snapshot_with(&[("motor.speed", 1), ("motor.steps", 200)]);

        let sequence = motor.start_sequence(&snapshot);
        assert!(sequence.steps().contains(&Op::Hold {
            duration: Duration::from_millis(5)
        }));
    }

    #[test]
    fn update_programs_divisor_and_direction() {
        let motor = MotorController::new();
        let snapshot = snapshot_with(&[("motor.speed", 2), ("motor.direction", 1)]);

        let sequence = motor.update_sequence(&snapshot);
        assert_eq!(
            sequence.steps(),
            &[
                MotorController::i2c_write(SPEED_REGISTER, DIVISOR_HALF),
                Op::SetLine {
                    chip: GPIO_CHIP,
                    line: DIRECTION_LINE,
                    level: 1
                },
            ]
        );
        assert!(sequence.cleanup().is_empty());
    }

    #[test]
    fn each_speed_selects_its_divisor() {
        assert_eq!(MotorController::divisor_for(1), DIVISOR_FULL);
        assert_eq!(MotorController::divisor_for(2), DIVISOR_HALF);
        assert_eq!(MotorController::divisor_for(3), DIVISOR_QUARTER);
        assert_eq!(MotorController::divisor_for(0), DIVISOR_STANDBY);
        assert_eq!(MotorController::divisor_for(9), DIVISOR_STANDBY);
    }

    #[test]
    fn start_clocks_the_pwm_around_the_hold() {
        let motor = MotorController::new();
        let snapshot = snapshot_with(&[("motor.speed", 1), ("motor.steps", 200)]);

        let sequence = motor.start_sequence(&snapshot);
        let steps = sequence.steps();
        assert_eq!(steps.len(), 11);
        assert_eq!(
            steps[0],
            Op::PwmExport {
                chip: PWM_CHIP,
                index: PWM_INDEX
            }
        );
        assert_eq!(steps[3], MotorController::cs_enable());
        assert_eq!(
            steps[7],
            Op::Hold {
                duration: Duration::from_millis(50)
            }
        );
        assert_eq!(steps[10], MotorController::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT));

        // De-energizing tail for aborted runs.
        assert_eq!(
            sequence.cleanup(),
            &[
                Op::PwmEnable {
                    chip: PWM_CHIP,
                    index: PWM_INDEX,
                    on: false
                },
                MotorController::cs_disable(),
                MotorController::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT),
            ]
        );
    }

    #[test]
    fn start_at_speed_zero_only_parks_the_divisor() {
        let motor = MotorController::new();
        let snapshot = snapshot_with(&[("motor.speed", 0), ("motor.steps", 800)]);

        let sequence = motor.start_sequence(&snapshot);
        assert_eq!(
            sequence.steps(),
            &[MotorController::i2c_write(SPEED_REGISTER, DIVISOR_STANDBY)]
        );
        assert!(sequence.cleanup().is_empty());
    }

    #[test]
    fn stop_and_reset_pull_the_reset_line_and_disable() {
        for sequence in [
            MotorController::stop_sequence(),
            MotorController::reset_sequence(),
        ] {
            assert_eq!(
                sequence.steps(),
                &[MotorController::reset_low(), MotorController::cs_disable()]
            );
        }
    }

    #[test]
    fn enable_cleans_up_to_disabled() {
        let sequence = MotorController::enable_sequence();
        assert_eq!(sequence.steps(), &[MotorController::cs_enable()]);
        assert_eq!(sequence.cleanup(), &[MotorController::cs_disable()]);
    }

    #[test]
    fn shutdown_returns_the_expander_to_power_on_defaults() {
        let motor = MotorController::new();
        let sequence = motor.shutdown_sequence();
        assert_eq!(
            sequence.steps(),
            &[
                MotorController::i2c_write(PORT_DIR_REGISTER, PORTS_INPUT),
                MotorController::i2c_write(SPEED_REGISTER, DIVISOR_QUARTER),
                MotorController::cs_disable(),
            ]
        );
    }

    #[test]
    fn unknown_latch_has_no_sequence() {
        let motor = MotorController::new();
        let snapshot = snapshot_with(&[]);
        assert!(motor.sequence_for("motor.explode", &snapshot).is_none());
    }
}
