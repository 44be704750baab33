// Loop rate, topics, control tolerances
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Zenoh topics
pub const TOPIC_ACTUATION: &str = "auton/cmd/actuation"; // actuation out
pub const TOPIC_FEEDBACK: &str = "auton/rt/drive"; // drive feedback in
pub const TOPIC_ARM_STATUS: &str = "auton/rt/arm"; // arm feedback in
pub const TOPIC_STATUS: &str = "auton/state/action"; // current-action status out

// Default tunables file (overridable on the command line)
pub const TUNABLES_PATH: &str = "tunables.json";

// Timed actions are considered over once less than this much of their
// window remains. Empirically tuned; no derivation on record.
pub const END_TOLERANCE_MS: u64 = 10;

// Open-loop segments are dropped this close to their end time, so a
// segment ending "now" never gets replayed.
pub const SEGMENT_DROP_TOLERANCE_MS: i64 = 10;

// Closed-loop dead zones: inside these the target counts as reached
pub const DISTANCE_DEADBAND_IN: f64 = 2.0;
pub const ANGLE_DEADBAND_DEG: f64 = 2.0;

// Braking profile shape
pub const SPEED_FLOOR: f64 = 0.25;
pub const ANGLE_BRAKE_WINDOW_DEG: f64 = 5.0;

// Each calibration cycle drives at a fixed speed for this long
pub const CALIBRATION_WINDOW: Duration = Duration::from_millis(5000);
