// Closed-loop regulator
//
// Walks the action list with a cursor, recomputing every tick from live
// encoder/gyro feedback. Each action gets a baseline snapshot on first
// visit; a braking profile ramps the speed down as the target approaches.

use tracing::{debug, info, warn};

use super::action::{split_script, Action, ActionKind};
use super::AutonomousController;
use crate::config::{
    ANGLE_BRAKE_WINDOW_DEG, ANGLE_DEADBAND_DEG, DISTANCE_DEADBAND_IN, END_TOLERANCE_MS, SPEED_FLOOR,
};
use crate::store::Tunables;

/// Drive feedback consumed by the regulator. Encoder distances are in raw
/// units; heading is in degrees and only ever compared against the
/// run-start heading, never re-zeroed per action.
pub trait DriveFeedback {
    fn heading_deg(&self) -> f64;
    fn left_distance(&self) -> f64;
    fn right_distance(&self) -> f64;
}

/// Map remaining distance (signed inches) to a drive speed.
///
/// Inside the dead zone the target counts as reached. Past the braking
/// threshold the speed is `max_speed` flat; inside it the speed ramps
/// linearly from a floor of 0.25 up to `max_speed`. The sign of the result
/// follows the sign of `remaining`.
pub fn distance_remaining_to_speed(remaining: f64, max_speed: f64) -> f64 {
    let max_speed = max_speed.abs();
    let abs_remaining = remaining.abs();
    if abs_remaining < DISTANCE_DEADBAND_IN {
        return 0.0;
    }
    let brake_threshold = 6.0 + (max_speed - SPEED_FLOOR) * 8.0;
    let speed = if abs_remaining < brake_threshold {
        SPEED_FLOOR + (max_speed - SPEED_FLOOR) * abs_remaining / brake_threshold
    } else {
        max_speed
    };
    if remaining < 0.0 { -speed } else { speed }
}

/// Map remaining angle (signed degrees) to a rotation speed.
///
/// Same shape as the distance profile but with a fixed 5-degree ramp
/// window. Positive commanded speed turns the robot clockwise, so closing
/// a positive remaining angle takes a negative speed, and vice versa.
pub fn angle_remaining_to_speed(remaining: f64, max_speed: f64) -> f64 {
    let max_speed = max_speed.abs();
    let abs_remaining = remaining.abs();
    if abs_remaining < ANGLE_DEADBAND_DEG {
        return 0.0;
    }
    let speed = if abs_remaining < ANGLE_BRAKE_WINDOW_DEG {
        SPEED_FLOOR + (max_speed - SPEED_FLOOR) * abs_remaining / ANGLE_BRAKE_WINDOW_DEG
    } else {
        max_speed
    };
    if remaining > 0.0 { -speed } else { speed }
}

/// What one tick of evaluation decided for the current action
enum Outcome {
    /// Keep going at `speed`; `remaining` is only used for the status line
    Running { speed: f64, remaining: f64 },
    /// Target reached (or nothing to do): advance the cursor
    Done,
}

/// Feedback-driven sequencer over a parsed action list
pub struct EncoderRegulator<F> {
    feedback: F,
    max_speed: f64,
    inches_per_encoder_unit: f64,
    actions: Vec<Action>,
    cur_op: usize,
    start_left: Option<f64>,
    start_right: Option<f64>,
    action_start_ms: Option<u64>,
    start_heading: f64,
    prev_action: Option<Action>,
    status: String,
}

impl<F: DriveFeedback> EncoderRegulator<F> {
    pub fn new(feedback: F, tunables: &Tunables) -> Self {
        Self {
            feedback,
            max_speed: tunables.max_auton_speed,
            inches_per_encoder_unit: tunables.inches_per_encoder_unit,
            actions: Vec::new(),
            cur_op: 0,
            start_left: None,
            start_right: None,
            action_start_ms: None,
            start_heading: 0.0,
            prev_action: None,
            status: String::new(),
        }
    }

    fn distance_moved(&self) -> f64 {
        let left_delta = self.feedback.left_distance() - self.start_left.unwrap_or(0.0);
        let right_delta = self.feedback.right_distance() - self.start_right.unwrap_or(0.0);
        self.inches_per_encoder_unit * ((left_delta + right_delta) / 2.0)
    }

    fn angle_turned(&self) -> f64 {
        self.feedback.heading_deg() - self.start_heading
    }

    fn time_remaining_ms(&self, action: &Action, elapsed_ms: u64) -> i64 {
        let elapsed_in_action = elapsed_ms - self.action_start_ms.unwrap_or(elapsed_ms);
        i64::from(action.magnitude) * 1000 - elapsed_in_action as i64
    }

    fn evaluate(&self, action: &Action, elapsed_ms: u64) -> Outcome {
        let configured = action.speed.unwrap_or(self.max_speed);
        let Some(kind) = action.kind else {
            warn!("Ignoring {}", action);
            return Outcome::Done;
        };
        match kind {
            ActionKind::Move => {
                let moved = self.distance_moved();
                let remaining = f64::from(action.magnitude) - moved;
                debug!("Distance moved: {:.1}. Remaining: {:.1}", moved, remaining);
                let speed = distance_remaining_to_speed(remaining, configured);
                if speed == 0.0 {
                    Outcome::Done
                } else {
                    Outcome::Running { speed, remaining }
                }
            }
            ActionKind::Turn => {
                let turned = self.angle_turned();
                let remaining = f64::from(action.magnitude) - turned;
                debug!("Angle turned: {:.1}. Remaining: {:.1}", turned, remaining);
                let speed = angle_remaining_to_speed(remaining, self.max_speed);
                if speed == 0.0 {
                    Outcome::Done
                } else {
                    Outcome::Running { speed, remaining }
                }
            }
            ActionKind::Cruise | ActionKind::Station => {
                let remaining = self.time_remaining_ms(action, elapsed_ms);
                if remaining <= END_TOLERANCE_MS as i64 {
                    Outcome::Done
                } else {
                    Outcome::Running {
                        speed: configured,
                        remaining: remaining as f64,
                    }
                }
            }
            ActionKind::Hold => {
                let remaining = self.time_remaining_ms(action, elapsed_ms);
                if remaining <= END_TOLERANCE_MS as i64 {
                    Outcome::Done
                } else {
                    // While time remains, counteract any drift away from
                    // where the hold started
                    let moved = self.distance_moved();
                    debug!("Distance shifted: {:.1}", moved);
                    Outcome::Running {
                        speed: distance_remaining_to_speed(-moved, configured),
                        remaining: -moved,
                    }
                }
            }
            ActionKind::RCone | ActionKind::RCube | ActionKind::GCone | ActionKind::GCube => {
                let remaining = self.time_remaining_ms(action, elapsed_ms);
                if remaining <= END_TOLERANCE_MS as i64 {
                    Outcome::Done
                } else {
                    // Full actuation for the whole window
                    Outcome::Running {
                        speed: 1.0,
                        remaining: remaining as f64,
                    }
                }
            }
            ActionKind::PCone | ActionKind::PCube | ActionKind::SArm => {
                // Pass-through: completion comes back via action_complete
                // once the arm reports it reached the target
                Outcome::Running {
                    speed: configured,
                    remaining: f64::from(action.magnitude),
                }
            }
            ActionKind::Stop => Outcome::Done,
        }
    }

    /// Completion transition: clear the per-action baselines, remember the
    /// completed action and advance the cursor.
    fn complete_current(&mut self) {
        if let Some(action) = self.actions.get(self.cur_op) {
            info!("Completed action: {}", action);
            self.prev_action = Some(action.clone());
        }
        self.start_left = None;
        self.start_right = None;
        self.action_start_ms = None;
        self.cur_op += 1;
    }

    /// The most recently completed action, if any
    pub fn previous(&self) -> Option<&Action> {
        self.prev_action.as_ref()
    }
}

impl<F: DriveFeedback> AutonomousController for EncoderRegulator<F> {
    fn autonomous_init(&mut self, script: &str) {
        self.cur_op = 0;
        self.prev_action = None;
        self.actions.clear();
        self.start_left = None;
        self.start_right = None;
        self.action_start_ms = None;
        self.start_heading = self.feedback.heading_deg();
        for token in split_script(script) {
            let mut action = Action::parse(token);
            if action.speed.is_none() {
                action.speed = Some(self.max_speed);
            }
            info!("Adding: {}", action);
            self.actions.push(action);
        }
    }

    fn next_action(&mut self, elapsed_ms: u64) -> Option<Action> {
        while let Some(action) = self.actions.get(self.cur_op).cloned() {
            // Baselines are captured lazily on the first tick an action is seen
            if self.start_left.is_none() {
                self.start_left = Some(self.feedback.left_distance());
            }
            if self.start_right.is_none() {
                self.start_right = Some(self.feedback.right_distance());
            }
            if self.action_start_ms.is_none() {
                self.action_start_ms = Some(elapsed_ms);
            }
            match self.evaluate(&action, elapsed_ms) {
                Outcome::Running { speed, remaining } => {
                    let kind = action.kind?;
                    self.status = format!("{} {:.1}/{}", kind, remaining, action.magnitude);
                    return Some(Action::new(kind, action.magnitude, Some(speed)));
                }
                // Fast-forward through finished and inert actions within
                // the same tick
                Outcome::Done => self.complete_current(),
            }
        }
        self.status = "None".to_string();
        None
    }

    fn action_complete(&mut self, action: &Action) {
        info!("Externally completed action: {}", action);
        if self.cur_op < self.actions.len() {
            self.complete_current();
        }
    }

    fn calibration_init(&mut self, _cycle: u32) {}

    // Calibration runs open-loop; this strategy has nothing to replay
    fn calibrate(&mut self, _cycle: u32, _elapsed_in_cycle_ms: u64) -> Option<Action> {
        None
    }

    fn status(&self) -> &str {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeDrive {
        state: Rc<RefCell<(f64, f64, f64)>>, // (left, right, heading)
    }

    impl FakeDrive {
        fn set_encoders(&self, left: f64, right: f64) {
            let mut state = self.state.borrow_mut();
            state.0 = left;
            state.1 = right;
        }

        fn set_heading(&self, heading: f64) {
            self.state.borrow_mut().2 = heading;
        }
    }

    impl DriveFeedback for FakeDrive {
        fn heading_deg(&self) -> f64 {
            self.state.borrow().2
        }
        fn left_distance(&self) -> f64 {
            self.state.borrow().0
        }
        fn right_distance(&self) -> f64 {
            self.state.borrow().1
        }
    }

    fn tunables(max_speed: f64) -> Tunables {
        Tunables {
            max_auton_speed: max_speed,
            inches_per_encoder_unit: 1.0,
            ..Tunables::default()
        }
    }

    fn regulator(max_speed: f64) -> (EncoderRegulator<FakeDrive>, FakeDrive) {
        let drive = FakeDrive::default();
        let reg = EncoderRegulator::new(drive.clone(), &tunables(max_speed));
        (reg, drive)
    }

    #[test]
    fn test_distance_profile_dead_zone() {
        assert_eq!(distance_remaining_to_speed(1.0, 0.8), 0.0);
        assert_eq!(distance_remaining_to_speed(-1.0, 0.8), 0.0);
        assert_eq!(distance_remaining_to_speed(1.99, 0.25), 0.0);
    }

    #[test]
    fn test_distance_profile_flat_beyond_threshold() {
        // max 0.5 -> threshold 6 + 0.25*8 = 8 inches
        assert_eq!(distance_remaining_to_speed(8.0, 0.5), 0.5);
        assert_eq!(distance_remaining_to_speed(100.0, 0.5), 0.5);
        assert_eq!(distance_remaining_to_speed(-100.0, 0.5), -0.5);
    }

    #[test]
    fn test_distance_profile_ramp_monotonic() {
        let mut last = 0.0;
        for tenths in 20..80 {
            let remaining = tenths as f64 / 10.0;
            let speed = distance_remaining_to_speed(remaining, 0.5);
            assert!(speed >= last, "speed dipped at remaining={}", remaining);
            assert!(speed >= SPEED_FLOOR && speed <= 0.5);
            last = speed;
        }
    }

    #[test]
    fn test_distance_profile_sign_follows_remaining() {
        assert!(distance_remaining_to_speed(4.0, 0.5) > 0.0);
        assert!(distance_remaining_to_speed(-4.0, 0.5) < 0.0);
    }

    #[test]
    fn test_angle_profile_dead_zone() {
        assert_eq!(angle_remaining_to_speed(1.0, 0.25), 0.0);
        assert_eq!(angle_remaining_to_speed(-1.0, 0.25), 0.0);
    }

    #[test]
    fn test_angle_profile_clockwise_convention() {
        // Positive remaining -> negative speed and vice versa
        assert_eq!(angle_remaining_to_speed(10.0, 0.25), -0.25);
        assert_eq!(angle_remaining_to_speed(-10.0, 0.25), 0.25);
    }

    #[test]
    fn test_angle_profile_ramp_inside_window() {
        let speed = angle_remaining_to_speed(2.5, 0.75);
        assert!(speed < -SPEED_FLOOR && speed > -0.75);
    }

    #[test]
    fn test_move_then_stop_completes() {
        let (mut reg, drive) = regulator(0.5);
        reg.autonomous_init("Move 10, Stop");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.kind, Some(ActionKind::Move));
        assert_eq!(action.speed, Some(0.5)); // 10 >= threshold of 8

        // Feedback reaches the target (within the dead zone); Move
        // completes and Stop is skipped in the same tick
        drive.set_encoders(9.5, 9.5);
        assert_eq!(reg.next_action(20), None);
        assert_eq!(reg.status(), "None");
        assert_eq!(reg.previous().unwrap().kind, Some(ActionKind::Stop));
    }

    #[test]
    fn test_move_negative_direction() {
        let (mut reg, _drive) = regulator(0.5);
        reg.autonomous_init("Move -48");
        let action = reg.next_action(0).unwrap();
        assert_eq!(action.speed, Some(-0.5));
    }

    #[test]
    fn test_move_brakes_near_target() {
        let (mut reg, drive) = regulator(0.5);
        reg.autonomous_init("Move 20");
        let full = reg.next_action(0).unwrap().speed.unwrap();
        assert_eq!(full, 0.5);

        drive.set_encoders(16.0, 16.0); // 4 inches left, inside the 8-inch window
        let braking = reg.next_action(20).unwrap().speed.unwrap();
        assert!(braking < full && braking >= SPEED_FLOOR);
    }

    #[test]
    fn test_turn_completes_on_heading() {
        let (mut reg, drive) = regulator(0.25);
        reg.autonomous_init("Turn 90");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.kind, Some(ActionKind::Turn));
        assert_eq!(action.speed, Some(-0.25)); // positive remaining, clockwise convention

        drive.set_heading(89.0);
        assert_eq!(reg.next_action(20), None);
    }

    #[test]
    fn test_heading_not_rezeroed_between_turns() {
        let (mut reg, drive) = regulator(0.25);
        reg.autonomous_init("Turn 90, Turn 45");

        drive.set_heading(89.0); // completes the first turn
        let action = reg.next_action(0).unwrap();
        // Second turn measures against the run-start heading: remaining is
        // 45 - 89 = -44, so the commanded speed is positive
        assert_eq!(action.kind, Some(ActionKind::Turn));
        assert_eq!(action.speed, Some(0.25));
    }

    #[test]
    fn test_cruise_runs_at_configured_speed_until_expiry() {
        let (mut reg, _drive) = regulator(0.25);
        reg.autonomous_init("Cruise 1 0.7");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.speed, Some(0.7));

        // 15ms left: still running; 10ms left: done
        assert!(reg.next_action(985).is_some());
        assert_eq!(reg.next_action(990), None);
    }

    #[test]
    fn test_hold_corrects_drift() {
        let (mut reg, drive) = regulator(0.25);
        reg.autonomous_init("Hold 2");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.speed, Some(0.0)); // no drift yet

        // Robot shifted forward 5 inches: push back
        drive.set_encoders(5.0, 5.0);
        let action = reg.next_action(100).unwrap();
        assert_eq!(action.speed, Some(-0.25));

        assert_eq!(reg.next_action(2000), None);
    }

    #[test]
    fn test_grab_forces_full_actuation() {
        let (mut reg, _drive) = regulator(0.25);
        reg.autonomous_init("GCone 1");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.speed, Some(1.0));
        assert_eq!(reg.next_action(1000), None);
    }

    #[test]
    fn test_placement_waits_for_external_completion() {
        let (mut reg, _drive) = regulator(0.25);
        reg.autonomous_init("PCone 2, Stop");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.kind, Some(ActionKind::PCone));
        // Never times out on its own
        let again = reg.next_action(60_000).unwrap();
        assert_eq!(again.kind, Some(ActionKind::PCone));

        reg.action_complete(&again);
        assert_eq!(reg.next_action(60_020), None);
    }

    #[test]
    fn test_unknown_token_skipped_without_motion() {
        let (mut reg, _drive) = regulator(0.5);
        reg.autonomous_init("Bogus 1, Move 10");

        let action = reg.next_action(0).unwrap();
        assert_eq!(action.kind, Some(ActionKind::Move));
    }

    #[test]
    fn test_empty_script_completes_immediately() {
        let (mut reg, _drive) = regulator(0.5);
        reg.autonomous_init("");
        assert_eq!(reg.next_action(0), None);
        assert_eq!(reg.status(), "None");
    }

    #[test]
    fn test_status_reports_current_action() {
        let (mut reg, _drive) = regulator(0.5);
        reg.autonomous_init("Move 10");
        reg.next_action(0);
        assert_eq!(reg.status(), "Move 10.0/10");
    }

    #[test]
    fn test_init_resets_previous_run() {
        let (mut reg, drive) = regulator(0.5);
        reg.autonomous_init("Move 10");
        drive.set_encoders(9.5, 9.5);
        assert_eq!(reg.next_action(0), None);

        // Second run rebuilds the list and rebaselines the encoders
        reg.autonomous_init("Move 10");
        let action = reg.next_action(0).unwrap();
        assert_eq!(action.speed, Some(0.5));
    }
}
