// 50 Hz autonomous tick loop
//
// Polls the selected sequencing strategy once per tick with the elapsed
// autonomous time, maps the chosen action to an actuation message for the
// hardware node, and publishes a current-action status string. The loop
// ends when the strategy reports no action left; that is the sole
// completion signal and always counts as success.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use tokio::time::interval;
use tracing::{info, warn};

use crate::auton::encoder::{DriveFeedback, EncoderRegulator};
use crate::auton::timeline::{CalibrationTable, TimelineScheduler};
use crate::auton::{Action, ActionKind, AutonomousController};
use crate::config::{
    CALIBRATION_WINDOW, LOOP_HZ, TOPIC_ACTUATION, TOPIC_ARM_STATUS, TOPIC_FEEDBACK, TOPIC_STATUS,
};
use crate::messages::{Actuation, ArmStatus, ArmTarget, DriveSample, GamePiece};
use crate::store::Tunables;

type RuntimeError = Box<dyn std::error::Error + Send + Sync>;

/// Which sequencing strategy drives the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Closed-loop: encoder/gyro feedback with a braking profile
    Encoder,
    /// Open-loop: pre-computed timeline from the calibration table
    Timeline,
}

/// Latest drive feedback, shared between the subscriber drain and the
/// regulator. Only the tick task touches it, the mutex is just for the
/// shared handle.
#[derive(Clone, Default)]
pub struct SharedFeedback(Arc<Mutex<DriveSample>>);

impl SharedFeedback {
    fn store(&self, sample: DriveSample) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = sample;
    }

    fn get(&self) -> DriveSample {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DriveFeedback for SharedFeedback {
    fn heading_deg(&self) -> f64 {
        self.get().heading_deg
    }

    fn left_distance(&self) -> f64 {
        self.get().left_distance
    }

    fn right_distance(&self) -> f64 {
        self.get().right_distance
    }
}

/// Map the chosen action to what the hardware node should do this tick.
/// Inert actions map to nothing.
fn actuation_for(action: &Action) -> Option<Actuation> {
    let kind = action.kind?;
    let speed = action.speed.unwrap_or(0.0);
    Some(match kind {
        ActionKind::Move | ActionKind::Cruise | ActionKind::Station | ActionKind::Hold => {
            Actuation::Drive {
                speed,
                rotation: 0.0,
            }
        }
        ActionKind::Turn => Actuation::Drive {
            speed: 0.0,
            rotation: speed,
        },
        ActionKind::Stop => Actuation::Stop,
        ActionKind::PCone => Actuation::Arm {
            target: ArmTarget::Cone,
        },
        ActionKind::PCube => Actuation::Arm {
            target: ArmTarget::Cube,
        },
        ActionKind::SArm => Actuation::Arm {
            target: ArmTarget::Stable,
        },
        ActionKind::GCone => Actuation::Grab {
            piece: GamePiece::Cone,
            speed: 1.0,
        },
        ActionKind::GCube => Actuation::Grab {
            piece: GamePiece::Cube,
            speed: 0.9,
        },
        ActionKind::RCone => Actuation::Release {
            piece: GamePiece::Cone,
            speed: 1.0,
        },
        ActionKind::RCube => Actuation::Release {
            piece: GamePiece::Cube,
            speed: 1.0,
        },
    })
}

fn is_placement(action: &Action) -> bool {
    matches!(
        action.kind,
        Some(ActionKind::PCone | ActionKind::PCube | ActionKind::SArm)
    )
}

/// Run a scripted autonomous sequence to completion
pub async fn run(strategy: Strategy, script: &str, tunables_path: &Path) -> Result<(), RuntimeError> {
    let tunables = Tunables::load(tunables_path)?;
    let feedback = SharedFeedback::default();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_feedback = session.declare_subscriber(TOPIC_FEEDBACK).await?;
    let sub_arm = session.declare_subscriber(TOPIC_ARM_STATUS).await?;
    let pub_actuation = session.declare_publisher(TOPIC_ACTUATION).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;

    let mut controller: Box<dyn AutonomousController> = match strategy {
        Strategy::Encoder => Box::new(EncoderRegulator::new(feedback.clone(), &tunables)),
        Strategy::Timeline => Box::new(TimelineScheduler::new(CalibrationTable::from(&tunables))),
    };
    controller.autonomous_init(script);

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let run_start = Instant::now();
    let mut arm_at_target = false;
    let mut last_logged: Option<Action> = None;

    info!(
        "Autonomous started: {:?} strategy, {}Hz loop",
        strategy, LOOP_HZ
    );

    loop {
        tick.tick().await;

        // Drain pending feedback (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_feedback.try_recv() {
            match serde_json::from_slice::<DriveSample>(&sample.payload().to_bytes()) {
                Ok(drive) => feedback.store(drive),
                Err(e) => warn!("Failed to parse drive feedback: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_arm.try_recv() {
            match serde_json::from_slice::<ArmStatus>(&sample.payload().to_bytes()) {
                Ok(arm) => arm_at_target = arm.at_target,
                Err(e) => warn!("Failed to parse arm status: {}", e),
            }
        }

        let elapsed_ms = run_start.elapsed().as_millis() as u64;
        let Some(action) = controller.next_action(elapsed_ms) else {
            info!("Autonomous sequence complete at {}ms", elapsed_ms);
            pub_actuation
                .put(serde_json::to_string(&Actuation::Stop)?)
                .await?;
            pub_status.put(controller.status().to_string()).await?;
            return Ok(());
        };

        if last_logged.as_ref() != Some(&action) {
            info!("Chosen action at {}ms: {}", elapsed_ms, action);
            last_logged = Some(action.clone());
        }

        if let Some(actuation) = actuation_for(&action) {
            pub_actuation.put(serde_json::to_string(&actuation)?).await?;
        }

        // Placement actions finish when the arm reports it reached the
        // target, not on their own
        if is_placement(&action) && arm_at_target {
            controller.action_complete(&action);
            arm_at_target = false;
        }

        pub_status.put(controller.status().to_string()).await?;
    }
}

/// Replay the fixed calibration sequence, measure how far the drivetrain
/// gets in each 5-second window, and write the results back into the
/// tunables file.
pub async fn run_calibration(tunables_path: &Path) -> Result<(), RuntimeError> {
    let mut tunables = Tunables::load(tunables_path)?;
    let feedback = SharedFeedback::default();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let sub_feedback = session.declare_subscriber(TOPIC_FEEDBACK).await?;
    let pub_actuation = session.declare_publisher(TOPIC_ACTUATION).await?;

    let mut scheduler = TimelineScheduler::new(CalibrationTable::from(&tunables));
    let mut cycle: u32 = 1;
    scheduler.calibration_init(cycle);

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut cycle_start = Instant::now();
    let mut baseline = feedback.get();
    let mut active_test: Option<Action> = None;

    info!("Calibration started");

    loop {
        tick.tick().await;

        while let Ok(Some(sample)) = sub_feedback.try_recv() {
            match serde_json::from_slice::<DriveSample>(&sample.payload().to_bytes()) {
                Ok(drive) => feedback.store(drive),
                Err(e) => warn!("Failed to parse drive feedback: {}", e),
            }
        }

        let elapsed_ms = cycle_start.elapsed().as_millis() as u64;
        let Some(action) = scheduler.calibrate(cycle, elapsed_ms) else {
            info!("Calibration complete after {} cycles", cycle - 1);
            pub_actuation
                .put(serde_json::to_string(&Actuation::Stop)?)
                .await?;
            tunables.save(tunables_path)?;
            return Ok(());
        };

        // The Stop sentinel closes out a cycle: record the measurement
        // and move to the next one
        if action.kind == Some(ActionKind::Stop) && action.speed.is_none() {
            if let Some(test) = active_test.take() {
                record_measurement(&mut tunables, &test, baseline, feedback.get());
            }
            pub_actuation
                .put(serde_json::to_string(&Actuation::Stop)?)
                .await?;
            cycle += 1;
            scheduler.calibration_init(cycle);
            cycle_start = Instant::now();
            continue;
        }

        if active_test.is_none() {
            info!("Calibration cycle {}: running {}", cycle, action);
            baseline = feedback.get();
            active_test = Some(action.clone());
        }
        if let Some(actuation) = actuation_for(&action) {
            pub_actuation.put(serde_json::to_string(&actuation)?).await?;
        }
    }
}

/// Turn the feedback delta over one calibration window into a per-second
/// table entry for the tested speed level.
fn record_measurement(tunables: &mut Tunables, test: &Action, start: DriveSample, end: DriveSample) {
    let window_s = CALIBRATION_WINDOW.as_secs_f64();
    let level = test.speed.unwrap_or(0.0);
    match test.kind {
        Some(ActionKind::Move) => {
            let left_delta = end.left_distance - start.left_distance;
            let right_delta = end.right_distance - start.right_distance;
            let moved = tunables.inches_per_encoder_unit * ((left_delta + right_delta) / 2.0);
            let per_second = (moved.abs() / window_s).round() as i32;
            info!(
                "Measured {:.1}in over the window at speed {}: {}in/s",
                moved, level, per_second
            );
            tunables.set_speed_entry(level, per_second);
        }
        Some(ActionKind::Turn) => {
            let turned = end.heading_deg - start.heading_deg;
            let per_second = (turned.abs() / window_s).round() as i32;
            info!(
                "Measured {:.1}deg over the window at speed {}: {}deg/s",
                turned, level, per_second
            );
            tunables.set_rotate_entry(level, per_second);
        }
        _ => {}
    }
}
