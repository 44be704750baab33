// Message types exchanged with the hardware node over zenoh

use serde::{Deserialize, Serialize};

/// Drive feedback sample: hardware node -> runtime.
/// Encoder distances are in raw encoder units; the regulator converts
/// them to inches with the configured factor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct DriveSample {
    pub left_distance: f64,
    pub right_distance: f64,
    pub heading_deg: f64,
}

/// Arm feedback: hardware node -> runtime. `at_target` flips true once the
/// arm has settled on the requested target, which is what completes a
/// placement action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ArmStatus {
    pub at_target: bool,
}

/// Arm targets used by placement actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmTarget {
    Cone,
    Cube,
    Stable,
}

/// Game piece handled by the intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePiece {
    Cone,
    Cube,
}

/// Actuation output: runtime -> hardware node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actuation {
    /// Arcade-style drive command: forward speed and rotation, both in [-1, 1]
    Drive { speed: f64, rotation: f64 },
    /// Stop the drivetrain
    Stop,
    /// Move the arm to a preset target
    Arm { target: ArmTarget },
    /// Run the intake to grab a piece
    Grab { piece: GamePiece, speed: f64 },
    /// Run the intake to release a piece
    Release { piece: GamePiece, speed: f64 },
}
