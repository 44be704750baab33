// Action model and script parser
//
// A script is a comma-separated list of tokens, each
// "<Kind> <integer-magnitude> [fractional-speed]", e.g.
// "Move 48, PCone 2, RCone 1, SArm 2, Move -48, Turn -90".

use std::fmt;
use std::str::FromStr;

use tracing::warn;

/// Everything the sequencer knows how to do. The unit of `magnitude`
/// depends on the kind: inches for Move, degrees for Turn, seconds for the
/// timed kinds, a preset level for placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Drive straight for a distance in inches (negative = reverse)
    Move,
    /// Turn in place by an angle in degrees (negative = counter-clockwise)
    Turn,
    /// Keep driving at the configured speed for a duration
    Cruise,
    /// Station-keep at the configured speed for a duration
    Station,
    /// Hold position for a duration, correcting any drift
    Hold,
    /// One-tick terminator
    Stop,
    /// Release a cone (timed, full actuation)
    RCone,
    /// Release a cube (timed, full actuation)
    RCube,
    /// Grab a cone (timed, full actuation)
    GCone,
    /// Grab a cube (timed, full actuation)
    GCube,
    /// Place a cone: arm to the cone target, completed externally
    PCone,
    /// Place a cube: arm to the cube target, completed externally
    PCube,
    /// Stow the arm at the stable position, completed externally
    SArm,
}

impl ActionKind {
    /// Display unit for the magnitude
    pub fn unit(&self) -> &'static str {
        match self {
            ActionKind::Move => "in",
            ActionKind::Turn => "deg",
            ActionKind::PCone | ActionKind::PCube | ActionKind::SArm => "level",
            _ => "sec",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Move => "Move",
            ActionKind::Turn => "Turn",
            ActionKind::Cruise => "Cruise",
            ActionKind::Station => "Station",
            ActionKind::Hold => "Hold",
            ActionKind::Stop => "Stop",
            ActionKind::RCone => "RCone",
            ActionKind::RCube => "RCube",
            ActionKind::GCone => "GCone",
            ActionKind::GCube => "GCube",
            ActionKind::PCone => "PCone",
            ActionKind::PCube => "PCube",
            ActionKind::SArm => "SArm",
        };
        f.write_str(name)
    }
}

impl FromStr for ActionKind {
    type Err = ScriptError;

    // Kind names are case-sensitive, matching the script format
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Move" => Ok(ActionKind::Move),
            "Turn" => Ok(ActionKind::Turn),
            "Cruise" => Ok(ActionKind::Cruise),
            "Station" => Ok(ActionKind::Station),
            "Hold" => Ok(ActionKind::Hold),
            "Stop" => Ok(ActionKind::Stop),
            "RCone" => Ok(ActionKind::RCone),
            "RCube" => Ok(ActionKind::RCube),
            "GCone" => Ok(ActionKind::GCone),
            "GCube" => Ok(ActionKind::GCube),
            "PCone" => Ok(ActionKind::PCone),
            "PCube" => Ok(ActionKind::PCube),
            "SArm" => Ok(ActionKind::SArm),
            other => Err(ScriptError::UnknownKind(other.to_string())),
        }
    }
}

/// Error types for token parsing. Parse failures never abort a run: the
/// caller logs them and degrades the token to an inert action.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Unknown action kind: {0}")]
    UnknownKind(String),

    #[error("Bad magnitude {value:?}: {source}")]
    BadMagnitude {
        value: String,
        source: std::num::ParseIntError,
    },

    #[error("Bad speed {value:?}: {source}")]
    BadSpeed {
        value: String,
        source: std::num::ParseFloatError,
    },

    #[error("Empty token")]
    EmptyToken,
}

/// One scripted instruction.
///
/// `kind: None` marks a token that failed to parse; both strategies treat
/// such an action as inert and skip past it without commanding motion.
/// `speed: None` means "use the run default" and is filled in at init time;
/// completion is tracked separately and never signalled through this field.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: Option<ActionKind>,
    pub magnitude: i32,
    pub speed: Option<f64>,
}

impl Action {
    pub fn new(kind: ActionKind, magnitude: i32, speed: Option<f64>) -> Self {
        Self {
            kind: Some(kind),
            magnitude,
            speed,
        }
    }

    /// Sentinel returned by the calibration sequencer once a cycle's test
    /// window has elapsed: a Stop with nothing attached.
    pub fn stop_sentinel() -> Self {
        Self {
            kind: Some(ActionKind::Stop),
            magnitude: 0,
            speed: None,
        }
    }

    /// Parse one whitespace-trimmed token. Failures are logged and degrade
    /// to an inert action rather than propagating.
    pub fn parse(token: &str) -> Self {
        match Self::try_parse(token) {
            Ok(action) => action,
            Err(e) => {
                warn!("Ignoring token {:?}: {}", token, e);
                Self {
                    kind: None,
                    magnitude: 0,
                    speed: None,
                }
            }
        }
    }

    fn try_parse(token: &str) -> Result<Self, ScriptError> {
        let mut parts = token.split_whitespace();
        let kind: ActionKind = parts.next().ok_or(ScriptError::EmptyToken)?.parse()?;
        let magnitude = match parts.next() {
            Some(raw) => raw.parse().map_err(|source| ScriptError::BadMagnitude {
                value: raw.to_string(),
                source,
            })?,
            None => 0,
        };
        let speed = match parts.next() {
            Some(raw) => Some(raw.parse().map_err(|source| ScriptError::BadSpeed {
                value: raw.to_string(),
                source,
            })?),
            None => None,
        };
        Ok(Self {
            kind: Some(kind),
            magnitude,
            speed,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(
                f,
                "{}:{}{}@{:?}",
                kind,
                self.magnitude,
                kind.unit(),
                self.speed
            ),
            None => f.write_str("<inert>"),
        }
    }
}

/// Split a raw script into trimmed tokens, dropping empty ones
pub fn split_script(script: &str) -> Vec<&str> {
    script
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_token() {
        let action = Action::parse("Move 48 0.5");
        assert_eq!(action.kind, Some(ActionKind::Move));
        assert_eq!(action.magnitude, 48);
        assert_eq!(action.speed, Some(0.5));
    }

    #[test]
    fn test_parse_without_speed() {
        // Speed stays unset so the caller can fill in the run default
        let action = Action::parse("Move 48");
        assert_eq!(action.kind, Some(ActionKind::Move));
        assert_eq!(action.magnitude, 48);
        assert_eq!(action.speed, None);
    }

    #[test]
    fn test_parse_negative_magnitude() {
        let action = Action::parse("Turn -90");
        assert_eq!(action.kind, Some(ActionKind::Turn));
        assert_eq!(action.magnitude, -90);
    }

    #[test]
    fn test_parse_unknown_kind_degrades() {
        let action = Action::parse("Bogus 1");
        assert_eq!(action.kind, None);
        assert_eq!(action.speed, None);
    }

    #[test]
    fn test_parse_bad_magnitude_degrades() {
        let action = Action::parse("Move fast");
        assert_eq!(action.kind, None);
    }

    #[test]
    fn test_parse_bad_speed_degrades() {
        let action = Action::parse("Move 48 quick");
        assert_eq!(action.kind, None);
    }

    #[test]
    fn test_kind_is_case_sensitive() {
        assert_eq!(Action::parse("move 48").kind, None);
    }

    #[test]
    fn test_split_script_trims_tokens() {
        let tokens = split_script("Move 48, PCone 2 ,  RCone 1");
        assert_eq!(tokens, vec!["Move 48", "PCone 2", "RCone 1"]);
    }

    #[test]
    fn test_split_empty_script() {
        assert!(split_script("").is_empty());
        assert!(split_script(" , ,").is_empty());
    }

    #[test]
    fn test_units() {
        assert_eq!(ActionKind::Move.unit(), "in");
        assert_eq!(ActionKind::Turn.unit(), "deg");
        assert_eq!(ActionKind::Hold.unit(), "sec");
        assert_eq!(ActionKind::PCone.unit(), "level");
    }
}
