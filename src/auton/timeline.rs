// Open-loop scheduler
//
// Expands a script into a static timeline of timed segments up front,
// using the calibration table to translate distances and angles into
// durations, then replays the timeline against elapsed time with no
// feedback. Also home to the calibration sequencer that generates the
// fixed test runs the table is measured from.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::action::{split_script, Action, ActionKind};
use super::AutonomousController;
use crate::config::{CALIBRATION_WINDOW, SEGMENT_DROP_TOLERANCE_MS};
use crate::store::{TableEntry, Tunables};

/// Speed-level-to-throughput mapping measured by calibration.
///
/// Entries are kept ordered from highest speed to lowest so the greedy
/// builder consumes the largest chunks first.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    speed: Vec<TableEntry>,
    rotate: Vec<TableEntry>,
}

impl CalibrationTable {
    pub fn new(mut speed: Vec<TableEntry>, mut rotate: Vec<TableEntry>) -> Self {
        speed.sort_by(|a, b| b.speed.total_cmp(&a.speed));
        rotate.sort_by(|a, b| b.speed.total_cmp(&a.speed));
        Self { speed, rotate }
    }
}

impl From<&Tunables> for CalibrationTable {
    fn from(tunables: &Tunables) -> Self {
        Self::new(tunables.speed_table.clone(), tunables.rotate_table.clone())
    }
}

/// One slice of the pre-computed timeline. Zero-speed segments are time
/// markers for non-motion actions, not drive commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub kind: ActionKind,
    pub speed: f64,
    pub end_time_ms: u64,
}

/// The fixed calibration test program: Move then Turn, at descending
/// speed levels, one 5-second window per cycle.
pub struct CalibrationSequencer {
    sequence: Vec<Action>,
}

impl CalibrationSequencer {
    pub fn new() -> Self {
        let mut sequence = Vec::with_capacity(8);
        for kind in [ActionKind::Move, ActionKind::Turn] {
            for level in [1.0, 0.5, 0.25, 0.1] {
                sequence.push(Action::new(kind, 0, Some(level)));
            }
        }
        Self { sequence }
    }

    /// Test action for a 1-based cycle: the cycle's fixed action while the
    /// window is open, a Stop sentinel once it has elapsed, `None` past
    /// the last cycle. The caller advances the cycle index itself.
    pub fn test_action(&self, cycle: u32, elapsed_in_cycle_ms: u64) -> Option<Action> {
        let idx = cycle.checked_sub(1)? as usize;
        let action = self.sequence.get(idx)?;
        if elapsed_in_cycle_ms < CALIBRATION_WINDOW.as_millis() as u64 {
            Some(action.clone())
        } else {
            // Nothing more to do for this cycle
            Some(Action::stop_sentinel())
        }
    }
}

impl Default for CalibrationSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeline-replaying sequencer. Consumed segments are dropped for good:
/// the schedule is strictly forward-only.
pub struct TimelineScheduler {
    table: CalibrationTable,
    segments: VecDeque<Segment>,
    sequencer: CalibrationSequencer,
    status: String,
}

impl TimelineScheduler {
    pub fn new(table: CalibrationTable) -> Self {
        Self {
            table,
            segments: VecDeque::new(),
            sequencer: CalibrationSequencer::new(),
            status: String::new(),
        }
    }

    /// Greedily convert a distance/angle into speed segments, largest
    /// calibrated chunks first. Whatever is left below the smallest entry
    /// is dropped: accepted slop, not an error.
    fn fill_motion(&mut self, kind: ActionKind, magnitude: i32, time_s: &mut u64) {
        let entries = match kind {
            ActionKind::Move => &self.table.speed,
            _ => &self.table.rotate,
        };
        let reverse = magnitude < 0;
        let mut remaining = magnitude.unsigned_abs();
        for entry in entries {
            if entry.per_second <= 0 {
                continue; // uncalibrated level
            }
            let per_second = entry.per_second as u32;
            if per_second <= remaining {
                let duration = remaining / per_second;
                remaining %= per_second;
                *time_s += u64::from(duration);
                let segment = Segment {
                    kind,
                    speed: if reverse { -entry.speed } else { entry.speed },
                    end_time_ms: *time_s * 1000,
                };
                debug!("Adding {:?}. Remaining: {}", segment, remaining);
                self.segments.push_back(segment);
            }
        }
        if remaining > 0 {
            debug!(
                "Dropping {}{} below the smallest calibrated step",
                remaining,
                kind.unit()
            );
        }
    }
}

impl AutonomousController for TimelineScheduler {
    fn autonomous_init(&mut self, script: &str) {
        self.segments.clear();
        let tokens = split_script(script);
        info!("Building timeline from {} tokens", tokens.len());
        let mut time_s: u64 = 0;
        for token in tokens {
            let action = Action::parse(token);
            let Some(kind) = action.kind else {
                continue; // parse already logged it
            };
            match kind {
                ActionKind::Move | ActionKind::Turn => {
                    self.fill_motion(kind, action.magnitude, &mut time_s);
                }
                _ => {
                    // Timed actions become zero-speed markers that just
                    // advance the clock
                    time_s += action.magnitude.max(0) as u64;
                    let segment = Segment {
                        kind,
                        speed: 0.0,
                        end_time_ms: time_s * 1000,
                    };
                    debug!("Adding {:?}", segment);
                    self.segments.push_back(segment);
                }
            }
        }
        info!("Timeline built: {} segments", self.segments.len());
    }

    fn next_action(&mut self, elapsed_ms: u64) -> Option<Action> {
        loop {
            let Some(segment) = self.segments.front().copied() else {
                self.status = "None".to_string();
                return None;
            };
            // Segments ending within the tolerance of "now" are done
            if elapsed_ms as i64 - segment.end_time_ms as i64 >= -SEGMENT_DROP_TOLERANCE_MS {
                info!("Removing completed segment: {:?}", segment);
                self.segments.pop_front();
            } else {
                self.status = format!(
                    "{} {}ms/{}ms",
                    segment.kind, elapsed_ms, segment.end_time_ms
                );
                return Some(Action {
                    kind: Some(segment.kind),
                    magnitude: 0,
                    speed: Some(segment.speed),
                });
            }
        }
    }

    // The timeline completes purely on elapsed time
    fn action_complete(&mut self, action: &Action) {
        warn!("Ignoring external completion for {}", action);
    }

    fn calibration_init(&mut self, cycle: u32) {
        info!("Calibration cycle {} armed", cycle);
        self.sequencer = CalibrationSequencer::new();
    }

    fn calibrate(&mut self, cycle: u32, elapsed_in_cycle_ms: u64) -> Option<Action> {
        self.sequencer.test_action(cycle, elapsed_in_cycle_ms)
    }

    fn status(&self) -> &str {
        &self.status
    }
}
