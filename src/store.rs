// Tunable-parameter store
//
// The runtime reads all tuning numbers from a JSON file at startup and
// writes the file back after a calibration run. Missing file means
// "use the defaults"; a corrupt file is an error the caller surfaces.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// One calibration table entry: at `speed`, the drivetrain covers
/// `per_second` inches (speed table) or degrees (rotate table) each second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub speed: f64,
    pub per_second: i32,
}

/// Error types for the tunables store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed tunables file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tuning numbers read at run start.
///
/// The speed/rotate tables must stay ordered from highest speed to lowest:
/// the open-loop builder fills intervals greedily and relies on seeing the
/// biggest per-second chunks first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    /// Default max speed for actions that don't carry their own
    #[serde(default = "default_max_speed")]
    pub max_auton_speed: f64,
    /// Inches traveled per raw encoder unit
    #[serde(default = "default_distance_factor")]
    pub inches_per_encoder_unit: f64,
    /// Speed level -> inches per second
    #[serde(default = "default_speed_table")]
    pub speed_table: Vec<TableEntry>,
    /// Speed level -> degrees per second
    #[serde(default = "default_rotate_table")]
    pub rotate_table: Vec<TableEntry>,
}

fn default_max_speed() -> f64 {
    0.25
}

fn default_distance_factor() -> f64 {
    2.355
}

fn default_speed_table() -> Vec<TableEntry> {
    vec![
        TableEntry { speed: 1.0, per_second: 20 },
        TableEntry { speed: 0.5, per_second: 10 },
        TableEntry { speed: 0.25, per_second: 5 },
        TableEntry { speed: 0.1, per_second: 1 },
    ]
}

fn default_rotate_table() -> Vec<TableEntry> {
    vec![
        TableEntry { speed: 1.0, per_second: 45 },
        TableEntry { speed: 0.5, per_second: 30 },
        TableEntry { speed: 0.25, per_second: 15 },
        TableEntry { speed: 0.1, per_second: 2 },
    ]
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_auton_speed: default_max_speed(),
            inches_per_encoder_unit: default_distance_factor(),
            speed_table: default_speed_table(),
            rotate_table: default_rotate_table(),
        }
    }
}

impl Tunables {
    /// Load tunables from `path`, falling back to defaults when the file
    /// doesn't exist yet (first run, nothing calibrated).
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            info!("No tunables file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let tunables: Tunables = serde_json::from_str(&raw)?;
        info!("Loaded tunables from {}", path.display());
        Ok(tunables)
    }

    /// Write tunables back to `path` (called after calibration)
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!("Saved tunables to {}", path.display());
        Ok(())
    }

    /// Record a calibration measurement for `speed` in the speed table,
    /// inserting the entry if the level was never calibrated before.
    pub fn set_speed_entry(&mut self, speed: f64, per_second: i32) {
        Self::set_entry(&mut self.speed_table, speed, per_second);
    }

    /// Same for the rotate table
    pub fn set_rotate_entry(&mut self, speed: f64, per_second: i32) {
        Self::set_entry(&mut self.rotate_table, speed, per_second);
    }

    fn set_entry(table: &mut Vec<TableEntry>, speed: f64, per_second: i32) {
        if let Some(entry) = table.iter_mut().find(|e| e.speed == speed) {
            entry.per_second = per_second;
        } else {
            table.push(TableEntry { speed, per_second });
            // Keep the greedy-fill ordering intact
            table.sort_by(|a, b| b.speed.total_cmp(&a.speed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_ordered_high_to_low() {
        let tunables = Tunables::default();
        for pair in tunables.speed_table.windows(2) {
            assert!(pair[0].speed > pair[1].speed);
        }
        for pair in tunables.rotate_table.windows(2) {
            assert!(pair[0].speed > pair[1].speed);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        // A file with only one field still yields a complete struct
        let tunables: Tunables = serde_json::from_str(r#"{"max_auton_speed": 0.5}"#).unwrap();
        assert_eq!(tunables.max_auton_speed, 0.5);
        assert_eq!(tunables.inches_per_encoder_unit, 2.355);
        assert_eq!(tunables.speed_table.len(), 4);
    }

    #[test]
    fn test_set_entry_updates_in_place() {
        let mut tunables = Tunables::default();
        tunables.set_speed_entry(0.5, 12);
        assert_eq!(tunables.speed_table.len(), 4);
        let entry = tunables.speed_table.iter().find(|e| e.speed == 0.5).unwrap();
        assert_eq!(entry.per_second, 12);
    }

    #[test]
    fn test_set_entry_inserts_sorted() {
        let mut tunables = Tunables::default();
        tunables.set_rotate_entry(0.75, 38);
        assert_eq!(tunables.rotate_table.len(), 5);
        assert_eq!(tunables.rotate_table[1].speed, 0.75);
    }

    #[test]
    fn test_round_trip() {
        let tunables = Tunables::default();
        let raw = serde_json::to_string(&tunables).unwrap();
        let back: Tunables = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.speed_table, tunables.speed_table);
        assert_eq!(back.max_auton_speed, tunables.max_auton_speed);
    }
}
