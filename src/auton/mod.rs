// Autonomous sequencing engine
//
// Two interchangeable strategies share one contract: a closed-loop
// regulator that tracks encoder/gyro feedback, and an open-loop scheduler
// that walks a pre-computed timeline. The runtime polls whichever one is
// selected once per control tick.

pub mod action;
pub mod encoder;
pub mod timeline;

pub use action::{Action, ActionKind};

/// The tick contract both strategies implement.
///
/// `next_action` is polled once per control cycle with the time elapsed
/// since the run started; `None` means the sequence is finished and is the
/// sole termination signal. Each strategy owns all of its mutable state, so
/// nothing here needs locking.
pub trait AutonomousController {
    /// Reset state and build the action list from a raw script
    fn autonomous_init(&mut self, script: &str);

    /// Return the action in progress for this tick, or `None` when the
    /// whole sequence is complete. Calling twice with the same `elapsed_ms`
    /// and unchanged feedback returns the same action.
    fn next_action(&mut self, elapsed_ms: u64) -> Option<Action>;

    /// Out-of-band completion signal, used for placement actions whose
    /// doneness is decided by an external arm-position check
    fn action_complete(&mut self, action: &Action);

    /// Prepare the fixed calibration test sequence for a run
    fn calibration_init(&mut self, cycle: u32);

    /// Return the test action for a 1-based calibration cycle, a Stop
    /// sentinel once the cycle's window has elapsed, or `None` when all
    /// cycles are done. Strategies that don't calibrate return `None`.
    fn calibrate(&mut self, cycle: u32, elapsed_in_cycle_ms: u64) -> Option<Action>;

    /// Human-readable status for the current action, published every tick
    fn status(&self) -> &str;
}
