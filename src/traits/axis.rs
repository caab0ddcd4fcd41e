//! Single-axis motion seam.
//!
//! One `Axis` is one degree of freedom of the stage, controlled in discrete
//! steps. The trait speaks physical units (micrometers by configuration);
//! each backend owns a [`StepScale`] that converts to step counts at the
//! hardware boundary, truncating toward zero.
//!
//! ## Free-run moves
//!
//! `forever_pos`/`forever_neg` jog continuously in one direction until the
//! shared `done` flag is observed. Cancellation is cooperative: the backend
//! checks the flag every [`FOREVER_POLL`] and cannot interrupt a blocked
//! hardware call mid-call. While free-running the exact step count is not
//! known, so backends reconcile their net position from the hardware step
//! counter every [`RECONCILE_EVERY`] polls and once more on exit.
//!
//! ## Failure contract
//!
//! Movement before the stage is powered, with the estop latch set, or beyond
//! a travel limit fails with [`ScanError::AxisExceeded`]. Callers catch and
//! log it; only the one move is aborted.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ScanError, ScanResult};

/// Poll cadence for free-run cancellation checks.
pub const FOREVER_POLL: Duration = Duration::from_millis(50);

/// Free-run position reconciliation cadence, in poll iterations.
pub const RECONCILE_EVERY: u32 = 8;

/// Direction of a free-run ("forever") jog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogDirection {
    Positive,
    Negative,
}

/// Linear unit/step conversion with a fixed steps-per-unit scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepScale {
    steps_per_unit: f64,
}

impl StepScale {
    pub fn new(steps_per_unit: f64) -> Self {
        Self { steps_per_unit }
    }

    pub fn steps_per_unit(&self) -> f64 {
        self.steps_per_unit
    }

    /// Convert units to a whole step count, truncating toward zero.
    pub fn to_steps(&self, units: f64) -> i64 {
        (units * self.steps_per_unit).trunc() as i64
    }

    /// Convert a step count back to units.
    pub fn to_units(&self, steps: i64) -> f64 {
        steps as f64 / self.steps_per_unit
    }
}

/// Soft travel limits in units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelRange {
    pub min: f64,
    pub max: f64,
}

impl TravelRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Unlimited travel, for backends without configured limits.
    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn contains(&self, units: f64) -> bool {
        units >= self.min && units <= self.max
    }
}

impl Default for TravelRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// One degree of freedom of the stage.
///
/// Concrete backends implement actual step emission; [`crate::hardware::sim::SimAxis`]
/// is the in-tree simulated backend.
#[async_trait]
pub trait Axis: Send + Sync {
    fn name(&self) -> &str;

    fn scale(&self) -> StepScale;

    fn travel(&self) -> TravelRange;

    /// Current intended position in units.
    async fn position(&self) -> ScanResult<f64>;

    async fn move_absolute(&mut self, units: f64) -> ScanResult<()>;

    async fn move_relative(&mut self, units: f64) -> ScanResult<()>;

    /// Return to the reference position and zero the step counter.
    async fn home(&mut self) -> ScanResult<()>;

    /// Request a graceful halt at the next safe point (non-blocking signal).
    async fn stop(&mut self) -> ScanResult<()>;

    /// Request an immediate halt, possibly sacrificing position accuracy.
    ///
    /// The default delegates to [`Axis::stop`]; backends with a true
    /// emergency path override this.
    async fn estop(&mut self) -> ScanResult<()> {
        self.stop().await
    }

    /// Clear the emergency-stop latch so subsequent moves are accepted.
    fn unestop(&mut self);

    /// Free-run in the positive direction until `done` is observed.
    ///
    /// Returns the reconciled position after the jog ends.
    async fn forever_pos(&mut self, done: Arc<AtomicBool>) -> ScanResult<f64>;

    /// Free-run in the negative direction until `done` is observed.
    async fn forever_neg(&mut self, done: Arc<AtomicBool>) -> ScanResult<f64>;

    /// Reject a target outside the travel range with `AxisExceeded`.
    fn check_travel(&self, target: f64) -> ScanResult<()> {
        let travel = self.travel();
        if !travel.contains(target) {
            return Err(ScanError::axis_exceeded(
                self.name(),
                format!(
                    "target {} outside travel [{}, {}]",
                    target, travel.min, travel.max
                ),
            ));
        }
        Ok(())
    }
}
