//! Error types shared across the scan core.
//!
//! `ScanError` is the single error enum for the motion HAL, kinematics,
//! dispatch, and planner layers. The taxonomy follows how failures propagate:
//!
//! - **`AxisExceeded`**: a soft per-move rejection (travel limit, estop latch,
//!   unpowered stage). The device stays operable; only the offending move is
//!   aborted. The planner catches this, logs it, and skips the tile.
//! - **`Precondition`**: it is unsafe to start or continue an operation
//!   (output-file collision, missing imager, unknown axis name). Raised before
//!   any side effect occurs.
//! - **`Hardware`**: an unexpected device or communication failure. The scan
//!   aborts; the planner attempts a graceful `stop()` before surfacing it.
//! - **`Config`**: invalid or missing configuration, raised at load time and
//!   never mid-scan.
//! - **`Io`**: output-write failures; treated with hardware-fault severity by
//!   the planner.
//!
//! Backend internals build `Hardware` faults out of `anyhow::Error` so they
//! can carry context chains from adapters without widening this enum.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the scan core error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Soft travel-limit style rejection: the one move is aborted, the device
    /// remains operable.
    #[error("axis '{axis}': {reason}")]
    AxisExceeded { axis: String, reason: String },

    /// Unsafe to start or continue; raised before side effects occur.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Unexpected device or communication failure; aborts the scan.
    #[error("hardware fault: {0}")]
    Hardware(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn axis_exceeded(axis: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AxisExceeded {
            axis: axis.into(),
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }

    /// True for the soft per-move rejection the planner is allowed to skip.
    pub fn is_axis_exceeded(&self) -> bool {
        matches!(self, Self::AxisExceeded { .. })
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(err: anyhow::Error) -> Self {
        Self::Hardware(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_exceeded_display() {
        let err = ScanError::axis_exceeded("x", "target 120.0 outside travel [0.0, 100.0]");
        assert_eq!(
            err.to_string(),
            "axis 'x': target 120.0 outside travel [0.0, 100.0]"
        );
        assert!(err.is_axis_exceeded());
    }

    #[test]
    fn test_hardware_from_anyhow() {
        let err: ScanError = anyhow::anyhow!("serial port vanished").into();
        assert!(err.to_string().contains("serial port vanished"));
        assert!(!err.is_axis_exceeded());
    }
}
