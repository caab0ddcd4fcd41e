//! Whole-stage motion HAL.
//!
//! [`StageHal`] owns a mapping from axis name to [`Axis`] backend and layers
//! whole-device operations over per-axis calls: position snapshot, absolute
//! and relative moves, homing, power, and the stop/estop/unestop fan-out.
//!
//! Moves are atomic from the caller's perspective: every requested axis name
//! is validated against the axis set before any axis is commanded. Actual
//! motion is sequential per axis (no synchronized multi-axis trajectory);
//! the reported position after a move is self-consistent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ScanError, ScanResult};
use crate::traits::axis::{Axis, JogDirection};

/// Mapping from axis name to a signed coordinate in units.
///
/// Only axis names present in the owning device's axis set are valid keys;
/// [`StageHal`] enforces this before commanding any axis. Iteration order is
/// the axis-name sort order, so sequential per-axis commands are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position(BTreeMap<String, f64>);

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a position from name/value pairs.
    pub fn of<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    pub fn set(&mut self, axis: impl Into<String>, value: f64) {
        self.0.insert(axis.into(), value);
    }

    pub fn get(&self, axis: &str) -> Option<f64> {
        self.0.get(axis).copied()
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={:.3}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Aggregates named axes into one coordinate-space motion device.
pub struct StageHal {
    axes: BTreeMap<String, Box<dyn Axis>>,
    powered: bool,
}

impl StageHal {
    pub fn new() -> Self {
        Self {
            axes: BTreeMap::new(),
            powered: false,
        }
    }

    pub fn with_axis(mut self, axis: Box<dyn Axis>) -> Self {
        self.add_axis(axis);
        self
    }

    pub fn add_axis(&mut self, axis: Box<dyn Axis>) {
        self.axes.insert(axis.name().to_string(), axis);
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.keys().cloned().collect()
    }

    pub fn is_on(&self) -> bool {
        self.powered
    }

    /// Power the device. A no-op for backends without a power rail.
    pub async fn on(&mut self) -> ScanResult<()> {
        if !self.powered {
            info!(axes = self.axes.len(), "stage powered on");
        }
        self.powered = true;
        Ok(())
    }

    pub async fn off(&mut self) -> ScanResult<()> {
        if self.powered {
            info!("stage powered off");
        }
        self.powered = false;
        Ok(())
    }

    /// Snapshot of every axis' current position.
    pub async fn pos(&self) -> ScanResult<Position> {
        let mut position = Position::new();
        for (name, axis) in &self.axes {
            position.set(name.clone(), axis.position().await?);
        }
        Ok(position)
    }

    /// Move every named axis to an absolute target.
    ///
    /// Validates all requested axis names and the power state before any
    /// axis is commanded, then issues sequential per-axis moves in axis-name
    /// order. Returns the resulting device position.
    pub async fn mv_abs(&mut self, target: &Position) -> ScanResult<Position> {
        self.check_command(target)?;
        for (name, units) in target.iter() {
            debug!(axis = name, target = units, "absolute move");
            self.axis_mut(name)?.move_absolute(units).await?;
        }
        self.pos().await
    }

    /// Move every named axis by a relative delta.
    pub async fn mv_rel(&mut self, delta: &Position) -> ScanResult<Position> {
        self.check_command(delta)?;
        for (name, units) in delta.iter() {
            debug!(axis = name, delta = units, "relative move");
            self.axis_mut(name)?.move_relative(units).await?;
        }
        self.pos().await
    }

    /// Request a graceful halt on every axis.
    pub async fn stop(&mut self) -> ScanResult<()> {
        for axis in self.axes.values_mut() {
            axis.stop().await?;
        }
        Ok(())
    }

    /// Request an immediate halt on every axis.
    pub async fn estop(&mut self) -> ScanResult<()> {
        warn!("emergency stop");
        for axis in self.axes.values_mut() {
            axis.estop().await?;
        }
        Ok(())
    }

    /// Clear the emergency-stop latch on every axis.
    pub fn unestop(&mut self) {
        for axis in self.axes.values_mut() {
            axis.unestop();
        }
    }

    /// Home the named axes (every axis when `axes` is empty) and report the
    /// resulting position.
    pub async fn home(&mut self, axes: &[String]) -> ScanResult<Position> {
        if !self.powered {
            return Err(ScanError::axis_exceeded(
                axes.first().map(String::as_str).unwrap_or("*"),
                "stage is not powered on",
            ));
        }
        let names: Vec<String> = if axes.is_empty() {
            self.axis_names()
        } else {
            for name in axes {
                self.axis(name)?;
            }
            axes.to_vec()
        };
        for name in &names {
            info!(axis = name.as_str(), "homing");
            self.axis_mut(name)?.home().await?;
        }
        self.pos().await
    }

    /// Free-run one axis until `done` is observed; returns the reconciled
    /// device position afterwards.
    pub async fn forever(
        &mut self,
        axis: &str,
        dir: JogDirection,
        done: Arc<AtomicBool>,
    ) -> ScanResult<Position> {
        if !self.powered {
            return Err(ScanError::axis_exceeded(axis, "stage is not powered on"));
        }
        let backend = self.axis_mut(axis)?;
        match dir {
            JogDirection::Positive => backend.forever_pos(done).await?,
            JogDirection::Negative => backend.forever_neg(done).await?,
        };
        self.pos().await
    }

    fn axis(&self, name: &str) -> ScanResult<&dyn Axis> {
        self.axes
            .get(name)
            .map(|axis| axis.as_ref())
            .ok_or_else(|| ScanError::precondition(format!("unknown axis '{}'", name)))
    }

    fn axis_mut(&mut self, name: &str) -> ScanResult<&mut Box<dyn Axis>> {
        self.axes
            .get_mut(name)
            .ok_or_else(|| ScanError::precondition(format!("unknown axis '{}'", name)))
    }

    /// All-or-nothing validation run before any axis is commanded.
    fn check_command(&self, target: &Position) -> ScanResult<()> {
        if target.is_empty() {
            return Err(ScanError::precondition("empty move command"));
        }
        for name in target.axes() {
            self.axis(name)?;
        }
        if !self.powered {
            let first = target.axes().next().unwrap_or("*");
            return Err(ScanError::axis_exceeded(first, "stage is not powered on"));
        }
        Ok(())
    }
}

impl Default for StageHal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimAxis;

    fn xy_stage() -> StageHal {
        StageHal::new()
            .with_axis(Box::new(SimAxis::new("x", 100.0, -1000.0, 1000.0)))
            .with_axis(Box::new(SimAxis::new("y", 100.0, -1000.0, 1000.0)))
    }

    #[tokio::test]
    async fn test_mv_abs_reports_self_consistent_position() {
        let mut stage = xy_stage();
        stage.on().await.unwrap();

        let pos = stage
            .mv_abs(&Position::of([("x", 10.0), ("y", -2.5)]))
            .await
            .unwrap();
        assert_eq!(pos.get("x"), Some(10.0));
        assert_eq!(pos.get("y"), Some(-2.5));
    }

    #[tokio::test]
    async fn test_unknown_axis_rejected_before_motion() {
        let mut stage = xy_stage();
        stage.on().await.unwrap();

        let err = stage
            .mv_abs(&Position::of([("x", 10.0), ("theta", 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Precondition(_)));

        // The valid axis must not have moved.
        let pos = stage.pos().await.unwrap();
        assert_eq!(pos.get("x"), Some(0.0));
    }

    #[tokio::test]
    async fn test_move_before_power_on_is_axis_exceeded() {
        let mut stage = xy_stage();
        let err = stage
            .mv_rel(&Position::of([("x", 1.0)]))
            .await
            .unwrap_err();
        assert!(err.is_axis_exceeded());
    }

    #[tokio::test]
    async fn test_home_reports_reference_position() {
        let mut stage = xy_stage();
        stage.on().await.unwrap();
        stage
            .mv_abs(&Position::of([("x", 50.0), ("y", 25.0)]))
            .await
            .unwrap();

        let pos = stage.home(&[]).await.unwrap();
        assert_eq!(pos.get("x"), Some(0.0));
        assert_eq!(pos.get("y"), Some(0.0));
    }

    #[test]
    fn test_position_display_is_sorted() {
        let pos = Position::of([("y", 2.0), ("x", 1.0)]);
        assert_eq!(pos.to_string(), "x=1.000 y=2.000");
    }
}
