//! Rig configuration loading.
//!
//! Strongly-typed configuration for the scan core, loaded with Figment:
//! built-in defaults are merged beneath a user-provided JSON file, and
//! `SCANRIG_`-prefixed environment variables override both (nested keys are
//! separated with `__`, e.g. `SCANRIG_APPLICATION__LOG_LEVEL=debug`).
//!
//! After loading, [`RigConfig::validate`] rejects semantically invalid
//! values so configuration problems fail fast at startup, never mid-scan.
//!
//! # Example
//!
//! ```no_run
//! use scanrig::config::RigConfig;
//!
//! # fn main() -> Result<(), scanrig::config::ConfigError> {
//! let config = RigConfig::load_from("config/rig.json")?;
//! println!("objective: {}", config.objective.name);
//! println!("out_dir: {}", config.out_dir.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hardware::sim::{SimAxis, SimImager};
use crate::hardware::stage::StageHal;
use crate::kinematics::Kinematics;
use crate::planner::{ScanBounds, ScanConfig};
use crate::traits::imager::Imager;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Top-level rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    pub application: ApplicationConfig,
    /// Output directory for scan tiles and the metadata sidecar.
    pub out_dir: PathBuf,
    /// Keep the live video preview running during scans.
    #[serde(default)]
    pub live_video: bool,
    pub objective: ObjectiveConfig,
    pub scan: ScanWindowConfig,
    pub imager: ImagerConfig,
    pub cnc: CncConfig,
    pub kinematics: KinematicsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Objective geometry used to derive tile pitch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    #[serde(default = "default_objective_name")]
    pub name: String,
    /// Micrometers per image pixel at this magnification.
    pub um_per_pixel: f64,
    /// Explicit field-of-view in stage units; derived from the imager
    /// resolution and `um_per_pixel` when absent.
    #[serde(default)]
    pub fov_width: Option<f64>,
    #[serde(default)]
    pub fov_height: Option<f64>,
}

/// Scan area and capture options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWindowConfig {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    /// Fraction of the field-of-view shared between adjacent tiles.
    #[serde(default)]
    pub overlap: f64,
    #[serde(default = "default_x_axis")]
    pub x_axis: String,
    #[serde(default = "default_y_axis")]
    pub y_axis: String,
    #[serde(default)]
    pub overwrite: bool,
    /// HDR exposure bracket in seconds; empty disables bracketing.
    #[serde(default)]
    pub hdr_exposures: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagerConfig {
    /// Imager engine ("sim" is the only in-tree backend).
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_imager_width")]
    pub width: u32,
    #[serde(default = "default_imager_height")]
    pub height: u32,
}

/// Motion controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CncConfig {
    /// Motion engine ("sim" is the only in-tree backend).
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Skip actual motion and capture; bookkeeping only.
    #[serde(default)]
    pub dry: bool,
    /// Home every axis before the first scan move.
    #[serde(default)]
    pub startup_home: bool,
    pub axes: Vec<AxisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,
    pub steps_per_unit: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicsConfig {
    #[serde(default = "default_tsettle_motion_ms")]
    pub tsettle_motion_ms: u64,
    #[serde(default = "default_tsettle_hdr_ms")]
    pub tsettle_hdr_ms: u64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "scanrig".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_objective_name() -> String {
    "10x".to_string()
}

fn default_x_axis() -> String {
    "x".to_string()
}

fn default_y_axis() -> String {
    "y".to_string()
}

fn default_engine() -> String {
    "sim".to_string()
}

fn default_imager_width() -> u32 {
    640
}

fn default_imager_height() -> u32 {
    480
}

fn default_tsettle_motion_ms() -> u64 {
    100
}

fn default_tsettle_hdr_ms() -> u64 {
    200
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: default_app_name(),
                log_level: default_log_level(),
            },
            out_dir: PathBuf::from("scan_out"),
            live_video: false,
            objective: ObjectiveConfig {
                name: default_objective_name(),
                um_per_pixel: 1.0,
                fov_width: None,
                fov_height: None,
            },
            scan: ScanWindowConfig {
                x0: 0.0,
                y0: 0.0,
                x1: 1000.0,
                y1: 1000.0,
                overlap: 0.0,
                x_axis: default_x_axis(),
                y_axis: default_y_axis(),
                overwrite: false,
                hdr_exposures: Vec::new(),
            },
            imager: ImagerConfig {
                engine: default_engine(),
                width: default_imager_width(),
                height: default_imager_height(),
            },
            cnc: CncConfig {
                engine: default_engine(),
                dry: false,
                startup_home: false,
                axes: vec![
                    AxisConfig {
                        name: "x".to_string(),
                        steps_per_unit: 100.0,
                        min: -50_000.0,
                        max: 50_000.0,
                    },
                    AxisConfig {
                        name: "y".to_string(),
                        steps_per_unit: 100.0,
                        min: -50_000.0,
                        max: 50_000.0,
                    },
                ],
            },
            kinematics: KinematicsConfig {
                tsettle_motion_ms: default_tsettle_motion_ms(),
                tsettle_hdr_ms: default_tsettle_hdr_ms(),
            },
        }
    }
}

// ============================================================================
// Loading, validation, and component construction
// ============================================================================

impl RigConfig {
    /// Load from the default location, `config/rig.json`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/rig.json")
    }

    /// Load defaults, then the JSON file at `path`, then `SCANRIG_` env
    /// overrides; validate the result.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed("SCANRIG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log_level '{}'; must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.objective.um_per_pixel.is_finite() && self.objective.um_per_pixel > 0.0) {
            return Err(ConfigError::Validation(format!(
                "objective um_per_pixel must be positive, got {}",
                self.objective.um_per_pixel
            )));
        }
        for fov in [self.objective.fov_width, self.objective.fov_height]
            .into_iter()
            .flatten()
        {
            if !(fov.is_finite() && fov > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "objective field-of-view must be positive, got {}",
                    fov
                )));
            }
        }

        if !(0.0..1.0).contains(&self.scan.overlap) {
            return Err(ConfigError::Validation(format!(
                "scan overlap must be in [0, 1), got {}",
                self.scan.overlap
            )));
        }
        if self.scan.x0 == self.scan.x1 || self.scan.y0 == self.scan.y1 {
            return Err(ConfigError::Validation(
                "scan area has zero extent".to_string(),
            ));
        }
        for exposure in &self.scan.hdr_exposures {
            if !(exposure.is_finite() && *exposure > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "hdr exposure must be positive, got {}",
                    exposure
                )));
            }
        }

        if self.imager.engine != "sim" {
            return Err(ConfigError::Validation(format!(
                "unknown imager engine '{}'",
                self.imager.engine
            )));
        }
        if self.imager.width == 0 || self.imager.height == 0 {
            return Err(ConfigError::Validation(
                "imager resolution must be non-zero".to_string(),
            ));
        }

        if self.cnc.engine != "sim" {
            return Err(ConfigError::Validation(format!(
                "unknown cnc engine '{}'",
                self.cnc.engine
            )));
        }
        if self.cnc.axes.is_empty() {
            return Err(ConfigError::Validation(
                "cnc must define at least one axis".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for axis in &self.cnc.axes {
            if !names.insert(axis.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate axis name '{}'",
                    axis.name
                )));
            }
            if !(axis.steps_per_unit.is_finite() && axis.steps_per_unit > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "axis '{}': steps_per_unit must be positive",
                    axis.name
                )));
            }
            if axis.min >= axis.max {
                return Err(ConfigError::Validation(format!(
                    "axis '{}': travel min {} must be below max {}",
                    axis.name, axis.min, axis.max
                )));
            }
        }
        for scan_axis in [&self.scan.x_axis, &self.scan.y_axis] {
            if !self.cnc.axes.iter().any(|axis| &axis.name == scan_axis) {
                return Err(ConfigError::Validation(format!(
                    "scan axis '{}' is not a configured cnc axis",
                    scan_axis
                )));
            }
        }
        if self.scan.x_axis == self.scan.y_axis {
            return Err(ConfigError::Validation(format!(
                "scan x_axis and y_axis must be different, both are '{}'",
                self.scan.x_axis
            )));
        }

        Ok(())
    }

    /// Effective objective field-of-view in stage units.
    ///
    /// Explicit values win; otherwise derived from the imager resolution and
    /// the objective's per-pixel scale.
    pub fn field_of_view(&self) -> (f64, f64) {
        let derived_w = self.imager.width as f64 * self.objective.um_per_pixel;
        let derived_h = self.imager.height as f64 * self.objective.um_per_pixel;
        (
            self.objective.fov_width.unwrap_or(derived_w),
            self.objective.fov_height.unwrap_or(derived_h),
        )
    }

    /// Planner parameters for the configured scan window.
    pub fn scan_config(&self) -> ScanConfig {
        let (fov_w, fov_h) = self.field_of_view();
        ScanConfig {
            bounds: ScanBounds::new(self.scan.x0, self.scan.y0, self.scan.x1, self.scan.y1),
            fov_w,
            fov_h,
            overlap: self.scan.overlap,
            x_axis: self.scan.x_axis.clone(),
            y_axis: self.scan.y_axis.clone(),
            out_dir: self.out_dir.clone(),
            overwrite: self.scan.overwrite,
            dry: self.cnc.dry,
            hdr_exposures: self.scan.hdr_exposures.clone(),
        }
    }

    /// Build the configured motion HAL.
    pub fn build_stage(&self) -> StageHal {
        let mut stage = StageHal::new();
        for axis in &self.cnc.axes {
            stage.add_axis(Box::new(SimAxis::new(
                axis.name.clone(),
                axis.steps_per_unit,
                axis.min,
                axis.max,
            )));
        }
        stage
    }

    /// Build the configured imager.
    pub fn build_imager(&self) -> Box<dyn Imager> {
        Box::new(SimImager::new(
            self.imager.engine.clone(),
            self.imager.width,
            self.imager.height,
        ))
    }

    pub fn build_kinematics(&self) -> Kinematics {
        Kinematics::new(
            Duration::from_millis(self.kinematics.tsettle_motion_ms),
            Duration::from_millis(self.kinematics.tsettle_hdr_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RigConfig::default();
        config.application.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid log_level"));
    }

    #[test]
    fn test_duplicate_axis_names_rejected() {
        let mut config = RigConfig::default();
        config.cnc.axes.push(AxisConfig {
            name: "x".to_string(),
            steps_per_unit: 10.0,
            min: 0.0,
            max: 1.0,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate axis name"));
    }

    #[test]
    fn test_scan_axis_must_exist() {
        let mut config = RigConfig::default();
        config.scan.x_axis = "theta".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a configured cnc axis"));
    }

    #[test]
    fn test_scan_axes_must_be_distinct() {
        let mut config = RigConfig::default();
        config.scan.y_axis = "x".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be different"));
    }

    #[test]
    fn test_fov_derived_from_pixel_scale() {
        let mut config = RigConfig::default();
        config.imager.width = 800;
        config.imager.height = 600;
        config.objective.um_per_pixel = 0.5;
        assert_eq!(config.field_of_view(), (400.0, 300.0));

        config.objective.fov_width = Some(350.0);
        assert_eq!(config.field_of_view(), (350.0, 300.0));
    }

    #[test]
    fn test_user_json_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(
            &path,
            r#"{
                "out_dir": "/data/scan01",
                "scan": { "x0": 0.0, "y0": 0.0, "x1": 2000.0, "y1": 1000.0, "overlap": 0.1 },
                "objective": { "name": "20x", "um_per_pixel": 0.25 }
            }"#,
        )
        .unwrap();

        let config = RigConfig::load_from(&path).unwrap();
        assert_eq!(config.out_dir, PathBuf::from("/data/scan01"));
        assert_eq!(config.objective.name, "20x");
        assert_eq!(config.scan.overlap, 0.1);
        // Untouched sections keep their defaults.
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.cnc.axes.len(), 2);
    }

    #[test]
    fn test_invalid_json_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(
            &path,
            r#"{ "scan": { "x0": 5.0, "y0": 0.0, "x1": 5.0, "y1": 10.0 } }"#,
        )
        .unwrap();
        let err = RigConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("zero extent"));
    }
}
