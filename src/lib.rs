//! scanrig: motion HAL and tile-scan planner for a motorized microscope
//! stage.
//!
//! The crate covers the scanning core of the rig:
//! - Per-axis motion abstraction with step/unit conversion, travel limits,
//!   estop latching, and free-run jogs ([`traits::axis`])
//! - A whole-stage motion HAL aggregating named axes ([`hardware::stage`])
//! - A single-consumer command dispatch worker that serializes HAL access
//!   ([`dispatch`])
//! - Settle-time gating between motion and capture ([`kinematics`])
//! - A tile-grid scan planner with pause/resume, dry-run, and HDR
//!   bracketing ([`planner`])
//! - Figment-based configuration with JSON + environment overrides
//!   ([`config`])
//!
//! GUI layers, remote-control shims, image processing, and camera drivers
//! are external collaborators behind the [`traits::Imager`] seam and the
//! planner's event callback.
//!
//! # Example
//!
//! ```no_run
//! use scanrig::config::RigConfig;
//! use scanrig::dispatch::{stage_worker, DEFAULT_QUEUE_DEPTH};
//! use scanrig::planner::Planner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RigConfig::load()?;
//!     let (handle, worker) = stage_worker(config.build_stage(), DEFAULT_QUEUE_DEPTH);
//!     tokio::spawn(worker.run());
//!
//!     let planner = Planner::new(
//!         config.scan_config(),
//!         Some(handle),
//!         Some(config.build_imager()),
//!         config.build_kinematics(),
//!     )?;
//!     let report = planner.run().await?;
//!     println!("captured {}/{} tiles", report.tiles_captured, report.tiles_total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod hardware;
pub mod kinematics;
pub mod planner;
pub mod traits;

// Re-exports for convenience
pub use config::{ConfigError, RigConfig};
pub use dispatch::{stage_worker, StageCommand, StageHandle, StageWorker};
pub use error::{ScanError, ScanResult};
pub use hardware::sim::{SimAxis, SimAxisProbe, SimImager};
pub use hardware::stage::{Position, StageHal};
pub use kinematics::Kinematics;
pub use planner::{
    Planner, ScanBounds, ScanConfig, ScanControl, ScanEvent, ScanReport, ScanState, Tile, TileGrid,
};
pub use traits::{Axis, Frame, Imager, JogDirection, StepScale, TravelRange};
