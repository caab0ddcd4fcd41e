//! Scan planner: tile sequencing, pause/resume, and capture bookkeeping.
//!
//! The planner walks the [`TileGrid`] in row-major order and, per tile,
//! commands an absolute stage move through the dispatch handle, waits for the
//! [`Kinematics`] gate, takes exactly one frame per capture from the imager,
//! and writes it under the deterministic tile filename. Progress and log
//! lines are reported through a single caller-supplied event callback.
//!
//! State machine: `Init -> Running -> (Paused <-> Running)* -> Done | Aborted`.
//!
//! Soft-error policy: an `AxisExceeded` raised while processing a tile is
//! logged and that tile's capture is skipped (no retry); the scan continues.
//! Any other error aborts the scan after a best-effort graceful `stop()` of
//! the stage.

pub mod grid;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::StageHandle;
use crate::error::{ScanError, ScanResult};
use crate::hardware::stage::Position;
use crate::kinematics::Kinematics;
use crate::traits::imager::Imager;

pub use self::grid::{ScanBounds, Tile, TileGrid};

/// Poll cadence while paused.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Everything the planner needs to lay out and execute one scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub bounds: ScanBounds,
    /// Objective field-of-view along the scan axes, in stage units.
    pub fov_w: f64,
    pub fov_h: f64,
    /// Fractional pitch reduction so adjacent captures share a border.
    pub overlap: f64,
    /// Stage axis commanded for tile columns.
    pub x_axis: String,
    /// Stage axis commanded for tile rows.
    pub y_axis: String,
    pub out_dir: PathBuf,
    /// When false, a pre-existing output file fails the scan before any
    /// motion occurs.
    pub overwrite: bool,
    /// Exercise all bookkeeping with zero HAL motion or capture calls.
    pub dry: bool,
    /// HDR exposure bracket in seconds; empty means a single capture per
    /// tile.
    pub hdr_exposures: Vec<f64>,
}

impl ScanConfig {
    pub fn new(bounds: ScanBounds, fov_w: f64, fov_h: f64, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            bounds,
            fov_w,
            fov_h,
            overlap: 0.0,
            x_axis: "x".to_string(),
            y_axis: "y".to_string(),
            out_dir: out_dir.into(),
            overwrite: false,
            dry: false,
            hdr_exposures: Vec::new(),
        }
    }
}

/// Events delivered to the progress/log sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Log(String),
    Progress { done: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Init,
    Running,
    Paused,
    Done,
    Aborted,
}

/// Shared pause/abort switches for a running scan.
///
/// `set_running(false)` suspends the planner before the next motion/capture
/// step (never mid-capture); `set_running(true)` resumes from the next
/// unprocessed tile. `request_abort` ends the scan at the next loop boundary.
#[derive(Clone)]
pub struct ScanControl {
    running: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl ScanControl {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Outcome summary, also persisted as the `scan.json` sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub state: ScanState,
    pub cols: u32,
    pub rows: u32,
    pub tiles_total: usize,
    pub tiles_captured: usize,
    pub tiles_skipped: Vec<Tile>,
    pub files: Vec<String>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

type EventSink = Arc<dyn Fn(ScanEvent) + Send + Sync>;

pub struct Planner {
    config: ScanConfig,
    grid: TileGrid,
    stage: Option<StageHandle>,
    imager: Option<Box<dyn Imager>>,
    kinematics: Kinematics,
    control: ScanControl,
    events: EventSink,
    state: ScanState,
}

impl Planner {
    /// Lay out the tile grid and prepare a scan.
    ///
    /// `stage` and `imager` may be `None` only for dry runs.
    pub fn new(
        config: ScanConfig,
        stage: Option<StageHandle>,
        imager: Option<Box<dyn Imager>>,
        kinematics: Kinematics,
    ) -> ScanResult<Self> {
        let grid = TileGrid::plan(&config.bounds, config.fov_w, config.fov_h, config.overlap)?;
        Ok(Self {
            config,
            grid,
            stage,
            imager,
            kinematics,
            control: ScanControl::new(),
            events: Arc::new(default_sink),
            state: ScanState::Init,
        })
    }

    /// Install the progress/log sink.
    ///
    /// The callback runs on the planner's worker task and must not block it
    /// beyond a bounded time.
    pub fn on_event(mut self, sink: impl Fn(ScanEvent) + Send + Sync + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    /// Pause/abort switches, clonable before `run` consumes the planner.
    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Every output filename the scan will produce, in capture order.
    pub fn planned_files(&self) -> Vec<String> {
        self.grid
            .tiles()
            .flat_map(|tile| self.tile_filenames(tile))
            .collect()
    }

    /// Execute the scan to completion.
    ///
    /// Returns the report with state `Done`, or `Aborted` when the operator
    /// requested an abort. Precondition and hardware faults return `Err`
    /// after a best-effort graceful stage stop.
    pub async fn run(mut self) -> ScanResult<ScanReport> {
        let scan_id = Uuid::new_v4();
        let started = Utc::now();
        match self.execute(scan_id, started).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.state = ScanState::Aborted;
                self.emit(ScanEvent::Log(format!("scan {} aborted: {}", scan_id, err)));
                self.best_effort_stop().await;
                Err(err)
            }
        }
    }

    async fn execute(&mut self, scan_id: Uuid, started: DateTime<Utc>) -> ScanResult<ScanReport> {
        self.preflight().await?;
        self.state = ScanState::Running;

        let total = self.grid.tile_count();
        self.emit(ScanEvent::Log(format!(
            "scan {}: {}x{} = {} tiles{} -> {}",
            scan_id,
            self.grid.cols(),
            self.grid.rows(),
            total,
            if self.config.dry { " (dry run)" } else { "" },
            self.config.out_dir.display()
        )));

        let mut captured = 0usize;
        let mut skipped: Vec<Tile> = Vec::new();
        let mut files: Vec<String> = Vec::new();

        let tiles: Vec<Tile> = self.grid.tiles().collect();
        for (index, tile) in tiles.into_iter().enumerate() {
            self.pause_point().await;
            if self.control.abort_requested() {
                self.state = ScanState::Aborted;
                self.emit(ScanEvent::Log(format!(
                    "scan {} aborted by operator at tile {}/{}",
                    scan_id, index, total
                )));
                break;
            }

            match self.process_tile(tile).await {
                Ok(tile_files) => {
                    captured += 1;
                    files.extend(tile_files);
                }
                Err(err) if err.is_axis_exceeded() => {
                    let (cx, cy) = self.grid.center(tile);
                    self.emit(ScanEvent::Log(format!(
                        "tile c{:03}_r{:03} at ({:.1}, {:.1}) skipped: {}",
                        tile.col, tile.row, cx, cy, err
                    )));
                    skipped.push(tile);
                }
                Err(err) => return Err(err),
            }

            self.emit(ScanEvent::Progress {
                done: index + 1,
                total,
            });
        }

        if self.state != ScanState::Aborted {
            self.state = ScanState::Done;
        } else {
            self.best_effort_stop().await;
        }

        let report = ScanReport {
            scan_id,
            state: self.state,
            cols: self.grid.cols(),
            rows: self.grid.rows(),
            tiles_total: total,
            tiles_captured: captured,
            tiles_skipped: skipped,
            files,
            started,
            finished: Utc::now(),
        };

        if !self.config.dry {
            self.write_sidecar(&report).await?;
        }
        self.emit(ScanEvent::Log(format!(
            "scan {} {}: {}/{} tiles captured, {} skipped",
            scan_id,
            if self.state == ScanState::Done {
                "complete"
            } else {
                "aborted"
            },
            captured,
            total,
            report.tiles_skipped.len()
        )));
        Ok(report)
    }

    /// Fail fast before any side effect.
    async fn preflight(&mut self) -> ScanResult<()> {
        if self.config.dry {
            return Ok(());
        }
        if self.stage.is_none() {
            return Err(ScanError::precondition("scan requires a stage"));
        }
        if self.imager.is_none() {
            return Err(ScanError::precondition("scan requires an imager"));
        }
        tokio::fs::create_dir_all(&self.config.out_dir).await?;
        if !self.config.overwrite {
            for name in self.planned_files() {
                let path = self.config.out_dir.join(&name);
                if path.exists() {
                    return Err(ScanError::precondition(format!(
                        "output file '{}' already exists and overwrite is disabled",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Suspend before the next motion/capture step while pause is requested.
    async fn pause_point(&mut self) {
        if self.control.is_running() {
            return;
        }
        self.state = ScanState::Paused;
        self.emit(ScanEvent::Log("scan paused".to_string()));
        while !self.control.is_running() && !self.control.abort_requested() {
            sleep(PAUSE_POLL).await;
        }
        if self.control.is_running() {
            self.state = ScanState::Running;
            self.emit(ScanEvent::Log("scan resumed".to_string()));
        }
    }

    /// Move to a tile and capture it; dry mode only does the bookkeeping.
    async fn process_tile(&mut self, tile: Tile) -> ScanResult<Vec<String>> {
        let (cx, cy) = self.grid.center(tile);

        if self.config.dry {
            debug!(col = tile.col, row = tile.row, cx, cy, "dry tile");
            return Ok(self.tile_filenames(tile));
        }

        let stage = self
            .stage
            .as_ref()
            .ok_or_else(|| ScanError::precondition("scan requires a stage"))?;
        let mut target = Position::new();
        target.set(self.config.x_axis.clone(), cx);
        target.set(self.config.y_axis.clone(), cy);
        debug!(col = tile.col, row = tile.row, %target, "tile move");
        stage.mv_abs(target).await?;
        self.kinematics.note_motion();

        let imager = self
            .imager
            .as_mut()
            .ok_or_else(|| ScanError::precondition("scan requires an imager"))?;

        let mut written = Vec::new();
        if self.config.hdr_exposures.is_empty() {
            self.kinematics.wait_imaging_ok(&mut **imager, false).await?;
            let frame = imager.get().await?;
            let name = TileGrid::filename(tile, None);
            tokio::fs::write(self.config.out_dir.join(&name), &frame.pixel_data).await?;
            written.push(name);
        } else {
            let exposures = self.config.hdr_exposures.clone();
            for (index, exposure) in exposures.into_iter().enumerate() {
                imager.set_exposure(exposure).await?;
                // The exposure just changed, so flush the one stale frame.
                self.kinematics.wait_imaging_ok(&mut **imager, true).await?;
                let frame = imager.get().await?;
                let name = TileGrid::filename(tile, Some(index as u32));
                tokio::fs::write(self.config.out_dir.join(&name), &frame.pixel_data).await?;
                written.push(name);
            }
        }
        Ok(written)
    }

    fn tile_filenames(&self, tile: Tile) -> Vec<String> {
        if self.config.hdr_exposures.is_empty() {
            vec![TileGrid::filename(tile, None)]
        } else {
            (0..self.config.hdr_exposures.len())
                .map(|index| TileGrid::filename(tile, Some(index as u32)))
                .collect()
        }
    }

    async fn write_sidecar(&self, report: &ScanReport) -> ScanResult<()> {
        let path = self.config.out_dir.join("scan.json");
        let body = serde_json::to_vec_pretty(report).map_err(|err| ScanError::Hardware(err.into()))?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    /// Graceful stop, never estop: faults here are already being reported.
    async fn best_effort_stop(&self) {
        if self.config.dry {
            return;
        }
        if let Some(stage) = &self.stage {
            let _ = stage.stop().await;
        }
    }

    fn emit(&self, event: ScanEvent) {
        (self.events)(event);
    }
}

fn default_sink(event: ScanEvent) {
    match event {
        ScanEvent::Log(line) => info!("{}", line),
        ScanEvent::Progress { done, total } => debug!(done, total, "scan progress"),
    }
}
