//! End-to-end scan pipeline tests: stage worker + kinematics + planner over
//! the simulated backends.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scanrig::dispatch::{stage_worker, StageHandle, DEFAULT_QUEUE_DEPTH};
use scanrig::hardware::sim::{SimAxis, SimAxisProbe, SimImager};
use scanrig::hardware::stage::StageHal;
use scanrig::kinematics::Kinematics;
use scanrig::planner::{Planner, ScanBounds, ScanConfig, ScanEvent, ScanState, Tile};
use scanrig::traits::Imager;
use scanrig::ScanError;

fn sim_stage() -> (StageHal, SimAxisProbe, SimAxisProbe) {
    let x = SimAxis::new("x", 10.0, -10_000.0, 10_000.0);
    let y = SimAxis::new("y", 10.0, -10_000.0, 10_000.0);
    let probe_x = x.probe();
    let probe_y = y.probe();
    let stage = StageHal::new()
        .with_axis(Box::new(x))
        .with_axis(Box::new(y));
    (stage, probe_x, probe_y)
}

fn spawn_stage() -> (StageHandle, SimAxisProbe, SimAxisProbe) {
    let (stage, probe_x, probe_y) = sim_stage();
    let (handle, worker) = stage_worker(stage, DEFAULT_QUEUE_DEPTH);
    tokio::spawn(worker.run());
    (handle, probe_x, probe_y)
}

/// 2000x1000 area with a 500x500 field of view: 4x2 = 8 tiles.
fn eight_tile_config(out_dir: &Path) -> ScanConfig {
    ScanConfig::new(
        ScanBounds::new(0.0, 0.0, 2000.0, 1000.0),
        500.0,
        500.0,
        out_dir,
    )
}

fn fast_kinematics() -> Kinematics {
    Kinematics::new(Duration::ZERO, Duration::ZERO)
}

fn sim_imager() -> Box<dyn Imager> {
    Box::new(SimImager::new("sim0", 16, 16))
}

type EventLog = Arc<Mutex<Vec<ScanEvent>>>;

fn event_collector() -> (EventLog, impl Fn(ScanEvent) + Send + Sync + 'static) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    (events, move |event| {
        sink_events.lock().unwrap().push(event)
    })
}

fn progress_of(events: &EventLog) -> Vec<(usize, usize)> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Progress { done, total } => Some((*done, *total)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_end_to_end_scan_writes_all_tiles_row_major() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, probe_x, probe_y) = spawn_stage();

    let planner = Planner::new(
        eight_tile_config(dir.path()),
        Some(handle),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap();
    let report = planner.run().await.unwrap();

    assert_eq!(report.state, ScanState::Done);
    assert_eq!((report.cols, report.rows), (4, 2));
    assert_eq!(report.tiles_captured, 8);
    assert_eq!(
        report.files,
        vec![
            "c000_r000.jpg",
            "c001_r000.jpg",
            "c002_r000.jpg",
            "c003_r000.jpg",
            "c000_r001.jpg",
            "c001_r001.jpg",
            "c002_r001.jpg",
            "c003_r001.jpg",
        ]
    );
    for name in &report.files {
        assert!(dir.path().join(name).exists(), "missing {}", name);
    }
    assert!(dir.path().join("scan.json").exists());

    // One x and one y command per tile.
    assert_eq!(probe_x.move_count(), 8);
    assert_eq!(probe_y.move_count(), 8);
}

#[tokio::test]
async fn test_axis_exceeded_skips_only_that_tile() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, probe_x, _probe_y) = spawn_stage();

    // Row-major over 4x2 means tile (2, 1) is the 7th x-axis move.
    probe_x.exceed_on_move(7);

    let (events, sink) = event_collector();
    let planner = Planner::new(
        eight_tile_config(dir.path()),
        Some(handle),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap()
    .on_event(sink);
    let report = planner.run().await.unwrap();

    assert_eq!(report.state, ScanState::Done);
    assert_eq!(report.tiles_captured, 7);
    assert_eq!(report.tiles_skipped, vec![Tile::new(2, 1)]);
    assert_eq!(report.files.len(), 7);
    assert!(!dir.path().join("c002_r001.jpg").exists());
    assert!(dir.path().join("c003_r001.jpg").exists());

    // Progress still ticks through every tile.
    assert_eq!(
        progress_of(&events),
        (1..=8).map(|done| (done, 8)).collect::<Vec<_>>()
    );
    // The skip was reported with tile index and position.
    let logs = events.lock().unwrap();
    assert!(logs.iter().any(|event| matches!(
        event,
        ScanEvent::Log(line) if line.contains("c002_r001") && line.contains("skipped")
    )));
}

#[tokio::test]
async fn test_dry_run_matches_live_bookkeeping_with_zero_motion() {
    let dir = tempfile::tempdir().unwrap();

    // Live pass.
    let (live_handle, _px, _py) = spawn_stage();
    let (live_events, live_sink) = event_collector();
    let live_report = Planner::new(
        eight_tile_config(dir.path()),
        Some(live_handle),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap()
    .on_event(live_sink)
    .run()
    .await
    .unwrap();

    // Dry pass, deliberately wired to a real stage so the zero-motion claim
    // is observable.
    let (dry_handle, dry_probe_x, dry_probe_y) = spawn_stage();
    let mut dry_config = eight_tile_config(dir.path());
    dry_config.dry = true;
    let (dry_events, dry_sink) = event_collector();
    let dry_report = Planner::new(dry_config, Some(dry_handle), None, fast_kinematics())
        .unwrap()
        .on_event(dry_sink)
        .run()
        .await
        .unwrap();

    assert_eq!(dry_report.tiles_total, live_report.tiles_total);
    assert_eq!(dry_report.files, live_report.files);
    assert_eq!(progress_of(&dry_events), progress_of(&live_events));
    assert_eq!(dry_probe_x.move_count(), 0);
    assert_eq!(dry_probe_y.move_count(), 0);
}

#[tokio::test]
async fn test_pause_and_resume_completes_each_tile_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, _px, _py) = spawn_stage();

    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let planner = Planner::new(
        eight_tile_config(dir.path()),
        Some(handle),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap();
    let control = planner.control();

    // Pause from inside the progress callback after the third tile.
    let pauser = control.clone();
    let events_sink = events.clone();
    let planner = planner.on_event(move |event| {
        if matches!(event, ScanEvent::Progress { done: 3, .. }) {
            pauser.set_running(false);
        }
        events_sink.lock().unwrap().push(event);
    });

    let scan = tokio::spawn(planner.run());

    // Let the scan reach the pause and sit there.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        progress_of(&events).len(),
        3,
        "no tiles may be processed while paused"
    );

    control.set_running(true);
    let report = scan.await.unwrap().unwrap();

    assert_eq!(report.state, ScanState::Done);
    assert_eq!(report.tiles_captured, 8);
    assert_eq!(
        progress_of(&events),
        (1..=8).map(|done| (done, 8)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_overwrite_false_fails_before_any_motion() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("c002_r001.jpg"), b"previous scan").unwrap();

    let (handle, probe_x, _py) = spawn_stage();
    let planner = Planner::new(
        eight_tile_config(dir.path()),
        Some(handle.clone()),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap();
    let err = planner.run().await.unwrap_err();

    assert!(matches!(err, ScanError::Precondition(_)));
    assert!(err.to_string().contains("c002_r001.jpg"));
    handle.wait_idle().await;
    assert_eq!(probe_x.move_count(), 0);

    // The same collision is fine once overwrite is enabled.
    let mut config = eight_tile_config(dir.path());
    config.overwrite = true;
    let report = Planner::new(config, Some(handle), Some(sim_imager()), fast_kinematics())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(report.tiles_captured, 8);
}

#[tokio::test]
async fn test_hdr_bracketing_writes_one_file_per_exposure() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, _px, _py) = spawn_stage();

    let mut config = ScanConfig::new(
        ScanBounds::new(0.0, 0.0, 1000.0, 500.0),
        500.0,
        500.0,
        dir.path(),
    );
    config.hdr_exposures = vec![0.01, 0.04];

    let report = Planner::new(config, Some(handle), Some(sim_imager()), fast_kinematics())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.tiles_total, 2);
    assert_eq!(
        report.files,
        vec![
            "c000_r000_h00.jpg",
            "c000_r000_h01.jpg",
            "c001_r000_h00.jpg",
            "c001_r000_h01.jpg",
        ]
    );
    for name in &report.files {
        assert!(dir.path().join(name).exists());
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_hardware_fault_aborts_scan() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, probe_x, _py) = spawn_stage();

    // Unlike AxisExceeded, a hardware fault on a move is fatal.
    probe_x.inject_fault_next();

    let planner = Planner::new(
        eight_tile_config(dir.path()),
        Some(handle),
        Some(sim_imager()),
        fast_kinematics(),
    )
    .unwrap();
    let err = planner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::Hardware(_)));
    assert!(logs_contain("stage command failed"));
}
