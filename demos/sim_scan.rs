//! Full simulated scan: stage worker + kinematics gate + sim imager, with
//! tiles written to a temporary directory.
//!
//! Run with: `cargo run --example sim_scan`

use scanrig::config::RigConfig;
use scanrig::dispatch::{stage_worker, DEFAULT_QUEUE_DEPTH};
use scanrig::planner::Planner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let mut config = RigConfig::default();
    config.out_dir = std::env::temp_dir().join("scanrig_sim_scan");
    config.scan.x1 = 2000.0;
    config.scan.y1 = 1000.0;
    config.scan.overwrite = true;
    config.objective.fov_width = Some(500.0);
    config.objective.fov_height = Some(500.0);
    config.validate()?;

    let (handle, worker) = stage_worker(config.build_stage(), DEFAULT_QUEUE_DEPTH);
    let worker_task = tokio::spawn(worker.run());

    if config.cnc.startup_home {
        let home = handle.home(vec![]).await?;
        println!("homed to {}", home);
    }

    let planner = Planner::new(
        config.scan_config(),
        Some(handle.clone()),
        Some(config.build_imager()),
        config.build_kinematics(),
    )?;
    let report = planner.run().await?;

    println!(
        "scan {} finished: {}/{} tiles, output in {}",
        report.scan_id,
        report.tiles_captured,
        report.tiles_total,
        config.out_dir.display()
    );

    drop(handle);
    worker_task.await?;
    Ok(())
}
