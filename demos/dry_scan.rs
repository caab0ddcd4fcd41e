//! Dry-run scan demo: exercises grid layout, filenames, and progress
//! reporting with zero hardware traffic.
//!
//! Run with: `cargo run --example dry_scan`

use scanrig::kinematics::Kinematics;
use scanrig::planner::{Planner, ScanBounds, ScanConfig, ScanEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = ScanConfig::new(
        ScanBounds::new(0.0, 0.0, 2000.0, 1000.0),
        500.0,
        500.0,
        "scan_out",
    );
    config.dry = true;

    let planner = Planner::new(config, None, None, Kinematics::default())?
        .on_event(|event| match event {
            ScanEvent::Log(line) => println!("[log] {}", line),
            ScanEvent::Progress { done, total } => println!("[progress] {}/{}", done, total),
        });

    let report = planner.run().await?;
    println!(
        "dry scan {}: {} tiles planned, first file {:?}",
        report.scan_id,
        report.tiles_total,
        report.files.first()
    );
    Ok(())
}
