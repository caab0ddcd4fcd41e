//! Capture-readiness gating between motion and imaging.
//!
//! A frame is only valid once the stage has mechanically settled after its
//! last move and the sensor has settled after its last exposure-affecting
//! property change. Rather than sleeping a fixed worst-case delay per tile,
//! [`Kinematics`] tracks elapsed time since each state-affecting change and
//! sleeps only the positive remainder, which shortens scans when consecutive
//! tiles need little or no settle.
//!
//! Both settle durations are mutable at runtime: switching objectives changes
//! the required motion settle, and exposure bracketing changes the HDR settle.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::error::ScanResult;
use crate::traits::imager::Imager;

pub struct Kinematics {
    tsettle_motion: Duration,
    tsettle_hdr: Duration,
    last_motion: Option<Instant>,
}

impl Kinematics {
    pub fn new(tsettle_motion: Duration, tsettle_hdr: Duration) -> Self {
        Self {
            tsettle_motion,
            tsettle_hdr,
            last_motion: None,
        }
    }

    pub fn tsettle_motion(&self) -> Duration {
        self.tsettle_motion
    }

    pub fn tsettle_hdr(&self) -> Duration {
        self.tsettle_hdr
    }

    pub fn set_tsettle_motion(&mut self, tsettle: Duration) {
        self.tsettle_motion = tsettle;
    }

    pub fn set_tsettle_hdr(&mut self, tsettle: Duration) {
        self.tsettle_hdr = tsettle;
    }

    /// Stamp the moment motion last completed. Call after every stage move.
    pub fn note_motion(&mut self) {
        self.last_motion = Some(Instant::now());
    }

    /// Time since the last recorded motion, if any motion happened yet.
    pub fn since_last_motion(&self) -> Option<Duration> {
        self.last_motion.map(|at| at.elapsed())
    }

    /// Block until a capture taken now would be valid.
    ///
    /// Sleeps any positive remainder of the motion settle, then of the
    /// exposure settle, then optionally discards one stale frame from the
    /// imager's live buffer so the caller's next [`Imager::get`] returns a
    /// frame exposed under current sensor state.
    pub async fn wait_imaging_ok<I>(&self, imager: &mut I, flush_image: bool) -> ScanResult<()>
    where
        I: Imager + ?Sized,
    {
        if let Some(elapsed) = self.since_last_motion() {
            if elapsed < self.tsettle_motion {
                let remaining = self.tsettle_motion - elapsed;
                trace!(?remaining, "motion settle");
                sleep(remaining).await;
            }
        }

        let since_props = imager.since_properties_change();
        if since_props < self.tsettle_hdr {
            let remaining = self.tsettle_hdr - since_props;
            trace!(?remaining, "exposure settle");
            sleep(remaining).await;
        }

        if flush_image {
            imager.flush().await?;
        }
        Ok(())
    }
}

impl Default for Kinematics {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimImager;

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_motion_settle() {
        let mut kinematics = Kinematics::new(Duration::from_millis(100), Duration::ZERO);
        let mut imager = SimImager::new("sim0", 8, 8);

        kinematics.note_motion();
        let before = Instant::now();
        kinematics.wait_imaging_ok(&mut imager, false).await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_settle_is_not_repaid() {
        let mut kinematics = Kinematics::new(Duration::from_millis(100), Duration::ZERO);
        let mut imager = SimImager::new("sim0", 8, 8);

        kinematics.note_motion();
        sleep(Duration::from_millis(80)).await;

        let before = Instant::now();
        kinematics.wait_imaging_ok(&mut imager, false).await.unwrap();
        // Only the 20ms remainder is slept, not the full settle.
        assert_eq!(before.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_motion_yet_skips_motion_settle() {
        let kinematics = Kinematics::new(Duration::from_secs(10), Duration::ZERO);
        let mut imager = SimImager::new("sim0", 8, 8);

        let before = Instant::now();
        kinematics.wait_imaging_ok(&mut imager, false).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_exposure_settle_and_flushes() {
        let kinematics = Kinematics::new(Duration::ZERO, Duration::from_millis(150));
        let mut imager = SimImager::new("sim0", 8, 8);

        imager.set_exposure(0.5).await.unwrap();
        let before = Instant::now();
        kinematics.wait_imaging_ok(&mut imager, true).await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_millis(150));

        // The stale pre-change frame was flushed.
        let frame = imager.get().await.unwrap();
        assert_eq!(frame.exposure, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_mutable_at_runtime() {
        let mut kinematics = Kinematics::new(Duration::from_millis(100), Duration::ZERO);
        let mut imager = SimImager::new("sim0", 8, 8);

        kinematics.set_tsettle_motion(Duration::from_millis(300));
        kinematics.note_motion();

        let before = Instant::now();
        kinematics.wait_imaging_ok(&mut imager, false).await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_millis(300));
    }
}
