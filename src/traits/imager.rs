//! Imager seam.
//!
//! The planner consumes frames through this narrow interface; camera driver
//! internals (sensor protocols, debayering, encoders) are out of scope. The
//! synchronous capture path calls [`Imager::get`] once per tile and expects
//! exactly one frame back.
//!
//! Cameras commonly buffer one frame behind current sensor state, so the
//! interface exposes [`Imager::flush`] to discard a stale frame and
//! [`Imager::since_properties_change`] so the kinematics gate can wait out
//! exposure changes before a capture is considered valid.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScanResult;

/// Single captured frame with pixel payload and metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter, for detecting dropped frames.
    pub frame_number: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Exposure the frame was taken with, in seconds.
    pub exposure: f64,
    /// Raw pixel payload; encoding is the backend's concern.
    pub pixel_data: Vec<u8>,
}

/// Camera-facing collaborator of the scan core.
#[async_trait]
pub trait Imager: Send + Sync {
    fn id(&self) -> &str;

    /// (width, height) of frames this imager produces.
    fn resolution(&self) -> (u32, u32);

    /// Capture and return exactly one frame.
    async fn get(&mut self) -> ScanResult<Frame>;

    /// Discard one stale frame from the live buffer, if any.
    async fn flush(&mut self) -> ScanResult<()>;

    /// Time since the last exposure-affecting property change.
    fn since_properties_change(&self) -> Duration;

    /// Current exposure in seconds.
    fn exposure(&self) -> f64;

    /// Change the exposure; restamps the properties-change clock.
    async fn set_exposure(&mut self, seconds: f64) -> ScanResult<()>;
}
