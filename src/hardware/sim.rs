//! Simulated stage and imager backends.
//!
//! No physical hardware is required: [`SimAxis`] models a stepper axis with a
//! firmware step register, and [`SimImager`] produces deterministic synthetic
//! frames with a one-frame-behind live buffer. Both support the failure
//! injection and call logging the integration tests rely on, reachable
//! through [`SimAxisProbe`] after the axis has been handed to a
//! [`crate::hardware::StageHal`].
//!
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`, so the
//! backends cooperate with paused-clock tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{ScanError, ScanResult};
use crate::traits::axis::{Axis, StepScale, TravelRange, FOREVER_POLL, RECONCILE_EVERY};
use crate::traits::imager::{Frame, Imager};

/// Default firmware free-run rate, in steps per poll interval.
const DEFAULT_JOG_STEPS_PER_POLL: i64 = 25;

struct SimAxisShared {
    /// Intended position in steps; fractional accumulator. Hardware writes
    /// truncate this toward zero into `hw_steps`.
    net: Mutex<f64>,
    /// Firmware step register, the source of truth during free-run moves.
    hw_steps: AtomicI64,
    estopped: AtomicBool,
    fail_next: AtomicBool,
    /// 1-based move ordinal to reject with `AxisExceeded`; 0 = disarmed.
    exceed_on_move: AtomicU64,
    moves_seen: AtomicU64,
    calls: Mutex<Vec<String>>,
}

/// Simulated stepper axis.
pub struct SimAxis {
    name: String,
    scale: StepScale,
    travel: TravelRange,
    latency: Duration,
    jog_steps_per_poll: i64,
    shared: Arc<SimAxisShared>,
}

/// Shared view into a [`SimAxis`] for tests, usable after the axis has been
/// boxed into a stage.
#[derive(Clone)]
pub struct SimAxisProbe {
    shared: Arc<SimAxisShared>,
}

impl SimAxisProbe {
    pub fn call_log(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.shared.calls.lock().unwrap().clear();
    }

    /// Number of movement commands seen so far.
    pub fn move_count(&self) -> u64 {
        self.shared.moves_seen.load(Ordering::SeqCst)
    }

    /// Current firmware step register value.
    pub fn hw_steps(&self) -> i64 {
        self.shared.hw_steps.load(Ordering::SeqCst)
    }

    /// Fail the next operation with a hardware fault.
    pub fn inject_fault_next(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    /// Reject the n-th movement command (1-based) with `AxisExceeded`.
    pub fn exceed_on_move(&self, ordinal: u64) {
        self.shared.exceed_on_move.store(ordinal, Ordering::SeqCst);
    }
}

impl SimAxis {
    pub fn new(name: impl Into<String>, steps_per_unit: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            scale: StepScale::new(steps_per_unit),
            travel: TravelRange::new(min, max),
            latency: Duration::ZERO,
            jog_steps_per_poll: DEFAULT_JOG_STEPS_PER_POLL,
            shared: Arc::new(SimAxisShared {
                net: Mutex::new(0.0),
                hw_steps: AtomicI64::new(0),
                estopped: AtomicBool::new(false),
                fail_next: AtomicBool::new(false),
                exceed_on_move: AtomicU64::new(0),
                moves_seen: AtomicU64::new(0),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulated per-command latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Free-run advance per poll interval, in steps.
    pub fn with_jog_steps(mut self, steps_per_poll: i64) -> Self {
        self.jog_steps_per_poll = steps_per_poll;
        self
    }

    pub fn probe(&self) -> SimAxisProbe {
        SimAxisProbe {
            shared: self.shared.clone(),
        }
    }

    fn record(&self, call: String) {
        self.shared.calls.lock().unwrap().push(call);
    }

    /// Pre-move bookkeeping and injected failures.
    fn admit_move(&self, target_units: f64) -> ScanResult<()> {
        let ordinal = self.shared.moves_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.exceed_on_move.load(Ordering::SeqCst) == ordinal {
            return Err(ScanError::axis_exceeded(
                &self.name,
                format!("target {:.3} rejected by travel guard", target_units),
            ));
        }
        if self.shared.estopped.load(Ordering::SeqCst) {
            return Err(ScanError::axis_exceeded(&self.name, "emergency stop latched"));
        }
        self.check_travel(target_units)?;
        if self.shared.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::Hardware(anyhow!(
                "injected fault on axis '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Commit an intended position: keep the fractional accumulator, write
    /// the truncated step count to the firmware register.
    fn commit_steps(&self, net_steps: f64) {
        let mut net = self.shared.net.lock().unwrap();
        *net = net_steps;
        self.shared
            .hw_steps
            .store(net_steps.trunc() as i64, Ordering::SeqCst);
    }

    fn net_steps(&self) -> f64 {
        *self.shared.net.lock().unwrap()
    }

    async fn forever(&mut self, done: Arc<AtomicBool>, direction: i64) -> ScanResult<f64> {
        if self.shared.estopped.load(Ordering::SeqCst) {
            return Err(ScanError::axis_exceeded(&self.name, "emergency stop latched"));
        }
        let step_min = self.scale.to_steps(self.travel.min.max(i64::MIN as f64));
        let step_max = self.scale.to_steps(self.travel.max.min(i64::MAX as f64));

        let mut iterations: u32 = 0;
        while !done.load(Ordering::SeqCst) {
            sleep(FOREVER_POLL).await;
            // Firmware free-runs; the register is what actually moved.
            let current = self.shared.hw_steps.load(Ordering::SeqCst);
            let next = (current + direction * self.jog_steps_per_poll).clamp(step_min, step_max);
            self.shared.hw_steps.store(next, Ordering::SeqCst);

            iterations += 1;
            if iterations % RECONCILE_EVERY == 0 {
                let hw = self.shared.hw_steps.load(Ordering::SeqCst);
                *self.shared.net.lock().unwrap() = hw as f64;
            }
        }

        // Exact step count is unknowable mid-run; reconcile once more now
        // that the firmware has halted.
        let hw = self.shared.hw_steps.load(Ordering::SeqCst);
        *self.shared.net.lock().unwrap() = hw as f64;
        let units = self.scale.to_units(hw);
        debug!(axis = self.name.as_str(), position = units, "free-run ended");
        Ok(units)
    }
}

#[async_trait]
impl Axis for SimAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> StepScale {
        self.scale
    }

    fn travel(&self) -> TravelRange {
        self.travel
    }

    async fn position(&self) -> ScanResult<f64> {
        Ok(self.net_steps() / self.scale.steps_per_unit())
    }

    async fn move_absolute(&mut self, units: f64) -> ScanResult<()> {
        self.record(format!("move_absolute {:.3}", units));
        self.admit_move(units)?;
        sleep(self.latency).await;
        self.commit_steps(units * self.scale.steps_per_unit());
        Ok(())
    }

    async fn move_relative(&mut self, units: f64) -> ScanResult<()> {
        self.record(format!("move_relative {:.3}", units));
        let target = self.net_steps() / self.scale.steps_per_unit() + units;
        self.admit_move(target)?;
        sleep(self.latency).await;
        self.commit_steps(self.net_steps() + units * self.scale.steps_per_unit());
        Ok(())
    }

    async fn home(&mut self) -> ScanResult<()> {
        self.record("home".to_string());
        if self.shared.estopped.load(Ordering::SeqCst) {
            return Err(ScanError::axis_exceeded(&self.name, "emergency stop latched"));
        }
        sleep(self.latency).await;
        self.commit_steps(0.0);
        Ok(())
    }

    async fn stop(&mut self) -> ScanResult<()> {
        self.record("stop".to_string());
        Ok(())
    }

    async fn estop(&mut self) -> ScanResult<()> {
        self.record("estop".to_string());
        self.shared.estopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unestop(&mut self) {
        self.record("unestop".to_string());
        self.shared.estopped.store(false, Ordering::SeqCst);
    }

    async fn forever_pos(&mut self, done: Arc<AtomicBool>) -> ScanResult<f64> {
        self.record("forever_pos".to_string());
        self.forever(done, 1).await
    }

    async fn forever_neg(&mut self, done: Arc<AtomicBool>) -> ScanResult<f64> {
        self.record("forever_neg".to_string());
        self.forever(done, -1).await
    }
}

/// Simulated imager with a one-frame-behind live buffer.
///
/// `set_exposure` leaves one frame taken with the previous settings in the
/// buffer, the way real cameras lag one frame behind a property change;
/// `flush` discards it.
pub struct SimImager {
    id: String,
    width: u32,
    height: u32,
    exposure: f64,
    frame_counter: u64,
    last_props_change: Instant,
    buffered: Option<Frame>,
    latency: Duration,
}

impl SimImager {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            exposure: 0.01,
            frame_counter: 0,
            last_props_change: Instant::now(),
            buffered: None,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_counter
    }

    fn synth(&mut self) -> Frame {
        self.frame_counter += 1;
        let mut pixel_data = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixel_data.push((x.wrapping_add(y).wrapping_add(self.frame_counter as u32) & 0xff) as u8);
            }
        }
        Frame {
            frame_number: self.frame_counter,
            width: self.width,
            height: self.height,
            exposure: self.exposure,
            pixel_data,
        }
    }
}

#[async_trait]
impl Imager for SimImager {
    fn id(&self) -> &str {
        &self.id
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn get(&mut self) -> ScanResult<Frame> {
        sleep(self.latency).await;
        if let Some(stale) = self.buffered.take() {
            return Ok(stale);
        }
        Ok(self.synth())
    }

    async fn flush(&mut self) -> ScanResult<()> {
        if self.buffered.take().is_some() {
            debug!(imager = self.id.as_str(), "flushed stale frame");
        }
        Ok(())
    }

    fn since_properties_change(&self) -> Duration {
        self.last_props_change.elapsed()
    }

    fn exposure(&self) -> f64 {
        self.exposure
    }

    async fn set_exposure(&mut self, seconds: f64) -> ScanResult<()> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(ScanError::precondition(format!(
                "exposure must be a positive finite number, got {}",
                seconds
            )));
        }
        // One frame exposed with the old settings stays in the live buffer.
        let stale = self.synth();
        self.buffered = Some(stale);
        self.exposure = seconds;
        self.last_props_change = Instant::now();
        Ok(())
    }
}
