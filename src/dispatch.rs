//! Queue-and-worker command dispatch for the motion HAL.
//!
//! One [`StageWorker`] task owns the [`StageHal`] and consumes commands from
//! a bounded channel one at a time, so at-most-one-in-flight is a structural
//! property of serial consumption rather than a lock. Producers hold a cheap
//! clonable [`StageHandle`]; each submitted command carries a oneshot reply
//! that resolves to the stage position after the command completes.
//!
//! Commands dispatch in FIFO submission order with no reordering or
//! coalescing. A "normal running" gate lets producers pause dispatch without
//! ending the worker's lifecycle, and a pending-command counter exposes
//! idle/busy status so callers can block until the queue drains.
//! `wait_idle` polls at a fixed interval with no hard deadline; callers
//! needing a bounded wait add their own.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{ScanError, ScanResult};
use crate::hardware::stage::{Position, StageHal};
use crate::traits::axis::JogDirection;

/// Poll cadence for the dispatch gate and for `wait_idle`.
const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// Default bound of the command queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// One queued HAL command.
#[derive(Debug)]
pub enum StageCommand {
    MoveAbsolute(Position),
    MoveRelative(Position),
    /// Home the named axes; every axis when empty.
    Home(Vec<String>),
    /// Free-run one axis until the shared done flag is set by the producer.
    Forever {
        axis: String,
        dir: JogDirection,
        done: Arc<AtomicBool>,
    },
    Stop,
    Estop,
    Unestop,
}

struct Dispatch {
    cmd: StageCommand,
    reply: oneshot::Sender<ScanResult<Position>>,
}

struct Shared {
    /// Normal-running gate: when cleared the worker idles without consuming.
    gate: AtomicBool,
    /// Commands submitted but not yet completed.
    pending: AtomicUsize,
}

/// Producer side of the dispatch queue.
#[derive(Clone)]
pub struct StageHandle {
    tx: mpsc::Sender<Dispatch>,
    shared: Arc<Shared>,
}

/// Single consumer that owns the HAL.
pub struct StageWorker {
    hal: StageHal,
    rx: mpsc::Receiver<Dispatch>,
    shared: Arc<Shared>,
}

/// Wire a powered-off [`StageHal`] to a fresh dispatch queue.
///
/// The returned worker must be driven (typically `tokio::spawn(worker.run())`)
/// before submitted commands make progress.
pub fn stage_worker(hal: StageHal, queue_depth: usize) -> (StageHandle, StageWorker) {
    let (tx, rx) = mpsc::channel(queue_depth);
    let shared = Arc::new(Shared {
        gate: AtomicBool::new(true),
        pending: AtomicUsize::new(0),
    });
    (
        StageHandle {
            tx,
            shared: shared.clone(),
        },
        StageWorker { hal, rx, shared },
    )
}

impl StageHandle {
    /// Queue a command and wait for its completion position.
    pub async fn submit(&self, cmd: StageCommand) -> ScanResult<Position> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Dispatch { cmd, reply: reply_tx }).await.is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ScanError::Hardware(anyhow!("stage worker is gone")));
        }
        reply_rx
            .await
            .map_err(|_| ScanError::Hardware(anyhow!("stage worker dropped the command")))?
    }

    pub async fn mv_abs(&self, target: Position) -> ScanResult<Position> {
        self.submit(StageCommand::MoveAbsolute(target)).await
    }

    pub async fn mv_rel(&self, delta: Position) -> ScanResult<Position> {
        self.submit(StageCommand::MoveRelative(delta)).await
    }

    pub async fn home(&self, axes: Vec<String>) -> ScanResult<Position> {
        self.submit(StageCommand::Home(axes)).await
    }

    /// Free-run one axis; resolves with the reconciled position once the
    /// producer sets `done`.
    pub async fn forever(
        &self,
        axis: impl Into<String>,
        dir: JogDirection,
        done: Arc<AtomicBool>,
    ) -> ScanResult<Position> {
        self.submit(StageCommand::Forever {
            axis: axis.into(),
            dir,
            done,
        })
        .await
    }

    pub async fn stop(&self) -> ScanResult<Position> {
        self.submit(StageCommand::Stop).await
    }

    pub async fn estop(&self) -> ScanResult<Position> {
        self.submit(StageCommand::Estop).await
    }

    pub async fn unestop(&self) -> ScanResult<Position> {
        self.submit(StageCommand::Unestop).await
    }

    /// Open or close the normal-running gate. Closing pauses dispatch without
    /// ending the worker.
    pub fn set_running(&self, running: bool) {
        self.shared.gate.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.gate.load(Ordering::SeqCst)
    }

    /// True when no command is queued or executing.
    pub fn is_idle(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst) == 0
    }

    /// Block until the queue drains, polling at a fixed interval.
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            sleep(DISPATCH_POLL).await;
        }
    }
}

impl StageWorker {
    /// Consume commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("stage worker started");
        if let Err(err) = self.hal.on().await {
            warn!(%err, "stage power-on failed");
        }
        while let Some(dispatch) = self.rx.recv().await {
            self.wait_gate().await;
            let result = self.apply(dispatch.cmd).await;
            if let Err(err) = &result {
                warn!(%err, "stage command failed");
            }
            // The producer may have gone away; completion still counts.
            let _ = dispatch.reply.send(result);
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
        if let Err(err) = self.hal.off().await {
            warn!(%err, "stage power-off failed");
        }
        info!("stage worker exited");
    }

    async fn wait_gate(&self) {
        while !self.shared.gate.load(Ordering::SeqCst) {
            sleep(DISPATCH_POLL).await;
        }
    }

    async fn apply(&mut self, cmd: StageCommand) -> ScanResult<Position> {
        match cmd {
            StageCommand::MoveAbsolute(target) => {
                debug!(%target, "dispatch mv_abs");
                self.hal.mv_abs(&target).await
            }
            StageCommand::MoveRelative(delta) => {
                debug!(%delta, "dispatch mv_rel");
                self.hal.mv_rel(&delta).await
            }
            StageCommand::Home(axes) => self.hal.home(&axes).await,
            StageCommand::Forever { axis, dir, done } => {
                self.hal.forever(&axis, dir, done).await
            }
            StageCommand::Stop => {
                self.hal.stop().await?;
                self.hal.pos().await
            }
            StageCommand::Estop => {
                self.hal.estop().await?;
                self.hal.pos().await
            }
            StageCommand::Unestop => {
                self.hal.unestop();
                self.hal.pos().await
            }
        }
    }
}
