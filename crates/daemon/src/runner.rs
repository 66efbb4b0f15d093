// Task runner: one worker draining an unbounded FIFO of jobs.
//
// The worker is started on the first `submit`, waits up to `idle_timeout` for
// each next job, and asks its host whether it may stop when that wait expires
// with nothing queued. A stopped worker parks its handler and receiver; the
// next `submit` restarts it. Parking and submission share one lock, so a job
// sent while the worker is deciding to park is never stranded.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

// ── Traits ──────────────────────────────────────────────────────────

/// Executes jobs one at a time on the runner's worker.
pub trait TaskHandler: Send + 'static {
    type Task: Send + 'static;

    fn handle(&mut self, task: Self::Task) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// The process hosting the runner.
pub trait RunnerHost: Send + Sync + 'static {
    /// Called after a full idle timeout with an empty queue. Returning `true`
    /// lets the worker stop until the next submission.
    fn ready_to_stop(&self) -> bool;
}

/// Host that always lets an idle worker stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopWhenIdle;

impl RunnerHost for StopWhenIdle {
    fn ready_to_stop(&self) -> bool {
        true
    }
}

// ── Configuration / errors ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub idle_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_millis(1000) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerError {
    /// Created outside a tokio runtime.
    NoRuntime,
    /// `shutdown` was called; no further jobs are accepted.
    ShutDown,
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRuntime => write!(f, "task runner: no tokio runtime available"),
            Self::ShutDown => write!(f, "task runner: shut down"),
        }
    }
}

impl std::error::Error for RunnerError {}

// ── Runner ──────────────────────────────────────────────────────────

enum WorkerState<H: TaskHandler> {
    Running,
    Idle { handler: H, rx: mpsc::UnboundedReceiver<H::Task> },
    /// Exited after shutdown; never restarted.
    Stopped,
}

struct Shared<H: TaskHandler, R: RunnerHost> {
    state: Mutex<WorkerState<H>>,
    tx: mpsc::UnboundedSender<H::Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
    host: R,
    config: RunnerConfig,
    runtime: Handle,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl<H: TaskHandler, R: RunnerHost> Shared<H, R> {
    fn lock_state(&self) -> MutexGuard<'_, WorkerState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a single-worker task runner. Cheap to clone.
pub struct TaskRunner<H: TaskHandler, R: RunnerHost = StopWhenIdle> {
    shared: Arc<Shared<H, R>>,
}

impl<H: TaskHandler, R: RunnerHost> Clone for TaskRunner<H, R> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<H: TaskHandler> TaskRunner<H, StopWhenIdle> {
    pub fn new(handler: H, config: RunnerConfig) -> Result<Self, RunnerError> {
        Self::with_host(handler, StopWhenIdle, config)
    }
}

impl<H: TaskHandler, R: RunnerHost> TaskRunner<H, R> {
    /// Create a runner bound to the current tokio runtime. The worker is not
    /// started until the first job is submitted.
    pub fn with_host(handler: H, host: R, config: RunnerConfig) -> Result<Self, RunnerError> {
        let runtime = Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::Idle { handler, rx }),
                tx,
                worker: Mutex::new(None),
                host,
                config,
                runtime,
                shut_down: AtomicBool::new(false),
                shutdown_tx,
            }),
        })
    }

    /// Queue a job. Never blocks; starts the worker if it is not running.
    pub fn submit(&self, task: H::Task) -> Result<(), RunnerError> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(RunnerError::ShutDown);
        }

        let mut state = self.shared.lock_state();
        self.shared.tx.send(task).map_err(|_| RunnerError::ShutDown)?;

        if matches!(*state, WorkerState::Idle { .. }) {
            if let WorkerState::Idle { handler, rx } =
                std::mem::replace(&mut *state, WorkerState::Running)
            {
                debug!("starting task runner worker");
                let worker = worker_loop(Arc::clone(&self.shared), handler, rx);
                *self.shared.lock_worker() = Some(self.shared.runtime.spawn(worker));
            }
        }

        Ok(())
    }

    /// Whether the worker is currently started. `false` once it has parked or
    /// exited after `shutdown`.
    pub fn is_running(&self) -> bool {
        matches!(*self.shared.lock_state(), WorkerState::Running)
    }

    /// Stop accepting jobs. An in-flight job finishes; queued jobs that have
    /// not started are dropped.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("task runner shutting down");
        let _ = self.shared.shutdown_tx.send(true);
    }

    /// Wait for the worker to exit, whether it parked or was shut down.
    pub async fn join(&self) {
        let handle = self.shared.lock_worker().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "task runner worker ended abnormally");
            }
        }
    }
}

async fn worker_loop<H: TaskHandler, R: RunnerHost>(
    shared: Arc<Shared<H, R>>,
    mut handler: H,
    mut rx: mpsc::UnboundedReceiver<H::Task>,
) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let mut job: u64 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            next = tokio::time::timeout(shared.config.idle_timeout, rx.recv()) => next,
        };

        let task = match next {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(_elapsed) => {
                if !shared.host.ready_to_stop() {
                    continue;
                }
                // A job may have been sent between the timeout and this lock.
                let mut state = shared.lock_state();
                match rx.try_recv() {
                    Ok(task) => task,
                    Err(mpsc::error::TryRecvError::Empty) => {
                        *state = WorkerState::Idle { handler, rx };
                        debug!(jobs = job, "task runner idle, worker parked");
                        return;
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        *state = WorkerState::Stopped;
                        return;
                    }
                }
            }
        };

        job += 1;
        run_one(&mut handler, task, job).await;
    }

    *shared.lock_state() = WorkerState::Stopped;
    debug!(jobs = job, "task runner worker stopped");
}

async fn run_one<H: TaskHandler>(handler: &mut H, task: H::Task, job: u64) {
    debug!(job, "task started");
    match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
        Ok(Ok(())) => debug!(job, "task finished"),
        Ok(Err(e)) => error!(job, error = %format!("{e:#}"), "task failed"),
        Err(_) => error!(job, "task panicked"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
