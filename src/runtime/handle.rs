//! Public handle for interacting with the interpreter thread.

use crate::runtime::config::VmConfig;
use crate::runtime::context::CallContext;
use crate::runtime::error::VmError;
use crate::runtime::runner::{spawn_worker, WorkerCommand, WorkerState};
use crate::runtime::value::{Evaluation, Value};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Whether the worker can take a request right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VmStatus {
    Ready,
    /// Evaluating a request. This includes evaluations whose caller has
    /// already given up; later requests queue behind them.
    Busy,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VmStats {
    /// Requests the worker ran, successfully or not
    pub served: u64,
    /// Requests whose caller stopped waiting before the result was ready.
    /// Those still queued at that point are dropped without running.
    pub abandoned: u64,
}

/// Handle to a Janet interpreter running on its own thread.
///
/// Cloning is cheap and every clone talks to the same worker. Calls from
/// any number of tasks are queued and evaluated one at a time.
#[derive(Clone)]
pub struct Vm {
    inner: Arc<VmInner>,
}

struct VmInner {
    tx: Mutex<Option<mpsc::Sender<WorkerCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    state: Arc<WorkerState>,
    shutdown: CancellationToken,
    next_request: AtomicU64,
    execution_timeout: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Vm {
    /// Start an exclusive VM with the default configuration.
    pub fn new() -> Result<Self, VmError> {
        Self::spawn(VmConfig::default())
    }

    /// Start an exclusive VM. Blocks until the interpreter is initialized.
    pub fn spawn(config: VmConfig) -> Result<Self, VmError> {
        let worker = spawn_worker(&config)?;
        Ok(Self {
            inner: Arc::new(VmInner {
                tx: Mutex::new(Some(worker.tx)),
                thread: Mutex::new(Some(worker.thread)),
                state: worker.state,
                shutdown: worker.shutdown,
                next_request: AtomicU64::new(0),
                execution_timeout: config.execution_timeout,
            }),
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkerCommand>, VmError> {
        lock(&self.inner.tx).clone().ok_or(VmError::Closed)
    }

    /// Evaluate `source` and return its display text with the captured
    /// stdout/stderr.
    ///
    /// A [`VmError::DeadlineExceeded`] or [`VmError::Cancelled`] only means
    /// the caller stopped waiting. A request still queued at that point is
    /// never run; one the worker had already picked up runs to completion
    /// and keeps the VM busy.
    pub async fn evaluate(&self, cx: &CallContext, source: &str) -> Result<Evaluation, VmError> {
        let source = source.to_string();
        self.submit(cx, |id, responder| WorkerCommand::Evaluate {
            id,
            source,
            responder,
        })
        .await
    }

    /// Evaluate `source` and convert the resulting value into a [`Value`].
    pub async fn parse(&self, cx: &CallContext, source: &str) -> Result<Value, VmError> {
        let source = source.to_string();
        self.submit(cx, |id, responder| WorkerCommand::Parse {
            id,
            source,
            responder,
        })
        .await
    }

    async fn submit<T>(
        &self,
        cx: &CallContext,
        command: impl FnOnce(u64, oneshot::Sender<Result<T, VmError>>) -> WorkerCommand,
    ) -> Result<T, VmError> {
        let cx = cx.or_timeout(self.inner.execution_timeout);
        let sender = self.sender()?;
        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();

        cx.race(sender.send(command(id, result_tx)))
            .await?
            .map_err(|_| VmError::Closed)?;
        drop(sender);

        cx.race(result_rx).await?.map_err(|_| VmError::Closed)?
    }

    pub fn status(&self) -> VmStatus {
        if self.is_closed() {
            VmStatus::Closed
        } else if self.inner.state.is_busy() {
            VmStatus::Busy
        } else {
            VmStatus::Ready
        }
    }

    pub fn stats(&self) -> VmStats {
        VmStats {
            served: self.inner.state.served(),
            abandoned: self.inner.state.abandoned(),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.tx).is_none() || self.inner.state.has_exited()
    }

    /// Shut the worker down and wait for it to exit.
    ///
    /// Requests already queued are still served first, and an evaluation in
    /// progress is waited for, however long it runs. Callers still waiting
    /// for queue space get [`VmError::Closed`]. Once this returns the
    /// interpreter has been deinitialized. Closing again is a no-op.
    pub fn close(&self) -> Result<(), VmError> {
        let mut thread = lock(&self.inner.thread);
        drop(lock(&self.inner.tx).take());
        self.inner.shutdown.cancel();

        match thread.take() {
            Some(handle) => handle.join().map_err(|_| VmError::WorkerPanicked),
            None => Ok(()),
        }
    }
}
