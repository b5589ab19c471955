//! Worker thread that owns the Janet interpreter.
//!
//! Janet keeps its VM state in thread-locals and its collector is not safe
//! to drive from more than one thread, so the interpreter lives on a
//! dedicated OS thread from `janet_init` to `janet_deinit`. Commands from
//! the handle are forwarded through [`WorkerCommand`] and executed one at a
//! time; each finishes before the next is dequeued. The loop runs on a
//! current-thread tokio runtime so it can wait on the queue and the
//! shutdown token at once.

use crate::runtime::capture::{capture, Captured};
use crate::runtime::config::VmConfig;
use crate::runtime::conversion;
use crate::runtime::error::VmError;
use crate::runtime::value::{Evaluation, Value};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

type InitSignalChannel = (
    StdSender<Result<(), VmError>>,
    StdReceiver<Result<(), VmError>>,
);

type Responder<T> = oneshot::Sender<Result<T, VmError>>;

/// Commands sent to the worker thread.
pub(crate) enum WorkerCommand {
    Evaluate {
        id: u64,
        source: String,
        responder: Responder<Evaluation>,
    },
    Parse {
        id: u64,
        source: String,
        responder: Responder<Value>,
    },
}

/// Worker-side state shared with every handle.
#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    busy: AtomicBool,
    exited: AtomicBool,
    served: AtomicU64,
    abandoned: AtomicU64,
}

impl WorkerState {
    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub(crate) fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    pub(crate) fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// A running worker, as seen from the handle.
pub(crate) struct Worker {
    pub(crate) tx: mpsc::Sender<WorkerCommand>,
    pub(crate) thread: JoinHandle<()>,
    pub(crate) state: Arc<WorkerState>,
    pub(crate) shutdown: CancellationToken,
}

/// Marks the worker as exited when its thread ends, including by panic.
struct ExitGuard(Arc<WorkerState>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
        self.0.exited.store(true, Ordering::SeqCst);
        if thread::panicking() {
            tracing::error!("janet worker panicked");
        }
    }
}

/// Start the worker thread and wait until the interpreter is ready.
///
/// The worker runs until `shutdown` fires or every command sender is
/// dropped, then deinitializes the interpreter and exits.
pub(crate) fn spawn_worker(config: &VmConfig) -> Result<Worker, VmError> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<WorkerCommand>(config.queue_capacity.max(1));
    let (init_tx, init_rx): InitSignalChannel = std::sync::mpsc::channel();
    let state = Arc::new(WorkerState::default());
    let shutdown = CancellationToken::new();

    let exit_guard = ExitGuard(state.clone());
    let worker_state = state.clone();
    let worker_shutdown = shutdown.clone();
    let bootstrap = config.bootstrap_script.clone();
    let thread = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let _exit = exit_guard;

            let tokio_rt = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = init_tx.send(Err(VmError::Init(format!(
                        "failed to build worker runtime: {err}"
                    ))));
                    return;
                }
            };

            let mut core = match WorkerCore::new(bootstrap.as_deref(), worker_state) {
                Ok(core) => {
                    let _ = init_tx.send(Ok(()));
                    core
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            tokio_rt.block_on(core.run(cmd_rx, worker_shutdown));
            drop(core);
            tracing::info!("janet worker stopped");
        })
        .map_err(VmError::Spawn)?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(Worker {
            tx: cmd_tx,
            thread,
            state,
            shutdown,
        }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => {
            let _ = thread.join();
            Err(VmError::Init(
                "worker thread exited during initialization".to_string(),
            ))
        }
    }
}

/// An initialized Janet VM and its core environment.
///
/// Not `Send`: it must be created, used and dropped on one thread.
pub(crate) struct Interpreter {
    env: *mut evil_janet::JanetTable,
    _thread_bound: PhantomData<*mut ()>,
}

impl Interpreter {
    pub(crate) fn new() -> Result<Self, VmError> {
        // SAFETY: initializes this thread's VM state.
        if unsafe { evil_janet::janet_init() } != 0 {
            return Err(VmError::Init("janet_init failed".to_string()));
        }

        // SAFETY: the VM was initialized above; null means no replacements.
        let env = unsafe { evil_janet::janet_core_env(ptr::null_mut()) };
        if env.is_null() {
            unsafe { evil_janet::janet_deinit() };
            return Err(VmError::Init(
                "failed to create janet environment".to_string(),
            ));
        }

        Ok(Self {
            env,
            _thread_bound: PhantomData,
        })
    }

    /// Evaluate every form in `source` against the core environment.
    ///
    /// On failure the runtime has already printed its own diagnostic to
    /// stderr; the returned message is its rendering of the error value.
    pub(crate) fn run(&mut self, source: &str) -> Result<evil_janet::Janet, String> {
        let len = i32::try_from(source.len())
            .map_err(|_| format!("source too large ({} bytes)", source.len()))?;

        // SAFETY: returns the nil value, no VM interaction.
        let mut out = unsafe { evil_janet::janet_wrap_nil() };
        // SAFETY: `source` outlives the call and `len` matches it. A null
        // source path keeps stack traces free of file locations.
        let status = unsafe {
            evil_janet::janet_dobytes(self.env, source.as_ptr(), len, ptr::null(), &mut out)
        };

        if status == 0 {
            Ok(out)
        } else {
            Err(conversion::describe(out))
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // SAFETY: paired with the janet_init in `new` on this same thread.
        unsafe { evil_janet::janet_deinit() };
    }
}

struct WorkerCore {
    interpreter: Interpreter,
    state: Arc<WorkerState>,
}

impl WorkerCore {
    fn new(bootstrap: Option<&str>, state: Arc<WorkerState>) -> Result<Self, VmError> {
        let mut interpreter = Interpreter::new()?;

        if let Some(script) = bootstrap {
            let Captured { value, output } = capture(|| interpreter.run(script).map(|_| ()))?;
            if let Err(message) = value {
                tracing::debug!(stderr = %output.stderr, "bootstrap script failed");
                return Err(VmError::Init(format!("bootstrap script failed: {message}")));
            }
        }

        Ok(Self { interpreter, state })
    }

    /// Serve commands until shutdown is requested or every sender is gone.
    ///
    /// Commands already queued when shutdown fires are still served. A
    /// sender that has not finished enqueueing by then sees the channel
    /// closed.
    async fn run(&mut self, mut rx: mpsc::Receiver<WorkerCommand>, shutdown: CancellationToken) {
        tracing::info!(thread = ?thread::current().name(), "janet worker started");

        loop {
            let cmd = tokio::select! {
                biased;
                cmd = rx.recv() => cmd,
                _ = shutdown.cancelled() => None,
            };
            let Some(cmd) = cmd else {
                break;
            };

            match cmd {
                WorkerCommand::Evaluate {
                    id,
                    source,
                    responder,
                } => {
                    if self.skip_abandoned(id, &responder) {
                        continue;
                    }
                    self.state.busy.store(true, Ordering::SeqCst);
                    let result = self.evaluate(id, &source);
                    self.reply(id, responder, result);
                }
                WorkerCommand::Parse {
                    id,
                    source,
                    responder,
                } => {
                    if self.skip_abandoned(id, &responder) {
                        continue;
                    }
                    self.state.busy.store(true, Ordering::SeqCst);
                    let result = self.parse(id, &source);
                    self.reply(id, responder, result);
                }
            }
        }

        rx.close();
    }

    /// A caller that gave up while its request sat in the queue never has
    /// the source run.
    fn skip_abandoned<T>(&self, id: u64, responder: &Responder<T>) -> bool {
        if !responder.is_closed() {
            return false;
        }
        self.state.abandoned.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(request = id, "skipping request abandoned in queue");
        true
    }

    fn evaluate(&mut self, id: u64, source: &str) -> Result<Evaluation, VmError> {
        tracing::debug!(request = id, bytes = source.len(), "evaluating");
        let interpreter = &mut self.interpreter;
        let Captured { value, output } =
            capture(|| interpreter.run(source).map(conversion::render)).map_err(|err| {
                tracing::debug!(request = id, error = %err, "output capture failed");
                err
            })?;

        match value {
            Ok(evaluated) => Ok(Evaluation { evaluated, output }),
            Err(message) => {
                tracing::debug!(request = id, %message, "evaluation failed");
                Err(VmError::Eval { message, output })
            }
        }
    }

    fn parse(&mut self, id: u64, source: &str) -> Result<Value, VmError> {
        tracing::debug!(request = id, bytes = source.len(), "parsing");
        let interpreter = &mut self.interpreter;
        let Captured { value, output } =
            capture(|| interpreter.run(source).map(conversion::to_value))?;

        match value {
            Ok(parsed) => {
                if !output.stdout.is_empty() || !output.stderr.is_empty() {
                    tracing::debug!(
                        request = id,
                        stdout = %output.stdout,
                        stderr = %output.stderr,
                        "discarding output written while parsing"
                    );
                }
                Ok(parsed)
            }
            Err(message) => Err(VmError::Eval { message, output }),
        }
    }

    /// Ends the current command. State is updated before the caller wakes.
    fn reply<T>(&self, id: u64, responder: Responder<T>, result: Result<T, VmError>) {
        self.state.busy.store(false, Ordering::SeqCst);
        self.state.served.fetch_add(1, Ordering::SeqCst);
        if responder.send(result).is_err() {
            self.state.abandoned.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(request = id, "caller gave up before the result was ready");
        }
    }
}
