//! Error types returned by the VM handle.

use super::value::Output;
use std::io;
use thiserror::Error;

/// Failure to set up or tear down the stdout/stderr redirection.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create {stream} pipe: {source}")]
    Pipe {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum VmError {
    /// The runtime could not be bootstrapped. The instance never started.
    #[error("failed to initialize janet: {0}")]
    Init(String),

    #[error("failed to spawn vm thread: {0}")]
    Spawn(#[source] io::Error),

    /// The request was dropped before evaluation started.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The runtime completed the request with a non-OK signal.
    ///
    /// `message` is the runtime's own rendering of the error value; `output`
    /// holds whatever was written before the failure.
    #[error("{message}")]
    Eval { message: String, output: Output },

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Cancelled,

    #[error("vm is closed")]
    Closed,

    #[error("vm worker thread panicked")]
    WorkerPanicked,
}

impl VmError {
    /// True when the caller stopped waiting. The evaluation may still be
    /// running on the worker, so its outcome is unknown.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, VmError::DeadlineExceeded | VmError::Cancelled)
    }

    /// Output captured alongside an evaluation failure.
    pub fn output(&self) -> Option<&Output> {
        match self {
            VmError::Eval { output, .. } => Some(output),
            _ => None,
        }
    }
}
