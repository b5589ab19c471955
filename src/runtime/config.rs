//! Runtime configuration for a Janet VM instance.
//!
//! This module defines the configuration structure for the worker thread,
//! including the submission queue depth and bootstrap options.

use std::time::Duration;

/// Default OS thread name for the worker.
pub const DEFAULT_THREAD_NAME: &str = "janet-vm";

/// Runtime configuration for a single Janet VM.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Name given to the dedicated worker thread
    pub thread_name: String,

    /// Number of requests that may wait behind the one being evaluated
    pub queue_capacity: usize,

    /// Janet source evaluated once after the core environment is built
    pub bootstrap_script: Option<String>,

    /// Deadline applied to calls whose context has none
    pub execution_timeout: Option<Duration>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            queue_capacity: 1,
            bootstrap_script: None,
            execution_timeout: None,
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the submission queue depth. Zero is treated as one; tokio's
    /// bounded channel has no rendezvous mode.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap_script = Some(source.into());
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}
