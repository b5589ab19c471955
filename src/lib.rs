//! Run Janet code from async Rust.
//!
//! The Janet interpreter is not thread-safe, so every [`Vm`] confines one to
//! a dedicated worker thread and serializes requests through a queue.
//! Requests honor cancellation and deadlines through [`CallContext`], and
//! each evaluation returns the text the runtime wrote to stdout and stderr.
//!
//! ```no_run
//! use janetrun::{shared_vm, CallContext};
//!
//! # async fn demo() -> Result<(), janetrun::VmError> {
//! let vm = shared_vm()?;
//! let evaluation = vm
//!     .evaluate(&CallContext::background(), r#"(print "hi") (+ 1 2)"#)
//!     .await?;
//! assert_eq!(evaluation.evaluated, "3");
//! assert_eq!(evaluation.output.stdout, "hi\n");
//! # Ok(())
//! # }
//! ```

mod runtime;

pub use runtime::capture::{capture, Captured};
pub use runtime::{
    close_shared_vm, shared_vm, CallContext, CaptureError, Evaluation, Output, Value, Vm,
    VmConfig, VmError, VmStats, VmStatus,
};
