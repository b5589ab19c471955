//! Janet execution runtime.
//!
//! Each [`Vm`] owns one Janet interpreter running on a dedicated OS thread.
//! Async callers submit source text through the handle; the worker evaluates
//! requests one at a time and captures whatever the runtime prints while
//! doing so. A lazily created process-wide instance is available through
//! [`shared_vm`] for callers that do not need isolation.

pub mod capture;
pub mod config;
pub mod context;
mod conversion;
pub mod error;
pub mod handle;
mod runner;
pub mod value;

use std::sync::{Mutex, PoisonError};

/// The process-wide VM, created on first use.
static SHARED_VM: Mutex<Option<Vm>> = Mutex::new(None);

/// Get the shared VM, starting it with the default configuration if no live
/// instance exists.
///
/// Every caller gets a handle to the same interpreter, so definitions made
/// by one caller are visible to all of them. After [`close_shared_vm`] the
/// next call starts a fresh instance.
pub fn shared_vm() -> Result<Vm, VmError> {
    let mut slot = SHARED_VM.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(vm) = slot.as_ref().filter(|vm| !vm.is_closed()) {
        return Ok(vm.clone());
    }

    let vm = Vm::new()?;
    tracing::debug!("started shared janet vm");
    *slot = Some(vm.clone());
    Ok(vm)
}

/// Close the shared VM if one was started. Handles obtained earlier report
/// [`VmError::Closed`] from then on.
pub fn close_shared_vm() -> Result<(), VmError> {
    let vm = SHARED_VM
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match vm {
        Some(vm) => vm.close(),
        None => Ok(()),
    }
}

pub use config::VmConfig;
pub use context::CallContext;
pub use error::{CaptureError, VmError};
pub use handle::{Vm, VmStats, VmStatus};
pub use value::{Evaluation, Output, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test]
    async fn test_vm_lifecycle() {
        let vm = Vm::spawn(VmConfig::default()).unwrap();
        assert!(!vm.is_closed());

        let evaluation = vm
            .evaluate(&CallContext::background(), "(+ 40 2)")
            .await
            .unwrap();
        assert_eq!(evaluation.evaluated, "42");

        vm.close().unwrap();
        assert!(vm.is_closed());
    }

    #[tokio::test]
    async fn test_multiple_vms_sequential() {
        for i in 0..3 {
            let vm = Vm::spawn(VmConfig::default()).unwrap();
            let evaluation = vm
                .evaluate(&CallContext::background(), &format!("(* {i} 2)"))
                .await
                .unwrap();
            assert_eq!(evaluation.evaluated, format!("{}", i * 2));
            vm.close().unwrap();
        }
    }

    #[test]
    fn test_vms_are_isolated() {
        let vms: Vec<Vm> = (0..3).map(|_| Vm::new().unwrap()).collect();

        let threads: Vec<_> = vms
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, vm)| {
                thread::spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()
                        .unwrap();
                    rt.block_on(async {
                        let cx = CallContext::background();
                        vm.evaluate(&cx, &format!("(def mine {i})")).await.unwrap();
                        vm.evaluate(&cx, "mine").await.unwrap().evaluated
                    })
                })
            })
            .collect();

        for (i, t) in threads.into_iter().enumerate() {
            assert_eq!(t.join().unwrap(), i.to_string());
        }
        for vm in vms {
            vm.close().unwrap();
        }
    }
}
