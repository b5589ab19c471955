//! Behavior when the output pipes cannot be created. Lowering the
//! descriptor limit affects the whole process, so this file holds a single
//! test.

use janetrun::{CallContext, CaptureError, Vm, VmError};
use pretty_assertions::assert_eq;

fn open_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit fills the struct it is given.
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) }, 0);
    limit
}

fn set_open_limit(limit: &libc::rlimit) {
    // SAFETY: lowering or restoring the soft limit within the hard limit.
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) }, 0);
}

/// Lowest descriptor number the next open would return.
fn lowest_free_fd() -> libc::c_int {
    // SAFETY: dup returns the lowest free descriptor, closed right away.
    let fd = unsafe { libc::dup(libc::STDERR_FILENO) };
    assert!(fd >= 0);
    unsafe { libc::close(fd) };
    fd
}

#[tokio::test]
async fn test_pipe_failure_skips_evaluation() {
    let vm = Vm::new().unwrap();
    let cx = CallContext::background();
    let original = open_limit();

    // room for the stdout pipe only, so the stderr pipe fails
    let free = lowest_free_fd();
    set_open_limit(&libc::rlimit {
        rlim_cur: (free + 2) as libc::rlim_t,
        rlim_max: original.rlim_max,
    });
    let result = vm.evaluate(&cx, r#"(def ran true) (print "ran")"#).await;
    set_open_limit(&original);

    let err = result.unwrap_err();
    assert!(
        matches!(
            err,
            VmError::Capture(CaptureError::Pipe {
                stream: "stderr",
                ..
            })
        ),
        "unexpected error: {err}"
    );
    assert!(err.output().is_none());

    // the stdout pipe created before the failure was closed again
    assert_eq!(lowest_free_fd(), free);

    // the source never ran and the worker keeps serving
    let err = vm.evaluate(&cx, "ran").await.unwrap_err();
    assert!(err.to_string().contains("unknown symbol"));
    let evaluation = vm.evaluate(&cx, "(+ 1 2)").await.unwrap();
    assert_eq!(evaluation.evaluated, "3");

    vm.close().unwrap();
}
