//! The shared instance is process-wide state, so its lifecycle is checked
//! from a single test.

use janetrun::{close_shared_vm, shared_vm, CallContext, VmError, VmStatus};
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_shared_vm_lifecycle() {
    init_logging();
    let cx = CallContext::background();

    // closing before anything was started is a no-op
    close_shared_vm().unwrap();

    let first = shared_vm().unwrap();
    first.evaluate(&cx, "(def greeting \"hi\")").await.unwrap();

    let second = shared_vm().unwrap();
    assert_eq!(second.evaluate(&cx, "greeting").await.unwrap().evaluated, "hi");
    assert_eq!(first.stats(), second.stats());

    close_shared_vm().unwrap();
    assert_eq!(first.status(), VmStatus::Closed);
    assert!(matches!(
        second.evaluate(&cx, "greeting").await.unwrap_err(),
        VmError::Closed
    ));

    // a fresh interpreter with none of the old definitions
    let third = shared_vm().unwrap();
    assert_eq!(third.status(), VmStatus::Ready);
    let err = third.evaluate(&cx, "greeting").await.unwrap_err();
    assert!(err.to_string().contains("unknown symbol"));

    close_shared_vm().unwrap();
    close_shared_vm().unwrap();
}
