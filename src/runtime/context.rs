//! Call context - cancellation token plus optional deadline for one call.

use super::error::VmError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline signal passed into every VM call.
///
/// Cancelling only abandons the caller's wait. The worker does not observe
/// the context, so an evaluation that already started runs to completion.
///
/// Example:
/// ```no_run
/// # async fn demo(vm: janetrun::Vm) -> Result<(), janetrun::VmError> {
/// use janetrun::CallContext;
/// use std::time::Duration;
///
/// let cx = CallContext::with_timeout(Duration::from_secs(1));
/// let evaluation = vm.evaluate(&cx, "(+ 1 2)").await?;
/// assert_eq!(evaluation.evaluated, "3");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Tie the context to an existing token, e.g. a request-scoped one.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Add a deadline unless the context already carries one.
    pub(crate) fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => Self {
                token: self.token.clone(),
                deadline: Some(Instant::now() + timeout),
            },
            _ => self.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done_error().is_some()
    }

    fn done_error(&self) -> Option<VmError> {
        if self.token.is_cancelled() {
            return Some(VmError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(VmError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` until it completes or the context is done.
    ///
    /// An already-done context returns before `fut` is polled.
    pub(crate) async fn race<F: Future>(&self, fut: F) -> Result<F::Output, VmError> {
        if let Some(err) = self.done_error() {
            return Err(err);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(VmError::Cancelled),
            _ = expired => Err(VmError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_context_completes() {
        let cx = CallContext::background();
        assert!(!cx.is_done());
        assert!(cx.deadline().is_none());
        let value = cx.race(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_expired_deadline_never_polls() {
        let cx = CallContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(cx.is_done());

        let mut polled = false;
        let result = cx
            .race(async {
                polled = true;
            })
            .await;
        assert!(matches!(result, Err(VmError::DeadlineExceeded)));
        assert!(!polled);
    }

    #[tokio::test]
    async fn test_deadline_fires_while_waiting() {
        let cx = CallContext::with_timeout(Duration::from_millis(20));
        let result = cx.race(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(VmError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_deadline() {
        let token = CancellationToken::new();
        let cx = CallContext::with_cancellation(token.clone());
        token.cancel();
        assert!(cx.is_done());
        let result = cx.race(async { 1 }).await;
        assert!(matches!(result, Err(VmError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let cx = CallContext::background();
        let canceller = cx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = cx.race(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(VmError::Cancelled)));
    }

    #[test]
    fn test_or_timeout_keeps_existing_deadline() {
        let cx = CallContext::with_timeout(Duration::from_secs(5));
        let original = cx.deadline();
        assert_eq!(cx.or_timeout(Some(Duration::from_secs(60))).deadline(), original);

        let background = CallContext::background();
        assert!(background.or_timeout(None).deadline().is_none());
    }

    #[tokio::test]
    async fn test_or_timeout_shares_token() {
        let cx = CallContext::background();
        let bounded = cx.or_timeout(Some(Duration::from_secs(60)));
        assert!(bounded.deadline().is_some());
        cx.cancel();
        assert!(bounded.is_done());
    }
}
