use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ActionError, CancelReason};

/// Execution context handed to every handler.
///
/// Carries a cancellation token and an optional deadline. Every remote call
/// goes through [`ActionContext::run`], so cancelling the token or passing
/// the deadline aborts whatever is in flight.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ActionContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A context that is cancelled along with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the token is cancelled. Ignores the deadline.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Checks for cancellation without awaiting anything.
    pub fn check(&self) -> Result<(), ActionError> {
        if self.token.is_cancelled() {
            return Err(ActionError::Cancelled(CancelReason::Cancelled));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ActionError::Cancelled(CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    /// Drives `fut` to completion unless the context is cancelled first, in
    /// which case `fut` is dropped and no partial result escapes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ActionError>
    where
        F: Future<Output = Result<T, ActionError>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ActionError::Cancelled(CancelReason::Cancelled)),
            _ = deadline => Err(ActionError::Cancelled(CancelReason::DeadlineExceeded)),
            result = fut => result,
        }
    }
}
