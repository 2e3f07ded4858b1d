//! Request scope: caller cancellation plus an optional deadline.
//!
//! Every backend call in the pipeline runs through [`RequestScope::run`], so a
//! cancelled or expired request stops waiting on in-flight calls at once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::errors::{KbrError, KbrResult};

// ============================================================================
// CancellationToken
// ============================================================================

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation token. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// RequestScope
// ============================================================================

/// Cancellation and deadline for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RequestScope {
    /// A scope with no deadline and a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Same token, deadline no later than `timeout` from now.
    pub fn narrowed(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            deadline: Some(match self.deadline {
                Some(d) if d < candidate => d,
                _ => candidate,
            }),
            token: self.token.clone(),
        }
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the scope has ended, if it has.
    pub fn interruption(&self) -> Option<KbrError> {
        if self.token.is_cancelled() {
            return Some(KbrError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(KbrError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption().is_some()
    }

    pub fn check(&self) -> KbrResult<()> {
        match self.interruption() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive `fut` until it finishes, the token fires or the deadline passes.
    ///
    /// An interrupted future is dropped; blocking work it spawned keeps
    /// running to completion in the background but its result is discarded.
    pub async fn run<F, T>(&self, fut: F) -> KbrResult<T>
    where
        F: Future<Output = KbrResult<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(KbrError::Cancelled),
            _ = expiry => Err(KbrError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
