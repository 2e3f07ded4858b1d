//! Process-wide gate for blocking backend calls.
//!
//! Every vector store, keyword store, embedding, rerank and neighbor lookup
//! call goes through [`BackendGate::call`]. The gate:
//!
//! - caps in-flight calls across all concurrent requests with a semaphore
//! - runs the call on tokio's blocking pool so no runtime worker stalls
//! - bounds the call by the per-backend timeout and the request scope
//!
//! The permit travels into the blocking task and is released when the call
//! really finishes. An abandoned call therefore keeps its slot until the
//! backend returns, so a hung backend cannot push in-flight work past the
//! cap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::errors::{KbrError, KbrResult};
use crate::scope::RequestScope;

#[derive(Debug, Clone)]
pub struct BackendGate {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    timeout: Duration,
}

impl BackendGate {
    /// A gate allowing `max_in_flight` concurrent calls, each bounded by
    /// `timeout`. A zero cap is raised to one.
    pub fn new(max_in_flight: usize, timeout: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            timeout,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Same permits, different per-call timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            permits: Arc::clone(&self.permits),
            max_in_flight: self.max_in_flight,
            timeout,
        }
    }

    /// Run a blocking backend call.
    ///
    /// Waiting for a permit counts against the timeout. When the per-call
    /// timeout fires while the request scope is still live the error is
    /// [`KbrError::BackendTimeout`]; when the scope itself ended it is
    /// [`KbrError::Cancelled`] or [`KbrError::DeadlineExceeded`].
    pub async fn call<T, F>(
        &self,
        backend: &str,
        knowledge_base_id: &str,
        scope: &RequestScope,
        f: F,
    ) -> KbrResult<T>
    where
        F: FnOnce() -> KbrResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let bounded = scope.narrowed(self.timeout);
        let permits = Arc::clone(&self.permits);

        let result = bounded
            .run(async move {
                let permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| KbrError::backend("gate", "backend gate closed"))?;
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f()
                });
                match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(KbrError::backend(
                        "gate",
                        format!("backend task failed: {}", join_err),
                    )),
                }
            })
            .await;

        match result {
            Err(KbrError::DeadlineExceeded) if !scope.is_interrupted() => {
                debug!(
                    "Backend '{}' exceeded {:?} for '{}'",
                    backend, self.timeout, knowledge_base_id
                );
                Err(KbrError::BackendTimeout {
                    backend: backend.to_string(),
                    knowledge_base: knowledge_base_id.to_string(),
                })
            }
            other => other,
        }
    }
}
