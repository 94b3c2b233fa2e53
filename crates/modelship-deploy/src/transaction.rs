//! Compensation scope for multi-step operations
//!
//! Steps register an undo action as they commit side effects. When the
//! operation fails, every registered action runs in reverse registration
//! order; when it succeeds the actions are discarded. Compensation is
//! best-effort: a failing undo is logged and the rest still run.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use modelship_common::{Error, Result};
use tracing::{debug, warn};

type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Undo actions accumulated by an in-flight operation.
///
/// Cloning shares the same list, so the scope can be handed to nested steps.
#[derive(Clone, Default)]
pub struct Compensations {
    steps: Arc<Mutex<Vec<(String, UndoFn)>>>,
}

impl Compensations {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an undo action for a committed step
    pub fn push<F, Fut>(&self, name: impl Into<String>, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(step = %name, "registered compensation");
        let undo: UndoFn =
            Box::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(undo()) });
        self.lock().push((name, undo));
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered action, newest first, returning the failures.
    pub async fn run(self) -> Vec<Error> {
        let steps = std::mem::take(&mut *self.lock());
        let mut failures = Vec::new();
        for (name, undo) in steps.into_iter().rev() {
            match undo().await {
                Ok(()) => debug!(step = %name, "compensation applied"),
                Err(e) => {
                    warn!(step = %name, error = %e, "compensation failed");
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Drop every registered action without running it
    pub fn discard(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, UndoFn)>> {
        // A panic while holding the lock can only interrupt a push or take.
        self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run `op` with a fresh compensation scope.
///
/// On `Err` the registered actions run before the original error is
/// returned; failures while compensating are logged, never substituted for
/// the original error. If the returned future is dropped before `op`
/// finishes, the registered actions are spawned onto the current runtime.
pub async fn run_compensated<T, F, Fut>(op: F) -> Result<T>
where
    F: FnOnce(Compensations) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let compensations = Compensations::new();
    let mut guard = CancelGuard(Some(compensations.clone()));
    let outcome = op(compensations.clone()).await;
    guard.disarm();

    match outcome {
        Ok(value) => {
            compensations.discard();
            Ok(value)
        }
        Err(e) => {
            let registered = compensations.len();
            let failures = compensations.run().await;
            warn!(
                error = %e,
                compensations = registered,
                compensation_failures = failures.len(),
                "operation failed, compensations applied"
            );
            Err(e)
        }
    }
}

/// Compensates in the background when an in-flight operation is cancelled
struct CancelGuard(Option<Compensations>);

impl CancelGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let Some(compensations) = self.0.take() else {
            return;
        };
        let registered = compensations.len();
        if registered == 0 {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    compensations = registered,
                    "operation cancelled, compensating in background"
                );
                handle.spawn(async move {
                    let failures = compensations.run().await;
                    if !failures.is_empty() {
                        warn!(
                            compensation_failures = failures.len(),
                            "background compensation incomplete"
                        );
                    }
                });
            }
            Err(_) => warn!(
                compensations = registered,
                "operation cancelled outside a runtime, compensations dropped"
            ),
        }
    }
}
