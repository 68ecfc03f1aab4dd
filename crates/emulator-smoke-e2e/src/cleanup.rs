//! Ordered, logged teardown
//!
//! Fixtures push one labelled action per resource they create. `run`
//! executes them newest-first, keeps going past failures, and reports what
//! happened instead of panicking or swallowing errors.

use emulator_smoke_clients::ClientError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ClientError>> + Send>;

/// One cleanup action that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub label: String,
    pub error: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Result of running a `Cleanup`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub attempted: usize,
    /// Actions whose resource was already gone
    pub already_gone: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.attempted += other.attempted;
        self.already_gone += other.already_gone;
        self.failures.extend(other.failures);
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "{} cleaned", self.attempted);
        }
        write!(
            f,
            "{} of {} cleanup actions failed",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

/// LIFO stack of labelled async cleanup actions
#[derive(Default)]
pub struct Cleanup {
    actions: Vec<(String, Action)>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; it runs before every action pushed earlier
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let label = label.into();
        debug!(label = %label, "Registered cleanup");
        let action: Action = Box::new(move || action().boxed());
        self.actions.push((label, action));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Labels in the order they will run
    pub fn pending(&self) -> Vec<&str> {
        self.actions
            .iter()
            .rev()
            .map(|(label, _)| label.as_str())
            .collect()
    }

    /// Run every action newest-first
    ///
    /// A `NotFound` result counts as already cleaned. Errors and panics are
    /// logged and collected; later actions still run.
    pub async fn run(mut self) -> CleanupReport {
        let actions = std::mem::take(&mut self.actions);
        let mut report = CleanupReport::default();

        for (label, action) in actions.into_iter().rev() {
            report.attempted += 1;
            // A closure that panics before returning its future is caught too
            match AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => debug!(label = %label, "Cleaned up"),
                Ok(Err(e)) if e.is_not_found() => {
                    debug!(label = %label, "Already gone");
                    report.already_gone += 1;
                }
                Ok(Err(e)) => {
                    warn!(label = %label, error = %e, "Cleanup failed");
                    report.failures.push(CleanupFailure {
                        label,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(label = %label, "Cleanup action panicked");
                    report.failures.push(CleanupFailure {
                        label,
                        error: "panicked".to_string(),
                    });
                }
            }
        }
        report
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                leaked = ?self.pending(),
                "Cleanup dropped without run() - emulator resources were leaked"
            );
        }
    }
}
