//! Fan-out/fan-in barrier for one pipeline phase.
//!
//! A `PhaseBarrier` expects a fixed number of arrivals. Every worker reports
//! exactly once; the barrier completes when the last one arrives and never
//! before. The remaining count and the outcomes sit behind one mutex so the
//! decrement and the completion check happen together.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::orchestration::pool::WorkerPool;

/// What one worker reported.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome<T> {
    Succeeded(T),
    Failed(String),
    Cancelled,
}

impl<T> PhaseOutcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => PhaseOutcome::Succeeded(value),
            Err(Error::Cancelled) => PhaseOutcome::Cancelled,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PhaseOutcome::Succeeded(_))
    }
}

/// Aggregated outcomes of a completed barrier, in item order.
#[derive(Debug)]
pub struct BarrierReport<T> {
    pub phase: String,
    pub outcomes: Vec<PhaseOutcome<T>>,
}

impl<T> BarrierReport<T> {
    /// True only when every unit succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(PhaseOutcome::is_success)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PhaseOutcome::Failed(_)))
            .count()
    }

    /// Values of all units, or the phase error. Failures outrank
    /// cancellations.
    pub fn into_values(self) -> Result<Vec<T>> {
        let total = self.outcomes.len();
        let failed = self.failed_count();
        let mut first_error = None;
        let mut cancelled = false;
        let mut values = Vec::with_capacity(total);

        for outcome in self.outcomes {
            match outcome {
                PhaseOutcome::Succeeded(v) => values.push(v),
                PhaseOutcome::Failed(e) => {
                    first_error.get_or_insert(e);
                }
                PhaseOutcome::Cancelled => cancelled = true,
            }
        }

        if let Some(first) = first_error {
            return Err(Error::PhaseFailed {
                phase: self.phase,
                failed,
                total,
                first,
            });
        }
        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(values)
    }
}

struct BarrierState<T> {
    remaining: usize,
    outcomes: Vec<Option<PhaseOutcome<T>>>,
    completions: usize,
}

struct BarrierInner<T> {
    name: String,
    state: Mutex<BarrierState<T>>,
    done: Notify,
}

/// Waits for a fixed number of workers and aggregates what they report.
///
/// Cloning shares the same counter.
pub struct PhaseBarrier<T> {
    inner: Arc<BarrierInner<T>>,
}

impl<T> Clone for PhaseBarrier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PhaseBarrier<T> {
    /// A barrier expecting `expected` arrivals. With zero it is complete at
    /// once.
    pub fn new(name: impl Into<String>, expected: usize) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                name: name.into(),
                state: Mutex::new(BarrierState {
                    remaining: expected,
                    outcomes: (0..expected).map(|_| None).collect(),
                    completions: usize::from(expected == 0),
                }),
                done: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState<T>> {
        // a poisoned lock still holds consistent counters
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Record the outcome of unit `index`.
    ///
    /// Returns true when this arrival completed the barrier. Repeated or
    /// out-of-range arrivals are ignored, so the count never goes below zero.
    pub fn arrive(&self, index: usize, outcome: PhaseOutcome<T>) -> bool {
        let mut state = self.lock();
        if state.remaining == 0 {
            warn!(phase = %self.inner.name, index, "arrival after completion ignored");
            return false;
        }
        match state.outcomes.get(index) {
            Some(None) => state.outcomes[index] = Some(outcome),
            Some(Some(_)) => {
                warn!(phase = %self.inner.name, index, "duplicate arrival ignored");
                return false;
            }
            None => {
                warn!(phase = %self.inner.name, index, "unknown unit ignored");
                return false;
            }
        }

        state.remaining -= 1;
        trace!(phase = %self.inner.name, index, remaining = state.remaining, "unit arrived");
        if state.remaining > 0 {
            return false;
        }
        state.completions += 1;
        drop(state);
        self.inner.done.notify_one();
        true
    }

    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    pub fn is_complete(&self) -> bool {
        self.lock().remaining == 0
    }

    /// How many times the barrier completed. Never more than one.
    pub fn completions(&self) -> usize {
        self.lock().completions
    }

    fn take_report(&self) -> BarrierReport<T> {
        let mut state = self.lock();
        let outcomes = state
            .outcomes
            .iter_mut()
            .map(|o| o.take().unwrap_or(PhaseOutcome::Cancelled))
            .collect();
        BarrierReport {
            phase: self.inner.name.clone(),
            outcomes,
        }
    }

    /// Block until every unit reported.
    ///
    /// Re-checks `cancel` at least every `poll`; once it fires the wait ends
    /// with [`Error::Cancelled`] and the unfinished workers are left to
    /// observe the same token at their own checkpoints.
    pub async fn wait(&self, cancel: &CancellationToken, poll: Duration) -> Result<BarrierReport<T>> {
        loop {
            if self.is_complete() {
                return Ok(self.take_report());
            }
            if cancel.is_cancelled() {
                debug!(phase = %self.inner.name, remaining = self.remaining(), "barrier wait cancelled");
                return Err(Error::Cancelled);
            }
            tokio::select! {
                _ = self.inner.done.notified() => {}
                _ = tokio::time::sleep(poll) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

impl<T: Send + 'static> PhaseBarrier<T> {
    /// Start one worker per item on `pool` and wait for all of them.
    ///
    /// A panicking or cancelled worker still arrives, so the barrier always
    /// sees exactly `items.len()` outcomes.
    pub async fn run<I, F, Fut>(
        name: &str,
        pool: &WorkerPool,
        items: Vec<I>,
        cancel: &CancellationToken,
        poll: Duration,
        worker: F,
    ) -> Result<BarrierReport<T>>
    where
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let barrier = PhaseBarrier::new(name, items.len());
        debug!(phase = name, units = items.len(), pool = pool.name(), "barrier started");

        for (index, item) in items.into_iter().enumerate() {
            let handle = pool.spawn(cancel.clone(), worker(index, item));
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let outcome = match handle.await {
                    Ok(result) => PhaseOutcome::from_result(result),
                    Err(join) => PhaseOutcome::Failed(Error::TaskJoin(join.to_string()).to_string()),
                };
                barrier.arrive(index, outcome);
            });
        }

        let report = barrier.wait(cancel, poll).await?;
        debug!(
            phase = name,
            failed = report.failed_count(),
            success = report.is_success(),
            "barrier complete"
        );
        Ok(report)
    }
}
