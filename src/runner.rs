//! Fans a batch of candidates out over a bounded pool of worker threads.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, error, info};

use crate::cancel::{CancelToken, Sleeper};
use crate::check::{Outcome, UnknownReason};
use crate::error::ResolveError;
use crate::fragment::Marketplace;
use crate::resolve::StatusResolver;
use crate::web::ContactProbe;

/// Anything that can classify one raw candidate.
pub trait Check {
    /// # Errors
    ///
    /// [`ResolveError::Cancelled`] suppresses the outcome; any other error is
    /// recorded as [`Outcome::Unknown`].
    fn check(&self, raw: &str) -> Result<Outcome, ResolveError>;
}

impl<M, W, S> Check for StatusResolver<M, W, S>
where
    M: Marketplace,
    W: ContactProbe,
    S: Sleeper,
{
    fn check(&self, raw: &str) -> Result<Outcome, ResolveError> {
        StatusResolver::check(self, raw)
    }
}

impl<F> Check for F
where
    F: Fn(&str) -> Result<Outcome, ResolveError>,
{
    fn check(&self, raw: &str) -> Result<Outcome, ResolveError> {
        self(raw)
    }
}

/// What a batch run produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// One outcome per checked candidate, keyed by the candidate as given.
    pub outcomes: BTreeMap<String, Outcome>,
    /// Candidates that were never dispatched or were cut short by cancellation.
    pub cancelled: Vec<String>,
}

impl BatchReport {
    /// Whether every candidate was checked and came back free.
    #[must_use]
    pub fn all_free(&self) -> bool {
        self.cancelled.is_empty() && self.outcomes.values().all(Outcome::is_free)
    }
}

/// Check every candidate with at most `concurrency` workers.
///
/// Each worker builds its own checker with `make_checker`, so no HTTP
/// session is shared between threads. `on_outcome` sees results in
/// completion order, as they arrive. A checker error or panic is logged and
/// recorded as [`Outcome::Unknown`]; it never stops the batch. If
/// `make_checker` itself panics, every candidate that worker picks up is
/// recorded as [`Outcome::Unknown`] the same way.
///
/// Once `cancel` fires, no further candidates are dispatched and checks
/// that return [`ResolveError::Cancelled`] report nothing.
pub fn run_batch<C, F, O>(
    candidates: &[String],
    concurrency: usize,
    cancel: &CancelToken,
    make_checker: F,
    mut on_outcome: O,
) -> BatchReport
where
    C: Check,
    F: Fn() -> C + Sync,
    O: FnMut(&str, &Outcome),
{
    let workers = concurrency.clamp(1, candidates.len().max(1));
    let next = AtomicUsize::new(0);
    let mut report = BatchReport::default();
    let mut settled = vec![false; candidates.len()];

    debug!(candidates = candidates.len(), workers, "starting batch");

    thread::scope(|s| {
        let (tx, rx) = mpsc::channel::<(usize, Option<Outcome>)>();

        for worker in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let make_checker = &make_checker;
            s.spawn(move || {
                let checker = panic::catch_unwind(AssertUnwindSafe(make_checker))
                    .map_err(|payload| {
                        let msg = panic_message(payload.as_ref());
                        error!(worker, panic = %msg, "checker setup panicked");
                        msg
                    });
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(raw) = candidates.get(index) else {
                        break;
                    };
                    let outcome = match &checker {
                        Ok(checker) => run_one(checker, worker, raw),
                        Err(msg) => Some(Outcome::Unknown(UnknownReason::Failed(msg.clone()))),
                    };
                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (index, outcome) in rx {
            let raw = &candidates[index];
            settled[index] = true;
            match outcome {
                Some(outcome) => {
                    debug!(username = %raw, %outcome, "checked");
                    on_outcome(raw, &outcome);
                    report.outcomes.insert(raw.clone(), outcome);
                }
                None => report.cancelled.push(raw.clone()),
            }
        }
    });

    report.cancelled.extend(
        candidates
            .iter()
            .zip(&settled)
            .filter(|(_, settled)| !**settled)
            .map(|(raw, _)| raw.clone()),
    );
    if !report.cancelled.is_empty() {
        info!(count = report.cancelled.len(), "checks cancelled");
    }
    report
}

fn run_one<C: Check>(checker: &C, worker: usize, raw: &str) -> Option<Outcome> {
    match panic::catch_unwind(AssertUnwindSafe(|| checker.check(raw))) {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(ResolveError::Cancelled)) => {
            debug!(username = raw, worker, "check cancelled in flight");
            None
        }
        Ok(Err(err)) => {
            error!(username = raw, worker, error = %err, "check failed");
            Some(Outcome::Unknown(UnknownReason::Failed(err.to_string())))
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(username = raw, worker, panic = %msg, "check panicked");
            Some(Outcome::Unknown(UnknownReason::Failed(msg)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_owned())
}
