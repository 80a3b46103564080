//! Bounded-concurrency execution of independent async units.
//!
//! Units start in input order as slots free up and run on their own tasks
//! inside a `JoinSet`, so none of them outlive the call. A unit that fails or
//! panics only affects its own result.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::{stream, FutureExt, Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("concurrency limit must be at least 1")]
    ZeroLimit,
}

/// Why a unit produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitFailure {
    #[error("unit panicked: {0}")]
    Panicked(String),

    #[error("unit was cancelled")]
    Cancelled,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub type UnitResult<T> = Result<T, UnitFailure>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    /// Units taken from the input.
    pub started: usize,
    /// Whether the stop signal ended the run before the input ran out.
    pub stopped: bool,
    /// Units still running when the grace period ran out.
    pub abandoned: usize,
}

/// Runs at most `limit` units at a time.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRunner {
    limit: usize,
}

impl BoundedRunner {
    pub fn new(limit: usize) -> Result<Self, RunnerError> {
        if limit == 0 {
            return Err(RunnerError::ZeroLimit);
        }
        Ok(Self { limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drive every unit in `units` and collect results in input order.
    ///
    /// The input is pulled lazily: the next unit is only taken once a slot is
    /// free, so a paginated source is never read ahead of the work.
    pub async fn run<S, F, T>(&self, units: S) -> Vec<UnitResult<T>>
    where
        S: Stream<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut slots: Vec<Option<UnitResult<T>>> = Vec::new();
        let report = self
            .run_until(units, std::future::pending(), Duration::ZERO, |index, result| {
                if slots.len() <= index {
                    slots.resize_with(index + 1, || None);
                }
                slots[index] = Some(result);
            })
            .await;

        slots.resize_with(report.started, || None);
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(UnitFailure::Cancelled)))
            .collect()
    }

    /// Drive `units`, handing each result to `on_result` with its input index
    /// as soon as it completes. Nothing is kept per unit once it is reported.
    ///
    /// When `stop` resolves no further units are started. Those already
    /// running get `grace` to finish; the rest are aborted and only counted
    /// in [`RunReport::abandoned`]. Either way every spawned task has ended
    /// when this returns.
    pub async fn run_until<S, F, T, C>(
        &self,
        units: S,
        stop: impl Future<Output = ()>,
        grace: Duration,
        mut on_result: C,
    ) -> RunReport
    where
        S: Stream<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnMut(usize, UnitResult<T>),
    {
        let mut units = std::pin::pin!(units);
        let mut stop = std::pin::pin!(stop);
        let mut in_flight: JoinSet<(usize, UnitResult<T>)> = JoinSet::new();
        let mut report = RunReport::default();
        let mut exhausted = false;

        loop {
            if exhausted && in_flight.is_empty() {
                return report;
            }

            tokio::select! {
                _ = &mut stop => {
                    report.stopped = true;
                    break;
                }
                next = units.next(), if !exhausted && in_flight.len() < self.limit => match next {
                    Some(unit) => {
                        let index = report.started;
                        report.started += 1;
                        in_flight.spawn(async move {
                            let output = AssertUnwindSafe(unit)
                                .catch_unwind()
                                .await
                                .map_err(|panic| UnitFailure::Panicked(panic_message(panic)));
                            (index, output)
                        });
                    }
                    None => exhausted = true,
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Ok((index, result)) = done {
                        on_result(index, result);
                    }
                }
            }
        }

        let drained = tokio::time::timeout(grace, async {
            while let Some(done) = in_flight.join_next().await {
                if let Ok((index, result)) = done {
                    on_result(index, result);
                }
            }
        })
        .await;

        if drained.is_err() {
            report.abandoned = in_flight.len();
            warn!(abandoned = report.abandoned, "Grace period over, aborting running units");
            in_flight.abort_all();
            // Wait for the aborts to land; a unit may still finish first.
            while let Some(done) = in_flight.join_next().await {
                if let Ok((index, result)) = done {
                    report.abandoned -= 1;
                    on_result(index, result);
                }
            }
        }
        report
    }
}

/// Run `units` with at most `limit` in flight. Results come back in input order.
pub async fn run_bounded<I, F, T>(limit: usize, units: I) -> Result<Vec<UnitResult<T>>, RunnerError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let runner = BoundedRunner::new(limit)?;
    Ok(runner.run(stream::iter(units)).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let units: Vec<std::future::Ready<()>> = Vec::new();
        assert_eq!(
            run_bounded(0, units).await.unwrap_err(),
            RunnerError::ZeroLimit
        );
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output() {
        let units: Vec<std::future::Ready<u32>> = Vec::new();
        assert!(run_bounded(4, units).await.unwrap().is_empty());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
