//! Bounded, ticketed parallel execution.
//!
//! A reusable fan-out utility: at most `limit` tasks in flight, at most one
//! task started per ticket interval, results returned in submission order
//! with per-task errors accumulated rather than failing fast.
//!
//! Used by replay dispatch (clear calls against the external scheduler) and
//! by the data-resource lifecycle outside this crate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Default in-flight limit for request-scoped fan-out.
pub const DEFAULT_CONCURRENT_LIMIT: usize = 20;

/// Default ticket interval: one task start per 200 ms (5 per second).
pub const DEFAULT_TICKET_INTERVAL: Duration = Duration::from_millis(200);

/// A boxed unit of work submitted to the runner.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A ticketed worker pool with bounded concurrency.
#[derive(Debug, Clone)]
pub struct ParallelRunner {
    limit: usize,
    ticket_interval: Duration,
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_LIMIT, DEFAULT_TICKET_INTERVAL)
    }
}

impl ParallelRunner {
    /// Creates a runner with the given in-flight limit and ticket interval.
    ///
    /// A zero limit is treated as one.
    #[must_use]
    pub fn new(limit: usize, ticket_interval: Duration) -> Self {
        Self {
            limit: limit.max(1),
            ticket_interval,
        }
    }

    /// Executes `tasks`, returning one result per task in submission order.
    ///
    /// Backpressure is implicit: a task waits for a free worker slot and a
    /// start ticket before running. Cancellation admits no new work — tasks
    /// that have not started resolve to [`Error::Cancelled`] — while tasks
    /// already in flight run to completion.
    pub async fn run<T>(
        &self,
        tasks: Vec<TaskFuture<T>>,
        cancel: &CancellationToken,
    ) -> Vec<Result<T>>
    where
        T: Send + 'static,
    {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let tickets = Arc::new(tokio::sync::Mutex::new(tokio::time::interval(
            self.ticket_interval,
        )));

        let mut join_set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let tickets = Arc::clone(&tickets);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(Error::Cancelled));
                };
                {
                    let mut interval = tickets.lock().await;
                    tokio::select! {
                        _ = interval.tick() => {}
                        () = cancel.cancelled() => return (index, Err(Error::Cancelled)),
                    }
                }
                if cancel.is_cancelled() {
                    return (index, Err(Error::Cancelled));
                }
                (index, task.await)
            });
        }

        let mut results: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(err) => {
                    // A panicking task loses its index; surface the failure
                    // in the first empty slot rather than dropping it.
                    if let Some(slot) = results.iter_mut().find(|r| r.is_none()) {
                        *slot = Some(Err(Error::storage(format!("task panicked: {err}"))));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(Error::Cancelled)))
            .collect()
    }
}
