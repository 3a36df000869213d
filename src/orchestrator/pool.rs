//! Bounded worker pool for one transfer phase
//!
//! Every job is queued up front on a channel sized to the phase. A fixed number
//! of workers pull from the shared receiver and report on a completion
//! channel, which the caller drains until all workers have exited.
//!
//! The first failing job cancels the pool. Workers stop pulling new jobs, and a
//! job dequeued after cancellation is dropped unstarted. In-flight jobs run to
//! completion and their outcomes are dropped.

use crate::error::{Error, Result};
use crate::types::Phase;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Run `handler` over `jobs` with at most `workers` jobs in flight
///
/// Results come back in completion order. Returns the first error reported by
/// any job, or [`Error::WorkerLost`] if a worker panicked.
pub async fn run_phase<J, T, E, H, Fut>(
    phase: Phase,
    workers: usize,
    jobs: Vec<J>,
    handler: H,
) -> Result<Vec<T>>
where
    J: Send + 'static,
    T: Send + 'static,
    E: Into<Error> + Send + 'static,
    H: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    let total = jobs.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, total);

    let (job_tx, job_rx) = mpsc::channel::<J>(total);
    for job in jobs {
        // capacity equals the job count, so this never waits
        if job_tx.send(job).await.is_err() {
            return Err(Error::WorkerLost {
                phase,
                reason: "job queue closed before workers started".to_string(),
            });
        }
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (done_tx, mut done_rx) = mpsc::channel::<Result<T>>(total);
    let cancel = CancellationToken::new();
    let handler = Arc::new(handler);

    tracing::debug!(%phase, workers, total, "Starting worker pool");

    let mut set = JoinSet::new();
    for worker in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let done_tx = done_tx.clone();
        let cancel = cancel.clone();
        let handler = Arc::clone(&handler);

        set.spawn(async move {
            loop {
                let Some(job) = next_job(&job_rx, &cancel).await else {
                    tracing::debug!(
                        %phase,
                        worker,
                        cancelled = cancel.is_cancelled(),
                        "Worker stopping"
                    );
                    break;
                };

                let result = handler(job).await.map_err(Into::into);
                if result.is_err() {
                    cancel.cancel();
                }
                if done_tx.send(result).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(done_tx);

    let mut results = Vec::with_capacity(total);
    let mut first_error: Option<Error> = None;

    // ends once every worker has dropped its sender
    while let Some(result) = done_rx.recv().await {
        match result {
            Ok(value) if first_error.is_none() => results.push(value),
            Ok(_) => {}
            Err(e) => {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(e);
                } else {
                    tracing::debug!(%phase, error = %e, "Discarding failure after cancellation");
                }
            }
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined
            && first_error.is_none()
        {
            first_error = Some(Error::WorkerLost {
                phase,
                reason: panic_reason(e),
            });
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if results.len() != total {
        return Err(Error::WorkerLost {
            phase,
            reason: format!("{} of {} jobs reported a result", results.len(), total),
        });
    }
    Ok(results)
}

/// Take the next queued job, or `None` once the queue is empty or cancelled
///
/// The token is checked again after dequeuing: cancellation can land while
/// this worker waits for the queue lock.
async fn next_job<J>(job_rx: &Mutex<mpsc::Receiver<J>>, cancel: &CancellationToken) -> Option<J> {
    if cancel.is_cancelled() {
        return None;
    }
    let job = job_rx.lock().await.recv().await?;
    if cancel.is_cancelled() {
        return None;
    }
    Some(job)
}

fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
