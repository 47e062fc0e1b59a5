//! Bounded worker pool used by every `process_many` implementation.
//!
//! Jobs are queued on an `async_channel`; `workers` tasks drain it and each
//! keeps its own [`ParseStats`]. [`run`] returns only after every worker has
//! been joined, so no engine invocation outlives the call.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ParseStats;

/// Completion counter that logs at fixed milestones.
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicUsize,
}

impl Progress {
    /// Record `n` finished inputs and return the new total.
    pub fn advance(&self, n: usize) -> usize {
        let before = self.done.fetch_add(n, Ordering::AcqRel);
        let after = before + n;
        if after / 1_000 != before / 1_000 {
            tracing::debug!("{after} PDF files are processed");
        }
        if after / 10_000 != before / 10_000 {
            tracing::info!("{after} PDF files are processed");
        }
        after
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }
}

/// Run `work` over `jobs` on at most `workers` concurrent tasks.
///
/// Each job's `processed` count feeds the progress milestones. Results are
/// merged in whatever order workers finish.
pub async fn run<J, F, Fut>(jobs: Vec<J>, workers: usize, work: F) -> ParseStats
where
    J: Send + 'static,
    F: Fn(J) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ParseStats> + Send + 'static,
{
    if jobs.is_empty() {
        return ParseStats::default();
    }

    let num_workers = workers.max(1).min(jobs.len());
    let (job_tx, job_rx) = async_channel::unbounded::<J>();
    for job in jobs {
        // Unbounded: never waits, and the receiver is alive.
        let _ = job_tx.send(job).await;
    }
    job_tx.close();

    let progress = Arc::new(Progress::default());
    let mut handles = Vec::with_capacity(num_workers);

    for _ in 0..num_workers {
        let job_rx = job_rx.clone();
        let work = work.clone();
        let progress = Arc::clone(&progress);
        handles.push(tokio::spawn(async move {
            let mut stats = ParseStats::default();
            while let Ok(job) = job_rx.recv().await {
                let outcome = work(job).await;
                progress.advance(outcome.processed);
                stats.merge(outcome);
            }
            stats
        }));
    }
    drop(job_rx);

    let mut total = ParseStats::default();
    for handle in handles {
        match handle.await {
            Ok(stats) => total.merge(stats),
            Err(e) => tracing::error!(error = %e, "worker task failed"),
        }
    }
    tracing::debug!(
        completed = progress.completed(),
        failed = total.failed.len(),
        "worker pool drained"
    );
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn progress_counts() {
        let progress = Progress::default();
        assert_eq!(progress.advance(999), 999);
        assert_eq!(progress.advance(2), 1001);
        assert_eq!(progress.completed(), 1001);
    }

    #[tokio::test]
    async fn empty_job_list() {
        let stats = run(Vec::<u32>::new(), 4, |_| async { ParseStats::done(1) }).await;
        assert_eq!(stats, ParseStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_and_all_jobs_joined() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let work = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let finished = Arc::clone(&finished);
            move |_job: usize| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                let finished = Arc::clone(&finished);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                    ParseStats::done(1)
                }
            }
        };

        let stats = run((0..40).collect(), 3, work).await;

        assert_eq!(stats.processed, 40);
        assert_eq!(finished.load(Ordering::SeqCst), 40);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_are_collected() {
        let stats = run(vec![1u32, 2, 3, 4], 2, |n| async move {
            if n % 2 == 0 {
                ParseStats {
                    processed: 1,
                    failed: vec![PathBuf::from(format!("{n}.pdf"))],
                }
            } else {
                ParseStats::done(1)
            }
        })
        .await;

        assert_eq!(stats.processed, 4);
        let mut failed = stats.failed.clone();
        failed.sort();
        assert_eq!(failed, vec![PathBuf::from("2.pdf"), PathBuf::from("4.pdf")]);
    }
}
