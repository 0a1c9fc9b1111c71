//! Bounded-concurrency execution of per-URL work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("{0}")]
    Failed(String),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("batch deadline exceeded")]
    TimedOut,
}

#[derive(Debug)]
pub struct BatchResult<T> {
    pub url: String,
    pub outcome: Result<T, BatchError>,
}

impl<T> BatchResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
    max_concurrency: usize,
    deadline: Duration,
}

impl BatchRunner {
    pub fn new(max_concurrency: usize, deadline: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            deadline,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `work` once per URL, at most `max_concurrency` at a time.
    ///
    /// Always returns exactly one result per input URL. A failing or panicking
    /// unit only affects its own slot; units still running at the deadline are
    /// aborted and reported as `TimedOut`. Results are keyed by URL, not by
    /// position.
    pub async fn run<T, F, Fut>(&self, urls: Vec<String>, work: F) -> Vec<BatchResult<T>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let work = Arc::new(work);
        let deadline = Instant::now() + self.deadline;
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let sem = Arc::clone(&sem);
            let work = Arc::clone(&work);
            let task_url = url.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                work(task_url).await
            });

            handles.push((url, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (url, mut handle) in handles {
            let outcome = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(e))) => {
                    warn!("{}: {:#}", url, e);
                    Err(BatchError::Failed(format!("{:#}", e)))
                }
                Ok(Err(e)) if e.is_panic() => {
                    error!("Task panic for {}: {}", url, e);
                    Err(BatchError::Panicked(e.to_string()))
                }
                Ok(Err(e)) => Err(BatchError::Failed(e.to_string())),
                Err(_) => {
                    handle.abort();
                    warn!("{}: abandoned at batch deadline", url);
                    Err(BatchError::TimedOut)
                }
            };
            results.push(BatchResult { url, outcome });
        }

        debug!(
            "Batch done: {}/{} ok",
            results.iter().filter(|r| r.is_ok()).count(),
            results.len()
        );
        results
    }
}
