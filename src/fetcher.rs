//! Concurrent retrieval of many independent resources with a fixed cap

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GmailError, Result};

/// Default number of fetches in flight
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Upper bound accepted for the concurrency cap
pub const MAX_CONCURRENCY: usize = 50;

/// Progress callback invoked once per finished item
pub type ProgressCallback = Arc<dyn Fn() + Send + Sync>;

/// Results of a bounded fetch: successes in completion order plus per-item failures
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub fetched: Vec<T>,
    pub failures: Vec<(String, GmailError)>,
}

impl<T> FetchOutcome<T> {
    pub fn total(&self) -> usize {
        self.fetched.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().map(|(id, _)| id.clone()).collect()
    }

    /// All items, or [`GmailError::PartialFetch`] if any single fetch failed.
    /// Mutation paths that need every item use this; display paths read
    /// `fetched` directly.
    pub fn into_result(self) -> Result<Vec<T>> {
        if self.failures.is_empty() {
            return Ok(self.fetched);
        }
        Err(GmailError::PartialFetch {
            total: self.total(),
            succeeded: self.fetched.len(),
            failed_ids: self.failed_ids(),
        })
    }
}

pub struct BoundedFetcher {
    concurrency: usize,
    on_item: Option<ProgressCallback>,
}

impl BoundedFetcher {
    /// Create a fetcher running at most `concurrency` fetches at once.
    ///
    /// A cap of zero or above [`MAX_CONCURRENCY`] is a configuration error.
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(GmailError::ConfigError(format!(
                "fetch concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, concurrency
            )));
        }
        Ok(Self {
            concurrency,
            on_item: None,
        })
    }

    pub fn with_progress(mut self, on_item: ProgressCallback) -> Self {
        self.on_item = Some(on_item);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every id with `fetch`, keeping at most `concurrency` calls in flight.
    ///
    /// Results arrive in completion order, not input order. One item's failure
    /// never stops the others.
    pub async fn fetch_all<T, F, Fut>(&self, ids: Vec<String>, fetch: F) -> FetchOutcome<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = ids.len();
        info!(
            "Fetching {} items with {} concurrent workers",
            total, self.concurrency
        );

        let fetch = &fetch;
        let on_item = self.on_item.as_ref();
        let results: Vec<(String, Result<T>)> = stream::iter(ids)
            .map(|id| async move {
                let result = fetch(id.clone()).await;
                if let Some(callback) = on_item {
                    callback();
                }
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = FetchOutcome {
            fetched: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        for (id, result) in results {
            match result {
                Ok(item) => outcome.fetched.push(item),
                Err(e) => {
                    debug!("Fetch of {} failed: {}", id, e);
                    outcome.failures.push((id, e));
                }
            }
        }

        if outcome.failures.is_empty() {
            info!("Fetched all {} items", total);
        } else {
            warn!(
                "Fetched {} of {} items, {} failed",
                outcome.fetched.len(),
                total,
                outcome.failures.len()
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("msg-{}", i)).collect()
    }

    #[test]
    fn test_rejects_invalid_concurrency() {
        assert!(matches!(BoundedFetcher::new(0), Err(GmailError::ConfigError(_))));
        assert!(matches!(
            BoundedFetcher::new(MAX_CONCURRENCY + 1),
            Err(GmailError::ConfigError(_))
        ));
        assert_eq!(BoundedFetcher::new(DEFAULT_CONCURRENCY).unwrap().concurrency(), 20);
    }

    #[tokio::test]
    async fn test_never_exceeds_concurrency_cap() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let fetcher = BoundedFetcher::new(20).unwrap();

        let outcome = fetcher
            .fetch_all(ids(45), |id| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(id)
                }
            })
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.fetched.len(), 45);
        assert!(peak.load(Ordering::SeqCst) <= 20);
        assert_eq!(peak.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_item() {
        let fetcher = BoundedFetcher::new(4).unwrap();
        let outcome = fetcher
            .fetch_all(ids(6), |id| async move {
                if id == "msg-2" || id == "msg-5" {
                    Err(GmailError::Http {
                        status: 404,
                        status_text: "Not Found".to_string(),
                    })
                } else {
                    Ok(id)
                }
            })
            .await;

        assert_eq!(outcome.fetched.len(), 4);
        let mut failed = outcome.failed_ids();
        failed.sort();
        assert_eq!(failed, vec!["msg-2".to_string(), "msg-5".to_string()]);

        match outcome.into_result() {
            Err(GmailError::PartialFetch {
                total, succeeded, ..
            }) => {
                assert_eq!(total, 6);
                assert_eq!(succeeded, 4);
            }
            other => panic!("expected partial fetch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_callback_counts_every_item() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let fetcher = BoundedFetcher::new(3)
            .unwrap()
            .with_progress(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let outcome = fetcher
            .fetch_all(ids(7), |id| async move { Ok::<_, GmailError>(id.len()) })
            .await;

        assert_eq!(outcome.into_result().unwrap().len(), 7);
        assert_eq!(ticks.load(Ordering::SeqCst), 7);
    }
}
