//! Staggered scheduling of mutating calls
//!
//! Task *i* (1-indexed) of a run starts at `i × interval(mode)` after the run
//! began, independent of when task *i-1* finished. All tasks are driven
//! concurrently, so a slow call overlaps with the ones scheduled after it
//! instead of pushing them back. Each task's outcome is collected into a
//! [`PaceReport`]; one failure never cancels its siblings.
//!
//! In dry-run mode a task still waits for its slot and is logged, but the
//! mutation itself is skipped, so a dry run takes as long as the real one.

use futures::future::join_all;
use std::fmt;
use std::future::Future;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::rate_limiter::{QuotaRateLimiter, QuotaStats};

/// Kind of mutation being paced; each kind has its own interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaceMode {
    Create,
    Update,
    Delete,
    Modify,
}

impl fmt::Display for PaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            PaceMode::Create => "create",
            PaceMode::Update => "update",
            PaceMode::Delete => "delete",
            PaceMode::Modify => "modify",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceIntervals {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
    pub modify: Duration,
}

impl Default for PaceIntervals {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(5),
            update: Duration::from_secs(1),
            delete: Duration::from_secs(1),
            modify: Duration::from_millis(250),
        }
    }
}

impl PaceIntervals {
    pub fn for_mode(&self, mode: PaceMode) -> Duration {
        match mode {
            PaceMode::Create => self.create,
            PaceMode::Update => self.update,
            PaceMode::Delete => self.delete,
            PaceMode::Modify => self.modify,
        }
    }
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// Dry run: the slot was consumed but nothing was sent
    Skipped,
    Failed(GmailError),
}

/// One scheduled task and what happened to it
#[derive(Debug)]
pub struct PacedEntry<I, T> {
    /// 1-based position in the run
    pub index: usize,
    /// Scheduled start, relative to the start of the run
    pub offset: Duration,
    pub item: I,
    pub outcome: TaskOutcome<T>,
}

/// Outcomes of a paced run, in scheduling order
#[derive(Debug)]
pub struct PaceReport<I, T> {
    pub mode: PaceMode,
    pub entries: Vec<PacedEntry<I, T>>,
}

impl<I, T> PaceReport<I, T> {
    pub fn completed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TaskOutcome::Completed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TaskOutcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, TaskOutcome::Failed(_)))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&I, &GmailError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            TaskOutcome::Failed(err) => Some((&e.item, err)),
            _ => None,
        })
    }

    pub fn completed_values(&self) -> impl Iterator<Item = (&I, &T)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            TaskOutcome::Completed(value) => Some((&e.item, value)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pacer {
    intervals: PaceIntervals,
    dry_run: bool,
    budget: Option<QuotaRateLimiter>,
}

impl Pacer {
    pub fn new(intervals: PaceIntervals, dry_run: bool) -> Self {
        Self {
            intervals,
            dry_run,
            budget: None,
        }
    }

    /// Pacer with the configured intervals, dry-run flag and mutation budget
    pub fn from_config(config: &Config) -> Self {
        let pacing = &config.pacing;
        let intervals = PaceIntervals {
            create: Duration::from_secs(pacing.create_interval_secs),
            update: Duration::from_secs(pacing.update_interval_secs),
            delete: Duration::from_secs(pacing.delete_interval_secs),
            modify: Duration::from_millis(pacing.modify_interval_ms),
        };
        Self::new(intervals, config.execution.dry_run).with_budget(
            QuotaRateLimiter::per_minute(pacing.mutations_per_minute, pacing.mutation_burst),
        )
    }

    /// Gate real mutations behind a shared token bucket
    pub fn with_budget(mut self, budget: QuotaRateLimiter) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn interval(&self, mode: PaceMode) -> Duration {
        self.intervals.for_mode(mode)
    }

    /// Run `task` once per item, each at its own scheduled offset.
    ///
    /// `describe` names an item in log lines. Returns once every task has
    /// finished.
    pub async fn run<I, T, D, F, Fut>(
        &self,
        mode: PaceMode,
        items: Vec<I>,
        describe: D,
        task: F,
    ) -> PaceReport<I, T>
    where
        I: Clone,
        D: Fn(&I) -> String,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let interval = self.interval(mode);
        let count = items.len();
        if count > 0 {
            info!(
                "Scheduling {} {} operations {:.1}s apart{}",
                count,
                mode,
                interval.as_secs_f64(),
                if self.dry_run { " (dry run)" } else { "" }
            );
        }

        let start = Instant::now();
        let describe = &describe;
        let task = &task;
        let scheduled = items.into_iter().enumerate().map(|(i, item)| {
            let index = i + 1;
            let offset = interval.saturating_mul(index as u32);
            async move {
                tokio::time::sleep_until(start + offset).await;
                let name = describe(&item);

                let outcome = if self.dry_run {
                    info!("[dry run] would {} {}", mode, name);
                    TaskOutcome::Skipped
                } else {
                    if let Some(budget) = &self.budget {
                        budget.acquire().await;
                    }
                    debug!("{} {} ({}/{})", mode, name, index, count);
                    match task(item.clone()).await {
                        Ok(value) => TaskOutcome::Completed(value),
                        Err(e) => {
                            warn!("Failed to {} {}: {}", mode, name, e);
                            TaskOutcome::Failed(e)
                        }
                    }
                };

                PacedEntry {
                    index,
                    offset,
                    item,
                    outcome,
                }
            }
        });

        let entries = join_all(scheduled).await;
        let report = PaceReport { mode, entries };
        if count > 0 {
            info!(
                "Paced {} run finished: {} completed, {} skipped, {} failed",
                mode,
                report.completed(),
                report.skipped(),
                report.failed()
            );
            if let Some(stats) = self.budget_stats().await {
                debug!(
                    "Mutation budget: {} granted, {:.1}/{} left, {:.1}s spent waiting",
                    stats.granted,
                    stats.available,
                    stats.capacity,
                    stats.waited.as_secs_f64()
                );
            }
        }
        report
    }

    /// Usage of the shared mutation budget, if one is attached
    pub async fn budget_stats(&self) -> Option<QuotaStats> {
        match &self.budget {
            Some(budget) => Some(budget.stats().await),
            None => None,
        }
    }

    /// Pace a single mutation. `Ok(None)` means it was skipped by dry run.
    pub async fn run_one<T, F, Fut>(&self, mode: PaceMode, name: &str, task: F) -> Result<Option<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let report = self
            .run(mode, vec![name.to_string()], |n| n.clone(), |_| task())
            .await;
        match report.entries.into_iter().next().map(|e| e.outcome) {
            Some(TaskOutcome::Completed(value)) => Ok(Some(value)),
            Some(TaskOutcome::Failed(e)) => Err(e),
            Some(TaskOutcome::Skipped) | None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pacer(create_secs: u64, dry_run: bool) -> Pacer {
        Pacer::new(
            PaceIntervals {
                create: Duration::from_secs(create_secs),
                ..Default::default()
            },
            dry_run,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_start_at_fixed_offsets_despite_slow_task() {
        let starts = Mutex::new(Vec::new());
        let start = Instant::now();

        let report = pacer(5, false)
            .run(
                PaceMode::Create,
                vec!["a", "b", "c"],
                |item| item.to_string(),
                |item| {
                    let starts = &starts;
                    async move {
                        starts.lock().unwrap().push((item, start.elapsed()));
                        if item == "a" {
                            // Still running when "b" and "c" are due
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Ok(())
                    }
                },
            )
            .await;

        let starts = starts.into_inner().unwrap();
        assert_eq!(
            starts,
            vec![
                ("a", Duration::from_secs(5)),
                ("b", Duration::from_secs(10)),
                ("c", Duration::from_secs(15)),
            ]
        );
        assert_eq!(report.completed(), 3);
        let offsets: Vec<_> = report.entries.iter().map(|e| e.offset).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_keeps_slots_and_skips_mutation() {
        let calls = Mutex::new(0usize);
        let start = Instant::now();

        let report = pacer(5, true)
            .run(
                PaceMode::Create,
                vec![1, 2, 3],
                |n| format!("filter {}", n),
                |_| {
                    let calls = &calls;
                    async move {
                        *calls.lock().unwrap() += 1;
                        Ok(())
                    }
                },
            )
            .await;

        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(report.skipped(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_cancel_siblings() {
        let report = pacer(5, false)
            .run(
                PaceMode::Delete,
                vec!["f1", "f2", "f3"],
                |id| id.to_string(),
                |id| async move {
                    if id == "f2" {
                        Err(GmailError::Http {
                            status: 404,
                            status_text: "Not Found".to_string(),
                        })
                    } else {
                        Ok(id.len())
                    }
                },
            )
            .await;

        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 1);
        let failed: Vec<_> = report.failures().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec!["f2"]);
        assert!(!report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_mode_uses_its_own_interval() {
        let start = Instant::now();
        let report = pacer(5, false)
            .run(
                PaceMode::Delete,
                vec![1, 2],
                |n| n.to_string(),
                |_| async { Ok(()) },
            )
            .await;

        assert_eq!(report.completed(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_delays_mutations_beyond_slot() {
        // One token, refilled once per second; modify slots are 250ms apart
        let pacer = Pacer::new(PaceIntervals::default(), false)
            .with_budget(QuotaRateLimiter::per_minute(60, 1));
        let start = Instant::now();

        let report = pacer
            .run(
                PaceMode::Modify,
                vec![1, 2],
                |n| n.to_string(),
                |_| async { Ok(()) },
            )
            .await;

        assert_eq!(report.completed(), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
        let stats = pacer.budget_stats().await.unwrap();
        assert_eq!(stats.granted, 2);
        assert!(stats.waited > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_one_maps_outcomes() {
        let real = pacer(5, false);
        let value = real
            .run_one(PaceMode::Update, "label", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, Some(7));

        let err = real
            .run_one(PaceMode::Update, "label", || async {
                Err::<(), _>(GmailError::ApiError("boom".to_string()))
            })
            .await;
        assert!(matches!(err, Err(GmailError::ApiError(_))));

        let skipped = pacer(5, true)
            .run_one(PaceMode::Update, "label", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(skipped, None);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let report: PaceReport<u32, ()> = Pacer::default()
            .run(PaceMode::Create, Vec::<u32>::new(), |n| n.to_string(), |_| async {
                Ok(())
            })
            .await;
        assert!(report.entries.is_empty());
        assert!(report.is_success());
    }
}
