//! Stage Dispatcher: parallel, idempotent, failure-isolated per-item execution

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::{EchoError, Result};
use crate::sink;

/// Anything a stage can be mapped over.
pub trait WorkItem: Send + Sync {
    /// Identity used in logs and failure reports.
    fn label(&self) -> String;
}

impl WorkItem for PathBuf {
    fn label(&self) -> String {
        self.display().to_string()
    }
}

/// What a stage reports for one item it ran on.
#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Written,
    /// Expected, item-specific reason not to produce output.
    Skipped(String),
}

/// A pure per-item transformation with a deterministic output path.
pub trait Stage: Sync {
    type Item: WorkItem;

    fn name(&self) -> &str;

    fn output_path(&self, item: &Self::Item) -> PathBuf;

    /// Produce `output` from `item`. Creating the output directory is the
    /// stage's job (the sink does it on write).
    fn run(&self, item: &Self::Item, output: &Path) -> Result<StageStatus>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded,
    /// Output was already present and `skip_existing` was set.
    AlreadyPresent,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub label: String,
    /// `None` for work whose result is kept in memory.
    pub output: Option<PathBuf>,
    pub outcome: Outcome,
}

/// Counts of one dispatcher run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub stage: String,
    pub inputs: usize,
    pub succeeded: usize,
    /// Includes items whose output already existed.
    pub skipped: usize,
    pub already_present: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn from_reports(stage: &str, reports: &[ItemReport], elapsed: Duration) -> Self {
        let mut summary = RunSummary {
            stage: stage.to_string(),
            inputs: reports.len(),
            elapsed,
            ..Default::default()
        };
        for report in reports {
            match &report.outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::AlreadyPresent => {
                    summary.skipped += 1;
                    summary.already_present += 1;
                }
                Outcome::Skipped(_) => summary.skipped += 1,
                Outcome::Failed(reason) => {
                    summary.failed += 1;
                    summary.failures.push((report.label.clone(), reason.clone()));
                }
            }
        }
        summary
    }

    fn log(&self) {
        info!(
            stage = %self.stage,
            succeeded = self.succeeded,
            skipped = self.skipped,
            failed = self.failed,
            elapsed_s = self.elapsed.as_secs_f64(),
            "run complete"
        );
    }

    /// `EmptyResult` when there were inputs but no output was written or
    /// already present.
    pub fn ensure_output(&self) -> Result<()> {
        if self.inputs > 0 && self.succeeded == 0 && self.already_present == 0 {
            return Err(EchoError::EmptyResult(format!(
                "{}: none of {} inputs produced output ({} skipped, {} failed)",
                self.stage, self.inputs, self.skipped, self.failed
            )));
        }
        Ok(())
    }
}

/// Bounded worker pool shared by every stage of a run.
pub struct Dispatcher {
    config: DispatchConfig,
    pool: ThreadPool,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let threads = config.pool_size()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("echogrid-worker-{i}"))
            .build()
            .map_err(|e| EchoError::Config(format!("unable to start worker pool: {e}")))?;
        debug!(workers = config.workers, threads = config.threads, "worker pool ready");
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run `stage` over `items` and wait for all of them.
    ///
    /// Items whose output exists are skipped up front when `skip_existing` is
    /// set. An error or panic in one item is recorded against that item only.
    pub fn run<S: Stage>(&self, stage: &S, items: &[S::Item]) -> RunSummary {
        let started = Instant::now();
        let planned: Vec<(&S::Item, PathBuf)> = items
            .iter()
            .map(|item| (item, stage.output_path(item)))
            .collect();

        let (existing, pending): (Vec<_>, Vec<_>) = planned
            .into_iter()
            .partition(|(_, output)| self.config.skip_existing && sink::exists(output));

        info!(
            stage = stage.name(),
            submitted = pending.len(),
            already_present = existing.len(),
            "dispatching"
        );

        let mut reports: Vec<ItemReport> = existing
            .into_iter()
            .map(|(item, output)| {
                debug!(stage = stage.name(), item = %item.label(), "output exists, skipping");
                ItemReport {
                    label: item.label(),
                    output: Some(output),
                    outcome: Outcome::AlreadyPresent,
                }
            })
            .collect();

        let completed: Vec<ItemReport> = self.pool.install(|| {
            pending
                .into_par_iter()
                .map(|(item, output)| run_one(stage, item, output))
                .collect()
        });
        reports.extend(completed);

        let summary = RunSummary::from_reports(stage.name(), &reports, started.elapsed());
        summary.log();
        summary
    }

    /// Run `work` over `items` on the pool and keep the results that came
    /// back, in item order. Failures are isolated and reported as in [`Dispatcher::run`].
    pub fn collect<I, T, F>(&self, name: &str, items: &[I], work: F) -> (Vec<T>, RunSummary)
    where
        I: WorkItem,
        T: Send,
        F: Fn(&I) -> Result<T> + Sync,
    {
        let started = Instant::now();
        info!(stage = name, submitted = items.len(), "dispatching");

        let results: Vec<(ItemReport, Option<T>)> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let label = item.label();
                    let (outcome, value) = match guarded(name, &label, || work(item)) {
                        Ok(value) => {
                            debug!(stage = name, item = %label, "done");
                            (Outcome::Succeeded, Some(value))
                        }
                        Err(reason) => (Outcome::Failed(reason), None),
                    };
                    let report = ItemReport {
                        label,
                        output: None,
                        outcome,
                    };
                    (report, value)
                })
                .collect()
        });
        let (reports, values): (Vec<ItemReport>, Vec<Option<T>>) = results.into_iter().unzip();

        let summary = RunSummary::from_reports(name, &reports, started.elapsed());
        summary.log();
        (values.into_iter().flatten().collect(), summary)
    }
}

/// Runs one item's work, turning an error or a panic into a logged failure reason.
fn guarded<T>(stage: &str, label: &str, work: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(stage, item = %label, error = %e, "failed");
            Err(e.to_string())
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(stage, item = %label, %reason, "panicked");
            Err(format!("panic: {reason}"))
        }
    }
}

fn run_one<S: Stage>(stage: &S, item: &S::Item, output: PathBuf) -> ItemReport {
    let label = item.label();
    let outcome = match guarded(stage.name(), &label, || stage.run(item, &output)) {
        Ok(StageStatus::Written) => {
            info!(stage = stage.name(), item = %label, output = %output.display(), "done");
            Outcome::Succeeded
        }
        Ok(StageStatus::Skipped(reason)) => {
            warn!(stage = stage.name(), item = %label, %reason, "skipped");
            Outcome::Skipped(reason)
        }
        Err(reason) => Outcome::Failed(reason),
    };
    ItemReport {
        label,
        output: Some(output),
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
