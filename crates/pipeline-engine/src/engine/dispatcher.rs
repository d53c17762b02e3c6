//! Run dispatch across independent runs.
//!
//! Steps inside one run are strictly sequential; concurrency only exists
//! between runs. The dispatcher spawns each run as its own task, bounded by
//! a semaphore, and spawns fan-out children as they appear.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use super::runner::{PipelineRunner, RunOutcome};
use super::state::{RunError, RunErrorCode, RunStatus};
use crate::db::models::{NewRun, PipelineRun, RunTransition};
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;

#[derive(Clone)]
pub struct RunDispatcher {
    runner: Arc<PipelineRunner>,
    semaphore: Arc<Semaphore>,
}

impl RunDispatcher {
    pub fn new(runner: Arc<PipelineRunner>, max_concurrent_runs: usize) -> Self {
        Self {
            runner,
            semaphore: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.runner
    }

    /// Persist a queued run and start driving it in the background.
    pub async fn submit(&self, run: NewRun) -> AppResult<PipelineRun> {
        let stored = self.runner.runs().insert_run(&run).await?;
        tracing::info!(
            run_id = %stored.id,
            org_id = %stored.org_id,
            start_position = stored.start_position,
            "Run submitted"
        );
        self.spawn(stored.id);
        Ok(stored)
    }

    /// Drive a run and its descendants on a background task.
    pub fn spawn(&self, run_id: Uuid) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run_to_completion(run_id).await {
                tracing::error!(run_id = %run_id, error = %e, "Run tree aborted");
            }
        })
    }

    /// Execute a run, then every child it fans out to (recursively), and
    /// wait for all of them. Outcomes are returned in completion order.
    ///
    /// Failures of descendants are logged and do not stop their siblings;
    /// an error executing `run_id` itself is returned.
    pub async fn run_to_completion(&self, run_id: Uuid) -> AppResult<Vec<RunOutcome>> {
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::new();
        self.spawn_one(&mut tasks, run_id);

        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    tracing::error!(root_run_id = %run_id, error = %e, "Run supervisor task failed");
                    continue;
                }
            };
            match result {
                Ok(outcome) => {
                    for child in &outcome.children {
                        self.spawn_one(&mut tasks, *child);
                    }
                    outcomes.push(outcome);
                }
                Err(e) if id == run_id => return Err(e),
                Err(e) => {
                    tracing::error!(run_id = %id, root_run_id = %run_id, error = %e, "Child run errored");
                }
            }
        }

        Ok(outcomes)
    }

    fn spawn_one(&self, tasks: &mut JoinSet<(Uuid, AppResult<RunOutcome>)>, run_id: Uuid) {
        let runner = self.runner.clone();
        let semaphore = self.semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return (run_id, Err(AppError::Internal(format!("Dispatcher closed: {}", e))));
                }
            };

            // A panic inside the run ends only this inner task.
            let execution = tokio::spawn({
                let runner = runner.clone();
                async move { runner.execute(run_id).await }
            });
            let result = match execution.await {
                Ok(result) => result,
                Err(e) => {
                    abort_run(&runner, run_id, &e.to_string()).await;
                    Err(AppError::Internal(format!("Run task aborted: {}", e)))
                }
            };
            (run_id, result)
        });
    }

    /// Pick up work left by a previous process: runs stuck in `running` are
    /// put back to `queued` (single-node deployments only), then every
    /// queued run is spawned. Returns how many runs were spawned.
    pub async fn resume(&self) -> AppResult<usize> {
        let runs = self.runner.runs();

        for run in runs.list_runs_by_status(RunStatus::Running).await? {
            if runs
                .transition_run(run.id, &[RunStatus::Running], RunTransition::to(RunStatus::Queued))
                .await?
            {
                tracing::warn!(run_id = %run.id, "Requeued interrupted run");
            }
        }

        let queued = runs.list_runs_by_status(RunStatus::Queued).await?;
        for run in &queued {
            self.spawn(run.id);
        }
        tracing::info!(count = queued.len(), "Resumed queued runs");
        Ok(queued.len())
    }
}

/// Fail a run whose task died mid-execution. Its already-terminal step
/// results are left as they are.
async fn abort_run(runner: &PipelineRunner, run_id: Uuid, reason: &str) {
    let error = RunError::new(RunErrorCode::ExecutionAborted, reason);
    let _ = runner
        .runs()
        .transition_run(
            run_id,
            &[RunStatus::Queued, RunStatus::Running],
            RunTransition::to(RunStatus::Failed).with_error(error.to_value()),
        )
        .await
        .log(format!("mark aborted run {} failed", run_id));
    tracing::error!(run_id = %run_id, reason = %reason, "Run task aborted");
}
