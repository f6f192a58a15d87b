//! Bounded-parallel execution of one stage's tasks.
//!
//! Workers only call the agent; persistence and manifest updates happen in
//! the join loop so per-branch manifest writes are never concurrent. A
//! single unit failure never tears down the stage, and cancellation stops
//! admitting work immediately while in-flight calls unwind through their
//! cancel-aware agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use hookline_agent::{AgentRequest, AgentResponse, SharedAgent};
use hookline_store::ArtifactStore;
use hookline_types::{
    ArtifactId, BranchId, HooklineError, QualityGatePolicy, Result, Stage, StageArtifact,
};

use crate::events::{EventEmitter, RunEvent};
use crate::quality;
use crate::retry::{execute_with_retry, RetryPolicy};

/// One unit of work within a stage.
#[derive(Debug, Clone)]
pub struct StageTask {
    pub id: ArtifactId,
    pub request: AgentRequest,
    /// Dependency edges recorded when the artifact persists.
    pub parents: Vec<ArtifactId>,
}

/// Outcome of one stage execution.
#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub completed: Vec<ArtifactId>,
    pub failed: Vec<(ArtifactId, String)>,
    /// Persisted despite soft validation problems.
    pub soft_flagged: Vec<ArtifactId>,
    /// Tasks that never produced output because the run was cancelled.
    pub cancelled: usize,
    pub cost_usd: f64,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn all_failed(&self) -> bool {
        self.completed.is_empty() && !self.failed.is_empty()
    }
}

/// Executes the tasks of one stage with a bounded worker pool.
pub struct StageRunner {
    agent: SharedAgent,
    store: ArtifactStore,
    emitter: EventEmitter,
    retry: RetryPolicy,
}

impl StageRunner {
    pub fn new(
        agent: SharedAgent,
        store: ArtifactStore,
        emitter: EventEmitter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            agent,
            store,
            emitter,
            retry,
        }
    }

    /// Same runner backed by a different agent, for per-segment overrides.
    pub fn with_agent(&self, agent: SharedAgent) -> Self {
        Self {
            agent,
            store: self.store.clone(),
            emitter: self.emitter.clone(),
            retry: self.retry.clone(),
        }
    }

    pub async fn run_stage(
        &self,
        branch: BranchId,
        stage: Stage,
        tasks: Vec<StageTask>,
        max_parallel: usize,
        policy: &QualityGatePolicy,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let started = Instant::now();
        self.emitter.emit(RunEvent::StageStarted {
            branch,
            stage,
            tasks: tasks.len(),
        });

        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
        let mut join_set: JoinSet<(StageTask, Result<AgentResponse>, Duration)> = JoinSet::new();

        for task in tasks {
            let agent = Arc::clone(&self.agent);
            let emitter = self.emitter.clone();
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (task, Err(HooklineError::Aborted), Duration::ZERO),
                };
                // Admitted after cancellation: do not start the call.
                if cancel.is_cancelled() {
                    return (task, Err(HooklineError::Aborted), Duration::ZERO);
                }
                emitter.emit(RunEvent::UnitStarted {
                    branch,
                    stage,
                    path: task.request.path.clone(),
                });
                let unit_started = Instant::now();
                let path = task.request.path.clone();
                let result = execute_with_retry(
                    || agent.generate(task.request.clone(), &cancel),
                    &retry,
                    &task.request.task_key(),
                    |attempt| {
                        emitter.emit(RunEvent::UnitRetrying {
                            branch,
                            stage,
                            path: path.clone(),
                            attempt,
                        });
                    },
                )
                .await;
                (task, result, unit_started.elapsed())
            });
        }

        let mut report = StageReport {
            stage,
            completed: Vec::new(),
            failed: Vec::new(),
            soft_flagged: Vec::new(),
            cancelled: 0,
            cost_usd: 0.0,
            elapsed: Duration::ZERO,
        };

        while let Some(joined) = join_set.join_next().await {
            let (task, result, unit_elapsed) = joined.map_err(|e| {
                HooklineError::Other(format!("stage worker panicked: {e}"))
            })?;
            match result {
                Ok(response) => {
                    self.emitter.emit(RunEvent::UnitProgress {
                        branch,
                        stage,
                        path: task.request.path.clone(),
                        message: "output received, validating".into(),
                    });
                    match quality::enforce_policy(policy, &response.payload) {
                        Ok(problems) => {
                            if !problems.is_empty() {
                                self.emitter.emit(RunEvent::QualityProblems {
                                    branch,
                                    stage,
                                    path: task.request.path.clone(),
                                    problems,
                                });
                                report.soft_flagged.push(task.id.clone());
                            }
                            let artifact =
                                StageArtifact::new(task.id.clone(), response.payload);
                            self.store
                                .put_artifact(branch, &artifact, &task.parents)
                                .await?;
                            self.emitter.emit(RunEvent::UnitCompleted {
                                branch,
                                stage,
                                path: task.request.path,
                                cost_usd: response.cost_usd,
                                elapsed_ms: unit_elapsed.as_millis() as u64,
                            });
                            report.cost_usd += response.cost_usd;
                            report.completed.push(task.id);
                        }
                        Err(error) => {
                            self.emitter.emit(RunEvent::UnitFailed {
                                branch,
                                stage,
                                path: task.request.path,
                                error: error.to_string(),
                            });
                            report.failed.push((task.id, error.to_string()));
                        }
                    }
                }
                Err(HooklineError::Aborted) => report.cancelled += 1,
                Err(error) => {
                    self.emitter.emit(RunEvent::UnitFailed {
                        branch,
                        stage,
                        path: task.request.path,
                        error: error.to_string(),
                    });
                    report.failed.push((task.id, error.to_string()));
                }
            }
        }

        report.elapsed = started.elapsed();
        if report.cancelled == 0 {
            self.emitter.emit(RunEvent::StageCompleted {
                branch,
                stage,
                completed: report.completed.len(),
                failed: report.failed.len(),
                duration_ms: report.elapsed.as_millis() as u64,
            });
        }
        tracing::info!(
            branch = %branch,
            stage = %stage,
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "Stage finished"
        );
        Ok(report)
    }
}
