//! Run coordination: gated stage sequencing over one branch at a time.
//!
//! The coordinator owns the only mutable path through a branch. One run
//! segment executes one stage and then pauses at its gate; `continue_gate`
//! starts the next segment. At most one segment is active across the whole
//! brand, which is also what keeps manifest writes serialized.

use std::sync::Arc;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use hookline_agent::{AgentParams, AgentRequest, CostTracker, SharedAgent};
use hookline_store::{ArtifactStore, BranchManager};
use hookline_types::{
    ArtifactId, Branch, BranchId, BranchSettings, BranchStatus, GatePhase, GateState,
    HooklineError, Result, RunId, Stage, StageArtifact, StagePayload, UnitKey, UnitPath,
};

use crate::events::{EventEmitter, RunEvent};
use crate::gate::GateController;
use crate::quality;
use crate::retry::RetryPolicy;
use crate::runner::{StageReport, StageRunner, StageTask};

/// Per-segment adjustments supplied when resuming a gate or rerunning a
/// unit: replacement guidance for the stage's requests and, for library
/// callers, a replacement agent implementation. Applies to that segment
/// only and never persists.
#[derive(Clone, Default)]
pub struct StageOverride {
    pub instructions: Option<String>,
    pub agent: Option<SharedAgent>,
}

struct ActiveRun {
    branch: BranchId,
    cancel: CancellationToken,
}

/// Clears the active slot when a segment ends, normally or otherwise.
struct RunGuard<'a> {
    coordinator: &'a RunCoordinator,
    cancel: CancellationToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.coordinator.active.lock().unwrap() = None;
    }
}

pub struct RunCoordinator {
    store: ArtifactStore,
    branches: BranchManager,
    runner: StageRunner,
    gate: GateController,
    emitter: EventEmitter,
    cost: CostTracker,
    active: Mutex<Option<ActiveRun>>,
}

impl RunCoordinator {
    pub fn new(store: ArtifactStore, agent: SharedAgent, retry: RetryPolicy) -> Self {
        let emitter = EventEmitter::default();
        Self {
            branches: BranchManager::new(store.clone()),
            runner: StageRunner::new(agent, store.clone(), emitter.clone(), retry),
            gate: GateController::new(store.clone()),
            emitter,
            cost: CostTracker::new(),
            store,
            active: Mutex::new(None),
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost.total_usd()
    }

    fn activate(&self, branch: BranchId) -> Result<RunGuard<'_>> {
        let mut slot = self.active.lock().unwrap();
        if let Some(active) = &*slot {
            return Err(HooklineError::RunActive {
                branch: active.branch.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRun {
            branch,
            cancel: cancel.clone(),
        });
        Ok(RunGuard {
            coordinator: self,
            cancel,
        })
    }

    fn branch_is_active(&self, branch: BranchId) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|a| a.branch == branch)
    }

    // --- branch lifecycle ---

    /// Create a branch and announce it on the event stream.
    pub async fn create_branch(
        &self,
        label: impl Into<String>,
        settings: BranchSettings,
    ) -> Result<Branch> {
        let branch = self.branches.create(label, settings).await?;
        self.emitter.emit(RunEvent::BranchCreated {
            branch: branch.id,
            label: branch.label.clone(),
        });
        Ok(branch)
    }

    /// Delete a branch and announce it. Rejected while the branch has a
    /// segment in flight.
    pub async fn delete_branch(&self, branch: BranchId) -> Result<()> {
        if self.branch_is_active(branch) {
            return Err(HooklineError::RunActive {
                branch: branch.to_string(),
            });
        }
        self.branches.delete(branch).await?;
        self.emitter.emit(RunEvent::BranchDeleted { branch });
        Ok(())
    }

    // --- run control ---

    /// Start a branch run from idle. Executes the research stage, then
    /// pauses at its gate.
    pub async fn start_run(&self, branch: BranchId) -> Result<GateState> {
        let meta = self.branches.load(branch).await?;
        let guard = self.activate(branch)?;
        self.gate.begin(branch, Stage::Research).await?;

        let run = RunId::new();
        self.emitter.emit(RunEvent::RunStarted {
            run,
            branch,
            stage: Stage::Research,
        });
        self.run_segment_guarded(run, branch, Stage::Research, &meta, &StageOverride::default(), &guard)
            .await
    }

    /// Resume past the current gate into the next stage.
    pub async fn continue_gate(&self, branch: BranchId) -> Result<GateState> {
        self.continue_gate_with(branch, StageOverride::default()).await
    }

    /// Resume past the current gate, applying `overrides` to the next
    /// segment only.
    pub async fn continue_gate_with(
        &self,
        branch: BranchId,
        overrides: StageOverride,
    ) -> Result<GateState> {
        let meta = self.branches.load(branch).await?;
        let guard = self.activate(branch)?;
        let selection_ok = self.has_live_selection(branch).await?;
        let next = self.gate.authorize_continue(branch, selection_ok).await?;
        self.gate.begin(branch, next).await?;

        let run = RunId::new();
        self.emitter.emit(RunEvent::GateResumed {
            branch,
            next_stage: next,
        });
        self.emitter.emit(RunEvent::RunStarted {
            run,
            branch,
            stage: next,
        });
        self.run_segment_guarded(run, branch, next, &meta, &overrides, &guard)
            .await
    }

    /// Abort `branch`. With a segment in flight this cancels it and the
    /// segment emits the single `RunAborted` summary; with the branch paused
    /// (or left running by a crashed process) the gate goes straight to
    /// aborted, discarding any pending selection requirement. Only idle and
    /// already-terminal branches reject the abort.
    pub async fn abort(&self, branch: BranchId) -> Result<()> {
        {
            let slot = self.active.lock().unwrap();
            if let Some(active) = &*slot {
                if active.branch == branch {
                    active.cancel.cancel();
                    return Ok(());
                }
            }
        }
        let state = self.gate.state(branch).await?;
        match state.phase {
            GatePhase::Paused | GatePhase::Running => {
                self.gate.abort(branch).await?;
                self.branches
                    .set_status(branch, BranchStatus::Failed)
                    .await?;
                self.emitter.emit(RunEvent::RunAborted {
                    run: RunId::new(),
                    branch,
                    cancelled_units: 0,
                });
                Ok(())
            }
            phase => Err(HooklineError::InvalidTransition {
                state: format!("{phase:?}").to_lowercase(),
                action: "abort".into(),
            }),
        }
    }

    async fn run_segment_guarded(
        &self,
        run: RunId,
        branch: BranchId,
        stage: Stage,
        meta: &Branch,
        overrides: &StageOverride,
        guard: &RunGuard<'_>,
    ) -> Result<GateState> {
        match self
            .run_segment(run, branch, stage, meta, overrides, &guard.cancel)
            .await
        {
            Ok(state) => Ok(state),
            Err(error) => {
                // A segment error is a run failure, not just a bad request:
                // persist it so resync sees the truth.
                let _ = self.gate.fail(branch, stage).await;
                let _ = self
                    .branches
                    .set_status(branch, BranchStatus::Failed)
                    .await;
                self.emitter.emit(RunEvent::RunFailed {
                    run,
                    branch,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run_segment(
        &self,
        run: RunId,
        branch: BranchId,
        stage: Stage,
        meta: &Branch,
        overrides: &StageOverride,
        cancel: &CancellationToken,
    ) -> Result<GateState> {
        self.branches
            .set_status(branch, BranchStatus::Running)
            .await?;
        let tasks = self
            .build_tasks(branch, stage, &meta.settings, overrides)
            .await?;
        let stand_in = overrides
            .agent
            .as_ref()
            .map(|agent| self.runner.with_agent(Arc::clone(agent)));
        let runner = stand_in.as_ref().unwrap_or(&self.runner);
        let report = runner
            .run_stage(
                branch,
                stage,
                tasks,
                meta.settings.max_parallel,
                &meta.settings.quality_gate,
                cancel,
            )
            .await?;
        self.cost.add(report.cost_usd);

        if report.cancelled > 0 || cancel.is_cancelled() {
            let state = self.gate.abort(branch).await?;
            self.branches
                .set_status(branch, BranchStatus::Failed)
                .await?;
            self.emitter.emit(RunEvent::RunAborted {
                run,
                branch,
                cancelled_units: report.cancelled,
            });
            return Ok(state);
        }
        if report.all_failed() {
            let state = self.gate.fail(branch, stage).await?;
            self.branches
                .set_status(branch, BranchStatus::Failed)
                .await?;
            self.emitter.emit(RunEvent::RunFailed {
                run,
                branch,
                error: format!("all {} task(s) of stage {stage} failed", report.failed.len()),
            });
            return Ok(state);
        }

        if stage == Stage::Scenes {
            let state = self.gate.complete(branch).await?;
            self.branches.set_status(branch, BranchStatus::Done).await?;
            self.emitter.emit(RunEvent::RunCompleted {
                run,
                branch,
                total_cost_usd: self.cost.total_usd(),
                elapsed_ms: report.elapsed.as_millis() as u64,
            });
            Ok(state)
        } else {
            // Partial unit failures pause at the gate like a clean stage;
            // the human decides whether to rerun or move on.
            let state = self.gate.pause_after(branch, stage).await?;
            self.branches.set_status(branch, BranchStatus::Idle).await?;
            self.emitter.emit(RunEvent::GatePaused {
                branch,
                completed_stage: stage,
                next_stage: state.next_stage,
                selection_required: state.selection_required,
            });
            Ok(state)
        }
    }

    // --- per-unit rerun ---

    /// Regenerate a single artifact while the branch is paused. Clears the
    /// artifact's own stale flag; descendants stay stale until rerun
    /// themselves.
    pub async fn rerun_unit(&self, branch: BranchId, id: ArtifactId) -> Result<StageReport> {
        self.rerun_unit_with(branch, id, StageOverride::default())
            .await
    }

    /// Like [`Self::rerun_unit`], applying `overrides` to this one
    /// regeneration.
    pub async fn rerun_unit_with(
        &self,
        branch: BranchId,
        id: ArtifactId,
        overrides: StageOverride,
    ) -> Result<StageReport> {
        let meta = self.branches.load(branch).await?;
        let state = self.gate.state(branch).await?;
        // Failed branches stay eligible: retrying one unit at a time is the
        // recovery path when a whole-stage retry is too blunt.
        if !matches!(
            state.phase,
            GatePhase::Paused | GatePhase::Done | GatePhase::Failed
        ) {
            return Err(HooklineError::InvalidTransition {
                state: format!("{:?}", state.phase).to_lowercase(),
                action: format!("rerun {id}"),
            });
        }
        let tracker = self.store.load_tracker(branch).await?;
        if !tracker.contains(&id) {
            return Err(HooklineError::ArtifactMissing { key: id.to_string() });
        }

        let guard = self.activate(branch)?;
        let tasks: Vec<StageTask> = self
            .build_tasks(branch, id.stage, &meta.settings, &overrides)
            .await?
            .into_iter()
            .filter(|t| t.id == id)
            .collect();
        if tasks.is_empty() {
            return Err(HooklineError::ArtifactMissing { key: id.to_string() });
        }
        let stand_in = overrides
            .agent
            .as_ref()
            .map(|agent| self.runner.with_agent(Arc::clone(agent)));
        let runner = stand_in.as_ref().unwrap_or(&self.runner);
        let report = runner
            .run_stage(
                branch,
                id.stage,
                tasks,
                1,
                &meta.settings.quality_gate,
                &guard.cancel,
            )
            .await?;
        self.cost.add(report.cost_usd);
        Ok(report)
    }

    // --- human inputs ---

    /// Record a hook choice for one `(unit, arm)` hook set. Allowed only
    /// while paused at (or after) the hooks gate; each selected hook becomes
    /// its own scene-planning task.
    pub async fn record_selection(
        &self,
        branch: BranchId,
        unit: UnitKey,
        arm: u8,
        hook: u8,
        rationale: Option<String>,
    ) -> Result<ArtifactId> {
        let state = self.gate.state(branch).await?;
        let at_hooks_gate = state.is_paused()
            && state
                .completed_stage
                .is_some_and(|s| s >= Stage::Hooks);
        if !at_hooks_gate {
            return Err(HooklineError::InvalidTransition {
                state: format!("{:?}", state.phase).to_lowercase(),
                action: "record hook selection".into(),
            });
        }

        let set_id = ArtifactId::new(Stage::Hooks, UnitPath::arm(unit.clone(), arm));
        let hook_set = self.store.get_artifact(branch, &set_id).await?;
        if hook_set.stale {
            return Err(HooklineError::InvalidTransition {
                state: format!("hook set {set_id} is stale"),
                action: "record hook selection".into(),
            });
        }
        let StagePayload::HookSet { options } = &hook_set.payload else {
            return Err(HooklineError::PayloadMismatch {
                key: set_id.to_string(),
                expected: Stage::Hooks,
                found: hook_set.payload.kind().to_string(),
            });
        };
        if !options.iter().any(|o| o.id == hook) {
            return Err(HooklineError::Other(format!(
                "hook set {set_id} has no option {hook}"
            )));
        }

        let selection_id = ArtifactId::new(Stage::Hooks, UnitPath::hook(unit, arm, hook));
        let artifact = StageArtifact::new(
            selection_id.clone(),
            StagePayload::HookSelection { hook, rationale },
        );
        self.store
            .put_artifact(branch, &artifact, &[set_id])
            .await?;
        self.emitter.emit(RunEvent::SelectionRecorded {
            branch,
            path: selection_id.path.clone(),
            hook,
        });
        Ok(selection_id)
    }

    /// Replace an artifact's content with a human edit. Rejected while the
    /// branch is running; invalidation of descendants happens in the same
    /// store call as the write.
    pub async fn edit_artifact(
        &self,
        branch: BranchId,
        id: ArtifactId,
        payload: StagePayload,
    ) -> Result<Vec<ArtifactId>> {
        if self.branch_is_active(branch) {
            return Err(HooklineError::RunActive {
                branch: branch.to_string(),
            });
        }
        let invalidated = self.store.edit_artifact(branch, &id, payload).await?;
        self.emitter.emit(RunEvent::ArtifactEdited {
            branch,
            artifact: id,
            invalidated: invalidated.clone(),
        });
        Ok(invalidated)
    }

    /// Rewrite the brand foundation and invalidate every branch's derived
    /// work. Rejected while any run is active.
    pub async fn edit_foundation(&self, payload: StagePayload) -> Result<()> {
        if self.active.lock().unwrap().is_some() {
            return Err(HooklineError::RunActive {
                branch: "any".into(),
            });
        }
        self.store.save_foundation(payload).await?;
        for branch in self.branches.list().await? {
            let mut tracker = self.store.load_tracker(branch.id).await?;
            let mut invalidated = tracker.invalidate(&ArtifactId::foundation());
            tracker.clear_stale(&ArtifactId::foundation());
            invalidated.retain(|id| *id != ArtifactId::foundation());
            self.store.save_tracker(branch.id, &tracker).await?;
            self.emitter.emit(RunEvent::ArtifactEdited {
                branch: branch.id,
                artifact: ArtifactId::foundation(),
                invalidated,
            });
        }
        Ok(())
    }

    /// Switch the browsing context to `branch`: a pure read returning the
    /// branch and its authoritative position. Legal at any time, including
    /// while another branch is running; it can never submit conflicting
    /// work because it mutates nothing.
    pub async fn switch_branch(&self, branch: BranchId) -> Result<(Branch, RunEvent)> {
        let meta = self.branches.load(branch).await?;
        let sync = self.state_sync(branch).await?;
        Ok((meta, sync))
    }

    /// Authoritative snapshot for observers that missed events. Emitted on
    /// the stream and returned to the caller.
    pub async fn state_sync(&self, branch: BranchId) -> Result<RunEvent> {
        let gate = self.gate.state(branch).await?;
        let tracker = self.store.load_tracker(branch).await?;
        let event = RunEvent::StateSync {
            branch,
            gate,
            completed: tracker.ready_ids(),
            stale: tracker.stale_ids(),
            total_cost_usd: self.cost.total_usd(),
        };
        self.emitter.emit(event.clone());
        Ok(event)
    }

    // --- task construction ---

    async fn has_live_selection(&self, branch: BranchId) -> Result<bool> {
        let artifacts = self.store.list_stage_artifacts(branch, Stage::Hooks).await?;
        Ok(artifacts.iter().any(|a| {
            matches!(a.payload, StagePayload::HookSelection { .. }) && !a.stale
        }))
    }

    async fn prerequisite(
        &self,
        branch: BranchId,
        stage: Stage,
        id: &ArtifactId,
    ) -> Result<StageArtifact> {
        self.store.get_artifact(branch, id).await.map_err(|e| match e {
            HooklineError::ArtifactMissing { key } => HooklineError::StageFatal {
                stage,
                message: format!("missing prerequisite artifact {key}"),
            },
            other => other,
        })
    }

    async fn build_tasks(
        &self,
        branch: BranchId,
        stage: Stage,
        settings: &BranchSettings,
        overrides: &StageOverride,
    ) -> Result<Vec<StageTask>> {
        let params = AgentParams {
            unit_count: settings.unit_count,
            arms_per_unit: settings.arms_per_unit,
            hook_options: settings.hook_options,
        };
        let instructions = overrides
            .instructions
            .clone()
            .unwrap_or_else(|| instructions_for(stage));
        let task = |id: ArtifactId, inputs: Vec<StageArtifact>, parents: Vec<ArtifactId>| {
            StageTask {
                request: AgentRequest {
                    branch,
                    stage,
                    path: id.path.clone(),
                    instructions: instructions.clone(),
                    inputs,
                    params,
                },
                id,
                parents,
            }
        };

        match stage {
            Stage::Foundation => Err(HooklineError::StageFatal {
                stage,
                message: "foundation is produced per brand, not per branch".into(),
            }),
            Stage::Research => {
                let foundation = self.store.load_foundation().await?;
                Ok(vec![task(
                    ArtifactId::branch_level(Stage::Research),
                    vec![foundation],
                    vec![ArtifactId::foundation()],
                )])
            }
            Stage::Planning => {
                let research = self
                    .prerequisite(branch, stage, &ArtifactId::branch_level(Stage::Research))
                    .await?;
                let research_id = research.id.clone();
                Ok(vec![task(
                    ArtifactId::branch_level(Stage::Planning),
                    vec![research],
                    vec![research_id],
                )])
            }
            Stage::Drafting => {
                let plan = self
                    .prerequisite(branch, stage, &ArtifactId::branch_level(Stage::Planning))
                    .await?;
                let StagePayload::BriefPlan { units } = &plan.payload else {
                    return Err(HooklineError::StageFatal {
                        stage,
                        message: "planning artifact is not a brief plan".into(),
                    });
                };
                let mut tasks = Vec::new();
                for unit in units {
                    for arm in 1..=settings.arms_per_unit {
                        tasks.push(task(
                            ArtifactId::new(stage, UnitPath::arm(unit.key.clone(), arm)),
                            vec![plan.clone()],
                            vec![plan.id.clone()],
                        ));
                    }
                }
                Ok(tasks)
            }
            Stage::Hooks => {
                let scripts = self.usable_outputs(branch, Stage::Drafting, settings).await?;
                if scripts.is_empty() {
                    return Err(HooklineError::StageFatal {
                        stage,
                        message: "no usable scripts to generate hooks from".into(),
                    });
                }
                Ok(scripts
                    .into_iter()
                    .map(|script| {
                        let script_id = script.id.clone();
                        task(
                            ArtifactId::new(stage, script.id.path.clone()),
                            vec![script],
                            vec![script_id],
                        )
                    })
                    .collect())
            }
            Stage::Scenes => {
                let hooks = self.store.list_stage_artifacts(branch, Stage::Hooks).await?;
                let mut tasks = Vec::new();
                for selection in hooks {
                    if selection.stale
                        || !matches!(selection.payload, StagePayload::HookSelection { .. })
                    {
                        continue;
                    }
                    let UnitPath::Hook { unit, arm, .. } = &selection.id.path else {
                        continue;
                    };
                    let script = self
                        .prerequisite(
                            branch,
                            stage,
                            &ArtifactId::new(
                                Stage::Drafting,
                                UnitPath::arm(unit.clone(), *arm),
                            ),
                        )
                        .await?;
                    let selection_id = selection.id.clone();
                    tasks.push(task(
                        ArtifactId::new(stage, selection.id.path.clone()),
                        vec![script, selection],
                        vec![selection_id],
                    ));
                }
                if tasks.is_empty() {
                    return Err(HooklineError::StageFatal {
                        stage,
                        message: "no hook selections to plan scenes for".into(),
                    });
                }
                Ok(tasks)
            }
        }
    }

    /// Previous-stage outputs usable as inputs: present, not stale, and,
    /// when the policy excludes soft failures, structurally clean.
    async fn usable_outputs(
        &self,
        branch: BranchId,
        stage: Stage,
        settings: &BranchSettings,
    ) -> Result<Vec<StageArtifact>> {
        let mut artifacts = self.store.list_stage_artifacts(branch, stage).await?;
        artifacts.retain(|a| !a.stale);
        if !settings.quality_gate.allow_soft_failed_downstream {
            artifacts.retain(|a| quality::validate_payload(&a.payload).is_empty());
        }
        Ok(artifacts)
    }
}

/// Shared coordinator handle for the server and CLI.
pub type SharedCoordinator = Arc<RunCoordinator>;

fn instructions_for(stage: Stage) -> String {
    match stage {
        Stage::Foundation => "Establish brand positioning, audience, and voice.",
        Stage::Research => "Research the audience and market for usable angles.",
        Stage::Planning => "Plan the brief unit grid from the research.",
        Stage::Drafting => "Draft a short-form script for this brief unit.",
        Stage::Hooks => "Generate opening hook options for this script.",
        Stage::Scenes => "Break the script into a shot-by-shot scene plan.",
    }
    .to_string()
}
