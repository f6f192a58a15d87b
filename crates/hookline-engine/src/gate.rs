//! Gate transitions over persisted [`GateState`].
//!
//! Every transition is validated against the state on disk and written back
//! before execution proceeds, so a restarted process resumes from the exact
//! pause point. Rejected transitions never write: asking to continue a gate
//! that is not paused leaves the persisted state byte-identical.

use hookline_store::ArtifactStore;
use hookline_types::{BranchId, GatePhase, GateState, HooklineError, Result, Stage};

pub struct GateController {
    store: ArtifactStore,
}

impl GateController {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Current gate state; a branch with no persisted gate is idle.
    pub async fn state(&self, branch: BranchId) -> Result<GateState> {
        Ok(self
            .store
            .load_gate(branch)
            .await?
            .unwrap_or_else(GateState::idle))
    }

    /// Validate and persist the transition into `stage`.
    ///
    /// Legal from idle (first stage only), from a pause whose gate guards
    /// exactly `stage`, or from a failure when `stage` is the one that
    /// failed (a wholesale stage retry).
    pub async fn begin(&self, branch: BranchId, stage: Stage) -> Result<GateState> {
        let current = self.state(branch).await?;
        let legal = match current.phase {
            GatePhase::Idle => stage == Stage::Research,
            GatePhase::Paused => current.next_stage == Some(stage),
            GatePhase::Failed => current.current_stage == Some(stage),
            _ => false,
        };
        if !legal {
            return Err(HooklineError::InvalidTransition {
                state: describe(&current),
                action: format!("start stage {stage}"),
            });
        }
        let next = GateState::running(stage);
        self.store.save_gate(branch, &next).await?;
        Ok(next)
    }

    /// Check that the paused gate may be resumed. `selection_satisfied` is
    /// the caller's answer to the gate's selection requirement. On rejection
    /// nothing is written; repeating the same request gets the same answer.
    pub async fn authorize_continue(
        &self,
        branch: BranchId,
        selection_satisfied: bool,
    ) -> Result<Stage> {
        let current = self.state(branch).await?;
        let candidate = match current.phase {
            GatePhase::Paused => current.next_stage,
            // A failed stage may be retried wholesale.
            GatePhase::Failed => current.current_stage,
            _ => None,
        };
        let next = candidate.ok_or_else(|| HooklineError::InvalidTransition {
            state: describe(&current),
            action: "continue past gate".into(),
        })?;
        if current.selection_required && !selection_satisfied {
            // completed_stage is always set when paused.
            let stage = current.completed_stage.unwrap_or(Stage::Hooks);
            return Err(HooklineError::SelectionRequired { stage });
        }
        Ok(next)
    }

    pub async fn pause_after(&self, branch: BranchId, completed: Stage) -> Result<GateState> {
        let state = GateState::paused_after(completed);
        self.store.save_gate(branch, &state).await?;
        Ok(state)
    }

    pub async fn complete(&self, branch: BranchId) -> Result<GateState> {
        let state = GateState::done();
        self.store.save_gate(branch, &state).await?;
        Ok(state)
    }

    pub async fn abort(&self, branch: BranchId) -> Result<GateState> {
        let state = GateState::aborted();
        self.store.save_gate(branch, &state).await?;
        Ok(state)
    }

    pub async fn fail(&self, branch: BranchId, stage: Stage) -> Result<GateState> {
        let state = GateState::failed_during(stage);
        self.store.save_gate(branch, &state).await?;
        Ok(state)
    }
}

fn describe(state: &GateState) -> String {
    match (state.phase, state.current_stage, state.completed_stage) {
        (GatePhase::Running, Some(stage), _) => format!("running {stage}"),
        (GatePhase::Paused, _, Some(stage)) => format!("paused after {stage}"),
        (GatePhase::Failed, Some(stage), _) => format!("failed during {stage}"),
        (phase, _, _) => format!("{phase:?}").to_lowercase(),
    }
}
