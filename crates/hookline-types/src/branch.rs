//! Branch metadata, per-branch settings, and persisted gate state.

use serde::{Deserialize, Serialize};

use crate::{BranchId, Stage};

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Idle,
    Running,
    Done,
    Failed,
}

/// Isolated downstream execution context. Branches share the brand
/// Foundation artifact and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub label: String,
    pub settings: BranchSettings,
    pub status: BranchStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Branch {
    pub fn new(label: impl Into<String>, settings: BranchSettings) -> Self {
        Self {
            id: BranchId::new(),
            label: label.into(),
            settings,
            status: BranchStatus::Idle,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Per-branch run settings: fan-out sizes and gate policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSettings {
    /// Target number of brief units the planning stage should emit.
    pub unit_count: usize,
    /// Script variants drafted per brief unit.
    pub arms_per_unit: u8,
    /// Hook options generated per `(unit, arm)`.
    pub hook_options: u8,
    /// Worker pool width for per-unit stages.
    pub max_parallel: usize,
    pub quality_gate: QualityGatePolicy,
}

impl Default for BranchSettings {
    fn default() -> Self {
        Self {
            unit_count: 6,
            arms_per_unit: 2,
            hook_options: 3,
            max_parallel: 4,
            quality_gate: QualityGatePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Quality gate policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGateMode {
    /// Validation problems are reported at the gate but output is kept.
    Soft,
    /// Validation problems fail the stage.
    Hard,
}

/// How stage-output validation problems are treated.
///
/// `allow_soft_failed_downstream` is an explicit choice, not an assumption:
/// when `false`, artifacts that soft-failed validation are excluded from the
/// next stage's input set even though they remain on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGatePolicy {
    pub mode: QualityGateMode,
    pub allow_soft_failed_downstream: bool,
}

impl Default for QualityGatePolicy {
    fn default() -> Self {
        Self {
            mode: QualityGateMode::Soft,
            allow_soft_failed_downstream: true,
        }
    }
}

// ---------------------------------------------------------------------------
// GateState — persisted pause point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    Running,
    Paused,
    Done,
    Failed,
    Aborted,
}

/// The exact pipeline position, persisted at every transition so a
/// disconnected observer (or a restarted process) can resync without
/// replaying history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub phase: GatePhase,
    /// Stage currently executing, when `phase == Running`.
    pub current_stage: Option<Stage>,
    /// Last stage that finished, when paused at its gate.
    pub completed_stage: Option<Stage>,
    /// Stage the gate guards.
    pub next_stage: Option<Stage>,
    pub selection_required: bool,
}

impl GateState {
    pub fn idle() -> Self {
        Self {
            phase: GatePhase::Idle,
            current_stage: None,
            completed_stage: None,
            next_stage: None,
            selection_required: false,
        }
    }

    pub fn running(stage: Stage) -> Self {
        Self {
            phase: GatePhase::Running,
            current_stage: Some(stage),
            completed_stage: None,
            next_stage: stage.next(),
            selection_required: false,
        }
    }

    /// Pause point after `completed` finished. Selection requirement follows
    /// from the completed stage.
    pub fn paused_after(completed: Stage) -> Self {
        Self {
            phase: GatePhase::Paused,
            current_stage: None,
            completed_stage: Some(completed),
            next_stage: completed.next(),
            selection_required: completed.requires_selection(),
        }
    }

    pub fn done() -> Self {
        Self {
            phase: GatePhase::Done,
            current_stage: None,
            completed_stage: Some(Stage::Scenes),
            next_stage: None,
            selection_required: false,
        }
    }

    pub fn aborted() -> Self {
        Self {
            phase: GatePhase::Aborted,
            current_stage: None,
            completed_stage: None,
            next_stage: None,
            selection_required: false,
        }
    }

    /// Failure keeps the stage that failed so the branch is recoverable:
    /// targeted reruns and a wholesale stage retry both need to know where
    /// execution stopped.
    pub fn failed_during(stage: Stage) -> Self {
        Self {
            phase: GatePhase::Failed,
            current_stage: Some(stage),
            completed_stage: None,
            next_stage: None,
            selection_required: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.phase == GatePhase::Paused
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            GatePhase::Done | GatePhase::Failed | GatePhase::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_sane() {
        let s = BranchSettings::default();
        assert_eq!(s.max_parallel, 4);
        assert!(s.unit_count > 0);
        assert!(s.arms_per_unit > 0);
        assert_eq!(s.quality_gate.mode, QualityGateMode::Soft);
        assert!(s.quality_gate.allow_soft_failed_downstream);
    }

    #[test]
    fn paused_after_hooks_requires_selection() {
        let gate = GateState::paused_after(Stage::Hooks);
        assert!(gate.is_paused());
        assert!(gate.selection_required);
        assert_eq!(gate.completed_stage, Some(Stage::Hooks));
        assert_eq!(gate.next_stage, Some(Stage::Scenes));
    }

    #[test]
    fn paused_after_drafting_needs_no_selection() {
        let gate = GateState::paused_after(Stage::Drafting);
        assert!(!gate.selection_required);
        assert_eq!(gate.next_stage, Some(Stage::Hooks));
    }

    #[test]
    fn terminal_phases() {
        assert!(GateState::done().is_terminal());
        assert!(GateState::aborted().is_terminal());
        assert!(GateState::failed_during(Stage::Drafting).is_terminal());
        assert!(!GateState::running(Stage::Research).is_terminal());
        assert!(!GateState::paused_after(Stage::Research).is_terminal());
    }

    #[test]
    fn failure_remembers_the_failed_stage() {
        let gate = GateState::failed_during(Stage::Drafting);
        assert_eq!(gate.current_stage, Some(Stage::Drafting));
        assert!(!gate.selection_required);
    }

    #[test]
    fn gate_state_round_trips_through_serde() {
        let gate = GateState::paused_after(Stage::Hooks);
        let json = serde_json::to_string(&gate).unwrap();
        let back: GateState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gate);
    }

    #[test]
    fn branch_starts_idle() {
        let branch = Branch::new("aggressive-angle", BranchSettings::default());
        assert_eq!(branch.status, BranchStatus::Idle);
        assert_eq!(branch.label, "aggressive-angle");
    }
}
