//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so observers
//! (SSE streams, loggers, the CLI) can follow run progress without coupling
//! to the coordinator internals. Dropped events are acceptable: the
//! [`RunEvent::StateSync`] snapshot lets a late or lagged subscriber rebuild
//! the authoritative position from persisted state.

use serde::{Deserialize, Serialize};

use hookline_types::{ArtifactId, BranchId, GateState, RunId, Stage, UnitPath};

/// Events emitted during branch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run: RunId,
        branch: BranchId,
        stage: Stage,
    },
    StageStarted {
        branch: BranchId,
        stage: Stage,
        tasks: usize,
    },
    UnitStarted {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
    },
    /// Free-form progress note for a unit between start and completion.
    UnitProgress {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
        message: String,
    },
    UnitCompleted {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
        cost_usd: f64,
        elapsed_ms: u64,
    },
    UnitFailed {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
        error: String,
    },
    UnitRetrying {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
        attempt: usize,
    },
    QualityProblems {
        branch: BranchId,
        stage: Stage,
        path: UnitPath,
        problems: Vec<String>,
    },
    StageCompleted {
        branch: BranchId,
        stage: Stage,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    GatePaused {
        branch: BranchId,
        completed_stage: Stage,
        next_stage: Option<Stage>,
        selection_required: bool,
    },
    GateResumed {
        branch: BranchId,
        next_stage: Stage,
    },
    SelectionRecorded {
        branch: BranchId,
        path: UnitPath,
        hook: u8,
    },
    ArtifactEdited {
        branch: BranchId,
        artifact: ArtifactId,
        invalidated: Vec<ArtifactId>,
    },
    BranchCreated {
        branch: BranchId,
        label: String,
    },
    BranchDeleted {
        branch: BranchId,
    },
    RunCompleted {
        run: RunId,
        branch: BranchId,
        total_cost_usd: f64,
        elapsed_ms: u64,
    },
    /// Single summary event for an abort; no per-unit failure events are
    /// emitted for the cancelled work.
    RunAborted {
        run: RunId,
        branch: BranchId,
        cancelled_units: usize,
    },
    RunFailed {
        run: RunId,
        branch: BranchId,
        error: String,
    },
    /// Authoritative snapshot for observers joining or resyncing mid-run.
    StateSync {
        branch: BranchId,
        gate: GateState,
        completed: Vec<ArtifactId>,
        stale: Vec<ArtifactId>,
        total_cost_usd: f64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. With no active receivers
    /// the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        let branch = BranchId::new();

        emitter.emit(RunEvent::StageStarted {
            branch,
            stage: Stage::Drafting,
            tasks: 12,
        });

        match rx.recv().await.unwrap() {
            RunEvent::StageStarted { stage, tasks, .. } => {
                assert_eq!(stage, Stage::Drafting);
                assert_eq!(tasks, 12);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(RunEvent::RunFailed {
            run: RunId::new(),
            branch: BranchId::new(),
            error: "boom".into(),
        });
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = RunEvent::GatePaused {
            branch: BranchId::new(),
            completed_stage: Stage::Hooks,
            next_stage: Some(Stage::Scenes),
            selection_required: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "gate_paused");
        assert_eq!(json["completed_stage"], "hooks");
        assert_eq!(json["selection_required"], true);
    }

    #[test]
    fn state_sync_round_trips() {
        let event = RunEvent::StateSync {
            branch: BranchId::new(),
            gate: GateState::paused_after(Stage::Drafting),
            completed: vec![
                ArtifactId::branch_level(Stage::Research),
                ArtifactId::branch_level(Stage::Planning),
            ],
            stale: vec![ArtifactId::branch_level(Stage::Planning)],
            total_cost_usd: 0.42,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        match back {
            RunEvent::StateSync {
                gate,
                completed,
                stale,
                ..
            } => {
                assert_eq!(gate, GateState::paused_after(Stage::Drafting));
                assert_eq!(completed.len(), 2);
                assert_eq!(stale.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
