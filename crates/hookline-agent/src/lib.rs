//! Agent boundary: the seam between the pipeline engine and whatever
//! generates stage content.
//!
//! The engine never talks to a model directly; it hands an [`AgentRequest`]
//! to an [`Agent`] and gets back a typed [`StagePayload`] plus cost. The
//! production implementation is [`HttpAgent`]; tests use
//! [`testing::ScriptedAgent`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use hookline_types::{BranchId, Result, Stage, StageArtifact, StagePayload, UnitPath};

pub mod http;
pub mod testing;

pub use http::HttpAgent;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Fan-out sizes the agent needs to shape its output. Derived from branch
/// settings by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentParams {
    pub unit_count: usize,
    pub arms_per_unit: u8,
    pub hook_options: u8,
}

/// One generation task for one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub branch: BranchId,
    pub stage: Stage,
    pub path: UnitPath,
    pub instructions: String,
    /// Parent artifacts the output is conditioned on, in dependency order.
    pub inputs: Vec<StageArtifact>,
    pub params: AgentParams,
}

impl AgentRequest {
    /// Short identity used in logs and error messages.
    pub fn task_key(&self) -> String {
        format!("{}/{}", self.stage, self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub payload: StagePayload,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent trait
// ---------------------------------------------------------------------------

/// A content generator. Implementations must be cancel-safe: when `cancel`
/// fires they return [`hookline_types::HooklineError::Aborted`] promptly
/// instead of finishing the call.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn generate(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse>;

    fn name(&self) -> &str;
}

/// Shared handle the engine clones into each worker task.
pub type SharedAgent = Arc<dyn Agent>;

// ---------------------------------------------------------------------------
// Cost tracking
// ---------------------------------------------------------------------------

/// Accumulates agent spend across a run. Stored as integer micro-dollars so
/// concurrent adds need no lock.
#[derive(Debug, Default)]
pub struct CostTracker {
    micro_usd: AtomicU64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, cost_usd: f64) {
        if cost_usd <= 0.0 {
            return;
        }
        let micro = (cost_usd * 1_000_000.0).round() as u64;
        self.micro_usd.fetch_add(micro, Ordering::Relaxed);
    }

    pub fn total_usd(&self) -> f64 {
        self.micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_types::{AwarenessLevel, UnitKey};

    #[test]
    fn cost_tracker_accumulates() {
        let tracker = CostTracker::new();
        tracker.add(0.0125);
        tracker.add(0.0075);
        tracker.add(-1.0); // ignored
        assert!((tracker.total_usd() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn task_key_format() {
        let request = AgentRequest {
            branch: BranchId::new(),
            stage: Stage::Drafting,
            path: UnitPath::arm(UnitKey::new(AwarenessLevel::Unaware, "awe", 1), 2),
            instructions: String::new(),
            inputs: vec![],
            params: AgentParams {
                unit_count: 6,
                arms_per_unit: 2,
                hook_options: 3,
            },
        };
        assert_eq!(request.task_key(), "drafting/unaware-awe-1.arm2");
    }

    #[test]
    fn agent_request_round_trips_through_serde() {
        let request = AgentRequest {
            branch: BranchId::new(),
            stage: Stage::Research,
            path: UnitPath::Branch,
            instructions: "find angles".into(),
            inputs: vec![],
            params: AgentParams {
                unit_count: 4,
                arms_per_unit: 1,
                hook_options: 2,
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: AgentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage, Stage::Research);
        assert_eq!(back.params, request.params);
    }
}
