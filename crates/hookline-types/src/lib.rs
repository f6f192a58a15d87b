//! Shared types, errors, and identifiers for the Hookline pipeline engine.
//!
//! This crate provides the foundational types used across all other Hookline
//! crates:
//! - `HooklineError` — unified error taxonomy
//! - `Stage` — the fixed content-generation stage sequence
//! - `UnitKey` / `UnitPath` — addressing for per-unit work and its narrowing
//! - artifact envelope and tagged payloads (`artifact` module)
//! - branch, settings, and gate state (`branch` module)

use serde::{Deserialize, Serialize};

pub mod artifact;
pub mod branch;

pub use artifact::{
    ArtifactId, BriefUnit, HookOption, ResearchFinding, Scene, StageArtifact,
    StagePayload, SCHEMA_VERSION,
};
pub use branch::{
    Branch, BranchSettings, BranchStatus, GatePhase, GateState, QualityGateMode,
    QualityGatePolicy,
};

/// Unified error type for all Hookline subsystems.
#[derive(Debug, thiserror::Error)]
pub enum HooklineError {
    // === Agent boundary errors ===
    #[error("Agent failed on unit '{unit}': {message}")]
    AgentFailure {
        unit: String,
        message: String,
        retryable: bool,
    },

    #[error("Agent transport error: {message}")]
    AgentTransport { message: String, retryable: bool },

    #[error("Agent call for unit '{unit}' timed out after {timeout_ms}ms")]
    AgentTimeout { unit: String, timeout_ms: u64 },

    // === Stage / run errors ===
    #[error("Stage {stage} cannot start: {message}")]
    StageFatal { stage: Stage, message: String },

    #[error("Run aborted by user")]
    Aborted,

    #[error("Quality gate for stage {stage} reported {} problem(s)", problems.len())]
    QualityGate { stage: Stage, problems: Vec<String> },

    #[error("Gate after stage {stage} requires a selection before resuming")]
    SelectionRequired { stage: Stage },

    #[error("Invalid transition: cannot {action} while {state}")]
    InvalidTransition { state: String, action: String },

    #[error("A run is already active on branch {branch}")]
    RunActive { branch: String },

    // === Store errors ===
    #[error("Branch '{id}' not found")]
    BranchNotFound { id: String },

    #[error("Brand '{brand}' has no foundation artifact")]
    FoundationMissing { brand: String },

    #[error("Artifact not found: {key}")]
    ArtifactMissing { key: String },

    #[error("Artifact {key} has schema version {found}, expected {expected}")]
    SchemaMismatch {
        key: String,
        expected: u32,
        found: u32,
    },

    #[error("Artifact {key} carries a {found} payload, expected {expected}")]
    PayloadMismatch {
        key: String,
        expected: Stage,
        found: String,
    },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl HooklineError {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HooklineError::AgentFailure { retryable: true, .. }
                | HooklineError::AgentTransport { retryable: true, .. }
                | HooklineError::AgentTimeout { .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HooklineError::StageFatal { .. }
                | HooklineError::Aborted
                | HooklineError::SchemaMismatch { .. }
                | HooklineError::PayloadMismatch { .. }
        )
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> u16 {
        match self {
            HooklineError::SelectionRequired { .. }
            | HooklineError::InvalidTransition { .. }
            | HooklineError::RunActive { .. } => 409,
            HooklineError::BranchNotFound { .. }
            | HooklineError::FoundationMissing { .. }
            | HooklineError::ArtifactMissing { .. } => 404,
            HooklineError::SchemaMismatch { .. }
            | HooklineError::PayloadMismatch { .. }
            | HooklineError::QualityGate { .. } => 422,
            HooklineError::AgentTimeout { .. } => 504,
            HooklineError::Aborted => 409,
            _ => 500,
        }
    }
}

/// A convenience alias for `Result<T, HooklineError>`.
pub type Result<T> = std::result::Result<T, HooklineError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Brand namespace identifier. Brands are human-named slugs, not UUIDs, so
/// the on-disk layout stays legible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(pub String);

impl BrandId {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BrandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Branch identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BranchId(pub uuid::Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Run identifier, one per `start_run`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Stage — the fixed pipeline sequence
// ---------------------------------------------------------------------------

/// The content-generation stages, in execution order.
///
/// `Foundation` runs once per brand before any branch exists; the remaining
/// stages run per branch, each followed by a human gate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Foundation,
    Research,
    Planning,
    Drafting,
    Hooks,
    Scenes,
}

impl Stage {
    /// Branch-level stages in execution order.
    pub const BRANCH_SEQUENCE: [Stage; 5] = [
        Stage::Research,
        Stage::Planning,
        Stage::Drafting,
        Stage::Hooks,
        Stage::Scenes,
    ];

    /// The stage that follows this one, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Foundation => Some(Stage::Research),
            Stage::Research => Some(Stage::Planning),
            Stage::Planning => Some(Stage::Drafting),
            Stage::Drafting => Some(Stage::Hooks),
            Stage::Hooks => Some(Stage::Scenes),
            Stage::Scenes => None,
        }
    }

    /// Whether the gate *after* this stage requires a human selection before
    /// the next stage may run. Only the hooks stage produces options that
    /// must be chosen from.
    pub fn requires_selection(self) -> bool {
        matches!(self, Stage::Hooks)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Foundation => "foundation",
            Stage::Research => "research",
            Stage::Planning => "planning",
            Stage::Drafting => "drafting",
            Stage::Hooks => "hooks",
            Stage::Scenes => "scenes",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AwarenessLevel / UnitKey — addressing for brief units
// ---------------------------------------------------------------------------

/// Audience awareness level, one axis of the planning grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AwarenessLevel {
    Unaware,
    ProblemAware,
    SolutionAware,
    ProductAware,
    MostAware,
}

impl AwarenessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AwarenessLevel::Unaware => "unaware",
            AwarenessLevel::ProblemAware => "problem_aware",
            AwarenessLevel::SolutionAware => "solution_aware",
            AwarenessLevel::ProductAware => "product_aware",
            AwarenessLevel::MostAware => "most_aware",
        }
    }
}

impl std::fmt::Display for AwarenessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable composite key for one brief unit, produced once per branch by the
/// planning stage. Ordering is derived so dispatch order is deterministic.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UnitKey {
    pub awareness: AwarenessLevel,
    pub emotion: String,
    pub ordinal: u8,
}

impl UnitKey {
    pub fn new(awareness: AwarenessLevel, emotion: impl Into<String>, ordinal: u8) -> Self {
        Self {
            awareness,
            emotion: emotion.into(),
            ordinal,
        }
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.awareness, self.emotion, self.ordinal)
    }
}

/// Progressive narrowing of a stage artifact's scope.
///
/// Research and planning emit one branch-level artifact; drafting and hooks
/// narrow to `(unit, arm)`; scenes narrow to `(unit, arm, hook)`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum UnitPath {
    Branch,
    Unit { unit: UnitKey },
    Arm { unit: UnitKey, arm: u8 },
    Hook { unit: UnitKey, arm: u8, hook: u8 },
}

impl UnitPath {
    pub fn unit(key: UnitKey) -> Self {
        UnitPath::Unit { unit: key }
    }

    pub fn arm(key: UnitKey, arm: u8) -> Self {
        UnitPath::Arm { unit: key, arm }
    }

    pub fn hook(key: UnitKey, arm: u8, hook: u8) -> Self {
        UnitPath::Hook {
            unit: key,
            arm,
            hook,
        }
    }

    /// The unit key this path narrows, if any.
    pub fn unit_key(&self) -> Option<&UnitKey> {
        match self {
            UnitPath::Branch => None,
            UnitPath::Unit { unit }
            | UnitPath::Arm { unit, .. }
            | UnitPath::Hook { unit, .. } => Some(unit),
        }
    }

    /// Flat storage key segment, filesystem-safe.
    pub fn storage_key(&self) -> String {
        match self {
            UnitPath::Branch => "branch".to_string(),
            UnitPath::Unit { unit } => unit.to_string(),
            UnitPath::Arm { unit, arm } => format!("{unit}.arm{arm}"),
            UnitPath::Hook { unit, arm, hook } => format!("{unit}.arm{arm}.hook{hook}"),
        }
    }
}

impl std::fmt::Display for UnitPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_agent_failure() {
        let err = HooklineError::AgentFailure {
            unit: "problem_aware-fear-1".into(),
            message: "upstream 500".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Agent failed on unit 'problem_aware-fear-1': upstream 500"
        );
    }

    #[test]
    fn error_display_selection_required() {
        let err = HooklineError::SelectionRequired { stage: Stage::Hooks };
        assert_eq!(
            err.to_string(),
            "Gate after stage hooks requires a selection before resuming"
        );
    }

    #[test]
    fn error_display_quality_gate_counts_problems() {
        let err = HooklineError::QualityGate {
            stage: Stage::Drafting,
            problems: vec!["empty beat list".into(), "missing headline".into()],
        };
        assert_eq!(
            err.to_string(),
            "Quality gate for stage drafting reported 2 problem(s)"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(HooklineError::AgentTimeout {
            unit: "u".into(),
            timeout_ms: 5000,
        }
        .is_retryable());
        assert!(HooklineError::AgentTransport {
            message: "503".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!HooklineError::AgentFailure {
            unit: "u".into(),
            message: "bad schema".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!HooklineError::Aborted.is_retryable());
    }

    #[test]
    fn terminal_classification() {
        assert!(HooklineError::StageFatal {
            stage: Stage::Drafting,
            message: "missing brief plan".into(),
        }
        .is_terminal());
        assert!(HooklineError::Aborted.is_terminal());
        assert!(!HooklineError::AgentTimeout {
            unit: "u".into(),
            timeout_ms: 1,
        }
        .is_terminal());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            HooklineError::SelectionRequired { stage: Stage::Hooks }.http_status(),
            409
        );
        assert_eq!(
            HooklineError::BranchNotFound { id: "x".into() }.http_status(),
            404
        );
        assert_eq!(
            HooklineError::SchemaMismatch {
                key: "k".into(),
                expected: 1,
                found: 2,
            }
            .http_status(),
            422
        );
        assert_eq!(HooklineError::Other("boom".into()).http_status(), 500);
    }

    #[test]
    fn stage_sequence_is_linear() {
        assert_eq!(Stage::Foundation.next(), Some(Stage::Research));
        assert_eq!(Stage::Research.next(), Some(Stage::Planning));
        assert_eq!(Stage::Planning.next(), Some(Stage::Drafting));
        assert_eq!(Stage::Drafting.next(), Some(Stage::Hooks));
        assert_eq!(Stage::Hooks.next(), Some(Stage::Scenes));
        assert_eq!(Stage::Scenes.next(), None);
    }

    #[test]
    fn only_hooks_requires_selection() {
        for stage in Stage::BRANCH_SEQUENCE {
            assert_eq!(stage.requires_selection(), stage == Stage::Hooks);
        }
    }

    #[test]
    fn stage_serializes_to_snake_case() {
        assert_eq!(serde_json::to_string(&Stage::Hooks).unwrap(), "\"hooks\"");
        assert_eq!(
            serde_json::to_string(&Stage::Foundation).unwrap(),
            "\"foundation\""
        );
        let stage: Stage = serde_json::from_str("\"scenes\"").unwrap();
        assert_eq!(stage, Stage::Scenes);
    }

    #[test]
    fn unit_key_display() {
        let key = UnitKey::new(AwarenessLevel::ProblemAware, "fear", 1);
        assert_eq!(key.to_string(), "problem_aware-fear-1");
    }

    #[test]
    fn unit_key_ordering_is_deterministic() {
        let a = UnitKey::new(AwarenessLevel::Unaware, "fear", 1);
        let b = UnitKey::new(AwarenessLevel::ProblemAware, "fear", 1);
        let c = UnitKey::new(AwarenessLevel::ProblemAware, "hope", 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn unit_path_storage_keys() {
        let key = UnitKey::new(AwarenessLevel::MostAware, "pride", 2);
        assert_eq!(UnitPath::Branch.storage_key(), "branch");
        assert_eq!(
            UnitPath::unit(key.clone()).storage_key(),
            "most_aware-pride-2"
        );
        assert_eq!(
            UnitPath::arm(key.clone(), 1).storage_key(),
            "most_aware-pride-2.arm1"
        );
        assert_eq!(
            UnitPath::hook(key, 1, 3).storage_key(),
            "most_aware-pride-2.arm1.hook3"
        );
    }

    #[test]
    fn unit_path_round_trips_through_serde() {
        let key = UnitKey::new(AwarenessLevel::SolutionAware, "relief", 4);
        let path = UnitPath::hook(key, 2, 1);
        let json = serde_json::to_string(&path).unwrap();
        let back: UnitPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn unit_path_unit_key_accessor() {
        let key = UnitKey::new(AwarenessLevel::Unaware, "awe", 1);
        assert!(UnitPath::Branch.unit_key().is_none());
        assert_eq!(
            UnitPath::arm(key.clone(), 1).unit_key(),
            Some(&key)
        );
    }
}
