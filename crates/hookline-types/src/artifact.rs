//! Artifact envelope and per-stage tagged payloads.
//!
//! Every stage output is a [`StageArtifact`]: a versioned envelope around a
//! [`StagePayload`] tagged union. Unknown tags and schema versions are
//! rejected at the store boundary rather than interpreted leniently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Stage, UnitKey, UnitPath};

/// Current artifact envelope schema version. Bump on incompatible payload
/// changes; the store refuses anything else.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Branch-local artifact address: `(stage, unit_path)`.
///
/// This is the node identity used by the dependency manifest. The brand-level
/// foundation artifact appears in a branch manifest as
/// `(Stage::Foundation, UnitPath::Branch)`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ArtifactId {
    pub stage: Stage,
    pub path: UnitPath,
}

impl ArtifactId {
    pub fn new(stage: Stage, path: UnitPath) -> Self {
        Self { stage, path }
    }

    pub fn foundation() -> Self {
        Self::new(Stage::Foundation, UnitPath::Branch)
    }

    pub fn branch_level(stage: Stage) -> Self {
        Self::new(stage, UnitPath::Branch)
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stage, self.path)
    }
}

// ---------------------------------------------------------------------------
// Payload building blocks
// ---------------------------------------------------------------------------

/// One finding collected by the research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub topic: String,
    pub summary: String,
    pub source: Option<String>,
}

/// Atomic planning cell: the work item handed into drafting, hooks, and
/// scenes. One per [`UnitKey`] per branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefUnit {
    pub key: UnitKey,
    pub angle: String,
    pub promise: String,
}

/// One candidate opening hook generated for a `(unit, arm)` script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookOption {
    pub id: u8,
    pub text: String,
}

/// One shot in a scene plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub shot: String,
    pub voiceover: String,
    pub on_screen_text: Option<String>,
}

// ---------------------------------------------------------------------------
// StagePayload — tagged union per stage
// ---------------------------------------------------------------------------

/// Stage output payload. The tag is the stage that produced it; the store
/// verifies the tag against the key's stage on every write and read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagePayload {
    Foundation {
        positioning: String,
        audience: String,
        voice: String,
        pillars: Vec<String>,
    },
    Research {
        findings: Vec<ResearchFinding>,
        gaps: Vec<String>,
    },
    BriefPlan {
        units: Vec<BriefUnit>,
    },
    Script {
        hook_line: String,
        beats: Vec<String>,
    },
    HookSet {
        options: Vec<HookOption>,
    },
    HookSelection {
        hook: u8,
        rationale: Option<String>,
    },
    ScenePlan {
        scenes: Vec<Scene>,
    },
}

impl StagePayload {
    /// The stage a payload of this shape belongs to.
    ///
    /// `HookSelection` is a human decision recorded under the hooks stage,
    /// alongside the `HookSet` it narrows.
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Foundation { .. } => Stage::Foundation,
            StagePayload::Research { .. } => Stage::Research,
            StagePayload::BriefPlan { .. } => Stage::Planning,
            StagePayload::Script { .. } => Stage::Drafting,
            StagePayload::HookSet { .. } | StagePayload::HookSelection { .. } => Stage::Hooks,
            StagePayload::ScenePlan { .. } => Stage::Scenes,
        }
    }

    /// Short tag name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StagePayload::Foundation { .. } => "foundation",
            StagePayload::Research { .. } => "research",
            StagePayload::BriefPlan { .. } => "brief_plan",
            StagePayload::Script { .. } => "script",
            StagePayload::HookSet { .. } => "hook_set",
            StagePayload::HookSelection { .. } => "hook_selection",
            StagePayload::ScenePlan { .. } => "scene_plan",
        }
    }
}

// ---------------------------------------------------------------------------
// StageArtifact — versioned envelope
// ---------------------------------------------------------------------------

/// Versioned stage output, keyed by `(branch, stage, unit_path)`.
///
/// `source_edit_id` changes on every write (including human edits) and is
/// what staleness comparisons key on. `stale` is mirrored into the manifest;
/// the envelope copy is what readers see without consulting the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageArtifact {
    pub schema_version: u32,
    pub id: ArtifactId,
    pub payload: StagePayload,
    pub created_at: DateTime<Utc>,
    pub source_edit_id: uuid::Uuid,
    #[serde(default)]
    pub stale: bool,
}

impl StageArtifact {
    /// Build a fresh artifact for `id` carrying `payload`.
    pub fn new(id: ArtifactId, payload: StagePayload) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id,
            payload,
            created_at: Utc::now(),
            source_edit_id: uuid::Uuid::new_v4(),
            stale: false,
        }
    }
}
