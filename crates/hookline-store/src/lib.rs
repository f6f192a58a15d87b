//! Durable artifact storage for Hookline.
//!
//! One subtree per `(brand, branch)` holds a JSON record per stage output,
//! the persisted gate state, and the dependency manifest. Writes are atomic
//! at the key level (temp file + rename, last writer wins), and human-edit
//! operations update the staleness graph in the same call so no reader can
//! observe an edit without its dependent invalidation.
//!
//! Layout:
//! ```text
//! <root>/<brand>/foundation.json
//! <root>/<brand>/branches/<branch_id>/branch.json
//! <root>/<brand>/branches/<branch_id>/gate.json
//! <root>/<brand>/branches/<branch_id>/manifest.json
//! <root>/<brand>/branches/<branch_id>/artifacts/<stage>/<unit_path>.json
//! ```

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use hookline_types::{
    ArtifactId, BranchId, BrandId, GateState, HooklineError, Result, Stage, StageArtifact,
    StagePayload, SCHEMA_VERSION,
};

pub mod branches;
pub mod manifest;

pub use branches::BranchManager;
pub use manifest::{DependencyEdge, Manifest, StalenessTracker};

// ---------------------------------------------------------------------------
// JSON file helpers
// ---------------------------------------------------------------------------

/// Atomically write `value` as pretty JSON to `path`.
///
/// The temp file carries a random suffix so concurrent writers to the same
/// key cannot interleave; the rename makes the last writer win without ever
/// exposing a torn file.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let data = tokio::fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&data)?))
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Per-brand store handle. Cloning is cheap; all state lives on disk.
///
/// Callers that mutate the same branch concurrently must serialize at a
/// higher level (the run coordinator holds one writer per branch); the store
/// guarantees only that individual key writes are atomic.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    brand: BrandId,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, brand: BrandId) -> Self {
        Self {
            root: root.into(),
            brand,
        }
    }

    pub fn brand(&self) -> &BrandId {
        &self.brand
    }

    fn brand_dir(&self) -> PathBuf {
        self.root.join(self.brand.as_str())
    }

    fn foundation_path(&self) -> PathBuf {
        self.brand_dir().join("foundation.json")
    }

    pub(crate) fn branches_dir(&self) -> PathBuf {
        self.brand_dir().join("branches")
    }

    pub(crate) fn branch_dir(&self, branch: BranchId) -> PathBuf {
        self.branches_dir().join(branch.to_string())
    }

    fn gate_path(&self, branch: BranchId) -> PathBuf {
        self.branch_dir(branch).join("gate.json")
    }

    fn manifest_path(&self, branch: BranchId) -> PathBuf {
        self.branch_dir(branch).join("manifest.json")
    }

    fn artifact_path(&self, branch: BranchId, id: &ArtifactId) -> PathBuf {
        self.branch_dir(branch)
            .join("artifacts")
            .join(id.stage.as_str())
            .join(format!("{}.json", id.path.storage_key()))
    }

    // --- foundation ---

    /// Write the brand-level foundation artifact.
    pub async fn save_foundation(&self, payload: StagePayload) -> Result<StageArtifact> {
        let artifact = StageArtifact::new(ArtifactId::foundation(), payload);
        validate_envelope(&artifact)?;
        write_json_atomic(&self.foundation_path(), &artifact).await?;
        tracing::debug!(brand = %self.brand, "Foundation artifact saved");
        Ok(artifact)
    }

    pub async fn load_foundation(&self) -> Result<StageArtifact> {
        let artifact: StageArtifact = read_json(&self.foundation_path())
            .await?
            .ok_or_else(|| HooklineError::FoundationMissing {
                brand: self.brand.to_string(),
            })?;
        validate_envelope(&artifact)?;
        Ok(artifact)
    }

    pub async fn foundation_exists(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.foundation_path()).await?)
    }

    // --- stage artifacts ---

    /// Write a stage artifact and record its dependency edges in the same
    /// call. The artifact's stale flag is cleared in the manifest: a fresh
    /// write is by definition current.
    pub async fn put_artifact(
        &self,
        branch: BranchId,
        artifact: &StageArtifact,
        parents: &[ArtifactId],
    ) -> Result<()> {
        validate_envelope(artifact)?;
        write_json_atomic(&self.artifact_path(branch, &artifact.id), artifact).await?;

        let mut tracker = self.load_tracker(branch).await?;
        tracker.record_node(artifact.id.clone());
        for parent in parents {
            tracker.record_dependency(artifact.id.clone(), parent.clone());
        }
        tracker.clear_stale(&artifact.id);
        self.save_tracker(branch, &tracker).await?;
        Ok(())
    }

    /// Read one artifact, overlaying the manifest's staleness flag.
    pub async fn get_artifact(&self, branch: BranchId, id: &ArtifactId) -> Result<StageArtifact> {
        let mut artifact: StageArtifact = read_json(&self.artifact_path(branch, id))
            .await?
            .ok_or_else(|| HooklineError::ArtifactMissing { key: id.to_string() })?;
        validate_envelope(&artifact)?;
        let tracker = self.load_tracker(branch).await?;
        artifact.stale = tracker.is_stale(id);
        Ok(artifact)
    }

    pub async fn artifact_exists(&self, branch: BranchId, id: &ArtifactId) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.artifact_path(branch, id)).await?)
    }

    /// Rewrite an existing artifact with edited content and invalidate every
    /// transitive descendant. Returns the newly stale ids.
    ///
    /// The manifest invalidation is persisted first and the content rewrite
    /// second, so a concurrent reader can never see the edited content while
    /// its descendants still read ready. The edited artifact itself stays
    /// current (it carries the new content); only what was derived from the
    /// old content goes stale.
    pub async fn edit_artifact(
        &self,
        branch: BranchId,
        id: &ArtifactId,
        payload: StagePayload,
    ) -> Result<Vec<ArtifactId>> {
        // Refuse edits to artifacts that were never produced.
        if !self.artifact_exists(branch, id).await? {
            return Err(HooklineError::ArtifactMissing { key: id.to_string() });
        }
        let artifact = StageArtifact::new(id.clone(), payload);
        validate_envelope(&artifact)?;

        let mut tracker = self.load_tracker(branch).await?;
        let mut stale = tracker.invalidate(id);
        tracker.clear_stale(id);
        stale.retain(|s| s != id);
        self.save_tracker(branch, &tracker).await?;

        write_json_atomic(&self.artifact_path(branch, id), &artifact).await?;
        tracing::info!(
            branch = %branch,
            artifact = %id,
            invalidated = stale.len(),
            "Artifact edited, descendants invalidated"
        );
        Ok(stale)
    }

    /// Readiness per the manifest graph: not stale, no stale or missing
    /// ancestor.
    pub async fn is_ready(&self, branch: BranchId, id: &ArtifactId) -> Result<bool> {
        let tracker = self.load_tracker(branch).await?;
        Ok(tracker.is_ready(id))
    }

    /// All artifacts persisted for one stage of a branch.
    pub async fn list_stage_artifacts(
        &self,
        branch: BranchId,
        stage: Stage,
    ) -> Result<Vec<StageArtifact>> {
        let dir = self.branch_dir(branch).join("artifacts").join(stage.as_str());
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let tracker = self.load_tracker(branch).await?;
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(entry.path()).await?;
            let mut artifact: StageArtifact = serde_json::from_str(&data)?;
            validate_envelope(&artifact)?;
            artifact.stale = tracker.is_stale(&artifact.id);
            out.push(artifact);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    // --- staleness graph ---

    pub async fn load_tracker(&self, branch: BranchId) -> Result<StalenessTracker> {
        let manifest: Manifest = read_json(&self.manifest_path(branch))
            .await?
            .unwrap_or_default();
        Ok(StalenessTracker::from_manifest(&manifest))
    }

    pub async fn save_tracker(
        &self,
        branch: BranchId,
        tracker: &StalenessTracker,
    ) -> Result<()> {
        write_json_atomic(&self.manifest_path(branch), &tracker.to_manifest()).await
    }

    // --- gate state ---

    pub async fn save_gate(&self, branch: BranchId, gate: &GateState) -> Result<()> {
        write_json_atomic(&self.gate_path(branch), gate).await?;
        tracing::debug!(branch = %branch, phase = ?gate.phase, "Gate state persisted");
        Ok(())
    }

    pub async fn load_gate(&self, branch: BranchId) -> Result<Option<GateState>> {
        read_json(&self.gate_path(branch)).await
    }
}

/// Envelope validation applied on every write and read: schema version must
/// match and the payload tag must belong to the key's stage. Legacy or
/// hand-rolled shapes are rejected here, not interpreted.
fn validate_envelope(artifact: &StageArtifact) -> Result<()> {
    if artifact.schema_version != SCHEMA_VERSION {
        return Err(HooklineError::SchemaMismatch {
            key: artifact.id.to_string(),
            expected: SCHEMA_VERSION,
            found: artifact.schema_version,
        });
    }
    if artifact.payload.stage() != artifact.id.stage {
        return Err(HooklineError::PayloadMismatch {
            key: artifact.id.to_string(),
            expected: artifact.id.stage,
            found: artifact.payload.kind().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_types::{AwarenessLevel, UnitKey, UnitPath};

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir, BrandId::new("acme"))
    }

    fn foundation_payload() -> StagePayload {
        StagePayload::Foundation {
            positioning: "premium but approachable".into(),
            audience: "busy founders".into(),
            voice: "direct".into(),
            pillars: vec!["time saved".into()],
        }
    }

    fn script_id(n: u8) -> ArtifactId {
        let key = UnitKey::new(AwarenessLevel::ProblemAware, "fear", n);
        ArtifactId::new(Stage::Drafting, UnitPath::arm(key, 1))
    }

    fn script_payload(text: &str) -> StagePayload {
        StagePayload::Script {
            hook_line: text.into(),
            beats: vec!["beat".into()],
        }
    }

    #[tokio::test]
    async fn foundation_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(!store.foundation_exists().await.unwrap());
        store.save_foundation(foundation_payload()).await.unwrap();
        assert!(store.foundation_exists().await.unwrap());

        let loaded = store.load_foundation().await.unwrap();
        assert_eq!(loaded.id, ArtifactId::foundation());
        assert!(matches!(loaded.payload, StagePayload::Foundation { .. }));
    }

    #[tokio::test]
    async fn load_foundation_missing_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.load_foundation().await.unwrap_err();
        assert!(matches!(err, HooklineError::FoundationMissing { .. }));
    }

    #[tokio::test]
    async fn put_and_get_artifact_records_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        let artifact = StageArtifact::new(script_id(1), script_payload("hook"));
        store
            .put_artifact(branch, &artifact, &[ArtifactId::foundation()])
            .await
            .unwrap();

        let loaded = store.get_artifact(branch, &script_id(1)).await.unwrap();
        assert_eq!(loaded.source_edit_id, artifact.source_edit_id);
        assert!(!loaded.stale);

        let tracker = store.load_tracker(branch).await.unwrap();
        assert!(tracker.contains(&script_id(1)));
        assert!(tracker.contains(&ArtifactId::foundation()));
    }

    #[tokio::test]
    async fn get_missing_artifact_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .get_artifact(BranchId::new(), &script_id(7))
            .await
            .unwrap_err();
        assert!(matches!(err, HooklineError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn payload_stage_mismatch_rejected_at_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        // A scene-plan payload under a drafting key must be refused.
        let bad = StageArtifact::new(
            script_id(1),
            StagePayload::ScenePlan { scenes: vec![] },
        );
        let err = store.put_artifact(branch, &bad, &[]).await.unwrap_err();
        assert!(matches!(err, HooklineError::PayloadMismatch { .. }));
    }

    #[tokio::test]
    async fn schema_version_mismatch_rejected_at_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        let mut artifact = StageArtifact::new(script_id(1), script_payload("h"));
        store.put_artifact(branch, &artifact, &[]).await.unwrap();

        // Corrupt the version on disk and confirm the read refuses it.
        artifact.schema_version = 99;
        let path = store.artifact_path(branch, &script_id(1));
        let json = serde_json::to_string(&artifact).unwrap();
        tokio::fs::write(&path, json).await.unwrap();

        let err = store.get_artifact(branch, &script_id(1)).await.unwrap_err();
        assert!(matches!(err, HooklineError::SchemaMismatch { found: 99, .. }));
    }

    #[tokio::test]
    async fn edit_invalidates_descendants_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        let key = UnitKey::new(AwarenessLevel::ProblemAware, "fear", 1);
        let script = script_id(1);
        let hooks = ArtifactId::new(Stage::Hooks, UnitPath::arm(key.clone(), 1));
        let scene = ArtifactId::new(Stage::Scenes, UnitPath::hook(key, 1, 1));

        store
            .put_artifact(
                branch,
                &StageArtifact::new(script.clone(), script_payload("v1")),
                &[],
            )
            .await
            .unwrap();
        store
            .put_artifact(
                branch,
                &StageArtifact::new(
                    hooks.clone(),
                    StagePayload::HookSet { options: vec![] },
                ),
                &[script.clone()],
            )
            .await
            .unwrap();
        store
            .put_artifact(
                branch,
                &StageArtifact::new(scene.clone(), StagePayload::ScenePlan { scenes: vec![] }),
                &[hooks.clone()],
            )
            .await
            .unwrap();

        let stale = store
            .edit_artifact(branch, &script, script_payload("v2"))
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);
        assert!(stale.contains(&hooks));
        assert!(stale.contains(&scene));

        // The edit itself stays ready; derived artifacts do not.
        assert!(store.is_ready(branch, &script).await.unwrap());
        assert!(!store.is_ready(branch, &hooks).await.unwrap());
        assert!(!store.is_ready(branch, &scene).await.unwrap());

        // Readers see the overlayed stale flag without touching the manifest.
        let loaded = store.get_artifact(branch, &scene).await.unwrap();
        assert!(loaded.stale);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn edited_content_never_visible_before_descendant_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        let key = UnitKey::new(AwarenessLevel::ProblemAware, "fear", 1);
        let script = script_id(1);
        let hooks = ArtifactId::new(Stage::Hooks, UnitPath::arm(key.clone(), 1));
        let scene = ArtifactId::new(Stage::Scenes, UnitPath::hook(key, 1, 1));

        store
            .put_artifact(
                branch,
                &StageArtifact::new(script.clone(), script_payload("v0")),
                &[],
            )
            .await
            .unwrap();

        for round in 0..16 {
            // Restore the chain so the scene reads ready again.
            store
                .put_artifact(
                    branch,
                    &StageArtifact::new(
                        hooks.clone(),
                        StagePayload::HookSet { options: vec![] },
                    ),
                    &[script.clone()],
                )
                .await
                .unwrap();
            store
                .put_artifact(
                    branch,
                    &StageArtifact::new(scene.clone(), StagePayload::ScenePlan { scenes: vec![] }),
                    &[hooks.clone()],
                )
                .await
                .unwrap();
            assert!(store.is_ready(branch, &scene).await.unwrap());

            let marker = format!("edit {round}");
            let reader = tokio::spawn({
                let store = store.clone();
                let script = script.clone();
                let scene = scene.clone();
                let marker = marker.clone();
                async move {
                    loop {
                        let artifact = store.get_artifact(branch, &script).await.unwrap();
                        let StagePayload::Script { hook_line, .. } = &artifact.payload else {
                            panic!("unexpected payload shape");
                        };
                        if hook_line == &marker {
                            // New content is visible; anything derived from
                            // the old content must already read not-ready.
                            return store.is_ready(branch, &scene).await.unwrap();
                        }
                        tokio::task::yield_now().await;
                    }
                }
            });

            store
                .edit_artifact(branch, &script, script_payload(&marker))
                .await
                .unwrap();
            let scene_ready_after_new_content = reader.await.unwrap();
            assert!(
                !scene_ready_after_new_content,
                "round {round}: derived artifact still ready after edited content was readable"
            );
        }
    }

    #[tokio::test]
    async fn edit_of_missing_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .edit_artifact(BranchId::new(), &script_id(1), script_payload("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, HooklineError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn branch_isolation_no_cross_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let b1 = BranchId::new();
        let b2 = BranchId::new();

        store
            .put_artifact(
                b1,
                &StageArtifact::new(script_id(1), script_payload("b1 only")),
                &[],
            )
            .await
            .unwrap();

        assert!(store.artifact_exists(b1, &script_id(1)).await.unwrap());
        assert!(!store.artifact_exists(b2, &script_id(1)).await.unwrap());
        assert!(store
            .get_artifact(b2, &script_id(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn list_stage_artifacts_sorted_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let branch = BranchId::new();

        for n in [2, 1, 3] {
            store
                .put_artifact(
                    branch,
                    &StageArtifact::new(script_id(n), script_payload("s")),
                    &[],
                )
                .await
                .unwrap();
        }
        store
            .edit_artifact(branch, &script_id(1), script_payload("edited"))
            .await
            .unwrap();

        let listed = store.list_stage_artifacts(branch, Stage::Drafting).await.unwrap();
        assert_eq!(listed.len(), 3);
        let ordinals: Vec<u8> = listed
            .iter()
            .map(|a| a.id.path.unit_key().unwrap().ordinal)
            .collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert!(listed.iter().all(|a| !a.stale));
    }

    #[tokio::test]
    async fn gate_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let branch = BranchId::new();

        {
            let store = store(dir.path());
            store
                .save_gate(branch, &GateState::paused_after(Stage::Hooks))
                .await
                .unwrap();
        }

        // Fresh handle over the same root, as after a process restart.
        let store = store(dir.path());
        let gate = store.load_gate(branch).await.unwrap().unwrap();
        assert_eq!(gate, GateState::paused_after(Stage::Hooks));
    }

    #[tokio::test]
    async fn load_gate_none_when_never_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_gate(BranchId::new()).await.unwrap().is_none());
    }
}
