//! Branch lifecycle: creation, listing, status updates, and deletion.
//!
//! Branches are isolated subtrees under the brand directory. Creation
//! requires the brand foundation to exist (a branch seeds its research from
//! it); deletion renames the subtree aside first so no reader can observe a
//! half-deleted branch.

use hookline_types::{
    Branch, BranchId, BranchSettings, BranchStatus, GateState, HooklineError, Result,
};

use crate::{ArtifactStore, StalenessTracker};
use hookline_types::ArtifactId;

/// Manages the branch subtrees of one brand.
#[derive(Debug, Clone)]
pub struct BranchManager {
    store: ArtifactStore,
}

impl BranchManager {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn meta_path(&self, branch: BranchId) -> std::path::PathBuf {
        self.store.branch_dir(branch).join("branch.json")
    }

    /// Create a new branch. Fails when the brand has no foundation artifact,
    /// since every branch derives from it.
    pub async fn create(
        &self,
        label: impl Into<String>,
        settings: BranchSettings,
    ) -> Result<Branch> {
        if !self.store.foundation_exists().await? {
            return Err(HooklineError::FoundationMissing {
                brand: self.store.brand().to_string(),
            });
        }
        let branch = Branch::new(label, settings);

        crate::write_json_atomic(&self.meta_path(branch.id), &branch).await?;
        self.store.save_gate(branch.id, &GateState::idle()).await?;

        // Seed the manifest with the shared foundation node so downstream
        // readiness checks have their root.
        let mut tracker = StalenessTracker::new();
        tracker.record_node(ArtifactId::foundation());
        self.store.save_tracker(branch.id, &tracker).await?;

        tracing::info!(branch = %branch.id, label = %branch.label, "Branch created");
        Ok(branch)
    }

    pub async fn load(&self, branch: BranchId) -> Result<Branch> {
        crate::read_json(&self.meta_path(branch))
            .await?
            .ok_or_else(|| HooklineError::BranchNotFound {
                id: branch.to_string(),
            })
    }

    pub async fn exists(&self, branch: BranchId) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.meta_path(branch)).await?)
    }

    /// All branches of the brand, sorted by creation time.
    pub async fn list(&self) -> Result<Vec<Branch>> {
        let dir = self.store.branches_dir();
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // Deletion leftovers and foreign directories are skipped, not
            // errors.
            let meta = entry.path().join("branch.json");
            if let Some(branch) = crate::read_json::<Branch>(&meta).await? {
                out.push(branch);
            }
        }
        out.sort_by_key(|b| b.created_at);
        Ok(out)
    }

    pub async fn set_status(&self, branch: BranchId, status: BranchStatus) -> Result<Branch> {
        let mut meta = self.load(branch).await?;
        meta.status = status;
        crate::write_json_atomic(&self.meta_path(branch), &meta).await?;
        Ok(meta)
    }

    /// Delete a branch and everything under it.
    ///
    /// The subtree is renamed aside before removal, so the branch disappears
    /// from `list`/`load` in one step even if the recursive delete is
    /// interrupted.
    pub async fn delete(&self, branch: BranchId) -> Result<()> {
        let dir = self.store.branch_dir(branch);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(HooklineError::BranchNotFound {
                id: branch.to_string(),
            });
        }
        let trash = self
            .store
            .branches_dir()
            .join(format!(".trash-{branch}"));
        tokio::fs::rename(&dir, &trash).await?;
        tokio::fs::remove_dir_all(&trash).await?;
        tracing::info!(branch = %branch, "Branch deleted");
        Ok(())
    }
}
