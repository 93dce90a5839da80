use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use promptforge_types::{Optimization, Project, ProjectError, ProjectStatus, Prompt, PromptVersion};

/// In-memory record store for [`Optimization`]s. Durable persistence is an
/// external collaborator's concern (ORM persistence is a named Non-goal);
/// this exists only so a request has somewhere to write the pipeline's
/// output, mirroring the teacher's `RwLock<HashMap<..>>` session store
/// (`tandem-core/src/storage.rs`).
#[derive(Clone, Default)]
pub struct OptimizationStore {
    records: Arc<RwLock<HashMap<Uuid, Optimization>>>,
}

impl OptimizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, optimization: Optimization) {
        self.records.write().await.insert(optimization.id, optimization);
    }

    pub async fn get(&self, id: Uuid) -> Option<Optimization> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn update(&self, optimization: Optimization) {
        self.records.write().await.insert(optimization.id, optimization);
    }

    pub async fn list_for_project(&self, project_id: Uuid) -> Vec<Optimization> {
        self.records
            .read()
            .await
            .values()
            .filter(|o| o.project_id == Some(project_id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectStoreError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("project not found")]
    NotFound,
}

/// In-memory project tree store enforcing the depth, status, and
/// name-uniqueness invariants from the project data model.
#[derive(Clone, Default)]
pub struct ProjectStore {
    projects: Arc<RwLock<HashMap<Uuid, Project>>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_root(&self, name: impl Into<String>) -> Result<Project, ProjectStoreError> {
        let name = name.into();
        let mut projects = self.projects.write().await;
        ensure_unique_name(projects.values(), None, &name)?;
        let project = Project::new_root(name);
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    /// Idempotent root lookup-or-create: calling twice with the same `name`
    /// returns the same project ID, reactivating a soft-deleted project
    /// rather than creating a duplicate.
    pub async fn ensure_root_by_name(&self, name: impl Into<String>) -> Result<Project, ProjectStoreError> {
        let name = name.into();
        let mut projects = self.projects.write().await;
        if let Some(existing) = projects.values_mut().find(|p| p.parent_id.is_none() && p.name == name) {
            if existing.status == ProjectStatus::Deleted {
                existing.status = ProjectStatus::Active;
                existing.updated_at = chrono::Utc::now();
            }
            return Ok(existing.clone());
        }
        let project = Project::new_root(name);
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    pub async fn create_child(&self, parent_id: Uuid, name: impl Into<String>) -> Result<Project, ProjectStoreError> {
        let name = name.into();
        let mut projects = self.projects.write().await;
        let parent = visible_project(&projects, parent_id)?;
        ensure_unique_name(projects.values(), Some(parent_id), &name)?;
        let child = Project::new_child(name, &parent)?;
        projects.insert(child.id, child.clone());
        Ok(child)
    }

    /// Returns `None` for a soft-deleted project: deleted entries are
    /// invisible on all reads.
    pub async fn get(&self, id: Uuid) -> Option<Project> {
        let projects = self.projects.read().await;
        projects.get(&id).filter(|p| p.status != ProjectStatus::Deleted).cloned()
    }

    pub async fn update_context_profile(&self, id: Uuid, profile: serde_json::Value) -> Result<Project, ProjectStoreError> {
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(&id).ok_or(ProjectStoreError::NotFound)?;
        if project.status == ProjectStatus::Deleted {
            return Err(ProjectStoreError::NotFound);
        }
        project.ensure_mutable()?;
        project.context_profile = Some(profile);
        project.updated_at = chrono::Utc::now();
        Ok(project.clone())
    }

    pub async fn archive(&self, id: Uuid) -> Result<Project, ProjectStoreError> {
        self.set_status(id, ProjectStatus::Archived).await
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<Project, ProjectStoreError> {
        self.set_status(id, ProjectStatus::Deleted).await
    }

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<Project, ProjectStoreError> {
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(&id).ok_or(ProjectStoreError::NotFound)?;
        if project.status == ProjectStatus::Deleted {
            return Err(ProjectStoreError::NotFound);
        }
        project.status = status;
        project.updated_at = chrono::Utc::now();
        Ok(project.clone())
    }
}

fn visible_project(projects: &HashMap<Uuid, Project>, id: Uuid) -> Result<Project, ProjectStoreError> {
    projects
        .get(&id)
        .filter(|p| p.status != ProjectStatus::Deleted)
        .cloned()
        .ok_or(ProjectStoreError::NotFound)
}

fn ensure_unique_name<'a>(
    projects: impl Iterator<Item = &'a Project>,
    parent_id: Option<Uuid>,
    name: &str,
) -> Result<(), ProjectStoreError> {
    for project in projects {
        if project.status == ProjectStatus::Deleted {
            continue;
        }
        if project.parent_id == parent_id && project.name == name {
            return Err(ProjectStoreError::Project(ProjectError::DuplicateName(name.to_string())));
        }
    }
    Ok(())
}

/// In-memory store for [`Prompt`]s and their version history.
#[derive(Clone, Default)]
pub struct PromptStore {
    prompts: Arc<RwLock<HashMap<Uuid, Prompt>>>,
    versions: Arc<RwLock<HashMap<Uuid, Vec<PromptVersion>>>>,
}

impl PromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, content: impl Into<String>, project_id: Option<Uuid>) -> Prompt {
        let prompt = Prompt::new(content, project_id);
        self.prompts.write().await.insert(prompt.id, prompt.clone());
        prompt
    }

    /// Idempotent lookup-or-create: calling twice with the same
    /// `project_id` and (whitespace-normalised) `content` returns the same
    /// prompt ID instead of creating a duplicate.
    pub async fn ensure_in_project(&self, project_id: Uuid, content: impl Into<String>) -> Prompt {
        let content = content.into();
        let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut prompts = self.prompts.write().await;
        if let Some(existing) = prompts
            .values()
            .find(|p| p.project_id == Some(project_id) && p.normalized_content() == normalized)
        {
            return existing.clone();
        }
        let prompt = Prompt::new(content, Some(project_id));
        prompts.insert(prompt.id, prompt.clone());
        prompt
    }

    pub async fn get(&self, id: Uuid) -> Option<Prompt> {
        self.prompts.read().await.get(&id).cloned()
    }

    pub async fn update_content(&self, id: Uuid, new_content: impl Into<String>) -> Option<Prompt> {
        let mut prompts = self.prompts.write().await;
        let prompt = prompts.get_mut(&id)?;
        let snapshot = prompt.update_content(new_content);
        self.versions.write().await.entry(id).or_default().push(snapshot);
        Some(prompt.clone())
    }

    pub async fn list_versions(&self, id: Uuid) -> Vec<PromptVersion> {
        self.versions.read().await.get(&id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archived_project_rejects_context_profile_update() {
        let store = ProjectStore::new();
        let project = store.create_root("root").await.unwrap();
        store.archive(project.id).await.unwrap();
        let err = store
            .update_context_profile(project.id, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectStoreError::Project(ProjectError::Archived)));
    }

    #[tokio::test]
    async fn deleted_project_is_invisible_on_read() {
        let store = ProjectStore::new();
        let project = store.create_root("root").await.unwrap();
        store.soft_delete(project.id).await.unwrap();
        assert!(store.get(project.id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_sibling_name_conflicts() {
        let store = ProjectStore::new();
        let root = store.create_root("root").await.unwrap();
        store.create_child(root.id, "dup").await.unwrap();
        let err = store.create_child(root.id, "dup").await.unwrap_err();
        assert!(matches!(err, ProjectStoreError::Project(ProjectError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn deleted_sibling_name_does_not_conflict() {
        let store = ProjectStore::new();
        let root = store.create_root("root").await.unwrap();
        let first = store.create_child(root.id, "dup").await.unwrap();
        store.soft_delete(first.id).await.unwrap();
        let second = store.create_child(root.id, "dup").await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn ensure_root_by_name_is_idempotent() {
        let store = ProjectStore::new();
        let first = store.ensure_root_by_name("docs").await.unwrap();
        let second = store.ensure_root_by_name("docs").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn ensure_root_by_name_reactivates_soft_deleted() {
        let store = ProjectStore::new();
        let project = store.ensure_root_by_name("docs").await.unwrap();
        store.soft_delete(project.id).await.unwrap();
        let reactivated = store.ensure_root_by_name("docs").await.unwrap();
        assert_eq!(reactivated.id, project.id);
        assert_eq!(reactivated.status, ProjectStatus::Active);
    }

    #[tokio::test]
    async fn ensure_prompt_in_project_is_idempotent_on_normalised_content() {
        let prompts = PromptStore::new();
        let project_id = Uuid::new_v4();
        let first = prompts.ensure_in_project(project_id, "  write   a  function ").await;
        let second = prompts.ensure_in_project(project_id, "write a function").await;
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn prompt_content_update_records_version() {
        let store = PromptStore::new();
        let prompt = store.create("v1", None).await;
        store.update_content(prompt.id, "v2").await.unwrap();
        let versions = store.list_versions(prompt.id).await;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "v1");
    }
}
