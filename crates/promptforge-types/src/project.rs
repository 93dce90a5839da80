use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const MAX_FOLDER_DEPTH: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
    Deleted,
}

/// A node in the project tree. Root-level parents have `parent_id = None`.
/// `depth(child) = depth(parent) + 1`, capped at [`MAX_FOLDER_DEPTH`]. Name
/// uniqueness holds within each parent scope, excluding soft-deleted
/// entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub depth: u32,
    pub status: ProjectStatus,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_profile: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project depth {0} exceeds the maximum of {MAX_FOLDER_DEPTH}")]
    DepthExceeded(u32),
    #[error("project is archived and rejects mutations")]
    Archived,
    #[error("project not found")]
    NotFound,
    #[error("a project named '{0}' already exists in this parent scope")]
    DuplicateName(String),
}

impl Project {
    pub fn new_root(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_id: None,
            depth: 0,
            status: ProjectStatus::Active,
            description: None,
            context_profile: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_child(name: impl Into<String>, parent: &Project) -> Result<Self, ProjectError> {
        let depth = parent.depth + 1;
        if depth > MAX_FOLDER_DEPTH {
            return Err(ProjectError::DepthExceeded(depth));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_id: Some(parent.id),
            depth,
            status: ProjectStatus::Active,
            description: None,
            context_profile: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Archived projects reject mutations (403); deleted projects are
    /// invisible on all reads (404), which callers enforce before ever
    /// reaching this check.
    pub fn ensure_mutable(&self) -> Result<(), ProjectError> {
        match self.status {
            ProjectStatus::Archived => Err(ProjectError::Archived),
            ProjectStatus::Deleted => Err(ProjectError::NotFound),
            ProjectStatus::Active => Ok(()),
        }
    }
}

/// A versioned prompt, optionally scoped to a project (or root-level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub content: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of a prompt's prior content, created whenever the
/// content changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: Uuid,
    pub prompt_id: Uuid,
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Prompt {
    pub fn new(content: impl Into<String>, project_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            content: content.into(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a content change, returning the snapshot of the prior value
    /// that must be persisted as an immutable `PromptVersion` before the new
    /// content takes effect.
    pub fn update_content(&mut self, new_content: impl Into<String>) -> PromptVersion {
        let new_content = new_content.into();
        let snapshot = PromptVersion {
            id: Uuid::new_v4(),
            prompt_id: self.id,
            version: self.version,
            content: self.content.clone(),
            created_at: Utc::now(),
        };
        self.content = new_content;
        self.version += 1;
        self.updated_at = Utc::now();
        snapshot
    }

    pub fn normalized_content(&self) -> String {
        self.content.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_depth_is_parent_depth_plus_one() {
        let root = Project::new_root("root");
        let child = Project::new_child("child", &root).unwrap();
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id, Some(root.id));
    }

    #[test]
    fn depth_cap_is_enforced() {
        let mut current = Project::new_root("root");
        for _ in 0..MAX_FOLDER_DEPTH {
            current = Project::new_child("child", &current).unwrap();
        }
        let err = Project::new_child("too-deep", &current).unwrap_err();
        assert!(matches!(err, ProjectError::DepthExceeded(9)));
    }

    #[test]
    fn archived_project_rejects_mutation() {
        let mut project = Project::new_root("root");
        project.status = ProjectStatus::Archived;
        assert!(matches!(project.ensure_mutable(), Err(ProjectError::Archived)));
    }

    #[test]
    fn prompt_update_snapshots_prior_content() {
        let mut prompt = Prompt::new("v1", None);
        let snapshot = prompt.update_content("v2");
        assert_eq!(snapshot.content, "v1");
        assert_eq!(snapshot.version, 1);
        assert_eq!(prompt.version, 2);
        assert_eq!(prompt.content, "v2");
    }

    #[test]
    fn normalized_content_collapses_whitespace() {
        let prompt = Prompt::new("  hello   world  ", None);
        assert_eq!(prompt.normalized_content(), "hello world");
    }
}
