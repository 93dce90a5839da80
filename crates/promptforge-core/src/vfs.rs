use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use promptforge_types::{VfsFile, VfsFileVersion, VfsFolder, VFS_MAX_DEPTH};

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("folder depth would exceed the maximum of {VFS_MAX_DEPTH}")]
    DepthExceeded,
    #[error("a folder cannot be moved under itself or one of its own descendants")]
    CircularMove,
    #[error("a folder or file named '{0}' already exists in the destination")]
    NameConflict(String),
    #[error("folder not found")]
    FolderNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("file version not found")]
    VersionNotFound,
}

/// App-scoped in-memory hierarchical store for folders and files. Grounded
/// on the teacher's `RwLock<HashMap<..>>` session store idiom
/// (`tandem-core/src/storage.rs`), which is how the teacher holds
/// in-process state before any durable backend is wired in.
#[derive(Clone, Default)]
pub struct VfsStore {
    folders: Arc<RwLock<HashMap<Uuid, VfsFolder>>>,
    files: Arc<RwLock<HashMap<Uuid, VfsFile>>>,
    file_versions: Arc<RwLock<HashMap<Uuid, Vec<VfsFileVersion>>>>,
}

impl VfsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_root_folder(
        &self,
        app_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<VfsFolder, VfsError> {
        let app_id = app_id.into();
        let name = name.into();
        let mut folders = self.folders.write().await;
        ensure_name_unique(folders.values(), &app_id, None, &name)?;
        let folder = VfsFolder::new_root(app_id, name);
        folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    pub async fn create_child_folder(
        &self,
        parent_id: Uuid,
        name: impl Into<String>,
    ) -> Result<VfsFolder, VfsError> {
        let name = name.into();
        let mut folders = self.folders.write().await;
        let parent = folders.get(&parent_id).cloned().ok_or(VfsError::FolderNotFound)?;
        let depth = parent.depth + 1;
        if depth > VFS_MAX_DEPTH {
            return Err(VfsError::DepthExceeded);
        }
        ensure_name_unique(folders.values(), &parent.app_id, Some(parent_id), &name)?;
        let now = Utc::now();
        let folder = VfsFolder {
            id: Uuid::new_v4(),
            app_id: parent.app_id.clone(),
            name,
            parent_id: Some(parent_id),
            depth,
            created_at: now,
            updated_at: now,
        };
        folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    pub async fn get_folder(&self, folder_id: Uuid) -> Option<VfsFolder> {
        self.folders.read().await.get(&folder_id).cloned()
    }

    /// Moves `folder_id` under `new_parent_id` (or to root when `None`),
    /// enforcing: no circular reference, depth ≤ [`VFS_MAX_DEPTH`] across the
    /// entire moved subtree, and name uniqueness in the destination.
    pub async fn move_folder(&self, folder_id: Uuid, new_parent_id: Option<Uuid>) -> Result<VfsFolder, VfsError> {
        let mut folders = self.folders.write().await;

        let folder = folders.get(&folder_id).cloned().ok_or(VfsError::FolderNotFound)?;

        let new_depth = match new_parent_id {
            None => 0,
            Some(parent_id) => {
                if parent_id == folder_id || is_descendant(&folders, parent_id, folder_id) {
                    return Err(VfsError::CircularMove);
                }
                let parent = folders.get(&parent_id).cloned().ok_or(VfsError::FolderNotFound)?;
                parent.depth + 1
            }
        };

        let depth_delta = new_depth as i64 - folder.depth as i64;
        let subtree = collect_subtree(&folders, folder_id);
        if let Some(max_existing_depth) = subtree.iter().filter_map(|id| folders.get(id)).map(|f| f.depth as i64).max() {
            if max_existing_depth + depth_delta > VFS_MAX_DEPTH as i64 {
                return Err(VfsError::DepthExceeded);
            }
        }

        ensure_name_unique(
            folders.values().filter(|f| f.id != folder_id),
            &folder.app_id,
            new_parent_id,
            &folder.name,
        )?;

        for id in &subtree {
            if let Some(node) = folders.get_mut(id) {
                node.depth = (node.depth as i64 + depth_delta) as u32;
                node.updated_at = Utc::now();
            }
        }
        let moved = folders.get_mut(&folder_id).expect("checked above");
        moved.parent_id = new_parent_id;
        moved.depth = new_depth;
        moved.updated_at = Utc::now();
        Ok(moved.clone())
    }

    pub async fn create_file(
        &self,
        app_id: impl Into<String>,
        folder_id: Option<Uuid>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<VfsFile, VfsError> {
        let app_id = app_id.into();
        let name = name.into();
        if let Some(folder_id) = folder_id {
            if self.folders.read().await.get(&folder_id).is_none() {
                return Err(VfsError::FolderNotFound);
            }
        }
        let mut files = self.files.write().await;
        ensure_file_name_unique(files.values(), &app_id, folder_id, &name)?;
        let now = Utc::now();
        let file = VfsFile {
            id: Uuid::new_v4(),
            app_id,
            folder_id,
            name,
            content: content.into(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        files.insert(file.id, file.clone());
        Ok(file)
    }

    pub async fn get_file(&self, file_id: Uuid) -> Option<VfsFile> {
        self.files.read().await.get(&file_id).cloned()
    }

    /// Updates a file's content. Only snapshots a [`VfsFileVersion`] when the
    /// new content actually differs from the current content; a no-op rename
    /// or identical-content write must not create a snapshot.
    pub async fn update_file_content(&self, file_id: Uuid, new_content: impl Into<String>) -> Result<VfsFile, VfsError> {
        let new_content = new_content.into();
        let mut files = self.files.write().await;
        let file = files.get_mut(&file_id).ok_or(VfsError::FileNotFound)?;

        if file.content != new_content {
            let snapshot = VfsFileVersion {
                id: Uuid::new_v4(),
                file_id,
                version: file.version,
                content: file.content.clone(),
                created_at: Utc::now(),
            };
            self.file_versions.write().await.entry(file_id).or_default().push(snapshot);
            file.content = new_content;
            file.version += 1;
        }
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    pub async fn rename_file(&self, file_id: Uuid, new_name: impl Into<String>) -> Result<VfsFile, VfsError> {
        let new_name = new_name.into();
        let mut files = self.files.write().await;
        let (app_id, folder_id) = {
            let file = files.get(&file_id).ok_or(VfsError::FileNotFound)?;
            (file.app_id.clone(), file.folder_id)
        };
        ensure_file_name_unique(files.values().filter(|f| f.id != file_id), &app_id, folder_id, &new_name)?;
        let file = files.get_mut(&file_id).expect("checked above");
        file.name = new_name;
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    pub async fn list_file_versions(&self, file_id: Uuid) -> Vec<VfsFileVersion> {
        self.file_versions.read().await.get(&file_id).cloned().unwrap_or_default()
    }

    /// Restores a file to an earlier snapshot: the pre-restore content is
    /// itself snapshotted first (so the restore is undoable), then the
    /// file's content becomes the target version's content and its version
    /// counter increments, same as any other content-changing write.
    pub async fn restore_version(&self, file_id: Uuid, version_id: Uuid) -> Result<VfsFile, VfsError> {
        let mut files = self.files.write().await;
        let file = files.get_mut(&file_id).ok_or(VfsError::FileNotFound)?;

        let mut file_versions = self.file_versions.write().await;
        let history = file_versions.entry(file_id).or_default();
        let target = history.iter().find(|v| v.id == version_id).cloned().ok_or(VfsError::VersionNotFound)?;

        let pre_restore_snapshot = VfsFileVersion {
            id: Uuid::new_v4(),
            file_id,
            version: file.version,
            content: file.content.clone(),
            created_at: Utc::now(),
        };
        history.push(pre_restore_snapshot);

        file.content = target.content;
        file.version += 1;
        file.updated_at = Utc::now();
        Ok(file.clone())
    }
}

fn is_descendant(folders: &HashMap<Uuid, VfsFolder>, candidate: Uuid, ancestor: Uuid) -> bool {
    let mut current = candidate;
    loop {
        let Some(folder) = folders.get(&current) else { return false };
        match folder.parent_id {
            Some(parent_id) if parent_id == ancestor => return true,
            Some(parent_id) => current = parent_id,
            None => return false,
        }
    }
}

fn collect_subtree(folders: &HashMap<Uuid, VfsFolder>, root: Uuid) -> Vec<Uuid> {
    let mut result = vec![root];
    let mut frontier = vec![root];
    while let Some(current) = frontier.pop() {
        for folder in folders.values() {
            if folder.parent_id == Some(current) {
                result.push(folder.id);
                frontier.push(folder.id);
            }
        }
    }
    result
}

fn ensure_name_unique<'a>(
    folders: impl Iterator<Item = &'a VfsFolder>,
    app_id: &str,
    parent_id: Option<Uuid>,
    name: &str,
) -> Result<(), VfsError> {
    for folder in folders {
        if folder.app_id == app_id && folder.parent_id == parent_id && folder.name == name {
            return Err(VfsError::NameConflict(name.to_string()));
        }
    }
    Ok(())
}

fn ensure_file_name_unique<'a>(
    files: impl Iterator<Item = &'a VfsFile>,
    app_id: &str,
    folder_id: Option<Uuid>,
    name: &str,
) -> Result<(), VfsError> {
    for file in files {
        if file.app_id == app_id && file.folder_id == folder_id && file.name == name {
            return Err(VfsError::NameConflict(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_folder_has_depth_zero() {
        let store = VfsStore::new();
        let folder = store.create_root_folder("app1", "root").await.unwrap();
        assert_eq!(folder.depth, 0);
        assert_eq!(folder.parent_id, None);
    }

    #[tokio::test]
    async fn child_folder_depth_increments() {
        let store = VfsStore::new();
        let root = store.create_root_folder("app1", "root").await.unwrap();
        let child = store.create_child_folder(root.id, "child").await.unwrap();
        assert_eq!(child.depth, 1);
    }

    #[tokio::test]
    async fn deep_nesting_past_max_depth_is_rejected() {
        let store = VfsStore::new();
        let mut current = store.create_root_folder("app1", "root").await.unwrap();
        for i in 0..VFS_MAX_DEPTH {
            current = store.create_child_folder(current.id, format!("level{i}")).await.unwrap();
        }
        let err = store.create_child_folder(current.id, "too-deep").await.unwrap_err();
        assert!(matches!(err, VfsError::DepthExceeded));
    }

    #[tokio::test]
    async fn move_under_own_descendant_is_rejected() {
        let store = VfsStore::new();
        let root = store.create_root_folder("app1", "root").await.unwrap();
        let child = store.create_child_folder(root.id, "child").await.unwrap();
        let err = store.move_folder(root.id, Some(child.id)).await.unwrap_err();
        assert!(matches!(err, VfsError::CircularMove));
    }

    #[tokio::test]
    async fn move_self_onto_self_is_rejected() {
        let store = VfsStore::new();
        let root = store.create_root_folder("app1", "root").await.unwrap();
        let err = store.move_folder(root.id, Some(root.id)).await.unwrap_err();
        assert!(matches!(err, VfsError::CircularMove));
    }

    #[tokio::test]
    async fn move_preserves_depth_across_subtree() {
        let store = VfsStore::new();
        let root_a = store.create_root_folder("app1", "a").await.unwrap();
        let root_b = store.create_root_folder("app1", "b").await.unwrap();
        let child = store.create_child_folder(root_a.id, "child").await.unwrap();
        let grandchild = store.create_child_folder(child.id, "grandchild").await.unwrap();

        store.move_folder(child.id, Some(root_b.id)).await.unwrap();

        let moved_child = store.get_folder(child.id).await.unwrap();
        let moved_grandchild = store.get_folder(grandchild.id).await.unwrap();
        assert_eq!(moved_child.depth, 1);
        assert_eq!(moved_grandchild.depth, 2);
    }

    #[tokio::test]
    async fn duplicate_name_in_same_parent_conflicts() {
        let store = VfsStore::new();
        let root = store.create_root_folder("app1", "root").await.unwrap();
        store.create_child_folder(root.id, "dup").await.unwrap();
        let err = store.create_child_folder(root.id, "dup").await.unwrap_err();
        assert!(matches!(err, VfsError::NameConflict(_)));
    }

    #[tokio::test]
    async fn content_change_snapshots_prior_version() {
        let store = VfsStore::new();
        let file = store.create_file("app1", None, "f.txt", "v1").await.unwrap();
        store.update_file_content(file.id, "v2").await.unwrap();
        let versions = store.list_file_versions(file.id).await;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "v1");
        let updated = store.get_file(file.id).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn identical_content_update_does_not_snapshot() {
        let store = VfsStore::new();
        let file = store.create_file("app1", None, "f.txt", "same").await.unwrap();
        store.update_file_content(file.id, "same").await.unwrap();
        let versions = store.list_file_versions(file.id).await;
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn rename_does_not_snapshot() {
        let store = VfsStore::new();
        let file = store.create_file("app1", None, "old.txt", "x").await.unwrap();
        store.rename_file(file.id, "new.txt").await.unwrap();
        let versions = store.list_file_versions(file.id).await;
        assert!(versions.is_empty());
        let renamed = store.get_file(file.id).await.unwrap();
        assert_eq!(renamed.name, "new.txt");
        assert_eq!(renamed.version, 1);
    }

    #[tokio::test]
    async fn restore_version_bumps_version_and_snapshots_pre_restore_content() {
        let store = VfsStore::new();
        let file = store.create_file("app1", None, "f.txt", "v1").await.unwrap();
        store.update_file_content(file.id, "v2").await.unwrap();
        let v1_snapshot = store.list_file_versions(file.id).await.into_iter().next().unwrap();

        let restored = store.restore_version(file.id, v1_snapshot.id).await.unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.content, "v1");

        let versions = store.list_file_versions(file.id).await;
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].content, "v2");
        assert_eq!(versions[1].version, 2);
    }

    #[tokio::test]
    async fn restore_unknown_version_is_rejected() {
        let store = VfsStore::new();
        let file = store.create_file("app1", None, "f.txt", "v1").await.unwrap();
        let err = store.restore_version(file.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, VfsError::VersionNotFound));
    }

    #[tokio::test]
    async fn restore_on_unknown_file_is_rejected() {
        let store = VfsStore::new();
        let err = store.restore_version(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, VfsError::FileNotFound));
    }
}
