use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const VFS_MAX_DEPTH: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsFolder {
    pub id: Uuid,
    pub app_id: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub depth: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsFile {
    pub id: Uuid,
    pub app_id: String,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub content: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of a file's content at a prior version, created on
/// every content-changing update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsFileVersion {
    pub id: Uuid,
    pub file_id: Uuid,
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl VfsFolder {
    pub fn new_root(app_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            name: name.into(),
            parent_id: None,
            depth: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
