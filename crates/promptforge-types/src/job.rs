use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub app_id: String,
    pub job_type: String,
    pub payload: Value,
    pub priority: i32,
    pub status: JobStatus,
    pub progress: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Submission sequence number, used to break priority ties FIFO.
    pub submission_order: u64,
}

impl Job {
    pub fn new(
        app_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        priority: i32,
        max_retries: u32,
        submission_order: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            job_type: job_type.into(),
            payload,
            priority,
            status: JobStatus::Pending,
            progress: 0.0,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            updated_at: None,
            result: None,
            error: None,
            submission_order,
        }
    }

    pub fn set_progress(&mut self, value: f64) {
        self.progress = value.clamp(0.0, 1.0);
        self.updated_at = Some(Utc::now());
    }
}
