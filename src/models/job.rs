use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    CreateNew,
    AssignExisting,
    Both,
}

impl ClusterMode {
    pub fn allows_assignment(&self) -> bool {
        matches!(self, ClusterMode::AssignExisting | ClusterMode::Both)
    }

    pub fn allows_creation(&self) -> bool {
        matches!(self, ClusterMode::CreateNew | ClusterMode::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMode::CreateNew => "create_new",
            ClusterMode::AssignExisting => "assign_existing",
            ClusterMode::Both => "both",
        }
    }
}

impl FromStr for ClusterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_new" => Ok(ClusterMode::CreateNew),
            "assign_existing" => Ok(ClusterMode::AssignExisting),
            "both" => Ok(ClusterMode::Both),
            other => Err(format!("unknown cluster mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(JobStatus::Starting),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Durable progress record of one background clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub mode: ClusterMode,
    pub similarity_threshold: f32,
    pub batch_size: i64,
    pub continuous: bool,
    pub initial_count: i64,
    pub target_count: i64,
    pub processed: i64,
    pub assigned: i64,
    pub persons_created: i64,
    pub batch_index: i64,
    pub total_batches: i64,
    /// Highest face id already visited; a resumed run continues after it.
    pub cursor: i64,
    pub errors: Vec<String>,
    pub started_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}
