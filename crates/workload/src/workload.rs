//! Workload data model
//!
//! A [`Workload`] is one schedulable unit of work (a sync, check, discover...).
//! The engine treats it as a value object: stages copy it into their local
//! scope and only the store mutates the persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a workload performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Sync,
    Check,
    Discover,
    Spec,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Check => "check",
            Self::Discover => "discover",
            Self::Spec => "spec",
        }
    }
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "check" => Ok(Self::Check),
            "discover" => Ok(Self::Discover),
            "spec" => Ok(Self::Spec),
            other => Err(format!("unknown workload type: {other}")),
        }
    }
}

/// Scheduling priority
///
/// Persisted as an integer (`0` default, `1` high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPriority {
    Default,
    High,
}

impl WorkloadPriority {
    pub const ALL: [WorkloadPriority; 2] = [WorkloadPriority::Default, WorkloadPriority::High];

    pub fn to_int(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::High => 1,
        }
    }

    pub fn from_int(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkloadPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Workload lifecycle status
///
/// ```text
/// pending ──► claimed ──► launched ──► running
///    │           │            │           │
///    └───────────┴────────────┴───────────┴──► success | failure | cancelled
/// ```
///
/// Transitions only move forward; terminal statuses never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Claimed,
    Launched,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl WorkloadStatus {
    /// Statuses a workload can still progress out of
    pub const ACTIVE: [WorkloadStatus; 4] = [
        WorkloadStatus::Pending,
        WorkloadStatus::Claimed,
        WorkloadStatus::Launched,
        WorkloadStatus::Running,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "launched" => Ok(Self::Launched),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown workload status: {other}")),
        }
    }
}

/// Opaque key/value label attached to a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLabel {
    pub key: String,
    pub value: String,
}

impl WorkloadLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A persisted workload record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub workload_type: WorkloadType,
    pub priority: WorkloadPriority,
    pub dataplane_group: String,
    /// Set when a dataplane claims the workload
    pub dataplane_id: Option<String>,
    pub status: WorkloadStatus,
    /// Workloads sharing a non-null key never run concurrently
    pub mutex_key: Option<String>,
    pub labels: Vec<WorkloadLabel>,
    /// Passed through to the execution substrate unmodified
    pub input_payload: String,
    pub log_path: String,
    pub auto_id: String,
    pub deadline: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub termination_source: Option<String>,
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Definition of a workload to be created
#[derive(Debug, Clone)]
pub struct NewWorkload {
    pub id: String,
    pub workload_type: WorkloadType,
    pub priority: WorkloadPriority,
    pub dataplane_group: String,
    pub mutex_key: Option<String>,
    pub labels: Vec<WorkloadLabel>,
    pub input_payload: String,
    pub log_path: String,
    pub auto_id: String,
}

impl NewWorkload {
    pub fn new(
        id: impl Into<String>,
        workload_type: WorkloadType,
        dataplane_group: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            log_path: format!("/workspace/{id}/logs.log"),
            auto_id: uuid::Uuid::now_v7().to_string(),
            id,
            workload_type,
            priority: WorkloadPriority::Default,
            dataplane_group: dataplane_group.into(),
            mutex_key: None,
            labels: vec![],
            input_payload: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: WorkloadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mutex_key(mut self, key: impl Into<String>) -> Self {
        self.mutex_key = Some(key.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(WorkloadLabel::new(key, value));
        self
    }

    pub fn with_input_payload(mut self, payload: impl Into<String>) -> Self {
        self.input_payload = payload.into();
        self
    }

    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Materialize the record as the store persists it
    pub fn into_workload(self, now: DateTime<Utc>) -> Workload {
        Workload {
            id: self.id,
            workload_type: self.workload_type,
            priority: self.priority,
            dataplane_group: self.dataplane_group,
            dataplane_id: None,
            status: WorkloadStatus::Pending,
            mutex_key: self.mutex_key,
            labels: self.labels,
            input_payload: self.input_payload,
            log_path: self.log_path,
            auto_id: self.auto_id,
            deadline: None,
            last_heartbeat_at: None,
            termination_source: None,
            termination_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
