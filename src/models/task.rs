//! # Collection Task
//!
//! A unit of collection work: fetch `scope` from `source_id`. Tasks are minted
//! fresh by the gap detector every cycle and never outlive it; the next scan
//! is authoritative for what still needs collecting.

use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies an external data source and the worker that serves it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque, source-specific description of what to fetch (date range, entity
/// id, page). The collector never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskScope(String);

impl TaskScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskScope {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskScope {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority classes in dispatch order. The derived `Ord` ranks `Critical`
/// lowest, so ascending sorts put the most urgent work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid task priority: {s}")),
        }
    }
}

/// Why the gap detector emitted a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Never collected
    Missing,
    /// Collected, but older than the expected freshness
    Stale,
}

impl fmt::Display for GapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionTask {
    pub task_id: TaskId,
    pub source_id: SourceId,
    pub scope: TaskScope,
    pub priority: TaskPriority,
    pub gap_kind: GapKind,
    /// When the underlying data became expected
    pub expected_since: DateTime<Utc>,
    /// Attempts started so far, the first one included
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub status: TaskState,
}

impl CollectionTask {
    pub fn new(
        source_id: SourceId,
        scope: TaskScope,
        priority: TaskPriority,
        gap_kind: GapKind,
        expected_since: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            source_id,
            scope,
            priority,
            gap_kind,
            expected_since,
            attempt_count: 0,
            created_at,
            last_attempted_at: None,
            status: TaskState::Pending,
        }
    }

    /// Record the start of an attempt
    pub fn mark_attempt(&mut self, at: DateTime<Utc>) {
        self.attempt_count += 1;
        self.last_attempted_at = Some(at);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
