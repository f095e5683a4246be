//! Read-only view of the case aggregate.
//!
//! The engine never owns cases; it reads snapshots from the surrounding
//! application and asks it to perform the two auto-actions a rule can
//! request (reassignment, priority change).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

/// Case status as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Pending,
    Resolved,
    Closed,
}

impl CaseStatus {
    /// Whether the SLA engine should evaluate a case in this status.
    pub fn is_escalatable(self) -> bool {
        matches!(self, CaseStatus::Open | CaseStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Pending => "pending",
            CaseStatus::Resolved => "resolved",
            CaseStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(CaseStatus::Open),
            "pending" => Some(CaseStatus::Pending),
            "resolved" => Some(CaseStatus::Resolved),
            "closed" => Some(CaseStatus::Closed),
            _ => None,
        }
    }
}

/// Case priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl CasePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            CasePriority::Low => "low",
            CasePriority::Medium => "medium",
            CasePriority::High => "high",
            CasePriority::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(CasePriority::Low),
            "medium" => Some(CasePriority::Medium),
            "high" => Some(CasePriority::High),
            "critical" => Some(CasePriority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for CasePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a case, as consumed from the case aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub id: Uuid,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub case_type: String,
    pub status: CaseStatus,
    pub priority: CasePriority,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,

    /// Extra case fields consulted by rule `conditions` matching.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

/// Access to the case aggregate, provided by the surrounding application.
#[async_trait]
pub trait CaseDirectory: Send + Sync {
    /// Cases the periodic evaluator should consider.
    async fn open_cases(&self) -> EngineResult<Vec<CaseSnapshot>>;

    async fn case(&self, case_id: Uuid) -> EngineResult<Option<CaseSnapshot>>;

    /// Reassign the case to another user (rule auto-action).
    async fn reassign(&self, case_id: Uuid, assignee: Uuid) -> EngineResult<()>;

    /// Change the case priority, returning the previous value (rule
    /// auto-action).
    async fn change_priority(
        &self,
        case_id: Uuid,
        priority: CasePriority,
    ) -> EngineResult<CasePriority>;
}

/// In-memory case directory, used in tests and as a reference collaborator.
#[derive(Default)]
pub struct InMemoryCaseDirectory {
    cases: DashMap<Uuid, CaseSnapshot>,
}

impl InMemoryCaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, case: CaseSnapshot) {
        self.cases.insert(case.id, case);
    }

    pub fn snapshot(&self, case_id: Uuid) -> Option<CaseSnapshot> {
        self.cases.get(&case_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl CaseDirectory for InMemoryCaseDirectory {
    async fn open_cases(&self) -> EngineResult<Vec<CaseSnapshot>> {
        Ok(self
            .cases
            .iter()
            .filter(|entry| entry.value().status.is_escalatable())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn case(&self, case_id: Uuid) -> EngineResult<Option<CaseSnapshot>> {
        Ok(self.snapshot(case_id))
    }

    async fn reassign(&self, case_id: Uuid, assignee: Uuid) -> EngineResult<()> {
        let mut entry = self
            .cases
            .get_mut(&case_id)
            .ok_or(EngineError::CaseNotFound { case_id })?;
        entry.value_mut().assigned_to = Some(assignee);
        Ok(())
    }

    async fn change_priority(
        &self,
        case_id: Uuid,
        priority: CasePriority,
    ) -> EngineResult<CasePriority> {
        let mut entry = self
            .cases
            .get_mut(&case_id)
            .ok_or(EngineError::CaseNotFound { case_id })?;
        let old = entry.value().priority;
        entry.value_mut().priority = priority;
        Ok(old)
    }
}

/// Convenience `Arc` alias used across the engine.
pub type SharedCaseDirectory = Arc<dyn CaseDirectory>;
