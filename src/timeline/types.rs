//! Timeline event types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse lifecycle phase of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    Submission,
    Triage,
    Assignment,
    Investigation,
    Resolution,
    Closed,
}

impl CaseStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStage::Submission => "submission",
            CaseStage::Triage => "triage",
            CaseStage::Assignment => "assignment",
            CaseStage::Investigation => "investigation",
            CaseStage::Resolution => "resolution",
            CaseStage::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submission" => Some(CaseStage::Submission),
            "triage" => Some(CaseStage::Triage),
            "assignment" => Some(CaseStage::Assignment),
            "investigation" => Some(CaseStage::Investigation),
            "resolution" => Some(CaseStage::Resolution),
            "closed" => Some(CaseStage::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CaseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Submitted,
    Acknowledged,
    Assigned,
    Reassigned,
    InvestigationStarted,
    Escalated,
    PriorityChanged,
    StatusChanged,
    Resolved,
    Closed,
    Reopened,
    SlaWarning,
    SlaBreached,
}

impl TimelineEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            TimelineEventType::Submitted => "submitted",
            TimelineEventType::Acknowledged => "acknowledged",
            TimelineEventType::Assigned => "assigned",
            TimelineEventType::Reassigned => "reassigned",
            TimelineEventType::InvestigationStarted => "investigation_started",
            TimelineEventType::Escalated => "escalated",
            TimelineEventType::PriorityChanged => "priority_changed",
            TimelineEventType::StatusChanged => "status_changed",
            TimelineEventType::Resolved => "resolved",
            TimelineEventType::Closed => "closed",
            TimelineEventType::Reopened => "reopened",
            TimelineEventType::SlaWarning => "sla_warning",
            TimelineEventType::SlaBreached => "sla_breached",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submitted" => Some(TimelineEventType::Submitted),
            "acknowledged" => Some(TimelineEventType::Acknowledged),
            "assigned" => Some(TimelineEventType::Assigned),
            "reassigned" => Some(TimelineEventType::Reassigned),
            "investigation_started" => Some(TimelineEventType::InvestigationStarted),
            "escalated" => Some(TimelineEventType::Escalated),
            "priority_changed" => Some(TimelineEventType::PriorityChanged),
            "status_changed" => Some(TimelineEventType::StatusChanged),
            "resolved" => Some(TimelineEventType::Resolved),
            "closed" => Some(TimelineEventType::Closed),
            "reopened" => Some(TimelineEventType::Reopened),
            "sla_warning" => Some(TimelineEventType::SlaWarning),
            "sla_breached" => Some(TimelineEventType::SlaBreached),
            _ => None,
        }
    }
}

/// Who performed an action, modeled as a tagged variant rather than a
/// dynamically resolved relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    Scheduler,
    Reporter,
}

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::System => "system",
            ActorType::Scheduler => "scheduler",
            ActorType::Reporter => "reporter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(ActorType::User),
            "system" => Some(ActorType::System),
            "scheduler" => Some(ActorType::Scheduler),
            "reporter" => Some(ActorType::Reporter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn user(id: Uuid) -> Self {
        Self {
            actor_type: ActorType::User,
            id: Some(id),
        }
    }

    pub fn reporter(id: Uuid) -> Self {
        Self {
            actor_type: ActorType::Reporter,
            id: Some(id),
        }
    }

    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: None,
        }
    }

    pub fn scheduler() -> Self {
        Self {
            actor_type: ActorType::Scheduler,
            id: None,
        }
    }
}

/// Immutable timeline fact. Created by every action that changes case
/// state; never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub case_id: Uuid,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,

    pub event_type: TimelineEventType,
    pub stage: CaseStage,
    pub previous_stage: Option<CaseStage>,

    pub actor: Actor,
    pub assigned_to: Option<Uuid>,
    pub escalated_to: Option<Uuid>,

    pub event_at: DateTime<Utc>,

    /// Business minutes since the previous event for this case.
    pub duration_from_previous: i64,
    /// Business minutes since the current stage was entered.
    pub duration_in_stage: i64,
    /// Business minutes since the case's first event.
    pub total_case_duration: i64,

    pub is_escalation: bool,
    pub escalation_level: i16,

    pub sla_breached: bool,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub sla_remaining_minutes: Option<i64>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub changes: HashMap<String, serde_json::Value>,

    /// Internal events are hidden from the reporter-facing timeline.
    pub internal_only: bool,
}

/// Caller-supplied fields for an append; the ledger derives the rest.
#[derive(Debug, Clone)]
pub struct NewTimelineEvent {
    pub case_id: Uuid,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub event_type: TimelineEventType,
    pub stage: CaseStage,
    pub actor: Actor,
    pub assigned_to: Option<Uuid>,
    pub escalated_to: Option<Uuid>,
    pub event_at: DateTime<Utc>,
    pub is_escalation: bool,
    pub escalation_level: i16,
    pub sla_breached: bool,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub sla_remaining_minutes: Option<i64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub changes: HashMap<String, serde_json::Value>,
    pub internal_only: bool,
}

impl NewTimelineEvent {
    /// A bare event with the required references; optional fields default
    /// to empty.
    pub fn new(
        case_id: Uuid,
        company_id: Uuid,
        branch_id: Option<Uuid>,
        event_type: TimelineEventType,
        stage: CaseStage,
        actor: Actor,
        event_at: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id,
            company_id,
            branch_id,
            event_type,
            stage,
            actor,
            assigned_to: None,
            escalated_to: None,
            event_at,
            is_escalation: false,
            escalation_level: 0,
            sla_breached: false,
            sla_deadline: None,
            sla_remaining_minutes: None,
            metadata: HashMap::new(),
            changes: HashMap::new(),
            internal_only: false,
        }
    }
}

/// The current stage of a case and when it was entered. `occurrence_id` is
/// the id of the timeline event that opened this stage occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEntry {
    pub stage: CaseStage,
    pub entered_at: DateTime<Utc>,
    pub occurrence_id: Uuid,
}
