//! Escalation instance types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cases::CasePriority;
use crate::timeline::types::{Actor, CaseStage};

/// Highest tier, reached directly when the critical threshold is crossed.
pub const CRITICAL_LEVEL: i16 = 3;

/// A raised escalation. Insert-once; the only mutation after creation is
/// resolution (plus internal bookkeeping of auto-action outcomes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub case_id: Uuid,
    /// Nullable: the rule may be soft-deleted later.
    pub rule_id: Option<Uuid>,
    /// The `escalated` timeline event recorded with this escalation.
    pub timeline_event_id: Uuid,

    pub stage: CaseStage,
    /// Timeline event id that opened the stage occurrence this escalation
    /// belongs to; part of the duplicate-suppression key.
    pub stage_occurrence_id: Uuid,
    pub escalation_level: i16,

    pub reason: String,
    pub overdue_minutes: i64,

    pub notified_user_ids: Vec<Uuid>,
    pub notified_emails: Vec<String>,

    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Actor>,
    pub resolution_note: Option<String>,

    pub was_reassigned: bool,
    pub reassigned_to: Option<Uuid>,
    pub priority_changed: bool,
    pub old_priority: Option<CasePriority>,
    pub new_priority: Option<CasePriority>,

    pub created_at: DateTime<Utc>,
}

/// Outcome of the evaluator's threshold comparison: the single highest
/// newly-crossed tier, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelDecision {
    /// Non-escalating `sla_warning` timeline event, once per stage
    /// occurrence.
    Warning,
    /// Raise an escalation at this level.
    Escalate { level: i16 },
}

/// Outcome of an attempted raise.
#[derive(Debug, Clone)]
pub enum RaiseOutcome {
    Created(Escalation),
    /// Another evaluator already holds this (case, occurrence, level) slot.
    Duplicate,
}

/// Auto-action bookkeeping written back onto the escalation after the
/// best-effort side effects run.
#[derive(Debug, Clone, Default)]
pub struct AutoActionRecord {
    pub was_reassigned: bool,
    pub reassigned_to: Option<Uuid>,
    pub priority_changed: bool,
    pub old_priority: Option<CasePriority>,
    pub new_priority: Option<CasePriority>,
}
