//! Durable collections behind the engine.
//!
//! Three stores: timeline events (append-only), escalation rules (mutable
//! configuration, soft-deletable), and escalations (insert-once plus the
//! resolve mutation). Each trait has a PostgreSQL implementation and an
//! in-memory implementation with identical semantics, including the
//! atomic duplicate-suppression claim.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::escalation::types::{AutoActionRecord, Escalation};
use crate::rules::types::EscalationRule;
use crate::timeline::types::{Actor, TimelineEvent};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Append-only timeline event collection, ordered by `event_at` per case.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn insert_event(&self, event: &TimelineEvent) -> EngineResult<()>;

    /// All events for a case, ascending by `event_at`.
    async fn events_for_case(&self, case_id: Uuid) -> EngineResult<Vec<TimelineEvent>>;
}

/// Escalation rule configuration collection.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: &EscalationRule) -> EngineResult<()>;

    async fn update_rule(&self, rule: &EscalationRule) -> EngineResult<()>;

    /// Soft delete; escalations keep referencing the rule id.
    async fn deactivate_rule(&self, rule_id: Uuid) -> EngineResult<()>;

    async fn rule(&self, rule_id: Uuid) -> EngineResult<Option<EscalationRule>>;

    async fn active_rules(&self) -> EngineResult<Vec<EscalationRule>>;
}

/// Result of an atomic claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Created,
    /// Another writer already holds the slot; the attempt is a no-op.
    Duplicate,
}

/// Escalation collection. `insert_escalation` and `claim_warning` are the
/// critical sections of the whole engine: the existence check, the record
/// insert, and the timeline-event insert happen atomically with respect to
/// concurrent evaluators.
#[async_trait]
pub trait EscalationStore: Send + Sync {
    async fn insert_escalation(
        &self,
        escalation: &Escalation,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome>;

    /// Claim the once-per-occurrence `sla_warning` slot and insert its
    /// timeline event in the same critical section. A lost race returns
    /// `Duplicate` and inserts nothing.
    async fn claim_warning(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome>;

    async fn escalation(&self, escalation_id: Uuid) -> EngineResult<Option<Escalation>>;

    /// Unresolved escalations for one stage occurrence of a case.
    async fn unresolved_in_occurrence(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
    ) -> EngineResult<Vec<Escalation>>;

    /// Dashboard read: every unresolved escalation.
    async fn unresolved_escalations(&self) -> EngineResult<Vec<Escalation>>;

    /// The single allowed external mutation. Fails with `AlreadyResolved`
    /// when applied twice.
    async fn mark_resolved(
        &self,
        escalation_id: Uuid,
        resolved_at: DateTime<Utc>,
        resolved_by: &Actor,
        note: Option<&str>,
    ) -> EngineResult<Escalation>;

    /// Internal bookkeeping of best-effort auto-action outcomes.
    async fn record_auto_actions(
        &self,
        escalation_id: Uuid,
        record: &AutoActionRecord,
    ) -> EngineResult<()>;

    /// Internal bookkeeping of who was notified.
    async fn record_notifications(
        &self,
        escalation_id: Uuid,
        user_ids: &[Uuid],
        emails: &[String],
    ) -> EngineResult<()>;
}
