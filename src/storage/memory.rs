//! In-memory store, semantically equivalent to the PostgreSQL store.
//!
//! The duplicate-suppression claim runs under a single mutex so the
//! check-and-insert is atomic with respect to concurrent evaluators, the
//! same guarantee the database enforces with a transaction plus a partial
//! unique index.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::escalation::types::{AutoActionRecord, Escalation};
use crate::rules::types::EscalationRule;
use crate::timeline::types::{Actor, TimelineEvent};

use super::{ClaimOutcome, EscalationStore, RuleStore, TimelineStore};

#[derive(Default)]
pub struct InMemoryStore {
    events: DashMap<Uuid, Vec<TimelineEvent>>,
    rules: DashMap<Uuid, EscalationRule>,
    escalations: Mutex<Vec<Escalation>>,
    /// Claimed (case, stage occurrence) warning slots.
    warnings: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimelineStore for InMemoryStore {
    async fn insert_event(&self, event: &TimelineEvent) -> EngineResult<()> {
        let mut case_events = self.events.entry(event.case_id).or_default();
        case_events.push(event.clone());
        case_events.sort_by_key(|e| e.event_at);
        Ok(())
    }

    async fn events_for_case(&self, case_id: Uuid) -> EngineResult<Vec<TimelineEvent>> {
        Ok(self
            .events
            .get(&case_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn insert_rule(&self, rule: &EscalationRule) -> EngineResult<()> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &EscalationRule) -> EngineResult<()> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn deactivate_rule(&self, rule_id: Uuid) -> EngineResult<()> {
        if let Some(mut entry) = self.rules.get_mut(&rule_id) {
            entry.value_mut().is_active = false;
            entry.value_mut().updated_at = Utc::now();
        }
        Ok(())
    }

    async fn rule(&self, rule_id: Uuid) -> EngineResult<Option<EscalationRule>> {
        Ok(self.rules.get(&rule_id).map(|entry| entry.value().clone()))
    }

    async fn active_rules(&self) -> EngineResult<Vec<EscalationRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|entry| entry.value().is_active)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl EscalationStore for InMemoryStore {
    async fn insert_escalation(
        &self,
        escalation: &Escalation,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome> {
        let mut escalations = self.escalations.lock().await;
        let taken = escalations.iter().any(|existing| {
            existing.case_id == escalation.case_id
                && existing.stage_occurrence_id == escalation.stage_occurrence_id
                && !existing.is_resolved
                && existing.escalation_level >= escalation.escalation_level
        });
        if taken {
            return Ok(ClaimOutcome::Duplicate);
        }
        escalations.push(escalation.clone());
        // Timeline append is part of the same critical section, mirroring
        // the database transaction.
        self.insert_event(event).await?;
        Ok(ClaimOutcome::Created)
    }

    async fn claim_warning(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome> {
        let mut warnings = self.warnings.lock().await;
        if !warnings.insert((case_id, occurrence_id)) {
            return Ok(ClaimOutcome::Duplicate);
        }
        self.insert_event(event).await?;
        Ok(ClaimOutcome::Created)
    }

    async fn escalation(&self, escalation_id: Uuid) -> EngineResult<Option<Escalation>> {
        Ok(self
            .escalations
            .lock()
            .await
            .iter()
            .find(|e| e.id == escalation_id)
            .cloned())
    }

    async fn unresolved_in_occurrence(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
    ) -> EngineResult<Vec<Escalation>> {
        Ok(self
            .escalations
            .lock()
            .await
            .iter()
            .filter(|e| {
                e.case_id == case_id && e.stage_occurrence_id == occurrence_id && !e.is_resolved
            })
            .cloned()
            .collect())
    }

    async fn unresolved_escalations(&self) -> EngineResult<Vec<Escalation>> {
        Ok(self
            .escalations
            .lock()
            .await
            .iter()
            .filter(|e| !e.is_resolved)
            .cloned()
            .collect())
    }

    async fn mark_resolved(
        &self,
        escalation_id: Uuid,
        resolved_at: DateTime<Utc>,
        resolved_by: &Actor,
        note: Option<&str>,
    ) -> EngineResult<Escalation> {
        let mut escalations = self.escalations.lock().await;
        let escalation = escalations
            .iter_mut()
            .find(|e| e.id == escalation_id)
            .ok_or(EngineError::EscalationNotFound { escalation_id })?;
        if escalation.is_resolved {
            return Err(EngineError::AlreadyResolved { escalation_id });
        }
        escalation.is_resolved = true;
        escalation.resolved_at = Some(resolved_at);
        escalation.resolved_by = Some(*resolved_by);
        escalation.resolution_note = note.map(|n| n.to_string());
        Ok(escalation.clone())
    }

    async fn record_auto_actions(
        &self,
        escalation_id: Uuid,
        record: &AutoActionRecord,
    ) -> EngineResult<()> {
        let mut escalations = self.escalations.lock().await;
        let escalation = escalations
            .iter_mut()
            .find(|e| e.id == escalation_id)
            .ok_or(EngineError::EscalationNotFound { escalation_id })?;
        escalation.was_reassigned = record.was_reassigned;
        escalation.reassigned_to = record.reassigned_to;
        escalation.priority_changed = record.priority_changed;
        escalation.old_priority = record.old_priority;
        escalation.new_priority = record.new_priority;
        Ok(())
    }

    async fn record_notifications(
        &self,
        escalation_id: Uuid,
        user_ids: &[Uuid],
        emails: &[String],
    ) -> EngineResult<()> {
        let mut escalations = self.escalations.lock().await;
        let escalation = escalations
            .iter_mut()
            .find(|e| e.id == escalation_id)
            .ok_or(EngineError::EscalationNotFound { escalation_id })?;
        escalation.notified_user_ids = user_ids.to_vec();
        escalation.notified_emails = emails.to_vec();
        Ok(())
    }
}
