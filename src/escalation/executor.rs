//! Escalation action executor.
//!
//! Sole durable writer for escalations. Raising an escalation claims the
//! (case, stage occurrence, level) slot atomically together with its
//! timeline event; notification fan-out and the rule's auto-actions run
//! after the claim commits and are best-effort extras that never reverse
//! the escalation record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cases::{CaseDirectory, CaseSnapshot, SharedCaseDirectory};
use crate::errors::{EngineError, EngineResult};
use crate::escalation::types::{AutoActionRecord, Escalation, RaiseOutcome};
use crate::notifications::{
    NotificationChannel, NotificationRequest, NotificationTarget, Notifier, RecipientRole,
};
use crate::rules::types::EscalationRule;
use crate::storage::{ClaimOutcome, EscalationStore};
use crate::timeline::types::{
    Actor, NewTimelineEvent, StageEntry, TimelineEvent, TimelineEventType,
};
use crate::timeline::{AppendOutcome, TimelineLedger};
use crate::business_clock::BusinessCalendar;

pub struct EscalationActionExecutor {
    ledger: TimelineLedger,
    escalations: Arc<dyn EscalationStore>,
    cases: SharedCaseDirectory,
    notifier: Arc<dyn Notifier>,
}

impl EscalationActionExecutor {
    pub fn new(
        ledger: TimelineLedger,
        escalations: Arc<dyn EscalationStore>,
        cases: SharedCaseDirectory,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            escalations,
            cases,
            notifier,
        }
    }

    /// Raise an escalation for a crossed threshold.
    ///
    /// The existence re-check and the inserts happen inside the store's
    /// critical section; losing the race to another evaluator returns
    /// `RaiseOutcome::Duplicate` and performs nothing.
    #[instrument(skip(self, case, rule, entry, calendar, reason), fields(case_id = %case.id))]
    pub async fn raise(
        &self,
        case: &CaseSnapshot,
        rule: &EscalationRule,
        entry: &StageEntry,
        calendar: &BusinessCalendar,
        level: i16,
        overdue_minutes: i64,
        reason: String,
        now: DateTime<Utc>,
    ) -> EngineResult<RaiseOutcome> {
        let mut metadata = HashMap::new();
        metadata.insert("rule_id".to_string(), serde_json::json!(rule.id));
        metadata.insert("rule_name".to_string(), serde_json::json!(rule.name));
        metadata.insert("reason".to_string(), serde_json::json!(reason));

        let mut new_event = NewTimelineEvent::new(
            case.id,
            case.company_id,
            case.branch_id,
            TimelineEventType::Escalated,
            entry.stage,
            Actor::scheduler(),
            now,
        );
        new_event.is_escalation = true;
        new_event.escalation_level = level;
        new_event.sla_breached = true;
        new_event.escalated_to = rule.reassign_to.or(rule.notify_user_id);
        new_event.metadata = metadata;
        new_event.internal_only = true;

        let (event, _) = self.ledger.build_event(new_event, calendar).await?;

        let mut escalation = Escalation {
            id: Uuid::new_v4(),
            case_id: case.id,
            rule_id: Some(rule.id),
            timeline_event_id: event.id,
            stage: entry.stage,
            stage_occurrence_id: entry.occurrence_id,
            escalation_level: level,
            reason,
            overdue_minutes,
            notified_user_ids: Vec::new(),
            notified_emails: Vec::new(),
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            was_reassigned: false,
            reassigned_to: None,
            priority_changed: false,
            old_priority: None,
            new_priority: None,
            created_at: now,
        };

        match self
            .escalations
            .insert_escalation(&escalation, &event)
            .await?
        {
            ClaimOutcome::Duplicate => return Ok(RaiseOutcome::Duplicate),
            ClaimOutcome::Created => {}
        }
        info!(
            case_id = %case.id,
            level,
            overdue_minutes,
            "escalation raised"
        );

        // Post-commit: notification fan-out, fire-and-forget.
        let (user_ids, emails) = self.fan_out_notifications(case, rule, &escalation).await;
        escalation.notified_user_ids = user_ids.clone();
        escalation.notified_emails = emails.clone();
        if let Err(err) = self
            .escalations
            .record_notifications(escalation.id, &user_ids, &emails)
            .await
        {
            warn!(error = %err, "failed to record notification targets");
        }

        // Best-effort auto-actions; failures are logged, never rolled back.
        let record = self.apply_auto_actions(case, rule).await;
        escalation.was_reassigned = record.was_reassigned;
        escalation.reassigned_to = record.reassigned_to;
        escalation.priority_changed = record.priority_changed;
        escalation.old_priority = record.old_priority;
        escalation.new_priority = record.new_priority;
        if let Err(err) = self
            .escalations
            .record_auto_actions(escalation.id, &record)
            .await
        {
            warn!(error = %err, "failed to record auto-action outcome");
        }

        Ok(RaiseOutcome::Created(escalation))
    }

    /// Emit the once-per-occurrence `sla_warning` timeline event. The
    /// occurrence slot is claimed atomically in the store; losing the race
    /// to another evaluator returns `None` and appends nothing.
    #[instrument(skip(self, case, rule, entry, calendar), fields(case_id = %case.id))]
    pub async fn emit_warning(
        &self,
        case: &CaseSnapshot,
        rule: &EscalationRule,
        entry: &StageEntry,
        calendar: &BusinessCalendar,
        elapsed: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<TimelineEvent>> {
        let mut metadata = HashMap::new();
        metadata.insert("rule_id".to_string(), serde_json::json!(rule.id));
        metadata.insert(
            "warning_threshold".to_string(),
            serde_json::json!(rule.warning_threshold),
        );
        metadata.insert("elapsed_minutes".to_string(), serde_json::json!(elapsed));

        let mut new_event = NewTimelineEvent::new(
            case.id,
            case.company_id,
            case.branch_id,
            TimelineEventType::SlaWarning,
            entry.stage,
            Actor::scheduler(),
            now,
        );
        new_event.sla_remaining_minutes = Some(rule.escalation_threshold - elapsed);
        new_event.metadata = metadata;
        new_event.internal_only = true;

        let (event, _) = self.ledger.build_event(new_event, calendar).await?;
        match self
            .escalations
            .claim_warning(case.id, entry.occurrence_id, &event)
            .await?
        {
            ClaimOutcome::Duplicate => Ok(None),
            ClaimOutcome::Created => {
                debug!(case_id = %case.id, "sla warning emitted");
                Ok(Some(event))
            }
        }
    }

    /// Resolve an escalation. The only mutation allowed on an escalation
    /// after creation; timeline events are never touched.
    #[instrument(skip(self, resolved_by, note))]
    pub async fn resolve(
        &self,
        escalation_id: Uuid,
        resolved_by: Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<Escalation> {
        let resolved = self
            .escalations
            .mark_resolved(escalation_id, now, &resolved_by, note.as_deref())
            .await?;
        info!(%escalation_id, "escalation resolved");
        Ok(resolved)
    }

    /// Auto-resolve every unresolved escalation of a stage occurrence the
    /// case just left.
    pub async fn resolve_for_stage_exit(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let open = self
            .escalations
            .unresolved_in_occurrence(case_id, occurrence_id)
            .await?;
        let mut resolved = 0;
        for escalation in open {
            match self
                .escalations
                .mark_resolved(
                    escalation.id,
                    now,
                    &Actor::system(),
                    Some("case advanced past the stage"),
                )
                .await
            {
                Ok(_) => resolved += 1,
                // Lost a race with an operator resolving it manually.
                Err(EngineError::AlreadyResolved { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if resolved > 0 {
            info!(%case_id, resolved, "auto-resolved escalations on stage exit");
        }
        Ok(resolved)
    }

    /// Append a case lifecycle event on behalf of the surrounding
    /// application; stage changes auto-resolve the prior occurrence's
    /// escalations.
    pub async fn record_event(
        &self,
        new: NewTimelineEvent,
        calendar: &BusinessCalendar,
        now: DateTime<Utc>,
    ) -> EngineResult<AppendOutcome> {
        let case_id = new.case_id;
        let outcome = self.ledger.append(new, calendar).await?;
        if let Some(occurrence) = outcome.closed_occurrence {
            self.resolve_for_stage_exit(case_id, occurrence, now).await?;
        }
        Ok(outcome)
    }

    async fn fan_out_notifications(
        &self,
        case: &CaseSnapshot,
        rule: &EscalationRule,
        escalation: &Escalation,
    ) -> (Vec<Uuid>, Vec<String>) {
        let payload = serde_json::json!({
            "case_id": case.id,
            "stage": escalation.stage,
            "escalation_level": escalation.escalation_level,
            "overdue_minutes": escalation.overdue_minutes,
            "reason": escalation.reason,
        });
        let subject = format!(
            "Case {} escalated to level {}",
            case.id, escalation.escalation_level
        );

        let mut user_ids = Vec::new();
        let mut emails = Vec::new();

        for target in notification_targets(case, rule) {
            match &target {
                NotificationTarget::User { user_id } => user_ids.push(*user_id),
                NotificationTarget::Email { address } => emails.push(address.clone()),
                NotificationTarget::Role { .. } => {}
            }
            let request = NotificationRequest {
                target,
                channel: NotificationChannel::Email,
                subject: subject.clone(),
                payload: payload.clone(),
            };
            if let Err(err) = self.notifier.enqueue(request).await {
                // Delivery is owned by the collaborator; enqueue failure
                // does not affect escalation state.
                warn!(case_id = %case.id, error = %err, "notification enqueue failed");
            }
        }

        (user_ids, emails)
    }

    async fn apply_auto_actions(
        &self,
        case: &CaseSnapshot,
        rule: &EscalationRule,
    ) -> AutoActionRecord {
        let mut record = AutoActionRecord::default();

        if rule.auto_reassign {
            if let Some(target) = rule.reassign_to {
                match self.cases.reassign(case.id, target).await {
                    Ok(()) => {
                        record.was_reassigned = true;
                        record.reassigned_to = Some(target);
                    }
                    Err(err) => {
                        error!(case_id = %case.id, error = %err, "auto-reassign failed");
                    }
                }
            }
        }

        if rule.auto_change_priority {
            if let Some(new_priority) = rule.new_priority {
                match self.cases.change_priority(case.id, new_priority).await {
                    Ok(old_priority) => {
                        record.priority_changed = true;
                        record.old_priority = Some(old_priority);
                        record.new_priority = Some(new_priority);
                    }
                    Err(err) => {
                        error!(case_id = %case.id, error = %err, "auto priority change failed");
                    }
                }
            }
        }

        record
    }
}

fn notification_targets(case: &CaseSnapshot, rule: &EscalationRule) -> Vec<NotificationTarget> {
    let mut targets = Vec::new();
    if rule.notify_assignee {
        if let Some(assignee) = case.assigned_to {
            targets.push(NotificationTarget::User { user_id: assignee });
        }
    }
    if rule.notify_branch_admin {
        targets.push(NotificationTarget::Role {
            role: RecipientRole::BranchAdmin,
            company_id: case.company_id,
            branch_id: case.branch_id,
        });
    }
    if rule.notify_company_admin {
        targets.push(NotificationTarget::Role {
            role: RecipientRole::CompanyAdmin,
            company_id: case.company_id,
            branch_id: None,
        });
    }
    if rule.notify_super_admin {
        targets.push(NotificationTarget::Role {
            role: RecipientRole::SuperAdmin,
            company_id: case.company_id,
            branch_id: None,
        });
    }
    if let Some(user_id) = rule.notify_user_id {
        if !targets
            .iter()
            .any(|t| matches!(t, NotificationTarget::User { user_id: u } if *u == user_id))
        {
            targets.push(NotificationTarget::User { user_id });
        }
    }
    for address in &rule.notify_emails {
        targets.push(NotificationTarget::Email {
            address: address.clone(),
        });
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{CasePriority, CaseStatus, InMemoryCaseDirectory};
    use crate::notifications::RecordingNotifier;
    use crate::storage::InMemoryStore;
    use crate::timeline::types::CaseStage;
    use chrono::TimeZone;

    struct Fixture {
        executor: EscalationActionExecutor,
        ledger: TimelineLedger,
        store: Arc<InMemoryStore>,
        directory: Arc<InMemoryCaseDirectory>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let ledger = TimelineLedger::new(store.clone());
        let directory = Arc::new(InMemoryCaseDirectory::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let executor = EscalationActionExecutor::new(
            ledger.clone(),
            store.clone(),
            directory.clone(),
            notifier.clone(),
        );
        Fixture {
            executor,
            ledger,
            store,
            directory,
            notifier,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, h, m, 0).unwrap()
    }

    fn case(company: Uuid) -> CaseSnapshot {
        CaseSnapshot {
            id: Uuid::new_v4(),
            company_id: company,
            branch_id: None,
            case_type: "incident".to_string(),
            status: CaseStatus::Open,
            priority: CasePriority::Medium,
            assigned_to: Some(Uuid::new_v4()),
            created_at: at(9, 0),
            context: HashMap::new(),
        }
    }

    async fn seed_case(fixture: &Fixture, case: &CaseSnapshot) -> StageEntry {
        fixture.directory.upsert(case.clone());
        fixture
            .ledger
            .append(
                NewTimelineEvent::new(
                    case.id,
                    case.company_id,
                    case.branch_id,
                    TimelineEventType::Submitted,
                    CaseStage::Investigation,
                    Actor::system(),
                    at(9, 0),
                ),
                &BusinessCalendar::default(),
            )
            .await
            .unwrap();
        fixture
            .ledger
            .latest_stage_entry(case.id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn concurrent_raises_create_exactly_one_escalation() {
        let fixture = fixture();
        let company = Uuid::new_v4();
        let case = case(company);
        let entry = seed_case(&fixture, &case).await;
        let rule = EscalationRule::new("sla", CaseStage::Investigation, 60);

        let calendar = BusinessCalendar::default();
        let (first, second) = tokio::join!(
            fixture
                .executor
                .raise(&case, &rule, &entry, &calendar, 1, 70, "overdue".into(), at(11, 0)),
            fixture
                .executor
                .raise(&case, &rule, &entry, &calendar, 1, 70, "overdue".into(), at(11, 0)),
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        let created = outcomes
            .iter()
            .filter(|o| matches!(o, RaiseOutcome::Created(_)))
            .count();
        let suppressed = outcomes
            .iter()
            .filter(|o| matches!(o, RaiseOutcome::Duplicate))
            .count();
        assert_eq!(created, 1);
        assert_eq!(suppressed, 1);
        assert_eq!(fixture.store.unresolved_escalations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_warnings_emit_exactly_one_event() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        let mut rule = EscalationRule::new("sla", CaseStage::Investigation, 60);
        rule.warning_threshold = Some(30);

        let calendar = BusinessCalendar::default();
        let (first, second) = tokio::join!(
            fixture
                .executor
                .emit_warning(&case, &rule, &entry, &calendar, 40, at(9, 40)),
            fixture
                .executor
                .emit_warning(&case, &rule, &entry, &calendar, 40, at(9, 40)),
        );

        let emitted = [first.unwrap(), second.unwrap()];
        assert_eq!(emitted.iter().filter(|e| e.is_some()).count(), 1);
        assert_eq!(emitted.iter().filter(|e| e.is_none()).count(), 1);

        let warnings = fixture
            .ledger
            .events_for_case(case.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == TimelineEventType::SlaWarning)
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn raise_appends_escalated_event_and_notifies() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        let mut rule = EscalationRule::new("sla", CaseStage::Investigation, 60);
        rule.notify_company_admin = true;
        rule.notify_emails = vec!["ops@example.com".to_string()];

        let outcome = fixture
            .executor
            .raise(&case, &rule, &entry, &BusinessCalendar::default(), 1, 90, "overdue".into(), at(11, 0))
            .await
            .unwrap();
        let escalation = match outcome {
            RaiseOutcome::Created(e) => e,
            RaiseOutcome::Duplicate => panic!("expected creation"),
        };

        let events = fixture.ledger.events_for_case(case.id).await.unwrap();
        let escalated = events
            .iter()
            .find(|e| e.event_type == TimelineEventType::Escalated)
            .expect("escalated event appended");
        assert!(escalated.is_escalation);
        assert_eq!(escalated.escalation_level, 1);
        assert_eq!(escalated.id, escalation.timeline_event_id);

        // assignee + company admin role + extra email
        let requests = fixture.notifier.requests().await;
        assert_eq!(requests.len(), 3);
        assert_eq!(escalation.notified_emails, vec!["ops@example.com"]);
    }

    #[tokio::test]
    async fn auto_actions_apply_and_are_recorded() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        let target = Uuid::new_v4();
        let mut rule = EscalationRule::new("sla", CaseStage::Investigation, 60);
        rule.auto_reassign = true;
        rule.reassign_to = Some(target);
        rule.auto_change_priority = true;
        rule.new_priority = Some(CasePriority::High);

        let outcome = fixture
            .executor
            .raise(&case, &rule, &entry, &BusinessCalendar::default(), 2, 150, "overdue".into(), at(12, 0))
            .await
            .unwrap();
        let escalation = match outcome {
            RaiseOutcome::Created(e) => e,
            RaiseOutcome::Duplicate => panic!("expected creation"),
        };

        assert!(escalation.was_reassigned);
        assert_eq!(escalation.reassigned_to, Some(target));
        assert!(escalation.priority_changed);
        assert_eq!(escalation.old_priority, Some(CasePriority::Medium));
        assert_eq!(escalation.new_priority, Some(CasePriority::High));

        let updated = fixture.directory.snapshot(case.id).unwrap();
        assert_eq!(updated.assigned_to, Some(target));
        assert_eq!(updated.priority, CasePriority::High);
    }

    #[tokio::test]
    async fn failed_auto_action_keeps_the_escalation() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        // Point the reassignment at a directory that does not know the
        // case by removing it first.
        let mut rule = EscalationRule::new("sla", CaseStage::Investigation, 60);
        rule.auto_reassign = true;
        rule.reassign_to = Some(Uuid::new_v4());

        // Fresh directory without the case: reassign will fail.
        let empty_directory = Arc::new(InMemoryCaseDirectory::new());
        let executor = EscalationActionExecutor::new(
            fixture.ledger.clone(),
            fixture.store.clone(),
            empty_directory,
            Arc::new(RecordingNotifier::new()),
        );

        let outcome = executor
            .raise(&case, &rule, &entry, &BusinessCalendar::default(), 1, 70, "overdue".into(), at(11, 0))
            .await
            .unwrap();
        let escalation = match outcome {
            RaiseOutcome::Created(e) => e,
            RaiseOutcome::Duplicate => panic!("expected creation"),
        };
        assert!(!escalation.was_reassigned);
        assert_eq!(fixture.store.unresolved_escalations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_sets_resolution_fields_only() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        let rule = EscalationRule::new("sla", CaseStage::Investigation, 60);

        let outcome = fixture
            .executor
            .raise(&case, &rule, &entry, &BusinessCalendar::default(), 1, 70, "overdue".into(), at(11, 0))
            .await
            .unwrap();
        let escalation = match outcome {
            RaiseOutcome::Created(e) => e,
            RaiseOutcome::Duplicate => panic!("expected creation"),
        };

        let events_before = fixture.ledger.events_for_case(case.id).await.unwrap();
        let operator = Uuid::new_v4();
        let resolved = fixture
            .executor
            .resolve(
                escalation.id,
                Actor::user(operator),
                Some("handled".to_string()),
                at(12, 0),
            )
            .await
            .unwrap();

        assert!(resolved.is_resolved);
        assert_eq!(resolved.resolved_at, Some(at(12, 0)));
        assert_eq!(resolved.resolved_by, Some(Actor::user(operator)));
        assert_eq!(resolved.resolution_note.as_deref(), Some("handled"));

        // Timeline untouched by resolution.
        let events_after = fixture.ledger.events_for_case(case.id).await.unwrap();
        assert_eq!(events_before.len(), events_after.len());

        // Second resolve is an error, not a silent overwrite.
        let again = fixture
            .executor
            .resolve(escalation.id, Actor::user(operator), None, at(13, 0))
            .await;
        assert!(matches!(again, Err(EngineError::AlreadyResolved { .. })));
    }

    #[tokio::test]
    async fn stage_exit_auto_resolves_open_escalations() {
        let fixture = fixture();
        let case = case(Uuid::new_v4());
        let entry = seed_case(&fixture, &case).await;
        let rule = EscalationRule::new("sla", CaseStage::Investigation, 60);

        fixture
            .executor
            .raise(&case, &rule, &entry, &BusinessCalendar::default(), 1, 70, "overdue".into(), at(11, 0))
            .await
            .unwrap();

        // Advance the case to resolution; record_event closes the
        // investigation occurrence.
        fixture
            .executor
            .record_event(
                NewTimelineEvent::new(
                    case.id,
                    case.company_id,
                    case.branch_id,
                    TimelineEventType::StatusChanged,
                    CaseStage::Resolution,
                    Actor::user(Uuid::new_v4()),
                    at(12, 0),
                ),
                &BusinessCalendar::default(),
                at(12, 0),
            )
            .await
            .unwrap();

        assert!(fixture.store.unresolved_escalations().await.unwrap().is_empty());
    }
}
