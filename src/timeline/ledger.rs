//! Append-only timeline ledger.
//!
//! Computes the derived durations on append and tracks stage occurrences:
//! the first event carrying a new stage value opens a new occurrence and
//! its id identifies that occurrence everywhere else in the engine.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::business_clock::{elapsed_business_minutes, BusinessCalendar};
use crate::errors::EngineResult;
use crate::storage::TimelineStore;
use crate::timeline::types::{
    NewTimelineEvent, StageEntry, TimelineEvent, TimelineEventType,
};

/// Result of an append: the stored event plus, when the event changed the
/// stage, the occurrence id it closed.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub event: TimelineEvent,
    pub closed_occurrence: Option<Uuid>,
}

#[derive(Clone)]
pub struct TimelineLedger {
    store: Arc<dyn TimelineStore>,
}

impl TimelineLedger {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    /// Compute the derived fields for an event without storing it. The
    /// executor uses this to prepare the event it inserts inside the
    /// escalation-claim transaction.
    pub async fn build_event(
        &self,
        new: NewTimelineEvent,
        calendar: &BusinessCalendar,
    ) -> EngineResult<(TimelineEvent, Option<Uuid>)> {
        let events = self.store.events_for_case(new.case_id).await?;
        let previous = events.last();
        let stage_changed = previous.map(|p| p.stage != new.stage).unwrap_or(false);

        let duration_from_previous = previous
            .map(|p| elapsed_business_minutes(p.event_at, new.event_at, calendar))
            .unwrap_or(0);

        let duration_in_stage = if stage_changed || previous.is_none() {
            0
        } else {
            stage_entry_of(&events)
                .map(|entry| elapsed_business_minutes(entry.entered_at, new.event_at, calendar))
                .unwrap_or(0)
        };

        let total_case_duration = events
            .first()
            .map(|first| elapsed_business_minutes(first.event_at, new.event_at, calendar))
            .unwrap_or(0);

        let closed_occurrence = if stage_changed {
            stage_entry_of(&events).map(|entry| entry.occurrence_id)
        } else {
            None
        };

        let event = TimelineEvent {
            id: Uuid::new_v4(),
            case_id: new.case_id,
            company_id: new.company_id,
            branch_id: new.branch_id,
            event_type: new.event_type,
            stage: new.stage,
            previous_stage: if stage_changed {
                previous.map(|p| p.stage)
            } else {
                None
            },
            actor: new.actor,
            assigned_to: new.assigned_to,
            escalated_to: new.escalated_to,
            event_at: new.event_at,
            duration_from_previous,
            duration_in_stage,
            total_case_duration,
            is_escalation: new.is_escalation,
            escalation_level: new.escalation_level,
            sla_breached: new.sla_breached,
            sla_deadline: new.sla_deadline,
            sla_remaining_minutes: new.sla_remaining_minutes,
            metadata: new.metadata,
            changes: new.changes,
            internal_only: new.internal_only,
        };

        Ok((event, closed_occurrence))
    }

    /// Append an event, deriving durations and stage bookkeeping from the
    /// case's existing history.
    #[instrument(skip(self, new, calendar), fields(case_id = %new.case_id, event_type = new.event_type.as_str()))]
    pub async fn append(
        &self,
        new: NewTimelineEvent,
        calendar: &BusinessCalendar,
    ) -> EngineResult<AppendOutcome> {
        let (event, closed_occurrence) = self.build_event(new, calendar).await?;
        self.store.insert_event(&event).await?;
        if let Some(occurrence) = closed_occurrence {
            debug!(%occurrence, new_stage = event.stage.as_str(), "stage changed");
        }
        Ok(AppendOutcome {
            event,
            closed_occurrence,
        })
    }

    /// Full timeline for a case, ascending by `event_at`.
    pub async fn events_for_case(&self, case_id: Uuid) -> EngineResult<Vec<TimelineEvent>> {
        self.store.events_for_case(case_id).await
    }

    /// Reporter-visible timeline: internal events filtered out.
    pub async fn visible_events(&self, case_id: Uuid) -> EngineResult<Vec<TimelineEvent>> {
        Ok(self
            .store
            .events_for_case(case_id)
            .await?
            .into_iter()
            .filter(|event| !event.internal_only)
            .collect())
    }

    /// Current stage and when it was entered, if the case has any history.
    pub async fn latest_stage_entry(&self, case_id: Uuid) -> EngineResult<Option<StageEntry>> {
        let events = self.store.events_for_case(case_id).await?;
        Ok(stage_entry_of(&events))
    }

    /// Whether an `sla_warning` was already emitted within the given stage
    /// occurrence.
    pub async fn has_warning_in_occurrence(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
    ) -> EngineResult<bool> {
        let events = self.store.events_for_case(case_id).await?;
        let Some(start) = events.iter().position(|e| e.id == occurrence_id) else {
            return Ok(false);
        };
        Ok(events[start..]
            .iter()
            .any(|e| e.event_type == TimelineEventType::SlaWarning))
    }
}

/// The contiguous tail of events sharing the latest stage determines the
/// current occurrence; its earliest event opened it.
fn stage_entry_of(events: &[TimelineEvent]) -> Option<StageEntry> {
    let last = events.last()?;
    let opener = events
        .iter()
        .rev()
        .take_while(|e| e.stage == last.stage)
        .last()
        .unwrap_or(last);
    Some(StageEntry {
        stage: last.stage,
        entered_at: opener.event_at,
        occurrence_id: opener.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_clock::BusinessCalendar;
    use crate::storage::InMemoryStore;
    use crate::timeline::types::{Actor, CaseStage};
    use chrono::{TimeZone, Utc};

    fn ledger() -> TimelineLedger {
        TimelineLedger::new(Arc::new(InMemoryStore::new()))
    }

    fn event_at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 9, minute, 0).unwrap()
    }

    fn new_event(
        case_id: Uuid,
        event_type: TimelineEventType,
        stage: CaseStage,
        minute: u32,
    ) -> NewTimelineEvent {
        NewTimelineEvent::new(
            case_id,
            Uuid::new_v4(),
            None,
            event_type,
            stage,
            Actor::system(),
            event_at(minute),
        )
    }

    #[tokio::test]
    async fn duration_in_stage_resets_on_stage_change() {
        let ledger = ledger();
        let calendar = BusinessCalendar::default();
        let case_id = Uuid::new_v4();

        let first = ledger
            .append(
                new_event(case_id, TimelineEventType::Submitted, CaseStage::Submission, 0),
                &calendar,
            )
            .await
            .unwrap();
        let second = ledger
            .append(
                new_event(
                    case_id,
                    TimelineEventType::Acknowledged,
                    CaseStage::Submission,
                    10,
                ),
                &calendar,
            )
            .await
            .unwrap();
        let third = ledger
            .append(
                new_event(case_id, TimelineEventType::StatusChanged, CaseStage::Triage, 25),
                &calendar,
            )
            .await
            .unwrap();

        assert_eq!(first.event.duration_in_stage, 0);
        assert_eq!(second.event.duration_in_stage, 10);
        assert_eq!(third.event.duration_in_stage, 0);
        assert_eq!(third.event.previous_stage, Some(CaseStage::Submission));
        assert_eq!(third.closed_occurrence, Some(first.event.id));

        // total_case_duration is monotonically non-decreasing.
        assert!(second.event.total_case_duration >= first.event.total_case_duration);
        assert!(third.event.total_case_duration >= second.event.total_case_duration);
        assert_eq!(third.event.total_case_duration, 25);
    }

    #[tokio::test]
    async fn stage_entry_tracks_latest_occurrence() {
        let ledger = ledger();
        let calendar = BusinessCalendar::default();
        let case_id = Uuid::new_v4();

        ledger
            .append(
                new_event(case_id, TimelineEventType::Submitted, CaseStage::Submission, 0),
                &calendar,
            )
            .await
            .unwrap();
        let triage = ledger
            .append(
                new_event(case_id, TimelineEventType::StatusChanged, CaseStage::Triage, 5),
                &calendar,
            )
            .await
            .unwrap();
        ledger
            .append(
                new_event(case_id, TimelineEventType::Acknowledged, CaseStage::Triage, 8),
                &calendar,
            )
            .await
            .unwrap();

        let entry = ledger.latest_stage_entry(case_id).await.unwrap().unwrap();
        assert_eq!(entry.stage, CaseStage::Triage);
        assert_eq!(entry.entered_at, event_at(5));
        assert_eq!(entry.occurrence_id, triage.event.id);
    }

    #[tokio::test]
    async fn reentering_a_stage_opens_a_new_occurrence() {
        let ledger = ledger();
        let calendar = BusinessCalendar::default();
        let case_id = Uuid::new_v4();

        ledger
            .append(
                new_event(case_id, TimelineEventType::Submitted, CaseStage::Triage, 0),
                &calendar,
            )
            .await
            .unwrap();
        ledger
            .append(
                new_event(
                    case_id,
                    TimelineEventType::StatusChanged,
                    CaseStage::Investigation,
                    5,
                ),
                &calendar,
            )
            .await
            .unwrap();
        let back = ledger
            .append(
                new_event(case_id, TimelineEventType::Reopened, CaseStage::Triage, 10),
                &calendar,
            )
            .await
            .unwrap();

        let entry = ledger.latest_stage_entry(case_id).await.unwrap().unwrap();
        assert_eq!(entry.occurrence_id, back.event.id);
        assert_eq!(entry.entered_at, event_at(10));
    }

    #[tokio::test]
    async fn warning_lookup_is_scoped_to_occurrence() {
        let ledger = ledger();
        let calendar = BusinessCalendar::default();
        let case_id = Uuid::new_v4();

        let opened = ledger
            .append(
                new_event(case_id, TimelineEventType::Submitted, CaseStage::Triage, 0),
                &calendar,
            )
            .await
            .unwrap();
        assert!(!ledger
            .has_warning_in_occurrence(case_id, opened.event.id)
            .await
            .unwrap());

        ledger
            .append(
                new_event(case_id, TimelineEventType::SlaWarning, CaseStage::Triage, 30),
                &calendar,
            )
            .await
            .unwrap();
        assert!(ledger
            .has_warning_in_occurrence(case_id, opened.event.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn visible_events_hide_internal_entries() {
        let ledger = ledger();
        let calendar = BusinessCalendar::default();
        let case_id = Uuid::new_v4();

        ledger
            .append(
                new_event(case_id, TimelineEventType::Submitted, CaseStage::Submission, 0),
                &calendar,
            )
            .await
            .unwrap();
        let mut internal = new_event(case_id, TimelineEventType::SlaWarning, CaseStage::Submission, 5);
        internal.internal_only = true;
        ledger.append(internal, &calendar).await.unwrap();

        assert_eq!(ledger.events_for_case(case_id).await.unwrap().len(), 2);
        assert_eq!(ledger.visible_events(case_id).await.unwrap().len(), 1);
    }
}
