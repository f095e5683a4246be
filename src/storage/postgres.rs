//! PostgreSQL store.
//!
//! One store struct over a shared pool, covering the three collections.
//! The duplicate-suppression invariant lives here: a partial unique index
//! on (case_id, stage_occurrence_id, escalation_level) over unresolved
//! rows, combined with a check-and-insert transaction that treats a
//! conflict as "someone else already raised this level".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cases::CasePriority;
use crate::errors::{EngineError, EngineResult};
use crate::escalation::types::{AutoActionRecord, Escalation};
use crate::rules::types::{AppliesTo, EscalationRule};
use crate::timeline::types::{
    Actor, ActorType, CaseStage, TimelineEvent, TimelineEventType,
};

use super::{ClaimOutcome, EscalationStore, RuleStore, TimelineStore};

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self))]
    pub async fn initialize_schema(&self) -> EngineResult<()> {
        debug!("initializing escalation engine schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS timeline_events (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL,
                company_id UUID NOT NULL,
                branch_id UUID,
                event_type TEXT NOT NULL,
                stage TEXT NOT NULL,
                previous_stage TEXT,
                actor_type TEXT NOT NULL,
                actor_id UUID,
                assigned_to UUID,
                escalated_to UUID,
                event_at TIMESTAMPTZ NOT NULL,
                duration_from_previous BIGINT NOT NULL,
                duration_in_stage BIGINT NOT NULL,
                total_case_duration BIGINT NOT NULL,
                is_escalation BOOLEAN NOT NULL,
                escalation_level SMALLINT NOT NULL,
                sla_breached BOOLEAN NOT NULL,
                sla_deadline TIMESTAMPTZ,
                sla_remaining_minutes BIGINT,
                metadata JSONB NOT NULL,
                changes JSONB NOT NULL,
                internal_only BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_timeline_events_case
             ON timeline_events (case_id, event_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalation_rules (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                is_global BOOLEAN NOT NULL,
                company_id UUID,
                branch_id UUID,
                priority INTEGER NOT NULL,
                stage TEXT NOT NULL,
                applies_to TEXT NOT NULL,
                warning_threshold BIGINT,
                escalation_threshold BIGINT NOT NULL,
                critical_threshold BIGINT,
                calendar JSONB,
                escalation_level SMALLINT NOT NULL,
                notify_assignee BOOLEAN NOT NULL,
                notify_branch_admin BOOLEAN NOT NULL,
                notify_company_admin BOOLEAN NOT NULL,
                notify_super_admin BOOLEAN NOT NULL,
                notify_user_id UUID,
                notify_emails TEXT[] NOT NULL,
                auto_reassign BOOLEAN NOT NULL,
                reassign_to UUID,
                auto_change_priority BOOLEAN NOT NULL,
                new_priority TEXT,
                conditions JSONB NOT NULL,
                is_active BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalations (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL,
                rule_id UUID,
                timeline_event_id UUID NOT NULL,
                stage TEXT NOT NULL,
                stage_occurrence_id UUID NOT NULL,
                escalation_level SMALLINT NOT NULL,
                reason TEXT NOT NULL,
                overdue_minutes BIGINT NOT NULL,
                notified_user_ids UUID[] NOT NULL,
                notified_emails TEXT[] NOT NULL,
                is_resolved BOOLEAN NOT NULL,
                resolved_at TIMESTAMPTZ,
                resolved_by_type TEXT,
                resolved_by_id UUID,
                resolution_note TEXT,
                was_reassigned BOOLEAN NOT NULL,
                reassigned_to UUID,
                priority_changed BOOLEAN NOT NULL,
                old_priority TEXT,
                new_priority TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Duplicate-suppression invariant.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_escalations_claim
             ON escalations (case_id, stage_occurrence_id, escalation_level)
             WHERE NOT is_resolved",
        )
        .execute(&self.pool)
        .await?;

        // Once-per-occurrence warning claim; the primary key is the
        // whole invariant.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sla_warnings (
                case_id UUID NOT NULL,
                stage_occurrence_id UUID NOT NULL,
                timeline_event_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (case_id, stage_occurrence_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_escalations_case
             ON escalations (case_id, stage, escalation_level)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const INSERT_EVENT_SQL: &str = r#"
    INSERT INTO timeline_events (
        id, case_id, company_id, branch_id, event_type, stage, previous_stage,
        actor_type, actor_id, assigned_to, escalated_to, event_at,
        duration_from_previous, duration_in_stage, total_case_duration,
        is_escalation, escalation_level, sla_breached, sla_deadline,
        sla_remaining_minutes, metadata, changes, internal_only
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
        $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
    )
"#;

async fn insert_event_with<'c, E>(executor: E, event: &TimelineEvent) -> EngineResult<()>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query(INSERT_EVENT_SQL)
        .bind(event.id)
        .bind(event.case_id)
        .bind(event.company_id)
        .bind(event.branch_id)
        .bind(event.event_type.as_str())
        .bind(event.stage.as_str())
        .bind(event.previous_stage.map(CaseStage::as_str))
        .bind(event.actor.actor_type.as_str())
        .bind(event.actor.id)
        .bind(event.assigned_to)
        .bind(event.escalated_to)
        .bind(event.event_at)
        .bind(event.duration_from_previous)
        .bind(event.duration_in_stage)
        .bind(event.total_case_duration)
        .bind(event.is_escalation)
        .bind(event.escalation_level)
        .bind(event.sla_breached)
        .bind(event.sla_deadline)
        .bind(event.sla_remaining_minutes)
        .bind(serde_json::to_value(&event.metadata)?)
        .bind(serde_json::to_value(&event.changes)?)
        .bind(event.internal_only)
        .execute(executor)
        .await?;
    Ok(())
}

fn row_to_event(row: &PgRow) -> EngineResult<TimelineEvent> {
    let event_type: String = row.try_get("event_type")?;
    let stage: String = row.try_get("stage")?;
    let previous_stage: Option<String> = row.try_get("previous_stage")?;
    let actor_type: String = row.try_get("actor_type")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let changes: serde_json::Value = row.try_get("changes")?;

    Ok(TimelineEvent {
        id: row.try_get("id")?,
        case_id: row.try_get("case_id")?,
        company_id: row.try_get("company_id")?,
        branch_id: row.try_get("branch_id")?,
        event_type: TimelineEventType::parse(&event_type)
            .ok_or_else(|| EngineError::decode("event_type", event_type.clone()))?,
        stage: CaseStage::parse(&stage)
            .ok_or_else(|| EngineError::decode("stage", stage.clone()))?,
        previous_stage: match previous_stage {
            Some(value) => Some(
                CaseStage::parse(&value)
                    .ok_or_else(|| EngineError::decode("previous_stage", value.clone()))?,
            ),
            None => None,
        },
        actor: Actor {
            actor_type: ActorType::parse(&actor_type)
                .ok_or_else(|| EngineError::decode("actor_type", actor_type.clone()))?,
            id: row.try_get("actor_id")?,
        },
        assigned_to: row.try_get("assigned_to")?,
        escalated_to: row.try_get("escalated_to")?,
        event_at: row.try_get("event_at")?,
        duration_from_previous: row.try_get("duration_from_previous")?,
        duration_in_stage: row.try_get("duration_in_stage")?,
        total_case_duration: row.try_get("total_case_duration")?,
        is_escalation: row.try_get("is_escalation")?,
        escalation_level: row.try_get("escalation_level")?,
        sla_breached: row.try_get("sla_breached")?,
        sla_deadline: row.try_get("sla_deadline")?,
        sla_remaining_minutes: row.try_get("sla_remaining_minutes")?,
        metadata: serde_json::from_value(metadata)?,
        changes: serde_json::from_value(changes)?,
        internal_only: row.try_get("internal_only")?,
    })
}

#[async_trait]
impl TimelineStore for PostgresStore {
    async fn insert_event(&self, event: &TimelineEvent) -> EngineResult<()> {
        insert_event_with(&self.pool, event).await
    }

    async fn events_for_case(&self, case_id: Uuid) -> EngineResult<Vec<TimelineEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM timeline_events WHERE case_id = $1 ORDER BY event_at ASC",
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }

}

fn row_to_rule(row: &PgRow) -> EngineResult<EscalationRule> {
    let stage: String = row.try_get("stage")?;
    let applies_to: String = row.try_get("applies_to")?;
    let calendar: Option<serde_json::Value> = row.try_get("calendar")?;
    let conditions: serde_json::Value = row.try_get("conditions")?;
    let new_priority: Option<String> = row.try_get("new_priority")?;

    Ok(EscalationRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_global: row.try_get("is_global")?,
        company_id: row.try_get("company_id")?,
        branch_id: row.try_get("branch_id")?,
        priority: row.try_get("priority")?,
        stage: CaseStage::parse(&stage)
            .ok_or_else(|| EngineError::decode("stage", stage.clone()))?,
        applies_to: AppliesTo::parse(&applies_to),
        warning_threshold: row.try_get("warning_threshold")?,
        escalation_threshold: row.try_get("escalation_threshold")?,
        critical_threshold: row.try_get("critical_threshold")?,
        calendar: calendar.map(serde_json::from_value).transpose()?,
        escalation_level: row.try_get("escalation_level")?,
        notify_assignee: row.try_get("notify_assignee")?,
        notify_branch_admin: row.try_get("notify_branch_admin")?,
        notify_company_admin: row.try_get("notify_company_admin")?,
        notify_super_admin: row.try_get("notify_super_admin")?,
        notify_user_id: row.try_get("notify_user_id")?,
        notify_emails: row.try_get("notify_emails")?,
        auto_reassign: row.try_get("auto_reassign")?,
        reassign_to: row.try_get("reassign_to")?,
        auto_change_priority: row.try_get("auto_change_priority")?,
        new_priority: match new_priority {
            Some(value) => Some(
                CasePriority::parse(&value)
                    .ok_or_else(|| EngineError::decode("new_priority", value.clone()))?,
            ),
            None => None,
        },
        conditions: serde_json::from_value(conditions)?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const INSERT_RULE_SQL: &str = r#"
    INSERT INTO escalation_rules (
        id, name, description, is_global, company_id, branch_id, priority,
        stage, applies_to, warning_threshold, escalation_threshold,
        critical_threshold, calendar, escalation_level, notify_assignee,
        notify_branch_admin, notify_company_admin, notify_super_admin,
        notify_user_id, notify_emails, auto_reassign, reassign_to,
        auto_change_priority, new_priority, conditions, is_active,
        created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
    )
    ON CONFLICT (id) DO UPDATE SET
        name = EXCLUDED.name,
        description = EXCLUDED.description,
        is_global = EXCLUDED.is_global,
        company_id = EXCLUDED.company_id,
        branch_id = EXCLUDED.branch_id,
        priority = EXCLUDED.priority,
        stage = EXCLUDED.stage,
        applies_to = EXCLUDED.applies_to,
        warning_threshold = EXCLUDED.warning_threshold,
        escalation_threshold = EXCLUDED.escalation_threshold,
        critical_threshold = EXCLUDED.critical_threshold,
        calendar = EXCLUDED.calendar,
        escalation_level = EXCLUDED.escalation_level,
        notify_assignee = EXCLUDED.notify_assignee,
        notify_branch_admin = EXCLUDED.notify_branch_admin,
        notify_company_admin = EXCLUDED.notify_company_admin,
        notify_super_admin = EXCLUDED.notify_super_admin,
        notify_user_id = EXCLUDED.notify_user_id,
        notify_emails = EXCLUDED.notify_emails,
        auto_reassign = EXCLUDED.auto_reassign,
        reassign_to = EXCLUDED.reassign_to,
        auto_change_priority = EXCLUDED.auto_change_priority,
        new_priority = EXCLUDED.new_priority,
        conditions = EXCLUDED.conditions,
        is_active = EXCLUDED.is_active,
        updated_at = EXCLUDED.updated_at
"#;

async fn upsert_rule(pool: &Pool<Postgres>, rule: &EscalationRule) -> EngineResult<()> {
    sqlx::query(INSERT_RULE_SQL)
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.is_global)
        .bind(rule.company_id)
        .bind(rule.branch_id)
        .bind(rule.priority)
        .bind(rule.stage.as_str())
        .bind(rule.applies_to.storage_value())
        .bind(rule.warning_threshold)
        .bind(rule.escalation_threshold)
        .bind(rule.critical_threshold)
        .bind(rule.calendar.as_ref().map(serde_json::to_value).transpose()?)
        .bind(rule.escalation_level)
        .bind(rule.notify_assignee)
        .bind(rule.notify_branch_admin)
        .bind(rule.notify_company_admin)
        .bind(rule.notify_super_admin)
        .bind(rule.notify_user_id)
        .bind(&rule.notify_emails)
        .bind(rule.auto_reassign)
        .bind(rule.reassign_to)
        .bind(rule.auto_change_priority)
        .bind(rule.new_priority.map(CasePriority::as_str))
        .bind(serde_json::to_value(&rule.conditions)?)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl RuleStore for PostgresStore {
    async fn insert_rule(&self, rule: &EscalationRule) -> EngineResult<()> {
        upsert_rule(&self.pool, rule).await
    }

    async fn update_rule(&self, rule: &EscalationRule) -> EngineResult<()> {
        upsert_rule(&self.pool, rule).await
    }

    async fn deactivate_rule(&self, rule_id: Uuid) -> EngineResult<()> {
        sqlx::query(
            "UPDATE escalation_rules SET is_active = FALSE, updated_at = $2 WHERE id = $1",
        )
        .bind(rule_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rule(&self, rule_id: Uuid) -> EngineResult<Option<EscalationRule>> {
        let row = sqlx::query("SELECT * FROM escalation_rules WHERE id = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn active_rules(&self) -> EngineResult<Vec<EscalationRule>> {
        let rows = sqlx::query("SELECT * FROM escalation_rules WHERE is_active")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_rule).collect()
    }
}

fn row_to_escalation(row: &PgRow) -> EngineResult<Escalation> {
    let stage: String = row.try_get("stage")?;
    let resolved_by_type: Option<String> = row.try_get("resolved_by_type")?;
    let old_priority: Option<String> = row.try_get("old_priority")?;
    let new_priority: Option<String> = row.try_get("new_priority")?;

    let resolved_by = match resolved_by_type {
        Some(value) => Some(Actor {
            actor_type: ActorType::parse(&value)
                .ok_or_else(|| EngineError::decode("resolved_by_type", value.clone()))?,
            id: row.try_get("resolved_by_id")?,
        }),
        None => None,
    };

    Ok(Escalation {
        id: row.try_get("id")?,
        case_id: row.try_get("case_id")?,
        rule_id: row.try_get("rule_id")?,
        timeline_event_id: row.try_get("timeline_event_id")?,
        stage: CaseStage::parse(&stage)
            .ok_or_else(|| EngineError::decode("stage", stage.clone()))?,
        stage_occurrence_id: row.try_get("stage_occurrence_id")?,
        escalation_level: row.try_get("escalation_level")?,
        reason: row.try_get("reason")?,
        overdue_minutes: row.try_get("overdue_minutes")?,
        notified_user_ids: row.try_get("notified_user_ids")?,
        notified_emails: row.try_get("notified_emails")?,
        is_resolved: row.try_get("is_resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by,
        resolution_note: row.try_get("resolution_note")?,
        was_reassigned: row.try_get("was_reassigned")?,
        reassigned_to: row.try_get("reassigned_to")?,
        priority_changed: row.try_get("priority_changed")?,
        old_priority: parse_priority(old_priority, "old_priority")?,
        new_priority: parse_priority(new_priority, "new_priority")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_priority(
    value: Option<String>,
    column: &str,
) -> EngineResult<Option<CasePriority>> {
    match value {
        Some(text) => CasePriority::parse(&text)
            .map(Some)
            .ok_or_else(|| EngineError::decode(column, text.clone())),
        None => Ok(None),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl EscalationStore for PostgresStore {
    #[instrument(skip(self, escalation, event), fields(case_id = %escalation.case_id, level = escalation.escalation_level))]
    async fn insert_escalation(
        &self,
        escalation: &Escalation,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        // Re-check under the transaction: a higher-or-equal unresolved
        // escalation for this occurrence makes the attempt a no-op.
        let highest: Option<i16> = sqlx::query_scalar(
            "SELECT max(escalation_level) FROM escalations
             WHERE case_id = $1 AND stage_occurrence_id = $2 AND NOT is_resolved",
        )
        .bind(escalation.case_id)
        .bind(escalation.stage_occurrence_id)
        .fetch_one(&mut *tx)
        .await?;
        if highest.unwrap_or(i16::MIN) >= escalation.escalation_level {
            debug!("escalation already claimed, suppressing duplicate");
            return Ok(ClaimOutcome::Duplicate);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO escalations (
                id, case_id, rule_id, timeline_event_id, stage,
                stage_occurrence_id, escalation_level, reason, overdue_minutes,
                notified_user_ids, notified_emails, is_resolved, resolved_at,
                resolved_by_type, resolved_by_id, resolution_note,
                was_reassigned, reassigned_to, priority_changed,
                old_priority, new_priority, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            "#,
        )
        .bind(escalation.id)
        .bind(escalation.case_id)
        .bind(escalation.rule_id)
        .bind(escalation.timeline_event_id)
        .bind(escalation.stage.as_str())
        .bind(escalation.stage_occurrence_id)
        .bind(escalation.escalation_level)
        .bind(&escalation.reason)
        .bind(escalation.overdue_minutes)
        .bind(&escalation.notified_user_ids)
        .bind(&escalation.notified_emails)
        .bind(escalation.is_resolved)
        .bind(escalation.resolved_at)
        .bind(
            escalation
                .resolved_by
                .map(|actor| actor.actor_type.as_str()),
        )
        .bind(escalation.resolved_by.and_then(|actor| actor.id))
        .bind(&escalation.resolution_note)
        .bind(escalation.was_reassigned)
        .bind(escalation.reassigned_to)
        .bind(escalation.priority_changed)
        .bind(escalation.old_priority.map(CasePriority::as_str))
        .bind(escalation.new_priority.map(CasePriority::as_str))
        .bind(escalation.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                debug!("lost the claim race, suppressing duplicate");
                return Ok(ClaimOutcome::Duplicate);
            }
            return Err(err.into());
        }

        insert_event_with(&mut *tx, event).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Created)
    }

    #[instrument(skip(self, event))]
    async fn claim_warning(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
        event: &TimelineEvent,
    ) -> EngineResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO sla_warnings
                 (case_id, stage_occurrence_id, timeline_event_id, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(case_id)
        .bind(occurrence_id)
        .bind(event.id)
        .bind(event.event_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = claimed {
            if is_unique_violation(&err) {
                debug!("warning already emitted for this occurrence");
                return Ok(ClaimOutcome::Duplicate);
            }
            return Err(err.into());
        }

        insert_event_with(&mut *tx, event).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Created)
    }

    async fn escalation(&self, escalation_id: Uuid) -> EngineResult<Option<Escalation>> {
        let row = sqlx::query("SELECT * FROM escalations WHERE id = $1")
            .bind(escalation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_escalation).transpose()
    }

    async fn unresolved_in_occurrence(
        &self,
        case_id: Uuid,
        occurrence_id: Uuid,
    ) -> EngineResult<Vec<Escalation>> {
        let rows = sqlx::query(
            "SELECT * FROM escalations
             WHERE case_id = $1 AND stage_occurrence_id = $2 AND NOT is_resolved",
        )
        .bind(case_id)
        .bind(occurrence_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_escalation).collect()
    }

    async fn unresolved_escalations(&self) -> EngineResult<Vec<Escalation>> {
        let rows =
            sqlx::query("SELECT * FROM escalations WHERE NOT is_resolved ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_escalation).collect()
    }

    async fn mark_resolved(
        &self,
        escalation_id: Uuid,
        resolved_at: DateTime<Utc>,
        resolved_by: &Actor,
        note: Option<&str>,
    ) -> EngineResult<Escalation> {
        let row = sqlx::query(
            r#"
            UPDATE escalations
            SET is_resolved = TRUE,
                resolved_at = $2,
                resolved_by_type = $3,
                resolved_by_id = $4,
                resolution_note = $5
            WHERE id = $1 AND NOT is_resolved
            RETURNING *
            "#,
        )
        .bind(escalation_id)
        .bind(resolved_at)
        .bind(resolved_by.actor_type.as_str())
        .bind(resolved_by.id)
        .bind(note)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_escalation(&row),
            None => {
                // Distinguish "missing" from "already resolved".
                let exists: Option<bool> =
                    sqlx::query_scalar("SELECT is_resolved FROM escalations WHERE id = $1")
                        .bind(escalation_id)
                        .fetch_optional(&self.pool)
                        .await?;
                match exists {
                    Some(_) => Err(EngineError::AlreadyResolved { escalation_id }),
                    None => Err(EngineError::EscalationNotFound { escalation_id }),
                }
            }
        }
    }

    async fn record_auto_actions(
        &self,
        escalation_id: Uuid,
        record: &AutoActionRecord,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE escalations
            SET was_reassigned = $2,
                reassigned_to = $3,
                priority_changed = $4,
                old_priority = $5,
                new_priority = $6
            WHERE id = $1
            "#,
        )
        .bind(escalation_id)
        .bind(record.was_reassigned)
        .bind(record.reassigned_to)
        .bind(record.priority_changed)
        .bind(record.old_priority.map(CasePriority::as_str))
        .bind(record.new_priority.map(CasePriority::as_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_notifications(
        &self,
        escalation_id: Uuid,
        user_ids: &[Uuid],
        emails: &[String],
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE escalations SET notified_user_ids = $2, notified_emails = $3 WHERE id = $1",
        )
        .bind(escalation_id)
        .bind(user_ids)
        .bind(emails)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
