//! Escalation evaluator: the scheduling core.
//!
//! One evaluation pass walks every open case, selects the governing rule,
//! computes elapsed business minutes since stage entry, and decides
//! whether a new tier was crossed. The decision itself is the pure
//! [`select_level`] function; the executor is the sole durable writer, so
//! repeated or concurrent passes are safe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

use crate::business_clock::elapsed_business_minutes;
use crate::cases::{CaseDirectory, CaseSnapshot, SharedCaseDirectory};
use crate::config::EngineConfig;
use crate::errors::EngineResult;
use crate::escalation::executor::EscalationActionExecutor;
use crate::escalation::types::{Escalation, LevelDecision, RaiseOutcome, CRITICAL_LEVEL};
use crate::rules::types::{EscalationRule, RuleContext};
use crate::rules::RuleCatalog;
use crate::storage::EscalationStore;
use crate::timeline::TimelineLedger;

/// The single highest newly-crossed tier for a case, if any.
///
/// `current_level` is the highest unresolved escalation level in the
/// current stage occurrence (0 when none). The evaluator jumps straight to
/// the highest crossed threshold rather than walking intermediate tiers.
pub fn select_level(
    elapsed: i64,
    current_level: i16,
    warning_already_emitted: bool,
    rule: &EscalationRule,
) -> Option<LevelDecision> {
    if let Some(critical) = rule.critical_threshold {
        if elapsed >= critical && current_level < CRITICAL_LEVEL {
            return Some(LevelDecision::Escalate {
                level: CRITICAL_LEVEL,
            });
        }
    }
    if elapsed >= rule.escalation_threshold && current_level < rule.escalation_level {
        return Some(LevelDecision::Escalate {
            level: rule.escalation_level,
        });
    }
    if let Some(warning) = rule.warning_threshold {
        if elapsed >= warning && current_level == 0 && !warning_already_emitted {
            return Some(LevelDecision::Warning);
        }
    }
    None
}

/// Outcome of evaluating one case.
#[derive(Debug, Clone)]
pub enum CaseEvaluation {
    /// Case not escalatable, no history, or no applicable rule.
    Skipped,
    /// A rule applies but no new threshold was crossed.
    BelowThreshold,
    /// An `sla_warning` timeline event was emitted.
    Warned,
    /// A new escalation was raised.
    Escalated(Escalation),
    /// Another evaluator claimed the level or warning slot first.
    DuplicateSuppressed,
}

/// Counts for one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub warnings: usize,
    pub escalations: usize,
    pub suppressed: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct EscalationEvaluator {
    ledger: TimelineLedger,
    catalog: RuleCatalog,
    escalations: Arc<dyn EscalationStore>,
    cases: SharedCaseDirectory,
    executor: Arc<EscalationActionExecutor>,
    config: EngineConfig,
}

impl EscalationEvaluator {
    pub fn new(
        ledger: TimelineLedger,
        catalog: RuleCatalog,
        escalations: Arc<dyn EscalationStore>,
        cases: SharedCaseDirectory,
        executor: Arc<EscalationActionExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            catalog,
            escalations,
            cases,
            executor,
            config,
        }
    }

    /// Evaluate one case at `now`.
    #[instrument(skip(self, case), fields(case_id = %case.id))]
    pub async fn evaluate_case(
        &self,
        case: &CaseSnapshot,
        now: DateTime<Utc>,
    ) -> EngineResult<CaseEvaluation> {
        if !case.status.is_escalatable() {
            return Ok(CaseEvaluation::Skipped);
        }

        let Some(entry) = self.ledger.latest_stage_entry(case.id).await? else {
            debug!("case has no timeline yet, skipping");
            return Ok(CaseEvaluation::Skipped);
        };

        let ctx = RuleContext {
            company_id: case.company_id,
            branch_id: case.branch_id,
            case_type: &case.case_type,
            stage: entry.stage,
            fields: &case.context,
        };
        let Some(rule) = self.catalog.select_rule(&ctx).await? else {
            return Ok(CaseEvaluation::Skipped);
        };

        // Rules without a calendar of their own fall back to the engine
        // default.
        let calendar = rule
            .calendar
            .as_ref()
            .unwrap_or(&self.config.default_calendar);
        let elapsed = elapsed_business_minutes(entry.entered_at, now, calendar);

        let current_level = self
            .escalations
            .unresolved_in_occurrence(case.id, entry.occurrence_id)
            .await?
            .iter()
            .map(|e| e.escalation_level)
            .max()
            .unwrap_or(0);

        let warning_emitted = self
            .ledger
            .has_warning_in_occurrence(case.id, entry.occurrence_id)
            .await?;

        match select_level(elapsed, current_level, warning_emitted, &rule) {
            None => Ok(CaseEvaluation::BelowThreshold),
            Some(LevelDecision::Warning) => {
                match self
                    .executor
                    .emit_warning(case, &rule, &entry, calendar, elapsed, now)
                    .await?
                {
                    Some(_) => Ok(CaseEvaluation::Warned),
                    // Another evaluator claimed the warning slot first.
                    None => Ok(CaseEvaluation::DuplicateSuppressed),
                }
            }
            Some(LevelDecision::Escalate { level }) => {
                let threshold = if level == CRITICAL_LEVEL {
                    rule.critical_threshold.unwrap_or(rule.escalation_threshold)
                } else {
                    rule.escalation_threshold
                };
                let reason = format!(
                    "case idle for {elapsed} business minutes in stage {} (threshold {threshold})",
                    entry.stage
                );
                let outcome = self
                    .executor
                    .raise(case, &rule, &entry, calendar, level, elapsed, reason, now)
                    .await?;
                match outcome {
                    RaiseOutcome::Created(escalation) => {
                        Ok(CaseEvaluation::Escalated(escalation))
                    }
                    RaiseOutcome::Duplicate => Ok(CaseEvaluation::DuplicateSuppressed),
                }
            }
        }
    }

    /// Evaluate every open case, fanned out with a bounded worker pool.
    /// One case's failure never aborts the rest of the batch.
    #[instrument(skip(self))]
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> EngineResult<EvaluationSummary> {
        let cases = self.cases.open_cases().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_evaluations));
        let mut tasks = JoinSet::new();

        for case in cases {
            let evaluator = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = evaluator.evaluate_case(&case, now).await;
                (case.id, result)
            });
        }

        let mut summary = EvaluationSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(evaluation))) => {
                    summary.evaluated += 1;
                    match evaluation {
                        CaseEvaluation::Skipped => summary.skipped += 1,
                        CaseEvaluation::BelowThreshold => {}
                        CaseEvaluation::Warned => summary.warnings += 1,
                        CaseEvaluation::Escalated(_) => summary.escalations += 1,
                        CaseEvaluation::DuplicateSuppressed => summary.suppressed += 1,
                    }
                }
                Ok((case_id, Err(err))) => {
                    error!(%case_id, error = %err, "case evaluation failed");
                    summary.evaluated += 1;
                    summary.failures += 1;
                }
                Err(join_err) => {
                    error!(error = %join_err, "evaluation task aborted");
                    summary.failures += 1;
                }
            }
        }

        debug!(
            evaluated = summary.evaluated,
            escalations = summary.escalations,
            warnings = summary.warnings,
            "evaluation pass finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::types::CaseStage;

    fn rule() -> EscalationRule {
        let mut rule = EscalationRule::new("sla", CaseStage::Investigation, 60);
        rule.warning_threshold = Some(30);
        rule.critical_threshold = Some(180);
        rule.escalation_level = 1;
        rule
    }

    #[test]
    fn below_warning_is_none() {
        assert_eq!(select_level(10, 0, false, &rule()), None);
    }

    #[test]
    fn warning_tier_emits_once() {
        assert_eq!(select_level(40, 0, false, &rule()), Some(LevelDecision::Warning));
        assert_eq!(select_level(40, 0, true, &rule()), None);
    }

    #[test]
    fn escalation_threshold_selects_rule_level() {
        assert_eq!(
            select_level(70, 0, false, &rule()),
            Some(LevelDecision::Escalate { level: 1 })
        );
    }

    #[test]
    fn critical_jumps_straight_to_level_three() {
        // 200 minutes crosses critical; level 2 was never reached and is
        // not walked through.
        assert_eq!(
            select_level(200, 0, false, &rule()),
            Some(LevelDecision::Escalate { level: CRITICAL_LEVEL })
        );
        // Even with level 1 already raised, critical still fires.
        assert_eq!(
            select_level(200, 1, true, &rule()),
            Some(LevelDecision::Escalate { level: CRITICAL_LEVEL })
        );
    }

    #[test]
    fn reached_level_suppresses_reraise() {
        assert_eq!(select_level(70, 1, true, &rule()), None);
        assert_eq!(select_level(200, 3, true, &rule()), None);
    }

    #[test]
    fn warning_suppressed_once_escalated() {
        // An unresolved level means the warning tier is long past.
        assert_eq!(select_level(40, 1, false, &rule()), None);
    }
}
