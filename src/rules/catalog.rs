//! Escalation rule catalog: configuration CRUD plus ordered candidate
//! lookup for the evaluator.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::rules::types::{EscalationRule, RuleContext};
use crate::storage::RuleStore;

#[derive(Clone)]
pub struct RuleCatalog {
    store: Arc<dyn RuleStore>,
}

impl RuleCatalog {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Create a rule. Malformed rules are rejected here and never reach
    /// the evaluator.
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, name = %rule.name))]
    pub async fn create_rule(&self, rule: EscalationRule) -> EngineResult<EscalationRule> {
        rule.validate()?;
        self.store.insert_rule(&rule).await?;
        debug!("escalation rule created");
        Ok(rule)
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub async fn update_rule(&self, rule: EscalationRule) -> EngineResult<EscalationRule> {
        rule.validate()?;
        if self.store.rule(rule.id).await?.is_none() {
            return Err(EngineError::InvalidRule {
                reason: format!("cannot update unknown rule {}", rule.id),
            });
        }
        self.store.update_rule(&rule).await?;
        Ok(rule)
    }

    /// Soft delete. Escalations referencing the rule keep their reference.
    pub async fn deactivate_rule(&self, rule_id: Uuid) -> EngineResult<()> {
        self.store.deactivate_rule(rule_id).await
    }

    pub async fn rule(&self, rule_id: Uuid) -> EngineResult<Option<EscalationRule>> {
        self.store.rule(rule_id).await
    }

    /// All active rules matching the context, most specific first:
    /// explicit priority descending, ties broken by branch > company >
    /// global scope.
    pub async fn matching_rules(
        &self,
        ctx: &RuleContext<'_>,
    ) -> EngineResult<Vec<EscalationRule>> {
        let mut matches: Vec<EscalationRule> = self
            .store
            .active_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.matches(ctx))
            .collect();
        order_rules(&mut matches);
        Ok(matches)
    }

    /// First-match-wins selection: the single governing rule for a case,
    /// if any SLA applies at all.
    pub async fn select_rule(
        &self,
        ctx: &RuleContext<'_>,
    ) -> EngineResult<Option<EscalationRule>> {
        Ok(self.matching_rules(ctx).await?.into_iter().next())
    }
}

/// Ordering policy in one reviewable place: priority descending, then
/// specificity descending, then creation time for determinism.
pub fn order_rules(rules: &mut [EscalationRule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.specificity().cmp(&a.specificity()))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::timeline::types::CaseStage;
    use std::collections::HashMap;

    fn catalog() -> RuleCatalog {
        RuleCatalog::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn rejects_malformed_rule_at_save_time() {
        let catalog = catalog();
        let mut rule = EscalationRule::new("bad", CaseStage::Triage, 60);
        rule.warning_threshold = Some(120);
        assert!(matches!(
            catalog.create_rule(rule).await,
            Err(EngineError::InvalidRule { .. })
        ));
    }

    #[tokio::test]
    async fn branch_scoped_rule_wins_priority_tie() {
        let catalog = catalog();
        let company = Uuid::new_v4();
        let branch = Uuid::new_v4();

        let mut global = EscalationRule::new("global", CaseStage::Triage, 60);
        global.priority = 1;
        let global = catalog.create_rule(global).await.unwrap();

        let mut scoped =
            EscalationRule::new("branch", CaseStage::Triage, 30).scoped_to_branch(company, branch);
        scoped.priority = 1;
        let scoped = catalog.create_rule(scoped).await.unwrap();

        let fields = HashMap::new();
        let ctx = RuleContext {
            company_id: company,
            branch_id: Some(branch),
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };

        let matches = catalog.matching_rules(&ctx).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, scoped.id);
        assert_eq!(matches[1].id, global.id);

        let selected = catalog.select_rule(&ctx).await.unwrap().unwrap();
        assert_eq!(selected.id, scoped.id);
    }

    #[tokio::test]
    async fn higher_priority_beats_specificity() {
        let catalog = catalog();
        let company = Uuid::new_v4();

        let mut global = EscalationRule::new("global", CaseStage::Triage, 60);
        global.priority = 10;
        let global = catalog.create_rule(global).await.unwrap();

        let scoped = EscalationRule::new("company", CaseStage::Triage, 30)
            .scoped_to_company(company);
        catalog.create_rule(scoped).await.unwrap();

        let fields = HashMap::new();
        let ctx = RuleContext {
            company_id: company,
            branch_id: None,
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };

        let selected = catalog.select_rule(&ctx).await.unwrap().unwrap();
        assert_eq!(selected.id, global.id);
    }

    #[tokio::test]
    async fn deactivated_rules_stop_matching() {
        let catalog = catalog();
        let rule = catalog
            .create_rule(EscalationRule::new("r", CaseStage::Triage, 60))
            .await
            .unwrap();

        let fields = HashMap::new();
        let ctx = RuleContext {
            company_id: Uuid::new_v4(),
            branch_id: None,
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };
        assert!(catalog.select_rule(&ctx).await.unwrap().is_some());

        catalog.deactivate_rule(rule.id).await.unwrap();
        assert!(catalog.select_rule(&ctx).await.unwrap().is_none());
    }
}
