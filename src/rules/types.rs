//! Escalation rule configuration types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::business_clock::BusinessCalendar;
use crate::cases::CasePriority;
use crate::errors::{EngineError, EngineResult};
use crate::timeline::types::CaseStage;

/// Case-type filter on a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliesTo {
    All,
    CaseType(String),
}

impl AppliesTo {
    pub fn matches(&self, case_type: &str) -> bool {
        match self {
            AppliesTo::All => true,
            AppliesTo::CaseType(wanted) => wanted == case_type,
        }
    }

    pub fn storage_value(&self) -> &str {
        match self {
            AppliesTo::All => "all",
            AppliesTo::CaseType(case_type) => case_type,
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "all" {
            AppliesTo::All
        } else {
            AppliesTo::CaseType(value.to_string())
        }
    }
}

impl Serialize for AppliesTo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.storage_value())
    }
}

impl<'de> Deserialize<'de> for AppliesTo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(AppliesTo::parse(&value))
    }
}

/// Configured SLA escalation rule.
///
/// Scoping: `is_global` rules apply across companies; otherwise
/// `company_id` is required and a missing `branch_id` means the rule
/// covers every branch of that company. Soft-deleted via `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,

    pub is_global: bool,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,

    /// Tie-break ordering between rules; higher wins.
    pub priority: i32,
    pub stage: CaseStage,
    pub applies_to: AppliesTo,

    /// Thresholds in business minutes. `escalation_threshold` is always
    /// required; the others are optional tiers around it.
    pub warning_threshold: Option<i64>,
    pub escalation_threshold: i64,
    pub critical_threshold: Option<i64>,

    /// Business-hours participation and weekly template for this rule.
    /// Absent means the engine's configured default calendar applies.
    #[serde(default)]
    pub calendar: Option<BusinessCalendar>,

    /// Level recorded when `escalation_threshold` is crossed (1..=3).
    pub escalation_level: i16,

    pub notify_assignee: bool,
    pub notify_branch_admin: bool,
    pub notify_company_admin: bool,
    pub notify_super_admin: bool,
    pub notify_user_id: Option<Uuid>,
    pub notify_emails: Vec<String>,

    pub auto_reassign: bool,
    pub reassign_to: Option<Uuid>,
    pub auto_change_priority: bool,
    pub new_priority: Option<CasePriority>,

    /// Extra matching: every key must be present on the case context and
    /// its value a member of the allowed set.
    #[serde(default)]
    pub conditions: HashMap<String, Vec<serde_json::Value>>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Case facts a rule is matched against.
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub case_type: &'a str,
    pub stage: CaseStage,
    pub fields: &'a HashMap<String, serde_json::Value>,
}

impl EscalationRule {
    /// Validation applied at save time; a rule that fails here never
    /// reaches the evaluator.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("rule name must not be empty"));
        }
        if self.escalation_threshold <= 0 {
            return Err(invalid("escalation_threshold must be positive"));
        }
        if let Some(warning) = self.warning_threshold {
            if warning <= 0 {
                return Err(invalid("warning_threshold must be positive"));
            }
            if warning >= self.escalation_threshold {
                return Err(invalid(
                    "warning_threshold must be below escalation_threshold",
                ));
            }
        }
        if let Some(critical) = self.critical_threshold {
            if critical <= self.escalation_threshold {
                return Err(invalid(
                    "critical_threshold must exceed escalation_threshold",
                ));
            }
        }
        if !(1..=3).contains(&self.escalation_level) {
            return Err(invalid("escalation_level must be between 1 and 3"));
        }
        if let Some(calendar) = &self.calendar {
            if calendar
                .week
                .iter()
                .flatten()
                .any(|window| window.close <= window.open)
            {
                return Err(invalid("calendar windows must close after they open"));
            }
        }
        if self.is_global && self.company_id.is_some() {
            return Err(invalid("a global rule must not carry a company scope"));
        }
        if !self.is_global && self.company_id.is_none() {
            return Err(invalid("a non-global rule requires a company scope"));
        }
        if self.branch_id.is_some() && self.company_id.is_none() {
            return Err(invalid("a branch scope requires a company scope"));
        }
        if self.auto_reassign && self.reassign_to.is_none() {
            return Err(invalid("auto_reassign requires a reassignment target"));
        }
        if self.auto_change_priority && self.new_priority.is_none() {
            return Err(invalid("auto_change_priority requires a new priority"));
        }
        Ok(())
    }

    /// Matching predicate per §catalog: stage, case type, scope, and every
    /// configured condition.
    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.stage != ctx.stage {
            return false;
        }
        if !self.applies_to.matches(ctx.case_type) {
            return false;
        }
        if !self.is_global {
            if self.company_id != Some(ctx.company_id) {
                return false;
            }
            if let Some(branch) = self.branch_id {
                if ctx.branch_id != Some(branch) {
                    return false;
                }
            }
        }
        for (key, allowed) in &self.conditions {
            match ctx.fields.get(key) {
                Some(value) if allowed.contains(value) => {}
                _ => return false,
            }
        }
        true
    }

    /// Specificity for tie-breaking: branch-scoped beats company-scoped
    /// beats global.
    pub fn specificity(&self) -> u8 {
        if self.branch_id.is_some() {
            2
        } else if self.company_id.is_some() {
            1
        } else {
            0
        }
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidRule {
        reason: reason.to_string(),
    }
}

/// Builder-style defaults for a new rule; callers override what they need
/// before saving.
impl EscalationRule {
    pub fn new(name: impl Into<String>, stage: CaseStage, escalation_threshold: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            is_global: true,
            company_id: None,
            branch_id: None,
            priority: 0,
            stage,
            applies_to: AppliesTo::All,
            warning_threshold: None,
            escalation_threshold,
            critical_threshold: None,
            calendar: None,
            escalation_level: 1,
            notify_assignee: true,
            notify_branch_admin: false,
            notify_company_admin: false,
            notify_super_admin: false,
            notify_user_id: None,
            notify_emails: Vec::new(),
            auto_reassign: false,
            reassign_to: None,
            auto_change_priority: false,
            new_priority: None,
            conditions: HashMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scoped_to_company(mut self, company_id: Uuid) -> Self {
        self.is_global = false;
        self.company_id = Some(company_id);
        self
    }

    pub fn scoped_to_branch(mut self, company_id: Uuid, branch_id: Uuid) -> Self {
        self.is_global = false;
        self.company_id = Some(company_id);
        self.branch_id = Some(branch_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> EscalationRule {
        EscalationRule::new("triage sla", CaseStage::Triage, 60)
    }

    #[test]
    fn valid_rule_passes() {
        assert!(rule().validate().is_ok());
    }

    #[test]
    fn warning_must_stay_below_escalation() {
        let mut bad = rule();
        bad.warning_threshold = Some(60);
        assert!(matches!(
            bad.validate(),
            Err(EngineError::InvalidRule { .. })
        ));
    }

    #[test]
    fn critical_must_exceed_escalation() {
        let mut bad = rule();
        bad.critical_threshold = Some(60);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn inverted_calendar_window_is_rejected() {
        use chrono::NaiveTime;
        let mut bad = rule();
        bad.calendar = Some(BusinessCalendar::weekdays(
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        ));
        assert!(matches!(
            bad.validate(),
            Err(EngineError::InvalidRule { .. })
        ));
    }

    #[test]
    fn non_global_rule_requires_company() {
        let mut bad = rule();
        bad.is_global = false;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn conditions_require_membership() {
        let mut scoped = rule();
        scoped
            .conditions
            .insert("severity".to_string(), vec![serde_json::json!("high")]);

        let mut fields = HashMap::new();
        fields.insert("severity".to_string(), serde_json::json!("high"));
        let ctx = RuleContext {
            company_id: Uuid::new_v4(),
            branch_id: None,
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };
        assert!(scoped.matches(&ctx));

        fields_mismatch(&scoped);
    }

    fn fields_mismatch(rule: &EscalationRule) {
        let mut fields = HashMap::new();
        fields.insert("severity".to_string(), serde_json::json!("low"));
        let ctx = RuleContext {
            company_id: Uuid::new_v4(),
            branch_id: None,
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };
        assert!(!rule.matches(&ctx));
    }

    #[test]
    fn branch_scope_must_match() {
        let company = Uuid::new_v4();
        let branch = Uuid::new_v4();
        let scoped = rule().scoped_to_branch(company, branch);
        let fields = HashMap::new();

        let same_branch = RuleContext {
            company_id: company,
            branch_id: Some(branch),
            case_type: "incident",
            stage: CaseStage::Triage,
            fields: &fields,
        };
        assert!(scoped.matches(&same_branch));

        let other_branch = RuleContext {
            branch_id: Some(Uuid::new_v4()),
            ..same_branch.clone()
        };
        assert!(!scoped.matches(&other_branch));
    }
}
