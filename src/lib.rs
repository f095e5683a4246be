//! Case lifecycle timeline and SLA-escalation engine.
//!
//! The engine records every state transition a case goes through in an
//! append-only timeline, measures elapsed in-stage time under a
//! business-hours calendar, matches each open case against prioritized
//! escalation rules, and raises at-most-once escalation actions
//! (notification fan-out, reassignment, priority bump) safely across any
//! number of concurrent evaluator instances.
//!
//! Case CRUD, authentication, file storage, and notification delivery are
//! external collaborators reached through the [`cases::CaseDirectory`] and
//! [`notifications::Notifier`] traits.

pub mod business_clock;
pub mod cases;
pub mod config;
pub mod errors;
pub mod escalation;
pub mod notifications;
pub mod rules;
pub mod storage;
pub mod timeline;

pub use business_clock::{elapsed_business_minutes, BusinessCalendar, DayWindow};
pub use cases::{CaseDirectory, CasePriority, CaseSnapshot, CaseStatus, SharedCaseDirectory};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use escalation::{
    CaseEvaluation, Escalation, EscalationActionExecutor, EscalationEvaluator,
    EvaluationScheduler, EvaluationSummary, LevelDecision, RaiseOutcome,
};
pub use notifications::{NotificationRequest, NotificationTarget, Notifier};
pub use rules::{EscalationRule, RuleCatalog, RuleContext};
pub use storage::{
    ClaimOutcome, EscalationStore, InMemoryStore, PostgresStore, RuleStore, TimelineStore,
};
pub use timeline::{
    Actor, ActorType, CaseStage, NewTimelineEvent, StageEntry, TimelineEvent, TimelineEventType,
    TimelineLedger,
};
