//! SLA escalation: evaluator, executor, scheduler, and instance records.

pub mod evaluator;
pub mod executor;
pub mod scheduler;
pub mod types;

pub use evaluator::{select_level, CaseEvaluation, EscalationEvaluator, EvaluationSummary};
pub use executor::EscalationActionExecutor;
pub use scheduler::EvaluationScheduler;
pub use types::{AutoActionRecord, Escalation, LevelDecision, RaiseOutcome, CRITICAL_LEVEL};
